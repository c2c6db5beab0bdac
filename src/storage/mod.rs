pub mod images;
pub mod phash;

pub use images::{
    country_segment, decode_base64, safe_segment, sniff_format, ImageError, ImageStore, StoredImage,
};
