use image::DynamicImage;
use image_hasher::{HashAlg, HasherConfig};

/// 8x8 double-gradient perceptual hash, base64 encoded.
pub fn phash_image(img: &DynamicImage) -> String {
    let hasher = HasherConfig::new()
        .hash_alg(HashAlg::DoubleGradient)
        .hash_size(8, 8)
        .to_hasher();

    hasher.hash_image(img).to_base64()
}
