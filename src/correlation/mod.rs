pub mod cache;
pub mod sample;

pub use cache::{CachePolicy, CorrelationCache};
pub use sample::CoordinateSample;
