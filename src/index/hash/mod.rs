mod bucket;
mod error;
mod index;

pub use bucket::{BucketPage, DEFAULT_BUCKET_COUNT, MAX_BUCKET_COUNT, MAX_KEY_SIZE};
pub use error::HashIndexError;
pub use index::HashIndex;
