use thiserror::Error;

use crate::storage::buffer::BufferPoolError;

#[derive(Error, Debug)]
pub enum HashIndexError {
    #[error("Bucket count {0} must be between 1 and {1}")]
    InvalidBucketCount(usize, usize),

    #[error("Encoded key of {0} bytes does not fit in a bucket page")]
    KeyTooLarge(usize),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid page format")]
    InvalidPageFormat,

    #[error("Buffer pool error: {0}")]
    BufferPoolError(#[from] BufferPoolError),
}
