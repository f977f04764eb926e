use std::sync::Arc;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can abort a scan. Any of these is fatal to the whole stream.
///
/// The type is `Clone` so a latched error can be handed out more than once;
/// I/O errors are shared behind an `Arc` for that reason.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Short read or malformed frame.
    #[error("framing error: {0}")]
    Framing(String),

    /// A blob's type tag does not match its position in the stream.
    #[error("expected a '{expected}' blob, found '{found}'")]
    BlobType { expected: &'static str, found: String },

    #[error("unsupported blob compression: {0}")]
    UnsupportedCompression(&'static str),

    #[error("failed to decompress blob: {0}")]
    Decompression(String),

    #[error("decompressed blob is {actual} bytes, header declared {declared}")]
    SizeMismatch { declared: usize, actual: usize },

    #[error("failed to decode message: {0}")]
    Unmarshal(#[from] prost::DecodeError),

    #[error("primitive block has no string table")]
    MissingStringTable,

    /// String-table index out of range.
    #[error("string index {index} is outside the string table ({len} entries)")]
    Bounds { index: i64, len: usize },

    /// A column is shorter than the index being decoded.
    #[error("no {field} for index {index}")]
    Consistency { field: &'static str, index: usize },

    #[error("unknown relation member type {0}")]
    UnknownMemberType(i32),

    #[error("a decode thread panicked")]
    ThreadPanicked,

    #[error("I/O error: {0}")]
    Io(#[source] Arc<std::io::Error>),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}

impl Error {
    pub(crate) fn consistency(field: &'static str, index: usize) -> Self {
        Error::Consistency { field, index }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_survive_cloning() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "gone").into();
        let copy = err.clone();
        assert!(matches!(copy, Error::Io(ref inner) if inner.kind() == std::io::ErrorKind::UnexpectedEof));
        assert_eq!(err.to_string(), copy.to_string());
    }

    #[test]
    fn messages_name_the_offending_values() {
        let err = Error::Bounds { index: 12, len: 3 };
        assert_eq!(err.to_string(), "string index 12 is outside the string table (3 entries)");
        let err = Error::consistency("lat", 4);
        assert_eq!(err.to_string(), "no lat for index 4");
    }
}
