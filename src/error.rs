use thiserror::Error;

/// Errors raised when rebuilding a layer or buffer from raw host data.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LayerDataError {
    #[error("layer dimensions must be non-zero, got {width}x{height}")]
    ZeroSized { width: u32, height: u32 },

    #[error("expected {expected} bytes of RGBA data for {width}x{height}, got {actual}")]
    ByteCount {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
}
