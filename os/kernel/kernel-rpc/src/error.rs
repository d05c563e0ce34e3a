use alloc::string::String;

/// Malformed or unsupported frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("frame truncated: needed {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("bad frame magic 0x{0:08X}")]
    BadMagic(u32),

    #[error("unsupported frame version {0}")]
    UnsupportedVersion(u16),

    #[error("{0} buffers exceed the frame limit")]
    TooManyBuffers(usize),

    #[error("buffer of {0} bytes exceeds the frame limit")]
    BufferTooLarge(usize),

    #[error("{0} trailing bytes after frame payload")]
    TrailingBytes(usize),
}

/// A dispatch function tried to reply out of contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ReplyError {
    #[error("all {declared} declared output buffers are already filled")]
    NoOutputSlot { declared: usize },

    #[error("output buffer {index} expects {expected} bytes, reply has {actual}")]
    SizeMismatch {
        index: usize,
        expected: usize,
        actual: usize,
    },
}

/// Failure of the call mechanism itself, as opposed to a service return code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("driver handle is closed")]
    Closed,

    #[error("service {0:?} is not registered")]
    ServiceUnavailable(String),

    #[error("malformed frame: {0}")]
    Frame(#[from] FrameError),

    #[error("reply carries {actual} output buffers, caller declared {declared}")]
    TooManyReplies { declared: usize, actual: usize },

    #[error("reply buffer {index} carries {actual} bytes, caller declared {expected}")]
    ReplyMismatch {
        index: usize,
        expected: usize,
        actual: usize,
    },
}
