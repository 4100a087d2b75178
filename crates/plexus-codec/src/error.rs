/// Content failures: the frame was assembled but its bytes are not a valid
/// message. Framing failures are not errors; see [`crate::decode`].
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("msgpack decode error: {0}")]
    MsgpackDecode(String),

    #[error("msgpack encode error: {0}")]
    MsgpackEncode(String),

    #[error("json error: {0}")]
    Json(String),

    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),

    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

impl From<rmpv::decode::Error> for CodecError {
    fn from(e: rmpv::decode::Error) -> Self {
        CodecError::MsgpackDecode(e.to_string())
    }
}

impl From<rmpv::encode::Error> for CodecError {
    fn from(e: rmpv::encode::Error) -> Self {
        CodecError::MsgpackEncode(e.to_string())
    }
}

impl From<serde_json::Error> for CodecError {
    fn from(e: serde_json::Error) -> Self {
        CodecError::Json(e.to_string())
    }
}
