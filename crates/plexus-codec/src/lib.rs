//! Wire codec for requests and responses.
//!
//! Each connection picks one [`WireMode`] for its whole lifetime. Binary mode
//! is MessagePack and round-trips every [`Value`] exactly. Text mode is JSON
//! and maps types JSON cannot carry as described in [`json`].

pub mod error;
pub mod frame;
pub mod json;
pub mod message;

pub use error::CodecError;
pub use frame::Frame;
pub use message::{Request, Response, WireMessage};
pub use rmpv::Value;

/// Nesting allowed in a binary frame; the same bound `serde_json` applies
/// to text frames.
pub const MAX_DEPTH: usize = 128;

/// Encoding negotiated once per connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WireMode {
    Binary,
    Text,
}

impl WireMode {
    pub fn from_binary_flag(binary: bool) -> Self {
        if binary {
            WireMode::Binary
        } else {
            WireMode::Text
        }
    }

    pub fn is_binary(self) -> bool {
        self == WireMode::Binary
    }
}

/// Serialize one message into the bytes of one frame.
pub fn encode<T: WireMessage>(message: &T, mode: WireMode) -> Result<Vec<u8>, CodecError> {
    let value = message.to_value();
    match mode {
        WireMode::Binary => {
            let mut buf = Vec::new();
            rmpv::encode::write_value(&mut buf, &value)?;
            Ok(buf)
        }
        WireMode::Text => Ok(serde_json::to_vec(&json::to_json(&value))?),
    }
}

/// Decode one frame.
///
/// `Ok(None)` means the frame could not be assembled into a buffer; the
/// caller drops it and waits for the next one. Malformed content is `Err`.
pub fn decode<T: WireMessage>(
    frame: impl Into<Frame>,
    mode: WireMode,
) -> Result<Option<T>, CodecError> {
    let Some(buf) = frame.into().assemble() else {
        return Ok(None);
    };
    let value = match mode {
        WireMode::Binary => {
            let mut cursor: &[u8] = &buf;
            let value = rmpv::decode::read_value_with_max_depth(&mut cursor, MAX_DEPTH)?;
            if !cursor.is_empty() {
                return Err(CodecError::TrailingBytes(cursor.len()));
            }
            value
        }
        WireMode::Text => json::from_json(serde_json::from_slice(&buf)?),
    };
    T::from_value(value).map(Some)
}
