use bytes::{Bytes, BytesMut};

/// Raw bytes of one frame as the transport delivered them.
#[derive(Clone, Debug)]
pub enum Frame {
    Contiguous(Bytes),
    /// Parts that must be concatenated before decoding.
    Fragmented(Vec<Bytes>),
}

impl Frame {
    /// Concatenate into one buffer. `None` when there is nothing to assemble.
    pub fn assemble(self) -> Option<Bytes> {
        let buf = match self {
            Frame::Contiguous(buf) => buf,
            Frame::Fragmented(parts) => match parts.len() {
                0 => return None,
                1 => parts.into_iter().next()?,
                _ => {
                    let total = parts.iter().map(Bytes::len).sum();
                    let mut out = BytesMut::with_capacity(total);
                    for part in &parts {
                        out.extend_from_slice(part);
                    }
                    out.freeze()
                }
            },
        };
        (!buf.is_empty()).then_some(buf)
    }
}

impl From<Bytes> for Frame {
    fn from(buf: Bytes) -> Self {
        Frame::Contiguous(buf)
    }
}

impl From<Vec<u8>> for Frame {
    fn from(buf: Vec<u8>) -> Self {
        Frame::Contiguous(Bytes::from(buf))
    }
}

impl From<&[u8]> for Frame {
    fn from(buf: &[u8]) -> Self {
        Frame::Contiguous(Bytes::copy_from_slice(buf))
    }
}

impl From<Vec<Bytes>> for Frame {
    fn from(parts: Vec<Bytes>) -> Self {
        Frame::Fragmented(parts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragments_are_concatenated_in_order() {
        let frame = Frame::from(vec![
            Bytes::from_static(b"ab"),
            Bytes::from_static(b""),
            Bytes::from_static(b"cd"),
        ]);
        assert_eq!(frame.assemble().unwrap(), Bytes::from_static(b"abcd"));
    }

    #[test]
    fn empty_inputs_cannot_be_assembled() {
        assert!(Frame::Fragmented(vec![]).assemble().is_none());
        assert!(Frame::from(vec![Bytes::new(), Bytes::new()]).assemble().is_none());
        assert!(Frame::from(Vec::<u8>::new()).assemble().is_none());
    }
}
