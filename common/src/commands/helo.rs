use std::borrow::Cow;

use bytes::{BufMut, BytesMut};

use crate::decoding::Parsable;
use crate::encoding::Writable;
use crate::ProtocolError;

/// Helo information sent by the smtp client
#[derive(Clone, PartialEq, Debug, Default)]
pub struct Helo {
    buffer: BytesMut,
}

impl From<&[u8]> for Helo {
    fn from(value: &[u8]) -> Self {
        Self {
            buffer: BytesMut::from_iter(value),
        }
    }
}

impl Helo {
    const CODE: u8 = b'H';
    /// The helo greeting sent by the client
    #[must_use]
    pub fn helo(&self) -> Cow<str> {
        String::from_utf8_lossy(&self.buffer[..])
    }
}

impl Parsable for Helo {
    const CODE: u8 = Self::CODE;

    /// Sendmail always null-terminates the helo argument, Postfix does not
    /// always bother. Tolerate a missing terminator by taking the whole
    /// payload as the greeting instead of erroring.
    fn parse(mut buffer: BytesMut) -> Result<Self, ProtocolError> {
        if buffer.last() == Some(&0) {
            buffer.truncate(buffer.len() - 1);
        }

        Ok(Self { buffer })
    }
}

impl Writable for Helo {
    fn write(&self, buffer: &mut BytesMut) {
        buffer.extend_from_slice(&self.buffer);
        buffer.put_u8(0);
    }

    fn len(&self) -> usize {
        self.buffer.len() + 1
    }

    fn code(&self) -> u8 {
        Self::CODE
    }

    fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}
