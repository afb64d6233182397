//! Change the envelope sender (`MAIL FROM`)

use std::borrow::Cow;

use bytes::{BufMut, BytesMut};

use crate::decoding::Parsable;
use crate::encoding::Writable;
use crate::{InvalidData, ProtocolError};
use miltr_utils::ByteParsing;

/// Change the envelope sender (`SMFIR_CHGFROM`).
///
/// Does not change the `From` header, only the envelope sender.
#[derive(Debug, Clone)]
pub struct ChangeFrom {
    from: BytesMut,
}

impl ChangeFrom {
    const CODE: u8 = b'e';

    /// Change the envelope sender to the given address
    #[must_use]
    pub fn new(from: &[u8]) -> Self {
        Self {
            from: BytesMut::from_iter(from),
        }
    }

    /// The new envelope sender
    #[must_use]
    pub fn from(&self) -> Cow<str> {
        String::from_utf8_lossy(&self.from)
    }
}

impl Parsable for ChangeFrom {
    const CODE: u8 = Self::CODE;

    fn parse(mut buffer: BytesMut) -> Result<Self, ProtocolError> {
        let Some(from) = buffer.delimited(0) else {
            return Err(InvalidData::new(
                "Received change from package without null byte terminating it",
                buffer,
            )
            .into());
        };

        Ok(Self { from })
    }
}

impl Writable for ChangeFrom {
    fn write(&self, buffer: &mut BytesMut) {
        buffer.extend_from_slice(&self.from);
        buffer.put_u8(0);
    }

    fn len(&self) -> usize {
        self.from.len() + 1
    }

    fn code(&self) -> u8 {
        Self::CODE
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
