use std::borrow::Cow;

use bytes::{BufMut, BytesMut};
use itertools::Itertools;

use crate::decoding::Parsable;
use crate::encoding::Writable;
use crate::{error::STAGE_DECODING, NotEnoughData};
use crate::{InvalidData, ProtocolError};
use miltr_utils::ByteParsing;

/// (Silently) discard this mail without forwarding it
#[derive(Debug, Clone)]
pub struct Discard;

impl Discard {
    const CODE: u8 = b'd';
}

impl Parsable for Discard {
    const CODE: u8 = Self::CODE;

    fn parse(_buffer: BytesMut) -> Result<Self, ProtocolError> {
        Ok(Self)
    }
}

impl Writable for Discard {
    fn write(&self, _buffer: &mut BytesMut) {}

    fn len(&self) -> usize {
        0
    }

    fn code(&self) -> u8 {
        Self::CODE
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Reject this mail, informing the smtp client about it
#[derive(Debug, Clone)]
pub struct Reject;

impl Reject {
    const CODE: u8 = b'r';
}

impl Parsable for Reject {
    const CODE: u8 = Self::CODE;

    fn parse(_buffer: BytesMut) -> Result<Self, ProtocolError> {
        Ok(Self)
    }
}

impl Writable for Reject {
    fn write(&self, _buffer: &mut BytesMut) {}

    fn len(&self) -> usize {
        0
    }

    fn code(&self) -> u8 {
        Self::CODE
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Return a tempfail code to the smtp client
#[derive(Debug, Clone)]
pub struct Tempfail;

impl Tempfail {
    const CODE: u8 = b't';
}

impl Parsable for Tempfail {
    const CODE: u8 = Self::CODE;

    fn parse(_buffer: BytesMut) -> Result<Self, ProtocolError> {
        Ok(Self)
    }
}

impl Writable for Tempfail {
    fn write(&self, _buffer: &mut BytesMut) {}

    fn len(&self) -> usize {
        0
    }

    fn code(&self) -> u8 {
        Self::CODE
    }
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Skip this mail processing
#[derive(Debug, Clone)]
pub struct Skip;

impl Skip {
    const CODE: u8 = b's';
}

impl Parsable for Skip {
    const CODE: u8 = Self::CODE;

    fn parse(_buffer: BytesMut) -> Result<Self, ProtocolError> {
        Ok(Self)
    }
}

impl Writable for Skip {
    fn write(&self, _buffer: &mut BytesMut) {}

    fn len(&self) -> usize {
        0
    }

    fn code(&self) -> u8 {
        Self::CODE
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

const ENHANCED_CODE_LENGTH: usize = 3;

/// Return this status code to the smtp client.
///
/// Wire format is a single, space-separated, null-terminated string:
/// `"<rcode> <xcode> <message>\0"`, e.g. `"554 5.7.1 blocked\0"`. This is
/// the format real Sendmail/Postfix milter clients speak (`SMFIR_REPLYCODE`);
/// it differs from three independently null-terminated fields.
#[derive(Debug, Clone)]
pub struct Replycode {
    rcode: ReplyCode,
    xcode: EnhancedStatusCode,
    message: BytesMut,
}

impl Replycode {
    const CODE: u8 = b'y';

    /// Create a Replycode
    #[must_use]
    #[allow(clippy::similar_names)]
    pub fn new<R: Into<ReplyCode>, X: Into<EnhancedStatusCode>>(
        rcode: R,
        xcode: X,
        message: &str,
    ) -> Self {
        let rcode = rcode.into();
        let xcode = xcode.into();

        Self {
            rcode,
            xcode,
            message: BytesMut::from(message.as_bytes()),
        }
    }

    /// The message associated with this reply code
    #[must_use]
    pub fn message(&self) -> Cow<str> {
        String::from_utf8_lossy(&self.message)
    }

    /// The smtp return code
    #[must_use]
    pub fn rcode(&self) -> &ReplyCode {
        &self.rcode
    }

    /// The smtp enhanced return code
    #[must_use]
    pub fn xcode(&self) -> &EnhancedStatusCode {
        &self.xcode
    }
}

impl Parsable for Replycode {
    const CODE: u8 = Self::CODE;

    // rcode and xcode are just named that in the docs. Keeping it consistent.
    #[allow(clippy::similar_names)]
    fn parse(mut buffer: BytesMut) -> Result<Self, ProtocolError> {
        let Some(mut payload) = buffer.delimited(0) else {
            return Err(NotEnoughData::new(
                STAGE_DECODING,
                "Replycode",
                "Missing nullbyte delimiter after reply text",
                1,
                0,
                buffer,
            )
            .into());
        };

        #[allow(clippy::similar_names)]
        let Some(rcode) = payload.delimited(b' ') else {
            return Err(NotEnoughData::new(
                STAGE_DECODING,
                "Replycode",
                "Missing space delimiter after rcode",
                1,
                0,
                payload,
            )
            .into());
        };
        let rcode = ReplyCode::parse(rcode)?;

        let Some(xcode) = payload.delimited(b' ') else {
            return Err(NotEnoughData::new(
                STAGE_DECODING,
                "Replycode",
                "Missing space delimiter after xcode",
                1,
                0,
                payload,
            )
            .into());
        };
        let xcode = EnhancedStatusCode::parse(xcode)?;

        Ok(Self {
            rcode,
            xcode,
            message: payload,
        })
    }
}

impl Writable for Replycode {
    fn write(&self, buffer: &mut BytesMut) {
        buffer.put_slice(self.rcode.as_bytes());
        buffer.put_u8(b' ');
        buffer.put_slice(self.xcode.as_bytes());
        buffer.put_u8(b' ');
        buffer.put_slice(&self.message);
        buffer.put_u8(0);
    }

    fn len(&self) -> usize {
        self.rcode.len() + 1 + self.xcode.len() + 1 + self.message.len() + 1
    }

    fn code(&self) -> u8 {
        Self::CODE
    }
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A bare 3-digit SMTP reply code, e.g. `554`.
#[derive(Debug, Clone)]
pub struct ReplyCode {
    code: u16,
    bytes: BytesMut,
}

impl From<u16> for ReplyCode {
    fn from(code: u16) -> Self {
        Self::new(code)
    }
}

impl ReplyCode {
    #[must_use]
    pub fn new(code: u16) -> Self {
        Self {
            code,
            bytes: BytesMut::from(code.to_string().as_bytes()),
        }
    }

    fn parse(buffer: BytesMut) -> Result<Self, InvalidData> {
        let Ok(code) = String::from_utf8_lossy(&buffer).parse() else {
            return Err(InvalidData {
                msg: "invalid smtp reply code",
                offending_bytes: buffer,
            });
        };

        Ok(Self { code, bytes: buffer })
    }

    /// The numeric reply code
    #[must_use]
    pub fn code(&self) -> u16 {
        self.code
    }

    fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn len(&self) -> usize {
        self.bytes.len()
    }
}

/// A dot-notation enhanced status code, e.g. `5.7.1`.
#[derive(Debug, Clone)]
pub struct EnhancedStatusCode {
    code: [u16; ENHANCED_CODE_LENGTH],
    bytes: BytesMut,
}

impl From<[u16; ENHANCED_CODE_LENGTH]> for EnhancedStatusCode {
    fn from(code: [u16; ENHANCED_CODE_LENGTH]) -> Self {
        Self::new(code)
    }
}

impl EnhancedStatusCode {
    #[must_use]
    pub fn new(code: [u16; ENHANCED_CODE_LENGTH]) -> Self {
        Self {
            code,
            bytes: BytesMut::from_iter(code.iter().map(ToString::to_string).join(".").as_bytes()),
        }
    }

    fn parse(buffer: BytesMut) -> Result<Self, InvalidData> {
        let mut positions = buffer.iter().positions(|&c| c == b'.');
        let mut code: [u16; ENHANCED_CODE_LENGTH] = [0_u16; ENHANCED_CODE_LENGTH];

        let mut start = 0;
        for c_code in code.iter_mut().take(ENHANCED_CODE_LENGTH - 1) {
            let Some(end) = positions.next() else {
                return Err(InvalidData {
                    msg: "missing '.' delimiter in code",
                    offending_bytes: buffer,
                });
            };
            let raw = &buffer[start..end];
            let Ok(number) = String::from_utf8_lossy(raw).parse() else {
                return Err(InvalidData {
                    msg: "invalid u16 in code",
                    offending_bytes: buffer,
                });
            };

            *c_code = number;
            start = end + 1;
        }
        let raw = &buffer[start..buffer.len()];
        let Ok(number) = String::from_utf8_lossy(raw).parse() else {
            return Err(InvalidData {
                msg: "invalid u16 in code",
                offending_bytes: buffer,
            });
        };

        code[ENHANCED_CODE_LENGTH - 1] = number;

        Ok(Self {
            code,
            bytes: buffer,
        })
    }

    /// The status code
    #[must_use]
    pub fn code(&self) -> [u16; ENHANCED_CODE_LENGTH] {
        self.code
    }

    fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn len(&self) -> usize {
        self.bytes.len()
    }
}
