//! Wire types for the Sendmail milter protocol.
//!
//! This crate only knows about bytes on the wire: framing, per-command
//! payload layout and the modification/action replies a milter server can
//! send back. It has no opinion about sessions, scanning or transport.

pub mod actions;
pub mod commands;
pub mod decoding;
pub mod encoding;
pub mod modifications;
pub mod optneg;

mod error;

use encoding::ServerMessage;

pub use error::{InvalidData, NotEnoughData, ProtocolError};

use modifications::{
    body::ReplaceBody,
    change_from::ChangeFrom,
    headers::{AddHeader, ChangeHeader, InsertHeader},
    quarantine::Quarantine,
    recipients::{AddRecipient, DeleteRecipient},
};
