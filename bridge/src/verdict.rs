//! Parse a scanner verdict and turn it into a [`ModificationResponse`].
//!
//! The verdict wire format is a small, loosely-typed JSON tree; fields this
//! crate doesn't recognize are ignored rather than rejected; so are
//! scanner-side experiments that haven't made it into this applier yet.

use std::collections::HashMap;

use serde::Deserialize;

use miltr_common::{
    actions::{Discard, Reject, Replycode, Tempfail},
    modifications::{
        change_from::ChangeFrom,
        headers::{AddHeader, ChangeHeader, InsertHeader},
        ModificationResponse, ModificationResponseBuilder,
    },
};

use crate::scanner::ScanTransport;
use crate::session::{CiKey, Session};

/// No-ops unless the `tracing` feature is enabled.
macro_rules! info {
    ($($arg:tt)*) => {
        #[cfg(feature = "tracing")]
        tracing::info!($($arg)*);
    };
}

/// No-ops unless the `tracing` feature is enabled.
macro_rules! warn {
    ($($arg:tt)*) => {
        #[cfg(feature = "tracing")]
        tracing::warn!($($arg)*);
    };
}

const RCODE_REJECT: u16 = 554;
const XCODE_REJECT: [u16; 3] = [5, 7, 1];
const DEFAULT_REJECT_MESSAGE: &str = "Spam message rejected";

const RCODE_TEMPFAIL: u16 = 451;
const XCODE_TEMPFAIL: [u16; 3] = [4, 7, 1];
const DEFAULT_TEMPFAIL_MESSAGE: &str = "Try again later";

/// Header name used by the no-action probe mode, reporting the action a
/// verdict would have taken had probing been off.
const PROBE_HEADER: &str = "X-Scan-Action";

/// One `add_headers` entry: either a bare string value, or an object naming
/// an explicit insertion position.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AddHeaderDirective {
    /// `"X-Foo": "bar"` -- appended with `ADDHEADER`.
    Plain(String),
    /// `"X-Foo": {"value": "bar", "order": 2}` -- inserted at `order` with
    /// `INSHEADER` when `order >= 0`, otherwise appended like `Plain`.
    Detailed {
        /// The header value.
        value: String,
        /// The position to insert at, if any. Accepts the `index` alias.
        #[serde(alias = "index")]
        order: Option<i64>,
    },
}

impl AddHeaderDirective {
    fn value(&self) -> &str {
        match self {
            Self::Plain(value) | Self::Detailed { value, .. } => value,
        }
    }

    fn order(&self) -> Option<i64> {
        match self {
            Self::Plain(_) => None,
            Self::Detailed { order, .. } => *order,
        }
    }
}

/// A JSON value that may appear as either a single item or a list of items.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    /// A single value.
    One(T),
    /// Several values for the same key, applied in order.
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    fn iter(&self) -> impl Iterator<Item = &T> {
        let slice = match self {
            Self::One(item) => std::slice::from_ref(item),
            Self::Many(items) => items.as_slice(),
        };
        slice.iter()
    }
}

/// The `messages` sub-object of a verdict.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Messages {
    /// Custom SMTP reply text to use instead of this crate's default
    /// reject/soft-reject wording.
    pub smtp_message: Option<String>,
}

/// The `milter` sub-object of a verdict: direct wire-level instructions,
/// applied regardless of the outer `action`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MilterDirectives {
    /// Header name to occurrence-count to remove. `1` removes the first
    /// occurrence, `0` removes all occurrences, a negative count removes
    /// counting from the last occurrence (`-1` is the last one).
    pub remove_headers: Option<HashMap<String, i64>>,
    /// Headers to add, keyed by name.
    pub add_headers: Option<HashMap<String, OneOrMany<AddHeaderDirective>>>,
    /// New envelope sender (`CHGFROM`).
    pub change_from: Option<String>,
    /// `"discard"` sets `discard_on_reject` for this message; any other
    /// value (including absence) clears it back to the configured default.
    pub reject: Option<String>,
    /// Toggle the no-action probe mode for this message.
    pub no_action: Option<bool>,
}

/// A scanner's verdict on one message.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Verdict {
    /// The high-level disposition: `reject`, `soft_reject`, `rewrite_subject`,
    /// `add_header`, `greylist`, or anything else treated as a no-op accept.
    pub action: Option<String>,
    /// Custom reply text overrides.
    pub messages: Option<Messages>,
    /// Replacement `Subject` header text for `rewrite_subject`.
    pub subject: Option<String>,
    #[serde(rename = "dkim-signature")]
    /// A DKIM signature to insert as a `DKIM-Signature` header.
    pub dkim_signature: Option<String>,
    /// Direct wire-level instructions applied independent of `action`.
    pub milter: Option<MilterDirectives>,
}

impl Verdict {
    /// Parse a verdict from a scanner response body.
    ///
    /// # Errors
    /// Returns the `serde_json` error if `bytes` isn't valid JSON matching
    /// this shape.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Apply `verdict` to `session`, returning the response to send the milter
/// client.
///
/// See the module docs for the exact step order. In short: a missing
/// `action` temp-fails; `milter` directives always run first; `add_header`
/// (whether it's the outer action or the step-3 short circuit) clears and
/// re-sets the configured spam header and returns early, skipping the DKIM
/// insertion and no-action probe steps below it.
pub(crate) fn apply<T: ScanTransport>(
    session: &mut Session<T>,
    verdict: &Verdict,
) -> ModificationResponse {
    let Some(action) = verdict.action.as_deref() else {
        warn!("scanner returned no action; tempfailing");
        return ModificationResponse::builder().build(Tempfail);
    };

    let reply_text = verdict
        .messages
        .as_ref()
        .and_then(|messages| messages.smtp_message.as_deref());

    let mut builder = ModificationResponse::builder();

    if let Some(milter) = &verdict.milter {
        apply_milter_directives(session, milter, &mut builder);

        if action == "add_header" {
            apply_spam_header(session, &mut builder);
            return builder.contin();
        }
    }

    if let Some(dkim) = &verdict.dkim_signature {
        builder.push(InsertHeader::new(1, b"DKIM-Signature", dkim.as_bytes()));
    }

    if session.no_action {
        builder.push(AddHeader::new(PROBE_HEADER.as_bytes(), action.as_bytes()));
        return builder.contin();
    }

    match action {
        "reject" => {
            if session.discard_on_reject {
                warn!("discarding message per reject verdict");
                builder.build(Discard)
            } else {
                warn!("rejecting message per reject verdict");
                let message = reply_text.unwrap_or(DEFAULT_REJECT_MESSAGE);
                builder
                    .reply_then(Replycode::new(RCODE_REJECT, XCODE_REJECT, message))
                    .build(Reject)
            }
        }
        "soft_reject" => {
            info!("soft-rejecting (tempfail) message per soft_reject verdict");
            let message = reply_text.unwrap_or(DEFAULT_TEMPFAIL_MESSAGE);
            builder
                .reply_then(Replycode::new(RCODE_TEMPFAIL, XCODE_TEMPFAIL, message))
                .build(Reject)
        }
        "rewrite_subject" => {
            if let Some(subject) = &verdict.subject {
                builder.push(ChangeHeader::new(1, b"Subject", subject.as_bytes()));
            }
            builder.contin()
        }
        "add_header" => {
            apply_spam_header(session, &mut builder);
            builder.contin()
        }
        // "greylist", "no_action" and anything unrecognized: accept as-is.
        _ => builder.contin(),
    }
}

/// Remove every existing instance of the configured spam header, then set
/// its first occurrence to `Yes`.
fn apply_spam_header<T: ScanTransport>(
    session: &Session<T>,
    builder: &mut ModificationResponseBuilder,
) {
    let name = session.context.spam_header();
    let seen = session
        .headers_seen
        .get(&CiKey::new(name))
        .copied()
        .unwrap_or(0);

    for index in 1..=seen {
        builder.push(ChangeHeader::new(index, name.as_bytes(), b""));
    }
    builder.push(ChangeHeader::new(1, name.as_bytes(), b"Yes"));
}

fn apply_milter_directives<T: ScanTransport>(
    session: &mut Session<T>,
    milter: &MilterDirectives,
    builder: &mut ModificationResponseBuilder,
) {
    if let Some(remove) = &milter.remove_headers {
        for (name, count) in remove {
            apply_remove_header(session, name, *count, builder);
        }
    }

    if let Some(add) = &milter.add_headers {
        for (name, directives) in add {
            for directive in directives.iter() {
                match directive.order() {
                    Some(order) if order >= 0 => {
                        builder.push(InsertHeader::new(
                            order.try_into().unwrap_or(u32::MAX),
                            name.as_bytes(),
                            directive.value().as_bytes(),
                        ));
                    }
                    _ => {
                        builder.push(AddHeader::new(name.as_bytes(), directive.value().as_bytes()));
                    }
                }
            }
        }
    }

    if let Some(from) = &milter.change_from {
        builder.push(ChangeFrom::new(from.as_bytes()));
    }

    if let Some(reject) = &milter.reject {
        session.discard_on_reject = reject == "discard";
    }

    if let Some(no_action) = milter.no_action {
        session.no_action = no_action;
    }
}

/// Translate a `remove_headers` count into `CHGHEADER`(empty value) calls.
///
/// `n >= 1` removes the `n`th occurrence. `n == 0` removes every occurrence.
/// `n < 0` counts from the end: `-1` is the last occurrence, `-2` the
/// second-to-last, and so on; a magnitude larger than the number of seen
/// occurrences is a no-op.
fn apply_remove_header<T: ScanTransport>(
    session: &Session<T>,
    name: &str,
    count: i64,
    builder: &mut ModificationResponseBuilder,
) {
    let seen = i64::from(
        session
            .headers_seen
            .get(&CiKey::new(name))
            .copied()
            .unwrap_or(0),
    );

    if count >= 1 {
        builder.push(ChangeHeader::new(count as u32, name.as_bytes(), b""));
    } else if count == 0 {
        for index in 1..=seen {
            builder.push(ChangeHeader::new(index as u32, name.as_bytes(), b""));
        }
    } else {
        let from_end = -count;
        if from_end <= seen {
            let index = seen - from_end + 1;
            builder.push(ChangeHeader::new(index as u32, name.as_bytes(), b""));
        }
    }
}
