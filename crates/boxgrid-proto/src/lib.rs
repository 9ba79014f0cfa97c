//! Wire protocol for coordinator/worker sessions.
//!
//! Every message is one fixed-layout binary record of exactly
//! [`RECORD_SIZE`] bytes on a TCP stream:
//!
//! ```text
//! tag          u32 (host order)
//! sender_id    256 bytes, NUL-terminated
//! recipient_id 256 bytes, NUL-terminated
//! data_length  u32 (host order)
//! data         remainder (7672 bytes)
//! ```
//!
//! One record, one message; a short read or write is fatal to the
//! connection. Payloads larger than the data capacity are silently
//! truncated on send; the receiver honors the declared length. The record
//! layout is fixed on purpose — homogeneous deployments, no serializer
//! negotiation.

mod conn;
mod message;
mod wire;

pub use conn::{read_message, write_message, MessageSender};
pub use message::{Message, MessageKind, DATA_CAPACITY, ID_FIELD_SIZE, RECORD_SIZE};
pub use wire::{
    decode_container, decode_sample, decode_spec, encode_container, encode_sample, encode_spec,
    SAMPLE_SIZE,
};

use thiserror::Error;

/// Well-known id the coordinator uses as sender/recipient.
pub const COORDINATOR_ID: &str = "coordinator";

/// Protocol-level failures.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// Peer closed the stream (clean end or mid-record).
    #[error("connection closed by peer")]
    Closed,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Tag outside the closed set. The record itself framed correctly, so
    /// the session may log and continue.
    #[error("unknown message tag {0}")]
    UnknownKind(u32),

    /// Declared payload length exceeds the record's data capacity.
    #[error("declared payload length {0} exceeds capacity")]
    Length(u32),

    /// Payload too short or structurally invalid for its tag.
    #[error("malformed {0} payload")]
    Payload(&'static str),
}
