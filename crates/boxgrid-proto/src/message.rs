//! The fixed-layout record and its encode/decode pair.

use bytes::{Buf, BufMut};

use boxgrid_core::{ContainerRecord, ContainerSpec, ResourceSample};

use crate::wire::{encode_container, encode_sample, encode_spec};
use crate::ProtoError;

/// Total record size on the wire.
pub const RECORD_SIZE: usize = 8192;

/// Size of each NUL-terminated id field.
pub const ID_FIELD_SIZE: usize = 256;

/// Payload capacity after the tag, the two id fields, and the length field.
pub const DATA_CAPACITY: usize = RECORD_SIZE - 4 - 2 * ID_FIELD_SIZE - 4;

/// The closed set of message tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Register,
    Heartbeat,
    Deploy,
    Start,
    Stop,
    Delete,
    ContainerStatus,
    NodeStatus,
    Error,
    Ack,
}

impl MessageKind {
    pub fn to_wire(self) -> u32 {
        match self {
            MessageKind::Register => 0,
            MessageKind::Heartbeat => 1,
            MessageKind::Deploy => 2,
            MessageKind::Start => 3,
            MessageKind::Stop => 4,
            MessageKind::Delete => 5,
            MessageKind::ContainerStatus => 6,
            MessageKind::NodeStatus => 7,
            MessageKind::Error => 8,
            MessageKind::Ack => 9,
        }
    }

    pub fn from_wire(v: u32) -> Option<Self> {
        Some(match v {
            0 => MessageKind::Register,
            1 => MessageKind::Heartbeat,
            2 => MessageKind::Deploy,
            3 => MessageKind::Start,
            4 => MessageKind::Stop,
            5 => MessageKind::Delete,
            6 => MessageKind::ContainerStatus,
            7 => MessageKind::NodeStatus,
            8 => MessageKind::Error,
            9 => MessageKind::Ack,
            _ => return None,
        })
    }
}

/// One wire message. `payload` is already bounded by [`DATA_CAPACITY`];
/// the constructor truncates silently, mirroring the send-side contract.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub kind: MessageKind,
    pub sender: String,
    pub recipient: String,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(kind: MessageKind, sender: &str, recipient: &str, mut payload: Vec<u8>) -> Self {
        payload.truncate(DATA_CAPACITY);
        Self {
            kind,
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            payload,
        }
    }

    // ── Tag-specific constructors ───────────────────────────────────

    pub fn register(sender: &str, recipient: &str, hostname: &str, ip: &str, port: u16) -> Self {
        let payload = format!("{hostname} {ip} {port}").into_bytes();
        Self::new(MessageKind::Register, sender, recipient, payload)
    }

    pub fn heartbeat(sender: &str, recipient: &str, sample: &ResourceSample) -> Self {
        Self::new(MessageKind::Heartbeat, sender, recipient, encode_sample(sample))
    }

    pub fn deploy(sender: &str, recipient: &str, spec: &ContainerSpec) -> Self {
        Self::new(MessageKind::Deploy, sender, recipient, encode_spec(spec))
    }

    pub fn start(sender: &str, recipient: &str, name: &str) -> Self {
        Self::new(MessageKind::Start, sender, recipient, name.as_bytes().to_vec())
    }

    pub fn stop(sender: &str, recipient: &str, name: &str) -> Self {
        Self::new(MessageKind::Stop, sender, recipient, name.as_bytes().to_vec())
    }

    pub fn delete(sender: &str, recipient: &str, name: &str) -> Self {
        Self::new(MessageKind::Delete, sender, recipient, name.as_bytes().to_vec())
    }

    pub fn container_status(sender: &str, recipient: &str, record: &ContainerRecord) -> Self {
        Self::new(
            MessageKind::ContainerStatus,
            sender,
            recipient,
            encode_container(record),
        )
    }

    pub fn ack(sender: &str, recipient: &str, text: &str) -> Self {
        Self::new(MessageKind::Ack, sender, recipient, text.as_bytes().to_vec())
    }

    pub fn error(sender: &str, recipient: &str, text: &str) -> Self {
        Self::new(MessageKind::Error, sender, recipient, text.as_bytes().to_vec())
    }

    /// Payload as text, for ACK/ERROR messages.
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    // ── Record encode/decode ────────────────────────────────────────

    /// Serialize into exactly one [`RECORD_SIZE`] record.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(RECORD_SIZE);
        buf.put_u32_ne(self.kind.to_wire());
        put_id_field(&mut buf, &self.sender);
        put_id_field(&mut buf, &self.recipient);
        buf.put_u32_ne(self.payload.len() as u32);
        buf.put_slice(&self.payload);
        buf.resize(RECORD_SIZE, 0);
        buf
    }

    /// Deserialize one full record.
    pub fn decode(record: &[u8; RECORD_SIZE]) -> Result<Self, ProtoError> {
        let mut buf = &record[..];

        let tag = buf.get_u32_ne();
        let kind = MessageKind::from_wire(tag).ok_or(ProtoError::UnknownKind(tag))?;

        let sender = get_id_field(&mut buf);
        let recipient = get_id_field(&mut buf);

        let declared = buf.get_u32_ne();
        if declared as usize > DATA_CAPACITY {
            return Err(ProtoError::Length(declared));
        }
        let payload = buf[..declared as usize].to_vec();

        Ok(Self {
            kind,
            sender,
            recipient,
            payload,
        })
    }
}

/// Write an id into its fixed field: at most `ID_FIELD_SIZE - 1` bytes of
/// content, NUL padding to the field boundary.
fn put_id_field(buf: &mut Vec<u8>, id: &str) {
    let bytes = id.as_bytes();
    let len = bytes.len().min(ID_FIELD_SIZE - 1);
    buf.put_slice(&bytes[..len]);
    buf.resize(buf.len() + (ID_FIELD_SIZE - len), 0);
}

/// Read a NUL-terminated id field, advancing past the whole field.
fn get_id_field(buf: &mut &[u8]) -> String {
    let field = &buf[..ID_FIELD_SIZE];
    let end = field.iter().position(|&b| b == 0).unwrap_or(ID_FIELD_SIZE);
    let id = String::from_utf8_lossy(&field[..end]).into_owned();
    buf.advance(ID_FIELD_SIZE);
    id
}
