//! Wire messages exchanged between Host and Client.
//!
//! Each message travels as one frame: a 4-byte little-endian payload length
//! followed by the bincode encoding of [`Message`]. Every update is a full
//! snapshot, so there is no sequencing and no acknowledgement.

use crate::{Direction, EnemyKind, NetworkId};
use serde::{Deserialize, Serialize};

/// Size of the length prefix in front of every payload.
pub const FRAME_HEADER_LEN: usize = 4;
/// Payloads above this size mean the stream is out of sync.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("failed to encode message: {0}")]
    Encode(#[source] bincode::Error),
    #[error("malformed payload: {0}")]
    Decode(#[source] bincode::Error),
    #[error("payload of {0} bytes exceeds the {MAX_FRAME_LEN} byte limit")]
    Oversized(usize),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Host -> Client, once per accepted connection.
    AssignIdentity { id: NetworkId },
    /// Client -> Host at the broadcast cadence.
    ClientUpdate(ClientUpdate),
    /// Host -> Client at the broadcast cadence.
    ServerUpdate(ServerUpdate),
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::AssignIdentity { .. } => "AssignIdentity",
            Message::ClientUpdate(_) => "ClientUpdate",
            Message::ServerUpdate(_) => "ServerUpdate",
        }
    }
}

/// Client intent and observed state. The Host reads `is_moving` + `direction`
/// as held movement keys and a rising `attacking` as an attack request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientUpdate {
    pub player_id: NetworkId,
    pub x: f32,
    pub y: f32,
    pub direction: Direction,
    pub attacking: bool,
    pub is_moving: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub x: f32,
    pub y: f32,
    pub direction: Direction,
    pub attacking: bool,
    pub health: i32,
    pub is_moving: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnemySnapshot {
    pub id: NetworkId,
    pub x: f32,
    pub y: f32,
    pub alive: bool,
    pub kind: EnemyKind,
    pub direction: Direction,
    pub chasing: bool,
}

/// Full world snapshot: both player slots and every living enemy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerUpdate {
    pub p0: PlayerSnapshot,
    /// `None` while no Client has joined.
    pub p1: Option<PlayerSnapshot>,
    pub enemies: Vec<EnemySnapshot>,
}

/// Serializes `message` into a length-prefixed frame.
pub fn encode_frame(message: &Message) -> Result<Vec<u8>, ProtocolError> {
    let payload = bincode::serialize(message).map_err(ProtocolError::Encode)?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::Oversized(payload.len()));
    }

    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Reads the payload length out of a frame header.
pub fn decode_header(header: [u8; FRAME_HEADER_LEN]) -> Result<usize, ProtocolError> {
    let len = u32::from_le_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::Oversized(len));
    }
    Ok(len)
}

/// Decodes a payload (without its header).
pub fn decode_payload(payload: &[u8]) -> Result<Message, ProtocolError> {
    bincode::deserialize(payload).map_err(ProtocolError::Decode)
}
