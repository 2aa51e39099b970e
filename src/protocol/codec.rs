//! Protocol codec
//!
//! Encoding and decoding functions for the wire protocol.
//!
//! ## Wire Format
//!
//! Every packet starts with a fixed 10-byte header; all multi-byte fields
//! are big-endian:
//!
//! ```text
//! ┌─────────────┬──────────────┬──────────┬──────────────────┬─────────┐
//! │ Version (1) │ Packet id (4)│ Type (1) │ Payload len (4)  │ Payload │
//! └─────────────┴──────────────┴──────────┴──────────────────┴─────────┘
//! ```
//!
//! ### Payload by Packet Type
//! - AuthRequest (0x01):          key string (UTF-8, whole payload)
//! - AuthResponse (0x02):         status; on failure + error code
//! - DataRequest (0x03):          key string (UTF-8, whole payload)
//! - DataResponse (0x04):         status; on success + value type + value
//!                                bytes, on failure + error code
//! - DataAdditionRequest (0x05):  key_len (4) + key + value type (1) + value
//! - DataAdditionResponse (0x06): status; on failure + error code
//! - DataRemovalRequest (0x07):   key string (UTF-8, whole payload)
//! - DataRemovalResponse (0x08):  status; on failure + error code

use crate::error::{Result, TideError};

use super::{ErrorCode, Packet, PacketType, Status, Value, ValueType};

/// Header size: version (1) + packet id (4) + type (1) + payload length (4)
pub const HEADER_SIZE: usize = 10;

/// The only protocol version this codec speaks
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Packet id reserved for packets that do not demand a response
pub const NO_RESPONSE_ID: u32 = 0;

/// Maximum payload size (16 MB)
pub const MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

/// Decoded wire header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Correlation id
    pub id: u32,

    /// Packet type tag
    pub packet_type: PacketType,

    /// Payload length in bytes
    pub payload_len: u32,
}

// =============================================================================
// Encoding
// =============================================================================

/// Encode a packet to wire bytes: header followed by payload
pub fn encode_packet(packet: &Packet) -> Vec<u8> {
    let payload = encode_payload(packet);

    let mut message = Vec::with_capacity(HEADER_SIZE + payload.len());
    message.push(PROTOCOL_VERSION);
    message.extend_from_slice(&packet.id().to_be_bytes());
    message.push(packet.packet_type() as u8);
    message.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    message.extend_from_slice(&payload);

    message
}

fn encode_payload(packet: &Packet) -> Vec<u8> {
    match packet {
        Packet::AuthRequest { api_key, .. } => api_key.as_bytes().to_vec(),

        Packet::DataRequest { key, .. } | Packet::DataRemovalRequest { key, .. } => {
            key.as_bytes().to_vec()
        }

        Packet::DataAdditionRequest { key, value, .. } => {
            let value_bytes = value.encode_bytes();
            let mut payload = Vec::with_capacity(4 + key.len() + 1 + value_bytes.len());
            payload.extend_from_slice(&(key.len() as u32).to_be_bytes());
            payload.extend_from_slice(key.as_bytes());
            payload.push(value.value_type() as u8);
            payload.extend_from_slice(&value_bytes);
            payload
        }

        Packet::AuthResponse { error, .. }
        | Packet::DataAdditionResponse { error, .. }
        | Packet::DataRemovalResponse { error, .. } => encode_status(*error),

        Packet::DataResponse { outcome, .. } => match outcome {
            Ok(value) => {
                let value_bytes = value.encode_bytes();
                let mut payload = Vec::with_capacity(2 + value_bytes.len());
                payload.push(Status::Success as u8);
                payload.push(value.value_type() as u8);
                payload.extend_from_slice(&value_bytes);
                payload
            }
            Err(code) => encode_status(Some(*code)),
        },
    }
}

fn encode_status(error: Option<ErrorCode>) -> Vec<u8> {
    match error {
        None => vec![Status::Success as u8],
        Some(code) => vec![Status::Failure as u8, code as u8],
    }
}

// =============================================================================
// Decoding
// =============================================================================

/// Decode a 10-byte wire header
///
/// Fails on short input, a version mismatch, an unknown packet-type tag,
/// or an implausible payload length.
pub fn decode_header(bytes: &[u8]) -> Result<PacketHeader> {
    if bytes.len() < HEADER_SIZE {
        return Err(TideError::MalformedPacket(format!(
            "incomplete header: expected {} bytes, got {}",
            HEADER_SIZE,
            bytes.len()
        )));
    }

    let version = bytes[0];
    if version != PROTOCOL_VERSION {
        return Err(TideError::UnsupportedVersion(version));
    }

    let id = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);

    let packet_type =
        PacketType::from_byte(bytes[5]).ok_or(TideError::UnknownPacketType(bytes[5]))?;

    let payload_len = u32::from_be_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]);
    if payload_len > MAX_PAYLOAD_SIZE {
        return Err(TideError::MalformedPacket(format!(
            "payload too large: {} bytes (max {})",
            payload_len, MAX_PAYLOAD_SIZE
        )));
    }

    Ok(PacketHeader {
        id,
        packet_type,
        payload_len,
    })
}

/// Build a typed packet from a decoded header and its payload bytes
pub fn decode_packet(header: &PacketHeader, payload: &[u8]) -> Result<Packet> {
    if payload.len() != header.payload_len as usize {
        return Err(TideError::MalformedPacket(format!(
            "payload length mismatch: header says {}, got {}",
            header.payload_len,
            payload.len()
        )));
    }

    let id = header.id;
    match header.packet_type {
        PacketType::AuthRequest => Ok(Packet::AuthRequest {
            id,
            api_key: decode_key(payload)?,
        }),
        PacketType::AuthResponse => Ok(Packet::AuthResponse {
            id,
            error: decode_status(payload)?,
        }),
        PacketType::DataRequest => Ok(Packet::DataRequest {
            id,
            key: decode_key(payload)?,
        }),
        PacketType::DataResponse => decode_data_response(id, payload),
        PacketType::DataAdditionRequest => decode_data_addition_request(id, payload),
        PacketType::DataAdditionResponse => Ok(Packet::DataAdditionResponse {
            id,
            error: decode_status(payload)?,
        }),
        PacketType::DataRemovalRequest => Ok(Packet::DataRemovalRequest {
            id,
            key: decode_key(payload)?,
        }),
        PacketType::DataRemovalResponse => Ok(Packet::DataRemovalResponse {
            id,
            error: decode_status(payload)?,
        }),
    }
}

/// Decode a whole-payload UTF-8 key
fn decode_key(payload: &[u8]) -> Result<String> {
    let key = std::str::from_utf8(payload)
        .map_err(|_| TideError::MalformedPacket("key is not valid UTF-8".to_string()))?;
    Ok(key.to_string())
}

/// Decode a status-only payload: success, or failure plus an error code
///
/// Any status byte other than Success counts as a failure.
fn decode_status(payload: &[u8]) -> Result<Option<ErrorCode>> {
    let (&status, rest) = payload.split_first().ok_or_else(|| {
        TideError::MalformedPacket("response payload missing status byte".to_string())
    })?;

    if status == Status::Success as u8 {
        if !rest.is_empty() {
            return Err(TideError::MalformedPacket(format!(
                "success response carries {} trailing bytes",
                rest.len()
            )));
        }
        return Ok(None);
    }

    match rest {
        [code] => {
            let code = ErrorCode::from_byte(*code).ok_or_else(|| {
                TideError::MalformedPacket(format!("unknown error code: 0x{:02x}", code))
            })?;
            Ok(Some(code))
        }
        _ => Err(TideError::MalformedPacket(
            "failure response must carry exactly one error-code byte".to_string(),
        )),
    }
}

fn decode_data_response(id: u32, payload: &[u8]) -> Result<Packet> {
    let (&status, rest) = payload.split_first().ok_or_else(|| {
        TideError::MalformedPacket("response payload missing status byte".to_string())
    })?;

    if status == Status::Success as u8 {
        let (&type_byte, value_bytes) = rest.split_first().ok_or_else(|| {
            TideError::MalformedPacket("data response missing value type".to_string())
        })?;
        let value_type = ValueType::from_byte(type_byte)?;
        let value = Value::decode_bytes(value_type, value_bytes)?;
        return Ok(Packet::DataResponse {
            id,
            outcome: Ok(value),
        });
    }

    match rest {
        [code] => {
            let code = ErrorCode::from_byte(*code).ok_or_else(|| {
                TideError::MalformedPacket(format!("unknown error code: 0x{:02x}", code))
            })?;
            Ok(Packet::DataResponse {
                id,
                outcome: Err(code),
            })
        }
        _ => Err(TideError::MalformedPacket(
            "failure response must carry exactly one error-code byte".to_string(),
        )),
    }
}

fn decode_data_addition_request(id: u32, payload: &[u8]) -> Result<Packet> {
    if payload.len() < 4 {
        return Err(TideError::MalformedPacket(
            "addition request missing key length".to_string(),
        ));
    }

    let key_len = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
    if payload.len() < 4 + key_len + 1 {
        return Err(TideError::MalformedPacket(format!(
            "addition request truncated: key length {} exceeds payload",
            key_len
        )));
    }

    let key = std::str::from_utf8(&payload[4..4 + key_len])
        .map_err(|_| TideError::MalformedPacket("key is not valid UTF-8".to_string()))?
        .to_string();

    let value_type = ValueType::from_byte(payload[4 + key_len])?;
    let value = Value::decode_bytes(value_type, &payload[4 + key_len + 1..])?;

    Ok(Packet::DataAdditionRequest { id, key, value })
}
