//! Packet definitions
//!
//! One variant per wire packet kind. Request kinds carry the client's
//! payload; response kinds carry a status and, on failure, an error code.

use super::Value;

/// Packet type tags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    AuthRequest = 0x01,
    AuthResponse = 0x02,
    DataRequest = 0x03,
    DataResponse = 0x04,
    DataAdditionRequest = 0x05,
    DataAdditionResponse = 0x06,
    DataRemovalRequest = 0x07,
    DataRemovalResponse = 0x08,
}

impl PacketType {
    /// Parse a wire tag; `None` for unknown tags
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(PacketType::AuthRequest),
            0x02 => Some(PacketType::AuthResponse),
            0x03 => Some(PacketType::DataRequest),
            0x04 => Some(PacketType::DataResponse),
            0x05 => Some(PacketType::DataAdditionRequest),
            0x06 => Some(PacketType::DataAdditionResponse),
            0x07 => Some(PacketType::DataRemovalRequest),
            0x08 => Some(PacketType::DataRemovalResponse),
            _ => None,
        }
    }
}

/// Response status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Success = 0x01,
    Failure = 0x02,
}

/// Error codes carried by failure responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorCode {
    AuthRequired = 0x01,
    KeyNotFound = 0x02,
    Unexpected = 0x03,
}

impl ErrorCode {
    /// Parse a wire error code
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(ErrorCode::AuthRequired),
            0x02 => Some(ErrorCode::KeyNotFound),
            0x03 => Some(ErrorCode::Unexpected),
            _ => None,
        }
    }
}

/// A parsed packet
///
/// Every packet carries its correlation id; id 0 is reserved for packets
/// that do not demand a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Authenticate the session with the shared API key
    AuthRequest { id: u32, api_key: String },

    /// Outcome of an authentication attempt
    AuthResponse { id: u32, error: Option<ErrorCode> },

    /// Look up a key
    DataRequest { id: u32, key: String },

    /// Outcome of a lookup; the value on success
    DataResponse {
        id: u32,
        outcome: std::result::Result<Value, ErrorCode>,
    },

    /// Insert or replace a key
    DataAdditionRequest { id: u32, key: String, value: Value },

    /// Outcome of an insertion
    DataAdditionResponse { id: u32, error: Option<ErrorCode> },

    /// Remove a key
    DataRemovalRequest { id: u32, key: String },

    /// Outcome of a removal
    DataRemovalResponse { id: u32, error: Option<ErrorCode> },
}

impl Packet {
    /// Get the wire tag for this packet
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::AuthRequest { .. } => PacketType::AuthRequest,
            Packet::AuthResponse { .. } => PacketType::AuthResponse,
            Packet::DataRequest { .. } => PacketType::DataRequest,
            Packet::DataResponse { .. } => PacketType::DataResponse,
            Packet::DataAdditionRequest { .. } => PacketType::DataAdditionRequest,
            Packet::DataAdditionResponse { .. } => PacketType::DataAdditionResponse,
            Packet::DataRemovalRequest { .. } => PacketType::DataRemovalRequest,
            Packet::DataRemovalResponse { .. } => PacketType::DataRemovalResponse,
        }
    }

    /// Correlation id
    pub fn id(&self) -> u32 {
        match self {
            Packet::AuthRequest { id, .. }
            | Packet::AuthResponse { id, .. }
            | Packet::DataRequest { id, .. }
            | Packet::DataResponse { id, .. }
            | Packet::DataAdditionRequest { id, .. }
            | Packet::DataAdditionResponse { id, .. }
            | Packet::DataRemovalRequest { id, .. }
            | Packet::DataRemovalResponse { id, .. } => *id,
        }
    }

    /// Overwrite the correlation id (used when allocating request ids and
    /// when mirroring a request id into its response)
    pub fn set_id(&mut self, new_id: u32) {
        match self {
            Packet::AuthRequest { id, .. }
            | Packet::AuthResponse { id, .. }
            | Packet::DataRequest { id, .. }
            | Packet::DataResponse { id, .. }
            | Packet::DataAdditionRequest { id, .. }
            | Packet::DataAdditionResponse { id, .. }
            | Packet::DataRemovalRequest { id, .. }
            | Packet::DataRemovalResponse { id, .. } => *id = new_id,
        }
    }

    /// Whether this packet kind is a response to some request
    pub fn is_response(&self) -> bool {
        matches!(
            self,
            Packet::AuthResponse { .. }
                | Packet::DataResponse { .. }
                | Packet::DataAdditionResponse { .. }
                | Packet::DataRemovalResponse { .. }
        )
    }

    /// Build the successful response for a request packet; `None` when the
    /// packet is itself a response
    pub fn success_response(&self) -> Option<Packet> {
        match self {
            Packet::AuthRequest { .. } => Some(Packet::AuthResponse { id: 0, error: None }),
            Packet::DataAdditionRequest { .. } => {
                Some(Packet::DataAdditionResponse { id: 0, error: None })
            }
            Packet::DataRemovalRequest { .. } => {
                Some(Packet::DataRemovalResponse { id: 0, error: None })
            }
            // DataRequest success needs the value; build it explicitly
            _ => None,
        }
    }

    /// Build the failure response matching a request packet's kind
    pub fn failure_response(&self, code: ErrorCode) -> Option<Packet> {
        match self {
            Packet::AuthRequest { .. } => Some(Packet::AuthResponse {
                id: 0,
                error: Some(code),
            }),
            Packet::DataRequest { .. } => Some(Packet::DataResponse {
                id: 0,
                outcome: Err(code),
            }),
            Packet::DataAdditionRequest { .. } => Some(Packet::DataAdditionResponse {
                id: 0,
                error: Some(code),
            }),
            Packet::DataRemovalRequest { .. } => Some(Packet::DataRemovalResponse {
                id: 0,
                error: Some(code),
            }),
            _ => None,
        }
    }
}
