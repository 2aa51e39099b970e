//! Protocol Module
//!
//! Defines the wire protocol for client-server communication.
//!
//! ## Protocol Format (V1 - Framed Binary)
//!
//! ```text
//! ┌─────────────┬──────────────┬──────────┬──────────────────┬─────────┐
//! │ Version (1) │ Packet id (4)│ Type (1) │ Payload len (4)  │ Payload │
//! └─────────────┴──────────────┴──────────┴──────────────────┴─────────┘
//! ```
//!
//! ### Packet Types
//! - 0x01: AuthRequest          - Payload: API key (UTF-8)
//! - 0x02: AuthResponse         - Payload: status [+ error code]
//! - 0x03: DataRequest          - Payload: key (UTF-8)
//! - 0x04: DataResponse         - Payload: status + value type + value
//!                                [or error code]
//! - 0x05: DataAdditionRequest  - Payload: key_len (4) + key + value type
//!                                + value
//! - 0x06: DataAdditionResponse - Payload: status [+ error code]
//! - 0x07: DataRemovalRequest   - Payload: key (UTF-8)
//! - 0x08: DataRemovalResponse  - Payload: status [+ error code]
//!
//! ### Status Codes
//! - 0x01: Success
//! - 0x02: Failure (followed by an error code)
//!
//! ### Error Codes
//! - 0x01: AuthRequired
//! - 0x02: KeyNotFound
//! - 0x03: Unexpected
//!
//! Framing is self-delimiting via the header's payload length; the
//! `FrameBuffer` reassembles packets from arbitrarily chunked reads.
//! Packet id 0 is reserved for packets that do not demand a response.

mod codec;
mod framing;
mod packet;
mod value;

pub use codec::{
    decode_header, decode_packet, encode_packet, PacketHeader, HEADER_SIZE, MAX_PAYLOAD_SIZE,
    NO_RESPONSE_ID, PROTOCOL_VERSION,
};
pub use framing::FrameBuffer;
pub use packet::{ErrorCode, Packet, PacketType, Status};
pub use value::{Value, ValueType};
