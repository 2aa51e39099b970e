//! # TideKV
//!
//! An in-memory, authenticated key-value store with:
//! - Typed values (string / int / bool) under UTF-8 string keys
//! - An (a,b)-tree engine with logarithmic insert / remove / lookup
//! - Single-writer/multi-reader concurrency model
//! - A framed binary TCP protocol with request/response correlation
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      TCP Server                              │
//! │                  (Multiple Clients)                          │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ bytes
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                      Session                                 │
//! │      (FrameBuffer → Codec → correlation by packet id)        │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ packets
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                  Packet Dispatch                             │
//! │              (auth check + routing)                          │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!                       ▼
//!               ┌───────────────┐
//!               │     Store     │
//!               │   (RwLock)    │
//!               └───────┬───────┘
//!                       │
//!                       ▼
//!               ┌───────────────┐
//!               │   (a,b)-Tree  │
//!               └───────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod protocol;
pub mod tree;
pub mod store;
pub mod network;
pub mod client;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{Result, TideError};
pub use config::Config;
pub use client::Client;
pub use network::{Server, Session};
pub use protocol::{Packet, Value, ValueType};
pub use store::Store;
pub use tree::AbTree;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of TideKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
