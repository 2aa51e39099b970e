//! Network Module
//!
//! TCP server and session handling.
//!
//! ## Architecture
//! - Single acceptor thread
//! - Worker thread pool performs session setup
//! - Each session runs its own polling thread; packets are routed
//!   through the server's dispatch into the store

mod server;
mod session;

pub use server::Server;
pub use session::{ResponseHandle, Session, MAX_BUFFER_BYTES, READ_CHUNK_SIZE};
