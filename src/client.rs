//! Client library
//!
//! A thin, blocking wrapper over the session multiplexer: connect and
//! authenticate once, then issue add / find / remove calls that each send
//! a request packet and wait for its correlated response.

use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Result, TideError};
use crate::network::Session;
use crate::protocol::{ErrorCode, Packet, Value};

/// Default bound on how long a single request may wait for its response
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// An authenticated connection to a TideKV server
pub struct Client {
    session: Arc<Session>,
    request_timeout: Duration,
}

impl Client {
    /// Connect, start polling and authenticate with the shared API key.
    ///
    /// Fails with [`TideError::AuthRejected`] when the server refuses the
    /// key, or with the underlying transport error.
    pub fn connect<A: ToSocketAddrs>(addr: A, api_key: &str) -> Result<Self> {
        Self::connect_with_timeout(addr, api_key, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Like [`connect`](Self::connect) with an explicit per-request wait
    pub fn connect_with_timeout<A: ToSocketAddrs>(
        addr: A,
        api_key: &str,
        request_timeout: Duration,
    ) -> Result<Self> {
        let session = Session::connect(addr)?;
        session.start_polling()?;

        let client = Client {
            session,
            request_timeout,
        };
        client.authenticate(api_key)?;
        Ok(client)
    }

    fn authenticate(&self, api_key: &str) -> Result<()> {
        let response = self.exchange(Packet::AuthRequest {
            id: 0,
            api_key: api_key.to_string(),
        })?;

        match response {
            Packet::AuthResponse { error: None, .. } => Ok(()),
            Packet::AuthResponse { error: Some(_), .. } => Err(TideError::AuthRejected),
            other => Err(unexpected(&other)),
        }
    }

    /// Insert or replace a key
    pub fn add(&self, key: &str, value: Value) -> Result<()> {
        let response = self.exchange(Packet::DataAdditionRequest {
            id: 0,
            key: key.to_string(),
            value,
        })?;

        match response {
            Packet::DataAdditionResponse { error: None, .. } => Ok(()),
            Packet::DataAdditionResponse {
                error: Some(code), ..
            } => Err(error_code_to_error(code)),
            other => Err(unexpected(&other)),
        }
    }

    /// Look up a key; an absent key is `Ok(None)`
    pub fn find(&self, key: &str) -> Result<Option<Value>> {
        let response = self.exchange(Packet::DataRequest {
            id: 0,
            key: key.to_string(),
        })?;

        match response {
            Packet::DataResponse {
                outcome: Ok(value), ..
            } => Ok(Some(value)),
            Packet::DataResponse {
                outcome: Err(ErrorCode::KeyNotFound),
                ..
            } => Ok(None),
            Packet::DataResponse {
                outcome: Err(code), ..
            } => Err(error_code_to_error(code)),
            other => Err(unexpected(&other)),
        }
    }

    /// Remove a key; succeeds whether or not it was present
    pub fn remove(&self, key: &str) -> Result<()> {
        let response = self.exchange(Packet::DataRemovalRequest {
            id: 0,
            key: key.to_string(),
        })?;

        match response {
            Packet::DataRemovalResponse { error: None, .. } => Ok(()),
            Packet::DataRemovalResponse {
                error: Some(code), ..
            } => Err(error_code_to_error(code)),
            other => Err(unexpected(&other)),
        }
    }

    /// End the underlying session
    pub fn close(&self) {
        self.session.end();
    }

    fn exchange(&self, request: Packet) -> Result<Packet> {
        let handle = self.session.send_request(request)?;
        handle.wait_timeout(self.request_timeout)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.session.end();
    }
}

fn error_code_to_error(code: ErrorCode) -> TideError {
    match code {
        ErrorCode::AuthRequired => TideError::AuthRequired,
        ErrorCode::KeyNotFound => TideError::KeyNotFound,
        ErrorCode::Unexpected => TideError::ServerError,
    }
}

fn unexpected(packet: &Packet) -> TideError {
    TideError::UnexpectedResponse(format!("{:?}", packet.packet_type()))
}
