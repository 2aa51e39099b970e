//! Session multiplexer
//!
//! Wraps one transport connection. Outbound packets are either
//! fire-and-forget (`send_packet`, `send_response`) or request/await
//! (`send_request`), which allocates a fresh correlation id and hands back
//! a completion the caller can block on. A polling thread drains the
//! transport in fixed-size chunks through the framing buffer, decodes
//! packets as they complete, resolves in-flight requests by id and then
//! fires the packet event.
//!
//! ## Lifecycle
//! `start_polling` must be called before any response can complete.
//! `end` is idempotent: it closes the transport, fails every pending
//! completion with session-ended and fires `on_ended` exactly once.
//! A malformed packet is logged and dropped; it does not end the session.

use std::collections::HashMap;
use std::io::Read;
use std::io::Write;
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::error::{Result, TideError};
use crate::protocol::{
    decode_header, decode_packet, encode_packet, FrameBuffer, Packet, PacketHeader, HEADER_SIZE,
    NO_RESPONSE_ID,
};

/// Transport reads are bounded by this chunk size
pub const READ_CHUNK_SIZE: usize = 1024;

/// Ceiling on buffered-but-undecoded bytes; overflowing it ends the
/// session with a protocol error
pub const MAX_BUFFER_BYTES: usize = 64 * 1024 * 1024;

type PacketCallback = Arc<dyn Fn(Packet) + Send + Sync>;
type EndedCallback = Arc<dyn Fn(Option<&TideError>) + Send + Sync>;

/// A live protocol session over one transport connection
pub struct Session {
    /// Write half; also the handle used to shut the socket down
    writer: Mutex<TcpStream>,

    /// Read half, taken by `start_polling`
    reader: Mutex<Option<TcpStream>>,

    /// Requests awaiting their response, keyed by packet id
    in_flight: Mutex<HashMap<u32, Sender<Packet>>>,

    /// Monotonic id source; 0 is reserved and skipped on wrap
    next_request_id: AtomicU32,

    /// Set once, by whichever side ends the session first
    ended: AtomicBool,

    /// Count of malformed inbound packets (dropped, not fatal)
    decode_errors: AtomicUsize,

    on_packet: Mutex<Option<PacketCallback>>,
    on_ended: Mutex<Option<EndedCallback>>,

    poll_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Wrap an established connection
    pub fn new(stream: TcpStream) -> Result<Arc<Self>> {
        // immediate sends; request/response traffic is latency-bound
        let _ = stream.set_nodelay(true);
        let reader = stream.try_clone()?;

        Ok(Arc::new(Session {
            writer: Mutex::new(stream),
            reader: Mutex::new(Some(reader)),
            in_flight: Mutex::new(HashMap::new()),
            next_request_id: AtomicU32::new(0),
            ended: AtomicBool::new(false),
            decode_errors: AtomicUsize::new(0),
            on_packet: Mutex::new(None),
            on_ended: Mutex::new(None),
            poll_thread: Mutex::new(None),
        }))
    }

    /// Connect to a remote endpoint and wrap the connection
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Arc<Self>> {
        let stream = TcpStream::connect(addr)?;
        Session::new(stream)
    }

    /// Whether the session has ended
    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    /// Number of malformed inbound packets dropped so far
    pub fn decode_errors(&self) -> usize {
        self.decode_errors.load(Ordering::Relaxed)
    }

    // -------------------------------------------------------------------------
    // Event registration
    // -------------------------------------------------------------------------

    /// Register the packet event, fired for every inbound packet. For a
    /// response packet the matching completion is resolved first.
    pub fn on_packet(&self, callback: impl Fn(Packet) + Send + Sync + 'static) {
        *self.on_packet.lock() = Some(Arc::new(callback));
    }

    /// Register the termination event, fired exactly once
    pub fn on_ended(&self, callback: impl Fn(Option<&TideError>) + Send + Sync + 'static) {
        *self.on_ended.lock() = Some(Arc::new(callback));
    }

    // -------------------------------------------------------------------------
    // Sending
    // -------------------------------------------------------------------------

    /// Encode and transmit a packet without waiting for anything
    pub fn send_packet(&self, packet: &Packet) -> Result<()> {
        if self.is_ended() {
            return Err(TideError::SessionEnded);
        }

        let bytes = encode_packet(packet);
        let mut writer = self.writer.lock();
        writer.write_all(&bytes)?;
        writer.flush()?;
        Ok(())
    }

    /// Transmit `response` as the answer to `request`, mirroring its id
    pub fn send_response(&self, request: &Packet, mut response: Packet) -> Result<()> {
        response.set_id(request.id());
        self.send_packet(&response)
    }

    /// Allocate a fresh id, register a completion under it, transmit the
    /// packet and hand back the completion.
    ///
    /// The handle resolves when a response with the same id arrives, or
    /// fails if the session ends first. The id leaves the in-flight table
    /// on every exit path.
    pub fn send_request(self: &Arc<Self>, mut packet: Packet) -> Result<ResponseHandle> {
        if self.is_ended() {
            return Err(TideError::SessionEnded);
        }

        let id = self.allocate_request_id();
        let (tx, rx) = bounded(1);
        {
            let mut in_flight = self.in_flight.lock();
            if in_flight.contains_key(&id) {
                return Err(TideError::RequestIdCollision(id));
            }
            in_flight.insert(id, tx);
        }

        packet.set_id(id);
        if let Err(e) = self.send_packet(&packet) {
            self.in_flight.lock().remove(&id);
            return Err(e);
        }

        Ok(ResponseHandle {
            id,
            receiver: rx,
            session: Arc::downgrade(self),
        })
    }

    fn allocate_request_id(&self) -> u32 {
        loop {
            let id = self
                .next_request_id
                .fetch_add(1, Ordering::Relaxed)
                .wrapping_add(1);
            if id != NO_RESPONSE_ID {
                return id;
            }
        }
    }

    // -------------------------------------------------------------------------
    // Polling
    // -------------------------------------------------------------------------

    /// Spawn the polling thread that consumes the transport.
    ///
    /// Must be called before any `send_request` completion can resolve.
    /// Fails when polling was already started.
    pub fn start_polling(self: &Arc<Self>) -> Result<()> {
        let reader = self
            .reader
            .lock()
            .take()
            .ok_or_else(|| TideError::Network("session polling already started".to_string()))?;

        let session = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("tidekv-session".to_string())
            .spawn(move || session.poll_loop(reader))
            .map_err(|e| TideError::Network(format!("failed to spawn session poller: {}", e)))?;

        *self.poll_thread.lock() = Some(handle);
        Ok(())
    }

    /// Block until the session has ended and its polling thread is gone
    pub fn wait_ended(&self) {
        let handle = self.poll_thread.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    fn poll_loop(self: Arc<Self>, mut reader: TcpStream) {
        let mut buffer = FrameBuffer::new();
        let mut pending_header: Option<PacketHeader> = None;
        let mut chunk = [0u8; READ_CHUNK_SIZE];

        let outcome = loop {
            if self.is_ended() {
                break None;
            }

            match reader.read(&mut chunk) {
                // peer closed the stream
                Ok(0) => break None,
                Ok(n) => {
                    buffer.append(chunk[..n].to_vec());
                    if buffer.len() > MAX_BUFFER_BYTES {
                        break Some(TideError::Network(format!(
                            "framing buffer exceeded {} bytes",
                            MAX_BUFFER_BYTES
                        )));
                    }
                    self.drain_buffer(&mut buffer, &mut pending_header);
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    if self.is_ended() {
                        // the read was woken by our own shutdown
                        break None;
                    }
                    break Some(TideError::Io(e));
                }
            }
        };

        self.end_with(outcome);
    }

    /// Decode as many packets as the buffered bytes allow
    fn drain_buffer(&self, buffer: &mut FrameBuffer, pending_header: &mut Option<PacketHeader>) {
        loop {
            if pending_header.is_none() && buffer.len() >= HEADER_SIZE {
                match buffer
                    .remove_first(HEADER_SIZE)
                    .and_then(|bytes| decode_header(&bytes))
                {
                    Ok(header) => *pending_header = Some(header),
                    Err(e) => {
                        self.note_decode_error(&e);
                        continue;
                    }
                }
            }

            match *pending_header {
                Some(header) if buffer.len() >= header.payload_len as usize => {
                    let payload = if header.payload_len == 0 {
                        Vec::new()
                    } else {
                        match buffer.remove_first(header.payload_len as usize) {
                            Ok(bytes) => bytes,
                            Err(e) => {
                                // unreachable given the length check above
                                *pending_header = None;
                                self.note_decode_error(&e);
                                continue;
                            }
                        }
                    };
                    *pending_header = None;

                    match decode_packet(&header, &payload) {
                        Ok(packet) => self.handle_packet(packet),
                        Err(e) => self.note_decode_error(&e),
                    }
                }
                _ => break,
            }
        }
    }

    fn note_decode_error(&self, error: &TideError) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(error = %error, "dropping malformed packet");
    }

    /// Resolve a response's completion, then fire the packet event
    fn handle_packet(&self, packet: Packet) {
        if packet.is_response() && packet.id() != NO_RESPONSE_ID {
            let completion = self.in_flight.lock().remove(&packet.id());
            match completion {
                Some(tx) => {
                    // the waiter observes completion before any listener
                    // hears about the packet
                    let _ = tx.send(packet.clone());
                }
                None => {
                    tracing::warn!(id = packet.id(), "response with no in-flight request");
                    return;
                }
            }
        }

        let callback = self.on_packet.lock().clone();
        if let Some(callback) = callback {
            callback(packet);
        }
    }

    // -------------------------------------------------------------------------
    // Termination
    // -------------------------------------------------------------------------

    /// End the session: close the transport and fail everything pending.
    /// Safe to call more than once.
    pub fn end(&self) {
        self.end_with(None);
    }

    fn end_with(&self, error: Option<TideError>) {
        if self.ended.swap(true, Ordering::AcqRel) {
            return;
        }

        match &error {
            Some(e) => tracing::debug!(error = %e, "session ended"),
            None => tracing::debug!("session ended"),
        }

        let _ = self.writer.lock().shutdown(Shutdown::Both);

        // dropping the completions wakes every pending waiter with
        // session-ended
        self.in_flight.lock().clear();

        let callback = self.on_ended.lock().clone();
        if let Some(callback) = callback {
            callback(error.as_ref());
        }
    }
}

/// Completion handle returned by [`Session::send_request`]
pub struct ResponseHandle {
    id: u32,
    receiver: Receiver<Packet>,
    session: Weak<Session>,
}

impl ResponseHandle {
    /// The id the request was sent under
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Block until the response arrives or the session ends
    pub fn wait(self) -> Result<Packet> {
        self.receiver.recv().map_err(|_| TideError::SessionEnded)
    }

    /// Like [`wait`](Self::wait), but give up after `timeout`
    pub fn wait_timeout(self, timeout: Duration) -> Result<Packet> {
        match self.receiver.recv_timeout(timeout) {
            Ok(packet) => Ok(packet),
            Err(RecvTimeoutError::Disconnected) => Err(TideError::SessionEnded),
            Err(RecvTimeoutError::Timeout) => {
                if let Some(session) = self.session.upgrade() {
                    session.in_flight.lock().remove(&self.id);
                }
                Err(TideError::RequestTimeout(timeout))
            }
        }
    }
}
