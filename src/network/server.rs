//! TCP Server
//!
//! Accepts connections and dispatches them to worker threads for session
//! setup. Packets decoded by a session's polling thread are routed
//! through the auth check to the store, and the matching response kind is
//! sent back over the same session.

use std::collections::HashMap;
use std::net::{TcpListener, TcpStream};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::config::Config;
use crate::error::{Result, TideError};
use crate::protocol::{ErrorCode, Packet};
use crate::store::Store;

use super::Session;

/// Message sent to worker threads
enum WorkerMessage {
    /// New client connection to handle
    NewConnection(TcpStream),
    /// Signal to shutdown
    Shutdown,
}

/// Per-session record kept for as long as the transport is alive
struct SessionEntry {
    /// Whether an AuthRequest with the right key has been seen
    authenticated: bool,

    /// Lets shutdown reach sessions that run on their own polling threads
    handle: Weak<Session>,
}

/// State shared between the accept loop, the workers and every session's
/// packet dispatch
struct ServerState {
    /// Shared secret checked against AuthRequest payloads
    api_key: String,

    /// The concurrent store behind all sessions
    store: Arc<Store>,

    /// Live sessions by id, touched from every worker and the acceptor
    sessions: Mutex<HashMap<u64, SessionEntry>>,

    /// Session id source
    next_session_id: AtomicU64,

    /// Admitted connections, counted before setup and released on session
    /// end
    active_connections: AtomicUsize,

    /// Admission cap
    max_connections: usize,
}

impl ServerState {
    fn is_authenticated(&self, session_id: u64) -> bool {
        self.sessions
            .lock()
            .get(&session_id)
            .map(|entry| entry.authenticated)
            .unwrap_or(false)
    }

    fn set_authenticated(&self, session_id: u64) {
        if let Some(entry) = self.sessions.lock().get_mut(&session_id) {
            entry.authenticated = true;
        }
    }

    /// Claim a connection slot; the count moves before the session exists
    /// so a burst of accepts cannot overshoot the cap
    fn try_admit(&self) -> bool {
        self.active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |active| {
                (active < self.max_connections).then_some(active + 1)
            })
            .is_ok()
    }

    /// Hand back an admission slot without a session ever registering
    fn abandon_admission(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    /// Enter a fresh session into the table, unauthenticated
    fn register(&self, session: &Arc<Session>) -> u64 {
        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        self.sessions.lock().insert(
            session_id,
            SessionEntry {
                authenticated: false,
                handle: Arc::downgrade(session),
            },
        );
        session_id
    }

    /// Drop a session's record and free its admission slot
    fn release(&self, session_id: u64) {
        if self.sessions.lock().remove(&session_id).is_some() {
            self.active_connections.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// End every live session; returns how many were still up.
    ///
    /// The table lock is not held across `end()`, which re-enters
    /// `release` through the on_ended event.
    fn end_all_sessions(&self) -> usize {
        let live: Vec<Arc<Session>> = self
            .sessions
            .lock()
            .values()
            .filter_map(|entry| entry.handle.upgrade())
            .collect();

        let count = live.len();
        for session in live {
            session.end();
        }
        count
    }
}

/// TCP server for TideKV
///
/// ## Architecture
/// - Main thread accepts connections
/// - Worker thread pool sets sessions up; each session polls on its own
///   thread
/// - Shared store reference for all sessions
pub struct Server {
    /// Server configuration
    config: Config,

    /// Shared dispatch state
    state: Arc<ServerState>,

    /// TCP listener (created on bind)
    listener: Option<TcpListener>,

    /// Channel to send work to workers
    work_sender: Option<Sender<WorkerMessage>>,

    /// Worker thread handles
    workers: Vec<JoinHandle<()>>,

    /// Shutdown flag
    shutdown: Arc<AtomicBool>,
}

impl Server {
    /// Create a new server with the given config and store
    pub fn new(config: Config, store: Arc<Store>) -> Self {
        let state = Arc::new(ServerState {
            api_key: config.api_key.clone(),
            store,
            sessions: Mutex::new(HashMap::new()),
            next_session_id: AtomicU64::new(1),
            active_connections: AtomicUsize::new(0),
            max_connections: config.max_connections,
        });

        Self {
            config,
            state,
            listener: None,
            work_sender: None,
            workers: Vec::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the server (blocking): bind, then serve until shutdown
    pub fn run(&mut self) -> Result<()> {
        self.bind()?;
        self.serve()
    }

    /// Bind the configured address; after this `local_addr` is known
    pub fn bind(&mut self) -> Result<()> {
        let addr = self.config.listen_addr();
        let listener = TcpListener::bind(&addr)
            .map_err(|e| TideError::Network(format!("failed to bind to {}: {}", addr, e)))?;

        // non-blocking so the accept loop can check the shutdown flag
        listener.set_nonblocking(true)?;

        tracing::info!("server listening on {:?}", listener.local_addr().ok());
        self.listener = Some(listener);
        Ok(())
    }

    /// Serve connections until shutdown is signaled.
    ///
    /// 1. Spawns worker threads
    /// 2. Accepts connections in a loop
    /// 3. Ends live sessions and joins the workers once shutdown is
    ///    signaled
    pub fn serve(&mut self) -> Result<()> {
        if self.listener.is_none() {
            return Err(TideError::Network("serve called before bind".to_string()));
        }

        // session setup is cheap, so one worker per core is plenty; a cap
        // smaller than the core count needs no more workers than slots
        let num_workers = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
            .min(self.config.max_connections);

        let (sender, receiver) = bounded::<WorkerMessage>(self.config.max_connections);
        self.work_sender = Some(sender);

        tracing::info!("starting {} worker threads", num_workers);

        for worker_id in 0..num_workers {
            let worker = Worker {
                id: worker_id,
                receiver: receiver.clone(),
                state: Arc::clone(&self.state),
            };
            let handle = thread::Builder::new()
                .name(format!("tidekv-worker-{}", worker_id))
                .spawn(move || worker.run())
                .map_err(|e| TideError::Network(format!("failed to spawn worker: {}", e)))?;

            self.workers.push(handle);
        }

        self.accept_loop();
        self.cleanup();
        Ok(())
    }

    /// Accept until shutdown. Admission is claimed against the connection
    /// cap before a stream is handed to the pool; an idle listener backs
    /// off in growing steps instead of spinning at a fixed cadence.
    fn accept_loop(&self) {
        let listener = self.listener.as_ref().unwrap();
        let sender = self.work_sender.as_ref().unwrap();

        const IDLE_WAIT_FLOOR: Duration = Duration::from_millis(1);
        const IDLE_WAIT_CEILING: Duration = Duration::from_millis(50);
        let mut idle_wait = IDLE_WAIT_FLOOR;

        while self.is_running() {
            match listener.accept() {
                Ok((stream, remote)) => {
                    idle_wait = IDLE_WAIT_FLOOR;

                    if !self.state.try_admit() {
                        tracing::warn!(
                            %remote,
                            cap = self.state.max_connections,
                            "connection cap reached, turning connection away"
                        );
                        // dropping the stream closes it
                        continue;
                    }

                    tracing::debug!(%remote, "connection admitted");
                    if sender.send(WorkerMessage::NewConnection(stream)).is_err() {
                        self.state.abandon_admission();
                        tracing::error!(%remote, "worker pool unavailable, dropping connection");
                    }
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(idle_wait);
                    idle_wait = (idle_wait * 2).min(IDLE_WAIT_CEILING);
                }
                Err(e) => {
                    if self.is_running() {
                        tracing::error!("accept failed: {}", e);
                    }
                }
            }
        }
    }

    /// Drain the server: retire the setup pool, then end whatever
    /// sessions are still alive on their polling threads.
    fn cleanup(&mut self) {
        tracing::info!("draining server...");

        // taking the sender keeps any late accept from queueing work
        if let Some(sender) = self.work_sender.take() {
            for _ in 0..self.workers.len() {
                let _ = sender.send(WorkerMessage::Shutdown);
            }
        }
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::error!("worker thread panicked during shutdown");
            }
        }

        // sessions outlive their setup worker; they are ended through the
        // weak handles in the session table
        let ended = self.state.end_all_sessions();
        if ended > 0 {
            tracing::info!("ended {} live sessions", ended);
        }

        tracing::info!("server stopped");
    }

    /// Signal the server to shutdown gracefully
    pub fn shutdown(&self) {
        tracing::info!("shutdown signal received");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Check if the server is running
    pub fn is_running(&self) -> bool {
        !self.shutdown.load(Ordering::Relaxed)
    }

    /// Get the number of active connections
    pub fn active_connections(&self) -> usize {
        self.state.active_connections.load(Ordering::Relaxed)
    }

    /// Get the bound address (after a successful bind)
    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }
}

/// Worker thread that sets client sessions up
struct Worker {
    /// Worker ID for logging
    id: usize,

    /// Channel to receive work
    receiver: Receiver<WorkerMessage>,

    /// Shared dispatch state
    state: Arc<ServerState>,
}

impl Worker {
    fn run(self) {
        tracing::debug!("worker {} started", self.id);

        loop {
            match self.receiver.recv() {
                Ok(WorkerMessage::NewConnection(stream)) => {
                    self.handle_connection(stream);
                }
                Ok(WorkerMessage::Shutdown) => {
                    tracing::debug!("worker {} received shutdown signal", self.id);
                    break;
                }
                Err(_) => {
                    tracing::debug!("worker {} channel closed", self.id);
                    break;
                }
            }
        }

        tracing::debug!("worker {} stopped", self.id);
    }

    /// Set a session up and hand it off to its own polling thread.
    ///
    /// The worker only wires callbacks and registers the session; the
    /// session's polling thread carries the connection from then on, so a
    /// busy worker never caps the number of live sessions. The acceptor
    /// already counted this connection against the cap.
    fn handle_connection(&self, stream: TcpStream) {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        let session = match Session::new(stream) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("failed to create session for {}: {}", peer, e);
                self.state.abandon_admission();
                return;
            }
        };

        let session_id = self.state.register(&session);
        tracing::debug!(session_id, peer = %peer, "session opened");

        let dispatch_state = Arc::clone(&self.state);
        let dispatch_session = Arc::downgrade(&session);
        session.on_packet(move |packet| {
            if let Some(session) = dispatch_session.upgrade() {
                dispatch_packet(&dispatch_state, session_id, &session, &packet);
            }
        });

        let ended_state = Arc::clone(&self.state);
        session.on_ended(move |error| {
            ended_state.release(session_id);
            match error {
                Some(e) => tracing::debug!(session_id, "session closed: {}", e),
                None => tracing::debug!(session_id, "session closed"),
            }
        });

        if let Err(e) = session.start_polling() {
            tracing::error!(session_id, "failed to start session polling: {}", e);
            // runs the on_ended cleanup
            session.end();
        }
    }
}

/// Route one inbound packet: auth handling, store call, response
fn dispatch_packet(state: &ServerState, session_id: u64, session: &Session, packet: &Packet) {
    let response = match packet {
        Packet::AuthRequest { api_key, .. } => {
            if *api_key == state.api_key {
                state.set_authenticated(session_id);
                tracing::info!(session_id, "session authenticated");
                Packet::AuthResponse { id: 0, error: None }
            } else {
                tracing::warn!(session_id, "authentication rejected");
                Packet::AuthResponse {
                    id: 0,
                    error: Some(ErrorCode::AuthRequired),
                }
            }
        }

        Packet::DataRequest { .. }
        | Packet::DataAdditionRequest { .. }
        | Packet::DataRemovalRequest { .. } => {
            if !state.is_authenticated(session_id) {
                tracing::debug!(session_id, "request before authentication");
                match packet.failure_response(ErrorCode::AuthRequired) {
                    Some(response) => response,
                    None => return,
                }
            } else {
                execute_request(state, packet)
            }
        }

        // clients have no business sending response packets
        _ => {
            tracing::warn!(session_id, ?packet, "dropping unexpected packet kind");
            return;
        }
    };

    if let Err(e) = session.send_response(packet, response) {
        tracing::debug!(session_id, "failed to send response: {}", e);
    }
}

/// Run the store operation for a request packet and build its response.
///
/// A panicking engine signals a bug; it must not take down the worker, so
/// it is caught here and reported as an unexpected error.
fn execute_request(state: &ServerState, packet: &Packet) -> Packet {
    let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| match packet {
        Packet::DataRequest { key, .. } => match state.store.find(key) {
            Some(value) => Some(Packet::DataResponse {
                id: 0,
                outcome: Ok(value),
            }),
            None => packet.failure_response(ErrorCode::KeyNotFound),
        },
        Packet::DataAdditionRequest { key, value, .. } => {
            state.store.add(key.clone(), value.clone());
            packet.success_response()
        }
        Packet::DataRemovalRequest { key, .. } => {
            // removal of an absent key still succeeds
            state.store.remove(key);
            packet.success_response()
        }
        _ => None,
    }));

    match outcome {
        Ok(Some(response)) => response,
        Ok(None) => {
            tracing::error!("execute_request called with a non-request packet");
            Packet::DataResponse {
                id: 0,
                outcome: Err(ErrorCode::Unexpected),
            }
        }
        Err(_) => {
            tracing::error!("store operation panicked");
            packet
                .failure_response(ErrorCode::Unexpected)
                .unwrap_or(Packet::DataResponse {
                    id: 0,
                    outcome: Err(ErrorCode::Unexpected),
                })
        }
    }
}
