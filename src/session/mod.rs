//! Connection lifecycle for a single outbound peer.
//!
//! A [`Session`] owns up to two threads while connected:
//!
//! - the connection loop, which opens the transport, performs the
//!   `version`/`verack` handshake, and reconnects with capped linear backoff;
//! - the reader, which reassembles inbound bytes and dispatches payloads.
//!
//! Outbound messages may be sent from any thread; a single write lock keeps
//! frames from interleaving.
//!
//! Protocol reference:
//! https://developer.bitcoin.org/reference/p2p_networking.html#version

mod dispatch;
mod inventory;
mod pending;
mod signal;
mod state;

use std::net::SocketAddr;
use std::slice;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, unbounded};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::{NetworkSettings, SessionConfig};
use crate::error::NodeError;
use crate::transport::{TcpTransport, Transport};
use crate::wire::codec::encode_frames;
use crate::wire::message::{InvEntry, InvType, Payload, VersionMessage};

pub use inventory::BlockInventory;
pub use pending::PendingGetData;
pub use state::{Backoff, ConnectionState};

use inventory::BlockBatch;
use signal::{Fulfill, Wait};

type TxInventoryFn = dyn Fn(Vec<InvEntry>) + Send + Sync;
type StatusFn = dyn Fn() + Send + Sync;
type TxResultFn = dyn Fn(Payload) + Send + Sync;

/// Caller hooks, invoked on the reader or connection-loop thread.
#[derive(Default)]
struct Callbacks {
    tx_inventory: RwLock<Option<Arc<TxInventoryFn>>>,
    status: RwLock<Option<Arc<StatusFn>>>,
    tx_result: RwLock<Option<Arc<TxResultFn>>>,
}

impl Callbacks {
    fn tx_inventory(&self, entries: Vec<InvEntry>) {
        let cb = self.tx_inventory.read().clone();
        if let Some(cb) = cb {
            cb(entries);
        }
    }

    fn status(&self) {
        let cb = self.status.read().clone();
        if let Some(cb) = cb {
            cb();
        }
    }

    fn tx_result(&self, payload: Payload) {
        let cb = self.tx_result.read().clone();
        match cb {
            Some(cb) => cb(payload),
            None => debug!(command = payload.command_name(), "no tx result handler registered"),
        }
    }
}

/// State shared by the session handle, the connection loop and the reader.
struct Shared {
    config: SessionConfig,
    /// Magic word framing every message of this session.
    magic: u32,
    settings: Arc<dyn NetworkSettings>,
    transport: Arc<dyn Transport>,

    run: AtomicBool,
    closed: AtomicBool,
    connected: AtomicBool,
    peer_witness: AtomicBool,
    peer_start_height: AtomicI32,
    state: Mutex<ConnectionState>,

    write_lock: Mutex<()>,
    pending: PendingGetData,
    callbacks: Callbacks,
    blocks: Mutex<Option<Sender<BlockBatch>>>,

    stop_tx: Sender<()>,
    stop_rx: Receiver<()>,
    connect_waiter: Mutex<Option<Fulfill<Result<(), NodeError>>>>,
}

impl Shared {
    fn running(&self) -> bool {
        self.run.load(Ordering::Acquire)
    }

    fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.lock();
        let prev = *state;
        if state.transition(next) {
            debug!(from = %prev, to = %next, "connection state");
        }
    }

    fn set_peer(&self, witness: bool, start_height: i32) {
        self.peer_witness.store(witness, Ordering::Release);
        self.peer_start_height.store(start_height, Ordering::Release);
    }

    /// Serializes `payloads` into one buffer and writes it in one call.
    fn send(&self, payloads: &[Payload]) -> Result<(), NodeError> {
        let _guard = self.write_lock.lock();
        let buf = encode_frames(payloads, self.magic)?;
        self.transport.send(&buf)?;
        Ok(())
    }

    fn queue_blocks(&self, entries: Vec<InvEntry>, delay: Duration) {
        if let Some(tx) = self.blocks.lock().as_ref() {
            let _ = tx.send(BlockBatch::new(entries, delay));
        }
    }

    /// Sleeps for `delay` unless shutdown interrupts it first.
    fn pause(&self, delay: Duration) {
        let _ = self.stop_rx.recv_timeout(delay);
    }

    fn on_connected(&self) {
        self.connected.store(true, Ordering::Release);
        self.set_state(ConnectionState::Connected);
        info!(peer = ?self.transport.peer_addr(), "connected");
        self.callbacks.status();

        if let Some(waiter) = self.connect_waiter.lock().take() {
            waiter.fulfill(Ok(()));
        }
        // Wake idle block consumers so they re-check after a reconnect.
        self.queue_blocks(Vec::new(), Duration::ZERO);
    }

    fn on_disconnected(&self) {
        self.transport.shutdown();
        self.connected.store(false, Ordering::Release);
        self.set_state(ConnectionState::Disconnected);
        info!(peer = ?self.transport.peer_addr(), "disconnected");
        self.callbacks.status();
    }
}

/// Opens the transport and runs the handshake.
///
/// On success the reader thread keeps running and its handle is returned;
/// on failure the transport is closed and the reader joined.
fn handshake(shared: &Arc<Shared>) -> Result<JoinHandle<()>, NodeError> {
    let (inbound_tx, inbound_rx) = unbounded();
    shared.transport.open(inbound_tx)?;

    if !shared.running() {
        shared.transport.shutdown();
        return Err(NodeError::ShuttingDown);
    }
    shared.set_state(ConnectionState::AwaitingVerack);

    let (verack, verack_wait) = signal::oneshot();
    let spawned = {
        let shared = Arc::clone(shared);
        thread::Builder::new()
            .name("btc-p2p-reader".into())
            .spawn(move || dispatch::read_loop(&shared, inbound_rx, verack))
    };
    let reader = match spawned {
        Ok(reader) => reader,
        Err(e) => {
            shared.transport.shutdown();
            return Err(e.into());
        }
    };

    let version = VersionMessage::build(
        &shared.config,
        shared.transport.local_addr(),
        shared.transport.peer_addr(),
    );

    let outcome = shared
        .send(&[Payload::Version(version)])
        .and_then(|()| match verack_wait.wait_timeout(shared.config.handshake_timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(NodeError::HandshakeTimeout),
            Err(RecvTimeoutError::Disconnected) => Err(NodeError::PeerDisconnected),
        });

    match outcome {
        Ok(()) => Ok(reader),
        Err(e) => {
            shared.transport.shutdown();
            let _ = reader.join();
            // A verack racing the timeout may have set it.
            shared.connected.store(false, Ordering::Release);
            Err(e)
        }
    }
}

fn connection_loop(shared: Arc<Shared>) {
    let mut backoff = Backoff::new(
        shared.config.reconnect_increment,
        shared.config.max_reconnect_delay,
    );

    while shared.running() {
        shared.set_state(ConnectionState::Connecting);

        match handshake(&shared) {
            Ok(reader) => {
                backoff.reset();
                shared.on_connected();
                if reader.join().is_err() {
                    warn!("reader thread panicked");
                }
                shared.on_disconnected();
            }
            Err(error) => {
                shared.set_state(ConnectionState::Disconnected);
                if !shared.running() {
                    break;
                }
                let delay = backoff.next_delay();
                warn!(%error, ?delay, "connection attempt failed");
                shared.pause(delay);
            }
        }
    }

    shared.set_state(ConnectionState::ShuttingDown);
    if let Some(waiter) = shared.connect_waiter.lock().take() {
        waiter.fulfill(Err(NodeError::ShuttingDown));
    }
    debug!("connection loop exited");
}

/// Completion of an asynchronous [`Session::connect_async`].
///
/// Resolves on the first successful handshake, or with
/// [`NodeError::ShuttingDown`] if the session stops first. Failed attempts in
/// between are retried and do not resolve it.
#[derive(Debug)]
pub struct ConnectHandle {
    wait: Wait<Result<(), NodeError>>,
}

impl ConnectHandle {
    pub fn wait(self) -> Result<(), NodeError> {
        self.wait.wait().unwrap_or(Err(NodeError::ShuttingDown))
    }

    /// `None` if the handshake has not completed within `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<(), NodeError>> {
        match self.wait.wait_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(NodeError::ShuttingDown)),
        }
    }
}

/// A single-peer Bitcoin P2P session.
///
/// ```no_run
/// use btc_p2p::config::SessionConfig;
/// use btc_p2p::session::Session;
///
/// let session = Session::over_tcp(SessionConfig::default(), "127.0.0.1:8333".parse().unwrap());
/// session.on_tx_inventory(|entries| println!("{} new transactions", entries.len()));
/// session.connect().unwrap();
/// ```
pub struct Session {
    shared: Arc<Shared>,
    conn_loop: Mutex<Option<JoinHandle<()>>>,
    blocks: Option<BlockInventory>,
}

impl Session {
    /// Creates a session that checks peers against `config.network`.
    pub fn new(config: SessionConfig, transport: Arc<dyn Transport>) -> Self {
        let settings = Arc::new(config.network);
        Self::with_settings(config, transport, settings)
    }

    /// Creates a session whose expected magic word comes from `settings`.
    pub fn with_settings(
        config: SessionConfig,
        transport: Arc<dyn Transport>,
        settings: Arc<dyn NetworkSettings>,
    ) -> Self {
        let (block_tx, blocks) = if config.watcher {
            (None, None)
        } else {
            let (tx, rx) = inventory::channel();
            (Some(tx), Some(rx))
        };
        let (stop_tx, stop_rx) = bounded(1);

        let shared = Shared {
            magic: config.network.magic(),
            config,
            settings,
            transport,
            run: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            peer_witness: AtomicBool::new(false),
            peer_start_height: AtomicI32::new(-1),
            state: Mutex::new(ConnectionState::Disconnected),
            write_lock: Mutex::new(()),
            pending: PendingGetData::new(),
            callbacks: Callbacks::default(),
            blocks: Mutex::new(block_tx),
            stop_tx,
            stop_rx,
            connect_waiter: Mutex::new(None),
        };

        Self {
            shared: Arc::new(shared),
            conn_loop: Mutex::new(None),
            blocks,
        }
    }

    /// Session over a plain TCP connection to `addr`.
    pub fn over_tcp(config: SessionConfig, addr: SocketAddr) -> Self {
        Self::new(config, Arc::new(TcpTransport::new(addr)))
    }

    /// Called with each `inv` message's transaction entries, in order.
    pub fn on_tx_inventory<F>(&self, f: F)
    where
        F: Fn(Vec<InvEntry>) + Send + Sync + 'static,
    {
        *self.shared.callbacks.tx_inventory.write() = Some(Arc::new(f));
    }

    /// Called after every connect and disconnect; read
    /// [`is_connected`](Self::is_connected) for the new status.
    pub fn on_status_changed<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.shared.callbacks.status.write() = Some(Arc::new(f));
    }

    /// Called with every inbound `tx` or `reject`.
    pub fn on_tx_result<F>(&self, f: F)
    where
        F: Fn(Payload) + Send + Sync + 'static,
    {
        *self.shared.callbacks.tx_result.write() = Some(Arc::new(f));
    }

    /// Block announcements queue; `None` for watcher sessions.
    pub fn block_inventory(&self) -> Option<BlockInventory> {
        self.blocks.clone()
    }

    /// Starts the connection loop and returns without waiting.
    pub fn connect_async(&self) -> Result<ConnectHandle, NodeError> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(NodeError::ShuttingDown);
        }

        let mut slot = self.conn_loop.lock();
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            return Err(NodeError::AlreadyConnecting);
        }

        let (fulfill, wait) = signal::oneshot();
        *self.shared.connect_waiter.lock() = Some(fulfill);
        self.shared.run.store(true, Ordering::Release);

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("btc-p2p-connect".into())
            .spawn(move || connection_loop(shared))?;
        *slot = Some(handle);

        Ok(ConnectHandle { wait })
    }

    /// Starts the connection loop and blocks until the first handshake
    /// completes.
    pub fn connect(&self) -> Result<(), NodeError> {
        self.connect_async()?.wait()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// Whether the peer advertised `NODE_WITNESS` in its `version`.
    pub fn peer_uses_witness(&self) -> bool {
        self.shared.peer_witness.load(Ordering::Acquire)
    }

    /// Start height from the peer's `version`, -1 before any handshake.
    pub fn peer_start_height(&self) -> i32 {
        self.shared.peer_start_height.load(Ordering::Acquire)
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.lock()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    pub fn pending_getdata(&self) -> &PendingGetData {
        &self.shared.pending
    }

    pub fn send(&self, payload: Payload) -> Result<(), NodeError> {
        self.shared.send(slice::from_ref(&payload))
    }

    /// Sends several messages in one transport write.
    pub fn send_batch(&self, payloads: &[Payload]) -> Result<(), NodeError> {
        self.shared.send(payloads)
    }

    /// Asks the peer for transactions with a single `getdata`.
    ///
    /// Every entry must be `Tx` or `WitnessTx`; otherwise nothing is sent.
    pub fn request_tx(&self, entries: &[InvEntry]) -> Result<(), NodeError> {
        if let Some(bad) = entries.iter().find(|e| !e.inv_type.is_tx()) {
            return Err(NodeError::InvalidRequestType(bad.inv_type));
        }
        self.send(Payload::GetData(entries.to_vec()))
    }

    /// Requests one transaction, asking for witness data when the peer has it.
    pub fn fetch_tx(&self, txid: [u8; 32]) -> Result<(), NodeError> {
        let inv_type = if self.peer_uses_witness() {
            InvType::WitnessTx
        } else {
            InvType::Tx
        };
        self.request_tx(&[InvEntry::new(inv_type, txid)])
    }

    /// Offers a raw transaction to the peer.
    ///
    /// The transaction is kept in the pending-getdata table and announced
    /// with an `inv`; it is sent when the peer asks for it.
    pub fn broadcast_tx(&self, txid: [u8; 32], raw: Vec<u8>) -> Result<(), NodeError> {
        self.shared.pending.insert(txid, Payload::Tx(raw));
        self.send(Payload::Inv(vec![InvEntry::tx(txid)]))
    }

    /// Stops the connection loop and waits for every session thread.
    ///
    /// Closes the block-inventory queue. Idempotent. Must not be called from
    /// inside a session callback.
    pub fn shutdown(&self) {
        let first = !self.shared.closed.swap(true, Ordering::AcqRel);
        self.shared.run.store(false, Ordering::Release);
        let _ = self.shared.stop_tx.try_send(());
        self.shared.transport.shutdown();

        let handle = self.conn_loop.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("connection loop panicked");
            }
        }

        self.shared.set_state(ConnectionState::ShuttingDown);
        self.shared.blocks.lock().take();
        if first {
            info!("session shut down");
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}
