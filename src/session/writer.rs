//! Writer sessions: push queued media buffers to a consumer peer

use super::{
    next_session_number, sleep_interruptible, Downlink, EventSender, SessionConfig, SessionEvent,
    SessionId, SessionState,
};
use crate::buffers::{BufferHandle, BufferPool};
use crate::error::{Error, Result};
use crate::framing::{FrameReader, FrameWriter};
use crate::session::dial;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How often the send loop wakes to observe the running flag
const QUEUE_POLL: Duration = Duration::from_millis(100);

/// Read timeout for the EOF probe on dial-mode sockets
const PROBE_TIMEOUT: Duration = Duration::from_millis(1);

/// Buffer capacity for inbound control frames (a reader suffix byte)
const CONTROL_CAPACITY: usize = 64;

/// A consumer-facing session with a FIFO outbound queue.
///
/// `post` enqueues without blocking; a dedicated send thread drains the
/// queue and writes one full message before dequeuing the next, so buffers
/// posted to the same session reach the peer whole and in post order.
///
/// In accept mode the session can also watch the socket for control frames
/// (headset-controlled switching): a message whose first payload byte names
/// a reader suffix becomes a [`SessionEvent::SwitchRequest`]. In dial mode
/// a lost connection clears the queue (in-flight and queued messages are
/// gone for good, at-most-once) and redials after the backoff.
pub struct WriterSession {
    id: SessionId,
    peer: SocketAddr,
    running: Arc<AtomicBool>,
    state: Arc<Mutex<SessionState>>,
    queue_tx: Sender<BufferHandle>,
    socket: Arc<Mutex<Option<TcpStream>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl WriterSession {
    /// Wrap a server-accepted connection. With `watch_control` the inbound
    /// direction of the socket is read for switch requests.
    pub fn accept(
        stream: TcpStream,
        peer: SocketAddr,
        events: EventSender,
        config: SessionConfig,
        watch_control: bool,
    ) -> Result<Arc<Self>> {
        let (queue_tx, queue_rx) = unbounded();
        let session = Arc::new(Self {
            id: SessionId::from_addr(peer),
            peer,
            running: Arc::new(AtomicBool::new(true)),
            state: Arc::new(Mutex::new(SessionState::Connected)),
            queue_tx,
            socket: Arc::new(Mutex::new(Some(stream.try_clone()?))),
            threads: Mutex::new(Vec::new()),
        });

        stream.set_write_timeout(Some(config.write_timeout))?;
        let mut threads = session.threads.lock();

        if watch_control {
            let control_stream = stream.try_clone()?;
            control_stream.set_read_timeout(Some(config.read_timeout))?;
            threads.push(spawn_control_loop(
                control_stream,
                session.id,
                events.clone(),
                Arc::clone(&session.running),
            )?);
        }

        let id = session.id;
        let running = Arc::clone(&session.running);
        let state = Arc::clone(&session.state);
        let socket = Arc::clone(&session.socket);
        threads.push(
            thread::Builder::new()
                .name(format!("writer-{id}"))
                .spawn(move || {
                    let mut stream = stream;
                    let mut writer = FrameWriter::new(next_session_number());
                    send_loop(&mut stream, &mut writer, &queue_rx, id, &running, false);
                    *socket.lock() = None;
                    *state.lock() = SessionState::Closed;
                    let _ = events.send(SessionEvent::WriterClosed(id));
                    log::info!("writer session {id} ended");
                })
                .map_err(|e| Error::Other(format!("failed to spawn writer thread: {e}")))?,
        );
        drop(threads);
        Ok(session)
    }

    /// Dial a remote consumer and keep the connection alive across failures
    pub fn dial(remote: SocketAddr, events: EventSender, config: SessionConfig) -> Result<Arc<Self>> {
        let (queue_tx, queue_rx) = unbounded::<BufferHandle>();
        let session = Arc::new(Self {
            id: SessionId::from_addr(remote),
            peer: remote,
            running: Arc::new(AtomicBool::new(true)),
            state: Arc::new(Mutex::new(SessionState::Connecting)),
            queue_tx,
            socket: Arc::new(Mutex::new(None)),
            threads: Mutex::new(Vec::new()),
        });

        let id = session.id;
        let running = Arc::clone(&session.running);
        let state = Arc::clone(&session.state);
        let socket = Arc::clone(&session.socket);
        let handle = thread::Builder::new()
            .name(format!("writer-dial-{id}"))
            .spawn(move || {
                let mut first_attempt = true;
                while running.load(Ordering::Relaxed) {
                    if !first_attempt {
                        sleep_interruptible(config.reconnect_backoff, &running);
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }
                    }
                    first_attempt = false;

                    *state.lock() = SessionState::Connecting;
                    let mut stream = match dial::connect(
                        remote,
                        config.read_timeout,
                        config.fixed_local_port,
                    ) {
                        Ok(stream) => stream,
                        Err(e) => {
                            log::warn!("connect to {remote} failed: {e}");
                            continue;
                        }
                    };
                    if let Err(e) = stream.set_write_timeout(Some(config.write_timeout)) {
                        log::warn!("failed to set write timeout: {e}");
                        continue;
                    }
                    // Nothing is expected inbound on a dialed writer, so a
                    // tiny read timeout keeps the EOF probe from stalling
                    // the send loop
                    if let Err(e) = stream.set_read_timeout(Some(PROBE_TIMEOUT)) {
                        log::warn!("failed to set read timeout: {e}");
                        continue;
                    }
                    match stream.try_clone() {
                        Ok(clone) => *socket.lock() = Some(clone),
                        Err(e) => {
                            log::warn!("failed to clone socket: {e}");
                            continue;
                        }
                    }
                    *state.lock() = SessionState::Connected;
                    log::info!("writer session {id} connected to {remote}");

                    // A fresh session number per logical connection lets the
                    // receiver spot the redial
                    let mut writer = FrameWriter::new(next_session_number());
                    send_loop(&mut stream, &mut writer, &queue_rx, id, &running, true);
                    *socket.lock() = None;
                    if !running.load(Ordering::Relaxed) {
                        break;
                    }

                    // At-most-once: everything queued against the dead
                    // connection is discarded before redialing
                    let mut cleared = 0usize;
                    while queue_rx.try_recv().is_ok() {
                        cleared += 1;
                    }
                    if cleared > 0 {
                        log::warn!("writer session {id}: discarded {cleared} queued messages");
                    }
                    log::info!("writer session {id} lost connection, will redial");
                }
                *state.lock() = SessionState::Closed;
                let _ = events.send(SessionEvent::WriterClosed(id));
            })
            .map_err(|e| Error::Other(format!("failed to spawn writer dial thread: {e}")))?;

        session.threads.lock().push(handle);
        Ok(session)
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Number of messages waiting in the outbound queue
    pub fn queued(&self) -> usize {
        self.queue_tx.len()
    }

    /// Idempotent teardown, mirrors [`super::ReaderSession::stop`]
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::Relaxed) {
            *self.state.lock() = SessionState::Closing;
        }
        if let Some(socket) = self.socket.lock().as_ref() {
            let _ = socket.shutdown(Shutdown::Both);
        }
        let handles: Vec<_> = self.threads.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
        *self.state.lock() = SessionState::Closed;
    }
}

impl Downlink for WriterSession {
    fn id(&self) -> SessionId {
        self.id
    }

    /// Enqueue a buffer for transmission. Never blocks; posts against a
    /// stopped session are dropped with a log line.
    fn post(&self, buffer: BufferHandle) {
        if !self.running.load(Ordering::Relaxed) {
            log::debug!("writer session {}: dropping post, session stopped", self.id);
            return;
        }
        if self.queue_tx.send(buffer).is_err() {
            log::debug!("writer session {}: dropping post, queue closed", self.id);
        }
    }

    fn stop(&self) {
        WriterSession::stop(self)
    }
}

impl Drop for WriterSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Drain the queue onto the socket, one whole message at a time.
///
/// Only a shared read guard is held across the socket write, so a slow or
/// stalled peer never blocks other writers draining the same buffer.
///
/// With `probe` set, idle polls also peek the socket so a hung-up peer is
/// noticed without waiting for the next write to fail (dial mode only; the
/// accept side owns the inbound direction for control frames).
fn send_loop(
    stream: &mut TcpStream,
    writer: &mut FrameWriter,
    queue: &Receiver<BufferHandle>,
    id: SessionId,
    running: &AtomicBool,
    probe: bool,
) {
    loop {
        if !running.load(Ordering::Relaxed) {
            return;
        }
        match queue.recv_timeout(QUEUE_POLL) {
            Ok(buffer) => {
                let result = {
                    let data = buffer.read();
                    writer.write_message(stream, data.as_slice())
                };
                if let Err(e) = result {
                    log::warn!("writer session {id}: send failed: {e}");
                    return;
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if probe && peer_hung_up(stream, id) {
                    return;
                }
            }
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

/// Peek the socket to see whether the peer closed its end
fn peer_hung_up(stream: &TcpStream, id: SessionId) -> bool {
    let mut probe = [0u8; 1];
    match stream.peek(&mut probe) {
        Ok(0) => {
            log::info!("writer session {id}: peer closed connection");
            true
        }
        Ok(_) => {
            // Unexpected inbound bytes on a dialed writer; leave them for
            // the peer protocol to sort out
            false
        }
        Err(ref e)
            if e.kind() == std::io::ErrorKind::WouldBlock
                || e.kind() == std::io::ErrorKind::TimedOut =>
        {
            false
        }
        Err(e) => {
            log::info!("writer session {id}: connection lost: {e}");
            true
        }
    }
}

/// Watch the inbound direction of a writer socket for switch requests
fn spawn_control_loop(
    mut stream: TcpStream,
    id: SessionId,
    events: EventSender,
    running: Arc<AtomicBool>,
) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("writer-ctl-{id}"))
        .spawn(move || {
            // Control frames are tiny; a private two-slot pool is plenty
            let pool = BufferPool::new(2, CONTROL_CAPACITY);
            let mut reader = FrameReader::new();
            while running.load(Ordering::Relaxed) {
                match reader.read_message(&mut stream, &pool) {
                    Ok(Some(buffer)) => {
                        let suffix = {
                            let data = buffer.read();
                            data.as_slice().first().copied()
                        };
                        match suffix {
                            Some(suffix) => {
                                log::info!(
                                    "writer session {id} requested switch to reader suffix {suffix}"
                                );
                                if events
                                    .send(SessionEvent::SwitchRequest { writer: id, suffix })
                                    .is_err()
                                {
                                    break;
                                }
                            }
                            None => log::warn!("writer session {id}: empty control frame"),
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        log::debug!("writer session {id}: control channel ended: {e}");
                        break;
                    }
                }
            }
        })
        .map_err(|e| Error::Other(format!("failed to spawn control thread: {e}")))
}
