//! Reader sessions: receive framed media buffers from a producer peer

use super::{
    sleep_interruptible, EventSender, SessionConfig, SessionEvent, SessionId, SessionState, Uplink,
};
use crate::buffers::BufferPool;
use crate::error::{Error, Result};
use crate::framing::FrameReader;
use crate::session::dial;
use parking_lot::Mutex;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Why the receive loop ended
enum LoopEnd {
    /// `stop()` was called or the dispatch side went away
    Stopped,
    /// Transport or protocol failure, redial-worthy for clients
    Broken,
}

/// A producer-facing session: chunks arriving on the socket are reassembled
/// straight into pooled buffers and handed to the dispatch channel.
///
/// Accept-mode sessions (server role) tear down on any error; dial-mode
/// sessions (client role) drop the socket and redial after the configured
/// backoff, skipping the wait only for the very first attempt.
pub struct ReaderSession {
    id: SessionId,
    peer: SocketAddr,
    running: Arc<AtomicBool>,
    state: Arc<Mutex<SessionState>>,
    socket: Arc<Mutex<Option<TcpStream>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl ReaderSession {
    /// Wrap a server-accepted connection
    pub fn accept(
        stream: TcpStream,
        peer: SocketAddr,
        pool: BufferPool,
        events: EventSender,
        config: SessionConfig,
    ) -> Result<Arc<Self>> {
        let session = Arc::new(Self {
            id: SessionId::from_addr(peer),
            peer,
            running: Arc::new(AtomicBool::new(true)),
            state: Arc::new(Mutex::new(SessionState::Connected)),
            socket: Arc::new(Mutex::new(Some(stream.try_clone()?))),
            thread: Mutex::new(None),
        });

        stream.set_read_timeout(Some(config.read_timeout))?;
        let id = session.id;
        let running = Arc::clone(&session.running);
        let state = Arc::clone(&session.state);
        let socket = Arc::clone(&session.socket);
        let handle = thread::Builder::new()
            .name(format!("reader-{id}"))
            .spawn(move || {
                let mut stream = stream;
                let _ = receive_loop(&mut stream, id, &pool, &events, &running);
                *socket.lock() = None;
                *state.lock() = SessionState::Closed;
                let _ = events.send(SessionEvent::ReaderClosed(id));
                log::info!("reader session {id} ended");
            })
            .map_err(|e| Error::Other(format!("failed to spawn reader thread: {e}")))?;

        *session.thread.lock() = Some(handle);
        Ok(session)
    }

    /// Dial a remote producer and keep the connection alive across failures
    pub fn dial(
        remote: SocketAddr,
        pool: BufferPool,
        events: EventSender,
        config: SessionConfig,
    ) -> Result<Arc<Self>> {
        let session = Arc::new(Self {
            id: SessionId::from_addr(remote),
            peer: remote,
            running: Arc::new(AtomicBool::new(true)),
            state: Arc::new(Mutex::new(SessionState::Connecting)),
            socket: Arc::new(Mutex::new(None)),
            thread: Mutex::new(None),
        });

        let id = session.id;
        let running = Arc::clone(&session.running);
        let state = Arc::clone(&session.state);
        let socket = Arc::clone(&session.socket);
        let handle = thread::Builder::new()
            .name(format!("reader-dial-{id}"))
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
                    if let Err(e) = stream.set_read_timeout(Some(config.read_timeout)) {
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
                    log::info!("reader session {id} connected to {remote}");

                    let end = receive_loop(&mut stream, id, &pool, &events, &running);
                    *socket.lock() = None;
                    if matches!(end, LoopEnd::Stopped) {
                        break;
                    }
                    log::info!("reader session {id} lost connection, will redial");
                }
                *state.lock() = SessionState::Closed;
                let _ = events.send(SessionEvent::ReaderClosed(id));
            })
            .map_err(|e| Error::Other(format!("failed to spawn reader dial thread: {e}")))?;

        *session.thread.lock() = Some(handle);
        Ok(session)
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Idempotent teardown: cancels pending reads via socket shutdown and
    /// joins the session thread before returning.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::Relaxed) {
            *self.state.lock() = SessionState::Closing;
        }
        if let Some(socket) = self.socket.lock().as_ref() {
            let _ = socket.shutdown(Shutdown::Both);
        }
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
        *self.state.lock() = SessionState::Closed;
    }
}

impl Uplink for ReaderSession {
    fn id(&self) -> SessionId {
        self.id
    }

    fn stop(&self) {
        ReaderSession::stop(self)
    }
}

impl Drop for ReaderSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Pull messages off the socket until stop, peer close or error
fn receive_loop(
    stream: &mut TcpStream,
    id: SessionId,
    pool: &BufferPool,
    events: &EventSender,
    running: &AtomicBool,
) -> LoopEnd {
    let mut reader = FrameReader::new();
    loop {
        if !running.load(Ordering::Relaxed) {
            return LoopEnd::Stopped;
        }
        match reader.read_message(stream, pool) {
            Ok(Some(buffer)) => {
                if events
                    .send(SessionEvent::Inbound { reader: id, buffer })
                    .is_err()
                {
                    return LoopEnd::Stopped;
                }
            }
            Ok(None) => {
                // Idle deadline: just a chance to observe the running flag
            }
            Err(Error::Disconnected) => {
                log::info!("reader session {id}: peer closed connection");
                return LoopEnd::Broken;
            }
            Err(e) => {
                log::warn!("reader session {id}: {e}");
                return LoopEnd::Broken;
            }
        }
    }
}
