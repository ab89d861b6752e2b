//! The relay daemon: accept loop, peer classification, event dispatch

use crate::buffers::BufferPool;
use crate::config::RelayConfig;
use crate::error::{Error, Result};
use crate::routing::{ConnectionManager, SwitchStrategy, Switcher};
use crate::session::{
    AcceptClass, ClassifyPolicy, EventReceiver, EventSender, ReaderSession, SessionConfig,
    WriterSession,
};
use crossbeam_channel::{unbounded, RecvTimeoutError};
use parking_lot::Mutex;
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Accept-loop idle sleep while no connection is pending
const ACCEPT_IDLE: Duration = Duration::from_millis(10);

/// Dispatch-loop wakeup to observe shutdown
const DISPATCH_POLL: Duration = Duration::from_millis(100);

/// Everything the daemon owns: the shared buffer pool, the session
/// registry, the listener, the event dispatch thread and the switching
/// strategy. Construction binds the listener and starts the background
/// threads; `run` drives the accept loop on the caller's thread until the
/// running flag clears, then `shutdown` joins everything.
pub struct RelayApp {
    pool: BufferPool,
    manager: Arc<ConnectionManager>,
    listener: TcpListener,
    session_config: SessionConfig,
    classify: ClassifyPolicy,
    strategy: SwitchStrategy,
    switcher: Switcher,
    running: Arc<AtomicBool>,
    event_tx: EventSender,
    dispatch: Mutex<Option<JoinHandle<()>>>,
}

impl RelayApp {
    pub fn new(config: &RelayConfig) -> Result<Self> {
        config.validate()?;
        let strategy = SwitchStrategy::from_name(&config.routing.strategy)?;
        let classify = ClassifyPolicy::from_config(&config.routing)?;

        let listener = TcpListener::bind(&config.network.bind_address).map_err(|e| {
            Error::Config(format!(
                "cannot bind {}: {e}",
                config.network.bind_address
            ))
        })?;
        listener.set_nonblocking(true)?;
        log::info!("listening on {}", config.network.bind_address);

        let pool = BufferPool::new(config.pool.buffer_count, config.pool.buffer_capacity);
        let manager = Arc::new(ConnectionManager::new());
        let running = Arc::new(AtomicBool::new(true));

        let (event_tx, event_rx) = unbounded();
        let dispatch = spawn_dispatch(event_rx, Arc::clone(&manager), Arc::clone(&running))?;
        let switcher = Switcher::start(
            strategy,
            config.routing.rotation_interval(),
            Arc::clone(&manager),
        )?;

        let session_config = SessionConfig::from_config(config);
        if let Some(remote) = &config.network.remote_address {
            let addr = resolve(remote)?;
            log::info!("dialing upstream producer {addr}");
            let session = ReaderSession::dial(
                addr,
                pool.clone(),
                event_tx.clone(),
                session_config.clone(),
            )?;
            manager.register_reader(session);
        }

        Ok(Self {
            pool,
            manager,
            listener,
            session_config,
            classify,
            strategy,
            switcher,
            running,
            dispatch: Mutex::new(Some(dispatch)),
            event_tx,
        })
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Accept and classify peers until `running` clears
    pub fn run(&self, running: &AtomicBool) -> Result<()> {
        while running.load(Ordering::Relaxed) {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(e) = self.admit(stream, peer) {
                        log::warn!("failed to start session for {peer}: {e}");
                    }
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_IDLE);
                }
                Err(e) => {
                    log::warn!("accept failed: {e}");
                    thread::sleep(ACCEPT_IDLE);
                }
            }
        }
        self.shutdown();
        Ok(())
    }

    fn admit(&self, stream: std::net::TcpStream, peer: std::net::SocketAddr) -> Result<()> {
        match self.classify.classify(peer, self.manager.has_reader()) {
            AcceptClass::Reader => {
                log::info!("accepted reader peer {peer}");
                let session = ReaderSession::accept(
                    stream,
                    peer,
                    self.pool.clone(),
                    self.event_tx.clone(),
                    self.session_config.clone(),
                )?;
                self.manager.register_reader(session);
            }
            AcceptClass::Writer => {
                log::info!("accepted writer peer {peer}");
                let session = WriterSession::accept(
                    stream,
                    peer,
                    self.event_tx.clone(),
                    self.session_config.clone(),
                    self.strategy.wants_control_channel(),
                )?;
                self.manager.register_writer(session);
            }
        }
        Ok(())
    }

    /// Stop the strategy, the sessions and the dispatch thread, joining
    /// each. Safe to call more than once.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::Relaxed) {
            return;
        }
        log::info!("shutting down");
        self.switcher.stop();
        self.manager.stop_all();
        if let Some(handle) = self.dispatch.lock().take() {
            let _ = handle.join();
        }
        let stats = self.pool.stats();
        log::info!(
            "pool stats: {} acquired, {} released, {} overflow",
            stats.acquired,
            stats.released,
            stats.overflow_acquires
        );
    }
}

impl Drop for RelayApp {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Resolve a `host:port` string to the first usable socket address
fn resolve(remote: &str) -> Result<std::net::SocketAddr> {
    use std::net::ToSocketAddrs;
    remote
        .to_socket_addrs()
        .map_err(|e| Error::Config(format!("cannot resolve {remote}: {e}")))?
        .next()
        .ok_or_else(|| Error::Config(format!("{remote} resolves to no address")))
}

/// Consume session events and apply them to the route table
fn spawn_dispatch(
    events: EventReceiver,
    manager: Arc<ConnectionManager>,
    running: Arc<AtomicBool>,
) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("route-dispatch".into())
        .spawn(move || loop {
            match events.recv_timeout(DISPATCH_POLL) {
                Ok(event) => manager.handle_event(event),
                Err(RecvTimeoutError::Timeout) => {
                    if !running.load(Ordering::Relaxed) {
                        return;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return,
            }
        })
        .map_err(|e| Error::Other(format!("failed to spawn dispatch thread: {e}")))
}
