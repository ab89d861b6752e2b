//! Runtime switching policies
//!
//! Four ways to decide which reader feeds the writers: an operator typing
//! suffixes on stdin, a rotation timer, switch requests from the writer
//! peers themselves, or (eventually) peer location.

use super::ConnectionManager;
use crate::error::{Error, Result};
use crate::session::sleep_interruptible;
use parking_lot::Mutex;
use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Who decides the writer-to-reader routing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchStrategy {
    /// Operator console: a reader suffix on stdin switches every writer,
    /// a writer/reader suffix pair switches one
    Manual,
    /// Rotate all writers to the next reader on a fixed interval
    Timer,
    /// Writer peers send control frames naming the reader they want
    Headset,
    /// Switch on peer position; not wired up yet
    LocationBased,
}

impl SwitchStrategy {
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "manual" => Ok(Self::Manual),
            "timer" => Ok(Self::Timer),
            "headset" => Ok(Self::Headset),
            "location" => Ok(Self::LocationBased),
            other => Err(Error::Config(format!("unknown switch strategy '{other}'"))),
        }
    }

    /// Whether accepted writers should watch their socket for control frames
    pub fn wants_control_channel(&self) -> bool {
        matches!(self, Self::Headset)
    }
}

/// Drives a [`SwitchStrategy`] against a [`ConnectionManager`].
///
/// Timer mode owns a worker thread that `stop` joins. Manual mode reads
/// stdin on a detached thread, since a blocking stdin read cannot be
/// interrupted; it checks the running flag after each line and dies with
/// the process otherwise. Headset mode needs no thread, the switch
/// requests arrive as session events.
pub struct Switcher {
    strategy: SwitchStrategy,
    running: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Switcher {
    pub fn start(
        strategy: SwitchStrategy,
        interval: Duration,
        manager: Arc<ConnectionManager>,
    ) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let thread = match strategy {
            SwitchStrategy::Manual => {
                let running = Arc::clone(&running);
                thread::Builder::new()
                    .name("switch-console".into())
                    .spawn(move || console_loop(&manager, &running))
                    .map_err(|e| Error::Other(format!("failed to spawn console thread: {e}")))?;
                None
            }
            SwitchStrategy::Timer => {
                let running = Arc::clone(&running);
                Some(
                    thread::Builder::new()
                        .name("switch-timer".into())
                        .spawn(move || {
                            while running.load(Ordering::Relaxed) {
                                sleep_interruptible(interval, &running);
                                if running.load(Ordering::Relaxed) {
                                    manager.rotate();
                                }
                            }
                        })
                        .map_err(|e| {
                            Error::Other(format!("failed to spawn timer thread: {e}"))
                        })?,
                )
            }
            SwitchStrategy::Headset => None,
            SwitchStrategy::LocationBased => {
                log::warn!("location-based switching not implemented, routes stay put");
                None
            }
        };
        Ok(Self {
            strategy,
            running,
            thread: Mutex::new(thread),
        })
    }

    pub fn strategy(&self) -> SwitchStrategy {
        self.strategy
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Switcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Parse operator commands from stdin.
///
/// `3`     -> switch every writer to the reader with suffix 3
/// `101 3` -> switch the writer with suffix 101 to the reader with suffix 3
fn console_loop(manager: &ConnectionManager, running: &AtomicBool) {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        if !running.load(Ordering::Relaxed) {
            return;
        }
        let line = match line {
            Ok(line) => line,
            Err(_) => return,
        };
        apply_console_command(manager, &line);
    }
}

fn apply_console_command(manager: &ConnectionManager, line: &str) {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let parsed: Option<Vec<u8>> = fields.iter().map(|f| f.parse().ok()).collect();
    match parsed.as_deref() {
        Some([reader]) => manager.switch_all_to(*reader),
        Some([writer, reader]) => manager.switch_pair(*writer, *reader),
        Some([]) => {}
        _ => log::warn!("unrecognized console command '{line}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffers::BufferHandle;
    use crate::session::{Downlink, SessionId, Uplink};
    use std::net::{IpAddr, Ipv4Addr};

    struct StubUplink(SessionId);
    impl Uplink for StubUplink {
        fn id(&self) -> SessionId {
            self.0
        }
        fn stop(&self) {}
    }

    struct StubDownlink(SessionId);
    impl Downlink for StubDownlink {
        fn id(&self) -> SessionId {
            self.0
        }
        fn post(&self, _buffer: BufferHandle) {}
        fn stop(&self) {}
    }

    fn sid(last: u8) -> SessionId {
        SessionId(IpAddr::V4(Ipv4Addr::new(10, 0, 0, last)))
    }

    #[test]
    fn test_strategy_names() {
        assert_eq!(
            SwitchStrategy::from_name("manual").unwrap(),
            SwitchStrategy::Manual
        );
        assert_eq!(
            SwitchStrategy::from_name("headset").unwrap(),
            SwitchStrategy::Headset
        );
        assert!(SwitchStrategy::from_name("psychic").is_err());
        assert!(SwitchStrategy::Headset.wants_control_channel());
        assert!(!SwitchStrategy::Timer.wants_control_channel());
    }

    #[test]
    fn test_console_commands() {
        let manager = ConnectionManager::new();
        manager.register_reader(Arc::new(StubUplink(sid(1))));
        manager.register_reader(Arc::new(StubUplink(sid(2))));
        manager.register_writer(Arc::new(StubDownlink(sid(101))));
        manager.register_writer(Arc::new(StubDownlink(sid(102))));

        apply_console_command(&manager, "2");
        assert_eq!(manager.route_of(sid(101)), Some(sid(2)));
        assert_eq!(manager.route_of(sid(102)), Some(sid(2)));

        apply_console_command(&manager, "101 1");
        assert_eq!(manager.route_of(sid(101)), Some(sid(1)));
        assert_eq!(manager.route_of(sid(102)), Some(sid(2)));

        // Garbage and empty lines leave routes alone
        apply_console_command(&manager, "camera two please");
        apply_console_command(&manager, "");
        assert_eq!(manager.route_of(sid(101)), Some(sid(1)));
    }

    #[test]
    fn test_timer_rotates_routes() {
        let manager = Arc::new(ConnectionManager::new());
        manager.register_reader(Arc::new(StubUplink(sid(1))));
        manager.register_reader(Arc::new(StubUplink(sid(2))));
        manager.register_writer(Arc::new(StubDownlink(sid(101))));
        let before = manager.route_of(sid(101)).unwrap();

        let switcher = Switcher::start(
            SwitchStrategy::Timer,
            Duration::from_millis(50),
            Arc::clone(&manager),
        )
        .unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while manager.route_of(sid(101)) == Some(before) {
            assert!(std::time::Instant::now() < deadline, "timer never rotated");
            thread::sleep(Duration::from_millis(10));
        }
        switcher.stop();
    }
}
