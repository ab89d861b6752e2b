//! Session registry and route table

use crate::buffers::BufferHandle;
use crate::session::{Downlink, SessionEvent, SessionId, Uplink};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Live sessions plus the writer-to-reader bindings.
///
/// `BTreeMap` keeps both sides ordered by address, so "the next reader"
/// is well defined and rotation visits readers in a stable order.
#[derive(Default)]
struct RouteTable {
    readers: BTreeMap<SessionId, Arc<dyn Uplink>>,
    writers: BTreeMap<SessionId, Arc<dyn Downlink>>,
    /// writer -> the reader currently feeding it
    routes: BTreeMap<SessionId, SessionId>,
}

impl RouteTable {
    /// Reader after `id` in address order, wrapping to the first
    fn next_reader(&self, id: SessionId) -> Option<SessionId> {
        self.readers
            .range((std::ops::Bound::Excluded(id), std::ops::Bound::Unbounded))
            .next()
            .or_else(|| self.readers.iter().next())
            .map(|(&next, _)| next)
    }

    fn reader_by_suffix(&self, suffix: u8) -> Option<SessionId> {
        self.readers.keys().find(|id| id.suffix() == suffix).copied()
    }

    fn writer_by_suffix(&self, suffix: u8) -> Option<SessionId> {
        self.writers.keys().find(|id| id.suffix() == suffix).copied()
    }
}

/// Routes inbound messages from readers to the writers bound to them and
/// keeps the session registry consistent as peers come, go and reconnect.
///
/// Registration and teardown take the write lock briefly; displaced
/// sessions are stopped only after the lock is released, since `stop`
/// joins session threads which may themselves be delivering events.
pub struct ConnectionManager {
    table: RwLock<RouteTable>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            table: RwLock::new(RouteTable::default()),
        }
    }

    /// Add a producer session. The first reader to arrive picks up every
    /// writer; a reader re-registering under the same address (reconnect)
    /// replaces the old session and keeps its routes.
    pub fn register_reader(&self, reader: Arc<dyn Uplink>) {
        let id = reader.id();
        let displaced = {
            let mut table = self.table.write();
            let first = table.readers.is_empty();
            let displaced = table.readers.insert(id, reader);
            if first {
                for route in table.routes.values_mut() {
                    *route = id;
                }
                let unrouted: Vec<SessionId> = table
                    .writers
                    .keys()
                    .filter(|w| !table.routes.contains_key(w))
                    .copied()
                    .collect();
                for writer in unrouted {
                    table.routes.insert(writer, id);
                }
            }
            displaced
        };
        if let Some(old) = displaced {
            log::info!("reader {id} re-registered, replacing previous session");
            old.stop();
        } else {
            log::info!("reader {id} registered");
        }
    }

    /// Remove a producer session. Its writers migrate to the next reader
    /// in address order (wrapping); when it was the last reader the routes
    /// are cleared and writers idle until a reader returns.
    pub fn unregister_reader(&self, id: SessionId) {
        let removed = {
            let mut table = self.table.write();
            let removed = table.readers.remove(&id);
            if removed.is_some() {
                if table.readers.is_empty() {
                    table.routes.clear();
                    log::warn!("reader {id} gone, no readers left");
                } else if let Some(next) = table.next_reader(id) {
                    let mut migrated = 0usize;
                    for route in table.routes.values_mut() {
                        if *route == id {
                            *route = next;
                            migrated += 1;
                        }
                    }
                    if migrated > 0 {
                        log::info!("reader {id} gone, moved {migrated} writers to {next}");
                    }
                }
            }
            removed
        };
        if let Some(reader) = removed {
            reader.stop();
        }
    }

    /// Add a consumer session. A writer re-registering under the same
    /// address swaps in place and keeps its route; a genuinely new writer
    /// attaches to the first reader, if any.
    pub fn register_writer(&self, writer: Arc<dyn Downlink>) {
        let id = writer.id();
        let displaced = {
            let mut table = self.table.write();
            let displaced = table.writers.insert(id, writer);
            if displaced.is_none() {
                if let Some((&first, _)) = table.readers.iter().next() {
                    table.routes.insert(id, first);
                }
            }
            displaced
        };
        if let Some(old) = displaced {
            log::info!("writer {id} re-registered, replacing previous session");
            old.stop();
        } else {
            log::info!("writer {id} registered");
        }
    }

    /// Remove a consumer session. Unknown ids are a no-op.
    pub fn unregister_writer(&self, id: SessionId) {
        let removed = {
            let mut table = self.table.write();
            table.routes.remove(&id);
            table.writers.remove(&id)
        };
        if let Some(writer) = removed {
            log::info!("writer {id} unregistered");
            writer.stop();
        }
    }

    /// Fan a reassembled message out to every writer routed to `reader`.
    ///
    /// Delivery happens under the read lock: `post` is a non-blocking
    /// enqueue, so the lock still only covers bookkeeping, and a migration
    /// (write lock) can never interleave with a fan-out. A writer either
    /// receives the message on its pre-migration route or not at all.
    pub fn post_message(&self, reader: SessionId, buffer: BufferHandle) {
        let table = self.table.read();
        for (w, _) in table.routes.iter().filter(|(_, &r)| r == reader) {
            if let Some(writer) = table.writers.get(w) {
                writer.post(buffer.clone());
            }
        }
    }

    /// Route every writer to the reader whose address ends in `suffix`
    pub fn switch_all_to(&self, suffix: u8) {
        let mut table = self.table.write();
        let Some(reader) = table.reader_by_suffix(suffix) else {
            log::warn!("switch request for unknown reader suffix {suffix}");
            return;
        };
        let writers: Vec<SessionId> = table.writers.keys().copied().collect();
        for writer in writers {
            table.routes.insert(writer, reader);
        }
        log::info!("all writers switched to reader {reader}");
    }

    /// Route one writer, found by address suffix, to one reader
    pub fn switch_pair(&self, writer_suffix: u8, reader_suffix: u8) {
        let mut table = self.table.write();
        let Some(writer) = table.writer_by_suffix(writer_suffix) else {
            log::warn!("switch request for unknown writer suffix {writer_suffix}");
            return;
        };
        let Some(reader) = table.reader_by_suffix(reader_suffix) else {
            log::warn!("switch request for unknown reader suffix {reader_suffix}");
            return;
        };
        table.routes.insert(writer, reader);
        log::info!("writer {writer} switched to reader {reader}");
    }

    /// Route a known writer to the reader with the given suffix; used for
    /// switch requests arriving over a writer's control channel
    pub fn switch_writer(&self, writer: SessionId, reader_suffix: u8) {
        let mut table = self.table.write();
        if !table.writers.contains_key(&writer) {
            log::warn!("switch request from unknown writer {writer}");
            return;
        }
        let Some(reader) = table.reader_by_suffix(reader_suffix) else {
            log::warn!("switch request for unknown reader suffix {reader_suffix}");
            return;
        };
        table.routes.insert(writer, reader);
        log::info!("writer {writer} switched to reader {reader}");
    }

    /// Advance every writer to the next reader in address order
    pub fn rotate(&self) {
        let mut table = self.table.write();
        if table.readers.len() < 2 {
            return;
        }
        let moves: Vec<(SessionId, SessionId)> = table
            .routes
            .iter()
            .filter_map(|(&w, &r)| table.next_reader(r).map(|next| (w, next)))
            .collect();
        for (writer, next) in moves {
            table.routes.insert(writer, next);
        }
        log::info!("rotated {} writers to their next reader", table.routes.len());
    }

    /// Apply one session event to the table
    pub fn handle_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::Inbound { reader, buffer } => self.post_message(reader, buffer),
            SessionEvent::ReaderClosed(id) => self.unregister_reader(id),
            SessionEvent::WriterClosed(id) => self.unregister_writer(id),
            SessionEvent::SwitchRequest { writer, suffix } => self.switch_writer(writer, suffix),
        }
    }

    pub fn reader_count(&self) -> usize {
        self.table.read().readers.len()
    }

    pub fn writer_count(&self) -> usize {
        self.table.read().writers.len()
    }

    pub fn has_reader(&self) -> bool {
        !self.table.read().readers.is_empty()
    }

    /// The reader currently feeding `writer`, if it is routed
    pub fn route_of(&self, writer: SessionId) -> Option<SessionId> {
        self.table.read().routes.get(&writer).copied()
    }

    /// Stop and drop every session. Used at shutdown.
    pub fn stop_all(&self) {
        let (readers, writers) = {
            let mut table = self.table.write();
            table.routes.clear();
            let readers: Vec<_> = std::mem::take(&mut table.readers).into_values().collect();
            let writers: Vec<_> = std::mem::take(&mut table.writers).into_values().collect();
            (readers, writers)
        };
        for writer in writers {
            writer.stop();
        }
        for reader in readers {
            reader.stop();
        }
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}
