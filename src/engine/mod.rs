mod assignment;
mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;
mod validator;

pub use availability::available_rooms;
pub use conflict::{find_conflicts, is_blocking, overlaps};
pub(crate) use conflict::now_ms;
pub use error::{AssignmentError, EngineError, ErrorCode, ErrorDetails, StructuredError};
pub use validator::assert_assignable;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockWriteGuard, RwLock};
use tracing::warn;
use ulid::Ulid;

use crate::model::*;
use crate::observability;
use crate::wal::Wal;

/// A row: one record behind its own lock. Write guard = exclusive row lock.
pub type SharedBooking = Arc<RwLock<Booking>>;
pub type SharedRoom = Arc<RwLock<Room>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
///
/// Waits for one append, drains whatever else is already queued, writes the
/// batch with a single fsync and answers every sender with the shared result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };

        let mut batch: Vec<PendingAppend> = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    // Commands after an append must observe it on disk.
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        flush_and_respond(&mut wal, batch);
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: Vec<PendingAppend>) {
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = Instant::now();

    let mut result = Ok(());
    for (event, _) in &batch {
        if let Err(e) = wal.append_buffered(event) {
            result = Err(e);
            break;
        }
    }
    // Flush even after a failed append so stale buffered bytes don't leak
    // into the next batch; every sender in this batch is told it failed.
    let flushed = wal.flush_sync();
    if result.is_ok() {
        result = flushed;
    }

    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());

    for (_, tx) in batch {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

// ── Row-level event application ──────────────────────────

/// Apply a booking event to its row (caller holds the row lock).
pub(super) fn apply_to_booking(b: &mut Booking, event: &Event) {
    match event {
        Event::BookingStatusChanged { status, .. } => b.status = *status,
        Event::GuestCheckedIn { at, .. } => b.checked_in_at = Some(*at),
        Event::GuestCheckedOut { at, .. } => b.checked_out_at = Some(*at),
        Event::RoomAssigned {
            room_id,
            at,
            by,
            notes,
            reassigned,
            ..
        } => {
            b.assigned_room_id = Some(*room_id);
            if *reassigned {
                b.room_reassigned_at = Some(*at);
                b.room_reassigned_by = Some(by.clone());
                if notes.is_some() {
                    b.assignment_notes = notes.clone();
                }
            } else {
                b.room_assigned_at = Some(*at);
                b.room_assigned_by = Some(by.clone());
                b.assignment_notes = notes.clone();
            }
            b.assignment_version += 1;
        }
        Event::BookingCreated { .. }
        | Event::BookingRestored { .. }
        | Event::RoomTypeCreated { .. }
        | Event::RoomCreated { .. }
        | Event::RoomUpdated { .. } => {}
    }
}

/// Apply a room event to its row (caller holds the row lock).
pub(super) fn apply_to_room(r: &mut Room, event: &Event) {
    if let Event::RoomUpdated {
        room_status,
        is_active,
        is_out_of_order,
        maintenance_required,
        ..
    } = event
    {
        r.room_status = *room_status;
        r.is_active = *is_active;
        r.is_out_of_order = *is_out_of_order;
        r.maintenance_required = *maintenance_required;
    }
}

// ── Engine ───────────────────────────────────────────────

pub struct Engine {
    pub(super) room_types: DashMap<Ulid, RoomType>,
    pub(super) rooms: DashMap<Ulid, SharedRoom>,
    pub(super) bookings: DashMap<Ulid, SharedBooking>,
    /// Room id → bookings assigned to it, with their stays. Derived from
    /// `Booking::assigned_room_id`; only changed while the room is write-locked.
    pub(super) room_assignments: DashMap<Ulid, Vec<(Ulid, StayRange)>>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Commits hold this shared; compaction takes it exclusively.
    pub(super) commit_gate: RwLock<()>,
    /// Serializes row creation so duplicate ids are caught before the WAL append.
    pub(super) create_gate: Mutex<()>,
    lock_timeout: Duration,
}

impl Engine {
    pub fn new(wal_path: PathBuf, lock_timeout: Duration) -> io::Result<Self> {
        let events = Wal::recover(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        // Replay into plain maps first; rows are wrapped in locks afterwards.
        let mut room_types = HashMap::new();
        let mut rooms: HashMap<Ulid, Room> = HashMap::new();
        let mut bookings: HashMap<Ulid, Booking> = HashMap::new();

        for event in &events {
            match event {
                Event::RoomTypeCreated { id, hotel_id, name } => {
                    room_types.insert(*id, RoomType { id: *id, hotel_id: *hotel_id, name: name.clone() });
                }
                Event::RoomCreated { id, hotel_id, room_type_id, number } => {
                    rooms.insert(*id, Room::new(*id, *hotel_id, *room_type_id, number.clone()));
                }
                Event::RoomUpdated { id, .. } => {
                    if let Some(room) = rooms.get_mut(id) {
                        apply_to_room(room, event);
                    }
                }
                Event::BookingCreated { id, hotel_id, room_type_id, stay, status } => {
                    bookings.insert(*id, Booking::new(*id, *hotel_id, *room_type_id, *stay, *status));
                }
                Event::BookingRestored { booking } => {
                    bookings.insert(booking.id, booking.clone());
                }
                Event::BookingStatusChanged { id, .. }
                | Event::GuestCheckedIn { id, .. }
                | Event::GuestCheckedOut { id, .. }
                | Event::RoomAssigned { booking_id: id, .. } => {
                    if let Some(booking) = bookings.get_mut(id) {
                        apply_to_booking(booking, event);
                    }
                }
            }
        }

        let room_assignments: DashMap<Ulid, Vec<(Ulid, StayRange)>> = DashMap::new();
        for booking in bookings.values() {
            if let Some(room_id) = booking.assigned_room_id {
                room_assignments.entry(room_id).or_default().push((booking.id, booking.stay));
            }
        }

        Ok(Self {
            room_types: room_types.into_iter().collect(),
            rooms: rooms
                .into_iter()
                .map(|(id, r)| (id, Arc::new(RwLock::new(r))))
                .collect(),
            bookings: bookings
                .into_iter()
                .map(|(id, b)| (id, Arc::new(RwLock::new(b))))
                .collect(),
            room_assignments,
            wal_tx,
            commit_gate: RwLock::new(()),
            create_gate: Mutex::new(()),
            lock_timeout,
        })
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// Durable append, then apply to the locked row. Nothing is applied if the append fails.
    pub(super) async fn persist_and_apply<T>(
        &self,
        row: &mut T,
        event: &Event,
        apply: fn(&mut T, &Event),
    ) -> Result<(), EngineError> {
        let _gate = self.commit_gate.read().await;
        self.wal_append(event).await?;
        apply(row, event);
        Ok(())
    }

    pub fn get_room_type(&self, id: &Ulid) -> Option<RoomType> {
        self.room_types.get(id).map(|e| e.value().clone())
    }

    pub(super) fn booking_row(&self, id: &Ulid) -> Option<SharedBooking> {
        self.bookings.get(id).map(|e| e.value().clone())
    }

    pub(super) fn room_row(&self, id: &Ulid) -> Option<SharedRoom> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    /// Bookings the index says are assigned to `room_id`. Advisory unless the room is locked.
    pub(super) fn assignments_for_room(&self, room_id: &Ulid) -> Vec<(Ulid, StayRange)> {
        self.room_assignments
            .get(room_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    pub(super) async fn lock_booking(&self, id: Ulid) -> Result<OwnedRwLockWriteGuard<Booking>, EngineError> {
        let row = self.booking_row(&id).ok_or(EngineError::NotFound(id))?;
        self.lock_row(row, "booking", id).await
    }

    pub(super) async fn lock_room(&self, id: Ulid) -> Result<OwnedRwLockWriteGuard<Room>, EngineError> {
        let row = self.room_row(&id).ok_or(EngineError::NotFound(id))?;
        self.lock_row(row, "room", id).await
    }

    /// Shared read of a row, bounded by the lock timeout like writes are.
    pub(super) async fn read_row<T: Clone>(
        &self,
        row: &RwLock<T>,
        kind: &'static str,
        id: Ulid,
    ) -> Result<T, EngineError> {
        match tokio::time::timeout(self.lock_timeout, row.read()).await {
            Ok(guard) => Ok((*guard).clone()),
            Err(_) => {
                warn!("read timeout on {kind} {id} after {:?}", self.lock_timeout);
                metrics::counter!(observability::ROW_LOCK_TIMEOUTS_TOTAL, "row" => kind).increment(1);
                Err(EngineError::LockTimeout { row: kind, id })
            }
        }
    }

    /// Exclusive row lock, bounded by the lock timeout.
    async fn lock_row<T>(
        &self,
        row: Arc<RwLock<T>>,
        kind: &'static str,
        id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<T>, EngineError> {
        let started = Instant::now();
        match tokio::time::timeout(self.lock_timeout, row.write_owned()).await {
            Ok(guard) => {
                metrics::histogram!(observability::ROW_LOCK_WAIT_SECONDS, "row" => kind)
                    .record(started.elapsed().as_secs_f64());
                Ok(guard)
            }
            Err(_) => {
                warn!("lock timeout on {kind} {id} after {:?}", self.lock_timeout);
                metrics::counter!(observability::ROW_LOCK_TIMEOUTS_TOTAL, "row" => kind).increment(1);
                Err(EngineError::LockTimeout { row: kind, id })
            }
        }
    }
}
