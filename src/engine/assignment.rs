use std::time::Instant;

use tokio::sync::OwnedRwLockWriteGuard;
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::now_ms;
use super::validator::assert_assignable;
use super::{apply_to_booking, Engine, EngineError};

/// What a successful `assign_room` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOutcome {
    Assigned,
    Reassigned,
    /// Booking already held this room; nothing written.
    Unchanged,
}

impl AssignOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignOutcome::Assigned => "assigned",
            AssignOutcome::Reassigned => "reassigned",
            AssignOutcome::Unchanged => "unchanged",
        }
    }
}

impl Engine {
    /// Bind `room_id` to `booking_id`, exactly once under concurrency.
    ///
    /// Locks the booking, then the room, then every other booking assigned to
    /// the room with an overlapping stay (ascending id). Validation runs again
    /// under those locks, so whichever of two racing callers commits second
    /// sees the first one's assignment and gets `ROOM_OVERLAP_CONFLICT`.
    ///
    /// Repeating an assignment that already holds is a no-op: same version,
    /// same audit fields, no WAL write. Any error leaves the booking untouched.
    pub async fn assign_room(
        &self,
        booking_id: Ulid,
        room_id: Ulid,
        actor: &str,
        notes: Option<String>,
    ) -> Result<Booking, EngineError> {
        let started = Instant::now();
        let result = self.assign_room_locked(booking_id, room_id, actor, notes).await;

        let outcome = match &result {
            Ok((_, outcome)) => outcome.as_str(),
            Err(e) => e.code().as_str(),
        };
        metrics::counter!(observability::ASSIGNMENTS_TOTAL, "outcome" => outcome).increment(1);
        metrics::histogram!(observability::ASSIGNMENT_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());

        result.map(|(booking, _)| booking)
    }

    async fn assign_room_locked(
        &self,
        booking_id: Ulid,
        room_id: Ulid,
        actor: &str,
        notes: Option<String>,
    ) -> Result<(Booking, AssignOutcome), EngineError> {
        if actor.is_empty() {
            return Err(EngineError::InvalidInput("actor is required"));
        }
        if actor.len() > MAX_ACTOR_LEN {
            return Err(EngineError::LimitExceeded("actor too long"));
        }
        if let Some(ref n) = notes
            && n.len() > MAX_NOTES_LEN {
                return Err(EngineError::LimitExceeded("assignment notes too long"));
            }

        // Fixed order: booking → room → conflict set.
        let mut booking = self.lock_booking(booking_id).await?;
        let room = self.lock_room(room_id).await?;
        let conflict_set = self.lock_conflict_set(booking_id, room_id, &booking.stay).await?;

        let room_type = self
            .get_room_type(&booking.room_type_id)
            .ok_or(EngineError::NotFound(booking.room_type_id))?;

        if let Err(e) = assert_assignable(
            &booking,
            &room_type,
            &room,
            conflict_set.iter().map(|guard| &**guard),
        ) {
            debug!("assignment of room {room_id} to booking {booking_id} rejected: {} ({e})", e.code());
            return Err(e.into());
        }

        if booking.assigned_room_id == Some(room_id) {
            debug!("booking {booking_id} already holds room {room_id}");
            return Ok((booking.clone(), AssignOutcome::Unchanged));
        }

        let previous_room = booking.assigned_room_id;
        let event = Event::RoomAssigned {
            booking_id,
            room_id,
            at: now_ms(),
            by: actor.to_string(),
            notes,
            reassigned: previous_room.is_some(),
        };
        self.persist_and_apply(&mut *booking, &event, apply_to_booking).await?;

        if let Some(prev) = previous_room
            && let Some(mut assigned) = self.room_assignments.get_mut(&prev) {
                assigned.retain(|(id, _)| *id != booking_id);
            }
        self.room_assignments
            .entry(room_id)
            .or_default()
            .push((booking_id, booking.stay));

        let outcome = match previous_room {
            Some(prev) => {
                info!(
                    "booking {booking_id} moved from room {prev} to {} by {actor} (version {})",
                    room.number, booking.assignment_version
                );
                AssignOutcome::Reassigned
            }
            None => {
                info!(
                    "booking {booking_id} assigned room {} by {actor} (version {})",
                    room.number, booking.assignment_version
                );
                AssignOutcome::Assigned
            }
        };
        Ok((booking.clone(), outcome))
    }

    /// Write-lock every other booking on `room_id` whose stay overlaps `stay`.
    ///
    /// Caller must hold the room's write lock: the index for a room only
    /// grows under that lock, so the set read here cannot gain members.
    async fn lock_conflict_set(
        &self,
        booking_id: Ulid,
        room_id: Ulid,
        stay: &StayRange,
    ) -> Result<Vec<OwnedRwLockWriteGuard<Booking>>, EngineError> {
        let mut ids: Vec<Ulid> = self
            .assignments_for_room(&room_id)
            .into_iter()
            .filter(|(id, other)| *id != booking_id && other.overlaps(stay))
            .map(|(id, _)| id)
            .collect();
        ids.sort();
        ids.dedup();

        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            guards.push(self.lock_booking(id).await?);
        }
        Ok(guards)
    }
}
