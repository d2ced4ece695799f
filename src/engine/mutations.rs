use std::sync::Arc;

use tokio::sync::{oneshot, RwLock};
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::validate_stay;
use super::{apply_to_booking, apply_to_room, Engine, EngineError, WalCommand};

impl Engine {
    pub async fn create_room_type(&self, id: Ulid, hotel_id: Ulid, name: String) -> Result<(), EngineError> {
        if name.is_empty() {
            return Err(EngineError::InvalidInput("room type name is required"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("room type name too long"));
        }

        let _create = self.create_gate.lock().await;
        if self.room_types.len() >= MAX_ROOM_TYPES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many room types"));
        }
        if self.room_types.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::RoomTypeCreated { id, hotel_id, name: name.clone() };
        // Gate held through the insert: compaction must see the row or not the event.
        let _gate = self.commit_gate.read().await;
        self.wal_append(&event).await?;
        self.room_types.insert(id, RoomType { id, hotel_id, name });
        Ok(())
    }

    pub async fn create_room(
        &self,
        id: Ulid,
        hotel_id: Ulid,
        room_type_id: Ulid,
        number: String,
    ) -> Result<Room, EngineError> {
        if number.is_empty() {
            return Err(EngineError::InvalidInput("room number is required"));
        }
        if number.len() > MAX_ROOM_NUMBER_LEN {
            return Err(EngineError::LimitExceeded("room number too long"));
        }

        let _create = self.create_gate.lock().await;
        if self.rooms.len() >= MAX_ROOMS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        if self.rooms.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if !self.room_types.contains_key(&room_type_id) {
            return Err(EngineError::NotFound(room_type_id));
        }

        let event = Event::RoomCreated { id, hotel_id, room_type_id, number: number.clone() };
        // Gate held through the insert: compaction must see the row or not the event.
        let _gate = self.commit_gate.read().await;
        self.wal_append(&event).await?;
        let room = Room::new(id, hotel_id, room_type_id, number);
        self.rooms.insert(id, Arc::new(RwLock::new(room.clone())));
        Ok(room)
    }

    /// Partial update of a room's condition. Absent fields keep their value.
    pub async fn update_room(&self, id: Ulid, patch: RoomPatch) -> Result<Room, EngineError> {
        if patch.is_empty() {
            return Err(EngineError::InvalidInput("nothing to update"));
        }
        let mut room = self.lock_room(id).await?;

        let event = Event::RoomUpdated {
            id,
            room_status: patch.room_status.unwrap_or(room.room_status),
            is_active: patch.is_active.unwrap_or(room.is_active),
            is_out_of_order: patch.is_out_of_order.unwrap_or(room.is_out_of_order),
            maintenance_required: patch.maintenance_required.unwrap_or(room.maintenance_required),
        };
        self.persist_and_apply(&mut *room, &event, apply_to_room).await?;
        debug!("room {} updated: {}", room.number, room.room_status);
        Ok(room.clone())
    }

    pub async fn create_booking(
        &self,
        id: Ulid,
        hotel_id: Ulid,
        room_type_id: Ulid,
        stay: StayRange,
        status: BookingStatus,
    ) -> Result<Booking, EngineError> {
        validate_stay(&stay)?;
        if !matches!(status, BookingStatus::PendingPayment | BookingStatus::Confirmed) {
            return Err(EngineError::InvalidInput(
                "bookings start as PENDING_PAYMENT or CONFIRMED",
            ));
        }

        let _create = self.create_gate.lock().await;
        if self.bookings.len() >= MAX_BOOKINGS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many bookings"));
        }
        if self.bookings.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if !self.room_types.contains_key(&room_type_id) {
            return Err(EngineError::NotFound(room_type_id));
        }

        let event = Event::BookingCreated { id, hotel_id, room_type_id, stay, status };
        // Gate held through the insert: compaction must see the row or not the event.
        let _gate = self.commit_gate.read().await;
        self.wal_append(&event).await?;
        let booking = Booking::new(id, hotel_id, room_type_id, stay, status);
        self.bookings.insert(id, Arc::new(RwLock::new(booking.clone())));
        Ok(booking)
    }

    pub async fn set_booking_status(&self, id: Ulid, status: BookingStatus) -> Result<Booking, EngineError> {
        let mut booking = self.lock_booking(id).await?;
        if booking.status == status {
            return Ok(booking.clone());
        }
        if !booking.status.can_transition_to(status) {
            return Err(EngineError::InvalidTransition {
                id,
                reason: format!("{} cannot become {}", booking.status, status),
            });
        }
        if booking.is_in_house() && matches!(status, BookingStatus::Cancelled | BookingStatus::NoShow) {
            return Err(EngineError::InvalidTransition {
                id,
                reason: format!("guest is in-house; cannot become {status}"),
            });
        }

        let event = Event::BookingStatusChanged { id, status };
        self.persist_and_apply(&mut *booking, &event, apply_to_booking).await?;
        info!("booking {id} is now {status}");
        Ok(booking.clone())
    }

    pub async fn check_in(&self, id: Ulid, at: Ms) -> Result<Booking, EngineError> {
        let mut booking = self.lock_booking(id).await?;
        if booking.status != BookingStatus::Confirmed {
            return Err(EngineError::InvalidTransition {
                id,
                reason: format!("cannot check in a {} booking", booking.status),
            });
        }
        if booking.assigned_room_id.is_none() {
            return Err(EngineError::InvalidTransition {
                id,
                reason: "no room assigned".into(),
            });
        }
        if booking.checked_in_at.is_some() {
            return Err(EngineError::InvalidTransition {
                id,
                reason: "already checked in".into(),
            });
        }

        let event = Event::GuestCheckedIn { id, at };
        self.persist_and_apply(&mut *booking, &event, apply_to_booking).await?;
        info!("booking {id} checked in");
        Ok(booking.clone())
    }

    pub async fn check_out(&self, id: Ulid, at: Ms) -> Result<Booking, EngineError> {
        let mut booking = self.lock_booking(id).await?;
        let Some(checked_in_at) = booking.checked_in_at else {
            return Err(EngineError::InvalidTransition {
                id,
                reason: "not checked in".into(),
            });
        };
        if booking.checked_out_at.is_some() {
            return Err(EngineError::InvalidTransition {
                id,
                reason: "already checked out".into(),
            });
        }
        if at < checked_in_at {
            return Err(EngineError::InvalidInput("checked_out_at precedes checked_in_at"));
        }

        let event = Event::GuestCheckedOut { id, at };
        self.persist_and_apply(&mut *booking, &event, apply_to_booking).await?;
        info!("booking {id} checked out");
        Ok(booking.clone())
    }

    /// Rewrite the WAL with only the events needed to rebuild current state.
    ///
    /// Holds the commit gate exclusively so no commit can land between the
    /// snapshot and the file swap. Rows are read with `try_read`: a row that is
    /// write-locked may be about to commit, so the round is skipped and
    /// `Ok(false)` returned rather than waiting on it.
    pub async fn compact_wal(&self) -> Result<bool, EngineError> {
        let _gate = self.commit_gate.write().await;
        let mut events = Vec::with_capacity(self.room_types.len() + self.rooms.len() + self.bookings.len());

        for entry in self.room_types.iter() {
            let rt = entry.value();
            events.push(Event::RoomTypeCreated {
                id: rt.id,
                hotel_id: rt.hotel_id,
                name: rt.name.clone(),
            });
        }

        let rooms: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        for row in rooms {
            let Ok(room) = row.try_read() else {
                debug!("compaction skipped: room row busy");
                return Ok(false);
            };
            events.push(Event::RoomCreated {
                id: room.id,
                hotel_id: room.hotel_id,
                room_type_id: room.room_type_id,
                number: room.number.clone(),
            });
            let fresh = Room::new(room.id, room.hotel_id, room.room_type_id, room.number.clone());
            if *room != fresh {
                events.push(Event::RoomUpdated {
                    id: room.id,
                    room_status: room.room_status,
                    is_active: room.is_active,
                    is_out_of_order: room.is_out_of_order,
                    maintenance_required: room.maintenance_required,
                });
            }
        }

        let bookings: Vec<_> = self.bookings.iter().map(|e| e.value().clone()).collect();
        for row in bookings {
            let Ok(booking) = row.try_read() else {
                debug!("compaction skipped: booking row busy");
                return Ok(false);
            };
            events.push(Event::BookingRestored { booking: booking.clone() });
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        info!("WAL compacted to {count} events");
        Ok(true)
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
