use std::collections::HashMap;

use ulid::Ulid;

use crate::model::*;

use super::availability::available_rooms;
use super::{Engine, EngineError};

impl Engine {
    /// Rooms the booking could take right now, ordered by room number.
    ///
    /// Takes one read lock at a time, each bounded by the lock timeout, and
    /// never holds a map reference across an await.
    pub async fn list_available_rooms(&self, booking_id: Ulid) -> Result<Vec<RoomInfo>, EngineError> {
        let booking = self
            .get_booking(booking_id)
            .await?
            .ok_or(EngineError::NotFound(booking_id))?;

        let rows: Vec<_> = self.rooms.iter().map(|e| (*e.key(), e.value().clone())).collect();
        let mut candidates = Vec::new();
        for (id, row) in rows {
            let room = self.read_row(&row, "room", id).await?;
            if room.hotel_id == booking.hotel_id && room.room_type_id == booking.room_type_id {
                candidates.push(room);
            }
        }

        let mut room_bookings: HashMap<Ulid, Vec<Booking>> = HashMap::new();
        for room in &candidates {
            for (other_id, stay) in self.assignments_for_room(&room.id) {
                if other_id == booking.id || !stay.overlaps(&booking.stay) {
                    continue;
                }
                if let Some(other) = self.get_booking(other_id).await? {
                    room_bookings.entry(room.id).or_default().push(other);
                }
            }
        }

        Ok(available_rooms(&booking, &candidates, &room_bookings))
    }

    /// Point-in-time copy of a booking.
    pub async fn get_booking(&self, id: Ulid) -> Result<Option<Booking>, EngineError> {
        let Some(row) = self.booking_row(&id) else {
            return Ok(None);
        };
        self.read_row(&row, "booking", id).await.map(Some)
    }

    pub async fn get_room(&self, id: Ulid) -> Result<Option<Room>, EngineError> {
        let Some(row) = self.room_row(&id) else {
            return Ok(None);
        };
        self.read_row(&row, "room", id).await.map(Some)
    }

    /// Every room, ordered by number then id.
    pub async fn list_rooms(&self) -> Result<Vec<Room>, EngineError> {
        let rows: Vec<_> = self.rooms.iter().map(|e| (*e.key(), e.value().clone())).collect();
        let mut rooms = Vec::with_capacity(rows.len());
        for (id, row) in rows {
            rooms.push(self.read_row(&row, "room", id).await?);
        }
        rooms.sort_by(|a, b| a.number.cmp(&b.number).then(a.id.cmp(&b.id)));
        Ok(rooms)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn booking_count(&self) -> usize {
        self.bookings.len()
    }
}
