use std::collections::HashMap;

use ulid::Ulid;

use crate::model::*;

use super::conflict::find_conflicts;

// ── Room Availability ─────────────────────────────────────────────

/// Rooms that `booking` could be assigned to right now.
///
/// A room qualifies when it is in the booking's hotel, has the booking's room
/// type, is bookable and has no blocking overlap among `room_bookings`
/// (room id → bookings assigned to it). The booking's own current room counts
/// as available. Ordered by room number, then id.
///
/// Advisory only: the result can be stale by the time an assignment commits.
pub fn available_rooms<'a>(
    booking: &Booking,
    rooms: impl IntoIterator<Item = &'a Room>,
    room_bookings: &HashMap<Ulid, Vec<Booking>>,
) -> Vec<RoomInfo> {
    let mut free: Vec<&Room> = rooms
        .into_iter()
        .filter(|r| r.hotel_id == booking.hotel_id)
        .filter(|r| r.room_type_id == booking.room_type_id)
        .filter(|r| r.is_bookable())
        .filter(|r| {
            let assigned = room_bookings.get(&r.id).map(|v| v.as_slice()).unwrap_or(&[]);
            find_conflicts(r.id, &booking.stay, Some(booking.id), assigned).is_empty()
        })
        .collect();

    free.sort_by(|a, b| a.number.cmp(&b.number).then(a.id.cmp(&b.id)));
    free.into_iter()
        .map(|r| RoomInfo {
            room_id: r.id,
            room_number: r.number.clone(),
        })
        .collect()
}
