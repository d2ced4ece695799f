use crate::model::*;

use super::conflict::find_conflicts;
use super::error::AssignmentError;

/// Check whether `room` may be bound to `booking`.
///
/// Rules run in a fixed order and the first failure wins:
/// hotel scope, room-type/hotel integrity, booking status, in-house,
/// room type, bookability, overlap with `room_bookings`.
///
/// `booking_room_type` is the room type row the booking points at;
/// `room_bookings` are the bookings currently assigned to `room`.
/// Never writes, so it is safe both for advisory checks and under lock.
pub fn assert_assignable<'a>(
    booking: &Booking,
    booking_room_type: &RoomType,
    room: &Room,
    room_bookings: impl IntoIterator<Item = &'a Booking>,
) -> Result<(), AssignmentError> {
    if room.hotel_id != booking.hotel_id {
        return Err(AssignmentError::HotelMismatch {
            booking_hotel: booking.hotel_id,
            room_hotel: room.hotel_id,
        });
    }

    if booking_room_type.hotel_id != booking.hotel_id {
        return Err(AssignmentError::RoomTypeHotelMismatch {
            room_type_id: booking_room_type.id,
            room_type_hotel: booking_room_type.hotel_id,
            booking_hotel: booking.hotel_id,
        });
    }

    if !booking.status.is_assignable() {
        return Err(AssignmentError::BookingStatusNotAssignable(booking.status));
    }

    if booking.is_in_house() {
        return Err(AssignmentError::BookingAlreadyCheckedIn(booking.id));
    }

    if room.room_type_id != booking.room_type_id {
        return Err(AssignmentError::RoomTypeMismatch {
            booking_room_type: booking.room_type_id,
            room_room_type: room.room_type_id,
        });
    }

    let reasons = room.bookability_issues();
    if !reasons.is_empty() {
        return Err(AssignmentError::RoomNotBookable {
            room_id: room.id,
            reasons,
        });
    }

    let conflicts = find_conflicts(room.id, &booking.stay, Some(booking.id), room_bookings);
    if !conflicts.is_empty() {
        return Err(AssignmentError::RoomOverlapConflict {
            room_id: room.id,
            conflicting_booking_ids: conflicts.iter().map(|b| b.id).collect(),
        });
    }

    Ok(())
}
