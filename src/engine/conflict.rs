use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

pub(crate) fn validate_stay(stay: &StayRange) -> Result<(), EngineError> {
    if stay.is_empty() {
        return Err(EngineError::InvalidInput("check_out must be after check_in"));
    }
    if stay.nights() > MAX_STAY_NIGHTS {
        return Err(EngineError::LimitExceeded("stay too long"));
    }
    Ok(())
}

/// Whether a booking currently holds its room.
///
/// Confirmed and not departed, or physically in-house. Cancelled, completed
/// and no-show bookings never block, whatever their timestamps say.
pub fn is_blocking(booking: &Booking) -> bool {
    if booking.status.is_terminal() {
        return false;
    }
    let confirmed_not_departed =
        booking.status == BookingStatus::Confirmed && booking.checked_out_at.is_none();
    confirmed_not_departed || booking.is_in_house()
}

/// Half-open overlap: back-to-back stays do not collide.
pub fn overlaps(a: &StayRange, b: &StayRange) -> bool {
    a.check_in < b.check_out && a.check_out > b.check_in
}

/// Blocking bookings assigned to `room_id` whose stay overlaps `stay`,
/// skipping `exclude` (the booking under test). Sorted by id.
pub fn find_conflicts<'a>(
    room_id: Ulid,
    stay: &StayRange,
    exclude: Option<Ulid>,
    candidates: impl IntoIterator<Item = &'a Booking>,
) -> Vec<&'a Booking> {
    let mut conflicts: Vec<&Booking> = candidates
        .into_iter()
        .filter(|b| Some(b.id) != exclude)
        .filter(|b| b.assigned_room_id == Some(room_id))
        .filter(|b| is_blocking(b))
        .filter(|b| overlaps(&b.stay, stay))
        .collect();
    conflicts.sort_by_key(|b| b.id);
    conflicts.dedup_by_key(|b| b.id);
    conflicts
}
