use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. Used for every instant (check-in, audit stamps).
pub type Ms = i64;

/// Half-open stay `[check_in, check_out)` in calendar dates.
///
/// The checkout day belongs to the next arrival: a stay ending on the 3rd
/// and one starting on the 3rd share no night.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StayRange {
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
}

impl StayRange {
    pub fn new(check_in: NaiveDate, check_out: NaiveDate) -> Self {
        Self { check_in, check_out }
    }

    pub fn nights(&self) -> i64 {
        (self.check_out - self.check_in).num_days()
    }

    pub fn is_empty(&self) -> bool {
        self.check_out <= self.check_in
    }

    pub fn overlaps(&self, other: &StayRange) -> bool {
        self.check_in < other.check_out && self.check_out > other.check_in
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    PendingPayment,
    Confirmed,
    Cancelled,
    Completed,
    NoShow,
}

impl BookingStatus {
    /// Statuses a room may be bound to.
    pub const ASSIGNABLE: &'static [BookingStatus] = &[BookingStatus::Confirmed];

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::PendingPayment => "PENDING_PAYMENT",
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::Cancelled => "CANCELLED",
            BookingStatus::Completed => "COMPLETED",
            BookingStatus::NoShow => "NO_SHOW",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING_PAYMENT" => Some(BookingStatus::PendingPayment),
            "CONFIRMED" => Some(BookingStatus::Confirmed),
            "CANCELLED" => Some(BookingStatus::Cancelled),
            "COMPLETED" => Some(BookingStatus::Completed),
            "NO_SHOW" => Some(BookingStatus::NoShow),
            _ => None,
        }
    }

    pub fn is_assignable(&self) -> bool {
        Self::ASSIGNABLE.contains(self)
    }

    /// Cancelled, completed and no-show bookings never hold inventory again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Cancelled | BookingStatus::Completed | BookingStatus::NoShow
        )
    }

    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (PendingPayment, Confirmed)
                | (PendingPayment, Cancelled)
                | (Confirmed, Cancelled)
                | (Confirmed, Completed)
                | (Confirmed, NoShow)
        )
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomStatus {
    ReadyForGuest,
    Occupied,
    CheckoutDirty,
    CleaningInProgress,
    OutOfOrder,
}

impl RoomStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomStatus::ReadyForGuest => "READY_FOR_GUEST",
            RoomStatus::Occupied => "OCCUPIED",
            RoomStatus::CheckoutDirty => "CHECKOUT_DIRTY",
            RoomStatus::CleaningInProgress => "CLEANING_IN_PROGRESS",
            RoomStatus::OutOfOrder => "OUT_OF_ORDER",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "READY_FOR_GUEST" => Some(RoomStatus::ReadyForGuest),
            "OCCUPIED" => Some(RoomStatus::Occupied),
            "CHECKOUT_DIRTY" => Some(RoomStatus::CheckoutDirty),
            "CLEANING_IN_PROGRESS" => Some(RoomStatus::CleaningInProgress),
            "OUT_OF_ORDER" => Some(RoomStatus::OutOfOrder),
            _ => None,
        }
    }
}

impl std::fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomType {
    pub id: Ulid,
    pub hotel_id: Ulid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: Ulid,
    pub hotel_id: Ulid,
    pub room_type_id: Ulid,
    pub number: String,
    pub room_status: RoomStatus,
    pub is_active: bool,
    pub is_out_of_order: bool,
    pub maintenance_required: bool,
}

impl Room {
    /// A fresh room: ready, active, in order, no maintenance flagged.
    pub fn new(id: Ulid, hotel_id: Ulid, room_type_id: Ulid, number: String) -> Self {
        Self {
            id,
            hotel_id,
            room_type_id,
            number,
            room_status: RoomStatus::ReadyForGuest,
            is_active: true,
            is_out_of_order: false,
            maintenance_required: false,
        }
    }

    /// Every reason this room cannot receive an assignment. Empty means bookable.
    pub fn bookability_issues(&self) -> Vec<&'static str> {
        let mut issues = Vec::new();
        if self.room_status != RoomStatus::ReadyForGuest {
            issues.push("room status is not READY_FOR_GUEST");
        }
        if !self.is_active {
            issues.push("room is inactive");
        }
        if self.is_out_of_order {
            issues.push("room is out of order");
        }
        if self.maintenance_required {
            issues.push("room requires maintenance");
        }
        issues
    }

    pub fn is_bookable(&self) -> bool {
        self.room_status == RoomStatus::ReadyForGuest
            && self.is_active
            && !self.is_out_of_order
            && !self.maintenance_required
    }
}

/// Partial update of a room's condition; `None` keeps the current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoomPatch {
    pub room_status: Option<RoomStatus>,
    pub is_active: Option<bool>,
    pub is_out_of_order: Option<bool>,
    pub maintenance_required: Option<bool>,
}

impl RoomPatch {
    pub fn is_empty(&self) -> bool {
        *self == RoomPatch::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub hotel_id: Ulid,
    pub room_type_id: Ulid,
    pub stay: StayRange,
    pub status: BookingStatus,
    pub assigned_room_id: Option<Ulid>,
    pub checked_in_at: Option<Ms>,
    pub checked_out_at: Option<Ms>,
    pub room_assigned_at: Option<Ms>,
    pub room_assigned_by: Option<String>,
    pub room_reassigned_at: Option<Ms>,
    pub room_reassigned_by: Option<String>,
    pub assignment_notes: Option<String>,
    /// How many times the room binding changed. Audit only, not a CAS token.
    pub assignment_version: u32,
}

impl Booking {
    pub fn new(id: Ulid, hotel_id: Ulid, room_type_id: Ulid, stay: StayRange, status: BookingStatus) -> Self {
        Self {
            id,
            hotel_id,
            room_type_id,
            stay,
            status,
            assigned_room_id: None,
            checked_in_at: None,
            checked_out_at: None,
            room_assigned_at: None,
            room_assigned_by: None,
            room_reassigned_at: None,
            room_reassigned_by: None,
            assignment_notes: None,
            assignment_version: 0,
        }
    }

    /// Guest has checked in and not yet checked out. Derived, never stored.
    pub fn is_in_house(&self) -> bool {
        self.checked_in_at.is_some() && self.checked_out_at.is_none()
    }
}

/// WAL record format. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomTypeCreated {
        id: Ulid,
        hotel_id: Ulid,
        name: String,
    },
    RoomCreated {
        id: Ulid,
        hotel_id: Ulid,
        room_type_id: Ulid,
        number: String,
    },
    RoomUpdated {
        id: Ulid,
        room_status: RoomStatus,
        is_active: bool,
        is_out_of_order: bool,
        maintenance_required: bool,
    },
    BookingCreated {
        id: Ulid,
        hotel_id: Ulid,
        room_type_id: Ulid,
        stay: StayRange,
        status: BookingStatus,
    },
    BookingStatusChanged {
        id: Ulid,
        status: BookingStatus,
    },
    GuestCheckedIn {
        id: Ulid,
        at: Ms,
    },
    GuestCheckedOut {
        id: Ulid,
        at: Ms,
    },
    RoomAssigned {
        booking_id: Ulid,
        room_id: Ulid,
        at: Ms,
        by: String,
        notes: Option<String>,
        /// True when the booking already held a different room.
        reassigned: bool,
    },
    /// Full row image written by compaction; replays to the exact same booking.
    BookingRestored {
        booking: Booking,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomInfo {
    pub room_id: Ulid,
    pub room_number: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn stay(a: &str, b: &str) -> StayRange {
        StayRange::new(d(a), d(b))
    }

    #[test]
    fn stay_basics() {
        let s = stay("2025-06-01", "2025-06-03");
        assert_eq!(s.nights(), 2);
        assert!(!s.is_empty());
        assert!(stay("2025-06-03", "2025-06-03").is_empty());
        assert!(stay("2025-06-04", "2025-06-03").is_empty());
    }

    #[test]
    fn stay_overlap() {
        let a = stay("2025-01-01", "2025-01-03");
        let adjacent = stay("2025-01-03", "2025-01-05");
        let crossing = stay("2025-01-02", "2025-01-04");
        assert!(!a.overlaps(&adjacent)); // checkout day is resellable
        assert!(!adjacent.overlaps(&a));
        assert!(a.overlaps(&crossing));
        assert!(crossing.overlaps(&a));
    }

    #[test]
    fn stay_overlap_containment() {
        let outer = stay("2025-03-01", "2025-03-10");
        let inner = stay("2025-03-04", "2025-03-05");
        assert!(outer.overlaps(&inner));
        assert!(inner.overlaps(&outer));
        assert!(outer.overlaps(&outer));
    }

    #[test]
    fn in_house_is_derived_from_timestamps() {
        let mut b = Booking::new(
            Ulid::new(),
            Ulid::new(),
            Ulid::new(),
            stay("2025-06-01", "2025-06-03"),
            BookingStatus::Confirmed,
        );
        assert!(!b.is_in_house());
        b.checked_in_at = Some(1_000);
        assert!(b.is_in_house());
        b.checked_out_at = Some(2_000);
        assert!(!b.is_in_house());
    }

    #[test]
    fn new_room_is_bookable() {
        let room = Room::new(Ulid::new(), Ulid::new(), Ulid::new(), "101".into());
        assert!(room.is_bookable());
        assert!(room.bookability_issues().is_empty());
    }

    #[test]
    fn bookability_issues_lists_every_reason() {
        let mut room = Room::new(Ulid::new(), Ulid::new(), Ulid::new(), "102".into());
        room.room_status = RoomStatus::CheckoutDirty;
        room.is_active = false;
        room.is_out_of_order = true;
        room.maintenance_required = true;
        assert!(!room.is_bookable());
        assert_eq!(room.bookability_issues().len(), 4);
    }

    #[test]
    fn each_flag_alone_makes_room_unbookable() {
        let base = Room::new(Ulid::new(), Ulid::new(), Ulid::new(), "103".into());

        let mut r = base.clone();
        r.maintenance_required = true;
        assert!(!r.is_bookable());

        let mut r = base.clone();
        r.is_out_of_order = true;
        assert!(!r.is_bookable());

        let mut r = base.clone();
        r.is_active = false;
        assert!(!r.is_bookable());

        let mut r = base;
        r.room_status = RoomStatus::Occupied;
        assert!(!r.is_bookable());
    }

    #[test]
    fn status_transitions() {
        use BookingStatus::*;
        assert!(PendingPayment.can_transition_to(Confirmed));
        assert!(PendingPayment.can_transition_to(Cancelled));
        assert!(Confirmed.can_transition_to(NoShow));
        assert!(Confirmed.can_transition_to(Completed));
        assert!(!Cancelled.can_transition_to(Confirmed));
        assert!(!Completed.can_transition_to(Confirmed));
        assert!(!PendingPayment.can_transition_to(Completed));
        assert!(Cancelled.is_terminal());
        assert!(!Confirmed.is_terminal());
    }

    #[test]
    fn only_confirmed_is_assignable() {
        assert!(BookingStatus::Confirmed.is_assignable());
        assert!(!BookingStatus::PendingPayment.is_assignable());
        assert!(!BookingStatus::NoShow.is_assignable());
    }

    #[test]
    fn status_names_parse_back() {
        for s in [
            BookingStatus::PendingPayment,
            BookingStatus::Confirmed,
            BookingStatus::Cancelled,
            BookingStatus::Completed,
            BookingStatus::NoShow,
        ] {
            assert_eq!(BookingStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(BookingStatus::parse("confirmed"), Some(BookingStatus::Confirmed));
        assert_eq!(BookingStatus::parse("BOOKED"), None);
        assert_eq!(RoomStatus::parse("checkout_dirty"), Some(RoomStatus::CheckoutDirty));
        assert_eq!(RoomStatus::parse("MAINTENANCE_REQUIRED"), None);
    }

    #[test]
    fn status_serializes_as_screaming_snake() {
        let json = serde_json::to_string(&BookingStatus::PendingPayment).unwrap();
        assert_eq!(json, "\"PENDING_PAYMENT\"");
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::RoomAssigned {
            booking_id: Ulid::new(),
            room_id: Ulid::new(),
            at: 1_717_200_000_000,
            by: "frontdesk".into(),
            notes: Some("late arrival".into()),
            reassigned: false,
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);

        let created = Event::BookingCreated {
            id: Ulid::new(),
            hotel_id: Ulid::new(),
            room_type_id: Ulid::new(),
            stay: stay("2025-06-01", "2025-06-03"),
            status: BookingStatus::Confirmed,
        };
        let bytes = bincode::serialize(&created).unwrap();
        assert_eq!(bincode::deserialize::<Event>(&bytes).unwrap(), created);
    }
}
