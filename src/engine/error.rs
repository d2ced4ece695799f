use serde::Serialize;
use ulid::Ulid;

use crate::model::BookingStatus;

/// Stable machine-readable error codes. Callers match on these, never on messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    HotelMismatch,
    RoomTypeHotelMismatch,
    BookingStatusNotAssignable,
    BookingAlreadyCheckedIn,
    RoomTypeMismatch,
    RoomNotBookable,
    RoomOverlapConflict,
    NotFound,
    AlreadyExists,
    InvalidTransition,
    InvalidInput,
    LockTimeout,
    LimitExceeded,
    WalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::HotelMismatch => "HOTEL_MISMATCH",
            ErrorCode::RoomTypeHotelMismatch => "ROOM_TYPE_HOTEL_MISMATCH",
            ErrorCode::BookingStatusNotAssignable => "BOOKING_STATUS_NOT_ASSIGNABLE",
            ErrorCode::BookingAlreadyCheckedIn => "BOOKING_ALREADY_CHECKED_IN",
            ErrorCode::RoomTypeMismatch => "ROOM_TYPE_MISMATCH",
            ErrorCode::RoomNotBookable => "ROOM_NOT_BOOKABLE",
            ErrorCode::RoomOverlapConflict => "ROOM_OVERLAP_CONFLICT",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::AlreadyExists => "ALREADY_EXISTS",
            ErrorCode::InvalidTransition => "INVALID_TRANSITION",
            ErrorCode::InvalidInput => "INVALID_INPUT",
            ErrorCode::LockTimeout => "LOCK_TIMEOUT",
            ErrorCode::LimitExceeded => "LIMIT_EXCEEDED",
            ErrorCode::WalError => "WAL_ERROR",
        }
    }

    /// SQLSTATE reported over the wire.
    pub fn sqlstate(&self) -> &'static str {
        match self {
            ErrorCode::HotelMismatch | ErrorCode::RoomTypeHotelMismatch => "23514",
            ErrorCode::BookingStatusNotAssignable
            | ErrorCode::RoomTypeMismatch
            | ErrorCode::RoomNotBookable
            | ErrorCode::InvalidTransition
            | ErrorCode::InvalidInput
            | ErrorCode::LimitExceeded => "22023",
            ErrorCode::BookingAlreadyCheckedIn => "55000",
            ErrorCode::RoomOverlapConflict => "23P01",
            ErrorCode::LockTimeout => "55P03",
            ErrorCode::NotFound => "P0002",
            ErrorCode::AlreadyExists => "23505",
            ErrorCode::WalError => "58030",
        }
    }

    /// Status an HTTP layer in front of this service should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::HotelMismatch
            | ErrorCode::RoomTypeHotelMismatch
            | ErrorCode::BookingStatusNotAssignable
            | ErrorCode::RoomTypeMismatch
            | ErrorCode::RoomNotBookable
            | ErrorCode::InvalidTransition
            | ErrorCode::InvalidInput
            | ErrorCode::LimitExceeded => 400,
            ErrorCode::NotFound => 404,
            ErrorCode::BookingAlreadyCheckedIn
            | ErrorCode::RoomOverlapConflict
            | ErrorCode::LockTimeout
            | ErrorCode::AlreadyExists => 409,
            ErrorCode::WalError => 500,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed assignment check. One variant per rule, in evaluation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignmentError {
    HotelMismatch {
        booking_hotel: Ulid,
        room_hotel: Ulid,
    },
    RoomTypeHotelMismatch {
        room_type_id: Ulid,
        room_type_hotel: Ulid,
        booking_hotel: Ulid,
    },
    BookingStatusNotAssignable(BookingStatus),
    BookingAlreadyCheckedIn(Ulid),
    RoomTypeMismatch {
        booking_room_type: Ulid,
        room_room_type: Ulid,
    },
    RoomNotBookable {
        room_id: Ulid,
        reasons: Vec<&'static str>,
    },
    RoomOverlapConflict {
        room_id: Ulid,
        conflicting_booking_ids: Vec<Ulid>,
    },
}

impl AssignmentError {
    pub fn code(&self) -> ErrorCode {
        match self {
            AssignmentError::HotelMismatch { .. } => ErrorCode::HotelMismatch,
            AssignmentError::RoomTypeHotelMismatch { .. } => ErrorCode::RoomTypeHotelMismatch,
            AssignmentError::BookingStatusNotAssignable(_) => ErrorCode::BookingStatusNotAssignable,
            AssignmentError::BookingAlreadyCheckedIn(_) => ErrorCode::BookingAlreadyCheckedIn,
            AssignmentError::RoomTypeMismatch { .. } => ErrorCode::RoomTypeMismatch,
            AssignmentError::RoomNotBookable { .. } => ErrorCode::RoomNotBookable,
            AssignmentError::RoomOverlapConflict { .. } => ErrorCode::RoomOverlapConflict,
        }
    }

    pub fn conflicting_booking_ids(&self) -> &[Ulid] {
        match self {
            AssignmentError::RoomOverlapConflict {
                conflicting_booking_ids,
                ..
            } => conflicting_booking_ids,
            _ => &[],
        }
    }
}

impl std::fmt::Display for AssignmentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssignmentError::HotelMismatch {
                booking_hotel,
                room_hotel,
            } => write!(
                f,
                "room belongs to hotel {room_hotel}, booking belongs to hotel {booking_hotel}"
            ),
            AssignmentError::RoomTypeHotelMismatch {
                room_type_id,
                room_type_hotel,
                booking_hotel,
            } => write!(
                f,
                "booking room type {room_type_id} belongs to hotel {room_type_hotel}, not {booking_hotel}"
            ),
            AssignmentError::BookingStatusNotAssignable(status) => {
                write!(f, "booking status {status} does not allow room assignment")
            }
            AssignmentError::BookingAlreadyCheckedIn(id) => {
                write!(f, "booking {id} is checked in; its room cannot change")
            }
            AssignmentError::RoomTypeMismatch {
                booking_room_type,
                room_room_type,
            } => write!(
                f,
                "room is of type {room_room_type}, booking requires {booking_room_type}"
            ),
            AssignmentError::RoomNotBookable { room_id, reasons } => {
                write!(f, "room {room_id} is not bookable: {}", reasons.join(", "))
            }
            AssignmentError::RoomOverlapConflict {
                room_id,
                conflicting_booking_ids,
            } => {
                let ids: Vec<String> = conflicting_booking_ids.iter().map(|id| id.to_string()).collect();
                write!(
                    f,
                    "room {room_id} is held by overlapping booking(s): {}",
                    ids.join(", ")
                )
            }
        }
    }
}

impl std::error::Error for AssignmentError {}

#[derive(Debug)]
pub enum EngineError {
    Assignment(AssignmentError),
    NotFound(Ulid),
    AlreadyExists(Ulid),
    InvalidTransition { id: Ulid, reason: String },
    InvalidInput(&'static str),
    LockTimeout { row: &'static str, id: Ulid },
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    pub fn code(&self) -> ErrorCode {
        match self {
            EngineError::Assignment(e) => e.code(),
            EngineError::NotFound(_) => ErrorCode::NotFound,
            EngineError::AlreadyExists(_) => ErrorCode::AlreadyExists,
            EngineError::InvalidTransition { .. } => ErrorCode::InvalidTransition,
            EngineError::InvalidInput(_) => ErrorCode::InvalidInput,
            EngineError::LockTimeout { .. } => ErrorCode::LockTimeout,
            EngineError::LimitExceeded(_) => ErrorCode::LimitExceeded,
            EngineError::WalError(_) => ErrorCode::WalError,
        }
    }

    pub fn conflicting_booking_ids(&self) -> &[Ulid] {
        match self {
            EngineError::Assignment(e) => e.conflicting_booking_ids(),
            _ => &[],
        }
    }
}

impl From<AssignmentError> for EngineError {
    fn from(e: AssignmentError) -> Self {
        EngineError::Assignment(e)
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Assignment(e) => write!(f, "{e}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::InvalidTransition { id, reason } => {
                write!(f, "booking {id}: {reason}")
            }
            EngineError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            EngineError::LockTimeout { row, id } => {
                write!(f, "timed out waiting for lock on {row} {id}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflicting_booking_ids: Option<Vec<Ulid>>,
}

/// Wire shape of an error: `{code, message, details}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StructuredError {
    pub code: ErrorCode,
    pub message: String,
    pub details: ErrorDetails,
}

impl StructuredError {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{}: {}", self.code, self.message))
    }
}

impl From<&EngineError> for StructuredError {
    fn from(e: &EngineError) -> Self {
        let ids = e.conflicting_booking_ids();
        Self {
            code: e.code(),
            message: e.to_string(),
            details: ErrorDetails {
                conflicting_booking_ids: (!ids.is_empty()).then(|| ids.to_vec()),
            },
        }
    }
}
