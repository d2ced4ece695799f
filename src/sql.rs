use chrono::NaiveDate;
use sqlparser::ast::{
    self, AssignmentTarget, Expr, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertRoomType {
        id: Ulid,
        hotel_id: Ulid,
        name: String,
    },
    InsertRoom {
        id: Ulid,
        hotel_id: Ulid,
        room_type_id: Ulid,
        number: String,
    },
    UpdateRoom {
        id: Ulid,
        patch: RoomPatch,
    },
    InsertBooking {
        id: Ulid,
        hotel_id: Ulid,
        room_type_id: Ulid,
        stay: StayRange,
        status: BookingStatus,
    },
    UpdateBookingStatus {
        id: Ulid,
        status: BookingStatus,
    },
    /// `at: None` means "now" on the server clock.
    CheckIn {
        id: Ulid,
        at: Option<Ms>,
    },
    CheckOut {
        id: Ulid,
        at: Option<Ms>,
    },
    AssignRoom {
        booking_id: Ulid,
        room_id: Ulid,
        notes: Option<String>,
    },
    SelectAvailableRooms {
        booking_id: Ulid,
    },
    SelectBooking {
        id: Ulid,
    },
    SelectRooms,
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table.relation, assignments, selection),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── INSERT ────────────────────────────────────────────────────

/// One VALUES row, addressable by column name when the statement lists
/// columns and by position otherwise.
struct InsertRow<'a> {
    columns: Vec<String>,
    values: &'a [Expr],
}

impl<'a> InsertRow<'a> {
    fn get(&self, name: &str, position: usize) -> Option<&'a Expr> {
        if self.columns.is_empty() {
            self.values.get(position)
        } else {
            let i = self.columns.iter().position(|c| c == name)?;
            self.values.get(i)
        }
    }

    fn require(&self, name: &'static str, position: usize) -> Result<&'a Expr, SqlError> {
        self.get(name, position).ok_or(SqlError::MissingColumn(name))
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;
    let columns: Vec<String> = insert.columns.iter().map(|c| c.value.to_lowercase()).collect();
    if !columns.is_empty() && columns.len() != values.len() {
        return Err(SqlError::WrongArity(columns.len(), values.len()));
    }
    let row = InsertRow { columns, values };

    match table.as_str() {
        "room_types" => Ok(Command::InsertRoomType {
            id: parse_ulid(row.require("id", 0)?)?,
            hotel_id: parse_ulid(row.require("hotel_id", 1)?)?,
            name: parse_text(row.require("name", 2)?)?,
        }),
        "rooms" => Ok(Command::InsertRoom {
            id: parse_ulid(row.require("id", 0)?)?,
            hotel_id: parse_ulid(row.require("hotel_id", 1)?)?,
            room_type_id: parse_ulid(row.require("room_type_id", 2)?)?,
            number: parse_text(row.require("number", 3)?)?,
        }),
        "bookings" => {
            let status = match row.get("status", 5) {
                Some(expr) => parse_booking_status(expr)?,
                None => BookingStatus::PendingPayment,
            };
            Ok(Command::InsertBooking {
                id: parse_ulid(row.require("id", 0)?)?,
                hotel_id: parse_ulid(row.require("hotel_id", 1)?)?,
                room_type_id: parse_ulid(row.require("room_type_id", 2)?)?,
                stay: StayRange::new(
                    parse_date(row.require("check_in", 3)?)?,
                    parse_date(row.require("check_out", 4)?)?,
                ),
                status,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    let id = extract_where_eq(selection, "id")?;

    let mut sets: Vec<(String, &Expr)> = Vec::with_capacity(assignments.len());
    for a in assignments {
        let column = match &a.target {
            AssignmentTarget::ColumnName(name) => {
                object_name_last(name).ok_or_else(|| SqlError::Parse("empty column name".into()))?
            }
            AssignmentTarget::Tuple(_) => return Err(SqlError::Unsupported("tuple assignment".into())),
        };
        sets.push((column, &a.value));
    }
    if sets.is_empty() {
        return Err(SqlError::Parse("UPDATE without SET".into()));
    }

    match table.as_str() {
        "rooms" => {
            let mut patch = RoomPatch::default();
            for (column, value) in sets {
                match column.as_str() {
                    "room_status" => patch.room_status = Some(parse_room_status(value)?),
                    "is_active" => patch.is_active = Some(parse_bool(value)?),
                    "is_out_of_order" => patch.is_out_of_order = Some(parse_bool(value)?),
                    "maintenance_required" => patch.maintenance_required = Some(parse_bool(value)?),
                    _ => return Err(SqlError::UnknownColumn(column)),
                }
            }
            Ok(Command::UpdateRoom { id, patch })
        }
        "bookings" => parse_booking_update(id, sets),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// A bookings UPDATE maps to exactly one lifecycle operation.
fn parse_booking_update(id: Ulid, sets: Vec<(String, &Expr)>) -> Result<Command, SqlError> {
    let mut notes = None;
    let mut command = None;

    for (column, value) in sets {
        let parsed = match column.as_str() {
            "assignment_notes" => {
                notes = Some(parse_text_or_null(value)?);
                continue;
            }
            "status" => Command::UpdateBookingStatus {
                id,
                status: parse_booking_status(value)?,
            },
            "checked_in_at" => Command::CheckIn { id, at: parse_timestamp(value)? },
            "checked_out_at" => Command::CheckOut { id, at: parse_timestamp(value)? },
            "assigned_room_id" => Command::AssignRoom {
                booking_id: id,
                room_id: parse_ulid(value)?,
                notes: None,
            },
            _ => return Err(SqlError::UnknownColumn(column)),
        };
        if command.replace(parsed).is_some() {
            return Err(SqlError::Unsupported(
                "bookings UPDATE may set only one of status, checked_in_at, checked_out_at, assigned_room_id".into(),
            ));
        }
    }

    match command {
        Some(Command::AssignRoom { booking_id, room_id, .. }) => Ok(Command::AssignRoom {
            booking_id,
            room_id,
            notes: notes.flatten(),
        }),
        Some(_) if notes.is_some() => Err(SqlError::Unsupported(
            "assignment_notes can only be set together with assigned_room_id".into(),
        )),
        Some(cmd) => Ok(cmd),
        None => Err(SqlError::MissingColumn("assigned_room_id")),
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;

    match table.as_str() {
        "available_rooms" => Ok(Command::SelectAvailableRooms {
            booking_id: extract_where_eq(&select.selection, "booking_id")?,
        }),
        "bookings" => Ok(Command::SelectBooking {
            id: extract_where_eq(&select.selection, "id")?,
        }),
        "rooms" => Ok(Command::SelectRooms),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<&[Expr], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [row] => Ok(row.as_slice()),
            [] => Err(SqlError::Parse("empty VALUES".into())),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

/// `WHERE <column> = <ulid>`, the only filter shape the tables accept.
fn extract_where_eq(selection: &Option<Expr>, column: &'static str) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter(column))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some(column) => parse_ulid(right),
        Expr::Nested(inner) => extract_where_eq(&Some((**inner).clone()), column),
        _ => Err(SqlError::MissingFilter(column)),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => {
            Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID {s:?}: {e}")))
        }
        Some(value) => Err(SqlError::Parse(format!("expected ULID string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

/// Strings, or bare numbers for columns like room numbers.
fn parse_text(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected text, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_text_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_text(expr).map(Some),
    }
}

/// ISO calendar date, e.g. `'2025-06-01'`.
fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_text(expr)?;
    NaiveDate::parse_from_str(&s, "%Y-%m-%d").map_err(|e| SqlError::Parse(format!("bad date {s:?}: {e}")))
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => {
                s.parse().map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected number, got {value}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

/// Epoch milliseconds, or `now()` for the server clock.
fn parse_timestamp(expr: &Expr) -> Result<Option<Ms>, SqlError> {
    if let Expr::Function(f) = expr
        && object_name_last(&f.name).as_deref() == Some("now")
    {
        return Ok(None);
    }
    parse_i64(expr).map(Some)
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    match extract_value(expr) {
        Some(Value::Boolean(b)) => Ok(*b),
        Some(Value::SingleQuotedString(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" => Ok(true),
            "false" | "f" | "0" => Ok(false),
            _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
        },
        Some(Value::Number(n, _)) => Ok(n != "0"),
        Some(value) => Err(SqlError::Parse(format!("expected bool, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_booking_status(expr: &Expr) -> Result<BookingStatus, SqlError> {
    let s = parse_text(expr)?;
    BookingStatus::parse(&s).ok_or_else(|| SqlError::Parse(format!("unknown booking status {s:?}")))
}

fn parse_room_status(expr: &Expr) -> Result<RoomStatus, SqlError> {
    let s = parse_text(expr)?;
    RoomStatus::parse(&s).ok_or_else(|| SqlError::Parse(format!("unknown room status {s:?}")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
    MissingColumn(&'static str),
    /// Column list and VALUES row differ in length: (columns, values).
    WrongArity(usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(c) => write!(f, "unknown column: {c}"),
            SqlError::MissingColumn(c) => write!(f, "missing column: {c}"),
            SqlError::WrongArity(columns, values) => {
                write!(f, "{columns} columns but {values} values")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: WHERE {col} = ..."),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const A: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const B: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";
    const C: &str = "01BX5ZZKBKACTAV9WEVGEMMVS0";

    fn ulid(s: &str) -> Ulid {
        Ulid::from_string(s).unwrap()
    }

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn insert_room_type() {
        let sql = format!("INSERT INTO room_types (id, hotel_id, name) VALUES ('{A}', '{B}', 'Deluxe King')");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertRoomType { id: ulid(A), hotel_id: ulid(B), name: "Deluxe King".into() }
        );
    }

    #[test]
    fn insert_room_accepts_numeric_number() {
        let sql = format!("INSERT INTO rooms (id, hotel_id, room_type_id, number) VALUES ('{A}', '{B}', '{C}', 101)");
        match parse_sql(&sql).unwrap() {
            Command::InsertRoom { number, room_type_id, .. } => {
                assert_eq!(number, "101");
                assert_eq!(room_type_id, ulid(C));
            }
            cmd => panic!("expected InsertRoom, got {cmd:?}"),
        }
    }

    #[test]
    fn insert_booking_defaults_to_pending_payment() {
        let sql = format!(
            "INSERT INTO bookings (id, hotel_id, room_type_id, check_in, check_out) VALUES ('{A}', '{B}', '{C}', '2025-06-01', '2025-06-03')"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertBooking {
                id: ulid(A),
                hotel_id: ulid(B),
                room_type_id: ulid(C),
                stay: StayRange::new(date("2025-06-01"), date("2025-06-03")),
                status: BookingStatus::PendingPayment,
            }
        );
    }

    #[test]
    fn insert_booking_columns_in_any_order() {
        let sql = format!(
            "INSERT INTO bookings (status, check_out, check_in, room_type_id, hotel_id, id) VALUES ('confirmed', '2025-06-03', '2025-06-01', '{C}', '{B}', '{A}')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertBooking { id, stay, status, .. } => {
                assert_eq!(id, ulid(A));
                assert_eq!(stay.check_in, date("2025-06-01"));
                assert_eq!(status, BookingStatus::Confirmed);
            }
            cmd => panic!("expected InsertBooking, got {cmd:?}"),
        }
    }

    #[test]
    fn insert_booking_bad_date() {
        let sql = format!(
            "INSERT INTO bookings (id, hotel_id, room_type_id, check_in, check_out) VALUES ('{A}', '{B}', '{C}', '2025-13-01', '2025-06-03')"
        );
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn insert_missing_column() {
        let sql = format!("INSERT INTO rooms (id, hotel_id, number) VALUES ('{A}', '{B}', '7')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingColumn("room_type_id"))));
    }

    #[test]
    fn insert_arity_mismatch() {
        let sql = format!("INSERT INTO room_types (id, hotel_id, name) VALUES ('{A}', '{B}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::WrongArity(3, 2))));
    }

    #[test]
    fn update_room_patch() {
        let sql = format!(
            "UPDATE rooms SET room_status = 'checkout_dirty', maintenance_required = true WHERE id = '{A}'"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::UpdateRoom {
                id: ulid(A),
                patch: RoomPatch {
                    room_status: Some(RoomStatus::CheckoutDirty),
                    maintenance_required: Some(true),
                    ..Default::default()
                },
            }
        );
    }

    #[test]
    fn update_room_unknown_column() {
        let sql = format!("UPDATE rooms SET floor = 3 WHERE id = '{A}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownColumn(c)) if c == "floor"));
    }

    #[test]
    fn assign_room_with_notes() {
        let sql = format!(
            "UPDATE bookings SET assigned_room_id = '{B}', assignment_notes = 'away from lift' WHERE id = '{A}'"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::AssignRoom { booking_id: ulid(A), room_id: ulid(B), notes: Some("away from lift".into()) }
        );
    }

    #[test]
    fn assign_room_null_notes() {
        let sql = format!("UPDATE bookings SET assignment_notes = NULL, assigned_room_id = '{B}' WHERE id = '{A}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::AssignRoom { booking_id: ulid(A), room_id: ulid(B), notes: None }
        );
    }

    #[test]
    fn booking_status_and_stamps() {
        let sql = format!("UPDATE bookings SET status = 'NO_SHOW' WHERE id = '{A}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::UpdateBookingStatus { id: ulid(A), status: BookingStatus::NoShow }
        );

        let sql = format!("UPDATE bookings SET checked_in_at = 1750000000000 WHERE id = '{A}'");
        assert_eq!(parse_sql(&sql).unwrap(), Command::CheckIn { id: ulid(A), at: Some(1_750_000_000_000) });

        let sql = format!("UPDATE bookings SET checked_out_at = now() WHERE id = '{A}'");
        assert_eq!(parse_sql(&sql).unwrap(), Command::CheckOut { id: ulid(A), at: None });
    }

    #[test]
    fn booking_update_rejects_mixed_operations() {
        let sql = format!("UPDATE bookings SET status = 'CANCELLED', assigned_room_id = '{B}' WHERE id = '{A}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));

        let sql = format!("UPDATE bookings SET status = 'CANCELLED', assignment_notes = 'x' WHERE id = '{A}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));

        let sql = format!("UPDATE bookings SET assignment_notes = 'x' WHERE id = '{A}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingColumn(_))));
    }

    #[test]
    fn update_requires_id_filter() {
        let sql = "UPDATE rooms SET is_active = false";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("id"))));
    }

    #[test]
    fn select_available_rooms() {
        let sql = format!("SELECT * FROM available_rooms WHERE booking_id = '{A}'");
        assert_eq!(parse_sql(&sql).unwrap(), Command::SelectAvailableRooms { booking_id: ulid(A) });

        let sql = "SELECT * FROM available_rooms";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("booking_id"))));
    }

    #[test]
    fn select_booking_and_rooms() {
        let sql = format!("SELECT * FROM bookings WHERE id = '{A}'");
        assert_eq!(parse_sql(&sql).unwrap(), Command::SelectBooking { id: ulid(A) });
        assert_eq!(parse_sql("SELECT * FROM rooms").unwrap(), Command::SelectRooms);
    }

    #[test]
    fn unknown_table_and_bad_ulid() {
        let sql = format!("INSERT INTO guests (id) VALUES ('{A}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownTable(t)) if t == "guests"));

        let sql = "SELECT * FROM bookings WHERE id = 'not-a-ulid'";
        assert!(matches!(parse_sql(sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn empty_and_unsupported() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
        assert!(matches!(parse_sql("DROP TABLE rooms"), Err(SqlError::Unsupported(_))));
    }
}
