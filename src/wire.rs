use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tracing::debug;

use crate::auth::RoomlockAuthSource;
use crate::engine::{now_ms, Engine, EngineError, StructuredError};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, SqlError};
use crate::tenant::TenantManager;

pub struct RoomlockHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<RoomlockQueryParser>,
}

impl RoomlockHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(RoomlockQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("tenant error: {e}"),
            )))
        })
    }

    /// Staff identity recorded on assignments: the connection's login user.
    fn actor<C: ClientInfo>(client: &C) -> String {
        client
            .metadata()
            .get("user")
            .cloned()
            .unwrap_or_else(|| "unknown".to_string())
    }

    async fn run<C: ClientInfo>(&self, client: &C, query: &str) -> PgWireResult<Response> {
        let engine = self.resolve_engine(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();

        let result = self.execute_command(&engine, &Self::actor(client), cmd).await;

        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, engine: &Engine, actor: &str, cmd: Command) -> PgWireResult<Response> {
        match cmd {
            Command::InsertRoomType { id, hotel_id, name } => {
                engine.create_room_type(id, hotel_id, name).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_oid(0).with_rows(1)))
            }
            Command::InsertRoom { id, hotel_id, room_type_id, number } => {
                engine
                    .create_room(id, hotel_id, room_type_id, number)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_oid(0).with_rows(1)))
            }
            Command::UpdateRoom { id, patch } => {
                engine.update_room(id, patch).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::InsertBooking { id, hotel_id, room_type_id, stay, status } => {
                engine
                    .create_booking(id, hotel_id, room_type_id, stay, status)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_oid(0).with_rows(1)))
            }
            Command::UpdateBookingStatus { id, status } => {
                engine.set_booking_status(id, status).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::CheckIn { id, at } => {
                engine
                    .check_in(id, at.unwrap_or_else(now_ms))
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::CheckOut { id, at } => {
                engine
                    .check_out(id, at.unwrap_or_else(now_ms))
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::AssignRoom { booking_id, room_id, notes } => {
                let booking = engine
                    .assign_room(booking_id, room_id, actor, notes)
                    .await
                    .map_err(engine_err)?;
                booking_response(vec![booking])
            }
            Command::SelectBooking { id } => {
                let booking = engine.get_booking(id).await.map_err(engine_err)?;
                booking_response(booking.into_iter().collect())
            }
            Command::SelectAvailableRooms { booking_id } => {
                let rooms = engine.list_available_rooms(booking_id).await.map_err(engine_err)?;
                let schema = Arc::new(available_rooms_schema());
                let rows: Vec<PgWireResult<_>> = rooms
                    .into_iter()
                    .map(|room| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&room.room_id.to_string())?;
                        encoder.encode_field(&room.room_number)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::SelectRooms => {
                let rooms = engine.list_rooms().await.map_err(engine_err)?;
                let schema = Arc::new(rooms_schema());
                let rows: Vec<PgWireResult<_>> = rooms
                    .into_iter()
                    .map(|room| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&room.id.to_string())?;
                        encoder.encode_field(&room.hotel_id.to_string())?;
                        encoder.encode_field(&room.room_type_id.to_string())?;
                        encoder.encode_field(&room.number)?;
                        encoder.encode_field(&room.room_status.as_str())?;
                        encoder.encode_field(&room.is_active)?;
                        encoder.encode_field(&room.is_out_of_order)?;
                        encoder.encode_field(&room.maintenance_required)?;
                        encoder.encode_field(&room.is_bookable())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
        }
    }
}

fn booking_response(bookings: Vec<Booking>) -> PgWireResult<Response> {
    let schema = Arc::new(booking_schema());
    let rows: Vec<PgWireResult<_>> = bookings
        .into_iter()
        .map(|b| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&b.id.to_string())?;
            encoder.encode_field(&b.hotel_id.to_string())?;
            encoder.encode_field(&b.room_type_id.to_string())?;
            encoder.encode_field(&b.stay.check_in.to_string())?;
            encoder.encode_field(&b.stay.check_out.to_string())?;
            encoder.encode_field(&b.status.as_str())?;
            encoder.encode_field(&b.assigned_room_id.map(|id| id.to_string()))?;
            encoder.encode_field(&b.checked_in_at)?;
            encoder.encode_field(&b.checked_out_at)?;
            encoder.encode_field(&b.room_assigned_at)?;
            encoder.encode_field(&b.room_assigned_by)?;
            encoder.encode_field(&b.room_reassigned_at)?;
            encoder.encode_field(&b.room_reassigned_by)?;
            encoder.encode_field(&b.assignment_notes)?;
            encoder.encode_field(&(b.assignment_version as i64))?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn booking_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("hotel_id", Type::VARCHAR),
        field("room_type_id", Type::VARCHAR),
        field("check_in", Type::VARCHAR),
        field("check_out", Type::VARCHAR),
        field("status", Type::VARCHAR),
        field("assigned_room_id", Type::VARCHAR),
        field("checked_in_at", Type::INT8),
        field("checked_out_at", Type::INT8),
        field("room_assigned_at", Type::INT8),
        field("room_assigned_by", Type::VARCHAR),
        field("room_reassigned_at", Type::INT8),
        field("room_reassigned_by", Type::VARCHAR),
        field("assignment_notes", Type::VARCHAR),
        field("assignment_version", Type::INT8),
    ]
}

fn available_rooms_schema() -> Vec<FieldInfo> {
    vec![field("room_id", Type::VARCHAR), field("room_number", Type::VARCHAR)]
}

fn rooms_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("hotel_id", Type::VARCHAR),
        field("room_type_id", Type::VARCHAR),
        field("number", Type::VARCHAR),
        field("room_status", Type::VARCHAR),
        field("is_active", Type::BOOL),
        field("is_out_of_order", Type::BOOL),
        field("maintenance_required", Type::BOOL),
        field("bookable", Type::BOOL),
    ]
}

/// Row shape a statement produces, decided from its text alone so it works
/// before parameters are bound.
fn statement_schema(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    let head = upper.trim_start();
    if upper.contains("AVAILABLE_ROOMS") {
        available_rooms_schema()
    } else if upper.contains("BOOKINGS")
        && (head.starts_with("SELECT") || (head.starts_with("UPDATE") && upper.contains("ASSIGNED_ROOM_ID")))
    {
        booking_schema()
    } else if head.starts_with("SELECT") && upper.contains("ROOMS") {
        rooms_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for RoomlockHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(vec![self.run(client, query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct RoomlockQueryParser;

#[async_trait]
impl QueryParser for RoomlockQueryParser {
    type Statement = String;

    async fn parse_sql<C>(&self, _client: &C, sql: &str, _types: &[Option<Type>]) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(&self, stmt: &String, _column_format: Option<&Format>) -> PgWireResult<Vec<FieldInfo>> {
        Ok(statement_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for RoomlockHandler {
    type Statement = String;
    type QueryParser = RoomlockQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = substitute_params(portal);
        self.run(client, &sql).await
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(param_types, statement_schema(&target.statement)))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(statement_schema(&target.statement.statement)))
    }
}

/// Highest `$N` placeholder in the statement.
fn count_params(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if let Ok(n) = sql[start..i].parse::<usize>() {
            max = max.max(n);
        }
    }
    max
}

fn substitute_params(portal: &Portal<String>) -> String {
    inline_params(&portal.statement.statement, &portal.parameters)
}

/// Inline text-format parameters as quoted literals in one left-to-right
/// pass over the statement. Bound values are emitted, never rescanned, so a
/// value containing `$1` stays as sent. Placeholders inside string literals
/// and indexes with no bound value are left alone.
fn inline_params<P: AsRef<[u8]>>(sql: &str, params: &[Option<P>]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.char_indices().peekable();
    let mut in_literal = false;

    while let Some((i, c)) = chars.next() {
        if c == '\'' {
            in_literal = !in_literal;
        }
        if c != '$' || in_literal {
            out.push(c);
            continue;
        }

        let mut end = i + 1;
        while let Some(&(j, digit)) = chars.peek() {
            if !digit.is_ascii_digit() {
                break;
            }
            end = j + 1;
            chars.next();
        }

        let bound = sql[i + 1..end]
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|idx| params.get(idx));
        match bound {
            Some(Some(bytes)) => {
                let text = String::from_utf8_lossy(bytes.as_ref());
                out.push('\'');
                out.push_str(&text.replace('\'', "''"));
                out.push('\'');
            }
            Some(None) => out.push_str("NULL"),
            None => out.push_str(&sql[i..end]),
        }
    }
    out
}

// ── Factory ──────────────────────────────────────────────────────

pub struct RoomlockFactory {
    handler: Arc<RoomlockHandler>,
    auth_handler: Arc<CleartextPasswordAuthStartupHandler<RoomlockAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl RoomlockFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        Self {
            handler: Arc::new(RoomlockHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                RoomlockAuthSource::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for RoomlockFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = Arc::new(RoomlockFactory::new(tenant_manager, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

/// Engine errors go out with the code's SQLSTATE and the structured error
/// JSON as the message, so clients can read `code` and `details` back.
fn engine_err(e: EngineError) -> PgWireError {
    let (sqlstate, message) = engine_error_parts(&e);
    debug!("query failed: {}: {e}", e.code());
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), sqlstate.into(), message)))
}

fn engine_error_parts(e: &EngineError) -> (&'static str, String) {
    (e.code().sqlstate(), StructuredError::from(e).to_json())
}

fn sql_err(e: SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{AssignmentError, ErrorCode};
    use ulid::Ulid;

    fn bound(values: &[Option<&str>]) -> Vec<Option<Vec<u8>>> {
        values.iter().map(|v| v.map(|s| s.as_bytes().to_vec())).collect()
    }

    #[test]
    fn bound_values_are_not_rescanned() {
        let sql = "UPDATE bookings SET assigned_room_id = $2, assignment_notes = $3 WHERE id = $1";
        let params = bound(&[Some("B"), Some("R"), Some("minibar $1 extra, $2 deposit")]);
        assert_eq!(
            inline_params(sql, &params),
            "UPDATE bookings SET assigned_room_id = 'R', assignment_notes = 'minibar $1 extra, $2 deposit' WHERE id = 'B'"
        );
    }

    #[test]
    fn inlining_handles_quotes_nulls_and_wide_indexes() {
        let mut values: Vec<Option<&str>> = vec![Some("x"); 9];
        values.push(Some("ten"));
        let params = bound(&values);
        assert_eq!(inline_params("SELECT $10, $1", &params), "SELECT 'ten', 'x'");

        let params = bound(&[Some("O'Brien"), None]);
        assert_eq!(inline_params("SELECT $1, $2", &params), "SELECT 'O''Brien', NULL");

        // Unbound index, bare dollar and a placeholder-looking literal pass through.
        assert_eq!(inline_params("SELECT $3, $, '$1'", &params), "SELECT $3, $, '$1'");
    }

    #[test]
    fn counts_highest_placeholder() {
        assert_eq!(count_params("SELECT * FROM rooms"), 0);
        assert_eq!(count_params("UPDATE bookings SET assigned_room_id = $2 WHERE id = $1"), 2);
        assert_eq!(count_params("SELECT $10, $3"), 10);
        assert_eq!(count_params("SELECT '$'"), 0);
    }

    #[test]
    fn schema_follows_statement_shape() {
        let names = |s: Vec<FieldInfo>| s.iter().map(|f| f.name().to_string()).collect::<Vec<_>>();

        assert_eq!(
            names(statement_schema("SELECT * FROM available_rooms WHERE booking_id = $1")),
            vec!["room_id", "room_number"]
        );
        assert_eq!(
            statement_schema("update bookings set assigned_room_id = $2 where id = $1").len(),
            booking_schema().len()
        );
        assert_eq!(statement_schema("SELECT * FROM bookings WHERE id = $1").len(), 15);
        assert_eq!(statement_schema("SELECT * FROM rooms").len(), 9);
        assert!(statement_schema("UPDATE bookings SET status = 'CANCELLED' WHERE id = $1").is_empty());
        assert!(statement_schema("UPDATE rooms SET is_active = false WHERE id = $1").is_empty());
    }

    #[test]
    fn engine_errors_carry_sqlstate_and_json() {
        let a = Ulid::new();
        let err = EngineError::from(AssignmentError::RoomOverlapConflict {
            room_id: Ulid::new(),
            conflicting_booking_ids: vec![a],
        });
        let (sqlstate, message) = engine_error_parts(&err);
        assert_eq!(sqlstate, ErrorCode::RoomOverlapConflict.sqlstate());
        let json: serde_json::Value = serde_json::from_str(&message).unwrap();
        assert_eq!(json["code"], "ROOM_OVERLAP_CONFLICT");
        assert_eq!(json["details"]["conflictingBookingIds"][0], a.to_string());

        let (sqlstate, _) = engine_error_parts(&EngineError::NotFound(a));
        assert_eq!(sqlstate, "P0002");
    }
}
