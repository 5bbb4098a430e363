use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{
    AuthSource, DefaultServerParameterProvider, LoginInfo, Password, StartupHandler,
};
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
use pgwire::tokio::{process_socket, TlsAcceptor};
use tokio::net::TcpStream;
use tracing::debug;

use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability::{command_label, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command, SqlError};

pub struct SlotkeepHandler {
    engine: Arc<Engine>,
    query_parser: Arc<SlotkeepQueryParser>,
}

fn inserted(rows: usize) -> Vec<Response> {
    vec![Response::Execution(Tag::new("INSERT").with_rows(rows))]
}

fn deleted(rows: usize) -> Vec<Response> {
    vec![Response::Execution(Tag::new("DELETE").with_rows(rows))]
}

impl SlotkeepHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(SlotkeepQueryParser),
        }
    }

    async fn execute(&self, sql: &str) -> PgWireResult<Vec<Response>> {
        let cmd = sql::parse_sql(sql).map_err(sql_err)?;
        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Vec<Response>> {
        let engine = &self.engine;
        match cmd {
            Command::InsertVendor { id, name } => {
                engine.create_vendor(id, name).await.map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::InsertWorkingHours {
                vendor_id,
                weekday,
                hours,
            } => {
                engine
                    .set_working_hours(vendor_id, weekday, hours)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::InsertService { vendor_id, service } => {
                engine.upsert_service(vendor_id, service).await.map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::InsertPackage { vendor_id, package } => {
                engine.upsert_package(vendor_id, package).await.map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::InsertStaff { vendor_id, id, name } => {
                engine.upsert_staff(vendor_id, id, name).await.map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::DeleteStaff { id } => {
                engine.remove_staff(id).await.map_err(engine_err)?;
                Ok(deleted(1))
            }
            Command::InsertStaffHours {
                staff_id,
                weekday,
                ranges,
            } => {
                let rows = ranges.len();
                engine
                    .set_staff_schedule(staff_id, weekday, ranges)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted(rows))
            }
            Command::InsertBlockedTime {
                id,
                staff_id,
                date,
                span,
            } => {
                engine
                    .block_time(id, staff_id, date, span)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::DeleteBlockedTime { id } => {
                engine.unblock_time(id).await.map_err(engine_err)?;
                Ok(deleted(1))
            }
            Command::InsertAppointment {
                vendor_id,
                appointment,
            } => {
                engine
                    .record_appointment(vendor_id, appointment)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::CancelAppointment { id } => {
                engine.cancel_appointment(id).await.map_err(engine_err)?;
                Ok(deleted(1))
            }
            Command::InsertLock { request } => {
                let grant = engine.acquire_lock(request).await.map_err(engine_err)?;
                Ok(vec![grant_response(&grant)?])
            }
            Command::InsertPackageLock { request } => {
                let grant = engine
                    .acquire_package_lock(request)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![grant_response(&grant)?])
            }
            Command::DeleteLock { id } => {
                let released = engine.release_lock(id).await.map_err(engine_err)?;
                Ok(deleted(usize::from(released)))
            }
            Command::InsertBooking { lock_id } => {
                let appointment = engine.confirm_lock(lock_id).await.map_err(engine_err)?;
                Ok(vec![appointments_response(std::slice::from_ref(&appointment))?])
            }
            Command::SelectSlots { query } => {
                let listing = engine.get_available_slots(&query).await.map_err(engine_err)?;
                Ok(vec![slots_response(&listing)?])
            }
            Command::SelectAppointments {
                vendor_id,
                date,
                staff_id,
            } => {
                let appointments = engine
                    .get_appointments(vendor_id, staff_id, date)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![appointments_response(&appointments)?])
            }
            Command::SelectLock { id } => {
                let now = engine.clock().now_ms();
                let lock = engine.get_lock(id).await;
                let vendor_id = engine.get_vendor_for_entity(&id);
                let rows: Vec<_> = lock
                    .iter()
                    .zip(vendor_id)
                    .map(|(lock, vendor_id)| {
                        let grant = LockGrant::from_lock(vendor_id, lock);
                        encode_grant(&grant, Some(lock.is_expired(now)))
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    Arc::new(lock_schema()),
                    stream::iter(rows),
                ))])
            }
            Command::SelectStaff { vendor_id } => {
                let staff = engine.list_staff(vendor_id).await.map_err(engine_err)?;
                let schema = Arc::new(staff_schema());
                let rows: Vec<PgWireResult<_>> = staff
                    .iter()
                    .map(|member| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&member.id.to_string())?;
                        encoder.encode_field(&member.name)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
        }
    }
}

// ── Result schemas ───────────────────────────────────────────────

fn text(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int8(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn slots_schema() -> Vec<FieldInfo> {
    vec![
        text("start"),
        text("end"),
        int8("duration"),
        int8("available_staff_count"),
        int8("fetched_at"),
    ]
}

fn lock_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("vendor_id"),
        text("staff_id"),
        text("date"),
        text("start"),
        text("end"),
        text("kind"),
        int8("expires_at"),
        text("appointment_id"),
        FieldInfo::new("expired".into(), None, None, Type::BOOL, FieldFormat::Text),
    ]
}

fn appointment_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("staff_id"),
        text("date"),
        text("start"),
        text("end"),
        text("status"),
        text("client_id"),
    ]
}

fn staff_schema() -> Vec<FieldInfo> {
    vec![text("id"), text("name")]
}

/// Schema for statements that return rows, keyed on the statement text.
fn schema_for(sql: &str) -> Vec<FieldInfo> {
    match sql::parse_sql(sql) {
        Ok(Command::SelectSlots { .. }) => slots_schema(),
        Ok(Command::SelectLock { .. } | Command::InsertLock { .. } | Command::InsertPackageLock { .. }) => {
            lock_schema()
        }
        Ok(Command::SelectAppointments { .. } | Command::InsertBooking { .. }) => appointment_schema(),
        Ok(Command::SelectStaff { .. }) => staff_schema(),
        _ => fallback_schema(sql),
    }
}

/// Unbound `$N` placeholders don't parse as values, so fall back to the table name.
fn fallback_schema(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    let select = upper.trim_start().starts_with("SELECT");
    if upper.contains("FROM SLOTS") {
        slots_schema()
    } else if upper.contains("INTO LOCKS")
        || upper.contains("INTO PACKAGE_LOCKS")
        || (select && upper.contains("FROM LOCKS"))
    {
        lock_schema()
    } else if upper.contains("INTO BOOKINGS") || (select && upper.contains("FROM APPOINTMENTS")) {
        appointment_schema()
    } else if select && upper.contains("FROM STAFF") {
        staff_schema()
    } else {
        vec![]
    }
}

fn slots_response(listing: &SlotListing) -> PgWireResult<Response> {
    let schema = Arc::new(slots_schema());
    let rows: Vec<PgWireResult<_>> = listing
        .slots
        .iter()
        .map(|slot| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&format_hhmm(slot.start))?;
            encoder.encode_field(&format_hhmm(slot.end))?;
            encoder.encode_field(&i64::from(slot.duration))?;
            encoder.encode_field(&slot.available_staff_count.map(i64::from))?;
            encoder.encode_field(&listing.fetched_at)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn encode_grant(
    grant: &LockGrant,
    expired: Option<bool>,
) -> PgWireResult<pgwire::messages::data::DataRow> {
    let mut encoder = DataRowEncoder::new(Arc::new(lock_schema()));
    encoder.encode_field(&grant.lock_id.to_string())?;
    encoder.encode_field(&grant.vendor_id.to_string())?;
    encoder.encode_field(&grant.staff_id.map(|s| s.to_string()))?;
    encoder.encode_field(&grant.date.to_string())?;
    encoder.encode_field(&format_hhmm(grant.span.start))?;
    encoder.encode_field(&format_hhmm(grant.span.end))?;
    let kind = match grant.kind {
        LockKind::Standard => "standard",
        LockKind::Package => "package",
    };
    encoder.encode_field(&kind)?;
    encoder.encode_field(&grant.expires_at)?;
    encoder.encode_field(&grant.appointment_id.to_string())?;
    encoder.encode_field(&expired.unwrap_or(false))?;
    Ok(encoder.take_row())
}

fn grant_response(grant: &LockGrant) -> PgWireResult<Response> {
    let row = encode_grant(grant, None)?;
    Ok(Response::Query(QueryResponse::new(
        Arc::new(lock_schema()),
        stream::iter(vec![Ok(row)]),
    )))
}

fn appointments_response(appointments: &[Appointment]) -> PgWireResult<Response> {
    let schema = Arc::new(appointment_schema());
    let rows: Vec<PgWireResult<_>> = appointments
        .iter()
        .map(|a| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&a.id.to_string())?;
            encoder.encode_field(&a.staff_id.map(|s| s.to_string()))?;
            encoder.encode_field(&a.date.to_string())?;
            encoder.encode_field(&format_hhmm(a.span.start))?;
            encoder.encode_field(&format_hhmm(a.span.end))?;
            encoder.encode_field(&a.status.as_str())?;
            encoder.encode_field(&a.client_id)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

#[async_trait]
impl SimpleQueryHandler for SlotkeepHandler {
    async fn do_query<C>(&self, _client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        debug!(query, "simple query");
        self.execute(query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct SlotkeepQueryParser;

#[async_trait]
impl QueryParser for SlotkeepQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(schema_for(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for SlotkeepHandler {
    type Statement = String;
    type QueryParser = SlotkeepQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
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
        let mut responses = self.execute(&sql).await?;
        Ok(responses.remove(0))
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
        Ok(DescribeStatementResponse::new(
            param_types,
            schema_for(&target.statement),
        ))
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
        Ok(DescribePortalResponse::new(schema_for(&substitute_params(target))))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start
                && let Ok(n) = sql[start..i].parse::<usize>()
            {
                max = max.max(n);
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
/// Highest index first so `$1` never clobbers the prefix of `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let mut result = portal.statement.statement.to_string();
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }
    result
}

// ── Factory ──────────────────────────────────────────────────────

/// Every user name logs in with the one server password.
#[derive(Debug)]
struct SharedPassword(Vec<u8>);

#[async_trait]
impl AuthSource for SharedPassword {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.0.clone()))
    }
}

pub struct SlotkeepFactory {
    handler: Arc<SlotkeepHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<SharedPassword, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl SlotkeepFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        Self {
            handler: Arc::new(SlotkeepHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                SharedPassword(password.into_bytes()),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for SlotkeepFactory {
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
    engine: Arc<Engine>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = SlotkeepFactory::new(engine, password);
    process_socket(socket, tls, factory).await
}

// ── Error mapping ────────────────────────────────────────────────

/// SQLSTATE for an engine error. Clients branch on these to decide whether
/// to re-select a slot, fix their input, or retry.
fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::Conflict { .. } => "23P01",
        EngineError::Expired(_) => "55000",
        EngineError::Validation(_) => "22023",
        EngineError::NotFound(_) => "02000",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::Resolution(_) => "42704",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::Timeout(_) => "57014",
        EngineError::Transport(_) => "08006",
        EngineError::WalError(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(&e).into(),
        e.to_string(),
    )))
}

fn sql_err(e: SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
