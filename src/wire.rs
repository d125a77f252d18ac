use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{AuthSource, DefaultServerParameterProvider, LoginInfo, Password, StartupHandler};
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
use pgwire::messages::data::DataRow;
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::engine::{Engine, EngineError};
use crate::host::HostManager;
use crate::model::*;
use crate::observability::{command_label, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command, SqlError};

pub struct CalslotHandler {
    hosts: Arc<HostManager>,
    query_parser: Arc<CalslotQueryParser>,
}

impl CalslotHandler {
    pub fn new(hosts: Arc<HostManager>) -> Self {
        Self {
            hosts,
            query_parser: Arc::new(CalslotQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.hosts
            .get_or_create(&db)
            .map_err(|e| user_error("08006", format!("host error: {e}")))
    }

    /// Parse, execute and record metrics for one statement.
    async fn run<C: ClientInfo>(&self, client: &C, query: &str) -> PgWireResult<Vec<Response>> {
        let engine = self.resolve_engine(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = command_label(&cmd);

        let started = Instant::now();
        let result = self.execute_command(&engine, cmd).await;
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        result
    }

    async fn execute_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::UpsertEventType { id, draft } => {
                if engine.get_event_type(&EventTypeRef::Id(id)).await.is_some() {
                    engine.update_event_type(id, draft).await.map_err(engine_err)?;
                } else {
                    engine.create_event_type(id, draft).await.map_err(engine_err)?;
                }
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DeleteEventType { id } => {
                engine.delete_event_type(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectEventTypes { filter } => {
                let event_types = match filter {
                    Some(target) => engine.get_event_type(&target).await.into_iter().collect(),
                    None => engine.list_event_types().await,
                };
                query_response(event_types_schema(), event_types.iter(), |enc, et| {
                    enc.encode_field(&et.id.to_string())?;
                    enc.encode_field(&et.title)?;
                    enc.encode_field(&et.slug)?;
                    enc.encode_field(&et.description)?;
                    enc.encode_field(&(et.duration as i32))?;
                    enc.encode_field(&(et.buffer as i32))
                })
            }
            Command::SaveWeeklySchedule { schedule } => {
                engine.save_weekly_schedule(schedule).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(7))])
            }
            Command::SelectWeeklySchedule => {
                let schedule = engine.schedule_or_default().await.map_err(engine_err)?;
                query_response(weekly_schedule_schema(), WEEKDAYS.iter(), |enc, weekday| {
                    let day = schedule.day(*weekday);
                    enc.encode_field(&weekday.to_string())?;
                    enc.encode_field(&day.enabled)?;
                    enc.encode_field(&day.start.map(|t| t.to_string()))?;
                    enc.encode_field(&day.end.map(|t| t.to_string()))?;
                    enc.encode_field(&schedule.timezone)
                })
            }
            Command::SaveDateOverrides { dates, payload } => {
                let count = dates.len();
                engine
                    .save_date_overrides(dates, payload)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(count))])
            }
            Command::DeleteDateOverride { date } => {
                engine.delete_date_override(date).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectDateOverrides { date } => {
                let overrides = match date {
                    Some(date) => engine.get_override(date).await.into_iter().collect(),
                    None => engine.list_overrides().await,
                };
                query_response(date_overrides_schema(), overrides.iter(), |enc, o| {
                    enc.encode_field(&o.date.to_string())?;
                    enc.encode_field(&o.enabled)?;
                    enc.encode_field(&o.start.map(|t| t.to_string()))?;
                    enc.encode_field(&o.end.map(|t| t.to_string()))?;
                    enc.encode_field(&o.reason)
                })
            }
            Command::InsertBooking(req) => {
                engine.create_booking(req).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::CancelBooking { id } => {
                engine.cancel_booking(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectBookings { tab } => {
                let now = engine.now_local().await;
                let bookings = engine
                    .list_bookings(tab.unwrap_or(BookingTab::Upcoming), now)
                    .await;
                query_response(bookings_schema(), bookings.iter(), |enc, info| {
                    let b = &info.booking;
                    enc.encode_field(&b.id.to_string())?;
                    enc.encode_field(&b.event_type_id.to_string())?;
                    enc.encode_field(&info.event_type_title)?;
                    enc.encode_field(&info.event_type_duration.map(|d| d as i32))?;
                    enc.encode_field(&b.name)?;
                    enc.encode_field(&b.email)?;
                    enc.encode_field(&b.date.to_string())?;
                    enc.encode_field(&b.start.to_string())?;
                    enc.encode_field(&b.end.to_string())?;
                    enc.encode_field(&b.status.as_str().to_string())?;
                    enc.encode_field(&b.created_at)
                })
            }
            Command::SelectBookedSlots { date } => {
                let slots = engine.list_booked_slots(date).await;
                query_response(booked_slots_schema(), slots.iter(), |enc, slot| {
                    enc.encode_field(&slot.booking_id.to_string())?;
                    enc.encode_field(&slot.start.to_string())?;
                    enc.encode_field(&slot.end.to_string())?;
                    enc.encode_field(&(slot.duration as i32))?;
                    enc.encode_field(&(slot.buffer as i32))
                })
            }
            Command::SelectSlots {
                event_type,
                date,
                format,
            } => {
                let today = engine.today().await;
                let slots = engine
                    .available_slots(date, &event_type, today, format)
                    .await
                    .map_err(engine_err)?;
                query_response(slots_schema(), slots.iter(), |enc, slot| enc.encode_field(slot))
            }
        }
    }
}

/// Build a single-result query response, one data row per item.
fn query_response<T>(
    schema: Vec<FieldInfo>,
    items: impl Iterator<Item = T>,
    mut encode: impl FnMut(&mut DataRowEncoder, T) -> PgWireResult<()>,
) -> PgWireResult<Vec<Response>> {
    let schema = Arc::new(schema);
    let rows: Vec<PgWireResult<DataRow>> = items
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(vec![Response::Query(QueryResponse::new(
        schema,
        stream::iter(rows),
    ))])
}

// ── Result schemas ───────────────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn event_types_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("title", Type::VARCHAR),
        field("slug", Type::VARCHAR),
        field("description", Type::VARCHAR),
        field("duration", Type::INT4),
        field("buffer", Type::INT4),
    ]
}

fn weekly_schedule_schema() -> Vec<FieldInfo> {
    vec![
        field("weekday", Type::VARCHAR),
        field("enabled", Type::BOOL),
        field("start", Type::VARCHAR),
        field("end", Type::VARCHAR),
        field("timezone", Type::VARCHAR),
    ]
}

fn date_overrides_schema() -> Vec<FieldInfo> {
    vec![
        field("date", Type::VARCHAR),
        field("enabled", Type::BOOL),
        field("start", Type::VARCHAR),
        field("end", Type::VARCHAR),
        field("reason", Type::VARCHAR),
    ]
}

fn bookings_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("event_type_id", Type::VARCHAR),
        field("event_type_title", Type::VARCHAR),
        field("event_type_duration", Type::INT4),
        field("name", Type::VARCHAR),
        field("email", Type::VARCHAR),
        field("date", Type::VARCHAR),
        field("start_time", Type::VARCHAR),
        field("end_time", Type::VARCHAR),
        field("status", Type::VARCHAR),
        field("created_at", Type::INT8),
    ]
}

fn booked_slots_schema() -> Vec<FieldInfo> {
    vec![
        field("booking_id", Type::VARCHAR),
        field("start_time", Type::VARCHAR),
        field("end_time", Type::VARCHAR),
        field("duration", Type::INT4),
        field("buffer", Type::INT4),
    ]
}

fn slots_schema() -> Vec<FieldInfo> {
    vec![field("slot", Type::VARCHAR)]
}

/// Table named after the first FROM keyword, lowercased.
fn select_table(sql: &str) -> Option<String> {
    let mut words = sql.split_whitespace();
    if !words.next()?.eq_ignore_ascii_case("SELECT") {
        return None;
    }
    words
        .skip_while(|w| !w.eq_ignore_ascii_case("FROM"))
        .nth(1)
        .map(|t| {
            t.trim_matches(|c: char| c == '"' || c == ';')
                .rsplit('.')
                .next()
                .unwrap_or_default()
                .to_lowercase()
        })
}

/// Row description for a statement, known before it runs.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    match select_table(sql).as_deref() {
        Some("event_types") => event_types_schema(),
        Some("weekly_schedule") => weekly_schedule_schema(),
        Some("date_overrides") => date_overrides_schema(),
        Some("bookings") => bookings_schema(),
        Some("booked_slots") => booked_slots_schema(),
        Some("slots") => slots_schema(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for CalslotHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        self.run(client, query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct CalslotQueryParser;

#[async_trait]
impl QueryParser for CalslotQueryParser {
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
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for CalslotHandler {
    type Statement = String;
    type QueryParser = CalslotQueryParser;

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
        self.run(client, &sql)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| user_error("XX000", "statement produced no response".into()))
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
            result_schema(&target.statement),
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
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
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

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
/// Highest index first, so `$1` never clobbers the prefix of `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let mut result = portal.statement.statement.to_string();
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&format!("${}", i + 1), &value);
    }
    result
}

// ── Factory ──────────────────────────────────────────────────────

/// Every login checks against the server password. The user name is ignored;
/// the database name picks the host.
#[derive(Debug)]
struct SharedPassword(String);

#[async_trait]
impl AuthSource for SharedPassword {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.0.as_bytes().to_vec()))
    }
}

pub struct CalslotFactory {
    handler: Arc<CalslotHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<SharedPassword, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl CalslotFactory {
    pub fn new(hosts: Arc<HostManager>, password: String) -> Self {
        Self {
            handler: Arc::new(CalslotHandler::new(hosts)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                SharedPassword(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for CalslotFactory {
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
    hosts: Arc<HostManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = CalslotFactory::new(hosts, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::Validation(_) => "22023",
        EngineError::Conflict(_) => "23P01",
        EngineError::NotFound(_) => "P0002",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(sqlstate(&e), e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}
