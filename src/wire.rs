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
    QueryResponse, Response,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::SpotlightAuthSource;
use crate::engine::{now_ms, EngineError};
use crate::model::{Photo, Slot};
use crate::observability::{command_label, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::schedule::{ScheduleRequest, ScheduleService};
use crate::sql::{self, Command};
use crate::timefmt::{format_ms, parse_timestamp};

pub struct SpotlightHandler {
    scheduler: Arc<ScheduleService>,
    query_parser: Arc<SpotlightQueryParser>,
}

impl SpotlightHandler {
    pub fn new(scheduler: Arc<ScheduleService>) -> Self {
        Self {
            scheduler,
            query_parser: Arc::new(SpotlightQueryParser),
        }
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Vec<Response>> {
        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.run_command(cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn run_command(&self, cmd: Command) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::InsertSlot {
                subject_name,
                message,
                start_time,
                photo,
            } => {
                let photo = photo
                    .as_deref()
                    .map(Photo::from_data_uri)
                    .transpose()
                    .map_err(|e| engine_err(EngineError::Validation(e)))?;
                let req = ScheduleRequest {
                    subject_name,
                    message,
                    start_time,
                    photo,
                };
                let slot = self.scheduler.schedule(req).await.map_err(engine_err)?;
                Ok(vec![admitted_response(&slot)?])
            }
            Command::SelectActive { as_of } => {
                let now = match as_of {
                    Some(raw) => parse_timestamp(&raw, self.scheduler.local_offset())
                        .map_err(|e| engine_err(EngineError::Validation(e)))?,
                    None => now_ms(),
                };
                let active = self
                    .scheduler
                    .engine()
                    .resolve_active(now)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![active_response(active.as_ref())?])
            }
        }
    }
}

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn active_schema() -> Vec<FieldInfo> {
    vec![
        text_field("subject_name"),
        text_field("message"),
        text_field("photo"),
        text_field("start_time"),
    ]
}

fn admitted_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("subject_name"),
        text_field("start_time"),
        text_field("end_time"),
    ]
}

/// Always one row. No active slot renders as empty name and message with
/// NULL photo and start time.
fn active_response(active: Option<&Slot>) -> PgWireResult<Response> {
    let schema = Arc::new(active_schema());
    let mut encoder = DataRowEncoder::new(schema.clone());
    match active {
        Some(slot) => {
            encoder.encode_field(&slot.subject_name)?;
            encoder.encode_field(&slot.message)?;
            encoder.encode_field(&slot.photo.as_ref().map(Photo::to_data_uri))?;
            encoder.encode_field(&Some(format_ms(slot.start())))?;
        }
        None => {
            encoder.encode_field(&String::new())?;
            encoder.encode_field(&String::new())?;
            encoder.encode_field(&None::<String>)?;
            encoder.encode_field(&None::<String>)?;
        }
    }
    let rows = vec![Ok(encoder.take_row())];
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn admitted_response(slot: &Slot) -> PgWireResult<Response> {
    let schema = Arc::new(admitted_schema());
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&slot.id.to_string())?;
    encoder.encode_field(&slot.subject_name)?;
    encoder.encode_field(&format_ms(slot.start()))?;
    encoder.encode_field(&format_ms(slot.end()))?;
    let rows = vec![Ok(encoder.take_row())];
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

/// Result columns for a statement, decided from its text so describe
/// messages can answer before anything executes.
fn schema_for(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    if upper.contains("ACTIVE_SLOT") {
        active_schema()
    } else if upper.contains("INSERT") && upper.contains("SLOTS") {
        admitted_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for SpotlightHandler {
    async fn do_query<C>(
        &self,
        _client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        self.execute_command(cmd).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct SpotlightQueryParser;

#[async_trait]
impl QueryParser for SpotlightQueryParser {
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
impl ExtendedQueryHandler for SpotlightHandler {
    type Statement = String;
    type QueryParser = SpotlightQueryParser;

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
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        let mut responses = self.execute_command(cmd).await?;
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
        Ok(DescribePortalResponse::new(schema_for(
            &target.statement.statement,
        )))
    }
}

enum SqlPiece<'a> {
    Text(&'a str),
    /// `$N` outside any string literal: the number and its raw text.
    Param(usize, &'a str),
}

/// Split `sql` into literal text and `$N` placeholders, ignoring anything
/// inside single-quoted strings.
fn split_placeholders(sql: &str) -> Vec<SqlPiece<'_>> {
    let mut pieces = Vec::new();
    let mut in_string = false;
    let mut last = 0;
    let mut chars = sql.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c == '\'' {
            // A doubled quote toggles twice and stays inside the literal.
            in_string = !in_string;
            continue;
        }
        if c != '$' || in_string {
            continue;
        }
        let digits_start = i + 1;
        let mut end = digits_start;
        while let Some(&(j, d)) = chars.peek() {
            if !d.is_ascii_digit() {
                break;
            }
            end = j + 1;
            chars.next();
        }
        if let Ok(n) = sql[digits_start..end].parse::<usize>() {
            pieces.push(SqlPiece::Text(&sql[last..i]));
            pieces.push(SqlPiece::Param(n, &sql[i..end]));
            last = end;
        }
    }
    pieces.push(SqlPiece::Text(&sql[last..]));
    pieces
}

/// Highest `$N` placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    split_placeholders(sql)
        .into_iter()
        .filter_map(|piece| match piece {
            SqlPiece::Param(n, _) => Some(n),
            SqlPiece::Text(_) => None,
        })
        .max()
        .unwrap_or(0)
}

/// Inline bound parameters (text format) as quoted literals in a single
/// pass over the statement. Inserted values are never rescanned, so a
/// message containing `$1` stays as written.
fn inline_params<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let mut out = String::with_capacity(sql.len());
    for piece in split_placeholders(sql) {
        match piece {
            SqlPiece::Text(text) => out.push_str(text),
            SqlPiece::Param(n, raw) => match n.checked_sub(1).and_then(|i| params.get(i)) {
                Some(Some(bytes)) => {
                    let value = String::from_utf8_lossy(bytes.as_ref());
                    out.push('\'');
                    out.push_str(&value.replace('\'', "''"));
                    out.push('\'');
                }
                Some(None) => out.push_str("NULL"),
                None => out.push_str(raw),
            },
        }
    }
    out
}

fn substitute_params(portal: &Portal<String>) -> String {
    inline_params(&portal.statement.statement, &portal.parameters)
}

// ── Factory ──────────────────────────────────────────────────────

pub struct SpotlightFactory {
    handler: Arc<SpotlightHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<SpotlightAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl SpotlightFactory {
    pub fn new(scheduler: Arc<ScheduleService>, password: String) -> Self {
        Self {
            handler: Arc::new(SpotlightHandler::new(scheduler)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                SpotlightAuthSource::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for SpotlightFactory {
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
    scheduler: Arc<ScheduleService>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = SpotlightFactory::new(scheduler, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

/// SQLSTATE per error class, so clients can tell "fix your input" from
/// "pick another time" from "try again".
fn engine_sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::Validation(_) => "22023",
        EngineError::Conflict(_) => "23P01",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::Storage(_) => "58000",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    if e.is_retryable() {
        tracing::warn!("storage failure: {e}");
    }
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        engine_sqlstate(&e).into(),
        e.to_string(),
    )))
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
