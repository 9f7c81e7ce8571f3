//! A single connection to Mariadb/Mysql
//!
//! Every operation takes `&mut self`, so exactly one command runs at a time.
//! The futures returned are cancel safe in the sense that dropping one leaves
//! the connection in a state recorded in [ConnectionState], from which
//! [Connection::discard] (or the next command after it) brings it back to idle.
use std::{
    collections::{HashMap, VecDeque},
    mem::ManuallyDrop,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, warn};

use crate::{
    args::Args,
    buffer_pool::{BufferPool, Buffers},
    charset::Charset,
    codec::{BinaryWidth, NullBitmap, binary_width, decode_binary_value},
    command::{
        PreparedStatement, check_params, put_close, put_execute, put_long_data, put_set_option,
        put_simple, quote_xid,
    },
    constants::{MAX_PACKAGE_PAYLOAD, client, com, error_code, status},
    decode::Column,
    error::{
        ConnectionError, ConnectionErrorContent, ConnectionResult, Retry, WithLoc,
        parse_mysql_error, protocol_error,
    },
    handshake::{handshake, open_transport},
    logger::{self, LocalInfileProvider, QueryEnd, SqlLogger},
    options::{ConnectionOptions, QueryOptions},
    package_parser::PackageParser,
    packet_io::{PacketIo, Transport},
    packets::{OkPacket, SessionChange, parse_column_definition, parse_eof, parse_ok, parse_prepare_ok},
    param::{LONG_DATA_CHUNK, Param},
    resultset::Resultsets,
    row::{Row, RowMode},
    text::decode_text_value,
    value::Value,
};

/// Size of the packages a local infile is uploaded in
const INFILE_CHUNK: usize = 1 << 16;

/// Prefix of the savepoints used for nested transactions
const SAVEPOINT_PREFIX: &str = "_qusql_savepoint_";

/// Compute string to begin transaction
fn begin_transaction_query(depth: usize) -> String {
    match depth {
        0 => "BEGIN".to_string(),
        v => format!("SAVEPOINT {SAVEPOINT_PREFIX}{v}"),
    }
}

/// Compute string to commit transaction
fn commit_transaction_query(depth: usize) -> String {
    match depth {
        0 => "COMMIT".to_string(),
        v => format!("RELEASE SAVEPOINT {SAVEPOINT_PREFIX}{v}"),
    }
}

/// Compute string to rollback transaction
fn rollback_transaction_query(depth: usize) -> String {
    match depth {
        0 => "ROLLBACK".to_string(),
        v => format!("ROLLBACK TO SAVEPOINT {SAVEPOINT_PREFIX}{v}"),
    }
}

/// Parse a time zone offset like `+02:00` into seconds east of UTC
fn parse_time_zone_offset(v: &str) -> Option<i32> {
    let (sign, rest) = match v.as_bytes().first()? {
        b'+' => (1, &v[1..]),
        b'-' => (-1, &v[1..]),
        _ => return None,
    };
    let (h, m) = rest.split_once(':')?;
    let h: u8 = h.parse().ok()?;
    let m: u8 = m.parse().ok()?;
    if h > 14 || m >= 60 {
        return None;
    }
    Some(sign * (i32::from(h) * 3600 + i32::from(m) * 60))
}

/// Internal state of the connection, used to resume dropped operations
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ConnectionState {
    /// No command is in progress
    Idle,
    /// Composed packages are waiting to be sent
    Send,
    /// Reading the responses to commands prepended to the main command
    ReadAck,
    /// Reading the first package of a response
    ReadHead,
    /// Uploading a local infile
    InfileUpload,
    /// An infile package is composed and must be sent, `last` if it is the terminator
    InfileSend {
        /// The empty terminator was composed
        last: bool,
    },
    /// Reading column definitions
    ReadColumns {
        /// Definitions left to read
        left: u64,
    },
    /// Reading the EOF following the column definitions
    ColumnsEof,
    /// Reading rows
    Rows,
    /// The last column of the current row is being streamed
    LongColumn {
        /// Bytes of the column left on the wire
        left: u64,
    },
    /// Another result set follows the one just finished
    MoreResultsets,
    /// Reading the parameter and column definitions of a prepare response
    PrepareDefs {
        /// Definitions and EOF packages left to read
        left: u32,
    },
    /// Streaming long data for a statement to the server
    LongData {
        /// The statement the data is for
        stmt_id: u32,
    },
    /// The connection failed and cannot be recovered
    Error,
}

/// The state of a connection as seen from the outside
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Ready for a new command
    Idle,
    /// Ready for a new command, and handed out from a pool
    IdleInPool,
    /// A command is in progress
    Querying,
    /// Rows of the current result set have not been read
    HasMoreRows,
    /// Another result set is waiting to be read
    HasMoreResultsets,
    /// The connection is broken
    Error,
    /// The connection was canceled through a [CancelHandle]
    Terminated,
}

/// Cancel a connection from another task
///
/// Once canceled new commands fail with [ConnectionErrorContent::Canceled], and reads
/// of rows return that error once and then report no more data
#[derive(Clone, Debug)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    /// Cancel the connection
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// True if [Self::cancel] has been called
    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// How to end a connection
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndMode {
    /// Reset the session so that the connection can be reused
    Recycle,
    /// Close the connection
    Close,
}

/// The outcome of [Connection::end]
pub enum Ended {
    /// The session was reset and the connection can be reused
    Recycled(Connection),
    /// The connection was closed, the buffers can be reused
    Closed(Buffers),
}

/// What kind of command the response being read belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CommandKind {
    /// COM_QUERY, text rows and local infile
    Query,
    /// COM_STMT_EXECUTE, binary rows
    Execute,
    /// COM_STMT_PREPARE
    Prepare,
    /// Any other command answered by OK or ERR
    Other,
}

/// A command prepended to the main command whose response is read first
#[derive(Debug)]
enum Ack {
    /// COM_INIT_DB to the schema
    InitDb(String),
    /// COM_SET_OPTION to the multi statement mode
    SetOption(bool),
}

/// Where reading a response stopped
enum Head {
    /// An OK package, stored in [Connection::ok]
    Ok,
    /// Column definitions, rows follow
    Columns,
    /// A statement was prepared
    Prepared(PreparedStatement),
}

/// Partially read prepare response
#[derive(Default)]
struct PrepareProgress {
    /// Server id of the statement
    stmt_id: u32,
    /// Number of placeholders
    num_params: usize,
    /// Placeholder definitions read so far
    params: Vec<Column>,
    /// Column definitions read so far
    columns: Vec<Column>,
}

/// A connection to Mariadb/Mysql
pub struct Connection {
    /// Package reader and writer
    io: PacketIo,
    /// The current state of the connection
    state: ConnectionState,
    /// The connection was handed out from a pool and has not been used since
    fresh_from_pool: bool,
    /// Human readable server version
    server_version: String,
    /// Id of the connection on the server
    connection_id: u32,
    /// Negotiated capabilities
    capabilities: u32,
    /// Status flags of the last OK or EOF package
    status_flags: u16,
    /// The current schema
    schema: Option<String>,
    /// The schema connected to, restored on recycle
    initial_schema: Option<String>,
    /// Character set results are decoded with
    charset: Charset,
    /// The session time zone, if the server reported it
    time_zone: Option<String>,
    /// The session time zone offset in seconds, if it is a fixed offset
    time_zone_offset: Option<i32>,
    /// Multi statements are enabled on the server
    multi_statements: bool,
    /// Multi statement mode used when a query does not ask for one
    default_multi_statements: bool,
    /// Columns of the current result set
    columns: Vec<Column>,
    /// Names of the columns of the current result set
    column_names: Vec<String>,
    /// Shape of rows returned
    row_mode: RowMode,
    /// Return json as text
    raw_json: bool,
    /// The kind of command being read
    command: CommandKind,
    /// Prepended commands whose responses have not been read
    acks: VecDeque<Ack>,
    /// Error to return once the main response has been read
    deferred: Option<ConnectionError>,
    /// Statements to close with the next command
    pending_closes: Vec<u32>,
    /// Statements prepared in this generation, by id, with their serial
    live: HashMap<u32, u64>,
    /// Serial of the next statement prepared
    next_serial: u64,
    /// Incremented when a session reset invalidates all statements
    generation: u64,
    /// The prepare response being read
    prepare: PrepareProgress,
    /// Current transaction depth
    transaction_depth: usize,
    /// Number of transactions to roll back before the next command
    cleanup_rollbacks: usize,
    /// The XA transaction in progress
    xa: Option<(String, XaPhase)>,
    /// The last OK package read
    ok: Option<OkPacket>,
    /// The file being uploaded for local infile
    infile: Option<Box<dyn AsyncRead + Unpin + Send>>,
    /// Buffer used for infile and long data uploads
    upload_buf: Vec<u8>,
    /// Set by [CancelHandle::cancel]
    cancel: Arc<AtomicBool>,
    /// [ConnectionErrorContent::Canceled] has been returned to a reader
    cancel_reported: bool,
    /// SQL run after connect and recycle
    init_sql: Option<String>,
    /// Provider for local infile requests
    local_infile: Option<Arc<dyn LocalInfileProvider>>,
    /// Observer of statements
    logger: Option<Arc<dyn SqlLogger>>,
    /// Values longer than this are returned as NULL
    max_column_length: usize,
    /// Values longer than this are an error
    max_field_length: usize,
    /// Pool the buffers are returned to on close
    buffer_pool: Option<Arc<BufferPool>>,
    #[cfg(feature = "cancel_testing")]
    /// Return TestCancelled after this many awaits
    cancel_count: Option<usize>,
}

/// The phase of an XA transaction
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum XaPhase {
    /// Started and not yet ended
    Active,
    /// Ended and prepared
    Prepared,
}

/// Ignore server errors with the given codes
fn ignore_codes(r: ConnectionResult<()>, codes: &[u16]) -> ConnectionResult<()> {
    match r {
        Err(e) if e.code().is_some_and(|c| codes.contains(&c)) => Ok(()),
        r => r,
    }
}

impl Connection {
    /// Connect to Mariadb/Mysql at [ConnectionOptions::address]
    ///
    /// The returned future is cancel safe
    pub async fn connect(options: &ConnectionOptions<'_>) -> ConnectionResult<Self> {
        // safety-cancel: It is safe to drop this future since it does not mute shared state
        let connect = async {
            let transport = open_transport(&options.address).await?;
            Self::connect_inner(transport, options).await
        };
        match options.connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, connect)
                .await
                .map_err(|_| ConnectionError::from(ConnectionErrorContent::ConnectTimeout))?,
            None => connect.await,
        }
    }

    /// Connect over an already established transport
    pub async fn connect_with_transport(
        transport: impl Transport + 'static,
        options: &ConnectionOptions<'_>,
    ) -> ConnectionResult<Self> {
        let connect = Self::connect_inner(Box::new(transport), options);
        match options.connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, connect)
                .await
                .map_err(|_| ConnectionError::from(ConnectionErrorContent::ConnectTimeout))?,
            None => connect.await,
        }
    }

    /// Handshake and run the configured cleanup and init sql
    async fn connect_inner(
        transport: Box<dyn Transport>,
        options: &ConnectionOptions<'_>,
    ) -> ConnectionResult<Self> {
        let buffers = match &options.buffer_pool {
            Some(pool) => pool.take(),
            None => Buffers::new(),
        };
        let mut io = PacketIo::new(transport, buffers);
        let session = handshake(&mut io, options).await?;
        let schema = options.database.as_ref().map(|v| v.to_string());
        let mut conn = Connection {
            io,
            state: ConnectionState::Idle,
            fresh_from_pool: false,
            server_version: session.server_version,
            connection_id: session.connection_id,
            capabilities: session.capabilities,
            status_flags: session.status_flags,
            initial_schema: schema.clone(),
            schema,
            charset: Charset::Utf8,
            time_zone: None,
            time_zone_offset: None,
            multi_statements: options.multi_statements,
            default_multi_statements: options.multi_statements,
            columns: Vec::new(),
            column_names: Vec::new(),
            row_mode: RowMode::default(),
            raw_json: false,
            command: CommandKind::Other,
            acks: VecDeque::new(),
            deferred: None,
            pending_closes: Vec::new(),
            live: HashMap::new(),
            next_serial: 0,
            generation: 0,
            prepare: PrepareProgress::default(),
            transaction_depth: 0,
            cleanup_rollbacks: 0,
            xa: None,
            ok: None,
            infile: None,
            upload_buf: Vec::new(),
            cancel: Arc::new(AtomicBool::new(false)),
            cancel_reported: false,
            init_sql: options.init_sql.as_ref().map(|v| v.to_string()),
            local_infile: options.local_infile.clone(),
            logger: options.logger.clone(),
            max_column_length: options.max_column_length,
            max_field_length: options.max_field_length,
            buffer_pool: options.buffer_pool.clone(),
            #[cfg(feature = "cancel_testing")]
            cancel_count: None,
        };
        debug!(
            connection_id = conn.connection_id,
            server_version = %conn.server_version,
            "connected"
        );

        for id in &options.kill_connections {
            let r = conn.run_internal(&format!("KILL {id}")).await;
            ignore_codes(r, &[error_code::NO_SUCH_THREAD])?;
        }
        for xid in &options.rollback_xa {
            let xid = conn.quote_xid(xid);
            let r = conn.run_internal(&format!("XA ROLLBACK {xid}")).await;
            ignore_codes(r, &[error_code::XAER_NOTA])?;
        }
        if let Some(sql) = conn.init_sql.clone() {
            conn.run_internal(&sql).await?;
        }
        if let Some(l) = &conn.logger {
            logger::check(
                "connect",
                l.connect(conn.connection_id, &conn.server_version),
            );
        }
        Ok(conn)
    }

    /// Can be called self.cancel_count times
    /// before it returns Err(ConnectionError::TestCancelled)
    ///
    /// This is used to to test that that we can properly recover
    /// from dropped futures
    #[inline]
    fn test_cancel(&mut self) -> ConnectionResult<()> {
        #[cfg(feature = "cancel_testing")]
        if let Some(v) = &mut self.cancel_count {
            if *v == 0 {
                return Err(ConnectionErrorContent::TestCancelled.into());
            }
            *v -= 1;
        }
        Ok(())
    }

    /// Return TestCancelled after cnt awaits
    #[cfg(feature = "cancel_testing")]
    #[doc(hidden)]
    pub fn set_cancel_count(&mut self, cnt: Option<usize>) {
        self.cancel_count = cnt;
    }

    /// True if the connection was canceled
    #[inline]
    fn canceled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Human readable server version
    pub fn server_version(&self) -> &str {
        &self.server_version
    }

    /// Id of the connection on the server, as used by `KILL`
    pub fn connection_id(&self) -> u32 {
        self.connection_id
    }

    /// Negotiated capabilities, see [crate::constants::client]
    pub fn capabilities(&self) -> u32 {
        self.capabilities
    }

    /// Status flags of the last OK or EOF package, see [crate::constants::status]
    pub fn status_flags(&self) -> u16 {
        self.status_flags
    }

    /// True if the server reports an open transaction
    pub fn in_transaction(&self) -> bool {
        self.status_flags & status::IN_TRANS != 0
    }

    /// The current schema
    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    /// The character set results are decoded with
    pub fn charset(&self) -> Charset {
        self.charset
    }

    /// The session time zone, as last reported by the server
    pub fn time_zone(&self) -> Option<&str> {
        self.time_zone.as_deref()
    }

    /// The session time zone offset in seconds east of UTC, if it is a fixed offset
    pub fn time_zone_offset(&self) -> Option<i32> {
        self.time_zone_offset
    }

    /// The current transaction depth
    pub fn transaction_depth(&self) -> usize {
        self.transaction_depth
    }

    /// A handle that can cancel the connection from another task
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(self.cancel.clone())
    }

    /// The state of the connection
    pub fn state(&self) -> ConnectionStatus {
        if self.canceled() {
            return ConnectionStatus::Terminated;
        }
        match self.state {
            ConnectionState::Idle if self.fresh_from_pool => ConnectionStatus::IdleInPool,
            ConnectionState::Idle => ConnectionStatus::Idle,
            ConnectionState::Rows | ConnectionState::LongColumn { .. } => {
                ConnectionStatus::HasMoreRows
            }
            ConnectionState::MoreResultsets => ConnectionStatus::HasMoreResultsets,
            ConnectionState::Error => ConnectionStatus::Error,
            _ => ConnectionStatus::Querying,
        }
    }

    /// Mark the connection as handed out from a pool
    ///
    /// A transport error on the next command is reported as
    /// [ConnectionErrorContent::StaleConnection]
    pub fn mark_idle_in_pool(&mut self) {
        if self.state == ConnectionState::Idle {
            self.fresh_from_pool = true;
        }
    }

    /// The columns of the current result set
    pub(crate) fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// The OK package ending the current result set, if it has been read
    pub(crate) fn ok_packet(&self) -> Option<&OkPacket> {
        self.ok.as_ref()
    }

    /// True if the current result set is finished and another one follows
    pub(crate) fn has_more_resultsets(&self) -> bool {
        self.state == ConnectionState::MoreResultsets
    }

    /// Classify the outcome of an operation, breaking the connection on fatal errors
    async fn track<T>(&mut self, r: ConnectionResult<T>) -> ConnectionResult<T> {
        let fresh = std::mem::take(&mut self.fresh_from_pool);
        let e = match r {
            Ok(v) => return Ok(v),
            Err(e) => e,
        };
        if !e.is_fatal() {
            return Err(e);
        }
        debug!(connection_id = self.connection_id, error = %e, "connection broken");
        self.state = ConnectionState::Error;
        self.acks.clear();
        self.infile = None;
        self.io.clear_writes();
        self.io.shutdown().await;
        match e.content() {
            ConnectionErrorContent::Io(_) | ConnectionErrorContent::ServerDisconnected
                if fresh =>
            {
                Err(ConnectionErrorContent::StaleConnection(e.to_string()).into())
            }
            _ => Err(e),
        }
    }

    /// Apply an OK package ending a response or a result set
    fn finish_ok(&mut self, ok: OkPacket) {
        for change in &ok.session_changes {
            match change {
                SessionChange::SystemVariable { name, value } => match name.as_str() {
                    "character_set_results" | "character_set_client" => {
                        self.charset = Charset::from_name(value)
                    }
                    "time_zone" => {
                        self.time_zone_offset = parse_time_zone_offset(value);
                        self.time_zone = Some(value.clone());
                    }
                    _ => (),
                },
                SessionChange::Schema(schema) if schema.is_empty() => self.schema = None,
                SessionChange::Schema(schema) => self.schema = Some(schema.clone()),
                SessionChange::Other(_) => (),
            }
        }
        self.status_flags = ok.status_flags;
        self.state = if ok.more_results() {
            ConnectionState::MoreResultsets
        } else {
            ConnectionState::Idle
        };
        self.ok = Some(ok);
    }

    /// Remember the first error of a command, it is returned once the response has been read
    fn defer(&mut self, discard: bool, e: ConnectionError) {
        if !discard && self.deferred.is_none() {
            self.deferred = Some(e);
        }
    }

    /// Drive the state machine until a response head has been read
    ///
    /// In discard mode nothing is decoded and no errors are remembered
    async fn drive(&mut self, discard: bool) -> ConnectionResult<Head> {
        let caps = self.capabilities;
        loop {
            match self.state {
                ConnectionState::Idle => return Err(protocol_error("No command in progress")),
                ConnectionState::Error => return Err(ConnectionErrorContent::Broken.into()),
                ConnectionState::Rows | ConnectionState::LongColumn { .. } => {
                    return Ok(Head::Columns);
                }
                ConnectionState::Send => {
                    // safety-cancel: send only advances the write buffer by what was written
                    self.test_cancel()?;
                    self.io.send().await?;
                    self.io.begin_response()?;
                    self.state = if self.acks.is_empty() {
                        ConnectionState::ReadHead
                    } else {
                        ConnectionState::ReadAck
                    };
                }
                ConnectionState::ReadAck => {
                    // safety-cancel: read_packet consumes nothing until the whole package is buffered
                    self.test_cancel()?;
                    let package = self.io.read_packet().await?;
                    let r = match package.first() {
                        Some(0x00) => parse_ok(package, caps).map(|ok| ok.status_flags),
                        Some(0xFE) if caps & client::DEPRECATE_EOF == 0 || package.len() <= 5 => {
                            parse_eof(package, caps).map(|(_, s)| s)
                        }
                        Some(0xFE) => parse_ok(package, caps).map(|ok| ok.status_flags),
                        Some(0xFF) => Err(parse_mysql_error(
                            &mut PackageParser::new(&package[1..]),
                            self.status_flags,
                        )),
                        _ => Err(protocol_error("Unexpected response to prepended command")),
                    };
                    let ack = self
                        .acks
                        .pop_front()
                        .ok_or_else(|| protocol_error("Unexpected acknowledgement"))?;
                    match r {
                        Ok(status_flags) => {
                            self.status_flags = status_flags;
                            match ack {
                                Ack::InitDb(schema) => self.schema = Some(schema),
                                Ack::SetOption(multi) => self.multi_statements = multi,
                            }
                        }
                        Err(e) if e.code().is_some() => self.defer(discard, e),
                        Err(e) => return Err(e),
                    }
                    self.io.begin_response()?;
                    if self.acks.is_empty() {
                        self.state = ConnectionState::ReadHead;
                    }
                }
                ConnectionState::ReadHead => {
                    self.test_cancel()?;
                    let package = self.io.read_packet().await?;
                    self.columns.clear();
                    self.column_names.clear();
                    self.ok = None;
                    match (package.first().copied(), self.command) {
                        (Some(0x00), CommandKind::Prepare) => {
                            let p = parse_prepare_ok(package)?;
                            let mut left = u32::from(p.params) + u32::from(p.columns);
                            if caps & client::DEPRECATE_EOF == 0 {
                                left += u32::from(p.params != 0) + u32::from(p.columns != 0);
                            }
                            self.prepare = PrepareProgress {
                                stmt_id: p.stmt_id,
                                num_params: p.params.into(),
                                params: Vec::with_capacity(p.params.into()),
                                columns: Vec::with_capacity(p.columns.into()),
                            };
                            self.state = ConnectionState::PrepareDefs { left };
                        }
                        (Some(0x00), _) => {
                            let ok = parse_ok(package, caps)?;
                            self.finish_ok(ok);
                            return Ok(Head::Ok);
                        }
                        (Some(0xFF), _) => {
                            let e = parse_mysql_error(
                                &mut PackageParser::new(&package[1..]),
                                self.status_flags,
                            );
                            self.state = ConnectionState::Idle;
                            return Err(e);
                        }
                        (Some(0xFB), CommandKind::Query) => {
                            let name = String::from_utf8_lossy(&package[1..]).into_owned();
                            let file = match &self.local_infile {
                                Some(provider) if !discard => provider.open(&name),
                                _ => None,
                            };
                            if file.is_none() {
                                debug!(connection_id = self.connection_id, name = %name, "local infile refused");
                                self.defer(discard, ConnectionErrorContent::LocalInfileRefused(name).into());
                            }
                            self.infile = file;
                            self.state = ConnectionState::InfileUpload;
                        }
                        (Some(_), _) => {
                            let count = PackageParser::new(package)
                                .get_lenenc()
                                .loc("column count")?;
                            self.state = ConnectionState::ReadColumns { left: count };
                        }
                        (None, _) => return Err(protocol_error("Empty response package")),
                    }
                }
                ConnectionState::InfileUpload => {
                    let mut read = 0;
                    if !discard && !self.canceled()
                        && let Some(file) = &mut self.infile
                    {
                        self.upload_buf.resize(INFILE_CHUNK, 0);
                        #[cfg(feature = "cancel_testing")]
                        if let Some(v) = &mut self.cancel_count {
                            if *v == 0 {
                                return Err(ConnectionErrorContent::TestCancelled.into());
                            }
                            *v -= 1;
                        }
                        match file.read(&mut self.upload_buf).await {
                            Ok(n) => read = n,
                            Err(e) => {
                                if self.deferred.is_none() {
                                    self.deferred = Some(e.into());
                                }
                            }
                        }
                    }
                    self.io.start_packet();
                    self.io.put_bytes(&self.upload_buf[..read]);
                    self.io.finish_packet();
                    if read == 0 {
                        self.infile = None;
                    }
                    self.state = ConnectionState::InfileSend { last: read == 0 };
                }
                ConnectionState::InfileSend { last } => {
                    self.test_cancel()?;
                    self.io.send().await?;
                    self.state = if last {
                        ConnectionState::ReadHead
                    } else {
                        ConnectionState::InfileUpload
                    };
                }
                ConnectionState::ReadColumns { left: 0 } => {
                    if caps & client::DEPRECATE_EOF != 0 {
                        self.state = ConnectionState::Rows;
                        return Ok(Head::Columns);
                    }
                    self.state = ConnectionState::ColumnsEof;
                }
                ConnectionState::ReadColumns { left } => {
                    self.test_cancel()?;
                    let package = self.io.read_packet().await?;
                    self.state = ConnectionState::ReadColumns { left: left - 1 };
                    if !discard {
                        let column = parse_column_definition(package, caps)?;
                        self.column_names.push(column.name.clone());
                        self.columns.push(column);
                    }
                }
                ConnectionState::ColumnsEof => {
                    self.test_cancel()?;
                    let package = self.io.read_packet().await?;
                    let (_, status_flags) = parse_eof(package, caps)?;
                    self.status_flags = status_flags;
                    self.state = ConnectionState::Rows;
                    return Ok(Head::Columns);
                }
                ConnectionState::MoreResultsets => {
                    self.state = ConnectionState::ReadHead;
                }
                ConnectionState::PrepareDefs { left: 0 } => {
                    let p = std::mem::take(&mut self.prepare);
                    let serial = self.next_serial;
                    self.next_serial += 1;
                    self.state = ConnectionState::Idle;
                    if discard {
                        self.pending_closes.push(p.stmt_id);
                    } else {
                        self.live.insert(p.stmt_id, serial);
                    }
                    return Ok(Head::Prepared(PreparedStatement {
                        id: p.stmt_id,
                        serial,
                        generation: self.generation,
                        params: Arc::new(p.params),
                        columns: Arc::new(p.columns),
                    }));
                }
                ConnectionState::PrepareDefs { left } => {
                    self.test_cancel()?;
                    let package = self.io.read_packet().await?;
                    self.state = ConnectionState::PrepareDefs { left: left - 1 };
                    if package.first() == Some(&0xFE) && package.len() < 9 {
                        continue;
                    }
                    if !discard {
                        let column = parse_column_definition(package, caps)?;
                        if self.prepare.params.len() < self.prepare.num_params {
                            self.prepare.params.push(column);
                        } else {
                            self.prepare.columns.push(column);
                        }
                    }
                }
                ConnectionState::LongData { stmt_id } => {
                    // The execute was abandoned while streaming, drop what the server received
                    put_simple(&mut self.io, com::STMT_RESET, &stmt_id.to_le_bytes());
                    self.io.finish_command();
                    self.command = CommandKind::Other;
                    self.state = ConnectionState::Send;
                }
            }
        }
    }

    /// Read the head of the response to the command composed
    async fn read_head(&mut self) -> ConnectionResult<Head> {
        let r = self.drive(false).await;
        let r = self.track(r).await;
        if let Some(e) = self.deferred.take() {
            if r.is_ok() {
                self.discard_inner().await?;
            }
            return Err(e);
        }
        r
    }

    /// Position at the start of the next row, false at the end of the result set
    async fn next_row_start(&mut self) -> ConnectionResult<bool> {
        loop {
            match self.state {
                ConnectionState::LongColumn { .. } => (),
                ConnectionState::Rows if self.io.in_packet() => (),
                ConnectionState::Rows => break,
                _ => return Ok(false),
            }
            // safety-cancel: Skipping the rest of the row is always possible
            self.test_cancel()?;
            self.io.goto_end_of_packet().await?;
            self.state = ConnectionState::Rows;
        }
        self.test_cancel()?;
        let caps = self.capabilities;
        match self.io.peek_packet().await? {
            (len, Some(0xFE)) if len < MAX_PACKAGE_PAYLOAD => {
                let package = self.io.read_packet().await?;
                let ok = if caps & client::DEPRECATE_EOF != 0 {
                    parse_ok(package, caps)?
                } else {
                    let (warnings, status_flags) = parse_eof(package, caps)?;
                    OkPacket {
                        warnings,
                        status_flags,
                        ..Default::default()
                    }
                };
                self.finish_ok(ok);
                Ok(false)
            }
            (_, Some(0xFF)) => {
                let package = self.io.read_packet().await?;
                let e = parse_mysql_error(&mut PackageParser::new(&package[1..]), self.status_flags);
                self.state = ConnectionState::Idle;
                Err(e)
            }
            _ => {
                self.io.begin_packet().await?;
                Ok(true)
            }
        }
    }

    /// Read or skip one value of `len` bytes of the current row
    async fn read_value(
        &mut self,
        idx: usize,
        len: u64,
        err: &mut Option<ConnectionError>,
    ) -> ConnectionResult<Value> {
        let wanted = match self.row_mode {
            RowMode::Void => false,
            RowMode::Scalar => idx == 0,
            RowMode::Map | RowMode::Array => true,
        };
        if !wanted || len > self.max_column_length as u64 {
            self.io.skip(len).await?;
            return Ok(Value::Null);
        }
        if len > self.max_field_length as u64 {
            self.io.skip(len).await?;
            err.get_or_insert_with(|| {
                ConnectionErrorContent::OversizedField {
                    what: "column value",
                    len,
                    limit: self.max_field_length as u64,
                }
                .into()
            });
            return Ok(Value::Null);
        }
        let len = usize::try_from(len).map_err(|_| protocol_error("Length overflow"))?;
        let bytes = self.io.read_bytes(len).await?;
        let column = &self.columns[idx];
        let r = if self.command == CommandKind::Execute {
            decode_binary_value(column, bytes, self.charset, self.raw_json)
        } else {
            decode_text_value(column, bytes, self.charset, self.raw_json)
        };
        match r {
            Ok(v) => Ok(v),
            Err(e) => {
                err.get_or_insert_with(|| ConnectionErrorContent::Decode("column value", e).into());
                Ok(Value::Null)
            }
        }
    }

    /// Read the next row of the current result set
    ///
    /// When streaming the last column is left on the wire and returned as NULL
    async fn read_row_inner(&mut self, streaming: bool) -> ConnectionResult<Option<Row>> {
        if !self.next_row_start().await? {
            return Ok(None);
        }
        let n = self.columns.len();
        let mut values = Vec::with_capacity(if self.row_mode == RowMode::Void { 0 } else { n });
        let mut err = None;
        let binary = self.command == CommandKind::Execute;
        let mut nulls = None;
        if binary {
            self.test_cancel()?;
            if self.io.read_u8().await? != 0x00 {
                return Err(protocol_error("Invalid binary row header"));
            }
            let bytes = self.io.read_bytes(NullBitmap::len_bytes(n, 2)).await?;
            nulls = Some(NullBitmap::from_bytes(bytes, 2));
        }
        for idx in 0..n {
            self.test_cancel()?;
            let len = match &nulls {
                Some(nulls) if nulls.is_null(idx) => None,
                Some(_) => Some(match binary_width(&self.columns[idx]) {
                    BinaryWidth::Fixed(w) => w as u64,
                    BinaryWidth::Temporal => self.io.read_u8().await?.into(),
                    BinaryWidth::LengthEncoded => self
                        .io
                        .read_lenenc()
                        .await?
                        .ok_or_else(|| protocol_error("NULL marker in binary row"))?,
                }),
                None => self.io.read_lenenc().await?,
            };
            if streaming && idx + 1 == n {
                self.state = ConnectionState::LongColumn {
                    left: len.unwrap_or(0),
                };
                if self.row_mode != RowMode::Void {
                    values.push(Value::Null);
                }
                break;
            }
            let value = match len {
                Some(len) => self.read_value(idx, len, &mut err).await?,
                None => Value::Null,
            };
            if self.row_mode != RowMode::Void {
                values.push(value);
            }
        }
        if !streaming {
            self.io.end_packet().await?;
        }
        if let Some(e) = err {
            return Err(e);
        }
        Ok(Some(Row::build(self.row_mode, &self.column_names, values)))
    }

    /// Report cancellation to a reader, once
    fn check_reader_cancel(&mut self) -> ConnectionResult<bool> {
        if !self.canceled() {
            return Ok(false);
        }
        if !self.cancel_reported {
            self.cancel_reported = true;
            return Err(ConnectionErrorContent::Canceled.into());
        }
        Ok(true)
    }

    /// Read the next row of the current result set
    pub(crate) async fn read_row(&mut self, streaming: bool) -> ConnectionResult<Option<Row>> {
        if self.check_reader_cancel()? {
            return Ok(None);
        }
        let r = self.read_row_inner(streaming).await;
        self.track(r).await
    }

    /// Read from the last column of the current row, if it is being streamed
    pub(crate) async fn read_long_column(&mut self, buf: &mut [u8]) -> ConnectionResult<usize> {
        let ConnectionState::LongColumn { left } = self.state else {
            return Ok(0);
        };
        if left == 0 || buf.is_empty() || self.check_reader_cancel()? {
            return Ok(0);
        }
        let max = usize::try_from(left).unwrap_or(usize::MAX).min(buf.len());
        let r: ConnectionResult<usize> = async {
            self.test_cancel()?;
            let chunk = self.io.read_chunk(max).await?;
            let n = chunk.len();
            buf[..n].copy_from_slice(chunk);
            Ok(n)
        }
        .await;
        let n = self.track(r).await?;
        self.state = ConnectionState::LongColumn {
            left: left - n as u64,
        };
        Ok(n)
    }

    /// Bytes of the streamed column left on the wire
    pub(crate) fn long_column_left(&self) -> u64 {
        match self.state {
            ConnectionState::LongColumn { left } => left,
            _ => 0,
        }
    }

    /// Skip the remaining rows of the current result set
    async fn skip_rows(&mut self) -> ConnectionResult<()> {
        while self.next_row_start().await? {
            self.test_cancel()?;
            self.io.goto_end_of_packet().await?;
        }
        Ok(())
    }

    /// Finish the current result set and read the head of the next one
    pub(crate) async fn next_resultset(&mut self) -> ConnectionResult<bool> {
        if self.check_reader_cancel()? {
            return Ok(false);
        }
        if matches!(
            self.state,
            ConnectionState::Rows | ConnectionState::LongColumn { .. }
        ) {
            let r = self.skip_rows().await;
            self.track(r).await?;
        }
        if self.state != ConnectionState::MoreResultsets {
            return Ok(false);
        }
        let r = self.read_head().await;
        self.log_end(&r);
        r?;
        Ok(true)
    }

    /// Bring the connection back to idle, ignoring server errors
    async fn discard_inner(&mut self) -> ConnectionResult<()> {
        loop {
            let r = match self.state {
                ConnectionState::Idle => return Ok(()),
                ConnectionState::Error => return Err(ConnectionErrorContent::Broken.into()),
                ConnectionState::Rows | ConnectionState::LongColumn { .. } => {
                    let r = self.skip_rows().await;
                    self.track(r).await
                }
                _ => {
                    let r = self.drive(true).await.map(|_| ());
                    self.track(r).await
                }
            };
            match r {
                Ok(()) => (),
                Err(e) if e.code().is_some() && !e.is_fatal() => (),
                Err(e) => return Err(e),
            }
        }
    }

    /// Read and throw away whatever is left of the current command
    ///
    /// Also resumes commands whose futures were dropped
    pub async fn discard(&mut self) -> ConnectionResult<()> {
        self.deferred = None;
        self.discard_inner().await
    }

    /// Read the responses of the command composed until idle, returning the first error
    async fn drain(&mut self) -> ConnectionResult<()> {
        loop {
            match self.state {
                ConnectionState::Idle => break,
                ConnectionState::Error => return Err(ConnectionErrorContent::Broken.into()),
                ConnectionState::Rows | ConnectionState::LongColumn { .. } => {
                    let r = self.skip_rows().await;
                    self.track(r).await?;
                }
                _ => {
                    self.read_head().await?;
                }
            }
        }
        Ok(())
    }

    /// Compose a COM_QUERY
    fn compose_query(&mut self, sql: &str) {
        put_simple(&mut self.io, com::QUERY, sql.as_bytes());
        self.io.finish_command();
        self.command = CommandKind::Query;
        self.state = ConnectionState::Send;
    }

    /// Run sql issued by the connection itself, discarding any rows
    async fn run_internal(&mut self, sql: &str) -> ConnectionResult<()> {
        debug!(connection_id = self.connection_id, sql, "internal query");
        self.compose_query(sql);
        self.drain().await
    }

    /// Compose deferred statement closes
    fn compose_closes(&mut self) {
        for stmt_id in std::mem::take(&mut self.pending_closes) {
            put_close(&mut self.io, stmt_id);
            if let Some(l) = &self.logger {
                logger::check("deallocate", l.deallocate(self.connection_id, stmt_id));
            }
        }
    }

    /// Compose the commands sent ahead of the main command
    fn compose_prelude(&mut self, schema: Option<&str>, multi_statements: Option<bool>) {
        self.compose_closes();
        if let Some(schema) = schema
            && self.schema.as_deref() != Some(schema)
        {
            put_simple(&mut self.io, com::INIT_DB, schema.as_bytes());
            self.io.finish_command();
            self.acks.push_back(Ack::InitDb(schema.to_string()));
        }
        if let Some(multi) = multi_statements
            && multi != self.multi_statements
        {
            put_set_option(&mut self.io, multi);
            self.io.finish_command();
            self.acks.push_back(Ack::SetOption(multi));
        }
    }

    /// Check that the connection can accept a new command
    async fn begin_command(&mut self) -> ConnectionResult<()> {
        if self.canceled() {
            return Err(ConnectionErrorContent::Canceled.into());
        }
        match self.state {
            ConnectionState::Idle => (),
            ConnectionState::Error => return Err(ConnectionErrorContent::Broken.into()),
            _ => return Err(ConnectionErrorContent::Busy.into()),
        }
        self.deferred = None;
        self.ok = None;
        if self.cleanup_rollbacks != 0 {
            let depth = self.transaction_depth - self.cleanup_rollbacks;
            self.compose_query(&rollback_transaction_query(depth));
            // Once composed the rollback is carried out by the state machine
            self.transaction_depth = depth;
            self.cleanup_rollbacks = 0;
            self.drain().await?;
        }
        Ok(())
    }

    /// Report the start of a command to the logger
    fn log_start(&self, sql: &str) {
        if let Some(l) = &self.logger {
            logger::check("query_start", l.query_start(self.connection_id, sql));
            logger::check(
                "query_bytes",
                l.query_bytes(self.connection_id, self.io.pending_write_len()),
            );
        }
    }

    /// Report how a response head ended to the logger
    fn log_end(&self, r: &ConnectionResult<Head>) {
        let Some(l) = &self.logger else {
            return;
        };
        let end = match r {
            Ok(Head::Ok) => match &self.ok {
                Some(ok) => QueryEnd::Ok(ok),
                None => return,
            },
            Ok(Head::Columns) => QueryEnd::Columns(self.columns.len()),
            Ok(Head::Prepared(s)) => QueryEnd::Columns(s.columns.len()),
            Err(e) => QueryEnd::Error(e),
        };
        logger::check("query_end", l.query_end(self.connection_id, end));
    }

    /// Run a query in the text protocol
    pub async fn query(&mut self, sql: &str) -> ConnectionResult<Resultsets<'_>> {
        self.query_with(sql, &QueryOptions::default()).await
    }

    /// Run a query in the text protocol with options
    pub async fn query_with(
        &mut self,
        sql: &str,
        options: &QueryOptions,
    ) -> ConnectionResult<Resultsets<'_>> {
        self.begin_command().await?;
        self.row_mode = options.row_mode;
        self.raw_json = options.raw_json;
        let multi = options
            .multi_statements
            .unwrap_or(self.default_multi_statements);
        let mut attempt = 0;
        loop {
            self.compose_prelude(options.schema.as_deref(), Some(multi));
            self.compose_query(sql);
            self.log_start(sql);
            let r = self.read_head().await;
            self.log_end(&r);
            match r {
                Ok(_) => break,
                Err(e)
                    if e.retry() == Retry::Query
                        && attempt < options.retry_query_times
                        && self.state == ConnectionState::Idle =>
                {
                    attempt += 1;
                    info!(connection_id = self.connection_id, attempt, error = %e, "retrying query");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(Resultsets::new(self))
    }

    /// Prepare a statement on the server
    pub async fn prepare(&mut self, sql: &str) -> ConnectionResult<PreparedStatement> {
        self.begin_command().await?;
        self.compose_prelude(None, None);
        put_simple(&mut self.io, com::STMT_PREPARE, sql.as_bytes());
        self.io.finish_command();
        self.command = CommandKind::Prepare;
        self.state = ConnectionState::Send;
        self.log_start(sql);
        let r = self.read_head().await;
        self.log_end(&r);
        match r? {
            Head::Prepared(stmt) => Ok(stmt),
            _ => Err(protocol_error("Unexpected response to prepare")),
        }
    }

    /// Fail unless the statement is valid on this connection
    fn check_statement(&self, stmt: &PreparedStatement) -> ConnectionResult<()> {
        if stmt.generation != self.generation || self.live.get(&stmt.id) != Some(&stmt.serial) {
            return Err(ConnectionErrorContent::StaleStatement(stmt.id).into());
        }
        Ok(())
    }

    /// Compose and send long data for the parameters that need it
    ///
    /// Returns for each parameter whether it is a reader that was empty and
    /// must be encoded inline
    async fn send_long_data(
        &mut self,
        stmt_id: u32,
        params: &mut [Param<'_>],
    ) -> ConnectionResult<Vec<bool>> {
        let mut inline = vec![false; params.len()];
        for (idx, param) in params.iter_mut().enumerate() {
            if let Some(data) = param.data() {
                if param.is_long_data() {
                    put_long_data(&mut self.io, stmt_id, idx as u16, data);
                }
                continue;
            }
            let Param::Reader(reader) = param else {
                continue;
            };
            self.state = ConnectionState::LongData { stmt_id };
            self.upload_buf.resize(LONG_DATA_CHUNK, 0);
            let mut sent = false;
            loop {
                self.test_cancel()?;
                let n = match reader.read(&mut self.upload_buf).await {
                    Ok(n) => n,
                    Err(e) => {
                        // Reset what the server received and report the read error
                        match self.drain().await {
                            Err(fatal) if fatal.is_fatal() => return Err(fatal),
                            _ => return Err(e.into()),
                        }
                    }
                };
                if n == 0 {
                    break;
                }
                put_long_data(&mut self.io, stmt_id, idx as u16, &self.upload_buf[..n]);
                sent = true;
                let r = self.io.send().await;
                self.track(r).await?;
            }
            inline[idx] = !sent;
        }
        Ok(inline)
    }

    /// Execute a prepared statement in the binary protocol
    pub async fn execute<'a>(
        &mut self,
        stmt: &PreparedStatement,
        params: Vec<Param<'a>>,
    ) -> ConnectionResult<Resultsets<'_>> {
        self.execute_with(stmt, params, &QueryOptions::default())
            .await
    }

    /// Execute a prepared statement with the arguments given as a tuple
    ///
    /// ```no_run
    /// # async fn example(conn: &mut qusql_wire::connection::Connection) -> Result<(), qusql_wire::error::ConnectionError> {
    /// let stmt = conn.prepare("INSERT INTO t (a, b) VALUES (?, ?)").await?;
    /// conn.execute_args(&stmt, (1, "hello")).await?.discard().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn execute_args<'a>(
        &mut self,
        stmt: &PreparedStatement,
        args: impl Args<'a>,
    ) -> ConnectionResult<Resultsets<'_>> {
        self.execute_with(stmt, args.into_params(), &QueryOptions::default())
            .await
    }

    /// Execute a prepared statement with options
    pub async fn execute_with<'a>(
        &mut self,
        stmt: &PreparedStatement,
        mut params: Vec<Param<'a>>,
        options: &QueryOptions,
    ) -> ConnectionResult<Resultsets<'_>> {
        self.begin_command().await?;
        self.check_statement(stmt)?;
        check_params(stmt.num_params(), &params)?;
        self.row_mode = options.row_mode;
        self.raw_json = options.raw_json;
        let has_reader = params.iter().any(|p| matches!(p, Param::Reader(_)));
        let mut attempt = 0;
        loop {
            self.command = CommandKind::Execute;
            self.compose_prelude(options.schema.as_deref(), None);
            let inline = self.send_long_data(stmt.id, &mut params).await?;
            put_execute(&mut self.io, stmt.id, &params, &inline)?;
            self.io.finish_command();
            self.command = CommandKind::Execute;
            self.state = ConnectionState::Send;
            if let Some(l) = &self.logger {
                logger::check("param_bind", l.param_bind(self.connection_id, stmt.id, &params));
                logger::check(
                    "query_bytes",
                    l.query_bytes(self.connection_id, self.io.pending_write_len()),
                );
            }
            let r = self.read_head().await;
            self.log_end(&r);
            match r {
                Ok(_) => break,
                Err(e)
                    if e.retry() == Retry::Query
                        && !has_reader
                        && attempt < options.retry_query_times
                        && self.state == ConnectionState::Idle =>
                {
                    attempt += 1;
                    info!(
                        connection_id = self.connection_id,
                        stmt_id = stmt.id,
                        attempt,
                        error = %e,
                        "retrying execute"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(Resultsets::new(self))
    }

    /// Close a prepared statement
    ///
    /// The close is sent along with the next command, or when the connection ends
    pub fn dispose_prepared_stmt(&mut self, stmt: &PreparedStatement) {
        if self.check_statement(stmt).is_ok() {
            self.live.remove(&stmt.id);
            self.pending_closes.push(stmt.id);
        }
    }

    /// Run a command that is answered by OK
    async fn simple_command(&mut self, command: u8, payload: &[u8]) -> ConnectionResult<()> {
        self.begin_command().await?;
        self.compose_prelude(None, None);
        put_simple(&mut self.io, command, payload);
        self.io.finish_command();
        self.command = CommandKind::Other;
        self.state = ConnectionState::Send;
        self.drain().await
    }

    /// Check that the server is alive
    pub async fn ping(&mut self) -> ConnectionResult<()> {
        self.simple_command(com::PING, &[]).await
    }

    /// Forget long data sent for the statement
    pub async fn reset_statement(&mut self, stmt: &PreparedStatement) -> ConnectionResult<()> {
        self.check_statement(stmt)?;
        self.simple_command(com::STMT_RESET, &stmt.id.to_le_bytes())
            .await
    }

    /// Begin a transaction, or a savepoint within the current transaction
    ///
    /// Dropping the returned [Transaction] rolls it back on the next use of the connection
    pub async fn begin(&mut self) -> ConnectionResult<Transaction<'_>> {
        self.begin_command().await?;
        let sql = begin_transaction_query(self.transaction_depth);
        self.compose_query(&sql);

        // Once composed the state machine completes the begin, and the rollback
        // runs on the next use unless the begin is reported as done
        self.transaction_depth += 1;
        self.cleanup_rollbacks = 1;
        self.drain().await?;
        self.cleanup_rollbacks = 0;
        Ok(Transaction { connection: self })
    }

    /// Commit the innermost transaction
    async fn commit_impl(&mut self) -> ConnectionResult<()> {
        self.begin_command().await?;
        if self.transaction_depth == 0 {
            return Err(protocol_error("No transaction to commit"));
        }
        self.transaction_depth -= 1;
        self.compose_query(&commit_transaction_query(self.transaction_depth));
        self.drain().await
    }

    /// Roll back the innermost transaction
    async fn rollback_impl(&mut self) -> ConnectionResult<()> {
        self.begin_command().await?;
        if self.transaction_depth == 0 {
            return Err(protocol_error("No transaction to roll back"));
        }
        self.transaction_depth -= 1;
        self.compose_query(&rollback_transaction_query(self.transaction_depth));
        self.drain().await
    }

    /// Quote an xid for the current sql_mode
    fn quote_xid(&self, xid: &str) -> String {
        quote_xid(xid, self.status_flags & status::NO_BACKSLASH_ESCAPES != 0)
    }

    /// Start an XA transaction branch
    pub async fn xa_start(&mut self, xid: &str) -> ConnectionResult<()> {
        self.begin_command().await?;
        self.xa = Some((xid.to_string(), XaPhase::Active));
        let quoted = self.quote_xid(xid);
        let r = self.run_internal(&format!("XA START {quoted}")).await;
        if r.as_ref().is_err_and(|e| e.code().is_some()) {
            self.xa = None;
        }
        r
    }

    /// End and prepare the XA transaction branch
    pub async fn xa_prepare(&mut self) -> ConnectionResult<()> {
        self.begin_command().await?;
        let xid = match &self.xa {
            Some((xid, XaPhase::Active)) => self.quote_xid(xid),
            _ => return Err(ConnectionErrorContent::NoXaTransaction.into()),
        };
        self.run_internal(&format!("XA END {xid}")).await?;
        self.run_internal(&format!("XA PREPARE {xid}")).await?;
        if let Some((_, phase)) = &mut self.xa {
            *phase = XaPhase::Prepared;
        }
        Ok(())
    }

    /// Commit the XA transaction branch, in one phase if it was not prepared
    pub async fn xa_commit(&mut self) -> ConnectionResult<()> {
        self.begin_command().await?;
        let sql = match self.xa.clone() {
            Some((xid, XaPhase::Active)) => {
                let xid = self.quote_xid(&xid);
                self.run_internal(&format!("XA END {xid}")).await?;
                format!("XA COMMIT {xid} ONE PHASE")
            }
            Some((xid, XaPhase::Prepared)) => format!("XA COMMIT {}", self.quote_xid(&xid)),
            None => return Err(ConnectionErrorContent::NoXaTransaction.into()),
        };
        self.run_internal(&sql).await?;
        self.xa = None;
        Ok(())
    }

    /// Roll back the XA transaction branch
    pub async fn xa_rollback(&mut self) -> ConnectionResult<()> {
        self.begin_command().await?;
        let Some((xid, phase)) = self.xa.clone() else {
            return Err(ConnectionErrorContent::NoXaTransaction.into());
        };
        self.finish_xa(&xid, phase).await
    }

    /// End and roll back an XA branch, ignoring that the server no longer knows it
    async fn finish_xa(&mut self, xid: &str, phase: XaPhase) -> ConnectionResult<()> {
        let xid = self.quote_xid(xid);
        let ignore = [error_code::XAER_NOTA, error_code::XA_RBROLLBACK];
        if phase == XaPhase::Active {
            let r = self.run_internal(&format!("XA END {xid}")).await;
            ignore_codes(r, &ignore)?;
        }
        let r = self.run_internal(&format!("XA ROLLBACK {xid}")).await;
        ignore_codes(r, &ignore)?;
        self.xa = None;
        Ok(())
    }

    /// Drain the current command and roll back anything left open
    async fn end_cleanup(&mut self) -> ConnectionResult<()> {
        self.deferred = None;
        self.discard_inner().await?;
        if let Some((xid, phase)) = self.xa.clone() {
            self.finish_xa(&xid, phase).await?;
        }
        if self.transaction_depth > 0 {
            self.run_internal("ROLLBACK").await?;
            self.transaction_depth = 0;
            self.cleanup_rollbacks = 0;
        }
        Ok(())
    }

    /// Reset the session so the connection can be reused
    async fn recycle(&mut self) -> ConnectionResult<()> {
        self.end_cleanup().await?;
        self.compose_closes();
        put_simple(&mut self.io, com::RESET_CONNECTION, &[]);
        self.io.finish_command();
        self.command = CommandKind::Other;
        self.state = ConnectionState::Send;
        match self.drain().await {
            Ok(()) => {
                self.generation += 1;
                self.live.clear();
                self.charset = Charset::Utf8;
                self.time_zone = None;
                self.time_zone_offset = None;
            }
            Err(e) if e.code() == Some(error_code::UNKNOWN_COM_ERROR) => {
                warn!(
                    connection_id = self.connection_id,
                    "server does not support COM_RESET_CONNECTION"
                );
            }
            Err(e) => return Err(e),
        }
        if let Some(schema) = self.initial_schema.clone()
            && self.schema.as_deref() != Some(schema.as_str())
        {
            put_simple(&mut self.io, com::INIT_DB, schema.as_bytes());
            self.io.finish_command();
            self.command = CommandKind::Other;
            self.state = ConnectionState::Send;
            self.drain().await?;
            self.schema = Some(schema);
        }
        if let Some(sql) = self.init_sql.clone() {
            self.run_internal(&sql).await?;
        }
        self.cancel_reported = false;
        Ok(())
    }

    /// Say goodbye to the server and release the transport
    async fn close_transport(mut self) -> Buffers {
        if self.state != ConnectionState::Error {
            self.io.clear_writes();
            self.compose_closes();
            put_simple(&mut self.io, com::QUIT, &[]);
            if let Err(e) = self.io.send().await {
                debug!(connection_id = self.connection_id, error = %e, "sending quit failed");
            }
        }
        self.io.shutdown().await;
        self.io.into_buffers()
    }

    /// End the use of the connection
    ///
    /// Outstanding rows are drained and open transactions rolled back. With
    /// [EndMode::Recycle] the session is reset and the connection returned,
    /// on any failure or with [EndMode::Close] the connection is closed.
    /// A canceled connection is always closed.
    pub async fn end(mut self, mode: EndMode) -> Ended {
        if mode == EndMode::Recycle && !self.canceled() {
            match self.recycle().await {
                Ok(()) => return Ended::Recycled(self),
                Err(e) => {
                    debug!(connection_id = self.connection_id, error = %e, "recycle failed")
                }
            }
        } else if self.state != ConnectionState::Error
            && let Err(e) = self.end_cleanup().await
        {
            debug!(connection_id = self.connection_id, error = %e, "cleanup failed");
        }
        Ended::Closed(self.close_transport().await)
    }

    /// Close the connection, giving the buffers back to the pool it was connected with
    pub async fn close(self) {
        let pool = self.buffer_pool.clone();
        if let Ended::Closed(buffers) = self.end(EndMode::Close).await
            && let Some(pool) = pool
        {
            pool.give(buffers);
        }
    }
}

/// Represents an ongoing transaction in the connection
///
/// Note: Since rust does not support async drops. Dropping
/// a transaction object will not roll back the transaction
/// immediately. This will instead be deferred to next time
/// the connection is used.
pub struct Transaction<'a> {
    /// The underlying connection we have started a transaction on
    connection: &'a mut Connection,
}

impl<'a> Transaction<'a> {
    /// Commit this transaction to the database
    ///
    /// If the returned future is dropped, the commit is completed by [Connection::discard]
    pub async fn commit(self) -> ConnectionResult<()> {
        let mut this = ManuallyDrop::new(self);
        this.connection.commit_impl().await
    }

    /// Roll back this transaction
    pub async fn rollback(self) -> ConnectionResult<()> {
        let mut this = ManuallyDrop::new(self);
        this.connection.rollback_impl().await
    }
}

impl std::ops::Deref for Transaction<'_> {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        self.connection
    }
}

impl std::ops::DerefMut for Transaction<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.connection
    }
}

impl<'a> Drop for Transaction<'a> {
    fn drop(&mut self) {
        // Register in connection to drop transaction in cleanup
        self.connection.cleanup_rollbacks += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_queries() {
        assert_eq!(begin_transaction_query(0), "BEGIN");
        assert_eq!(begin_transaction_query(2), "SAVEPOINT _qusql_savepoint_2");
        assert_eq!(commit_transaction_query(1), "RELEASE SAVEPOINT _qusql_savepoint_1");
        assert_eq!(rollback_transaction_query(0), "ROLLBACK");
        assert_eq!(
            rollback_transaction_query(7),
            "ROLLBACK TO SAVEPOINT _qusql_savepoint_7"
        );
    }

    #[test]
    fn time_zone_offsets() {
        assert_eq!(parse_time_zone_offset("+02:00"), Some(7200));
        assert_eq!(parse_time_zone_offset("-05:30"), Some(-19800));
        assert_eq!(parse_time_zone_offset("SYSTEM"), None);
        assert_eq!(parse_time_zone_offset("Europe/Copenhagen"), None);
        assert_eq!(parse_time_zone_offset("+1:99"), None);
        assert_eq!(parse_time_zone_offset("+14:00"), Some(50400));
        assert_eq!(parse_time_zone_offset("+15:00"), None);
        assert_eq!(parse_time_zone_offset("+2147483647:00"), None);
        assert_eq!(parse_time_zone_offset("+-3:00"), None);
    }
}
