//! Options used to connect and to run queries
use std::{borrow::Cow, path::PathBuf, sync::Arc, time::Duration};

use crate::{
    buffer_pool::BufferPool,
    error::{ConnectionErrorContent, ConnectionResult},
    logger::{LocalInfileProvider, SqlLogger},
    row::RowMode,
};

/// Where to connect to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    /// A TCP host and port
    Tcp(String, u16),
    /// A unix domain socket
    Unix(PathBuf),
}

impl Address {
    /// Parse `host:port`, `[ipv6]:port` or an absolute socket path
    pub fn parse(address: &str) -> ConnectionResult<Self> {
        if address.starts_with('/') {
            return Ok(Address::Unix(address.into()));
        }
        let invalid = || ConnectionErrorContent::InvalidAddress(address.to_string());
        let (host, port) = address.rsplit_once(':').ok_or_else(invalid)?;
        let port: u16 = port.parse().map_err(|_| invalid())?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() {
            return Err(invalid().into());
        }
        Ok(Address::Tcp(host.to_string(), port))
    }
}

/// Options used to establish connection to Mariadb/Mysql
///
/// ```
/// use qusql_wire::options::ConnectionOptions;
/// let options = ConnectionOptions::new()
///     .address("127.0.0.1:3306").unwrap()
///     .user("user")
///     .password("pw")
///     .database("test");
/// ```
#[derive(Clone)]
pub struct ConnectionOptions<'a> {
    /// The address to connect to
    pub address: Address,
    /// The user to connect as
    pub user: Cow<'a, str>,
    /// The password for the user
    pub password: Cow<'a, str>,
    /// The database to connect to, if any
    pub database: Option<Cow<'a, str>>,
    /// Report matched rather than changed rows as affected
    pub found_rows: bool,
    /// Allow spaces after function names
    pub ignore_space: bool,
    /// Allow several statements separated by `;` in one query
    pub multi_statements: bool,
    /// SQL run after connecting and after every recycle
    pub init_sql: Option<Cow<'a, str>>,
    /// Values longer than this are returned as NULL without being buffered
    pub max_column_length: usize,
    /// Values longer than this fail with [ConnectionErrorContent::OversizedField]
    pub max_field_length: usize,
    /// Provider of files for `LOAD DATA LOCAL INFILE`
    pub local_infile: Option<Arc<dyn LocalInfileProvider>>,
    /// Observer of executed statements
    pub logger: Option<Arc<dyn SqlLogger>>,
    /// Connections to kill once connected
    pub kill_connections: Vec<u32>,
    /// Dangling XA transactions to roll back once connected
    pub rollback_xa: Vec<String>,
    /// PEM encoded RSA key of the server used for caching_sha2_password full authentication
    pub server_public_key: Option<Cow<'a, str>>,
    /// Bound on connecting and authenticating
    pub connect_timeout: Option<Duration>,
    /// Pool to take buffers from
    pub buffer_pool: Option<Arc<BufferPool>>,
}

impl<'a> Default for ConnectionOptions<'a> {
    fn default() -> Self {
        Self {
            address: Address::Tcp("127.0.0.1".to_string(), 3306),
            user: Cow::Borrowed("root"),
            password: Cow::Borrowed(""),
            database: None,
            found_rows: false,
            ignore_space: false,
            multi_statements: false,
            init_sql: None,
            max_column_length: usize::MAX,
            max_field_length: 1 << 30,
            local_infile: None,
            logger: None,
            kill_connections: Vec::new(),
            rollback_xa: Vec::new(),
            server_public_key: None,
            connect_timeout: None,
            buffer_pool: None,
        }
    }
}

impl<'a> ConnectionOptions<'a> {
    /// New default connection options
    pub fn new() -> Self {
        Default::default()
    }

    /// Set the address to connect to, `host:port` or a unix socket path
    pub fn address(self, address: &str) -> ConnectionResult<Self> {
        Ok(Self {
            address: Address::parse(address)?,
            ..self
        })
    }

    /// Set the user to connect as
    pub fn user(self, user: impl Into<Cow<'a, str>>) -> Self {
        Self {
            user: user.into(),
            ..self
        }
    }

    /// Set the password
    pub fn password(self, password: impl Into<Cow<'a, str>>) -> Self {
        Self {
            password: password.into(),
            ..self
        }
    }

    /// Set the database to use
    pub fn database(self, database: impl Into<Cow<'a, str>>) -> Self {
        Self {
            database: Some(database.into()),
            ..self
        }
    }

    /// Report matched rather than changed rows
    pub fn found_rows(self, found_rows: bool) -> Self {
        Self { found_rows, ..self }
    }

    /// Allow spaces after function names
    pub fn ignore_space(self, ignore_space: bool) -> Self {
        Self {
            ignore_space,
            ..self
        }
    }

    /// Allow multiple statements per query
    pub fn multi_statements(self, multi_statements: bool) -> Self {
        Self {
            multi_statements,
            ..self
        }
    }

    /// SQL to run after connecting
    pub fn init_sql(self, init_sql: impl Into<Cow<'a, str>>) -> Self {
        Self {
            init_sql: Some(init_sql.into()),
            ..self
        }
    }

    /// Return longer values as NULL
    pub fn max_column_length(self, max_column_length: usize) -> Self {
        Self {
            max_column_length,
            ..self
        }
    }

    /// Fail on longer values
    pub fn max_field_length(self, max_field_length: usize) -> Self {
        Self {
            max_field_length,
            ..self
        }
    }

    /// Serve `LOAD DATA LOCAL INFILE` requests
    pub fn local_infile(self, provider: Arc<dyn LocalInfileProvider>) -> Self {
        Self {
            local_infile: Some(provider),
            ..self
        }
    }

    /// Observe executed statements
    pub fn logger(self, logger: Arc<dyn SqlLogger>) -> Self {
        Self {
            logger: Some(logger),
            ..self
        }
    }

    /// Kill these connections once connected
    pub fn kill_connections(self, kill_connections: Vec<u32>) -> Self {
        Self {
            kill_connections,
            ..self
        }
    }

    /// Roll back these XA transactions once connected
    pub fn rollback_xa(self, rollback_xa: Vec<String>) -> Self {
        Self {
            rollback_xa,
            ..self
        }
    }

    /// Use this RSA key instead of requesting it from the server
    pub fn server_public_key(self, pem: impl Into<Cow<'a, str>>) -> Self {
        Self {
            server_public_key: Some(pem.into()),
            ..self
        }
    }

    /// Bound the time spent connecting
    pub fn connect_timeout(self, timeout: Duration) -> Self {
        Self {
            connect_timeout: Some(timeout),
            ..self
        }
    }

    /// Take buffers from this pool
    pub fn buffer_pool(self, buffer_pool: Arc<BufferPool>) -> Self {
        Self {
            buffer_pool: Some(buffer_pool),
            ..self
        }
    }
}

/// Options of a single query
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Run the query in this schema, switching with COM_INIT_DB if needed
    pub schema: Option<String>,
    /// Enable or disable multi statements for this query
    pub multi_statements: Option<bool>,
    /// Shape of the returned rows
    pub row_mode: RowMode,
    /// Resend the command this many times if it fails with [crate::error::Retry::Query]
    pub retry_query_times: u32,
    /// Return JSON columns as text instead of parsing them
    pub raw_json: bool,
}

impl QueryOptions {
    /// New default query options
    pub fn new() -> Self {
        Default::default()
    }

    /// Run the query in this schema
    pub fn schema(self, schema: impl Into<String>) -> Self {
        Self {
            schema: Some(schema.into()),
            ..self
        }
    }

    /// Enable or disable multi statements
    pub fn multi_statements(self, multi_statements: bool) -> Self {
        Self {
            multi_statements: Some(multi_statements),
            ..self
        }
    }

    /// Shape of the returned rows
    pub fn row_mode(self, row_mode: RowMode) -> Self {
        Self { row_mode, ..self }
    }

    /// Retry lock wait timeouts this many times
    pub fn retry_query_times(self, retry_query_times: u32) -> Self {
        Self {
            retry_query_times,
            ..self
        }
    }

    /// Return JSON columns as text
    pub fn raw_json(self, raw_json: bool) -> Self {
        Self { raw_json, ..self }
    }
}
