//! Error type returned by connection operations
use std::fmt::Display;

use thiserror::Error;

use crate::{
    constants::{error_code, status},
    package_parser::{DecodeError, DecodeResult, PackageParser},
    param::BindError,
};

/// How an operation that failed with a server error may be retried
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Retry {
    /// Retrying will not help
    None,
    /// The connection is gone, retry on a new connection
    Connection,
    /// The transaction was rolled back, retry the whole transaction
    Transaction,
    /// Only the failed statement needs to be resent
    Query,
}

impl Retry {
    /// Classify a server error code given the status flags reported by the last OK/EOF package
    pub fn classify(code: u16, status_flags: u16) -> Retry {
        match code {
            error_code::SERVER_SHUTDOWN
            | error_code::NORMAL_SHUTDOWN
            | error_code::GOT_SIGNAL
            | error_code::SHUTDOWN_COMPLETE
            | error_code::CONNECTION_KILLED => Retry::Connection,
            error_code::LOCK_DEADLOCK => {
                if status_flags & status::AUTOCOMMIT != 0 && status_flags & status::IN_TRANS == 0
                {
                    Retry::Query
                } else {
                    Retry::Transaction
                }
            }
            error_code::LOCK_WAIT_TIMEOUT => Retry::Query,
            _ => Retry::None,
        }
    }
}

/// Error handling connection
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConnectionErrorContent {
    /// An error returned by Mariadb/Mysql
    #[error("mysql error {code} ({}): {message}", String::from_utf8_lossy(.sqlstate))]
    Mysql {
        /// 2-byte mysql error code
        code: u16,
        /// 5-byte sql state
        sqlstate: [u8; 5],
        /// Error message
        message: String,
        /// How the failed operation may be retried
        retry: Retry,
    },
    /// Network error from tokio
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// The server closed the connection
    #[error("server disconnected")]
    ServerDisconnected,
    /// The connection broke on the first use after it was returned to the pool
    #[error("stale connection: {0}")]
    StaleConnection(String),
    /// A previous command has not been fully consumed or discarded
    #[error("connection is busy with a previous command")]
    Busy,
    /// The connection was canceled through its [crate::connection::CancelHandle]
    #[error("connection canceled")]
    Canceled,
    /// The connection failed earlier and must be replaced
    #[error("connection is broken")]
    Broken,
    /// Mariadb/Mysql did not speak the protocol correctly
    #[error("protocol error {0}")]
    Protocol(String),
    /// A value is larger than allowed
    #[error("{what} of {len} bytes exceeds the limit of {limit} bytes")]
    OversizedField {
        /// What was too large
        what: &'static str,
        /// The length of the value
        len: u64,
        /// The configured limit
        limit: u64,
    },
    /// Error decoding row
    #[error("error reading {0}: {1}")]
    Decode(&'static str, DecodeError),
    /// Error binding parameter
    #[error("error binding paramater {0}: {1}")]
    Bind(u16, BindError),
    /// The prepared statement has been disposed or invalidated by a session reset
    #[error("prepared statement {0} is no longer valid on this connection")]
    StaleStatement(u32),
    /// The server asked for an authentication plugin we do not implement
    #[error("unknown auth plugin {0}")]
    UnknownAuthPlugin(String),
    /// The authentication exchange failed on the client side
    #[error("authentication failed: {0}")]
    Auth(String),
    /// The server requested a file and no provider would serve it
    #[error("local infile request for {0} refused")]
    LocalInfileRefused(String),
    /// The address given could not be parsed
    #[error("invalid address {0}")]
    InvalidAddress(String),
    /// Connecting to the server took longer than the configured timeout
    #[error("connect timed out")]
    ConnectTimeout,
    /// An XA operation was requested without a matching XA transaction
    #[error("no XA transaction is active")]
    NoXaTransaction,
    /// You executed a mysql statement that does not return any columns
    #[error("fetch return no columns")]
    ExpectedRows,
    /// You executed a mysql statement that does return columns, so you need to read the rows
    #[error("rows return for execute")]
    UnexpectedRows,
    #[cfg(feature = "cancel_testing")]
    /// For testing cancel safety
    #[doc(hidden)]
    #[error("await threshold reached")]
    TestCancelled,
}

/// Error handling connection
///
/// This types is a Box around ErrorContent, to make sure
/// that the error type is as small as possible
pub struct ConnectionError(Box<ConnectionErrorContent>);

const _: () = {
    assert!(size_of::<ConnectionError>() == size_of::<usize>());
};

impl ConnectionError {
    /// Return the content of the error
    pub fn content(&self) -> &ConnectionErrorContent {
        &self.0
    }

    /// Return the content of the error by value
    pub fn into_content(self) -> ConnectionErrorContent {
        *self.0
    }

    /// How the failed operation may be retried
    pub fn retry(&self) -> Retry {
        match &*self.0 {
            ConnectionErrorContent::Mysql { retry, .. } => *retry,
            ConnectionErrorContent::Io(_)
            | ConnectionErrorContent::ServerDisconnected
            | ConnectionErrorContent::StaleConnection(_)
            | ConnectionErrorContent::Broken => Retry::Connection,
            _ => Retry::None,
        }
    }

    /// The server error code, if this is a server error
    pub fn code(&self) -> Option<u16> {
        match &*self.0 {
            ConnectionErrorContent::Mysql { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// True if the connection can no longer be used after this error
    pub fn is_fatal(&self) -> bool {
        match &*self.0 {
            ConnectionErrorContent::Io(_)
            | ConnectionErrorContent::ServerDisconnected
            | ConnectionErrorContent::StaleConnection(_)
            | ConnectionErrorContent::Broken
            | ConnectionErrorContent::Protocol(_)
            | ConnectionErrorContent::UnknownAuthPlugin(_)
            | ConnectionErrorContent::Auth(_)
            | ConnectionErrorContent::ConnectTimeout => true,
            ConnectionErrorContent::Mysql { retry, .. } => *retry == Retry::Connection,
            _ => false,
        }
    }
}

impl std::ops::Deref for ConnectionError {
    type Target = ConnectionErrorContent;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<E: Into<ConnectionErrorContent>> From<E> for ConnectionError {
    fn from(value: E) -> Self {
        ConnectionError(Box::new(value.into()))
    }
}

impl std::fmt::Debug for ConnectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&self.0, f)
    }
}

impl std::fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl std::error::Error for ConnectionError {}

/// Result return by the connection
pub type ConnectionResult<T> = std::result::Result<T, ConnectionError>;

/// Convert [crate::package_parser::DecodeError] into [ConnectionErrorContent::Decode] with an attached location
pub trait WithLoc<T> {
    /// Convert [crate::package_parser::DecodeError] into [ConnectionErrorContent::Decode] with an attached location
    fn loc(self, loc: &'static str) -> ConnectionResult<T>;
}

impl<T> WithLoc<T> for DecodeResult<T> {
    fn loc(self, loc: &'static str) -> ConnectionResult<T> {
        self.map_err(|v| ConnectionErrorContent::Decode(loc, v).into())
    }
}

/// Trait used to check expected values
pub(crate) trait Except {
    /// The values to expect
    type Value;

    /// Check that I have the expected value
    fn ev(self, loc: &'static str, expected: Self::Value) -> ConnectionResult<()>;
}

impl<T: Eq + Display> Except for DecodeResult<T> {
    type Value = T;

    fn ev(self, loc: &'static str, expected: T) -> ConnectionResult<()> {
        let v = self.loc(loc)?;
        if v != expected {
            Err(protocol_error(format!("Expected {expected} for {loc} got {v}")))
        } else {
            Ok(())
        }
    }
}

/// Construct a [ConnectionErrorContent::Protocol] error
pub(crate) fn protocol_error(msg: impl Into<String>) -> ConnectionError {
    ConnectionErrorContent::Protocol(msg.into()).into()
}

/// Parse an error package into a [ConnectionErrorContent::Mysql]
///
/// The leading 0xFF must already have been consumed from `pp`
pub(crate) fn parse_mysql_error(pp: &mut PackageParser, status_flags: u16) -> ConnectionError {
    let code = match pp.get_u16().loc("code") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mut sqlstate = *b"HY000";
    if pp.peek_u8() == Some(b'#') && pp.remaining() >= 6 {
        pp.get_u8().ok();
        if let Ok(s) = pp.get_bytes(5) {
            sqlstate.copy_from_slice(s);
        }
    }
    let message = String::from_utf8_lossy(pp.get_eof_bytes()).into_owned();
    ConnectionErrorContent::Mysql {
        code,
        sqlstate,
        message,
        retry: Retry::classify(code, status_flags),
    }
    .into()
}
