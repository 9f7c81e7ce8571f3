//! Hooks for observing the statements a connection runs
use tokio::io::AsyncRead;
use tracing::{debug, warn};

use crate::{error::ConnectionError, packets::OkPacket, param::Param};

/// Result returned by the [SqlLogger] hooks
pub type LogResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// How a command ended, as reported to [SqlLogger::query_end]
#[derive(Debug)]
pub enum QueryEnd<'a> {
    /// The command returned an OK package
    Ok(&'a OkPacket),
    /// The command returned a result set with this many columns
    Columns(usize),
    /// The command failed
    Error(&'a ConnectionError),
}

/// Receives notifications about the statements executed on a connection
///
/// Every method defaults to doing nothing. Errors returned are logged with
/// [tracing::warn] and never abort the operation being logged.
pub trait SqlLogger: Send + Sync {
    /// A connection was established
    fn connect(&self, connection_id: u32, server_version: &str) -> LogResult {
        let _ = (connection_id, server_version);
        Ok(())
    }

    /// A query or prepare was sent
    fn query_start(&self, connection_id: u32, sql: &str) -> LogResult {
        let _ = (connection_id, sql);
        Ok(())
    }

    /// Number of bytes written for the command, including prepended commands
    fn query_bytes(&self, connection_id: u32, bytes: usize) -> LogResult {
        let _ = (connection_id, bytes);
        Ok(())
    }

    /// Parameters bound when executing a prepared statement
    fn param_bind(&self, connection_id: u32, stmt_id: u32, params: &[Param<'_>]) -> LogResult {
        let _ = (connection_id, stmt_id, params);
        Ok(())
    }

    /// The response head of a command was read
    fn query_end(&self, connection_id: u32, end: QueryEnd<'_>) -> LogResult {
        let _ = (connection_id, end);
        Ok(())
    }

    /// A prepared statement was closed
    fn deallocate(&self, connection_id: u32, stmt_id: u32) -> LogResult {
        let _ = (connection_id, stmt_id);
        Ok(())
    }
}

/// Report a failing logger hook
#[inline]
pub(crate) fn check(hook: &'static str, r: LogResult) {
    if let Err(e) = r {
        warn!(hook, error = %e, "sql logger failed");
    }
}

/// A [SqlLogger] forwarding everything to [tracing::debug]
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSqlLogger;

impl SqlLogger for TracingSqlLogger {
    fn connect(&self, connection_id: u32, server_version: &str) -> LogResult {
        debug!(connection_id, server_version, "connected");
        Ok(())
    }

    fn query_start(&self, connection_id: u32, sql: &str) -> LogResult {
        debug!(connection_id, sql, "query");
        Ok(())
    }

    fn query_bytes(&self, connection_id: u32, bytes: usize) -> LogResult {
        debug!(connection_id, bytes, "sent");
        Ok(())
    }

    fn param_bind(&self, connection_id: u32, stmt_id: u32, params: &[Param<'_>]) -> LogResult {
        debug!(connection_id, stmt_id, ?params, "execute");
        Ok(())
    }

    fn query_end(&self, connection_id: u32, end: QueryEnd<'_>) -> LogResult {
        match end {
            QueryEnd::Ok(ok) => debug!(
                connection_id,
                affected_rows = ok.affected_rows,
                last_insert_id = ok.last_insert_id,
                warnings = ok.warnings,
                "ok"
            ),
            QueryEnd::Columns(columns) => debug!(connection_id, columns, "result set"),
            QueryEnd::Error(e) => debug!(connection_id, error = %e, "failed"),
        }
        Ok(())
    }

    fn deallocate(&self, connection_id: u32, stmt_id: u32) -> LogResult {
        debug!(connection_id, stmt_id, "deallocate");
        Ok(())
    }
}

/// Serves files requested by `LOAD DATA LOCAL INFILE`
pub trait LocalInfileProvider: Send + Sync {
    /// Open the named file, [None] refuses the request
    fn open(&self, file: &str) -> Option<Box<dyn AsyncRead + Unpin + Send>>;
}
