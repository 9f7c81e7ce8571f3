//! Reading the result sets of a query or execute
use crate::{
    connection::Connection,
    decode::Column,
    error::{ConnectionErrorContent, ConnectionResult, WithLoc},
    packets::OkPacket,
    row::{FromRow, Row},
};

/// The result sets returned by a command
///
/// Rows must be read, or the result sets discarded, before the connection
/// accepts another command. If this is dropped early new commands fail with
/// [ConnectionErrorContent::Busy] until [Connection::discard] is called.
pub struct Resultsets<'c> {
    /// The connection the command runs on
    conn: &'c mut Connection,
}

impl<'c> Resultsets<'c> {
    pub(crate) fn new(conn: &'c mut Connection) -> Self {
        Resultsets { conn }
    }

    /// The columns of the current result set, empty if it has no rows
    pub fn columns(&self) -> &[Column] {
        self.conn.columns()
    }

    /// The OK package ending the current result set
    ///
    /// Available once all rows of the result set have been read
    pub fn ok(&self) -> Option<&OkPacket> {
        self.conn.ok_packet()
    }

    /// Number of rows changed by the command, once its OK package has been read
    pub fn affected_rows(&self) -> u64 {
        self.ok().map(|v| v.affected_rows).unwrap_or_default()
    }

    /// The auto increment id generated, once the OK package has been read
    pub fn last_insert_id(&self) -> u64 {
        self.ok().map(|v| v.last_insert_id).unwrap_or_default()
    }

    /// Return the next row of the current result set
    pub async fn fetch(&mut self) -> ConnectionResult<Option<Row>> {
        self.conn.read_row(false).await
    }

    /// Return the remaining rows of the current result set
    pub async fn fetch_all(&mut self) -> ConnectionResult<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.conn.read_row(false).await? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Return the next row decoded as `T`
    pub async fn fetch_as<T: FromRow>(&mut self) -> ConnectionResult<Option<T>> {
        match self.conn.read_row(false).await? {
            Some(row) => Ok(Some(row.decode().loc("row")?)),
            None => Ok(None),
        }
    }

    /// Return the remaining rows decoded as `T`
    pub async fn fetch_all_as<T: FromRow>(&mut self) -> ConnectionResult<Vec<T>> {
        let mut rows = Vec::new();
        while let Some(row) = self.conn.read_row(false).await? {
            rows.push(row.decode().loc("row")?);
        }
        Ok(rows)
    }

    /// Return exactly the first row decoded as `T`, the remaining rows are discarded
    ///
    /// Fails with [ConnectionErrorContent::ExpectedRows] if there is no row
    pub async fn fetch_one_as<T: FromRow>(&mut self) -> ConnectionResult<T> {
        let row = self.fetch_as().await?;
        self.conn.discard().await?;
        row.ok_or_else(|| ConnectionErrorContent::ExpectedRows.into())
    }

    /// Return the next row with the last column left on the wire
    ///
    /// The last value of the row is [crate::value::Value::Null] and its bytes
    /// are read through the returned [ColumnReader]. Bytes not read are
    /// skipped by the next fetch.
    pub async fn fetch_streaming(&mut self) -> ConnectionResult<Option<(Row, ColumnReader<'_>)>> {
        match self.conn.read_row(true).await? {
            Some(row) => Ok(Some((row, ColumnReader { conn: self.conn }))),
            None => Ok(None),
        }
    }

    /// Skip the rest of the current result set and move to the next one
    ///
    /// Returns false when there are no more result sets
    pub async fn next_resultset(&mut self) -> ConnectionResult<bool> {
        self.conn.next_resultset().await
    }

    /// True if the rows of the current result set have been read and another result set follows
    pub fn has_more(&self) -> bool {
        self.conn.has_more_resultsets()
    }

    /// Read and throw away the remaining rows and result sets
    pub async fn discard(self) -> ConnectionResult<()> {
        self.conn.discard().await
    }

    /// Return the OK package of a command that was not expected to return rows
    ///
    /// Fails with [ConnectionErrorContent::UnexpectedRows] if there are rows,
    /// which are discarded
    pub async fn into_ok(self) -> ConnectionResult<OkPacket> {
        if !self.conn.columns().is_empty() {
            self.conn.discard().await?;
            return Err(ConnectionErrorContent::UnexpectedRows.into());
        }
        let ok = self.conn.ok_packet().cloned().unwrap_or_default();
        self.conn.discard().await?;
        Ok(ok)
    }
}

/// Reads the streamed last column of a row
pub struct ColumnReader<'r> {
    /// The connection the column is read from
    conn: &'r mut Connection,
}

impl ColumnReader<'_> {
    /// Read up to `buf.len()` bytes, 0 at the end of the column
    pub async fn read(&mut self, buf: &mut [u8]) -> ConnectionResult<usize> {
        self.conn.read_long_column(buf).await
    }

    /// Append the rest of the column to `out`
    pub async fn read_to_end(&mut self, out: &mut Vec<u8>) -> ConnectionResult<usize> {
        let mut buf = [0; 8192];
        let mut total = 0;
        loop {
            let n = self.conn.read_long_column(&mut buf).await?;
            if n == 0 {
                return Ok(total);
            }
            out.extend_from_slice(&buf[..n]);
            total += n;
        }
    }

    /// Bytes of the column not yet read
    pub fn remaining(&self) -> u64 {
        self.conn.long_column_left()
    }
}
