//! Composition of the commands sent to the server
//!
//! The functions here only append packages to the write buffer of a
//! [PacketIo]. Nothing is sent until the connection decides to, so several
//! commands may share one network write.
use std::sync::Arc;

use bytes::BytesMut;

use crate::{
    codec::NullBitmap,
    constants::com,
    decode::Column,
    error::{ConnectionErrorContent, ConnectionResult},
    packet_io::PacketIo,
    param::{BindError, LONG_DATA_CHUNK, Param},
};

/// A statement prepared on the server
///
/// Obtained from [crate::connection::Connection::prepare]. The handle is only
/// valid on the connection that prepared it, until it is disposed or the
/// connection is reset.
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    /// The server id of the statement
    pub(crate) id: u32,
    /// Unique number of this prepare on the connection
    pub(crate) serial: u64,
    /// The connection generation the statement was prepared in
    pub(crate) generation: u64,
    /// Definitions of the placeholders
    pub(crate) params: Arc<Vec<Column>>,
    /// Definitions of the result columns
    pub(crate) columns: Arc<Vec<Column>>,
}

impl PreparedStatement {
    /// The server id of the statement
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Number of placeholders
    pub fn num_params(&self) -> usize {
        self.params.len()
    }

    /// Definitions of the placeholders, as reported by the server
    pub fn params(&self) -> &[Column] {
        &self.params
    }

    /// Definitions of the result columns, as reported by the server
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }
}

/// Compose a command consisting of the command byte and a payload
pub(crate) fn put_simple(io: &mut PacketIo, command: u8, payload: &[u8]) {
    io.start_command();
    io.start_packet();
    io.put_u8(command);
    io.put_bytes(payload);
    io.finish_packet();
}

/// Compose a COM_STMT_CLOSE, the server sends no response
pub(crate) fn put_close(io: &mut PacketIo, stmt_id: u32) {
    put_simple(io, com::STMT_CLOSE, &stmt_id.to_le_bytes());
}

/// Compose COM_SET_OPTION enabling or disabling multi statements
pub(crate) fn put_set_option(io: &mut PacketIo, multi_statements: bool) {
    let option: u16 = if multi_statements { 0 } else { 1 };
    put_simple(io, com::SET_OPTION, &option.to_le_bytes());
}

/// Compose COM_STMT_SEND_LONG_DATA packages for data, in chunks of [LONG_DATA_CHUNK]
pub(crate) fn put_long_data(io: &mut PacketIo, stmt_id: u32, param: u16, data: &[u8]) {
    for chunk in data.chunks(LONG_DATA_CHUNK) {
        io.start_command();
        io.start_packet();
        io.put_u8(com::STMT_SEND_LONG_DATA);
        io.put_u32(stmt_id);
        io.put_u16(param);
        io.put_bytes(chunk);
        io.finish_packet();
    }
}

/// Check the number of parameters and that every inline value can be encoded
pub(crate) fn check_params(num_params: usize, params: &[Param<'_>]) -> ConnectionResult<()> {
    if params.len() > num_params {
        return Err(
            ConnectionErrorContent::Bind(num_params as u16, BindError::TooManyArgumentsBound)
                .into(),
        );
    }
    if params.len() < num_params {
        return Err(
            ConnectionErrorContent::Bind(params.len() as u16, BindError::TooFewArgumentsBound)
                .into(),
        );
    }
    let mut scratch = BytesMut::new();
    for (i, p) in params.iter().enumerate() {
        if p.is_long_data() {
            continue;
        }
        scratch.clear();
        p.encode(&mut scratch)
            .map_err(|e| ConnectionErrorContent::Bind(i as u16, e))?;
    }
    Ok(())
}

/// Compose COM_STMT_EXECUTE
///
/// Long data parameters must already have been sent, except the ones marked
/// in `inline_readers` which turned out to be empty and are encoded inline.
pub(crate) fn put_execute(
    io: &mut PacketIo,
    stmt_id: u32,
    params: &[Param<'_>],
    inline_readers: &[bool],
) -> ConnectionResult<()> {
    io.start_command();
    io.start_packet();
    io.put_u8(com::STMT_EXECUTE);
    io.put_u32(stmt_id);
    io.put_u8(0); // CURSOR_TYPE_NO_CURSOR
    io.put_u32(1); // iteration count
    if !params.is_empty() {
        let mut nulls = NullBitmap::new(params.len(), 0);
        for (i, p) in params.iter().enumerate() {
            if matches!(p, Param::Null) {
                nulls.set_null(i);
            }
        }
        io.put_bytes(nulls.as_bytes());
        io.put_u8(1); // send types
        for p in params {
            let (t, flag) = p.type_code();
            io.put_u8(t);
            io.put_u8(flag);
        }
        for (i, p) in params.iter().enumerate() {
            let inline = match p {
                Param::Reader(_) => inline_readers.get(i).copied().unwrap_or(false),
                p => !p.is_long_data(),
            };
            if inline {
                p.encode(io.write_buf())
                    .map_err(|e| ConnectionErrorContent::Bind(i as u16, e))?;
            }
        }
    }
    io.finish_packet();
    Ok(())
}

/// Escape an XA transaction id as a quoted SQL string
///
/// Backslashes are only escape characters when the session does not have
/// NO_BACKSLASH_ESCAPES in its sql_mode
pub(crate) fn quote_xid(xid: &str, no_backslash_escapes: bool) -> String {
    let mut out = String::with_capacity(xid.len() + 2);
    out.push('\'');
    for c in xid.chars() {
        match c {
            '\'' => out.push_str("''"),
            '\\' if !no_backslash_escapes => out.push_str("\\\\"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}
