//! Parsing of the generic response packages: OK, EOF and column definitions
use crate::{
    constants::{BINARY_COLLATION, client, column_flag, session_track, status},
    decode::Column,
    error::{ConnectionResult, Except, WithLoc, protocol_error},
    package_parser::PackageParser,
};

/// A change of session state reported in an OK package
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionChange {
    /// A tracked system variable changed
    SystemVariable {
        /// Name of the variable
        name: String,
        /// The new value
        value: String,
    },
    /// The current schema changed
    Schema(String),
    /// Some other tracked state, with its type byte
    Other(u8),
}

/// The summary of a command that did not return rows
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OkPacket {
    /// Number of rows changed, or matched with FOUND_ROWS
    pub affected_rows: u64,
    /// The auto increment id generated by the last insert
    pub last_insert_id: u64,
    /// Server status flags, see [crate::constants::status]
    pub status_flags: u16,
    /// Number of warnings
    pub warnings: u16,
    /// Human readable information
    pub info: String,
    /// Changes of session state
    pub session_changes: Vec<SessionChange>,
}

impl OkPacket {
    /// Number of rows changed
    pub fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    /// The auto increment id generated by the last insert
    pub fn last_insert_id(&self) -> u64 {
        self.last_insert_id
    }

    /// More result sets follow this one
    pub fn more_results(&self) -> bool {
        self.status_flags & status::MORE_RESULTS_EXISTS != 0
    }
}

/// Parse one entry of the system variable session tracker
fn parse_system_variable(data: &[u8]) -> ConnectionResult<SessionChange> {
    let mut p = PackageParser::new(data);
    let name = p.get_lenenc_blob().loc("variable name")?;
    let value = p.get_lenenc_blob().loc("variable value")?;
    Ok(SessionChange::SystemVariable {
        name: String::from_utf8_lossy(name).into_owned(),
        value: String::from_utf8_lossy(value).into_owned(),
    })
}

/// Parse the session state change block
fn parse_session_changes(data: &[u8], out: &mut Vec<SessionChange>) -> ConnectionResult<()> {
    let mut p = PackageParser::new(data);
    while !p.is_empty() {
        let t = p.get_u8().loc("session state type")?;
        let data = p.get_lenenc_blob().loc("session state data")?;
        out.push(match t {
            session_track::SYSTEM_VARIABLES => parse_system_variable(data)?,
            session_track::SCHEMA => {
                let name = PackageParser::new(data)
                    .get_lenenc_blob()
                    .loc("schema name")?;
                SessionChange::Schema(String::from_utf8_lossy(name).into_owned())
            }
            t => SessionChange::Other(t),
        });
    }
    Ok(())
}

/// Parse an OK package, the header byte 0x00 or 0xFE included
///
/// See <https://mariadb.com/docs/server/reference/clientserver-protocol/4-server-response-packets/ok_packet>
pub fn parse_ok(package: &[u8], capabilities: u32) -> ConnectionResult<OkPacket> {
    let mut p = PackageParser::new(package);
    match p.get_u8().loc("ok header")? {
        0x00 | 0xFE => (),
        v => return Err(protocol_error(format!("Unexpected ok header {v}"))),
    }
    let mut ok = OkPacket {
        affected_rows: p.get_lenenc().loc("affected_rows")?,
        last_insert_id: p.get_lenenc().loc("last_insert_id")?,
        ..Default::default()
    };
    if capabilities & client::PROTOCOL_41 != 0 {
        ok.status_flags = p.get_u16().loc("status_flags")?;
        ok.warnings = p.get_u16().loc("warnings")?;
    } else if capabilities & client::TRANSACTIONS != 0 {
        ok.status_flags = p.get_u16().loc("status_flags")?;
    }
    if capabilities & client::SESSION_TRACK != 0 {
        if !p.is_empty() {
            ok.info = String::from_utf8_lossy(p.get_lenenc_blob().loc("info")?).into_owned();
        }
        if ok.status_flags & status::SESSION_STATE_CHANGED != 0 && !p.is_empty() {
            let data = p.get_lenenc_blob().loc("session state")?;
            parse_session_changes(data, &mut ok.session_changes)?;
        }
    } else {
        ok.info = String::from_utf8_lossy(p.get_eof_bytes()).into_owned();
    }
    Ok(ok)
}

/// Parse a legacy EOF package, returning the warnings and status flags
pub fn parse_eof(package: &[u8], capabilities: u32) -> ConnectionResult<(u16, u16)> {
    let mut p = PackageParser::new(package);
    match p.get_u8().loc("eof header")? {
        0xFE => (),
        v => return Err(protocol_error(format!("Unexpected eof header {v}"))),
    }
    if capabilities & client::PROTOCOL_41 == 0 || p.is_empty() {
        return Ok((0, 0));
    }
    let warnings = p.get_u16().loc("warnings")?;
    let status_flags = p.get_u16().loc("status_flags")?;
    Ok((warnings, status_flags))
}

/// Read a length encoded string, replacing invalid utf-8
fn lossy(p: &mut PackageParser, loc: &'static str) -> ConnectionResult<String> {
    Ok(String::from_utf8_lossy(p.get_lenenc_blob().loc(loc)?).into_owned())
}

/// Parse a column definition package in the 4.1 or the pre 4.1 format
pub fn parse_column_definition(package: &[u8], capabilities: u32) -> ConnectionResult<Column> {
    let mut p = PackageParser::new(package);
    if capabilities & client::PROTOCOL_41 == 0 {
        let table = lossy(&mut p, "table")?;
        let name = lossy(&mut p, "name")?;
        let len_size = p.get_lenenc().loc("length size")?;
        let column_length = p.get_uint(len_size as usize).loc("column_length")? as u32;
        let type_size = p.get_lenenc().loc("type size")?;
        let r#type = p.get_uint(type_size as usize).loc("type")? as u8;
        let (flags, decimals) = if p.get_lenenc().loc("flags size")? == 3 {
            (p.get_u16().loc("flags")?, p.get_u8().loc("decimals")?)
        } else {
            (p.get_u8().loc("flags")?.into(), p.get_u8().loc("decimals")?)
        };
        let character_set = if flags & column_flag::BINARY != 0 {
            BINARY_COLLATION
        } else {
            33
        };
        return Ok(Column {
            catalog: String::new(),
            schema: String::new(),
            org_table: table.clone(),
            table,
            org_name: name.clone(),
            name,
            character_set,
            column_length,
            r#type,
            flags,
            decimals,
        });
    }

    let catalog = lossy(&mut p, "catalog")?;
    let schema = lossy(&mut p, "schema")?;
    let table = lossy(&mut p, "table")?;
    let org_table = lossy(&mut p, "org_table")?;
    let name = lossy(&mut p, "name")?;
    let org_name = lossy(&mut p, "org_name")?;
    p.get_lenenc().ev("length of fixed length fields", 0x0C)?;
    let character_set = p.get_u16().loc("character_set")?;
    let column_length = p.get_u32().loc("column_length")?;
    let r#type = p.get_u8().loc("type")?;
    let flags = p.get_u16().loc("flags")?;
    let decimals = p.get_u8().loc("decimals")?;
    Ok(Column {
        catalog,
        schema,
        table,
        org_table,
        name,
        org_name,
        character_set,
        column_length,
        r#type,
        flags,
        decimals,
    })
}

/// The head of a COM_STMT_PREPARE response
#[derive(Debug, Clone, Copy)]
pub(crate) struct PrepareOk {
    /// Server id of the statement
    pub stmt_id: u32,
    /// Number of result columns
    pub columns: u16,
    /// Number of placeholders
    pub params: u16,
}

/// Parse the 0x00 headed response to COM_STMT_PREPARE
pub(crate) fn parse_prepare_ok(package: &[u8]) -> ConnectionResult<PrepareOk> {
    let mut p = PackageParser::new(package);
    p.get_u8().loc("prepare header")?;
    let stmt_id = p.get_u32().loc("stmt_id")?;
    let columns = p.get_u16().loc("num_columns")?;
    let params = p.get_u16().loc("num_params")?;
    Ok(PrepareOk {
        stmt_id,
        columns,
        params,
    })
}
