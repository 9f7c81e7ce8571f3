//! A scripted mysql server for testing qusql-wire without a database
//!
//! The server end of a [tokio::io::duplex] pipe is driven by the test,
//! which reads the commands the client sends and answers with packages
//! composed by the functions in [packet].
use qusql_wire::{
    constants::{client, status},
    packet_io::put_lenenc,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex};

#[cfg(test)]
mod test;

/// Largest payload of a physical package
pub const MAX_PAYLOAD: usize = 0xFFFFFF;

/// The connection id the mock server reports
pub const CONNECTION_ID: u32 = 42;

/// The challenge sent in the handshake
pub const SCRAMBLE: &[u8; 20] = b"0123456789abcdefghij";

/// Capabilities offered by the mock server
pub const SERVER_CAPABILITIES: u32 = client::LONG_PASSWORD
    | client::FOUND_ROWS
    | client::LONG_FLAG
    | client::CONNECT_WITH_DB
    | client::LOCAL_FILES
    | client::PROTOCOL_41
    | client::TRANSACTIONS
    | client::SECURE_CONNECTION
    | client::MULTI_STATEMENTS
    | client::MULTI_RESULTS
    | client::PS_MULTI_RESULTS
    | client::PLUGIN_AUTH
    | client::PLUGIN_AUTH_LENENC_CLIENT_DATA
    | client::SESSION_TRACK
    | client::DEPRECATE_EOF;

/// What the client sent in its handshake response
#[derive(Debug, Clone)]
pub struct HandshakeResponse {
    /// Capabilities the client asked for
    pub capabilities: u32,
    /// The user name
    pub user: String,
    /// The auth response
    pub auth: Vec<u8>,
    /// The schema to connect to
    pub database: Option<String>,
    /// The auth plugin the response is for
    pub plugin: Option<String>,
}

/// The server end of a connection
pub struct MockServer {
    /// Pipe to the client
    stream: DuplexStream,
    /// Sequence id of the next package
    seq: u8,
    /// Capabilities offered in the handshake
    pub capabilities: u32,
}

impl MockServer {
    /// Construct a server offering `capabilities` and the transport for the client
    pub fn new(capabilities: u32) -> (DuplexStream, MockServer) {
        let (client, server) = duplex(1 << 16);
        (
            client,
            MockServer {
                stream: server,
                seq: 0,
                capabilities,
            },
        )
    }

    /// Set the sequence id of the next package sent, to answer a pipelined command
    pub fn set_seq(&mut self, seq: u8) {
        self.seq = seq;
    }

    /// True if EOF packages are replaced by OK packages
    pub fn deprecate_eof(&self) -> bool {
        self.capabilities & client::DEPRECATE_EOF != 0
    }

    /// Read the next logical package, None if the client closed the pipe
    pub async fn try_recv(&mut self) -> Option<Vec<u8>> {
        let mut out = Vec::new();
        loop {
            let mut h = [0; 4];
            if self.stream.read_exact(&mut h).await.is_err() {
                return None;
            }
            let len = u32::from_le_bytes([h[0], h[1], h[2], 0]) as usize;
            assert_eq!(h[3], self.seq, "sequence id of client package");
            self.seq = h[3].wrapping_add(1);
            let start = out.len();
            out.resize(start + len, 0);
            self.stream
                .read_exact(&mut out[start..])
                .await
                .expect("client closed in the middle of a package");
            if len != MAX_PAYLOAD {
                return Some(out);
            }
        }
    }

    /// Read the next logical package in the current sequence
    pub async fn recv(&mut self) -> Vec<u8> {
        self.try_recv().await.expect("client closed the connection")
    }

    /// Read the next command, None if the client closed the pipe
    pub async fn try_command(&mut self) -> Option<Vec<u8>> {
        self.seq = 0;
        self.try_recv().await
    }

    /// Read the next command
    pub async fn command(&mut self) -> Vec<u8> {
        self.try_command().await.expect("client closed the connection")
    }

    /// Read a command and check it is `command` with `payload`
    pub async fn expect(&mut self, command: u8, payload: &[u8]) {
        let p = self.command().await;
        assert_eq!(p[0], command, "command byte");
        assert_eq!(
            String::from_utf8_lossy(&p[1..]),
            String::from_utf8_lossy(payload)
        );
    }

    /// Read a COM_QUERY and check the sql
    pub async fn expect_query(&mut self, sql: &str) {
        self.expect(qusql_wire::constants::com::QUERY, sql.as_bytes())
            .await
    }

    /// Check that the client closed the pipe without sending anything
    pub async fn expect_closed(&mut self) {
        assert!(self.try_command().await.is_none(), "expected close");
    }

    /// Send a package, splitting it if it is too long
    pub async fn send(&mut self, payload: &[u8]) {
        let mut rest = payload;
        loop {
            let n = rest.len().min(MAX_PAYLOAD);
            let mut h = (n as u32).to_le_bytes();
            h[3] = self.seq;
            self.seq = self.seq.wrapping_add(1);
            self.stream.write_all(&h).await.expect("write header");
            self.stream.write_all(&rest[..n]).await.expect("write payload");
            rest = &rest[n..];
            if n < MAX_PAYLOAD {
                return;
            }
        }
    }

    /// Send the initial handshake and read the response
    pub async fn greet(&mut self, plugin: &str, scramble: &[u8]) -> HandshakeResponse {
        self.seq = 0;
        self.send(&packet::handshake_v10(self.capabilities, scramble, plugin))
            .await;
        let p = self.recv().await;
        let capabilities = u32::from_le_bytes([p[0], p[1], p[2], p[3]]);
        let mut pos = 32;
        let nul = |pos: usize| pos + p[pos..].iter().position(|c| *c == 0).expect("nul");
        let end = nul(pos);
        let user = String::from_utf8_lossy(&p[pos..end]).into_owned();
        pos = end + 1;
        let len = p[pos] as usize;
        let auth = p[pos + 1..pos + 1 + len].to_vec();
        pos += 1 + len;
        let mut database = None;
        if capabilities & client::CONNECT_WITH_DB != 0 && pos < p.len() {
            let end = nul(pos);
            database = Some(String::from_utf8_lossy(&p[pos..end]).into_owned());
            pos = end + 1;
        }
        let mut plugin = None;
        if capabilities & client::PLUGIN_AUTH != 0 && pos < p.len() {
            let end = nul(pos);
            plugin = Some(String::from_utf8_lossy(&p[pos..end]).into_owned());
        }
        HandshakeResponse {
            capabilities,
            user,
            auth,
            database,
            plugin,
        }
    }

    /// Accept a client using mysql_native_password
    pub async fn accept(&mut self) -> HandshakeResponse {
        let r = self.greet("mysql_native_password", SCRAMBLE).await;
        self.send(&packet::ok(0, 0, status::AUTOCOMMIT)).await;
        r
    }

    /// Send the end of a result set, an OK or EOF package depending on capabilities
    pub async fn send_end(&mut self, status_flags: u16) {
        if self.deprecate_eof() {
            self.send(&packet::eof_ok(status_flags)).await
        } else {
            self.send(&packet::eof(status_flags)).await
        }
    }

    /// Send column definitions, and the EOF following them when needed
    pub async fn send_columns(&mut self, columns: &[Vec<u8>]) {
        self.send(&packet::lenenc(columns.len() as u64)).await;
        for c in columns {
            self.send(c).await;
        }
        if !self.deprecate_eof() {
            self.send(&packet::eof(status::AUTOCOMMIT)).await;
        }
    }

    /// Send a whole result set
    pub async fn send_result_set(&mut self, columns: &[Vec<u8>], rows: &[Vec<u8>], status_flags: u16) {
        self.send_columns(columns).await;
        for r in rows {
            self.send(r).await;
        }
        self.send_end(status_flags).await;
    }
}

/// Composition of server packages
pub mod packet {
    use super::*;
    use qusql_wire::constants::type_;

    /// A length encoded integer
    pub fn lenenc(v: u64) -> Vec<u8> {
        let mut out = Vec::new();
        put_lenenc(&mut out, v);
        out
    }

    /// Append a length encoded string
    pub fn put_str(out: &mut Vec<u8>, s: &[u8]) {
        put_lenenc(out, s.len() as u64);
        out.extend_from_slice(s);
    }

    /// A protocol 10 initial handshake
    pub fn handshake_v10(capabilities: u32, scramble: &[u8], plugin: &str) -> Vec<u8> {
        let mut p = vec![10];
        p.extend_from_slice(b"11.4.2-MariaDB-mock\0");
        p.extend_from_slice(&CONNECTION_ID.to_le_bytes());
        p.extend_from_slice(&scramble[..8]);
        p.push(0);
        p.extend_from_slice(&(capabilities as u16).to_le_bytes());
        p.push(45);
        p.extend_from_slice(&status::AUTOCOMMIT.to_le_bytes());
        p.extend_from_slice(&((capabilities >> 16) as u16).to_le_bytes());
        p.push(scramble.len() as u8 + 1);
        p.extend_from_slice(&[0; 10]);
        p.extend_from_slice(&scramble[8..]);
        p.push(0);
        p.extend_from_slice(plugin.as_bytes());
        p.push(0);
        p
    }

    /// An OK package
    pub fn ok(affected_rows: u64, last_insert_id: u64, status_flags: u16) -> Vec<u8> {
        let mut p = vec![0x00];
        put_lenenc(&mut p, affected_rows);
        put_lenenc(&mut p, last_insert_id);
        p.extend_from_slice(&status_flags.to_le_bytes());
        p.extend_from_slice(&0u16.to_le_bytes());
        p
    }

    /// An OK package reporting session state changes
    pub fn session_ok(status_flags: u16, variables: &[(&str, &str)], schema: Option<&str>) -> Vec<u8> {
        let mut state = Vec::new();
        for (name, value) in variables {
            let mut v = Vec::new();
            put_str(&mut v, name.as_bytes());
            put_str(&mut v, value.as_bytes());
            state.push(0);
            put_str(&mut state, &v);
        }
        if let Some(schema) = schema {
            let mut v = Vec::new();
            put_str(&mut v, schema.as_bytes());
            state.push(1);
            put_str(&mut state, &v);
        }
        let mut p = ok(0, 0, status_flags | status::SESSION_STATE_CHANGED);
        put_str(&mut p, b"");
        put_str(&mut p, &state);
        p
    }

    /// An OK package with its header replaced by 0xFE, ending rows with DEPRECATE_EOF
    pub fn eof_ok(status_flags: u16) -> Vec<u8> {
        let mut p = ok(0, 0, status_flags);
        p[0] = 0xFE;
        p
    }

    /// A legacy EOF package
    pub fn eof(status_flags: u16) -> Vec<u8> {
        let mut p = vec![0xFE, 0, 0];
        p.extend_from_slice(&status_flags.to_le_bytes());
        p
    }

    /// An error package
    pub fn err(code: u16, sqlstate: &str, message: &str) -> Vec<u8> {
        let mut p = vec![0xFF];
        p.extend_from_slice(&code.to_le_bytes());
        p.push(b'#');
        p.extend_from_slice(sqlstate.as_bytes());
        p.extend_from_slice(message.as_bytes());
        p
    }

    /// A column definition
    pub fn column(name: &str, r#type: u8, flags: u16, character_set: u16) -> Vec<u8> {
        let mut p = Vec::new();
        for s in ["def", "test", "t", "t", name, name] {
            put_str(&mut p, s.as_bytes());
        }
        p.push(0x0c);
        p.extend_from_slice(&character_set.to_le_bytes());
        p.extend_from_slice(&255u32.to_le_bytes());
        p.push(r#type);
        p.extend_from_slice(&flags.to_le_bytes());
        p.extend_from_slice(&[0, 0, 0]);
        p
    }

    /// A column definition in the pre 4.1 format, with 2 byte flags
    pub fn legacy_column(name: &str, r#type: u8, flags: u16) -> Vec<u8> {
        let mut p = Vec::new();
        put_str(&mut p, b"t");
        put_str(&mut p, name.as_bytes());
        p.push(3);
        p.extend_from_slice(&255u32.to_le_bytes()[..3]);
        p.extend_from_slice(&[1, r#type, 3]);
        p.extend_from_slice(&flags.to_le_bytes());
        p.push(0);
        p
    }

    /// A BIGINT column
    pub fn int_column(name: &str) -> Vec<u8> {
        column(name, type_::LONG_LONG, 0, 63)
    }

    /// A VARCHAR column in utf8mb4
    pub fn text_column(name: &str) -> Vec<u8> {
        column(name, type_::VAR_STRING, 0, 45)
    }

    /// A row in the text protocol
    pub fn text_row(values: &[Option<&str>]) -> Vec<u8> {
        let mut p = Vec::new();
        for v in values {
            match v {
                Some(v) => put_str(&mut p, v.as_bytes()),
                None => p.push(0xFB),
            }
        }
        p
    }

    /// A row in the binary protocol, values already encoded, None is NULL
    pub fn binary_row(values: &[Option<Vec<u8>>]) -> Vec<u8> {
        let mut bitmap = vec![0; (values.len() + 2).div_ceil(8)];
        let mut body = Vec::new();
        for (i, v) in values.iter().enumerate() {
            match v {
                Some(v) => body.extend_from_slice(v),
                None => bitmap[(i + 2) / 8] |= 1 << ((i + 2) % 8),
            }
        }
        let mut p = vec![0x00];
        p.extend_from_slice(&bitmap);
        p.extend_from_slice(&body);
        p
    }

    /// The head of a COM_STMT_PREPARE response
    pub fn prepare_ok(stmt_id: u32, columns: u16, params: u16) -> Vec<u8> {
        let mut p = vec![0x00];
        p.extend_from_slice(&stmt_id.to_le_bytes());
        p.extend_from_slice(&columns.to_le_bytes());
        p.extend_from_slice(&params.to_le_bytes());
        p.push(0);
        p.extend_from_slice(&0u16.to_le_bytes());
        p
    }
}
