//! The connection phase: initial handshake, handshake response and authentication
//!
//! See <https://mariadb.com/docs/server/reference/clientserver-protocol/1-connecting/connection>
use std::borrow::Cow;

use tokio::net::TcpStream;
use tracing::debug;

use crate::{
    auth::{AuthPlugin, AuthProgress, MYSQL_NATIVE_PASSWORD, plugin_for, trim_scramble},
    constants::{DEFAULT_COLLATION, MAX_PACKAGE_PAYLOAD, client},
    error::{
        ConnectionErrorContent, ConnectionResult, Except, WithLoc, parse_mysql_error,
        protocol_error,
    },
    options::{Address, ConnectionOptions},
    package_parser::PackageParser,
    packet_io::{PacketIo, Transport},
    packets::parse_ok,
};

/// Longest user name, password or schema we send
const MAX_CREDENTIAL_LENGTH: usize = 256;

/// The initial handshake package sent by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakePayload {
    /// Protocol version 9, used by ancient servers
    V9 {
        /// Human readable server version
        server_version: String,
        /// Id of the connection on the server
        connection_id: u32,
        /// Challenge for the password
        scramble: Vec<u8>,
    },
    /// Protocol version 10
    V10 {
        /// Human readable server version
        server_version: String,
        /// Id of the connection on the server
        connection_id: u32,
        /// Both parts of the challenge joined, without trailing NUL
        scramble: Vec<u8>,
        /// Capabilities of the server
        capabilities: u32,
        /// Default collation of the server
        charset: u8,
        /// Server status flags
        status_flags: u16,
        /// Name of the auth plugin the scramble is for
        auth_plugin: Option<String>,
    },
}

impl HandshakePayload {
    /// Parse the initial handshake package
    pub fn parse(package: &[u8]) -> ConnectionResult<Self> {
        let mut p = PackageParser::new(package);
        let version = p.get_u8().loc("protocol version")?;
        let server_version =
            String::from_utf8_lossy(p.get_null_bytes().loc("server version")?).into_owned();
        let connection_id = p.get_u32().loc("connection id")?;
        match version {
            9 => {
                let scramble = if p.is_empty() {
                    Vec::new()
                } else {
                    p.get_null_bytes().loc("scramble")?.to_vec()
                };
                Ok(HandshakePayload::V9 {
                    server_version,
                    connection_id,
                    scramble,
                })
            }
            10.. => {
                let mut scramble = p.get_bytes(8).loc("scramble part 1")?.to_vec();
                p.get_u8().ev("filler", 0)?;
                let mut capabilities = u32::from(p.get_u16().loc("capability flags")?);
                let mut charset = DEFAULT_COLLATION;
                let mut status_flags = 0;
                let mut auth_plugin = None;
                if !p.is_empty() {
                    charset = p.get_u8().loc("character set")?;
                    status_flags = p.get_u16().loc("status flags")?;
                    capabilities |= u32::from(p.get_u16().loc("capability flags 2")?) << 16;
                    let data_len = p.get_u8().loc("auth data length")? as usize;
                    p.skip(10).loc("reserved")?;
                    if capabilities & client::SECURE_CONNECTION != 0 {
                        let len = data_len.saturating_sub(8).max(13).min(p.remaining());
                        scramble.extend_from_slice(p.get_bytes(len).loc("scramble part 2")?);
                    }
                    if capabilities & client::PLUGIN_AUTH != 0 && !p.is_empty() {
                        // Some servers omit the terminating NUL
                        let name = match p.get_null_bytes() {
                            Ok(v) => v,
                            Err(_) => p.get_eof_bytes(),
                        };
                        auth_plugin = Some(String::from_utf8_lossy(name).into_owned());
                    }
                }
                let len = trim_scramble(&scramble).len();
                scramble.truncate(len);
                Ok(HandshakePayload::V10 {
                    server_version,
                    connection_id,
                    scramble,
                    capabilities,
                    charset,
                    status_flags,
                    auth_plugin,
                })
            }
            v => Err(protocol_error(format!("Unsupported protocol version {v}"))),
        }
    }
}

/// The capabilities we ask for, masked by what the server offers
pub fn client_capabilities(options: &ConnectionOptions<'_>, server: u32) -> u32 {
    let mut caps = client::LONG_PASSWORD
        | client::LONG_FLAG
        | client::PROTOCOL_41
        | client::TRANSACTIONS
        | client::SECURE_CONNECTION
        | client::MULTI_RESULTS
        | client::PS_MULTI_RESULTS
        | client::PLUGIN_AUTH
        | client::PLUGIN_AUTH_LENENC_CLIENT_DATA
        | client::SESSION_TRACK
        | client::DEPRECATE_EOF;
    if options.database.is_some() {
        caps |= client::CONNECT_WITH_DB;
    }
    if options.local_infile.is_some() {
        caps |= client::LOCAL_FILES;
    }
    if options.found_rows {
        caps |= client::FOUND_ROWS;
    }
    if options.ignore_space {
        caps |= client::IGNORE_SPACE;
    }
    if options.multi_statements {
        caps |= client::MULTI_STATEMENTS;
    }
    caps & server
}

/// What we learned about the server while connecting
#[derive(Debug)]
pub(crate) struct Session {
    /// Human readable server version
    pub server_version: String,
    /// Id of the connection on the server
    pub connection_id: u32,
    /// Negotiated capabilities
    pub capabilities: u32,
    /// Status flags of the final OK package
    pub status_flags: u16,
}

/// Open the transport for an address
pub(crate) async fn open_transport(address: &Address) -> ConnectionResult<Box<dyn Transport>> {
    match address {
        Address::Tcp(host, port) => {
            let stream = TcpStream::connect((host.as_str(), *port)).await?;
            stream.set_nodelay(true)?;
            Ok(Box::new(stream))
        }
        #[cfg(unix)]
        Address::Unix(path) => Ok(Box::new(tokio::net::UnixStream::connect(path).await?)),
        #[cfg(not(unix))]
        Address::Unix(path) => Err(ConnectionErrorContent::InvalidAddress(
            path.display().to_string(),
        )
        .into()),
    }
}

/// Check that a credential fits in the handshake response
fn check_length(what: &'static str, v: &str) -> ConnectionResult<()> {
    if v.len() > MAX_CREDENTIAL_LENGTH {
        return Err(ConnectionErrorContent::OversizedField {
            what,
            len: v.len() as u64,
            limit: MAX_CREDENTIAL_LENGTH as u64,
        }
        .into());
    }
    Ok(())
}

/// Compose the 4.1 handshake response
fn put_response_41(
    io: &mut PacketIo,
    options: &ConnectionOptions<'_>,
    capabilities: u32,
    plugin: &str,
    auth: &[u8],
) {
    io.start_packet();
    io.put_u32(capabilities);
    io.put_u32(MAX_PACKAGE_PAYLOAD as u32 + 1);
    io.put_u8(DEFAULT_COLLATION);
    io.put_bytes(&[0; 23]);
    io.put_null_str(options.user.as_bytes());
    if capabilities & client::PLUGIN_AUTH_LENENC_CLIENT_DATA != 0 {
        io.put_lenenc_bytes(auth);
    } else if capabilities & client::SECURE_CONNECTION != 0 {
        io.put_u8(auth.len() as u8);
        io.put_bytes(auth);
    } else {
        io.put_null_str(auth);
    }
    if capabilities & client::CONNECT_WITH_DB != 0
        && let Some(db) = &options.database
    {
        io.put_null_str(db.as_bytes());
    }
    if capabilities & client::PLUGIN_AUTH != 0 {
        io.put_null_str(plugin.as_bytes());
    }
    io.finish_packet();
}

/// Compose the 3.20 handshake response, for protocol 9 servers and v10 servers without 4.1
fn put_response_320(
    io: &mut PacketIo,
    options: &ConnectionOptions<'_>,
    capabilities: u32,
    auth: &[u8],
) {
    io.start_packet();
    io.put_u16(capabilities as u16);
    io.put_u24(MAX_PACKAGE_PAYLOAD as u32);
    io.put_null_str(options.user.as_bytes());
    match &options.database {
        Some(db) if capabilities & client::CONNECT_WITH_DB != 0 => {
            io.put_null_str(auth);
            io.put_null_str(db.as_bytes());
        }
        _ => io.put_bytes(auth),
    }
    io.finish_packet();
}

/// Send a package with auth data in the current sequence
async fn send_auth_data(io: &mut PacketIo, data: &[u8]) -> ConnectionResult<()> {
    io.start_packet();
    io.put_bytes(data);
    io.finish_packet();
    io.send().await
}

/// Perform the handshake and authentication on a freshly opened transport
pub(crate) async fn handshake(
    io: &mut PacketIo,
    options: &ConnectionOptions<'_>,
) -> ConnectionResult<Session> {
    check_length("user", &options.user)?;
    check_length("password", &options.password)?;
    if let Some(db) = &options.database {
        check_length("database", db)?;
    }
    let server_public_key = options.server_public_key.as_ref().map(Cow::as_ref);

    let handshake = HandshakePayload::parse(io.read_packet().await?)?;
    let (server_version, connection_id, capabilities, mut plugin): (_, _, _, Box<dyn AuthPlugin>) =
        match handshake {
            HandshakePayload::V9 {
                server_version,
                connection_id,
                scramble,
            } => {
                let capabilities =
                    client_capabilities(options, client::LONG_PASSWORD | client::CONNECT_WITH_DB);
                let mut plugin = plugin_for(MYSQL_NATIVE_PASSWORD, &scramble, None)?;
                let auth = plugin.quick_auth(&options.password);
                put_response_320(io, options, capabilities, &auth);
                (server_version, connection_id, capabilities, plugin)
            }
            HandshakePayload::V10 {
                server_version,
                connection_id,
                scramble,
                capabilities,
                auth_plugin,
                ..
            } => {
                let capabilities = client_capabilities(options, capabilities);
                let name = auth_plugin.as_deref().unwrap_or(MYSQL_NATIVE_PASSWORD);
                let mut plugin = plugin_for(name, &scramble, server_public_key)?;
                let auth = plugin.quick_auth(&options.password);
                if capabilities & client::PROTOCOL_41 != 0 {
                    put_response_41(io, options, capabilities, plugin.name(), &auth);
                } else {
                    put_response_320(io, options, capabilities, &auth);
                }
                (server_version, connection_id, capabilities, plugin)
            }
        };
    debug!(connection_id, server_version = %server_version, plugin = plugin.name(), "authenticating");
    io.send().await?;

    loop {
        let package = io.read_packet().await?;
        let progress = match package.first() {
            Some(0x00) => {
                let ok = parse_ok(package, capabilities)?;
                return Ok(Session {
                    server_version,
                    connection_id,
                    capabilities,
                    status_flags: ok.status_flags,
                });
            }
            Some(0xFF) => return Err(parse_mysql_error(&mut PackageParser::new(&package[1..]), 0)),
            Some(0xFE) => {
                if package.len() == 1 {
                    return Err(ConnectionErrorContent::UnknownAuthPlugin(
                        "mysql_old_password".to_string(),
                    )
                    .into());
                }
                let mut p = PackageParser::new(&package[1..]);
                let name = p.get_null_str().loc("auth plugin name")?;
                let scramble = trim_scramble(p.get_eof_bytes());
                debug!(connection_id, plugin = name, "auth switch");
                plugin = plugin_for(name, scramble, server_public_key)?;
                AuthProgress::Send(plugin.quick_auth(&options.password))
            }
            Some(_) => plugin.progress(&options.password, package)?,
            None => return Err(protocol_error("Empty auth package")),
        };
        match progress {
            AuthProgress::Send(data) => send_auth_data(io, &data).await?,
            AuthProgress::Continue | AuthProgress::Done => (),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v10(caps: u32, plugin: &[u8]) -> Vec<u8> {
        let mut p = vec![10];
        p.extend_from_slice(b"11.4.2-MariaDB\0");
        p.extend_from_slice(&7u32.to_le_bytes());
        p.extend_from_slice(b"abcdefgh\0");
        p.extend_from_slice(&(caps as u16).to_le_bytes());
        p.push(45);
        p.extend_from_slice(&2u16.to_le_bytes());
        p.extend_from_slice(&((caps >> 16) as u16).to_le_bytes());
        p.push(21);
        p.extend_from_slice(&[0; 10]);
        p.extend_from_slice(b"ijklmnopqrst\0");
        p.extend_from_slice(plugin);
        p
    }

    #[test]
    fn parse_v10() {
        let caps = client::PROTOCOL_41 | client::SECURE_CONNECTION | client::PLUGIN_AUTH;
        let h = HandshakePayload::parse(&v10(caps, b"caching_sha2_password\0")).unwrap();
        let HandshakePayload::V10 {
            server_version,
            connection_id,
            scramble,
            capabilities,
            status_flags,
            auth_plugin,
            ..
        } = h
        else {
            panic!("expected v10");
        };
        assert_eq!(server_version, "11.4.2-MariaDB");
        assert_eq!(connection_id, 7);
        assert_eq!(scramble, b"abcdefghijklmnopqrst");
        assert_eq!(capabilities, caps);
        assert_eq!(status_flags, 2);
        assert_eq!(auth_plugin.as_deref(), Some("caching_sha2_password"));

        // Plugin name without NUL
        let h = HandshakePayload::parse(&v10(caps, b"mysql_native_password")).unwrap();
        assert!(matches!(
            h,
            HandshakePayload::V10 { auth_plugin: Some(ref n), .. } if n == "mysql_native_password"
        ));

        // Later protocol versions keep the v10 layout
        let mut p = v10(caps, b"mysql_native_password\0");
        p[0] = 11;
        assert!(matches!(HandshakePayload::parse(&p), Ok(HandshakePayload::V10 { .. })));

        let mut p = v10(caps, b"mysql_native_password\0");
        p[28] = 1;
        assert!(HandshakePayload::parse(&p).is_err());
    }

    #[test]
    fn parse_v9_and_unknown() {
        let mut p = vec![9];
        p.extend_from_slice(b"3.22\0");
        p.extend_from_slice(&3u32.to_le_bytes());
        p.extend_from_slice(b"12345678\0");
        assert_eq!(
            HandshakePayload::parse(&p).unwrap(),
            HandshakePayload::V9 {
                server_version: "3.22".to_string(),
                connection_id: 3,
                scramble: b"12345678".to_vec(),
            }
        );
        p[0] = 8;
        assert!(HandshakePayload::parse(&p).is_err());
    }

    #[test]
    fn capabilities() {
        let all = u32::MAX;
        let options = ConnectionOptions::new();
        let caps = client_capabilities(&options, all);
        assert_eq!(caps & client::CONNECT_WITH_DB, 0);
        assert_eq!(caps & client::LOCAL_FILES, 0);
        assert_ne!(caps & client::DEPRECATE_EOF, 0);
        let caps = client_capabilities(&options.database("db").multi_statements(true), all);
        assert_ne!(caps & client::CONNECT_WITH_DB, 0);
        assert_ne!(caps & client::MULTI_STATEMENTS, 0);
        let caps = client_capabilities(&ConnectionOptions::new(), client::PROTOCOL_41);
        assert_eq!(caps, client::PROTOCOL_41);
    }
}
