//! Constants used in the mysql/mariadb protocol

/// Largest payload of a single physical package. Longer payloads are split
pub const MAX_PACKAGE_PAYLOAD: usize = 0xFF_FFFF;

/// Bit flags used for fields as described in
/// <https://mariadb.com/docs/server/reference/clientserver-protocol/4-server-response-packets/result-set-packets#field-details-flag>
pub mod column_flag {
    /// Field can't be `NULL`.
    pub const NOT_NULL: u16 = 1;
    /// Field is part of a primary key.
    pub const PRIMARY_KEY: u16 = 2;
    /// Field is part of a unique key.
    pub const UNIQUE_KEY: u16 = 4;
    /// Field is part of a multi-part unique or primary key.
    pub const MULTIPLE_KEY: u16 = 8;
    /// Field is a blob.
    pub const BLOB: u16 = 16;
    /// Field is unsigned.
    pub const UNSIGNED: u16 = 32;
    /// Field is zero filled.
    pub const ZEROFILL: u16 = 64;
    /// Field is binary.
    pub const BINARY: u16 = 128;
    /// Field is an enumeration.
    pub const ENUM: u16 = 256;
    /// Field is an auto-incement field.
    pub const AUTO_INCREMENT: u16 = 512;
    /// Field is a timestamp.
    pub const TIMESTAMP: u16 = 1024;
    /// Field is a set.
    pub const SET: u16 = 2048;
    /// Field does not have a default value.
    pub const NO_DEFAULT_VALUE: u16 = 4096;
    /// Field is set to NOW on UPDATE.
    pub const ON_UPDATE_NOW: u16 = 8192;
    /// Field is a number.
    pub const NUM: u16 = 32768;
}

/// Field types as described in
/// <https://mariadb.com/docs/server/reference/clientserver-protocol/4-server-response-packets/result-set-packets#field-types>
pub mod type_ {
    #![allow(missing_docs)]
    pub const DECIMAL: u8 = 0x00;
    pub const TINY: u8 = 0x01;
    pub const SHORT: u8 = 0x02;
    pub const LONG: u8 = 0x03;
    pub const FLOAT: u8 = 0x04;
    pub const DOUBLE: u8 = 0x05;
    pub const NULL: u8 = 0x06;
    pub const TIMESTAMP: u8 = 0x07;
    pub const LONG_LONG: u8 = 0x08;
    pub const INT24: u8 = 0x09;
    pub const DATE: u8 = 0x0a;
    pub const TIME: u8 = 0x0b;
    pub const DATETIME: u8 = 0x0c;
    pub const YEAR: u8 = 0x0d;
    pub const NEW_DATE: u8 = 0x0e;
    pub const VAR_CHAR: u8 = 0x0f;
    pub const BIT: u8 = 0x10;
    pub const JSON: u8 = 0xf5;
    pub const NEW_DECIMAL: u8 = 0xf6;
    pub const ENUM: u8 = 0xf7;
    pub const SET: u8 = 0xf8;
    pub const TINY_BLOB: u8 = 0xf9;
    pub const MEDIUM_BLOB: u8 = 0xfa;
    pub const LONG_BLOB: u8 = 0xfb;
    pub const BLOB: u8 = 0xfc;
    pub const VAR_STRING: u8 = 0xfd;
    pub const STRING: u8 = 0xfe;
    pub const GEOMETRY: u8 = 0xff;
}

/// Client/server capability flags
pub mod client {
    #![allow(missing_docs)]
    pub const LONG_PASSWORD: u32 = 1;
    pub const FOUND_ROWS: u32 = 2;
    pub const LONG_FLAG: u32 = 4;
    pub const CONNECT_WITH_DB: u32 = 8;
    pub const NO_SCHEMA: u32 = 16;
    pub const COMPRESS: u32 = 32;
    pub const LOCAL_FILES: u32 = 128;
    pub const IGNORE_SPACE: u32 = 256;
    pub const PROTOCOL_41: u32 = 512;
    pub const INTERACTIVE: u32 = 1024;
    pub const SSL: u32 = 2048;
    pub const TRANSACTIONS: u32 = 8192;
    pub const SECURE_CONNECTION: u32 = 1 << 15;
    pub const MULTI_STATEMENTS: u32 = 1 << 16;
    pub const MULTI_RESULTS: u32 = 1 << 17;
    pub const PS_MULTI_RESULTS: u32 = 1 << 18;
    pub const PLUGIN_AUTH: u32 = 1 << 19;
    pub const CONNECT_ATTRS: u32 = 1 << 20;
    pub const PLUGIN_AUTH_LENENC_CLIENT_DATA: u32 = 1 << 21;
    pub const SESSION_TRACK: u32 = 1 << 23;
    pub const DEPRECATE_EOF: u32 = 1 << 24;
}

/// Server status flags, reported in OK and EOF packages
pub mod status {
    #![allow(missing_docs)]
    pub const IN_TRANS: u16 = 1;
    pub const AUTOCOMMIT: u16 = 2;
    pub const MORE_RESULTS_EXISTS: u16 = 8;
    pub const NO_GOOD_INDEX_USED: u16 = 16;
    pub const NO_INDEX_USED: u16 = 32;
    pub const CURSOR_EXISTS: u16 = 64;
    pub const LAST_ROW_SENT: u16 = 128;
    pub const DB_DROPPED: u16 = 256;
    pub const NO_BACKSLASH_ESCAPES: u16 = 512;
    pub const METADATA_CHANGED: u16 = 1024;
    pub const QUERY_WAS_SLOW: u16 = 2048;
    pub const PS_OUT_PARAMS: u16 = 4096;
    pub const IN_TRANS_READONLY: u16 = 8192;
    pub const SESSION_STATE_CHANGED: u16 = 16384;
}

/// Package types
pub mod com {
    /// Close the connection
    pub const QUIT: u8 = 0x01;
    /// Change the default schema, see <https://mariadb.com/docs/server/reference/clientserver-protocol/2-text-protocol/com_init_db>
    pub const INIT_DB: u8 = 0x02;
    /// Query, see <https://mariadb.com/docs/server/reference/clientserver-protocol/2-text-protocol/com_query>
    pub const QUERY: u8 = 0x03;
    /// Ping, see <https://mariadb.com/docs/server/reference/clientserver-protocol/2-text-protocol/com_ping>
    pub const PING: u8 = 0x0E;
    /// Prepare statement, see <https://mariadb.com/docs/server/reference/clientserver-protocol/3-binary-protocol-prepared-statements/com_stmt_prepare>
    pub const STMT_PREPARE: u8 = 0x16;
    /// Execute statement, see <https://mariadb.com/docs/server/reference/clientserver-protocol/3-binary-protocol-prepared-statements/com_stmt_execute>
    pub const STMT_EXECUTE: u8 = 0x17;
    /// Send a chunk of a long parameter value
    pub const STMT_SEND_LONG_DATA: u8 = 0x18;
    /// Close statement, see <https://mariadb.com/docs/server/reference/clientserver-protocol/3-binary-protocol-prepared-statements/3-binary-protocol-prepared-statements-com_stmt_close>
    pub const STMT_CLOSE: u8 = 0x19;
    /// Reset long data of a statement
    pub const STMT_RESET: u8 = 0x1A;
    /// Enable or disable multi statements
    pub const SET_OPTION: u8 = 0x1B;
    /// Reset session state without re-authenticating
    pub const RESET_CONNECTION: u8 = 0x1F;
}

/// Session state change types found in OK packages
pub(crate) mod session_track {
    #![allow(unused)]
    /// A system variable changed, data is name and value
    pub const SYSTEM_VARIABLES: u8 = 0;
    /// The default schema changed
    pub const SCHEMA: u8 = 1;
    /// Some session state changed
    pub const STATE_CHANGE: u8 = 2;
    /// GTIDs
    pub const GTIDS: u8 = 3;
}

/// Server error codes the client reacts to
pub mod error_code {
    #![allow(missing_docs)]
    pub const UNKNOWN_COM_ERROR: u16 = 1047;
    pub const SERVER_SHUTDOWN: u16 = 1053;
    pub const SYNTAX_ERROR: u16 = 1064;
    pub const NORMAL_SHUTDOWN: u16 = 1077;
    pub const GOT_SIGNAL: u16 = 1078;
    pub const SHUTDOWN_COMPLETE: u16 = 1079;
    pub const NO_SUCH_THREAD: u16 = 1094;
    pub const LOCK_WAIT_TIMEOUT: u16 = 1205;
    pub const LOCK_DEADLOCK: u16 = 1213;
    pub const XAER_NOTA: u16 = 1397;
    pub const XA_RBROLLBACK: u16 = 1402;
    pub const CONNECTION_KILLED: u16 = 1927;
}

/// The character set we ask for in the handshake, utf8mb4_general_ci
pub(crate) const DEFAULT_COLLATION: u8 = 45;

/// Collation id of the binary "character set"
pub const BINARY_COLLATION: u16 = 63;
