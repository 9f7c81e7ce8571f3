//! This crate implements the client side of the mysql/mariadb wire protocol
//!
//! ```no_run
//! use qusql_wire::{connection::Connection, options::ConnectionOptions};
//!
//! # async fn example() -> Result<(), qusql_wire::error::ConnectionError> {
//! let options = ConnectionOptions::new()
//!     .address("127.0.0.1:3306")?
//!     .user("root")
//!     .database("test");
//! let mut conn = Connection::connect(&options).await?;
//! let mut rs = conn.query("SELECT 1, 'hello'").await?;
//! while let Some(row) = rs.fetch().await? {
//!     println!("{:?}", row.get(1));
//! }
//! # Ok(())
//! # }
//! ```
pub mod args;
pub mod auth;
pub mod buffer_pool;
pub mod charset;
#[cfg(feature = "chrono")]
pub mod chrono;
pub mod codec;
pub mod command;
pub mod connection;
pub mod constants;
pub mod decode;
pub mod error;
pub mod handshake;
pub mod logger;
pub mod options;
pub mod package_parser;
pub mod packet_io;
pub mod packets;
pub mod param;
pub mod resultset;
pub mod row;
pub mod temporal;
pub mod text;
pub mod value;
