//! Tests of qusql-wire against the scripted server
//!
//! Every test runs the client and the server script on the same task with
//! [tokio::join], the server asserting on what the client sends.
use std::{
    io::Cursor,
    sync::{Arc, Mutex},
    time::Duration,
};

use qusql_wire::{
    auth::{caching_sha2_scramble, native_password_scramble},
    charset::Charset,
    connection::{Connection, ConnectionStatus, EndMode, Ended},
    constants::{client, com, error_code, status, type_},
    error::{ConnectionError, ConnectionErrorContent},
    logger::{LocalInfileProvider, LogResult, QueryEnd, SqlLogger},
    options::{ConnectionOptions, QueryOptions},
    param::Param,
    row::{Row, RowMode},
    value::Value,
};
use tokio::io::{AsyncRead, DuplexStream};

use crate::{
    CONNECTION_ID, MAX_PAYLOAD, MockServer, SCRAMBLE, SERVER_CAPABILITIES,
    packet::{
        binary_row, column, eof, err, handshake_v10, int_column, legacy_column, lenenc, ok,
        prepare_ok, put_str, session_ok, text_column, text_row,
    },
};

type Result = std::result::Result<(), ConnectionError>;

fn opts() -> ConnectionOptions<'static> {
    ConnectionOptions::new()
        .user("root")
        .password("test")
        .database("test")
}

async fn connect(transport: DuplexStream, options: &ConnectionOptions<'_>) -> ConnectionResult {
    Connection::connect_with_transport(transport, options).await
}

type ConnectionResult = std::result::Result<Connection, ConnectionError>;

fn is_busy(e: &ConnectionError) -> bool {
    matches!(e.content(), ConnectionErrorContent::Busy)
}

#[tokio::test]
async fn test_connect_and_query() -> Result {
    let (transport, mut srv) = MockServer::new(SERVER_CAPABILITIES);
    let server = async move {
        let hs = srv.accept().await;
        assert_eq!(hs.user, "root");
        assert_eq!(hs.database.as_deref(), Some("test"));
        assert_eq!(hs.plugin.as_deref(), Some("mysql_native_password"));
        assert_eq!(hs.auth, native_password_scramble("test", SCRAMBLE));
        assert_ne!(hs.capabilities & client::DEPRECATE_EOF, 0);
        assert_eq!(hs.capabilities & client::LOCAL_FILES, 0);

        srv.expect_query("SELECT 123").await;
        srv.send_result_set(&[int_column("123")], &[text_row(&[Some("123")])], status::AUTOCOMMIT)
            .await;

        srv.expect_query("SELECT id, name FROM t").await;
        srv.send_result_set(
            &[int_column("id"), text_column("name")],
            &[
                text_row(&[Some("1"), Some("one")]),
                text_row(&[Some("2"), None]),
                text_row(&[Some("9007199254740993"), Some("æøå")]),
            ],
            status::AUTOCOMMIT,
        )
        .await;
        srv.expect_closed().await;
    };
    let client = async move {
        let mut conn = connect(transport, &opts()).await?;
        assert_eq!(conn.connection_id(), CONNECTION_ID);
        assert_eq!(conn.server_version(), "11.4.2-MariaDB-mock");
        assert_eq!(conn.schema(), Some("test"));
        assert_eq!(conn.state(), ConnectionStatus::Idle);

        let mut rs = conn.query("SELECT 123").await?;
        assert_eq!(rs.columns().len(), 1);
        let row = rs.fetch().await?.expect("a row");
        assert_eq!(row.get(0), Some(&Value::Int(123)));
        assert!(rs.fetch().await?.is_none());
        assert!(rs.ok().is_some());

        let mut rs = conn.query("SELECT id, name FROM t").await?;
        assert_eq!(rs.columns()[1].name, "name");
        let rows: Vec<(i64, Option<String>)> = rs.fetch_all_as().await?;
        assert_eq!(
            rows,
            vec![
                (1, Some("one".to_string())),
                (2, None),
                (9007199254740993, Some("æøå".to_string()))
            ]
        );
        assert_eq!(conn.state(), ConnectionStatus::Idle);
        Ok(())
    };
    let (r, ()) = tokio::join!(client, server);
    r
}

#[tokio::test]
async fn test_ok_and_errors() -> Result {
    let (transport, mut srv) = MockServer::new(SERVER_CAPABILITIES);
    let server = async move {
        srv.accept().await;
        srv.expect_query("INSERT INTO t VALUES (1)").await;
        srv.send(&ok(3, 7, status::AUTOCOMMIT)).await;
        srv.expect_query("SELEC").await;
        srv.send(&err(error_code::SYNTAX_ERROR, "42000", "You have an error"))
            .await;
        srv.expect_query("SELECT 1").await;
        srv.send_result_set(&[int_column("1")], &[text_row(&[Some("1")])], status::AUTOCOMMIT)
            .await;
        srv.expect(com::PING, b"").await;
        srv.send(&ok(0, 0, status::AUTOCOMMIT)).await;
        srv.expect_closed().await;
    };
    let client = async move {
        let mut conn = connect(transport, &opts()).await?;
        let res = conn.query("INSERT INTO t VALUES (1)").await?.into_ok().await?;
        assert_eq!(res.affected_rows, 3);
        assert_eq!(res.last_insert_id, 7);

        let Err(e) = conn.query("SELEC").await else {
            panic!("expected a syntax error")
        };
        assert_eq!(e.code(), Some(error_code::SYNTAX_ERROR));
        assert!(!e.is_fatal());

        let Err(e) = conn.query("SELECT 1").await?.into_ok().await else {
            panic!("expected rows")
        };
        assert!(matches!(e.content(), ConnectionErrorContent::UnexpectedRows));

        conn.ping().await?;
        assert_eq!(conn.state(), ConnectionStatus::Idle);
        Ok(())
    };
    let (r, ()) = tokio::join!(client, server);
    r
}

#[tokio::test]
async fn test_busy_until_discard() -> Result {
    let (transport, mut srv) = MockServer::new(SERVER_CAPABILITIES);
    let server = async move {
        srv.accept().await;
        srv.expect_query("SELECT v FROM t").await;
        srv.send_result_set(
            &[int_column("v")],
            &[text_row(&[Some("1")]), text_row(&[Some("2")])],
            status::AUTOCOMMIT,
        )
        .await;
        srv.expect_query("DELETE FROM t").await;
        srv.send(&ok(2, 0, status::AUTOCOMMIT)).await;
        srv.expect_closed().await;
    };
    let client = async move {
        let mut conn = connect(transport, &opts()).await?;
        let mut rs = conn.query("SELECT v FROM t").await?;
        assert!(rs.fetch().await?.is_some());
        drop(rs);
        assert_eq!(conn.state(), ConnectionStatus::HasMoreRows);

        let Err(e) = conn.query("DELETE FROM t").await else {
            panic!("expected busy")
        };
        assert!(is_busy(&e));
        assert!(conn.ping().await.is_err_and(|e| is_busy(&e)));

        conn.discard().await?;
        assert_eq!(conn.state(), ConnectionStatus::Idle);
        let res = conn.query("DELETE FROM t").await?.into_ok().await?;
        assert_eq!(res.affected_rows, 2);
        Ok(())
    };
    let (r, ()) = tokio::join!(client, server);
    r
}

#[tokio::test]
async fn test_prepared_statement() -> Result {
    let (transport, mut srv) = MockServer::new(SERVER_CAPABILITIES);
    let server = async move {
        srv.accept().await;
        srv.expect(com::STMT_PREPARE, b"SELECT a, b, c, d FROM t WHERE id = ?")
            .await;
        srv.send(&prepare_ok(9, 4, 1)).await;
        srv.send(&column("?", type_::LONG_LONG, 0, 63)).await;
        let columns = [
            column("a", type_::LONG, 0, 63),
            column("b", type_::VAR_STRING, 0, 45),
            column("c", type_::DOUBLE, 0, 63),
            column("d", type_::DATETIME, 0, 63),
        ];
        for c in &columns {
            srv.send(c).await;
        }

        let p = srv.command().await;
        assert_eq!(p[0], com::STMT_EXECUTE);
        assert_eq!(&p[1..5], &9u32.to_le_bytes());
        assert_eq!(p[5], 0);
        assert_eq!(&p[6..10], &1u32.to_le_bytes());
        assert_eq!(p[10], 0, "null bitmap");
        assert_eq!(p[11], 1, "types are sent");
        assert_eq!(&p[12..14], &[type_::LONG, 0]);
        assert_eq!(&p[14..], &5i32.to_le_bytes());

        srv.send_columns(&columns).await;
        let mut date = vec![7];
        date.extend_from_slice(&2024u16.to_le_bytes());
        date.extend_from_slice(&[2, 29, 13, 14, 15]);
        srv.send(&binary_row(&[
            Some(7i32.to_le_bytes().to_vec()),
            None,
            Some(1.5f64.to_le_bytes().to_vec()),
            Some(date),
        ]))
        .await;
        srv.send_end(status::AUTOCOMMIT).await;

        let p = srv.command().await;
        assert_eq!(p[0], com::STMT_EXECUTE);
        assert_eq!(p[10], 1, "null bitmap");
        assert_eq!(&p[12..14], &[type_::NULL, 0]);
        assert_eq!(p.len(), 14);
        srv.send_result_set(&columns, &[], status::AUTOCOMMIT).await;
        srv.expect_closed().await;
    };
    let client = async move {
        let mut conn = connect(transport, &opts()).await?;
        let stmt = conn.prepare("SELECT a, b, c, d FROM t WHERE id = ?").await?;
        assert_eq!(stmt.id(), 9);
        assert_eq!(stmt.num_params(), 1);
        assert_eq!(stmt.columns().len(), 4);
        assert_eq!(stmt.columns()[3].name, "d");

        let Err(e) = conn.execute_args(&stmt, (1, 2)).await else {
            panic!("expected a bind error")
        };
        assert!(matches!(e.content(), ConnectionErrorContent::Bind(..)));

        let mut rs = conn.execute_args(&stmt, (5,)).await?;
        let row = rs.fetch().await?.expect("a row");
        assert_eq!(row.get(0), Some(&Value::Int(7)));
        assert_eq!(row.get(1), Some(&Value::Null));
        assert_eq!(row.get(2), Some(&Value::Double(1.5)));
        let (a, b, c, d): (i32, Option<String>, f64, chrono::NaiveDateTime) =
            row.decode().unwrap();
        assert_eq!((a, b, c), (7, None, 1.5));
        assert_eq!(d.to_string(), "2024-02-29 13:14:15");
        assert!(rs.fetch().await?.is_none());

        let rows: Vec<(i32,)> = conn
            .execute(&stmt, vec![Param::Null])
            .await?
            .fetch_all_as()
            .await?;
        assert!(rows.is_empty());
        Ok(())
    };
    let (r, ()) = tokio::join!(client, server);
    r
}

#[tokio::test]
async fn test_long_data() -> Result {
    let (transport, mut srv) = MockServer::new(SERVER_CAPABILITIES);
    let long = "x".repeat(300);
    let expected = long.clone();
    let server = async move {
        srv.accept().await;
        srv.expect(com::STMT_PREPARE, b"INSERT INTO t VALUES (?, ?, ?)")
            .await;
        srv.send(&prepare_ok(3, 0, 3)).await;
        for _ in 0..3 {
            srv.send(&column("?", type_::VAR_STRING, 0, 45)).await;
        }

        let mut head = vec![com::STMT_SEND_LONG_DATA];
        head.extend_from_slice(&3u32.to_le_bytes());
        let p = srv.command().await;
        assert_eq!(&p[..5], &head);
        assert_eq!(&p[5..7], &0u16.to_le_bytes());
        assert_eq!(&p[7..], expected.as_bytes());
        let p = srv.command().await;
        assert_eq!(&p[..5], &head);
        assert_eq!(&p[5..7], &1u16.to_le_bytes());
        assert_eq!(&p[7..], b"streamed");

        let p = srv.command().await;
        assert_eq!(p[0], com::STMT_EXECUTE);
        assert_eq!(p[10], 0, "null bitmap");
        assert_eq!(p[11], 1);
        assert_eq!(
            &p[12..18],
            &[type_::STRING, 0, type_::LONG_BLOB, 0, type_::LONG_BLOB, 0]
        );
        assert_eq!(&p[18..], &[0], "the empty reader is sent inline");
        srv.send(&ok(1, 0, status::AUTOCOMMIT)).await;
        srv.expect_closed().await;
    };
    let client = async move {
        let mut conn = connect(transport, &opts()).await?;
        let stmt = conn.prepare("INSERT INTO t VALUES (?, ?, ?)").await?;
        let params = vec![
            Param::from(long),
            Param::reader(&b"streamed"[..]),
            Param::reader(&b""[..]),
        ];
        let res = conn.execute(&stmt, params).await?.into_ok().await?;
        assert_eq!(res.affected_rows, 1);
        Ok(())
    };
    let (r, ()) = tokio::join!(client, server);
    r
}

#[tokio::test]
async fn test_dispose_prepared_statement() -> Result {
    let (transport, mut srv) = MockServer::new(SERVER_CAPABILITIES);
    let server = async move {
        srv.accept().await;
        srv.expect(com::STMT_PREPARE, b"SELECT 1").await;
        srv.send(&prepare_ok(4, 1, 0)).await;
        srv.send(&int_column("1")).await;
        srv.expect(com::STMT_CLOSE, &4u32.to_le_bytes()).await;
        srv.expect(com::PING, b"").await;
        srv.send(&ok(0, 0, status::AUTOCOMMIT)).await;

        srv.expect(com::STMT_PREPARE, b"SELECT 2").await;
        srv.send(&prepare_ok(5, 1, 0)).await;
        srv.send(&int_column("2")).await;
        srv.expect(com::STMT_CLOSE, &5u32.to_le_bytes()).await;
        srv.expect(com::QUIT, b"").await;
        srv.expect_closed().await;
    };
    let client = async move {
        let mut conn = connect(transport, &opts()).await?;
        let stmt = conn.prepare("SELECT 1").await?;
        conn.dispose_prepared_stmt(&stmt);
        conn.dispose_prepared_stmt(&stmt);
        let Err(e) = conn.execute(&stmt, Vec::new()).await else {
            panic!("expected a stale statement")
        };
        assert!(matches!(e.content(), ConnectionErrorContent::StaleStatement(4)));
        conn.ping().await?;

        let stmt = conn.prepare("SELECT 2").await?;
        conn.dispose_prepared_stmt(&stmt);
        assert!(matches!(conn.end(EndMode::Close).await, Ended::Closed(_)));
        Ok(())
    };
    let (r, ()) = tokio::join!(client, server);
    r
}

#[tokio::test]
async fn test_multiple_resultsets() -> Result {
    let (transport, mut srv) = MockServer::new(SERVER_CAPABILITIES);
    let more = status::AUTOCOMMIT | status::MORE_RESULTS_EXISTS;
    let server = async move {
        srv.accept().await;
        for _ in 0..2 {
            srv.expect_query("CALL p()").await;
            srv.send_result_set(&[int_column("a")], &[text_row(&[Some("1")])], more)
                .await;
            srv.send_result_set(
                &[text_column("b")],
                &[text_row(&[Some("x")]), text_row(&[Some("y")])],
                more,
            )
            .await;
            srv.send(&ok(0, 0, status::AUTOCOMMIT)).await;
        }
        srv.expect_closed().await;
    };
    let client = async move {
        let mut conn = connect(transport, &opts()).await?;
        let mut rs = conn.query("CALL p()").await?;
        assert!(!rs.has_more());
        let rows: Vec<(i64,)> = rs.fetch_all_as().await?;
        assert_eq!(rows, vec![(1,)]);
        assert!(rs.has_more());
        assert!(rs.next_resultset().await?);
        assert_eq!(rs.columns()[0].name, "b");
        let rows: Vec<(String,)> = rs.fetch_all_as().await?;
        assert_eq!(rows, vec![("x".to_string(),), ("y".to_string(),)]);
        assert!(rs.next_resultset().await?);
        assert!(rs.columns().is_empty());
        assert!(rs.fetch().await?.is_none());
        assert!(!rs.next_resultset().await?);
        assert_eq!(conn.state(), ConnectionStatus::Idle);

        // Skipping rows without reading them
        let mut rs = conn.query("CALL p()").await?;
        assert!(rs.next_resultset().await?);
        assert!(rs.next_resultset().await?);
        assert!(!rs.next_resultset().await?);

        Ok(())
    };
    let (r, ()) = tokio::join!(client, server);
    r
}

#[tokio::test]
async fn test_session_tracking() -> Result {
    let (transport, mut srv) = MockServer::new(SERVER_CAPABILITIES);
    let server = async move {
        srv.accept().await;
        srv.expect_query("SET time_zone = '+02:00', NAMES latin1").await;
        srv.send(&session_ok(
            status::AUTOCOMMIT,
            &[("time_zone", "+02:00"), ("character_set_results", "latin1")],
            None,
        ))
        .await;
        srv.expect_query("USE other").await;
        srv.send(&session_ok(status::AUTOCOMMIT, &[], Some("other")))
            .await;
        srv.expect_query("SELECT 'æ'").await;
        srv.send_result_set(&[text_column("v")], &[vec![1, 0xE6]], status::AUTOCOMMIT)
            .await;

        // The schema and multi statement option are set ahead of the query
        srv.expect(com::INIT_DB, b"test").await;
        srv.expect(com::SET_OPTION, &0u16.to_le_bytes()).await;
        srv.expect_query("SELECT 1; SELECT 2").await;
        srv.set_seq(1);
        srv.send(&ok(0, 0, status::AUTOCOMMIT)).await;
        srv.set_seq(1);
        srv.send(&eof(status::AUTOCOMMIT)).await;
        srv.set_seq(1);
        srv.send(&ok(0, 0, status::AUTOCOMMIT)).await;

        srv.expect(com::SET_OPTION, &1u16.to_le_bytes()).await;
        srv.expect_query("SELECT 3").await;
        srv.set_seq(1);
        srv.send(&eof(status::AUTOCOMMIT)).await;
        srv.set_seq(1);
        srv.send(&ok(0, 0, status::AUTOCOMMIT)).await;
        srv.expect_closed().await;
    };
    let client = async move {
        let mut conn = connect(transport, &opts()).await?;
        conn.query("SET time_zone = '+02:00', NAMES latin1")
            .await?
            .into_ok()
            .await?;
        assert_eq!(conn.time_zone(), Some("+02:00"));
        assert_eq!(conn.time_zone_offset(), Some(7200));
        assert_eq!(conn.charset(), Charset::Latin1);

        conn.query("USE other").await?.into_ok().await?;
        assert_eq!(conn.schema(), Some("other"));

        let (v,): (String,) = conn.query("SELECT 'æ'").await?.fetch_one_as().await?;
        assert_eq!(v, "æ");

        let options = QueryOptions::new().schema("test").multi_statements(true);
        conn.query_with("SELECT 1; SELECT 2", &options)
            .await?
            .into_ok()
            .await?;
        assert_eq!(conn.schema(), Some("test"));

        conn.query("SELECT 3").await?.into_ok().await?;
        Ok(())
    };
    let (r, ()) = tokio::join!(client, server);
    r
}

struct Files;

impl LocalInfileProvider for Files {
    fn open(&self, file: &str) -> Option<Box<dyn AsyncRead + Unpin + Send>> {
        match file {
            "data.csv" => Some(Box::new(Cursor::new(b"1,a\n2,b\n".to_vec()))),
            _ => None,
        }
    }
}

#[tokio::test]
async fn test_local_infile() -> Result {
    let (transport, mut srv) = MockServer::new(SERVER_CAPABILITIES);
    let server = async move {
        let hs = srv.accept().await;
        assert_ne!(hs.capabilities & client::LOCAL_FILES, 0);

        srv.expect_query("LOAD DATA LOCAL INFILE 'data.csv' INTO TABLE t")
            .await;
        srv.send(b"\xFBdata.csv").await;
        assert_eq!(srv.recv().await, b"1,a\n2,b\n");
        assert!(srv.recv().await.is_empty());
        srv.send(&ok(2, 0, status::AUTOCOMMIT)).await;

        srv.expect_query("LOAD DATA LOCAL INFILE '/etc/passwd' INTO TABLE t")
            .await;
        srv.send(b"\xFB/etc/passwd").await;
        assert!(srv.recv().await.is_empty());
        srv.send(&ok(0, 0, status::AUTOCOMMIT)).await;

        srv.expect(com::PING, b"").await;
        srv.send(&ok(0, 0, status::AUTOCOMMIT)).await;
        srv.expect_closed().await;
    };
    let client = async move {
        let options = opts().local_infile(Arc::new(Files));
        let mut conn = connect(transport, &options).await?;
        let res = conn
            .query("LOAD DATA LOCAL INFILE 'data.csv' INTO TABLE t")
            .await?
            .into_ok()
            .await?;
        assert_eq!(res.affected_rows, 2);

        let Err(e) = conn
            .query("LOAD DATA LOCAL INFILE '/etc/passwd' INTO TABLE t")
            .await
        else {
            panic!("expected the upload to be refused")
        };
        assert!(
            matches!(e.content(), ConnectionErrorContent::LocalInfileRefused(f) if f == "/etc/passwd")
        );
        conn.ping().await?;
        Ok(())
    };
    let (r, ()) = tokio::join!(client, server);
    r
}

#[tokio::test]
async fn test_transaction() -> Result {
    let (transport, mut srv) = MockServer::new(SERVER_CAPABILITIES);
    let in_trans = status::AUTOCOMMIT | status::IN_TRANS;
    let server = async move {
        srv.accept().await;
        for (sql, status_flags) in [
            ("BEGIN", in_trans),
            ("SAVEPOINT _qusql_savepoint_1", in_trans),
            ("RELEASE SAVEPOINT _qusql_savepoint_1", in_trans),
            ("SAVEPOINT _qusql_savepoint_1", in_trans),
            ("ROLLBACK TO SAVEPOINT _qusql_savepoint_1", in_trans),
            ("INSERT INTO t VALUES (1)", in_trans),
            ("COMMIT", status::AUTOCOMMIT),
            ("BEGIN", in_trans),
            ("ROLLBACK", status::AUTOCOMMIT),
        ] {
            srv.expect_query(sql).await;
            srv.send(&ok(0, 0, status_flags)).await;
        }
        srv.expect(com::PING, b"").await;
        srv.send(&ok(0, 0, status::AUTOCOMMIT)).await;
        srv.expect_closed().await;
    };
    let client = async move {
        let mut conn = connect(transport, &opts()).await?;
        let mut tr = conn.begin().await?;
        assert!(tr.in_transaction());
        assert_eq!(tr.transaction_depth(), 1);

        let inner = tr.begin().await?;
        assert_eq!(inner.transaction_depth(), 2);
        inner.commit().await?;
        assert_eq!(tr.transaction_depth(), 1);

        let inner = tr.begin().await?;
        drop(inner);
        tr.query("INSERT INTO t VALUES (1)").await?.into_ok().await?;
        assert_eq!(tr.transaction_depth(), 1);
        tr.commit().await?;
        assert!(!conn.in_transaction());
        assert_eq!(conn.transaction_depth(), 0);

        let tr = conn.begin().await?;
        drop(tr);
        conn.ping().await?;
        assert_eq!(conn.transaction_depth(), 0);
        Ok(())
    };
    let (r, ()) = tokio::join!(client, server);
    r
}

#[tokio::test]
async fn test_xa_transaction() -> Result {
    let (transport, mut srv) = MockServer::new(SERVER_CAPABILITIES);
    let server = async move {
        srv.accept().await;
        srv.expect_query("KILL 7").await;
        srv.send(&err(error_code::NO_SUCH_THREAD, "HY000", "Unknown thread id: 7"))
            .await;
        srv.expect_query("XA ROLLBACK 'old'").await;
        srv.send(&err(error_code::XAER_NOTA, "XAE04", "XAER_NOTA: Unknown XID"))
            .await;

        for sql in ["XA START 'x''1'", "XA END 'x''1'", "XA PREPARE 'x''1'", "XA COMMIT 'x''1'"] {
            srv.expect_query(sql).await;
            srv.send(&ok(0, 0, status::AUTOCOMMIT)).await;
        }
        for sql in ["XA START 'y'", "XA END 'y'", "XA COMMIT 'y' ONE PHASE"] {
            srv.expect_query(sql).await;
            srv.send(&ok(0, 0, status::AUTOCOMMIT)).await;
        }
        srv.expect_query("XA START 'z'").await;
        srv.send(&ok(0, 0, status::AUTOCOMMIT)).await;
        srv.expect_query("XA END 'z'").await;
        srv.send(&err(error_code::XA_RBROLLBACK, "XA100", "XA_RBROLLBACK"))
            .await;
        srv.expect_query("XA ROLLBACK 'z'").await;
        srv.send(&ok(0, 0, status::AUTOCOMMIT)).await;

        for sql in [r"XA START 'a\\'", r"XA END 'a\\'", r"XA COMMIT 'a\\' ONE PHASE"] {
            srv.expect_query(sql).await;
            srv.send(&ok(0, 0, status::AUTOCOMMIT)).await;
        }
        let flags = status::AUTOCOMMIT | status::NO_BACKSLASH_ESCAPES;
        srv.expect_query("SET sql_mode = 'NO_BACKSLASH_ESCAPES'").await;
        srv.send(&ok(0, 0, flags)).await;
        for sql in [r"XA START 'a\'", r"XA END 'a\'", r"XA COMMIT 'a\' ONE PHASE"] {
            srv.expect_query(sql).await;
            srv.send(&ok(0, 0, flags)).await;
        }
        srv.expect_closed().await;
    };
    let client = async move {
        let options = opts()
            .kill_connections(vec![7])
            .rollback_xa(vec!["old".to_string()]);
        let mut conn = connect(transport, &options).await?;

        conn.xa_start("x'1").await?;
        conn.xa_prepare().await?;
        conn.xa_commit().await?;
        let Err(e) = conn.xa_commit().await else {
            panic!("expected no xa transaction")
        };
        assert!(matches!(e.content(), ConnectionErrorContent::NoXaTransaction));

        conn.xa_start("y").await?;
        conn.xa_commit().await?;

        conn.xa_start("z").await?;
        conn.xa_rollback().await?;

        conn.xa_start(r"a\").await?;
        conn.xa_commit().await?;
        conn.query("SET sql_mode = 'NO_BACKSLASH_ESCAPES'")
            .await?
            .discard()
            .await?;
        conn.xa_start(r"a\").await?;
        conn.xa_commit().await?;
        Ok(())
    };
    let (r, ()) = tokio::join!(client, server);
    r
}

#[tokio::test]
async fn test_cancel_resumption() -> Result {
    let (transport, mut srv) = MockServer::new(SERVER_CAPABILITIES);
    let server = async move {
        srv.accept().await;
        while let Some(p) = srv.try_command().await {
            assert_eq!(p[0], com::QUERY);
            assert_eq!(&p[1..], b"SELECT id, v FROM t");
            srv.send_result_set(
                &[int_column("id"), text_column("v")],
                &[
                    text_row(&[Some("1"), Some("a")]),
                    text_row(&[Some("2"), Some("b")]),
                    text_row(&[Some("3"), None]),
                ],
                status::AUTOCOMMIT,
            )
            .await;
        }
    };
    let client = async move {
        let mut conn = connect(transport, &opts()).await?;
        for c in 0.. {
            conn.set_cancel_count(None);
            conn.discard().await?;
            assert_eq!(conn.state(), ConnectionStatus::Idle);
            conn.set_cancel_count(Some(c));
            let t: std::result::Result<Vec<(i64, Option<String>)>, ConnectionError> = async {
                conn.query("SELECT id, v FROM t").await?.fetch_all_as().await
            }
            .await;
            match t {
                Err(e) if matches!(e.content(), ConnectionErrorContent::TestCancelled) => (),
                Ok(rows) => {
                    assert_eq!(
                        rows,
                        vec![
                            (1, Some("a".to_string())),
                            (2, Some("b".to_string())),
                            (3, None)
                        ]
                    );
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        conn.set_cancel_count(None);
        Ok(())
    };
    let (r, ()) = tokio::join!(client, server);
    r
}

#[tokio::test]
async fn test_cancel_handle() -> Result {
    let (transport, mut srv) = MockServer::new(SERVER_CAPABILITIES);
    let server = async move {
        srv.accept().await;
        srv.expect_query("SELECT v FROM big").await;
        srv.send_result_set(
            &[int_column("v")],
            &[
                text_row(&[Some("1")]),
                text_row(&[Some("2")]),
                text_row(&[Some("3")]),
            ],
            status::AUTOCOMMIT,
        )
        .await;
        srv.expect(com::QUIT, b"").await;
        srv.expect_closed().await;
    };
    let client = async move {
        let mut conn = connect(transport, &opts()).await?;
        let handle = conn.cancel_handle();
        let mut rs = conn.query("SELECT v FROM big").await?;
        assert!(rs.fetch().await?.is_some());
        handle.cancel();
        assert!(handle.is_canceled());
        assert!(
            rs.fetch()
                .await
                .is_err_and(|e| matches!(e.content(), ConnectionErrorContent::Canceled))
        );
        assert!(rs.fetch().await?.is_none());
        drop(rs);
        assert_eq!(conn.state(), ConnectionStatus::Terminated);
        assert!(
            conn.ping()
                .await
                .is_err_and(|e| matches!(e.content(), ConnectionErrorContent::Canceled))
        );
        assert!(matches!(conn.end(EndMode::Recycle).await, Ended::Closed(_)));
        Ok(())
    };
    let (r, ()) = tokio::join!(client, server);
    r
}

#[tokio::test]
async fn test_recycle() -> Result {
    let (transport, mut srv) = MockServer::new(SERVER_CAPABILITIES);
    let server = async move {
        srv.accept().await;
        srv.expect_query("SET @a = 1").await;
        srv.send(&ok(0, 0, status::AUTOCOMMIT)).await;

        srv.expect_query("USE other").await;
        srv.send(&session_ok(status::AUTOCOMMIT, &[], Some("other")))
            .await;
        srv.expect(com::STMT_PREPARE, b"SELECT 1").await;
        srv.send(&prepare_ok(5, 1, 0)).await;
        srv.send(&int_column("1")).await;
        srv.expect_query("BEGIN").await;
        srv.send(&ok(0, 0, status::AUTOCOMMIT | status::IN_TRANS)).await;

        srv.expect_query("ROLLBACK").await;
        srv.send(&ok(0, 0, status::AUTOCOMMIT)).await;
        srv.expect(com::RESET_CONNECTION, b"").await;
        srv.send(&ok(0, 0, status::AUTOCOMMIT)).await;
        srv.expect(com::INIT_DB, b"test").await;
        srv.send(&ok(0, 0, status::AUTOCOMMIT)).await;
        srv.expect_query("SET @a = 1").await;
        srv.send(&ok(0, 0, status::AUTOCOMMIT)).await;

        // A server without COM_RESET_CONNECTION
        srv.expect(com::RESET_CONNECTION, b"").await;
        srv.send(&err(error_code::UNKNOWN_COM_ERROR, "08S01", "Unknown command"))
            .await;
        srv.expect_query("SET @a = 1").await;
        srv.send(&ok(0, 0, status::AUTOCOMMIT)).await;
        srv.expect_closed().await;
    };
    let client = async move {
        let options = opts().init_sql("SET @a = 1");
        let mut conn = connect(transport, &options).await?;
        conn.query("USE other").await?.into_ok().await?;
        let stmt = conn.prepare("SELECT 1").await?;
        let tr = conn.begin().await?;
        drop(tr);

        let Ended::Recycled(mut conn) = conn.end(EndMode::Recycle).await else {
            panic!("expected the connection to be recycled")
        };
        assert_eq!(conn.schema(), Some("test"));
        assert_eq!(conn.transaction_depth(), 0);
        let Err(e) = conn.execute(&stmt, Vec::new()).await else {
            panic!("expected a stale statement")
        };
        assert!(matches!(e.content(), ConnectionErrorContent::StaleStatement(5)));

        let Ended::Recycled(conn) = conn.end(EndMode::Recycle).await else {
            panic!("expected the connection to be recycled")
        };
        assert_eq!(conn.state(), ConnectionStatus::Idle);
        Ok(())
    };
    let (r, ()) = tokio::join!(client, server);
    r
}

#[tokio::test]
async fn test_large_packages() -> Result {
    let (transport, mut srv) = MockServer::new(SERVER_CAPABILITIES);
    let sql = format!("SELECT '{}', 'big'", "x".repeat(MAX_PAYLOAD));
    let sql_len = sql.len();
    let big = MAX_PAYLOAD + 10;
    let server = async move {
        srv.accept().await;
        let p = srv.command().await;
        assert_eq!(p[0], com::QUERY);
        assert_eq!(p.len(), 1 + sql_len);
        assert!(p.ends_with(b"x', 'big'"));

        srv.send_columns(&[text_column("v"), text_column("w")]).await;
        let mut row = Vec::new();
        put_str(&mut row, b"small");
        put_str(&mut row, &vec![b'y'; big]);
        for _ in 0..3 {
            srv.send(&row).await;
        }
        srv.send_end(status::AUTOCOMMIT).await;
        srv.expect_closed().await;
    };
    let client = async move {
        let mut conn = connect(transport, &opts()).await?;
        let mut rs = conn.query(&sql).await?;

        let (row, mut reader) = rs.fetch_streaming().await?.expect("a row");
        assert_eq!(row.get(0), Some(&Value::Text("small".to_string())));
        assert_eq!(row.get(1), Some(&Value::Null));
        assert_eq!(reader.remaining(), big as u64);
        let mut out = Vec::new();
        assert_eq!(reader.read_to_end(&mut out).await?, big);
        assert!(out.iter().all(|c| *c == b'y'));
        assert_eq!(reader.remaining(), 0);

        // Bytes not read are skipped
        let (_, mut reader) = rs.fetch_streaming().await?.expect("a row");
        let mut buf = [0; 16];
        assert_eq!(reader.read(&mut buf).await?, 16);

        let row = rs.fetch().await?.expect("a row");
        match row.get(1) {
            Some(Value::Text(v)) => assert_eq!(v.len(), big),
            v => panic!("unexpected value {v:?}"),
        }
        assert!(rs.fetch().await?.is_none());
        assert_eq!(conn.state(), ConnectionStatus::Idle);
        Ok(())
    };
    let (r, ()) = tokio::join!(client, server);
    r
}

#[tokio::test]
async fn test_caching_sha2_fast_auth() -> Result {
    let (transport, mut srv) = MockServer::new(SERVER_CAPABILITIES);
    let server = async move {
        let hs = srv.greet("caching_sha2_password", SCRAMBLE).await;
        assert_eq!(hs.plugin.as_deref(), Some("caching_sha2_password"));
        assert_eq!(hs.auth, caching_sha2_scramble("test", SCRAMBLE));
        srv.send(&[0x01, 0x03]).await;
        srv.send(&ok(0, 0, status::AUTOCOMMIT)).await;
        srv.expect_closed().await;
    };
    let client = async move {
        connect(transport, &opts()).await?;
        Ok(())
    };
    let (r, ()) = tokio::join!(client, server);
    r
}

async fn caching_sha2_full_auth(key: &rsa::RsaPrivateKey, configured_key: bool) -> Result {
    use rsa::pkcs8::{EncodePublicKey, LineEnding};
    let pem = key
        .to_public_key()
        .to_public_key_pem(LineEnding::LF)
        .unwrap();
    let key = key.clone();
    let server_pem = pem.clone();
    let (transport, mut srv) = MockServer::new(SERVER_CAPABILITIES);
    let server = async move {
        srv.greet("caching_sha2_password", SCRAMBLE).await;
        srv.send(&[0x01, 0x04]).await;
        if !configured_key {
            assert_eq!(srv.recv().await, [0x02u8]);
            let mut p = vec![0x01];
            p.extend_from_slice(server_pem.as_bytes());
            srv.send(&p).await;
        }
        let data = srv.recv().await;
        let plain = key
            .decrypt(rsa::Oaep::new::<sha1::Sha1>(), &data)
            .unwrap();
        let expected: Vec<u8> = b"test\0"
            .iter()
            .zip(SCRAMBLE.iter())
            .map(|(a, b)| a ^ b)
            .collect();
        assert_eq!(plain, expected);
        srv.send(&ok(0, 0, status::AUTOCOMMIT)).await;
        srv.expect_closed().await;
    };
    let client = async move {
        let mut options = opts();
        if configured_key {
            options = options.server_public_key(pem);
        }
        connect(transport, &options).await?;
        Ok(())
    };
    let (r, ()) = tokio::join!(client, server);
    r
}

#[tokio::test]
async fn test_caching_sha2_full_auth() -> Result {
    let key = rsa::RsaPrivateKey::new(&mut rand::rngs::OsRng, 1024).unwrap();
    caching_sha2_full_auth(&key, false).await?;
    caching_sha2_full_auth(&key, true).await
}

#[tokio::test]
async fn test_auth_switch() -> Result {
    let (transport, mut srv) = MockServer::new(SERVER_CAPABILITIES);
    let scramble = b"abcdefghij0123456789";
    let server = async move {
        let hs = srv.greet("mysql_native_password", SCRAMBLE).await;
        assert_eq!(hs.auth, native_password_scramble("test", SCRAMBLE));
        let mut p = vec![0xFE];
        p.extend_from_slice(b"caching_sha2_password\0");
        p.extend_from_slice(scramble);
        p.push(0);
        srv.send(&p).await;
        assert_eq!(srv.recv().await, caching_sha2_scramble("test", scramble));
        srv.send(&[0x01, 0x03]).await;
        srv.send(&ok(0, 0, status::AUTOCOMMIT)).await;
        srv.expect_closed().await;
    };
    let client = async move {
        connect(transport, &opts()).await?;
        Ok(())
    };
    let (r, ()) = tokio::join!(client, server);
    r
}

#[tokio::test]
async fn test_auth_failures() -> Result {
    let (transport, mut srv) = MockServer::new(SERVER_CAPABILITIES);
    let server = async move {
        srv.greet("mysql_native_password", SCRAMBLE).await;
        srv.send(&err(1045, "28000", "Access denied for user 'root'"))
            .await;
        srv.expect_closed().await;
    };
    let client = async move {
        let Err(e) = connect(transport, &opts()).await else {
            panic!("expected access denied")
        };
        assert_eq!(e.code(), Some(1045));
    };
    tokio::join!(client, server);

    let (transport, mut srv) = MockServer::new(SERVER_CAPABILITIES);
    let server = async move {
        srv.send(&handshake_v10(SERVER_CAPABILITIES, SCRAMBLE, "dialog"))
            .await;
        srv.expect_closed().await;
    };
    let client = async move {
        let Err(e) = connect(transport, &opts()).await else {
            panic!("expected an unknown plugin")
        };
        assert!(
            matches!(e.content(), ConnectionErrorContent::UnknownAuthPlugin(p) if p == "dialog")
        );
    };
    tokio::join!(client, server);
    Ok(())
}

#[tokio::test]
async fn test_connect_timeout() -> Result {
    let (transport, srv) = MockServer::new(SERVER_CAPABILITIES);
    let options = opts().connect_timeout(Duration::from_millis(50));
    let Err(e) = connect(transport, &options).await else {
        panic!("expected a timeout")
    };
    assert!(matches!(e.content(), ConnectionErrorContent::ConnectTimeout));
    drop(srv);
    Ok(())
}

#[tokio::test]
async fn test_stale_connection() -> Result {
    let (transport, mut srv) = MockServer::new(SERVER_CAPABILITIES);
    let server = async move {
        srv.accept().await;
    };
    let client = async move {
        let mut conn = connect(transport, &opts()).await?;
        conn.mark_idle_in_pool();
        assert_eq!(conn.state(), ConnectionStatus::IdleInPool);
        let Err(e) = conn.ping().await else {
            panic!("expected a stale connection")
        };
        assert!(matches!(e.content(), ConnectionErrorContent::StaleConnection(_)));
        assert!(e.is_fatal());
        assert_eq!(conn.state(), ConnectionStatus::Error);
        assert!(
            conn.ping()
                .await
                .is_err_and(|e| matches!(e.content(), ConnectionErrorContent::Broken))
        );
        Ok(())
    };
    let (r, ()) = tokio::join!(client, server);
    r
}

#[tokio::test]
async fn test_retry_query() -> Result {
    let (transport, mut srv) = MockServer::new(SERVER_CAPABILITIES);
    let lock_wait = || {
        err(
            error_code::LOCK_WAIT_TIMEOUT,
            "HY000",
            "Lock wait timeout exceeded",
        )
    };
    let server = async move {
        srv.accept().await;
        srv.expect_query("UPDATE t SET v = 1").await;
        srv.send(&lock_wait()).await;
        srv.expect_query("UPDATE t SET v = 1").await;
        srv.send(&ok(1, 0, status::AUTOCOMMIT)).await;

        srv.expect_query("SELEC").await;
        srv.send(&err(error_code::SYNTAX_ERROR, "42000", "You have an error"))
            .await;

        for _ in 0..2 {
            srv.expect_query("UPDATE t SET v = 2").await;
            srv.send(&lock_wait()).await;
        }
        srv.expect_closed().await;
    };
    let client = async move {
        let mut conn = connect(transport, &opts()).await?;
        let res = conn
            .query_with("UPDATE t SET v = 1", &QueryOptions::new().retry_query_times(2))
            .await?
            .into_ok()
            .await?;
        assert_eq!(res.affected_rows, 1);

        let Err(e) = conn
            .query_with("SELEC", &QueryOptions::new().retry_query_times(3))
            .await
        else {
            panic!("expected a syntax error")
        };
        assert_eq!(e.code(), Some(error_code::SYNTAX_ERROR));

        let Err(e) = conn
            .query_with("UPDATE t SET v = 2", &QueryOptions::new().retry_query_times(1))
            .await
        else {
            panic!("expected a lock wait timeout")
        };
        assert_eq!(e.code(), Some(error_code::LOCK_WAIT_TIMEOUT));
        Ok(())
    };
    let (r, ()) = tokio::join!(client, server);
    r
}

#[derive(Default)]
struct Recorder(Mutex<Vec<String>>);

impl Recorder {
    fn push(&self, v: String) -> LogResult {
        self.0.lock().unwrap().push(v);
        Ok(())
    }
}

impl SqlLogger for Recorder {
    fn connect(&self, connection_id: u32, server_version: &str) -> LogResult {
        self.push(format!("connect {connection_id} {server_version}"))
    }

    fn query_start(&self, _: u32, sql: &str) -> LogResult {
        self.push(format!("start {sql}"))
    }

    fn query_bytes(&self, _: u32, _: usize) -> LogResult {
        Err("failing hooks are ignored".into())
    }

    fn query_end(&self, _: u32, end: QueryEnd<'_>) -> LogResult {
        self.push(match end {
            QueryEnd::Ok(ok) => format!("ok {}", ok.affected_rows),
            QueryEnd::Columns(n) => format!("columns {n}"),
            QueryEnd::Error(e) => format!("error {:?}", e.code()),
        })
    }

    fn deallocate(&self, _: u32, stmt_id: u32) -> LogResult {
        self.push(format!("deallocate {stmt_id}"))
    }
}

#[tokio::test]
async fn test_sql_logger() -> Result {
    let (transport, mut srv) = MockServer::new(SERVER_CAPABILITIES);
    let recorder = Arc::new(Recorder::default());
    let server = async move {
        srv.accept().await;
        srv.expect_query("SELECT 1").await;
        srv.send_result_set(&[int_column("1")], &[text_row(&[Some("1")])], status::AUTOCOMMIT)
            .await;
        srv.expect_query("DO 1").await;
        srv.send(&ok(0, 0, status::AUTOCOMMIT)).await;
        srv.expect_query("SELEC").await;
        srv.send(&err(error_code::SYNTAX_ERROR, "42000", "You have an error"))
            .await;
        srv.expect(com::STMT_PREPARE, b"SELECT 2").await;
        srv.send(&prepare_ok(5, 1, 0)).await;
        srv.send(&int_column("2")).await;
        srv.expect(com::STMT_CLOSE, &5u32.to_le_bytes()).await;
        srv.expect(com::PING, b"").await;
        srv.send(&ok(0, 0, status::AUTOCOMMIT)).await;
        srv.expect_closed().await;
    };
    let log = recorder.clone();
    let client = async move {
        let mut conn = connect(transport, &opts().logger(log)).await?;
        conn.query("SELECT 1").await?.discard().await?;
        conn.query("DO 1").await?.into_ok().await?;
        assert!(conn.query("SELEC").await.is_err());
        let stmt = conn.prepare("SELECT 2").await?;
        conn.dispose_prepared_stmt(&stmt);
        conn.ping().await?;
        Ok::<(), ConnectionError>(())
    };
    let (r, ()) = tokio::join!(client, server);
    r?;
    assert_eq!(
        *recorder.0.lock().unwrap(),
        [
            "connect 42 11.4.2-MariaDB-mock",
            "start SELECT 1",
            "columns 1",
            "start DO 1",
            "ok 0",
            "start SELEC",
            "error Some(1064)",
            "start SELECT 2",
            "columns 1",
            "deallocate 5",
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_legacy_eof() -> Result {
    let (transport, mut srv) = MockServer::new(SERVER_CAPABILITIES & !client::DEPRECATE_EOF);
    let server = async move {
        let hs = srv.accept().await;
        assert_eq!(hs.capabilities & client::DEPRECATE_EOF, 0);
        srv.expect_query("SELECT a FROM t").await;
        srv.send_result_set(
            &[int_column("a")],
            &[text_row(&[Some("1")]), text_row(&[Some("2")])],
            status::AUTOCOMMIT,
        )
        .await;

        srv.expect(com::STMT_PREPARE, b"SELECT ?").await;
        srv.send(&prepare_ok(2, 1, 1)).await;
        srv.send(&int_column("?")).await;
        srv.send(&eof(status::AUTOCOMMIT)).await;
        srv.send(&int_column("a")).await;
        srv.send(&eof(status::AUTOCOMMIT)).await;

        let p = srv.command().await;
        assert_eq!(p[0], com::STMT_EXECUTE);
        srv.send_result_set(
            &[int_column("a")],
            &[binary_row(&[Some(7i64.to_le_bytes().to_vec())])],
            status::AUTOCOMMIT,
        )
        .await;
        srv.expect_closed().await;
    };
    let client = async move {
        let mut conn = connect(transport, &opts()).await?;
        let rows: Vec<(i64,)> = conn.query("SELECT a FROM t").await?.fetch_all_as().await?;
        assert_eq!(rows, vec![(1,), (2,)]);

        let stmt = conn.prepare("SELECT ?").await?;
        assert_eq!(stmt.num_params(), 1);
        assert_eq!(stmt.columns().len(), 1);
        let rows: Vec<(i64,)> = conn
            .execute_args(&stmt, (7,))
            .await?
            .fetch_all_as()
            .await?;
        assert_eq!(rows, vec![(7,)]);
        assert_eq!(conn.state(), ConnectionStatus::Idle);
        Ok(())
    };
    let (r, ()) = tokio::join!(client, server);
    r
}

#[tokio::test]
async fn test_pre_41_server() -> Result {
    let caps = client::LONG_PASSWORD | client::LONG_FLAG | client::TRANSACTIONS;
    let (transport, mut srv) = MockServer::new(caps);
    let server = async move {
        srv.send(&handshake_v10(caps, SCRAMBLE, "mysql_native_password"))
            .await;
        let p = srv.recv().await;
        let client_caps = u32::from(u16::from_le_bytes([p[0], p[1]]));
        assert_eq!(client_caps & client::PROTOCOL_41, 0);
        assert_ne!(client_caps & client::LONG_FLAG, 0);
        assert_eq!(&p[5..10], b"root\0");
        assert_eq!(&p[10..], &native_password_scramble("test", &SCRAMBLE[..8])[..]);
        srv.send(&[0x00, 0, 0, 2, 0]).await;

        srv.expect_query("SELECT id, name FROM t").await;
        srv.send(&lenenc(2)).await;
        srv.send(&legacy_column("id", type_::LONG_LONG, 0)).await;
        srv.send(&legacy_column("name", type_::VAR_STRING, 0)).await;
        srv.send(&[0xFE]).await;
        srv.send(&text_row(&[Some("1"), Some("one")])).await;
        srv.send(&text_row(&[Some("2"), None])).await;
        srv.send(&[0xFE]).await;
        srv.expect_closed().await;
    };
    let client = async move {
        let options = ConnectionOptions::new().user("root").password("test");
        let mut conn = connect(transport, &options).await?;
        assert_eq!(conn.capabilities() & client::PROTOCOL_41, 0);
        let rows: Vec<(i64, Option<String>)> = conn
            .query("SELECT id, name FROM t")
            .await?
            .fetch_all_as()
            .await?;
        assert_eq!(rows, vec![(1, Some("one".to_string())), (2, None)]);
        assert_eq!(conn.state(), ConnectionStatus::Idle);
        Ok(())
    };
    let (r, ()) = tokio::join!(client, server);
    r
}

#[tokio::test]
async fn test_row_modes() -> Result {
    let (transport, mut srv) = MockServer::new(SERVER_CAPABILITIES);
    let server = async move {
        srv.accept().await;
        for _ in 0..3 {
            srv.expect_query("SELECT id, name FROM t").await;
            srv.send_result_set(
                &[int_column("id"), text_column("name")],
                &[text_row(&[Some("1"), Some("one")])],
                status::AUTOCOMMIT,
            )
            .await;
        }
        srv.expect_closed().await;
    };
    let client = async move {
        let mut conn = connect(transport, &opts()).await?;
        let sql = "SELECT id, name FROM t";

        let options = QueryOptions::new().row_mode(RowMode::Map);
        let rows = conn.query_with(sql, &options).await?.fetch_all().await?;
        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0].get_by_name("name"),
            Some(&Value::Text("one".to_string()))
        );
        assert_eq!(rows[0].get(0), Some(&Value::Int(1)));

        let options = QueryOptions::new().row_mode(RowMode::Scalar);
        let rows = conn.query_with(sql, &options).await?.fetch_all().await?;
        assert_eq!(rows, vec![Row::Scalar(Value::Int(1))]);

        let options = QueryOptions::new().row_mode(RowMode::Void);
        let rows = conn.query_with(sql, &options).await?.fetch_all().await?;
        assert_eq!(rows, vec![Row::Void]);
        Ok(())
    };
    let (r, ()) = tokio::join!(client, server);
    r
}

#[tokio::test]
async fn test_value_limits() -> Result {
    let (transport, mut srv) = MockServer::new(SERVER_CAPABILITIES);
    let server = async move {
        srv.accept().await;
        srv.expect_query("SELECT id, name FROM t").await;
        srv.send_result_set(
            &[int_column("id"), text_column("name")],
            &[
                text_row(&[Some("1"), Some("one")]),
                text_row(&[Some("2"), Some("longer")]),
            ],
            status::AUTOCOMMIT,
        )
        .await;
        srv.expect_closed().await;
    };
    let client = async move {
        let options = opts().max_column_length(4).max_field_length(2);
        let mut conn = connect(transport, &options).await?;
        let mut rs = conn.query("SELECT id, name FROM t").await?;
        let Err(e) = rs.fetch().await else {
            panic!("expected an oversized field")
        };
        assert!(matches!(
            e.content(),
            ConnectionErrorContent::OversizedField { len: 3, limit: 2, .. }
        ));
        let row: Option<(i64, Option<String>)> = rs.fetch_as().await?;
        assert_eq!(row, Some((2, None)));
        assert!(rs.fetch().await?.is_none());
        Ok(())
    };
    let (r, ()) = tokio::join!(client, server);
    r
}

#[tokio::test]
async fn test_insert_then_select() -> Result {
    let (transport, mut srv) = MockServer::new(SERVER_CAPABILITIES);
    let server = async move {
        srv.accept().await;
        srv.expect(com::STMT_PREPARE, b"INSERT INTO t (a, b) VALUES (?, ?)")
            .await;
        srv.send(&prepare_ok(1, 0, 2)).await;
        srv.send(&column("?", type_::LONG, 0, 63)).await;
        srv.send(&column("?", type_::VAR_STRING, 0, 45)).await;

        let mut stored = Vec::new();
        for _ in 0..3 {
            let p = srv.command().await;
            assert_eq!(p[0], com::STMT_EXECUTE);
            assert_eq!(&p[10..16], &[0, 1, type_::LONG, 0, type_::STRING, 0]);
            let a = i32::from_le_bytes(p[16..20].try_into().unwrap());
            let len = p[20] as usize;
            let b = String::from_utf8(p[21..21 + len].to_vec()).unwrap();
            assert_eq!(p.len(), 21 + len);
            stored.push((a, b));
            srv.send(&ok(1, stored.len() as u64, status::AUTOCOMMIT))
                .await;
        }

        srv.expect_query("SELECT a, b FROM t").await;
        let rows: Vec<Vec<u8>> = stored
            .iter()
            .map(|(a, b)| text_row(&[Some(a.to_string().as_str()), Some(b.as_str())]))
            .collect();
        srv.send_result_set(&[int_column("a"), text_column("b")], &rows, status::AUTOCOMMIT)
            .await;
        srv.expect_closed().await;
    };
    let client = async move {
        let mut conn = connect(transport, &opts()).await?;
        let stmt = conn.prepare("INSERT INTO t (a, b) VALUES (?, ?)").await?;
        for (a, b) in [(1, "one"), (2, "two"), (3, "three")] {
            let res = conn.execute_args(&stmt, (a, b)).await?.into_ok().await?;
            assert_eq!(res.last_insert_id, a as u64);
        }
        let rows: Vec<(i32, String)> = conn
            .query("SELECT a, b FROM t")
            .await?
            .fetch_all_as()
            .await?;
        assert_eq!(
            rows,
            vec![
                (1, "one".to_string()),
                (2, "two".to_string()),
                (3, "three".to_string())
            ]
        );
        Ok(())
    };
    let (r, ()) = tokio::join!(client, server);
    r
}
