//! Redis client speaking RESP2 over TCP.
//!
//! Only the commands the telemetry loop needs are implemented: `MSET` for batched
//! measurement writes, `GET` for the control flag, and `PING` for the startup check.
//!
//! The client holds at most one connection. It is taken out of its slot for the
//! duration of a request and only put back after a complete reply was read, so a
//! request that times out or fails mid-reply drops the connection instead of leaving a
//! half-read reply for the next caller. The next request reconnects.

use crate::error::StoreError;
use crate::store::KeyValueStore;
use async_trait::async_trait;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// A decoded RESP2 reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// `+OK`
    Simple(String),
    /// `-ERR ...`
    Error(String),
    /// `:42`
    Integer(i64),
    /// `$3\r\nfoo`, `None` for the nil bulk string
    Bulk(Option<Vec<u8>>),
    /// `*2\r\n...`, `None` for the nil array. Elements are never arrays themselves.
    Array(Option<Vec<Reply>>),
}

/// Encode a command as a RESP array of bulk strings.
pub fn encode_command(args: &[&str]) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 + args.iter().map(|a| a.len() + 16).sum::<usize>());
    out.extend_from_slice(format!("*{}\r\n", args.len()).as_bytes());
    for arg in args {
        out.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        out.extend_from_slice(arg.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out
}

struct Connection {
    stream: BufStream<TcpStream>,
    line: Vec<u8>,
}

impl Connection {
    async fn call(&mut self, args: &[&str]) -> Result<Reply, StoreError> {
        self.stream.write_all(&encode_command(args)).await?;
        self.stream.flush().await?;
        let (kind, header) = self.read_header().await?;
        if kind != b'*' {
            return self.read_scalar(kind, header).await;
        }
        let Some(len) = reply_length(&header)? else {
            return Ok(Reply::Array(None));
        };
        let mut items = Vec::with_capacity(len.min(64));
        for _ in 0..len {
            let (kind, header) = self.read_header().await?;
            if kind == b'*' {
                return Err(StoreError::Protocol("nested arrays are not supported".to_string()));
            }
            items.push(self.read_scalar(kind, header).await?);
        }
        Ok(Reply::Array(Some(items)))
    }

    /// Type byte and the rest of the line, without CRLF.
    async fn read_header(&mut self) -> Result<(u8, String), StoreError> {
        self.line.clear();
        let n = self.stream.read_until(b'\n', &mut self.line).await?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed").into());
        }
        if !self.line.ends_with(b"\r\n") || self.line.len() < 3 {
            return Err(StoreError::Protocol(format!(
                "malformed reply line {:?}",
                String::from_utf8_lossy(&self.line)
            )));
        }
        let kind = self.line[0];
        let rest = String::from_utf8_lossy(&self.line[1..self.line.len() - 2]).into_owned();
        Ok((kind, rest))
    }

    async fn read_scalar(&mut self, kind: u8, header: String) -> Result<Reply, StoreError> {
        match kind {
            b'+' => Ok(Reply::Simple(header)),
            b'-' => Ok(Reply::Error(header)),
            b':' => Ok(Reply::Integer(parse_integer(&header)?)),
            b'$' => {
                let Some(len) = reply_length(&header)? else {
                    return Ok(Reply::Bulk(None));
                };
                let framed = len.checked_add(2).ok_or_else(|| {
                    StoreError::Protocol(format!("bulk length {len} overflows"))
                })?;
                let mut data = vec![0u8; framed];
                self.stream.read_exact(&mut data).await?;
                if !data.ends_with(b"\r\n") {
                    return Err(StoreError::Protocol(
                        "bulk string is not CRLF terminated".to_string(),
                    ));
                }
                data.truncate(len);
                Ok(Reply::Bulk(Some(data)))
            }
            other => Err(StoreError::Protocol(format!(
                "unknown reply type byte {:?}",
                char::from(other)
            ))),
        }
    }
}

fn parse_integer(text: &str) -> Result<i64, StoreError> {
    text.parse()
        .map_err(|_| StoreError::Protocol(format!("invalid integer {text:?}")))
}

/// Largest bulk string or array length accepted from the server, Redis's own
/// `proto-max-bulk-len` default.
const MAX_REPLY_LEN: i64 = 512 * 1024 * 1024;

/// Length from a `$` or `*` header; `None` for the nil reply (`-1`).
fn reply_length(header: &str) -> Result<Option<usize>, StoreError> {
    match parse_integer(header)? {
        -1 => Ok(None),
        len @ 0..=MAX_REPLY_LEN => usize::try_from(len)
            .map(Some)
            .map_err(|_| StoreError::Protocol(format!("reply length {len} out of range"))),
        len => Err(StoreError::Protocol(format!("reply length {len} out of range"))),
    }
}

/// A [`KeyValueStore`] on a Redis server.
pub struct RedisStore {
    address: String,
    connect_timeout: Duration,
    read_timeout: Duration,
    connection: Mutex<Option<Connection>>,
}

impl RedisStore {
    /// Client for `address` (`host:port`). Connects lazily on the first request.
    pub fn new(address: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            address: address.into(),
            connect_timeout,
            read_timeout: connect_timeout,
            connection: Mutex::new(None),
        }
    }

    /// Upper bound on a single `GET`. Defaults to the connect timeout.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Server address
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Round-trip a `PING`, connecting if needed.
    pub async fn ping(&self) -> Result<(), StoreError> {
        match self.request(&["PING"], self.connect_timeout).await? {
            Reply::Simple(pong) if pong == "PONG" => Ok(()),
            other => Err(StoreError::Protocol(format!(
                "unexpected PING reply {other:?}"
            ))),
        }
    }

    async fn connect(&self) -> Result<Connection, StoreError> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.address))
            .await
            .map_err(|_| StoreError::Timeout(self.connect_timeout))??;
        stream.set_nodelay(true)?;
        info!(address = %self.address, "Connected to Redis");
        Ok(Connection {
            stream: BufStream::new(stream),
            line: Vec::with_capacity(64),
        })
    }

    async fn request(&self, args: &[&str], timeout: Duration) -> Result<Reply, StoreError> {
        match tokio::time::timeout(timeout, self.exchange(args)).await {
            Ok(result) => result,
            Err(_) => {
                debug!(command = args.first().copied().unwrap_or_default(), ?timeout, "Redis request timed out");
                Err(StoreError::Timeout(timeout))
            }
        }
    }

    async fn exchange(&self, args: &[&str]) -> Result<Reply, StoreError> {
        let mut slot = self.connection.lock().await;
        let mut connection = match slot.take() {
            Some(connection) => connection,
            None => self.connect().await?,
        };
        let reply = connection.call(args).await?;
        *slot = Some(connection);
        match reply {
            Reply::Error(message) => Err(StoreError::Protocol(message)),
            reply => Ok(reply),
        }
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn batch_write(
        &self,
        entries: &[(String, String)],
        timeout: Duration,
    ) -> Result<(), StoreError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut args = Vec::with_capacity(1 + 2 * entries.len());
        args.push("MSET");
        for (key, value) in entries {
            args.push(key.as_str());
            args.push(value.as_str());
        }
        match self.request(&args, timeout).await? {
            Reply::Simple(ok) if ok == "OK" => Ok(()),
            other => Err(StoreError::Protocol(format!(
                "unexpected MSET reply {other:?}"
            ))),
        }
    }

    async fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.request(&["GET", key], self.read_timeout).await? {
            Reply::Bulk(None) => Ok(None),
            Reply::Bulk(Some(bytes)) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|_| StoreError::Protocol(format!("value of {key} is not UTF-8"))),
            other => Err(StoreError::Protocol(format!(
                "unexpected GET reply {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    const TIMEOUT: Duration = Duration::from_secs(2);

    /// One scripted exchange: bytes the client must send, bytes to answer with.
    /// A `None` reply holds the connection open without answering; an empty reply
    /// closes it.
    type Exchange = (Vec<u8>, Option<Vec<u8>>);

    /// Serves each inner script on its own accepted connection, in order.
    async fn fake_server(connections: Vec<Vec<Exchange>>) -> (String, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let handle = tokio::spawn(async move {
            for script in connections {
                let (mut socket, _) = listener.accept().await.unwrap();
                for (expected, reply) in script {
                    let mut received = vec![0u8; expected.len()];
                    socket.read_exact(&mut received).await.unwrap();
                    assert_eq!(
                        String::from_utf8_lossy(&received),
                        String::from_utf8_lossy(&expected)
                    );
                    match reply {
                        Some(bytes) if bytes.is_empty() => break,
                        Some(bytes) => socket.write_all(&bytes).await.unwrap(),
                        None => tokio::time::sleep(Duration::from_secs(3600)).await,
                    }
                }
            }
        });
        (address, handle)
    }

    #[test]
    fn commands_are_encoded_as_bulk_arrays() {
        assert_eq!(
            encode_command(&["GET", "utec::logging::start"]),
            b"*2\r\n$3\r\nGET\r\n$20\r\nutec::logging::start\r\n".to_vec()
        );
    }

    #[tokio::test]
    async fn batch_is_one_mset() {
        let expected = encode_command(&["MSET", "a", "1.000000", "b", "2.500000"]);
        let (address, server) = fake_server(vec![vec![(expected, Some(b"+OK\r\n".to_vec()))]]).await;

        let store = RedisStore::new(address, TIMEOUT);
        let batch = vec![
            ("a".to_string(), "1.000000".to_string()),
            ("b".to_string(), "2.500000".to_string()),
        ];
        store.batch_write(&batch, TIMEOUT).await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn get_handles_values_and_nil() {
        let (address, server) = fake_server(vec![vec![
            (encode_command(&["PING"]), Some(b"+PONG\r\n".to_vec())),
            (encode_command(&["GET", "flag"]), Some(b"$1\r\n1\r\n".to_vec())),
            (encode_command(&["GET", "nope"]), Some(b"$-1\r\n".to_vec())),
        ]])
        .await;

        let store = RedisStore::new(address, TIMEOUT);
        store.ping().await.unwrap();
        assert_eq!(store.read("flag").await.unwrap().as_deref(), Some("1"));
        assert_eq!(store.read("nope").await.unwrap(), None);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn error_reply_is_a_protocol_error_and_keeps_the_connection() {
        let (address, server) = fake_server(vec![vec![
            (
                encode_command(&["GET", "list"]),
                Some(b"-WRONGTYPE Operation against a key holding the wrong kind of value\r\n".to_vec()),
            ),
            (encode_command(&["GET", "flag"]), Some(b"$1\r\n0\r\n".to_vec())),
        ]])
        .await;

        let store = RedisStore::new(address, TIMEOUT);
        match store.read("list").await {
            Err(StoreError::Protocol(message)) => assert!(message.starts_with("WRONGTYPE")),
            other => panic!("expected protocol error, got {other:?}"),
        }
        assert_eq!(store.read("flag").await.unwrap().as_deref(), Some("0"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let (address, _server) = fake_server(vec![vec![(encode_command(&["MSET", "k", "v"]), None)]]).await;

        let store = RedisStore::new(address, TIMEOUT);
        let timeout = Duration::from_millis(50);
        let result = store
            .batch_write(&[("k".to_string(), "v".to_string())], timeout)
            .await;
        assert!(matches!(result, Err(StoreError::Timeout(t)) if t == timeout));
    }

    #[tokio::test]
    async fn reconnects_after_the_server_drops_the_connection() {
        let (address, server) = fake_server(vec![
            vec![(encode_command(&["GET", "flag"]), Some(Vec::new()))],
            vec![(encode_command(&["GET", "flag"]), Some(b"$1\r\n1\r\n".to_vec()))],
        ])
        .await;

        let store = RedisStore::new(address, TIMEOUT);
        assert!(matches!(store.read("flag").await, Err(StoreError::Io(_))));
        assert_eq!(store.read("flag").await.unwrap().as_deref(), Some("1"));
        server.await.unwrap();
    }

    #[test]
    fn reply_lengths_are_bounded() {
        assert_eq!(reply_length("-1").unwrap(), None);
        assert_eq!(reply_length("0").unwrap(), Some(0));
        assert_eq!(reply_length("536870912").unwrap(), Some(536_870_912));
        assert!(matches!(reply_length("536870913"), Err(StoreError::Protocol(_))));
        assert!(matches!(reply_length("-2"), Err(StoreError::Protocol(_))));
        assert!(matches!(reply_length("x"), Err(StoreError::Protocol(_))));
    }

    #[tokio::test]
    async fn oversized_reply_headers_are_protocol_errors() {
        // A bad header drops the connection, so each reply gets its own.
        let get = encode_command(&["GET", "flag"]);
        let (address, server) = fake_server(vec![
            vec![(get.clone(), Some(b"*4611686018427387904\r\n".to_vec()))],
            vec![(get.clone(), Some(b"$9223372036854775807\r\n".to_vec()))],
            vec![(get.clone(), Some(b"$-7\r\n".to_vec()))],
            vec![(get, Some(b"$1\r\n1\r\n".to_vec()))],
        ])
        .await;

        let store = RedisStore::new(address, TIMEOUT);
        for _ in 0..3 {
            assert!(matches!(store.read("flag").await, Err(StoreError::Protocol(_))));
        }
        assert_eq!(store.read("flag").await.unwrap().as_deref(), Some("1"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn unreachable_server_fails_without_panicking() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let store = RedisStore::new(address, Duration::from_millis(200));
        assert!(store.ping().await.is_err());
    }
}
