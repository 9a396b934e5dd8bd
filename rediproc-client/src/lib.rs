use log::{debug, warn};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Commands, ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
use rediproc_common::{RediprocError, ResolvedConfig, Result};
use rediproc_executor::RedisServer;
use std::ops::{Deref, DerefMut};

/// Per-fixture client options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientOptions {
    /// Logical database to select.
    pub dbnum: i64,
    /// Decode values to text; `None` defers to the resolved config.
    pub decode: Option<bool>,
}

/// A value read back by [`RedisDb::fetch`] or [`AsyncRedisDb::fetch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    Bytes(Vec<u8>),
}

fn client_error(err: redis::RedisError) -> RediprocError {
    RediprocError::Client(err.to_string())
}

/// Connection parameters for `server`. The unix socket wins over host:port
/// when the server exposes one.
pub fn connection_info(server: &dyn RedisServer, dbnum: i64) -> ConnectionInfo {
    let addr = match server.unixsocket() {
        #[cfg(unix)]
        Some(path) => ConnectionAddr::Unix(path),
        _ => ConnectionAddr::Tcp(server.host().to_string(), server.port()),
    };
    ConnectionInfo {
        addr,
        redis: RedisConnectionInfo {
            db: dbnum,
            username: server.username().map(str::to_string),
            password: server.password().map(str::to_string),
            ..Default::default()
        },
    }
}

fn decode_reply(raw: Option<Vec<u8>>, decode: bool) -> Result<Option<Reply>> {
    match raw {
        None => Ok(None),
        Some(bytes) if decode => String::from_utf8(bytes)
            .map(|text| Some(Reply::Text(text)))
            .map_err(|e| RediprocError::Client(format!("value is not UTF-8: {e}"))),
        Some(bytes) => Ok(Some(Reply::Bytes(bytes))),
    }
}

fn flush_blocking(client: &redis::Client) -> Result<()> {
    let mut connection = client.get_connection().map_err(client_error)?;
    redis::cmd("FLUSHALL").query::<()>(&mut connection).map_err(client_error)
}

/// Blocking client for one test. Flushes every database on drop so the next
/// test starts from an empty server.
///
/// Derefs to [`redis::Connection`], so [`redis::Commands`] work directly.
pub struct RedisDb {
    client: redis::Client,
    connection: redis::Connection,
    decode: bool,
}

impl RedisDb {
    pub fn open(server: &dyn RedisServer, config: &ResolvedConfig, options: ClientOptions) -> Result<Self> {
        let client = redis::Client::open(connection_info(server, options.dbnum)).map_err(client_error)?;
        let connection = client.get_connection().map_err(client_error)?;
        debug!("connected to redis at {}:{} db {}", server.host(), server.port(), options.dbnum);
        Ok(RedisDb { client, connection, decode: options.decode.unwrap_or(config.decode) })
    }

    pub fn client(&self) -> &redis::Client {
        &self.client
    }

    pub fn decode(&self) -> bool {
        self.decode
    }

    /// GET `key`, as text or bytes depending on the decode setting.
    pub fn fetch(&mut self, key: &str) -> Result<Option<Reply>> {
        let raw: Option<Vec<u8>> = self.connection.get(key).map_err(client_error)?;
        decode_reply(raw, self.decode)
    }

    pub fn flush(&mut self) -> Result<()> {
        redis::cmd("FLUSHALL").query::<()>(&mut self.connection).map_err(client_error)
    }
}

impl Deref for RedisDb {
    type Target = redis::Connection;

    fn deref(&self) -> &Self::Target {
        &self.connection
    }
}

impl DerefMut for RedisDb {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.connection
    }
}

impl Drop for RedisDb {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!("could not flush redis after test: {e}");
        }
    }
}

/// Async counterpart of [`RedisDb`] over a multiplexed tokio connection.
///
/// Call [`close`](AsyncRedisDb::close) at the end of the test to flush on the
/// async connection. If the guard is dropped instead, the flush happens over
/// a short-lived blocking connection.
pub struct AsyncRedisDb {
    client: redis::Client,
    connection: MultiplexedConnection,
    decode: bool,
    flushed: bool,
}

impl AsyncRedisDb {
    pub async fn open(server: &dyn RedisServer, config: &ResolvedConfig, options: ClientOptions) -> Result<Self> {
        let client = redis::Client::open(connection_info(server, options.dbnum)).map_err(client_error)?;
        let connection = client.get_multiplexed_async_connection().await.map_err(client_error)?;
        debug!("connected to redis at {}:{} db {} (async)", server.host(), server.port(), options.dbnum);
        Ok(AsyncRedisDb {
            client,
            connection,
            decode: options.decode.unwrap_or(config.decode),
            flushed: false,
        })
    }

    /// A handle on the shared connection; clones are cheap.
    pub fn connection(&self) -> MultiplexedConnection {
        self.connection.clone()
    }

    pub async fn fetch(&mut self, key: &str) -> Result<Option<Reply>> {
        let raw: Option<Vec<u8>> = self.connection.get(key).await.map_err(client_error)?;
        decode_reply(raw, self.decode)
    }

    pub async fn flush(&mut self) -> Result<()> {
        redis::cmd("FLUSHALL")
            .query_async::<_, ()>(&mut self.connection)
            .await
            .map_err(client_error)
    }

    pub async fn close(mut self) -> Result<()> {
        let flushed = self.flush().await;
        self.flushed = true;
        flushed
    }
}

impl Deref for AsyncRedisDb {
    type Target = MultiplexedConnection;

    fn deref(&self) -> &Self::Target {
        &self.connection
    }
}

impl DerefMut for AsyncRedisDb {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.connection
    }
}

impl Drop for AsyncRedisDb {
    fn drop(&mut self) {
        if self.flushed {
            return;
        }
        if let Err(e) = flush_blocking(&self.client) {
            warn!("could not flush redis after test: {e}");
        }
    }
}
