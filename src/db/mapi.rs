//! MAPI socket transport
//!
//! Messages are exchanged as blocks. A block is sent in chunks of at most
//! 8190 bytes, each preceded by a two-byte little-endian header holding
//! `length << 1 | last_chunk`.

use super::transport::{Connector, Transport};
use super::ConnectionConfig;
use crate::{Error, Result};

use async_trait::async_trait;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

const MAX_CHUNK_LENGTH: usize = 1024 * 8 - 2;
const MAX_REDIRECTS: usize = 10;
const MSG_MORE: &[u8] = b"\x01\x02\n";
const MSG_OK: &str = "=OK";
const PROTOCOL_VERSION: &str = "9";
const LANGUAGE: &str = "sql";

/// Outcome of one login exchange.
#[derive(Debug, PartialEq)]
enum Login {
    Ready,
    /// Merovingian proxied the connection; authenticate again on the same socket
    Proxy,
    /// Reconnect to another server
    Redirect(ConnectionConfig),
}

/// A logged-in MAPI connection.
pub struct MapiTransport {
    stream: TcpStream,
}

impl MapiTransport {
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let mut target = config.clone();
        let mut transport = Self {
            stream: open_stream(&target).await?,
        };

        for _ in 0..MAX_REDIRECTS {
            match transport.login(&target).await? {
                Login::Ready => {
                    info!(host = %target.host, port = target.port, database = %target.database, "connected to MonetDB");
                    return Ok(transport);
                }
                Login::Proxy => debug!("merovingian proxy, restarting authentication"),
                Login::Redirect(next) => {
                    debug!(host = %next.host, port = next.port, "redirected to another server");
                    target = next;
                    transport.stream = open_stream(&target).await?;
                }
            }
        }

        Err(Error::Connection(format!(
            "maximal number of redirects reached ({})",
            MAX_REDIRECTS
        )))
    }

    async fn login(&mut self, config: &ConnectionConfig) -> Result<Login> {
        let challenge = String::from_utf8(self.get_block().await?)
            .map_err(|e| Error::Protocol(format!("challenge is not utf-8: {}", e)))?;
        let response = challenge_response(&challenge, config)?;
        self.put_block(response.as_bytes()).await?;

        let prompt = String::from_utf8(self.get_block().await?)
            .map_err(|e| Error::Protocol(format!("login reply is not utf-8: {}", e)))?;
        parse_login_reply(prompt.trim_end_matches('\n'), config)
    }

    async fn get_block(&mut self) -> Result<Vec<u8>> {
        let mut block = Vec::new();
        loop {
            let header = self.stream.read_u16_le().await?;
            let length = (header >> 1) as usize;
            let last = header & 1 == 1;

            let start = block.len();
            block.resize(start + length, 0);
            self.stream.read_exact(&mut block[start..]).await?;

            if last {
                return Ok(block);
            }
        }
    }

    async fn put_block(&mut self, data: &[u8]) -> Result<()> {
        let mut chunks = data.chunks(MAX_CHUNK_LENGTH).peekable();
        if chunks.peek().is_none() {
            self.stream.write_u16_le(1).await?;
        }
        while let Some(chunk) = chunks.next() {
            let last = chunks.peek().is_none() as u16;
            self.stream
                .write_u16_le(((chunk.len() as u16) << 1) | last)
                .await?;
            self.stream.write_all(chunk).await?;
        }
        self.stream.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl Transport for MapiTransport {
    async fn cmd(&mut self, command: &str) -> Result<String> {
        self.put_block(command.as_bytes()).await?;
        loop {
            let block = self.get_block().await?;
            if block == MSG_MORE {
                // the server wants more input; an empty block ends the statement
                self.put_block(b"").await?;
                continue;
            }
            let response = String::from_utf8(block)
                .map_err(|e| Error::Protocol(format!("response is not utf-8: {}", e)))?;
            if response.starts_with(MSG_OK) {
                return Ok(String::new());
            }
            return Ok(response);
        }
    }
}

/// Opens authenticated MAPI transports for the pool.
#[derive(Debug, Clone)]
pub struct MapiConnector {
    config: ConnectionConfig,
}

impl MapiConnector {
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for MapiConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>> {
        Ok(Box::new(MapiTransport::connect(&self.config).await?))
    }
}

async fn open_stream(config: &ConnectionConfig) -> Result<TcpStream> {
    let stream = TcpStream::connect((config.host.as_str(), config.port))
        .await
        .map_err(|e| {
            Error::Connection(format!(
                "connect to {}:{}: {}",
                config.host, config.port, e
            ))
        })?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

fn hex_digest<D: Digest>(parts: &[&str]) -> String {
    let mut hasher = D::new();
    for part in parts {
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Build the login line for a `salt:server:protocol:hashes:endian:algo:` challenge.
fn challenge_response(challenge: &str, config: &ConnectionConfig) -> Result<String> {
    let fields: Vec<&str> = challenge.trim_end().split(':').collect();
    if fields.len() < 6 {
        return Err(Error::Protocol(format!("malformed challenge: {}", challenge)));
    }
    let (salt, protocol, hashes, algo) = (fields[0], fields[2], fields[3], fields[5]);

    if protocol != PROTOCOL_VERSION {
        return Err(Error::Connection(format!(
            "unsupported MAPI protocol version {}",
            protocol
        )));
    }

    let password = match algo {
        "SHA512" => hex_digest::<Sha512>(&[config.password.as_str()]),
        "SHA256" => hex_digest::<Sha256>(&[config.password.as_str()]),
        other => {
            return Err(Error::Connection(format!(
                "unsupported password hash algorithm {}",
                other
            )))
        }
    };

    let offered: Vec<&str> = hashes.split(',').collect();
    let pwhash = if offered.contains(&"SHA512") {
        format!("{{SHA512}}{}", hex_digest::<Sha512>(&[password.as_str(), salt]))
    } else if offered.contains(&"SHA256") {
        format!("{{SHA256}}{}", hex_digest::<Sha256>(&[password.as_str(), salt]))
    } else if offered.contains(&"SHA1") {
        format!("{{SHA1}}{}", hex_digest::<Sha1>(&[password.as_str(), salt]))
    } else {
        return Err(Error::Connection(format!(
            "no supported challenge hash among {}",
            hashes
        )));
    };

    Ok(format!(
        "BIG:{}:{}:{}:{}:",
        config.username, pwhash, LANGUAGE, config.database
    ))
}

fn parse_login_reply(reply: &str, config: &ConnectionConfig) -> Result<Login> {
    if reply.is_empty() || reply.starts_with(MSG_OK) || reply.starts_with('#') {
        return Ok(Login::Ready);
    }
    if let Some(message) = reply.strip_prefix('!') {
        return Err(Error::Connection(format!("login failed: {}", message)));
    }

    let Some(target) = reply.strip_prefix('^') else {
        return Err(Error::Protocol(format!("unknown login reply: {}", reply)));
    };
    let target = target.split_whitespace().next().unwrap_or_default();

    if target.starts_with("mapi:merovingian:") {
        return Ok(Login::Proxy);
    }
    if let Some(rest) = target.strip_prefix("mapi:monetdb://") {
        let (address, database) = rest.split_once('/').unwrap_or((rest, config.database.as_str()));
        let (host, port) = match address.rsplit_once(':') {
            Some((host, port)) => (
                host,
                port.parse()
                    .map_err(|_| Error::Protocol(format!("invalid redirect port in {}", target)))?,
            ),
            None => (address, config.port),
        };
        return Ok(Login::Redirect(ConnectionConfig {
            host: host.to_string(),
            port,
            database: database.trim_end_matches('?').to_string(),
            ..config.clone()
        }));
    }

    Err(Error::Protocol(format!("unknown redirect: {}", target)))
}
