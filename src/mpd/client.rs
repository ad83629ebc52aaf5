//! MPD session over TCP

use async_trait::async_trait;
use std::io::ErrorKind;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::timeout;
use tracing::{debug, info};

use super::RemoteError;
use super::protocol::{self, Line, Operation, Reply};
use super::remote::{Connector, Session};

/// Opens TCP sessions to an MPD server
#[derive(Debug, Clone)]
pub struct MpdConnector {
    host: String,
    port: u16,
    connect_timeout: Duration,
}

impl MpdConnector {
    pub fn new(host: &str, port: u16, connect_timeout: Duration) -> Self {
        Self {
            host: host.to_string(),
            port,
            connect_timeout,
        }
    }
}

#[async_trait]
impl Connector for MpdConnector {
    async fn connect(&self) -> Result<Box<dyn Session>, RemoteError> {
        let addr = self.address();
        info!("Connecting to {}", addr);

        let attempt = async {
            let stream = TcpStream::connect((self.host.as_str(), self.port))
                .await
                .map_err(|e| e.to_string())?;
            let session = MpdSession::handshake(stream)
                .await
                .map_err(|e| e.to_string())?;
            Ok::<_, String>(session)
        };

        match timeout(self.connect_timeout, attempt).await {
            Ok(Ok(session)) => {
                debug!("Connected to {} (protocol {})", addr, session.version);
                Ok(Box::new(session))
            }
            Ok(Err(reason)) => Err(RemoteError::ConnectionFailure { addr, reason }),
            Err(_) => Err(RemoteError::ConnectionFailure {
                addr,
                reason: format!("timed out after {}s", self.connect_timeout.as_secs()),
            }),
        }
    }

    fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// A live connection to the MPD server
pub struct MpdSession {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    version: String,
}

impl MpdSession {
    /// Read the server greeting on a fresh connection
    async fn handshake(stream: TcpStream) -> Result<Self, RemoteError> {
        let (read_half, writer) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let greeting = read_line(&mut reader).await?;
        let version = protocol::parse_greeting(&greeting)?;

        Ok(Self {
            reader,
            writer,
            version,
        })
    }
}

#[async_trait]
impl Session for MpdSession {
    async fn execute(&mut self, op: &Operation) -> Result<Reply, RemoteError> {
        let mut request = op.encode()?;
        debug!("MPD > {}", request);
        request.push('\n');

        self.writer
            .write_all(request.as_bytes())
            .await
            .map_err(|e| RemoteError::ConnectionLost(e.to_string()))?;

        let mut pairs = Vec::new();
        loop {
            let line = read_line(&mut self.reader).await?;
            match protocol::parse_line(&line)? {
                Line::Ok => return op.decode(pairs),
                Line::Ack(ack) => {
                    debug!("MPD < {}", line);
                    return op.on_ack(ack);
                }
                Line::Pair(key, value) => pairs.push((key.to_string(), value.to_string())),
            }
        }
    }

    fn server_version(&self) -> &str {
        &self.version
    }
}

async fn read_line(reader: &mut BufReader<OwnedReadHalf>) -> Result<String, RemoteError> {
    let mut line = String::new();
    let read = reader.read_line(&mut line).await.map_err(|e| {
        if e.kind() == ErrorKind::InvalidData {
            RemoteError::Protocol(format!("response is not valid UTF-8: {}", e))
        } else {
            RemoteError::ConnectionLost(e.to_string())
        }
    })?;

    if read == 0 {
        return Err(RemoteError::ConnectionLost(
            "server closed the connection".to_string(),
        ));
    }

    Ok(line.trim_end_matches(|c| c == '\n' || c == '\r').to_string())
}
