//! Client for the remote control protocol.

use std::net::SocketAddr;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::net::TcpStream;

use super::protocol::{Request, Response, read_frame, write_frame};

/// Remote control client. Opens one connection per call.
pub struct RpcClient {
    addr: SocketAddr,
}

#[derive(Debug)]
pub enum ClientError {
    /// Failed to connect to daemon
    Connect(std::io::Error),
    /// Failed to send/receive data
    Io(std::io::Error),
    /// Connection closed before an answer arrived
    Closed,
    Serialize(serde_json::Error),
    Parse(serde_json::Error),
    /// The daemon answered `{"error": ...}`
    Remote(String),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Connect(e) => write!(f, "Failed to connect to daemon: {}", e),
            ClientError::Io(e) => write!(f, "Communication error: {}", e),
            ClientError::Closed => write!(f, "Daemon closed the connection"),
            ClientError::Serialize(e) => write!(f, "Failed to serialize request: {}", e),
            ClientError::Parse(e) => write!(f, "Failed to parse response: {}", e),
            ClientError::Remote(message) => write!(f, "Daemon error: {}", message),
        }
    }
}

impl std::error::Error for ClientError {}

impl RpcClient {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    /// Send a command and return the raw JSON answer.
    pub async fn send(&self, request: &Request) -> Result<Value, ClientError> {
        let mut stream = TcpStream::connect(self.addr)
            .await
            .map_err(ClientError::Connect)?;

        let payload = serde_json::to_vec(request).map_err(ClientError::Serialize)?;
        write_frame(&mut stream, &payload)
            .await
            .map_err(ClientError::Io)?;

        let frame = read_frame(&mut stream)
            .await
            .map_err(ClientError::Io)?
            .ok_or(ClientError::Closed)?;

        let response = Response(serde_json::from_slice(&frame).map_err(ClientError::Parse)?);
        if let Some(message) = response.error_message() {
            return Err(ClientError::Remote(message.to_string()));
        }
        Ok(response.into_value())
    }

    /// Send a command and decode the answer.
    pub async fn call<T: DeserializeOwned>(
        &self,
        command: &str,
        parameters: Option<Value>,
    ) -> Result<T, ClientError> {
        let request = Request {
            command: command.to_string(),
            parameters,
        };
        let value = self.send(&request).await?;
        serde_json::from_value(value).map_err(ClientError::Parse)
    }
}
