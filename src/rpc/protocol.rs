//! Remote control message types and framing.
//!
//! Every frame, in both directions, is a 4-byte little-endian length followed
//! by that many bytes of UTF-8 JSON.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Frames larger than this are rejected before allocating.
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

/// Client request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

impl Request {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            parameters: None,
        }
    }

    pub fn with_parameters(command: impl Into<String>, parameters: Value) -> Self {
        Self {
            command: command.into(),
            parameters: Some(parameters),
        }
    }
}

/// Server answer. The payload is whatever the command produced; failures are
/// `{"error": "<message>"}`.
#[derive(Debug, Clone, PartialEq)]
pub struct Response(pub Value);

impl Response {
    pub fn success(result: impl Serialize) -> Self {
        match serde_json::to_value(result) {
            Ok(value) => Self(value),
            Err(e) => Self::error(format!("Failed to serialize response: {e}")),
        }
    }

    pub fn ack(message: impl Into<String>) -> Self {
        Self(Value::String(message.into()))
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self(json!({ "error": message.into() }))
    }

    pub fn unknown_command(command: &str) -> Self {
        Self::error(format!("Unknown command: {command}"))
    }

    /// The error message, if this is an error answer.
    pub fn error_message(&self) -> Option<&str> {
        self.0.as_object()?.get("error")?.as_str()
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

/// Read one frame. Returns `None` on a clean EOF before the length prefix.
pub async fn read_frame<R>(reader: &mut R) -> std::io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32_le().await {
        Ok(len) => len,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    };

    if len > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds limit of {MAX_FRAME_LEN}"),
        ));
    }

    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;
    Ok(Some(buf))
}

pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len <= MAX_FRAME_LEN)
        .ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("payload of {} bytes is too large", payload.len()),
            )
        })?;

    writer.write_u32_le(len).await?;
    writer.write_all(payload).await?;
    writer.flush().await
}
