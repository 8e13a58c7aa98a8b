//! Wire framing and message shapes for the Debug Adapter Protocol.
//!
//! Mirrors `backend/service/visual_debug_servcie/debug_core/utils/dap_cli.go`'s
//! `NewRequest`/`ReadMessage`: a `Content-Length` header followed by a JSON
//! body, discriminated by a `type` field into request/response/event.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use dso_error::DapError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub seq: i64,
    #[serde(rename = "type")]
    pub type_: String,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

impl Request {
    pub fn new(seq: i64, command: impl Into<String>, arguments: Option<Value>) -> Self {
        Self {
            seq,
            type_: "request".to_string(),
            command: command.into(),
            arguments,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub seq: i64,
    #[serde(rename = "type")]
    pub type_: String,
    pub request_seq: i64,
    pub success: bool,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub seq: i64,
    #[serde(rename = "type")]
    pub type_: String,
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

#[derive(Debug, Clone)]
pub enum InboundMessage {
    Response(Response),
    Event(Event),
    /// A reverse request sent by the DAP server to the client. We don't
    /// issue any ourselves but must not choke on receiving one.
    Request(Request),
}

/// Reads one framed DAP message (`Content-Length: N\r\n\r\n<N bytes of JSON>`).
pub async fn read_message<R: AsyncRead + Unpin>(
    reader: &mut BufReader<R>,
) -> Result<InboundMessage, DapError> {
    let mut content_length: Option<usize> = None;
    loop {
        let mut line = String::new();
        let n = reader
            .read_line(&mut line)
            .await
            .map_err(DapError::Io)?;
        if n == 0 {
            return Err(DapError::Closed);
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }
        if let Some(value) = trimmed.strip_prefix("Content-Length:") {
            content_length = Some(
                value
                    .trim()
                    .parse::<usize>()
                    .map_err(|e| DapError::Protocol(format!("bad Content-Length: {e}")))?,
            );
        }
    }

    let len = content_length.ok_or_else(|| DapError::Protocol("missing Content-Length".into()))?;
    let mut buf = vec![0u8; len];
    tokio::io::AsyncReadExt::read_exact(reader, &mut buf)
        .await
        .map_err(DapError::Io)?;

    let value: Value = serde_json::from_slice(&buf)
        .map_err(|e| DapError::Protocol(format!("invalid json body: {e}")))?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| DapError::Protocol("message missing `type`".into()))?;

    match kind {
        "response" => Ok(InboundMessage::Response(
            serde_json::from_value(value)
                .map_err(|e| DapError::Protocol(format!("invalid response: {e}")))?,
        )),
        "event" => Ok(InboundMessage::Event(
            serde_json::from_value(value).map_err(|e| DapError::Protocol(format!("invalid event: {e}")))?,
        )),
        "request" => Ok(InboundMessage::Request(
            serde_json::from_value(value)
                .map_err(|e| DapError::Protocol(format!("invalid request: {e}")))?,
        )),
        other => Err(DapError::Protocol(format!("unknown message type: {other}"))),
    }
}

/// Writes one framed DAP request.
pub async fn write_request<W: AsyncWrite + Unpin>(
    writer: &mut W,
    request: &Request,
) -> Result<(), DapError> {
    let body = serde_json::to_vec(request)
        .map_err(|e| DapError::Protocol(format!("failed to serialize request: {e}")))?;
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    writer.write_all(header.as_bytes()).await.map_err(DapError::Io)?;
    writer.write_all(&body).await.map_err(DapError::Io)?;
    writer.flush().await.map_err(DapError::Io)
}
