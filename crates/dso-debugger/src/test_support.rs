//! Shared fixture for this crate's `#[cfg(test)]` modules: a scriptable fake
//! DAP server, adapted from `dso_dap`'s own `spawn_fake_server` test helper
//! but parameterized per-command instead of echoing a single canned body.

use std::net::SocketAddr;
use std::sync::Arc;

use dso_dap::protocol::{read_message, InboundMessage};
use dso_dap::Response;
use serde_json::Value;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

/// Spawns a fake DAP server on loopback. For every request it receives,
/// `handler(command, arguments)` supplies the response body; `Value::Null`
/// answers with `success: false` instead.
pub async fn spawn_scripted_dap_server<H>(handler: H) -> SocketAddr
where
    H: Fn(&str, Option<Value>) -> Value + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let handler = Arc::new(handler);
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        loop {
            let msg = match read_message(&mut reader).await {
                Ok(InboundMessage::Request(r)) => r,
                _ => return,
            };
            let body = handler(&msg.command, msg.arguments.clone());
            let success = !body.is_null();
            let resp = Response {
                seq: msg.seq + 1000,
                type_: "response".to_string(),
                request_seq: msg.seq,
                success,
                command: msg.command.clone(),
                message: if success { None } else { Some("scripted failure".to_string()) },
                body: if success { Some(body) } else { None },
            };
            let payload = serde_json::to_vec(&resp).expect("serialize");
            let header = format!("Content-Length: {}\r\n\r\n", payload.len());
            if write_half.write_all(header.as_bytes()).await.is_err() {
                return;
            }
            if write_half.write_all(&payload).await.is_err() {
                return;
            }
            let _ = write_half.flush().await;
        }
    });
    addr
}
