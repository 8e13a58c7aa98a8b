pub mod protocol;
pub mod transport;

pub use protocol::{Event, Request, Response};
pub use transport::DapTransport;

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;
    use tokio::io::{AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    use super::protocol::{read_message, write_request, InboundMessage, Response};
    use super::transport::DapTransport;

    /// Spawns a fake DAP server on loopback that echoes back a successful
    /// response for whatever command it receives, and can be told to push
    /// an unsolicited event first to prove events don't block responses.
    async fn spawn_fake_server(emit_event_first: bool) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let (read_half, mut write_half) = stream.into_split();
            let mut reader = BufReader::new(read_half);

            if emit_event_first {
                let event = json!({
                    "seq": 1,
                    "type": "event",
                    "event": "output",
                    "body": { "text": "hello" },
                });
                let body = serde_json::to_vec(&event).expect("serialize");
                let header = format!("Content-Length: {}\r\n\r\n", body.len());
                write_half.write_all(header.as_bytes()).await.expect("write header");
                write_half.write_all(&body).await.expect("write body");
                write_half.flush().await.expect("flush");
            }

            loop {
                let msg = match read_message(&mut reader).await {
                    Ok(InboundMessage::Request(r)) => r,
                    _ => return,
                };
                let resp = Response {
                    seq: msg.seq + 1000,
                    type_: "response".to_string(),
                    request_seq: msg.seq,
                    success: true,
                    command: msg.command.clone(),
                    message: None,
                    body: Some(json!({ "ok": true })),
                };
                let body = serde_json::to_vec(&resp).expect("serialize");
                let header = format!("Content-Length: {}\r\n\r\n", body.len());
                if write_half.write_all(header.as_bytes()).await.is_err() {
                    return;
                }
                if write_half.write_all(&body).await.is_err() {
                    return;
                }
                let _ = write_half.flush().await;
            }
        });
        addr
    }

    #[tokio::test]
    async fn send_sync_round_trips_and_events_dont_block_it() {
        let addr = spawn_fake_server(true).await;
        let events_seen = Arc::new(AtomicUsize::new(0));
        let events_seen2 = events_seen.clone();

        let transport = DapTransport::connect(
            addr,
            Duration::from_secs(2),
            Arc::new(move |_event| {
                events_seen2.fetch_add(1, Ordering::SeqCst);
            }),
            None,
        )
        .await
        .expect("connect");

        let req = transport.new_request("initialize", None);
        let resp = transport.send_sync(req).await.expect("response");
        assert!(resp.success);
        assert_eq!(resp.command, "initialize");

        // Give the event dispatch task a chance to run.
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(events_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn seq_is_strictly_monotonic() {
        let addr = spawn_fake_server(false).await;
        let transport = DapTransport::connect(addr, Duration::from_secs(2), Arc::new(|_| {}), None)
            .await
            .expect("connect");

        let mut seqs = Vec::new();
        for _ in 0..5 {
            let req = transport.new_request("next", None);
            seqs.push(req.seq);
            transport.send_sync(req).await.expect("response");
        }
        for pair in seqs.windows(2) {
            assert!(pair[1] > pair[0]);
        }
    }

    #[tokio::test]
    async fn timeout_fails_fast_without_a_response() {
        // Connect to a listener that never writes anything back.
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            // Hold the connection open but never respond.
            let mut buf = [0u8; 1];
            let _ = stream.into_split().0.try_read(&mut buf);
            std::future::pending::<()>().await;
        });

        let transport = DapTransport::connect(addr, Duration::from_secs(2), Arc::new(|_| {}), None)
            .await
            .expect("connect");
        let req = transport.new_request("stackTrace", None);
        let err = transport
            .send_with_timeout(req, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, dso_error::DapError::Timeout));
    }
}
