//! Client-side DAP transport: a single TCP connection, a reader task that
//! demultiplexes responses (by `request_seq`), events (fanned out to a
//! callback on a fresh task so a slow consumer never stalls the reader),
//! and an outbound half that allocates a strictly increasing `seq`.
//!
//! Grounded on `dap_cli.go`'s `dapClient`: `seq`/`seqMutex`, `pending
//! sync.Map`, `pendingAsync sync.Map`, `recordReader` dispatch loop. The
//! Rust rendition replaces `sync.Map` + manual wakeups with per-request
//! `oneshot` completion slots in a `DashMap`, per the "coroutine control
//! flow" design note.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dso_error::DapError;
use serde_json::Value;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex as AsyncMutex};

use crate::protocol::{read_message, write_request, Event, InboundMessage, Request, Response};

enum PendingSlot {
    Sync(oneshot::Sender<Result<Response, DapError>>),
    Async(Box<dyn FnOnce(Result<Response, DapError>) + Send>),
}

/// A connected DAP client transport.
pub struct DapTransport {
    seq: AtomicI64,
    write_half: AsyncMutex<tokio::net::tcp::OwnedWriteHalf>,
    pending: Arc<DashMap<i64, PendingSlot>>,
    reader_task: tokio::task::JoinHandle<()>,
}

impl DapTransport {
    /// Connects with a bounded dial timeout; `on_event` runs for every DAP
    /// event, `on_request` (optional) for reverse requests from the server.
    pub async fn connect(
        addr: impl tokio::net::ToSocketAddrs,
        dial_timeout: Duration,
        on_event: Arc<dyn Fn(Event) + Send + Sync>,
        on_request: Option<Arc<dyn Fn(Request) + Send + Sync>>,
    ) -> Result<Self, DapError> {
        let stream = tokio::time::timeout(dial_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| DapError::DialTimeout)?
            .map_err(DapError::Io)?;
        let (read_half, write_half) = stream.into_split();
        let pending: Arc<DashMap<i64, PendingSlot>> = Arc::new(DashMap::new());
        let pending_for_reader = pending.clone();

        let reader_task = tokio::spawn(async move {
            let mut reader = BufReader::new(read_half);
            loop {
                match read_message(&mut reader).await {
                    Ok(InboundMessage::Response(resp)) => {
                        if let Some((_, slot)) = pending_for_reader.remove(&resp.request_seq) {
                            match slot {
                                PendingSlot::Sync(tx) => {
                                    let _ = tx.send(Ok(resp));
                                }
                                PendingSlot::Async(cb) => cb(Ok(resp)),
                            }
                        }
                    }
                    Ok(InboundMessage::Event(event)) => {
                        let cb = on_event.clone();
                        tokio::spawn(async move {
                            cb(event);
                        });
                    }
                    Ok(InboundMessage::Request(req)) => {
                        if let Some(cb) = &on_request {
                            let cb = cb.clone();
                            tokio::spawn(async move {
                                cb(req);
                            });
                        }
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "dap transport reader closing");
                        pending_for_reader.retain(|_, slot| {
                            // Drain and fail everything still pending.
                            let taken = std::mem::replace(
                                slot,
                                PendingSlot::Sync(oneshot::channel().0),
                            );
                            match taken {
                                PendingSlot::Sync(tx) => {
                                    let _ = tx.send(Err(DapError::Closed));
                                }
                                PendingSlot::Async(cb) => cb(Err(DapError::Closed)),
                            }
                            false
                        });
                        return;
                    }
                }
            }
        });

        Ok(Self {
            seq: AtomicI64::new(1),
            write_half: AsyncMutex::new(write_half),
            pending,
            reader_task,
        })
    }

    /// Allocates the next sequence number and builds a request shell.
    pub fn new_request(&self, command: impl Into<String>, arguments: Option<Value>) -> Request {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        Request::new(seq, command, arguments)
    }

    /// Sends and blocks until the matching response arrives, with no
    /// timeout of its own — only for calls with an external time bound
    /// (e.g. a caller-supplied deadline around the whole operation).
    pub async fn send_sync(&self, request: Request) -> Result<Response, DapError> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(request.seq, PendingSlot::Sync(tx));
        self.write(&request).await?;
        rx.await.map_err(|_| DapError::Closed)?
    }

    /// Sends and races the wait against `timeout`; on expiry the pending
    /// slot is removed so a late response is silently dropped.
    pub async fn send_with_timeout(
        &self,
        request: Request,
        timeout: Duration,
    ) -> Result<Response, DapError> {
        let (tx, rx) = oneshot::channel();
        let seq = request.seq;
        self.pending.insert(seq, PendingSlot::Sync(tx));
        self.write(&request).await?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(DapError::Closed),
            Err(_) => {
                self.pending.remove(&seq);
                Err(DapError::Timeout)
            }
        }
    }

    /// Fire-and-forget: `callback` runs (on the reader's dispatch task)
    /// whenever the matching response arrives.
    pub async fn send_async<F>(&self, request: Request, callback: F) -> Result<(), DapError>
    where
        F: FnOnce(Result<Response, DapError>) + Send + 'static,
    {
        self.pending
            .insert(request.seq, PendingSlot::Async(Box::new(callback)));
        self.write(&request).await
    }

    async fn write(&self, request: &Request) -> Result<(), DapError> {
        let mut guard = self.write_half.lock().await;
        write_request(&mut *guard, request).await
    }

    pub async fn close(&self) {
        self.reader_task.abort();
        let mut guard = self.write_half.lock().await;
        let _ = guard.shutdown().await;
    }
}

impl Drop for DapTransport {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}
