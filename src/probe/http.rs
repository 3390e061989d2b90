use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper::body::Incoming;
use hyper::header::{HOST, USER_AGENT};
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use log::debug;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use super::dial::ProbeStream;
use super::target::Target;
use super::timer::{Checkpoint, PhaseTimer};
use crate::error::ProbeError;

const PROBE_USER_AGENT: &str = concat!("oxyprobe/", env!("CARGO_PKG_VERSION"));

/// What the HTTP exchange observed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HttpOutcome {
    pub status: u16,
    /// Response body bytes.
    pub received: u64,
}

/// Write timestamps seen by [`TimedIo`], shared with the probe while hyper
/// owns the stream. Nanoseconds since `base`, offset by one so zero is unset.
struct WriteMarks {
    base: Instant,
    armed: AtomicBool,
    last_write: AtomicU64,
}

impl WriteMarks {
    fn new() -> Arc<Self> {
        Arc::new(WriteMarks {
            base: Instant::now(),
            armed: AtomicBool::new(false),
            last_write: AtomicU64::new(0),
        })
    }

    fn record_write(&self) {
        if self.armed.load(Ordering::Acquire) {
            let nanos = self.base.elapsed().as_nanos() as u64 + 1;
            self.last_write.store(nanos, Ordering::Release);
        }
    }

    fn last_write(&self) -> Option<Instant> {
        match self.last_write.load(Ordering::Acquire) {
            0 => None,
            nanos => Some(self.base + Duration::from_nanos(nanos - 1)),
        }
    }
}

/// Passes I/O through and notes when the request bytes leave.
struct TimedIo {
    inner: Box<dyn ProbeStream>,
    marks: Arc<WriteMarks>,
}

impl AsyncRead for TimedIo {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for TimedIo {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let polled = Pin::new(&mut self.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = &polled {
            if *n > 0 {
                self.marks.record_write();
            }
        }
        polled
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        let polled = Pin::new(&mut self.inner).poll_write_vectored(cx, bufs);
        if let Poll::Ready(Ok(n)) = &polled {
            if *n > 0 {
                self.marks.record_write();
            }
        }
        polled
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

enum Sender {
    Http1(hyper::client::conn::http1::SendRequest<Empty<Bytes>>),
    Http2(hyper::client::conn::http2::SendRequest<Empty<Bytes>>),
}

impl Sender {
    async fn handshake(io: TokioIo<TimedIo>, http2: bool) -> Result<Self, hyper::Error> {
        if http2 {
            let (sender, conn) =
                hyper::client::conn::http2::handshake(TokioExecutor::new(), io).await?;
            tokio::spawn(async move {
                if let Err(e) = conn.await {
                    debug!("HTTP/2 connection closed: {e}");
                }
            });
            Ok(Sender::Http2(sender))
        } else {
            let (sender, conn) = hyper::client::conn::http1::handshake(io).await?;
            tokio::spawn(async move {
                if let Err(e) = conn.await {
                    debug!("HTTP/1 connection closed: {e}");
                }
            });
            Ok(Sender::Http1(sender))
        }
    }

    async fn send(&mut self, req: Request<Empty<Bytes>>) -> Result<Response<Incoming>, hyper::Error> {
        match self {
            Sender::Http1(sender) => sender.send_request(req).await,
            Sender::Http2(sender) => sender.send_request(req).await,
        }
    }
}

fn build_request(target: &Target, http2: bool) -> Result<Request<Empty<Bytes>>, ProbeError> {
    let builder = if http2 {
        Request::get(target.uri())
    } else {
        Request::get(target.path.as_str()).header(HOST, target.authority())
    };
    builder
        .header(USER_AGENT, PROBE_USER_AGENT)
        .body(Empty::new())
        .map_err(|e| ProbeError::Http(e.to_string()))
}

/// Sends one `GET` for the target's path and reads the whole response.
///
/// Marks request-sent (last request write), first-response-byte (headers
/// received) and response-done (body drained) on `timer`.
pub async fn exchange(
    stream: Box<dyn ProbeStream>,
    target: &Target,
    http2: bool,
    timer: &mut PhaseTimer,
) -> Result<HttpOutcome, ProbeError> {
    let marks = WriteMarks::new();
    let io = TokioIo::new(TimedIo {
        inner: stream,
        marks: marks.clone(),
    });

    let mut sender = Sender::handshake(io, http2)
        .await
        .map_err(|e| ProbeError::Http(e.to_string()))?;
    let request = build_request(target, http2)?;

    marks.armed.store(true, Ordering::Release);
    let response = sender.send(request).await;
    marks.armed.store(false, Ordering::Release);
    if let Some(sent) = marks.last_write() {
        timer.mark_at(Checkpoint::RequestSent, sent);
    }

    let response = response.map_err(|e| ProbeError::Http(e.to_string()))?;
    timer.mark(Checkpoint::FirstResponseByte);
    let status = response.status().as_u16();

    let mut body = response.into_body();
    let mut received = 0u64;
    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(|e| ProbeError::Http(e.to_string()))?;
        if let Some(data) = frame.data_ref() {
            received += data.len() as u64;
        }
    }
    timer.mark(Checkpoint::ResponseDone);

    Ok(HttpOutcome { status, received })
}
