//! Idle-timeout enforcement for duplex streams.
//!
//! Every completed read or write on the wrapped stream pushes a shared
//! deadline to `now + timeout`. A read, write, flush or shutdown that is still
//! pending once the deadline passes fails with `ErrorKind::TimedOut`.
//!
//! The deadline is shared by both directions: traffic written to a stream
//! keeps its read side alive, which matters when the stream is split and one
//! direction is quiet while the other carries data.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::{Instant, Sleep};

/// A stream wrapper that fails pending I/O after a period of inactivity.
#[derive(Debug)]
pub struct IdleTimeout<S> {
    inner: S,
    timeout: Duration,
    last_activity: Instant,
    read_timer: Pin<Box<Sleep>>,
    write_timer: Pin<Box<Sleep>>,
}

impl<S> IdleTimeout<S> {
    /// Wrap `inner`, starting the idle clock now.
    pub fn new(inner: S, timeout: Duration) -> Self {
        let now = Instant::now();
        let deadline = now + timeout;
        Self {
            inner,
            timeout,
            last_activity: now,
            read_timer: Box::pin(tokio::time::sleep_until(deadline)),
            write_timer: Box::pin(tokio::time::sleep_until(deadline)),
        }
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}

/// Poll `timer` against the current deadline, re-arming it if activity moved
/// the deadline since it was last set.
fn poll_expired(
    timer: &mut Pin<Box<Sleep>>,
    deadline: Instant,
    cx: &mut Context<'_>,
) -> Poll<io::Error> {
    if timer.deadline() != deadline {
        timer.as_mut().reset(deadline);
    }
    match timer.as_mut().poll(cx) {
        Poll::Ready(()) => Poll::Ready(io::Error::new(io::ErrorKind::TimedOut, "idle timeout")),
        Poll::Pending => Poll::Pending,
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for IdleTimeout<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(res) => {
                this.touch();
                Poll::Ready(res)
            }
            Poll::Pending => {
                let deadline = this.last_activity + this.timeout;
                poll_expired(&mut this.read_timer, deadline, cx).map(Err)
            }
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for IdleTimeout<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = &mut *self;
        match Pin::new(&mut this.inner).poll_write(cx, data) {
            Poll::Ready(res) => {
                this.touch();
                Poll::Ready(res)
            }
            Poll::Pending => {
                let deadline = this.last_activity + this.timeout;
                poll_expired(&mut this.write_timer, deadline, cx).map(Err)
            }
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = &mut *self;
        match Pin::new(&mut this.inner).poll_flush(cx) {
            Poll::Ready(res) => Poll::Ready(res),
            Poll::Pending => {
                let deadline = this.last_activity + this.timeout;
                poll_expired(&mut this.write_timer, deadline, cx).map(Err)
            }
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = &mut *self;
        match Pin::new(&mut this.inner).poll_shutdown(cx) {
            Poll::Ready(res) => Poll::Ready(res),
            Poll::Pending => {
                let deadline = this.last_activity + this.timeout;
                poll_expired(&mut this.write_timer, deadline, cx).map(Err)
            }
        }
    }
}
