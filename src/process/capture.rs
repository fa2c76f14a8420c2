//! Output capture for one child stream.
//!
//! A [`Tap`] records every chunk read from the child and fans it out to any
//! pipe sinks subscribed to it. A sink that subscribes late first receives
//! everything recorded so far, so attaching a pipe after the source has
//! produced output (or even settled) loses nothing. Once every sink of a
//! piped stream has gone away the reader is dropped, so the child sees a
//! broken pipe just as it would under a shell.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;

/// Chunks buffered per sink before the source is throttled.
const SINK_CAPACITY: usize = 16;
const READ_CHUNK: usize = 8192;

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Per-process switches that chaining calls may flip while it runs.
#[derive(Debug, Default)]
pub(crate) struct Control {
    quiet: AtomicBool,
    nothrow: AtomicBool,
    piped: AtomicBool,
    timed_out: Mutex<Option<Duration>>,
}

impl Control {
    pub(crate) fn new(quiet: bool, nothrow: bool) -> Self {
        Self {
            quiet: AtomicBool::new(quiet),
            nothrow: AtomicBool::new(nothrow),
            ..Self::default()
        }
    }

    pub(crate) fn set_quiet(&self) {
        self.quiet.store(true, Ordering::SeqCst);
    }

    pub(crate) fn set_nothrow(&self) {
        self.nothrow.store(true, Ordering::SeqCst);
    }

    pub(crate) fn nothrow(&self) -> bool {
        self.nothrow.load(Ordering::SeqCst)
    }

    /// Stdout feeds another stage and is no longer echoed.
    pub(crate) fn set_piped(&self) {
        self.piped.store(true, Ordering::SeqCst);
    }

    pub(crate) fn mark_timed_out(&self, after: Duration) {
        lock(&self.timed_out).get_or_insert(after);
    }

    pub(crate) fn timed_out(&self) -> Option<Duration> {
        *lock(&self.timed_out)
    }

    fn echoes(&self, stream: Stream) -> bool {
        if self.quiet.load(Ordering::SeqCst) {
            return false;
        }
        match stream {
            Stream::Stdout => !self.piped.load(Ordering::SeqCst),
            Stream::Stderr => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stream {
    Stdout,
    Stderr,
}

#[derive(Debug, Default)]
struct TapState {
    buf: Vec<u8>,
    sinks: Vec<mpsc::Sender<Vec<u8>>>,
    piped: bool,
    closed: bool,
}

/// Captured contents of one stream plus its pipe subscribers.
#[derive(Debug, Default)]
pub(crate) struct Tap {
    state: Mutex<TapState>,
}

impl Tap {
    /// Append a chunk and return the sinks it must be forwarded to.
    fn record(&self, chunk: &[u8]) -> Vec<mpsc::Sender<Vec<u8>>> {
        let mut state = lock(&self.state);
        state.buf.extend_from_slice(chunk);
        state.sinks.retain(|s| !s.is_closed());
        state.sinks.clone()
    }

    /// Piped, and every sink has stopped reading.
    fn abandoned(&self) -> bool {
        let mut state = lock(&self.state);
        state.sinks.retain(|s| !s.is_closed());
        state.piped && state.sinks.is_empty()
    }

    fn close(&self) {
        let mut state = lock(&self.state);
        state.closed = true;
        state.sinks.clear();
    }

    /// Receive everything recorded so far, then each later chunk; the
    /// channel ends when the stream does.
    pub(crate) fn subscribe(&self) -> mpsc::Receiver<Vec<u8>> {
        let (tx, rx) = mpsc::channel(SINK_CAPACITY);
        let mut state = lock(&self.state);
        if !state.buf.is_empty() {
            // Fresh channel with spare capacity: cannot fail.
            let _ = tx.try_send(state.buf.clone());
        }
        if !state.closed {
            state.piped = true;
            state.sinks.push(tx);
        }
        rx
    }

    pub(crate) fn contents(&self) -> Vec<u8> {
        lock(&self.state).buf.clone()
    }
}

/// Read a child stream to the end: record, fan out, echo.
///
/// Sends to sinks are awaited, so a slow pipe sink throttles the reader and
/// through it the child. Reading stops early once the stream is piped and
/// no sink is left.
pub(crate) async fn pump<R>(mut reader: R, tap: &Tap, stream: Stream, control: &Control)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!("reading child {stream:?} failed: {e}");
                break;
            }
        };
        let chunk = &buf[..n];
        for sink in tap.record(chunk) {
            // A sink that went away just stops receiving.
            let _ = sink.send(chunk.to_vec()).await;
        }
        if control.echoes(stream) {
            echo(stream, chunk).await;
        }
        if tap.abandoned() {
            debug!("every reader of child {stream:?} is gone; closing it");
            break;
        }
    }
    drop(reader);
    tap.close();
}

async fn echo(stream: Stream, chunk: &[u8]) {
    let written = match stream {
        Stream::Stdout => {
            let mut out = tokio::io::stdout();
            match out.write_all(chunk).await {
                Ok(()) => out.flush().await,
                Err(e) => Err(e),
            }
        }
        Stream::Stderr => {
            let mut err = tokio::io::stderr();
            match err.write_all(chunk).await {
                Ok(()) => err.flush().await,
                Err(e) => Err(e),
            }
        }
    };
    if let Err(e) = written {
        warn!("echoing child {stream:?} failed: {e}");
    }
}
