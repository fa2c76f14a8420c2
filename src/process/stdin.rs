//! Incremental stdin forwarding.
//!
//! A [`StdinSource`] wraps one input stream (normally the parent's stdin)
//! that many children may want to read. Only the holder of its lease
//! forwards; others wait for it ([`StdinSource::lease`]) or are turned away
//! ([`StdinSource::try_lease`]). The lease is released when forwarding ends:
//! source exhausted, child stdin closed, or child settled.

use std::fmt;
use std::io;
use std::sync::{Arc, OnceLock};

use log::debug;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::ExecError;

type Reader = Box<dyn AsyncRead + Send + Unpin>;

const READ_CHUNK: usize = 8192;

/// A shared input stream with a single-holder lease.
pub struct StdinSource {
    name: String,
    reader: Arc<Mutex<Reader>>,
}

impl StdinSource {
    pub fn new(name: impl Into<String>, reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            name: name.into(),
            reader: Arc::new(Mutex::new(Box::new(reader))),
        }
    }

    /// The parent process's stdin, created on first use.
    pub fn parent() -> Arc<StdinSource> {
        static PARENT: OnceLock<Arc<StdinSource>> = OnceLock::new();
        PARENT
            .get_or_init(|| Arc::new(StdinSource::new("stdin", tokio::io::stdin())))
            .clone()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait until no one else is forwarding, then take the lease.
    pub async fn lease(&self) -> StdinLease {
        StdinLease {
            reader: self.reader.clone().lock_owned().await,
        }
    }

    /// Take the lease only if it is free.
    pub fn try_lease(&self) -> Result<StdinLease, ExecError> {
        self.reader
            .clone()
            .try_lock_owned()
            .map(|reader| StdinLease { reader })
            .map_err(|_| ExecError::StdinBusy)
    }
}

impl fmt::Debug for StdinSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdinSource").field("name", &self.name).finish()
    }
}

/// Exclusive right to read from a [`StdinSource`]. Dropping releases it.
pub struct StdinLease {
    reader: OwnedMutexGuard<Reader>,
}

impl StdinLease {
    /// Copy chunks into `sink` until the source ends, the sink breaks, or
    /// `stop` completes. Returns the number of bytes forwarded.
    ///
    /// The sink is flushed after every chunk so interleaved producers see
    /// their input arrive as it is typed.
    pub async fn forward<W, F>(mut self, sink: &mut W, stop: F) -> io::Result<u64>
    where
        W: AsyncWrite + Unpin,
        F: Future<Output = ()>,
    {
        let mut buf = vec![0u8; READ_CHUNK];
        let mut total = 0u64;
        tokio::pin!(stop);
        loop {
            let n = tokio::select! {
                read = self.reader.read(&mut buf) => read?,
                () = &mut stop => break,
            };
            if n == 0 {
                break;
            }
            match sink.write_all(&buf[..n]).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                    debug!("stdin sink closed after {total} bytes");
                    break;
                }
                Err(e) => return Err(e),
            }
            sink.flush().await?;
            total += n as u64;
        }
        Ok(total)
    }
}
