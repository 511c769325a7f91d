//! A channel-backed in-memory pipe: a bounded queue of byte chunks with a
//! [`std::io::Read`] consumer end and a [`std::io::Write`] producer end.
//!
//! This is the systems-language stand-in for the source's goroutine + `io.Pipe`
//! pattern (see `spec.md` §9 Design Notes): a background thread produces
//! chunks, a foreground thread (or the caller) consumes them through a
//! standard `Read` impl. Closing the reader before EOF causes the next
//! producer write to fail with `BrokenPipe`, so a cancelled consumer
//! promptly stops the producer.

use std::io::{self, Read, Write};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};

/// Number of in-flight chunks the channel buffers before a writer blocks.
const CHANNEL_DEPTH: usize = 4;

/// The write half of a [`pipe`]. Dropping this signals EOF to the reader.
pub struct PipeWriter {
    tx: SyncSender<io::Result<Vec<u8>>>,
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx
            .send(Ok(buf.to_vec()))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader dropped"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl PipeWriter {
    /// Propagate an error to the reader instead of closing cleanly.
    pub fn abort(self, err: io::Error) {
        let _ = self.tx.send(Err(err));
    }
}

/// The read half of a [`pipe`].
pub struct PipeReader {
    rx: Receiver<io::Result<Vec<u8>>>,
    current: Vec<u8>,
    pos: usize,
    done: bool,
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.pos < self.current.len() {
                let n = (self.current.len() - self.pos).min(buf.len());
                buf[..n].copy_from_slice(&self.current[self.pos..self.pos + n]);
                self.pos += n;
                return Ok(n);
            }
            if self.done {
                return Ok(0);
            }
            match self.rx.recv() {
                Ok(Ok(chunk)) => {
                    self.current = chunk;
                    self.pos = 0;
                    if self.current.is_empty() {
                        continue;
                    }
                }
                Ok(Err(e)) => {
                    self.done = true;
                    return Err(e);
                }
                Err(_) => {
                    self.done = true;
                    return Ok(0);
                }
            }
        }
    }
}

/// Create a bounded in-memory pipe pair.
pub fn pipe() -> (PipeWriter, PipeReader) {
    let (tx, rx) = sync_channel(CHANNEL_DEPTH);
    (
        PipeWriter { tx },
        PipeReader {
            rx,
            current: Vec::new(),
            pos: 0,
            done: false,
        },
    )
}

/// Spawn `produce` on a background thread, feeding its writes into the
/// returned reader. If `produce` returns an error, the reader's next read
/// surfaces it.
pub fn spawn_producer<F>(produce: F) -> PipeReader
where
    F: FnOnce(&mut PipeWriter) -> io::Result<()> + Send + 'static,
{
    let (mut writer, reader) = pipe();
    std::thread::spawn(move || {
        if let Err(e) = produce(&mut writer) {
            writer.abort(e);
        }
    });
    reader
}
