use std::time::{Duration, Instant};

use crate::error::{HwError, Result};

/// Longest line kept before the buffer gives up and drops it.
pub const MAX_LINE_LEN: usize = 256;

/// Accumulates raw serial bytes and splits them into `\n`-terminated lines.
///
/// Carriage returns are stripped and overlong lines are discarded so a
/// noisy link cannot grow the buffer without bound.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
    discarding: bool,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        for &b in bytes {
            if self.discarding {
                if b == b'\n' {
                    self.discarding = false;
                }
                continue;
            }
            if b != b'\n' {
                let line_start = self
                    .pending
                    .iter()
                    .rposition(|&c| c == b'\n')
                    .map_or(0, |p| p + 1);
                if self.pending.len() - line_start >= MAX_LINE_LEN {
                    self.pending.truncate(line_start);
                    self.discarding = true;
                    tracing::warn!("serial line exceeded {MAX_LINE_LEN} bytes; dropped");
                    continue;
                }
            }
            self.pending.push(b);
        }
    }

    /// Next complete line, trimmed. Empty lines are skipped.
    pub fn next_line(&mut self) -> Option<String> {
        loop {
            let pos = self.pending.iter().position(|&b| b == b'\n')?;
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw).trim().to_string();
            if !line.is_empty() {
                return Some(line);
            }
        }
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.discarding = false;
    }
}

/// Poll `read_chunk` until `buf` yields a line or `timeout` expires.
///
/// `read_chunk` returns the number of bytes written into the scratch slice;
/// zero means nothing was available yet. Returns `Ok(None)` on timeout.
pub fn read_line_with_deadline(
    buf: &mut LineBuffer,
    mut read_chunk: impl FnMut(&mut [u8]) -> Result<usize>,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<Option<String>> {
    if let Some(line) = buf.next_line() {
        return Ok(Some(line));
    }
    let deadline = Instant::now() + timeout;
    let mut scratch = [0u8; 64];
    loop {
        let n = read_chunk(&mut scratch)?;
        if n > 0 {
            buf.push(&scratch[..n]);
            if let Some(line) = buf.next_line() {
                return Ok(Some(line));
            }
            continue;
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        std::thread::sleep(poll_interval);
    }
}

/// Feed `bytes` to `write_chunk` until all are accepted or `timeout` expires.
///
/// `write_chunk` returns how many bytes it took; zero means the output
/// queue is full. Fails with `HwError::Timeout` if the deadline passes
/// with bytes still unwritten.
pub fn write_all_with_deadline(
    bytes: &[u8],
    mut write_chunk: impl FnMut(&[u8]) -> Result<usize>,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<()> {
    let deadline = Instant::now() + timeout;
    let mut written = 0;
    while written < bytes.len() {
        let n = write_chunk(&bytes[written..])?;
        written += n;
        if n > 0 {
            continue;
        }
        if Instant::now() >= deadline {
            tracing::warn!(written, total = bytes.len(), "serial write stalled");
            return Err(HwError::Timeout);
        }
        std::thread::sleep(poll_interval);
    }
    Ok(())
}
