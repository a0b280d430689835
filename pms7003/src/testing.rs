//! Link and delay doubles for exercising [`Pms7003`](crate::Pms7003) without a sensor.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use embedded_hal_async::delay::DelayNs;
use embedded_io_async::{ErrorKind, ErrorType, Read, Write};

enum Reply {
    Bytes(Vec<u8>),
    Fail,
}

/// Serial link answering each written command with the next scripted reply.
///
/// Once a reply is consumed, reads return `Ok(0)` like a quiet serial line.
#[derive(Default)]
pub struct ScriptedLink {
    replies: VecDeque<Reply>,
    pending: VecDeque<u8>,
    failing: bool,
    chunk: Option<usize>,
    written: Vec<Vec<u8>>,
}

impl ScriptedLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, bytes: &[u8]) -> Self {
        self.replies.push_back(Reply::Bytes(bytes.to_vec()));
        self
    }

    /// Reads after the next command fail.
    pub fn fail(mut self) -> Self {
        self.replies.push_back(Reply::Fail);
        self
    }

    /// Hands out at most `size` bytes per read.
    pub fn chunked(mut self, size: usize) -> Self {
        self.chunk = Some(size);
        self
    }

    pub fn written(&self) -> Vec<Vec<u8>> {
        self.written.clone()
    }

    pub fn unread(&self) -> usize {
        self.pending.len()
    }
}

impl ErrorType for ScriptedLink {
    type Error = ErrorKind;
}

impl Read for ScriptedLink {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if self.failing {
            return Err(ErrorKind::Other);
        }

        let limit = self.chunk.unwrap_or(usize::MAX).min(buf.len());
        let mut count = 0;
        while count < limit {
            match self.pending.pop_front() {
                Some(byte) => {
                    buf[count] = byte;
                    count += 1;
                }
                None => break,
            }
        }
        Ok(count)
    }
}

impl Write for ScriptedLink {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.written.push(buf.to_vec());
        match self.replies.pop_front() {
            Some(Reply::Bytes(bytes)) => {
                self.failing = false;
                self.pending.extend(bytes);
            }
            Some(Reply::Fail) => self.failing = true,
            None => self.failing = false,
        }
        Ok(buf.len())
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Delay that returns immediately and remembers every millisecond wait.
#[derive(Clone, Default)]
pub struct RecordingDelay {
    recorded: Rc<RefCell<Vec<u32>>>,
}

impl RecordingDelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorded(&self) -> Vec<u32> {
        self.recorded.borrow().clone()
    }
}

impl DelayNs for RecordingDelay {
    async fn delay_ns(&mut self, _ns: u32) {}

    async fn delay_ms(&mut self, ms: u32) {
        self.recorded.borrow_mut().push(ms);
    }
}
