//! Serial transport adapters.

use crate::ring::RxHandle;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::thread::{self, JoinHandle};
use tracing::{debug, trace, warn};

/// Outbound half of the serial link.
///
/// Received bytes reach the session through an [`RxHandle`], filled
/// independently of this trait.
pub trait SerialTransport {
    /// Sends `bytes`, returning once they have been fully handed off.
    fn transmit(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Hook run at the start of every receive poll.
    fn poll(&mut self) {}
}

impl<T: SerialTransport + ?Sized> SerialTransport for Box<T> {
    fn transmit(&mut self, bytes: &[u8]) -> io::Result<()> {
        (**self).transmit(bytes)
    }

    fn poll(&mut self) {
        (**self).poll()
    }
}

/// Transport over any [`Write`], e.g. an opened serial device node.
#[derive(Debug)]
pub struct WriteTransport<W> {
    inner: W,
}

impl<W: Write> WriteTransport<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> SerialTransport for WriteTransport<W> {
    fn transmit(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.inner.write_all(bytes)?;
        self.inner.flush()
    }
}

/// Copies everything read from `reader` into the receive buffer on a
/// background thread until end of stream or an unrecoverable error.
pub fn spawn_reader<R>(mut reader: R, rx: RxHandle) -> io::Result<JoinHandle<io::Result<()>>>
where
    R: Read + Send + 'static,
{
    thread::Builder::new()
        .name("nbiot-rx".to_string())
        .spawn(move || {
            let mut buf = [0u8; 64];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => {
                        debug!("serial reader reached end of stream");
                        return Ok(());
                    }
                    Ok(n) => {
                        trace!(bytes = n, "serial rx");
                        rx.fill(&buf[..n]);
                    }
                    Err(e)
                        if matches!(
                            e.kind(),
                            io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                        ) => {}
                    Err(e) => {
                        warn!(error = %e, "serial reader stopped");
                        return Err(e);
                    }
                }
            }
        })
}

/// In-memory module stand-in that answers each transmitted command with a
/// queued reply.
///
/// Commands beyond the queued replies get no answer, which lets tests
/// exercise timeouts.
#[derive(Debug)]
pub struct ScriptedTransport {
    rx: RxHandle,
    replies: VecDeque<Vec<u8>>,
    sent: Vec<Vec<u8>>,
    fail_next: bool,
}

impl ScriptedTransport {
    pub fn new(rx: RxHandle) -> Self {
        Self {
            rx,
            replies: VecDeque::new(),
            sent: Vec::new(),
            fail_next: false,
        }
    }

    /// Queues the bytes the module emits after the next unanswered command.
    pub fn reply(&mut self, bytes: impl AsRef<[u8]>) -> &mut Self {
        self.replies.push_back(bytes.as_ref().to_vec());
        self
    }

    pub fn with_reply(mut self, bytes: impl AsRef<[u8]>) -> Self {
        self.reply(bytes);
        self
    }

    /// Makes the next transmit fail.
    pub fn fail_next(&mut self) {
        self.fail_next = true;
    }

    /// Injects bytes as if the module had emitted them unprompted.
    pub fn inject(&self, bytes: impl AsRef<[u8]>) {
        self.rx.fill(bytes.as_ref());
    }

    /// Everything transmitted so far.
    pub fn sent(&self) -> &[Vec<u8>] {
        &self.sent
    }

    pub fn clear_sent(&mut self) {
        self.sent.clear();
    }

    pub fn sent_lines(&self) -> Vec<String> {
        self.sent
            .iter()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .collect()
    }
}

impl SerialTransport for ScriptedTransport {
    fn transmit(&mut self, bytes: &[u8]) -> io::Result<()> {
        if std::mem::take(&mut self.fail_next) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "scripted transmit failure"));
        }
        self.sent.push(bytes.to_vec());
        if let Some(reply) = self.replies.pop_front() {
            self.rx.fill(&reply);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::LineExtractor;

    #[test]
    fn test_write_transport() {
        let mut transport = WriteTransport::new(Vec::new());
        transport.transmit(b"AT\r\n").unwrap();
        transport.transmit(b"ATI\r\n").unwrap();
        assert_eq!(transport.into_inner(), b"AT\r\nATI\r\n");
    }

    #[test]
    fn test_scripted_replies_in_order() {
        let rx = RxHandle::new(64);
        let mut transport = ScriptedTransport::new(rx.clone())
            .with_reply("OK\r\n")
            .with_reply("ERROR\r\n");

        transport.transmit(b"AT\r\n").unwrap();
        transport.transmit(b"ATI\r\n").unwrap();
        transport.transmit(b"AT+CSQ\r\n").unwrap();
        assert_eq!(transport.sent_lines(), vec!["AT\r\n", "ATI\r\n", "AT+CSQ\r\n"]);

        let mut ex = LineExtractor::new(64);
        let mut buf = rx.lock();
        assert_eq!(ex.next_line(&mut buf).unwrap(), Some(&b"OK"[..]));
        assert_eq!(ex.next_line(&mut buf).unwrap(), Some(&b"ERROR"[..]));
        assert_eq!(ex.next_line(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_scripted_failure() {
        let mut transport = ScriptedTransport::new(RxHandle::new(8));
        transport.fail_next();
        assert!(transport.transmit(b"AT\r\n").is_err());
        assert!(transport.transmit(b"AT\r\n").is_ok());
        assert_eq!(transport.sent().len(), 1);

        transport.clear_sent();
        assert!(transport.sent().is_empty());
    }

    #[test]
    fn test_reader_thread_fills_buffer() {
        let rx = RxHandle::new(64);
        let reader = io::Cursor::new(b"+CPIN: READY\r\n".to_vec());
        spawn_reader(reader, rx.clone()).unwrap().join().unwrap().unwrap();

        let mut ex = LineExtractor::new(64);
        let mut buf = rx.lock();
        assert_eq!(ex.next_line(&mut buf).unwrap(), Some(&b"+CPIN: READY"[..]));
    }
}
