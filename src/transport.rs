//! Byte transports under a session
//!
//! A session talks to its peer through the [`Transport`] trait, so the
//! protocol engine works the same over TCP, an SSH channel supplied by the
//! caller, or an in-memory script in tests.

use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::error::{NetconfError, Result};
use crate::framing::{Direction, FrameReader, IoSubscriber, notify, write_frame, END_OF_MESSAGE};

/// Framed message channel to a NETCONF peer
pub trait Transport {
    /// Append text to the outgoing message
    fn print(&mut self, text: &str) -> Result<()>;

    /// Append text and a newline to the outgoing message
    fn println(&mut self, text: &str) -> Result<()> {
        self.print(text)?;
        self.print("\n")
    }

    /// Send the outgoing message with its end-of-message marker
    fn flush(&mut self) -> Result<()>;

    /// Block until one complete message has arrived
    fn read_one(&mut self) -> Result<String>;

    /// Can a read make progress without blocking
    fn ready(&mut self) -> Result<bool>;

    /// Close the channel; later calls fail
    fn close(&mut self) -> Result<()>;

    /// Observe traffic on this transport
    fn add_subscriber(&mut self, subscriber: Box<dyn IoSubscriber>);

    /// Bound how long `read_one` may block. Transports without a clock
    /// ignore it.
    fn set_read_timeout(&mut self, _timeout: Option<Duration>) -> Result<()> {
        Ok(())
    }
}

/// Transport over any reader and writer pair
pub struct StreamTransport<R, W> {
    reader: FrameReader<R>,
    writer: W,
    out: String,
    subscribers: Vec<Box<dyn IoSubscriber>>,
    closed: bool,
}

impl<R: Read, W: Write> StreamTransport<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: FrameReader::new(reader),
            writer,
            out: String::new(),
            subscribers: Vec::new(),
            closed: false,
        }
    }

    pub fn reader(&self) -> &R {
        self.reader.get_ref()
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Drop bytes already received but not yet read; returns the count
    pub fn discard_buffered(&mut self) -> usize {
        self.reader.discard_buffered()
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            Err(NetconfError::Session("transport is closed".into()))
        } else {
            Ok(())
        }
    }
}

impl<R: Read, W: Write> Transport for StreamTransport<R, W> {
    fn print(&mut self, text: &str) -> Result<()> {
        self.check_open()?;
        self.out.push_str(text);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.check_open()?;
        let message = std::mem::take(&mut self.out);
        write_frame(&mut self.writer, &message)?;
        let framed = format!("{}{}\n", message, END_OF_MESSAGE);
        notify(&mut self.subscribers, Direction::Output, &framed);
        Ok(())
    }

    fn read_one(&mut self) -> Result<String> {
        self.check_open()?;
        let message = self.reader.read_frame()?;
        notify(&mut self.subscribers, Direction::Input, &message);
        Ok(message)
    }

    fn ready(&mut self) -> Result<bool> {
        self.check_open()?;
        Ok(self.reader.has_buffered())
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.writer.flush()?;
        }
        Ok(())
    }

    fn add_subscriber(&mut self, subscriber: Box<dyn IoSubscriber>) {
        self.subscribers.push(subscriber);
    }
}

/// Plain TCP transport, for servers that speak NETCONF without SSH
pub struct TcpTransport {
    inner: StreamTransport<TcpStream, TcpStream>,
}

impl TcpTransport {
    /// Connect with an optional read timeout
    pub fn connect(addr: impl ToSocketAddrs, read_timeout: Option<Duration>) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_read_timeout(read_timeout)?;
        stream.set_nodelay(true)?;
        tracing::debug!(peer = ?stream.peer_addr().ok(), "connected");
        let writer = stream.try_clone()?;
        Ok(Self {
            inner: StreamTransport::new(stream, writer),
        })
    }
}

impl Transport for TcpTransport {
    fn print(&mut self, text: &str) -> Result<()> {
        self.inner.print(text)
    }

    fn flush(&mut self) -> Result<()> {
        self.inner.flush()
    }

    fn read_one(&mut self) -> Result<String> {
        self.inner.read_one()
    }

    fn ready(&mut self) -> Result<bool> {
        if self.inner.ready()? {
            return Ok(true);
        }
        // peek without blocking on the socket itself
        let stream = self.inner.reader();
        stream.set_nonblocking(true)?;
        let mut probe = [0u8; 1];
        let peeked = stream.peek(&mut probe);
        stream.set_nonblocking(false)?;
        match peeked {
            Ok(n) => Ok(n > 0),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()?;
        match self.inner.reader().shutdown(Shutdown::Both) {
            Err(e) if e.kind() != std::io::ErrorKind::NotConnected => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn add_subscriber(&mut self, subscriber: Box<dyn IoSubscriber>) {
        self.inner.add_subscriber(subscriber);
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.inner.reader().set_read_timeout(timeout)?;
        Ok(())
    }
}
