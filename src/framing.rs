//! End-of-message framing and traffic taps
//!
//! NETCONF 1.0 terminates every message with `]]>]]>`. [`FrameReader`]
//! splits an inbound byte stream on that marker, [`write_frame`] emits one
//! message with its marker.

use std::io::{BufRead, BufReader, ErrorKind, Read, Write};

use crate::error::{NetconfError, Result};
use crate::xml::XmlParser;

/// End-of-message marker
pub const END_OF_MESSAGE: &str = "]]>]]>";

/// Splits a byte stream into framed messages
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: BufReader<R>,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
        }
    }

    pub fn get_ref(&self) -> &R {
        self.inner.get_ref()
    }

    /// Are bytes already buffered, so the next read will not block
    pub fn has_buffered(&self) -> bool {
        !self.inner.buffer().is_empty()
    }

    /// Read one message without its marker.
    ///
    /// Bytes are scanned one at a time. A partial marker that turns out not
    /// to be one stays in the message, so `]]>]XYZ]]>]]>` reads as
    /// `]]>]XYZ`. End of stream before the marker is a session error and
    /// nothing read so far is returned.
    pub fn read_frame(&mut self) -> Result<String> {
        let marker = END_OF_MESSAGE.as_bytes();
        let mut buf = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match self.inner.read(&mut byte) {
                Ok(0) => {
                    return Err(NetconfError::Session(if buf.is_empty() {
                        "end of stream".to_string()
                    } else {
                        format!("end of stream after {} bytes of message", buf.len())
                    }));
                }
                Ok(_) => {
                    buf.push(byte[0]);
                    if buf.ends_with(marker) {
                        buf.truncate(buf.len() - marker.len());
                        tracing::trace!(bytes = buf.len(), "read frame");
                        return String::from_utf8(buf)
                            .map_err(|e| NetconfError::Parser(format!("invalid UTF-8 in message: {}", e)));
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Err(NetconfError::Timeout(format!(
                        "no complete message after reading {} bytes",
                        buf.len()
                    )));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Drop whatever is buffered; stale bytes after a timeout
    pub fn discard_buffered(&mut self) -> usize {
        let n = self.inner.buffer().len();
        self.inner.consume(n);
        n
    }
}

/// Write one message followed by the marker and a newline, then flush
pub fn write_frame<W: Write>(writer: &mut W, message: &str) -> Result<()> {
    writer.write_all(message.as_bytes())?;
    writer.write_all(END_OF_MESSAGE.as_bytes())?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    tracing::trace!(bytes = message.len(), "wrote frame");
    Ok(())
}

/// Observer of session traffic.
///
/// Raw subscribers see every newline-terminated line as it passes. Parsed
/// subscribers see each complete message once, pretty printed.
pub trait IoSubscriber: Send {
    /// Receive traffic line by line instead of per message
    fn raw(&self) -> bool;

    /// Inbound traffic
    fn input(&mut self, text: &str);

    /// Outbound traffic
    fn output(&mut self, text: &str);
}

/// Direction of a tapped message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    Input,
    Output,
}

/// Hand a complete message to every subscriber in its preferred form
pub(crate) fn notify(subscribers: &mut [Box<dyn IoSubscriber>], dir: Direction, message: &str) {
    if subscribers.is_empty() {
        return;
    }
    let mut pretty = None;
    for sub in subscribers.iter_mut() {
        if sub.raw() {
            for line in message.split_inclusive('\n') {
                deliver(sub.as_mut(), dir, line);
            }
        } else {
            let text = pretty.get_or_insert_with(|| pretty_message(message));
            deliver(sub.as_mut(), dir, text);
        }
    }
}

fn deliver(sub: &mut dyn IoSubscriber, dir: Direction, text: &str) {
    match dir {
        Direction::Input => sub.input(text),
        Direction::Output => sub.output(text),
    }
}

/// Re-serialize a message pretty, or keep it as is if it does not parse
fn pretty_message(message: &str) -> String {
    let body = message
        .trim_end()
        .strip_suffix(END_OF_MESSAGE)
        .unwrap_or(message);
    match XmlParser::new().parse(body) {
        Ok(doc) => doc.to_xml_string(),
        Err(_) => message.to_string(),
    }
}

/// Routes session traffic to `tracing` at debug level
#[derive(Debug, Clone, Default)]
pub struct TracingSubscriber {
    raw: bool,
}

impl TracingSubscriber {
    /// Subscriber for whole pretty printed messages
    pub fn parsed() -> Self {
        Self { raw: false }
    }

    /// Subscriber for raw lines
    pub fn raw() -> Self {
        Self { raw: true }
    }
}

impl IoSubscriber for TracingSubscriber {
    fn raw(&self) -> bool {
        self.raw
    }

    fn input(&mut self, text: &str) {
        tracing::debug!(target: "rust_netconf::wire", "<< {}", text.trim_end());
    }

    fn output(&mut self, text: &str) {
        tracing::debug!(target: "rust_netconf::wire", ">> {}", text.trim_end());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    /// Reader that hands out at most `chunk` bytes per read
    struct Chunked {
        data: Vec<u8>,
        pos: usize,
        chunk: usize,
    }

    impl Read for Chunked {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = self.chunk.min(buf.len()).min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    #[derive(Clone, Default)]
    struct Recorder {
        raw: bool,
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl IoSubscriber for Recorder {
        fn raw(&self) -> bool {
            self.raw
        }
        fn input(&mut self, text: &str) {
            self.seen.lock().unwrap().push(format!("in:{}", text));
        }
        fn output(&mut self, text: &str) {
            self.seen.lock().unwrap().push(format!("out:{}", text));
        }
    }

    #[test]
    fn test_two_frames() {
        let mut reader = FrameReader::new(Cursor::new("<a/>]]>]]>\n<b/>]]>]]>"));
        assert_eq!(reader.read_frame().unwrap(), "<a/>");
        assert_eq!(reader.read_frame().unwrap(), "\n<b/>");
        assert!(matches!(reader.read_frame(), Err(NetconfError::Session(_))));
    }

    #[test]
    fn test_false_start_kept() {
        let mut reader = FrameReader::new(Cursor::new("]]>]XYZ]]>]]>"));
        assert_eq!(reader.read_frame().unwrap(), "]]>]XYZ");

        let mut reader = FrameReader::new(Cursor::new("a]]]>]]>"));
        assert_eq!(reader.read_frame().unwrap(), "a]");
    }

    #[test]
    fn test_marker_split_across_reads() {
        let data = b"<ok/>]]>]]><next/>]]>]]>".to_vec();
        for chunk in 1..8 {
            let mut reader = FrameReader::new(Chunked {
                data: data.clone(),
                pos: 0,
                chunk,
            });
            assert_eq!(reader.read_frame().unwrap(), "<ok/>");
            assert_eq!(reader.read_frame().unwrap(), "<next/>");
        }
    }

    #[test]
    fn test_eof_mid_message() {
        let mut reader = FrameReader::new(Cursor::new("<rpc-reply>]]>]"));
        let err = reader.read_frame().unwrap_err();
        assert!(err.to_string().contains("end of stream after"));
    }

    #[test]
    fn test_write_frame() {
        let mut out = Vec::new();
        write_frame(&mut out, "<hello/>").unwrap();
        assert_eq!(out, b"<hello/>]]>]]>\n");
    }

    #[test]
    fn test_subscribers() {
        let raw = Recorder {
            raw: true,
            ..Default::default()
        };
        let parsed = Recorder::default();
        let mut subs: Vec<Box<dyn IoSubscriber>> = vec![Box::new(raw.clone()), Box::new(parsed.clone())];

        notify(&mut subs, Direction::Output, "<a>\n<b/>\n</a>]]>]]>\n");
        assert_eq!(raw.seen.lock().unwrap().len(), 3);
        assert_eq!(parsed.seen.lock().unwrap().as_slice(), ["out:<a>\n  <b/>\n</a>"]);

        notify(&mut subs, Direction::Input, "not xml");
        assert_eq!(parsed.seen.lock().unwrap()[1], "in:not xml");
    }
}
