//! Upstream event sources.
//!
//! A source authenticates, then blocks in [`EventSource::filter`] handing one
//! raw event at a time to a [`StreamHandler`]. Background I/O is allowed, but
//! delivery to the handler is always sequential on the calling thread.
//!
//! Cancellation is cooperative: an [`Interrupt`] ends the receive loop
//! between events, never in the middle of one.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, select, Receiver, Sender};
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{AuthenticationError, RaceError, RaceResult, SourceError};

/// Handler verdict after each delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamControl {
    /// Keep the stream running.
    Continue,
    /// Stop the stream after this delivery.
    Stop,
}

/// How a stream ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The upstream ran out of events.
    Exhausted,
    /// The handler asked to stop.
    Stopped,
}

/// Per-event callback driven by a source.
pub trait StreamHandler {
    /// One raw event payload.
    fn on_data(&mut self, raw: &[u8]) -> StreamControl;

    /// A transport status reported by the upstream.
    fn on_error(&mut self, status: u16) -> StreamControl;
}

/// An upstream provider of raw events.
pub trait EventSource: Send {
    /// Authenticate and connect.
    ///
    /// # Errors
    /// `SourceError::Authentication` on credential or handshake failure.
    fn authenticate(&mut self) -> Result<(), SourceError>;

    /// Stream events matching `track` into `handler` until the upstream
    /// ends, the handler stops, or the interrupt fires.
    ///
    /// # Errors
    /// `SourceError::Interrupted` when the operator stopped the stream;
    /// other variants on transport failure.
    fn filter(
        &mut self,
        track: &[String],
        handler: &mut dyn StreamHandler,
    ) -> Result<StreamEnd, SourceError>;
}

/// Receiving half of a cooperative stop signal.
#[derive(Debug, Clone)]
pub struct Interrupt {
    rx: Receiver<()>,
    flag: Arc<AtomicBool>,
    // Keeps `rx` connected after every handle is dropped.
    _tx: Sender<()>,
}

/// Triggering half of a cooperative stop signal.
#[derive(Debug, Clone)]
pub struct InterruptHandle {
    tx: Sender<()>,
    flag: Arc<AtomicBool>,
}

impl Interrupt {
    /// Create a linked interrupt and handle.
    #[must_use]
    pub fn pair() -> (Self, InterruptHandle) {
        let (tx, rx) = bounded(1);
        let flag = Arc::new(AtomicBool::new(false));
        (
            Self {
                rx,
                flag: Arc::clone(&flag),
                _tx: tx.clone(),
            },
            InterruptHandle { tx, flag },
        )
    }

    /// An interrupt that fires on Ctrl-C.
    ///
    /// Installs the process-wide handler, so this may be called once.
    pub fn ctrl_c() -> RaceResult<Self> {
        let (interrupt, handle) = Self::pair();
        ctrlc::set_handler(move || handle.trigger())
            .map_err(|e| RaceError::internal(format!("cannot install Ctrl-C handler: {e}")))?;
        Ok(interrupt)
    }

    /// Whether the signal has fired.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }
}

impl InterruptHandle {
    /// Fire the signal. Repeated calls are harmless.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::Release);
        let _ = self.tx.try_send(());
    }
}

/// Drain `rx` into `deliver` until it disconnects, the handler stops, or the
/// interrupt fires.
fn pump<T>(
    rx: &Receiver<T>,
    interrupt: &Interrupt,
    handler: &mut dyn StreamHandler,
    mut deliver: impl FnMut(T, &mut dyn StreamHandler) -> Result<StreamControl, SourceError>,
) -> Result<StreamEnd, SourceError> {
    loop {
        if interrupt.is_triggered() {
            return Err(SourceError::Interrupted);
        }

        select! {
            recv(interrupt.receiver()) -> _ => return Err(SourceError::Interrupted),
            recv(rx) -> msg => match msg {
                Ok(item) => {
                    if deliver(item, &mut *handler)? == StreamControl::Stop {
                        return Ok(StreamEnd::Stopped);
                    }
                }
                Err(_) => return Ok(StreamEnd::Exhausted),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct DisconnectFrame {
    disconnect: DisconnectBody,
}

#[derive(Debug, Deserialize)]
struct DisconnectBody {
    code: u16,
}

fn disconnect_code(line: &str) -> Option<u16> {
    if !line.contains("\"disconnect\"") {
        return None;
    }
    serde_json::from_str::<DisconnectFrame>(line)
        .ok()
        .map(|f| f.disconnect.code)
}

fn trim_line(line: &[u8]) -> &[u8] {
    let start = line
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(line.len());
    let end = line
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &line[start..end]
}

type LineReader = Box<dyn BufRead + Send>;

/// Newline-delimited JSON events from stdin or a file.
///
/// Blank keep-alive lines are skipped. A `{"disconnect": {"code": N}}` frame
/// is reported through [`StreamHandler::on_error`].
pub struct LineSource {
    label: String,
    input: Option<LineReader>,
    interrupt: Interrupt,
    capacity: usize,
}

impl std::fmt::Debug for LineSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineSource")
            .field("label", &self.label)
            .field("consumed", &self.input.is_none())
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl LineSource {
    const DEFAULT_CAPACITY: usize = 1024;

    /// Read events from standard input.
    #[must_use]
    pub fn stdin(interrupt: Interrupt) -> Self {
        Self::from_reader("<stdin>", BufReader::new(io::stdin()), interrupt)
    }

    /// Read events from the file at `path`.
    ///
    /// # Errors
    /// `SourceError::Connect` if the file cannot be opened.
    pub fn open(path: &Path, interrupt: Interrupt) -> Result<Self, SourceError> {
        let file = File::open(path)
            .map_err(|e| SourceError::Connect(format!("{}: {e}", path.display())))?;
        Ok(Self::from_reader(
            path.display().to_string(),
            BufReader::new(file),
            interrupt,
        ))
    }

    /// Read events from any buffered reader.
    pub fn from_reader(
        label: impl Into<String>,
        reader: impl BufRead + Send + 'static,
        interrupt: Interrupt,
    ) -> Self {
        Self {
            label: label.into(),
            input: Some(Box::new(reader)),
            interrupt,
            capacity: Self::DEFAULT_CAPACITY,
        }
    }

    // Lines travel as bytes: text that is not UTF-8 is a bad event for the
    // router to drop, not a read failure.
    fn spawn_reader(&self, mut reader: LineReader) -> Result<Receiver<io::Result<Vec<u8>>>, SourceError> {
        let (tx, rx) = bounded(self.capacity.max(1));
        thread::Builder::new()
            .name("tagrace-reader".to_string())
            .spawn(move || loop {
                let mut line = Vec::new();
                match reader.read_until(b'\n', &mut line) {
                    Ok(0) => break,
                    Ok(_) => {
                        if tx.send(Ok(line)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        break;
                    }
                }
            })
            .map_err(|e| SourceError::Connect(format!("cannot spawn reader thread: {e}")))?;
        Ok(rx)
    }
}

impl EventSource for LineSource {
    fn authenticate(&mut self) -> Result<(), SourceError> {
        if self.input.is_none() {
            return Err(SourceError::Connect(format!(
                "{} was already consumed",
                self.label
            )));
        }
        debug!(source = %self.label, "Line source ready");
        Ok(())
    }

    fn filter(
        &mut self,
        track: &[String],
        handler: &mut dyn StreamHandler,
    ) -> Result<StreamEnd, SourceError> {
        let reader = self.input.take().ok_or_else(|| {
            SourceError::Connect(format!("{} was already consumed", self.label))
        })?;
        info!(source = %self.label, track = ?track, "Streaming started");

        let lines = self.spawn_reader(reader)?;
        pump(&lines, &self.interrupt, handler, |line, handler| {
            let line = line.map_err(|e| SourceError::Io(e.to_string()))?;
            let trimmed = trim_line(&line);
            if trimmed.is_empty() {
                return Ok(StreamControl::Continue);
            }
            let code = std::str::from_utf8(trimmed).ok().and_then(disconnect_code);
            Ok(match code {
                Some(code) => handler.on_error(code),
                None => handler.on_data(trimmed),
            })
        })
    }
}

/// A message pushed into a [`ChannelSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceMessage {
    /// A raw event payload.
    Data(Vec<u8>),
    /// A transport status code.
    Status(u16),
}

/// Events pushed through a channel by the embedding program.
#[derive(Debug)]
pub struct ChannelSource {
    rx: Receiver<SourceMessage>,
    interrupt: Interrupt,
    rejected_status: Option<u16>,
}

impl ChannelSource {
    /// Create a source and the sender that feeds it. Dropping every sender
    /// ends the stream.
    #[must_use]
    pub fn new(capacity: usize, interrupt: Interrupt) -> (Self, Sender<SourceMessage>) {
        let (tx, rx) = bounded(capacity.max(1));
        (
            Self {
                rx,
                interrupt,
                rejected_status: None,
            },
            tx,
        )
    }

    /// Make `authenticate` fail as if the upstream answered `status`.
    #[must_use]
    pub fn rejecting_credentials(mut self, status: u16) -> Self {
        self.rejected_status = Some(status);
        self
    }
}

impl EventSource for ChannelSource {
    fn authenticate(&mut self) -> Result<(), SourceError> {
        match self.rejected_status {
            Some(status) => Err(AuthenticationError::Rejected { status }.into()),
            None => Ok(()),
        }
    }

    fn filter(
        &mut self,
        track: &[String],
        handler: &mut dyn StreamHandler,
    ) -> Result<StreamEnd, SourceError> {
        info!(source = "channel", track = ?track, "Streaming started");
        pump(&self.rx, &self.interrupt, handler, |msg, handler| {
            Ok(match msg {
                SourceMessage::Data(raw) => handler.on_data(&raw),
                SourceMessage::Status(status) => handler.on_error(status),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[derive(Default)]
    struct Recorder {
        data: Vec<String>,
        statuses: Vec<u16>,
        stop_after: Option<usize>,
    }

    impl StreamHandler for Recorder {
        fn on_data(&mut self, raw: &[u8]) -> StreamControl {
            self.data.push(String::from_utf8_lossy(raw).into_owned());
            match self.stop_after {
                Some(n) if self.data.len() >= n => StreamControl::Stop,
                _ => StreamControl::Continue,
            }
        }

        fn on_error(&mut self, status: u16) -> StreamControl {
            self.statuses.push(status);
            StreamControl::Continue
        }
    }

    fn track() -> Vec<String> {
        vec!["alpha".to_string()]
    }

    #[test]
    fn test_line_source_skips_keepalives_and_reports_disconnects() {
        let (interrupt, _handle) = Interrupt::pair();
        let input = "{\"id\":1}\n\n   \n{\"disconnect\":{\"code\":7,\"reason\":\"gone\"}}\n{\"id\":2}\n";
        let mut source = LineSource::from_reader("test", Cursor::new(input), interrupt);
        let mut rec = Recorder::default();

        source.authenticate().unwrap();
        let end = source.filter(&track(), &mut rec).unwrap();

        assert_eq!(end, StreamEnd::Exhausted);
        assert_eq!(rec.data, vec!["{\"id\":1}", "{\"id\":2}"]);
        assert_eq!(rec.statuses, vec![7]);
    }

    #[test]
    fn test_line_source_passes_non_utf8_lines_through() {
        let (interrupt, _handle) = Interrupt::pair();
        let input = b"{\"id\":1}\n\xff\xfe garbage\r\n{\"id\":2}\n".to_vec();
        let mut source = LineSource::from_reader("test", Cursor::new(input), interrupt);
        let mut rec = Recorder::default();

        let end = source.filter(&track(), &mut rec).unwrap();

        assert_eq!(end, StreamEnd::Exhausted);
        assert_eq!(rec.data.len(), 3);
        assert_eq!(rec.data[1], "\u{fffd}\u{fffd} garbage");
        assert_eq!(rec.data[2], "{\"id\":2}");
    }

    #[test]
    fn test_trim_line() {
        assert_eq!(trim_line(b"  {}\r\n"), b"{}");
        assert_eq!(trim_line(b" \t\n"), b"");
        assert_eq!(trim_line(b""), b"");
    }

    #[test]
    fn test_line_source_is_single_use() {
        let (interrupt, _handle) = Interrupt::pair();
        let mut source = LineSource::from_reader("test", Cursor::new("{}\n"), interrupt);
        let mut rec = Recorder::default();
        source.filter(&track(), &mut rec).unwrap();

        assert!(matches!(source.authenticate(), Err(SourceError::Connect(_))));
        assert!(source.filter(&track(), &mut rec).is_err());
    }

    #[test]
    fn test_handler_stop_ends_stream() {
        let (interrupt, _handle) = Interrupt::pair();
        let mut source = LineSource::from_reader("test", Cursor::new("{}\n{}\n{}\n"), interrupt);
        let mut rec = Recorder {
            stop_after: Some(2),
            ..Recorder::default()
        };

        assert_eq!(source.filter(&track(), &mut rec).unwrap(), StreamEnd::Stopped);
        assert_eq!(rec.data.len(), 2);
    }

    #[test]
    fn test_interrupt_ends_blocked_stream() {
        let (interrupt, handle) = Interrupt::pair();
        let (mut source, tx) = ChannelSource::new(8, interrupt);
        tx.send(SourceMessage::Data(b"{}".to_vec())).unwrap();

        let worker = thread::spawn(move || {
            let mut rec = Recorder::default();
            let result = source.filter(&track(), &mut rec);
            (result, rec.data.len())
        });

        thread::sleep(std::time::Duration::from_millis(50));
        handle.trigger();
        let (result, delivered) = worker.join().unwrap();

        assert!(matches!(result, Err(SourceError::Interrupted)));
        assert_eq!(delivered, 1);
        drop(tx);
    }

    #[test]
    fn test_dropped_handle_does_not_interrupt() {
        let (interrupt, handle) = Interrupt::pair();
        drop(handle);
        let (mut source, tx) = ChannelSource::new(8, interrupt);
        tx.send(SourceMessage::Status(420)).unwrap();
        drop(tx);

        let mut rec = Recorder::default();
        assert_eq!(source.filter(&track(), &mut rec).unwrap(), StreamEnd::Exhausted);
        assert_eq!(rec.statuses, vec![420]);
    }

    #[test]
    fn test_rejected_credentials() {
        let (interrupt, _handle) = Interrupt::pair();
        let (mut source, _tx) = ChannelSource::new(1, interrupt);
        let mut source_rejecting = {
            let (interrupt, _h) = Interrupt::pair();
            ChannelSource::new(1, interrupt).0.rejecting_credentials(401)
        };

        assert!(source.authenticate().is_ok());
        assert!(matches!(
            source_rejecting.authenticate(),
            Err(SourceError::Authentication(AuthenticationError::Rejected { status: 401 }))
        ));
    }
}
