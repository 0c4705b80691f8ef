use futures::Stream;
use serde::de::DeserializeOwned;

use crate::error::ClientError;
use crate::watchdog::{IdleBudgets, IdleWatchdog};

const DATA_PREFIX: &str = "data: ";
const DONE_SENTINEL: &str = "[DONE]";

/// What the event callback wants the reader to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// One significant line of the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data(String),
    Done,
}

/// Incremental line splitter for `text/event-stream` bodies.
///
/// Chunks may end anywhere, including inside a multi-byte character, so raw
/// bytes are held back until they form complete UTF-8 and text is held back
/// until it forms a complete line. Only `data: ` lines are significant;
/// everything else, blank lines included, is dropped.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    pending_bytes: Vec<u8>,
    buffer: String,
    finished: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        if self.finished {
            return Vec::new();
        }

        // Held-back text never contains a newline, so only new text needs a scan.
        let scanned = self.buffer.len();
        self.pending_bytes.extend_from_slice(chunk);
        decode_utf8_prefix(&mut self.pending_bytes, &mut self.buffer);

        let Some(last_newline) = self.buffer[scanned..].rfind('\n').map(|at| scanned + at) else {
            return Vec::new();
        };
        let rest = self.buffer.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.buffer, rest);

        let mut frames = Vec::new();
        for line in complete.split('\n') {
            let line = line.strip_suffix('\r').unwrap_or(line);
            let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
                continue;
            };
            if payload == DONE_SENTINEL {
                frames.push(Frame::Done);
                self.finished = true;
                self.buffer.clear();
                self.pending_bytes.clear();
                break;
            }
            frames.push(Frame::Data(payload.to_string()));
        }
        frames
    }
}

// Moves the longest valid UTF-8 prefix of `bytes` into `out`. An incomplete
// trailing sequence stays in `bytes`; invalid sequences become U+FFFD.
fn decode_utf8_prefix(bytes: &mut Vec<u8>, out: &mut String) {
    loop {
        match std::str::from_utf8(bytes) {
            Ok(text) => {
                out.push_str(text);
                bytes.clear();
                return;
            }
            Err(err) => {
                let valid = err.valid_up_to();
                out.push_str(&String::from_utf8_lossy(&bytes[..valid]));
                match err.error_len() {
                    None => {
                        bytes.drain(..valid);
                        return;
                    }
                    Some(len) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        bytes.drain(..valid + len);
                    }
                }
            }
        }
    }
}

/// Reads an event stream to completion, handing each decoded `data:` payload to
/// `on_event`.
///
/// Every read is guarded by the idle watchdog. Payloads that do not parse as
/// `T` are skipped. `on_done` runs exactly once when the stream ends, when
/// `[DONE]` arrives or when `on_event` returns `Flow::Stop`; it does not run
/// when an error is returned.
pub async fn read_sse_stream<S, B, E, T, F, D>(
    stream: S,
    budgets: IdleBudgets,
    mut on_event: F,
    on_done: D,
) -> Result<(), ClientError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Into<ClientError>,
    T: DeserializeOwned,
    F: FnMut(T) -> Result<Flow, ClientError>,
    D: FnOnce(),
{
    let mut stream = std::pin::pin!(stream);
    let mut watchdog = IdleWatchdog::new(budgets);
    let mut decoder = FrameDecoder::new();

    while let Some(chunk) = watchdog.next(&mut stream).await? {
        let chunk = chunk.map_err(Into::into)?;
        for frame in decoder.push(chunk.as_ref()) {
            watchdog.observe_event();
            let payload = match frame {
                Frame::Done => {
                    on_done();
                    return Ok(());
                }
                Frame::Data(payload) => payload,
            };

            let event = match serde_json::from_str::<T>(&payload) {
                Ok(event) => event,
                Err(err) => {
                    tracing::debug!(error = %err, "skipping malformed stream event");
                    continue;
                }
            };

            if on_event(event)? == Flow::Stop {
                on_done();
                return Ok(());
            }
        }
    }

    on_done();
    Ok(())
}
