// HTTP streaming source: newline-delimited JSON over a long-lived response.
//
// `connect` POSTs `{"follow": [...]}` to the stream URL and keeps the
// response open. Each line is one of:
//   (blank)                                   keep-alive
//   {"disconnect": {"reason": "..."}}         upstream is closing
//   {"error": {"status": 420}}                upstream error code
//   {Event}                                   a post
//
// This runs on the feed thread only, so it uses reqwest's blocking client.
// A fresh client is built per connection.
// Body reads time out after POLL_INTERVAL so the stop signal is checked at
// least that often, even on a silent stream. Upstream sends a keep-alive at
// least every 30 seconds; STALL_TIMEOUT of total silence is reported as a
// timeout.

use std::io::{BufRead, BufReader, ErrorKind};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::event::{AccountId, Event};
use crate::feed::source::{FeedStream, StopSignal, StreamMessage, StreamSource};

const STALL_TIMEOUT: Duration = Duration::from_secs(90);
const POLL_INTERVAL: Duration = Duration::from_secs(5);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Serialize)]
struct FilterRequest<'a> {
    follow: &'a [AccountId],
}

#[derive(Debug, Deserialize)]
struct DisconnectNotice {
    #[serde(default)]
    reason: String,
}

#[derive(Debug, Deserialize)]
struct StreamErrorNotice {
    status: u16,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireMessage {
    Disconnect { disconnect: DisconnectNotice },
    Error { error: StreamErrorNotice },
    Event(Box<Event>),
}

/// Parse one stream line. `Ok(None)` for lines we don't understand.
fn parse_line(line: &str) -> Option<StreamMessage> {
    let line = line.trim();
    if line.is_empty() {
        return Some(StreamMessage::KeepAlive);
    }

    match serde_json::from_str::<WireMessage>(line) {
        Ok(WireMessage::Event(event)) => Some(StreamMessage::Event(*event)),
        Ok(WireMessage::Disconnect { disconnect }) => Some(StreamMessage::Disconnect {
            notice: disconnect.reason,
        }),
        Ok(WireMessage::Error { error }) => Some(StreamMessage::Error {
            status: error.status,
        }),
        Err(e) => {
            warn!(error = %e, "Skipping unparseable stream line");
            None
        }
    }
}

pub struct HttpStreamSource {
    url: reqwest::Url,
    token: Option<String>,
}

impl HttpStreamSource {
    pub fn new(url: &str, token: Option<String>) -> Result<Self> {
        let url =
            reqwest::Url::parse(url).with_context(|| format!("Invalid stream URL: {url}"))?;
        Ok(Self {
            url,
            token: token.filter(|t| !t.is_empty()),
        })
    }

    /// The blocking client owns its own runtime, so it is built (and
    /// dropped) on the feed thread, never on the async scheduler.
    fn client() -> Result<reqwest::blocking::Client> {
        reqwest::blocking::Client::builder()
            .user_agent(concat!("feedrelay/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(POLL_INTERVAL)
            .build()
            .context("Failed to build streaming HTTP client")
    }
}

impl StreamSource for HttpStreamSource {
    fn connect(&self, follow: &[AccountId], stop: &StopSignal) -> Result<Box<dyn FeedStream>> {
        let mut request = Self::client()?
            .post(self.url.clone())
            .json(&FilterRequest { follow });
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .with_context(|| format!("Failed to open stream at {}", self.url))?;

        let status = response.status();
        if !status.is_success() {
            return Ok(Box::new(LineStream::<BufReader<reqwest::blocking::Response>>::rejected(
                status.as_u16(),
                stop.clone(),
            )));
        }

        debug!(url = %self.url, "Stream response open");
        Ok(Box::new(LineStream::new(
            BufReader::new(response),
            stop.clone(),
            STALL_TIMEOUT,
        )))
    }
}

/// Newline-delimited messages read from a blocking body.
struct LineStream<R> {
    reader: Option<R>,
    /// Status code the stream was refused with, reported once.
    rejected: Option<u16>,
    stop: StopSignal,
    /// Bytes of a line whose read was cut off by a poll timeout.
    pending: Vec<u8>,
    last_data: Instant,
    stall_timeout: Duration,
}

impl<R> LineStream<R> {
    fn new(reader: R, stop: StopSignal, stall_timeout: Duration) -> Self {
        Self {
            reader: Some(reader),
            rejected: None,
            stop,
            pending: Vec::new(),
            last_data: Instant::now(),
            stall_timeout,
        }
    }

    fn rejected(status: u16, stop: StopSignal) -> Self {
        Self {
            reader: None,
            rejected: Some(status),
            stop,
            pending: Vec::new(),
            last_data: Instant::now(),
            stall_timeout: STALL_TIMEOUT,
        }
    }
}

impl<R: BufRead + Send> FeedStream for LineStream<R> {
    fn next_message(&mut self) -> Result<Option<StreamMessage>> {
        if let Some(status) = self.rejected.take() {
            return Ok(Some(StreamMessage::Error { status }));
        }

        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };

        loop {
            if self.stop.is_stopped() {
                return Ok(None);
            }

            let before = self.pending.len();
            match reader.read_until(b'\n', &mut self.pending) {
                Ok(0) => return Ok(None),
                Ok(_) => {
                    self.last_data = Instant::now();
                    let raw = std::mem::take(&mut self.pending);
                    if let Some(message) = parse_line(&String::from_utf8_lossy(&raw)) {
                        return Ok(Some(message));
                    }
                }
                Err(e) if is_stall(&e) => {
                    if self.pending.len() > before {
                        self.last_data = Instant::now();
                    }
                    if self.last_data.elapsed() >= self.stall_timeout {
                        return Ok(Some(StreamMessage::Timeout));
                    }
                }
                Err(e) => return Err(e).context("Failed to read from stream"),
            }
        }
    }
}

/// The blocking client applies its timeout to each body read and reports an
/// expiry as an I/O error wrapping a reqwest timeout.
fn is_stall(err: &std::io::Error) -> bool {
    matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock)
        || err
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<reqwest::Error>())
            .is_some_and(reqwest::Error::is_timeout)
        || err.to_string().to_lowercase().contains("timed out")
}
