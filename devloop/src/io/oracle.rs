//! Oracle boundary: role-tagged messages in, accumulated text out.
//!
//! [`OracleSession`] is the single object every component talks to. It owns
//! the transport, retries whole calls on transient failures, accumulates
//! usage, and appends every exchange to a JSONL transcript.

use std::cell::Cell;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::types::Message;
use crate::io::config::OracleConfig;

/// Average characters per token used for usage estimates.
const CHARS_PER_TOKEN: f64 = 3.4;

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("oracle connection failed: {0}")]
    Connection(String),
    #[error("oracle rate limited: {0}")]
    RateLimited(String),
    #[error("oracle stream stalled for {}s", .0.as_secs())]
    Stalled(Duration),
    #[error("oracle rejected the request: {0}")]
    Rejected(String),
    #[error("malformed oracle response: {0}")]
    Malformed(String),
}

impl OracleError {
    /// Whether retrying the whole call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            OracleError::Connection(_) | OracleError::RateLimited(_) | OracleError::Stalled(_)
        )
    }
}

pub trait Oracle {
    fn complete(&self, messages: &[Message]) -> Result<String, OracleError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &OracleConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff: config.retry_backoff(),
        }
    }
}

/// Accumulated oracle usage for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Usage {
    pub calls: u32,
    pub prompt_chars: usize,
    pub generation_chars: usize,
}

impl Usage {
    pub fn estimated_tokens(&self) -> u64 {
        ((self.prompt_chars + self.generation_chars) as f64 / CHARS_PER_TOKEN).ceil() as u64
    }
}

#[derive(Serialize)]
struct TranscriptEntry<'a> {
    timestamp: String,
    label: &'a str,
    messages: &'a [Message],
    response: &'a str,
}

pub struct OracleSession {
    oracle: Box<dyn Oracle>,
    retry: RetryPolicy,
    usage: Cell<Usage>,
    transcript: Option<PathBuf>,
}

impl OracleSession {
    pub fn new(oracle: Box<dyn Oracle>, retry: RetryPolicy) -> Self {
        Self {
            oracle,
            retry,
            usage: Cell::new(Usage::default()),
            transcript: None,
        }
    }

    /// Append every successful exchange to `path` as JSON lines.
    #[must_use]
    pub fn with_transcript(mut self, path: impl Into<PathBuf>) -> Self {
        self.transcript = Some(path.into());
        self
    }

    pub fn usage(&self) -> Usage {
        self.usage.get()
    }

    /// Send `messages`, retrying the whole call on transient failures.
    ///
    /// `label` names the exchange in logs and in the transcript.
    #[instrument(skip(self, messages), fields(messages = messages.len()))]
    pub fn chat(&self, label: &str, messages: &[Message]) -> Result<String, OracleError> {
        let mut attempt = 0;
        let response = loop {
            match self.oracle.complete(messages) {
                Ok(response) => break response,
                Err(err) if err.is_transient() && attempt < self.retry.max_retries => {
                    attempt += 1;
                    warn!(
                        attempt,
                        max_retries = self.retry.max_retries,
                        err = %err,
                        "oracle call failed, retrying"
                    );
                    thread::sleep(self.retry.backoff);
                }
                Err(err) => return Err(err),
            }
        };

        let mut usage = self.usage.get();
        usage.calls += 1;
        usage.prompt_chars += messages.iter().map(|m| m.content.len()).sum::<usize>();
        usage.generation_chars += response.len();
        self.usage.set(usage);
        debug!(
            response_chars = response.len(),
            estimated_tokens = usage.estimated_tokens(),
            "oracle answered"
        );

        if let Err(err) = self.append_transcript(label, messages, &response) {
            warn!(err = %format!("{err:#}"), "failed to append oracle transcript");
        }
        Ok(response)
    }

    /// Single-turn convenience over [`OracleSession::chat`].
    pub fn ask(&self, label: &str, system: &str, user: &str) -> Result<String, OracleError> {
        self.chat(label, &[Message::system(system), Message::user(user)])
    }

    fn append_transcript(&self, label: &str, messages: &[Message], response: &str) -> Result<()> {
        let Some(path) = &self.transcript else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let entry = TranscriptEntry {
            timestamp: Utc::now().to_rfc3339(),
            label,
            messages,
            response,
        };
        let mut line = serde_json::to_string(&entry).context("serialize transcript entry")?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open {}", path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("append {}", path.display()))
    }
}

/// OpenAI-compatible streaming chat-completions client.
pub struct HttpOracle {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
    temperature: f32,
    stall_timeout: Duration,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    stream: bool,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Default, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

impl HttpOracle {
    /// Build a client from config, reading the key from `api_key_env`.
    pub fn from_config(config: &OracleConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| anyhow!("environment variable {} is not set", config.api_key_env))?;
        // Streams can legitimately run for minutes; stalls are detected per chunk.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(None::<Duration>)
            .build()
            .context("build oracle http client")?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key,
            temperature: config.temperature,
            stall_timeout: config.stall_timeout(),
        })
    }
}

impl Oracle for HttpOracle {
    #[instrument(skip_all, fields(model = %self.model))]
    fn complete(&self, messages: &[Message]) -> Result<String, OracleError> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            stream: true,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .map_err(|err| OracleError::Connection(err.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let body = response.text().unwrap_or_default();
            return Err(OracleError::RateLimited(body));
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(OracleError::Rejected(format!("{status}: {body}")));
        }
        collect_stream(response, self.stall_timeout)
    }
}

/// Accumulate the `delta.content` of a server-sent-event stream.
///
/// Lines are read on a separate thread so that a silent connection surfaces
/// as [`OracleError::Stalled`] after `stall_timeout` instead of blocking.
/// After a stall the reader thread owns the body until its next line or EOF,
/// then drops it once the send to the abandoned channel fails.
///
/// A stream that ends without the `[DONE]` sentinel is a
/// [`OracleError::Connection`] so the whole call is retried.
pub fn collect_stream<R: Read + Send + 'static>(
    reader: R,
    stall_timeout: Duration,
) -> Result<String, OracleError> {
    let (tx, rx) = mpsc::channel::<std::io::Result<String>>();
    thread::spawn(move || {
        for line in BufReader::new(reader).lines() {
            let failed = line.is_err();
            if tx.send(line).is_err() || failed {
                break;
            }
        }
    });

    let mut text = String::new();
    loop {
        let line = match rx.recv_timeout(stall_timeout) {
            Ok(Ok(line)) => line,
            Ok(Err(err)) => return Err(OracleError::Connection(err.to_string())),
            Err(RecvTimeoutError::Timeout) => return Err(OracleError::Stalled(stall_timeout)),
            Err(RecvTimeoutError::Disconnected) => {
                warn!(chars = text.len(), "oracle stream ended before [DONE]");
                return Err(OracleError::Connection(
                    "stream ended before [DONE]".to_string(),
                ));
            }
        };
        let Some(payload) = line.trim().strip_prefix("data:") else {
            continue;
        };
        let payload = payload.trim();
        if payload == "[DONE]" {
            break;
        }
        let chunk: StreamChunk = serde_json::from_str(payload)
            .map_err(|err| OracleError::Malformed(format!("{err}: {payload}")))?;
        for choice in chunk.choices {
            if let Some(content) = choice.delta.content {
                text.push_str(&content);
            }
        }
    }
    info!(chars = text.len(), "oracle stream complete");
    Ok(text)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::io::Cursor;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Instant;

    use super::*;

    struct QueuedOracle {
        answers: RefCell<VecDeque<Result<String, OracleError>>>,
        calls: Cell<u32>,
    }

    impl QueuedOracle {
        fn boxed(answers: Vec<Result<String, OracleError>>) -> Box<Self> {
            Box::new(Self {
                answers: RefCell::new(answers.into()),
                calls: Cell::new(0),
            })
        }
    }

    impl Oracle for QueuedOracle {
        fn complete(&self, _messages: &[Message]) -> Result<String, OracleError> {
            self.calls.set(self.calls.get() + 1);
            self.answers
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Err(OracleError::Connection("no more answers".into())))
        }
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff: Duration::ZERO,
        }
    }

    #[test]
    fn retries_transient_failures_then_succeeds() {
        let oracle = QueuedOracle::boxed(vec![
            Err(OracleError::RateLimited("slow down".into())),
            Err(OracleError::Stalled(Duration::from_secs(1))),
            Ok("hello".into()),
        ]);
        let session = OracleSession::new(oracle, policy(3));
        let answer = session.ask("greet", "system", "hi").expect("answer");
        assert_eq!(answer, "hello");
        let usage = session.usage();
        assert_eq!(usage.calls, 1);
        assert_eq!(usage.prompt_chars, "system".len() + "hi".len());
        assert_eq!(usage.generation_chars, 5);
    }

    #[test]
    fn rejected_requests_are_not_retried() {
        let oracle = QueuedOracle::boxed(vec![
            Err(OracleError::Rejected("400".into())),
            Ok("unused".into()),
        ]);
        let session = OracleSession::new(oracle, policy(5));
        let err = session.ask("x", "s", "u").expect_err("rejected");
        assert!(matches!(err, OracleError::Rejected(_)));
        assert_eq!(session.usage().calls, 0);
    }

    #[test]
    fn transient_failure_propagates_after_budget() {
        let oracle = QueuedOracle::boxed(Vec::new());
        let session = OracleSession::new(oracle, policy(2));
        let err = session.ask("x", "s", "u").expect_err("exhausted");
        assert!(err.is_transient());
    }

    #[test]
    fn transcript_records_each_exchange() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(".devloop").join("oracle.jsonl");
        let oracle = QueuedOracle::boxed(vec![Ok("one".into()), Ok("two".into())]);
        let session = OracleSession::new(oracle, policy(0)).with_transcript(&path);
        session.ask("first", "s", "u").expect("first");
        session.ask("second", "s", "u").expect("second");

        let contents = fs::read_to_string(&path).expect("read transcript");
        let labels: Vec<String> = contents
            .lines()
            .map(|line| {
                let value: serde_json::Value = serde_json::from_str(line).expect("json line");
                value["label"].as_str().expect("label").to_string()
            })
            .collect();
        assert_eq!(labels, vec!["first", "second"]);
    }

    #[test]
    fn collects_streamed_deltas() {
        let body = concat!(
            ": keep-alive\n",
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: [DONE]\n\n",
        );
        let text = collect_stream(Cursor::new(body), Duration::from_secs(5)).expect("text");
        assert_eq!(text, "Hello");
    }

    #[test]
    fn truncated_stream_is_a_transient_failure() {
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"**microservice.py**\\n```python\\nimport js\"}}]}\n\n";
        let err = collect_stream(Cursor::new(body), Duration::from_secs(5)).expect_err("truncated");
        assert!(matches!(err, OracleError::Connection(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn truncated_stream_is_retried_as_a_whole_call() {
        let oracle = QueuedOracle::boxed(vec![
            collect_stream(
                Cursor::new("data: {\"choices\":[{\"delta\":{\"content\":\"par\"}}]}\n"),
                Duration::from_secs(5),
            ),
            Ok("complete".into()),
        ]);
        let session = OracleSession::new(oracle, policy(1));
        assert_eq!(session.ask("x", "s", "u").expect("answer"), "complete");
    }

    #[test]
    fn malformed_chunk_is_reported() {
        let body = "data: {not json\n";
        let err = collect_stream(Cursor::new(body), Duration::from_secs(5)).expect_err("bad");
        assert!(matches!(err, OracleError::Malformed(_)));
        assert!(!err.is_transient());
    }

    struct SilentReader;

    impl Read for SilentReader {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            thread::sleep(Duration::from_millis(500));
            Ok(0)
        }
    }

    #[test]
    fn silent_stream_stalls() {
        let err = collect_stream(SilentReader, Duration::from_millis(20)).expect_err("stall");
        assert!(matches!(err, OracleError::Stalled(_)));
        assert!(err.is_transient());
    }

    /// Delivers one line late, then EOF; flags when the reader is dropped.
    struct LateReader {
        body: Cursor<&'static [u8]>,
        dropped: Arc<AtomicBool>,
    }

    impl Read for LateReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            thread::sleep(Duration::from_millis(100));
            self.body.read(buf)
        }
    }

    impl Drop for LateReader {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn stalled_reader_is_released_once_the_peer_answers() {
        let dropped = Arc::new(AtomicBool::new(false));
        let reader = LateReader {
            body: Cursor::new(b"data: {\"choices\":[]}\n".as_slice()),
            dropped: Arc::clone(&dropped),
        };
        let err = collect_stream(reader, Duration::from_millis(20)).expect_err("stall");
        assert!(matches!(err, OracleError::Stalled(_)));

        let deadline = Instant::now() + Duration::from_secs(5);
        while !dropped.load(Ordering::SeqCst) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(dropped.load(Ordering::SeqCst));
    }
}
