//! Throttled write path to the time-series sink.
//!
//! One HTTP POST per record to `/write?db=<database>`, Basic-Auth header
//! built once per dispatcher lifetime. A single failed write aborts the
//! remaining records of that dispatch call; callers running several
//! dispatches treat each as independently failable.
//!
//! Connection lifecycle: by default the idle pool is zero, so the connection
//! is released after every write; with throttling enabled the pool is capped
//! at two connections. Either way resource usage stays bounded on hosts
//! issuing thousands of short-lived writes per day.

use std::thread;
use std::time::{Duration, Instant};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::credentials::SinkCredentials;
use crate::models::LineProtocolRecord;

/// Default sink port.
pub const DEFAULT_SINK_PORT: u16 = 8086;

/// Sink endpoint configuration.
#[derive(Debug, Clone)]
pub struct SinkConfig {
    /// `http` or `https`.
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub database: String,
}

impl SinkConfig {
    pub fn new(host: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            scheme: "http".to_string(),
            host: host.into(),
            port: DEFAULT_SINK_PORT,
            database: database.into(),
        }
    }

    /// Base write URL, without the `db` query parameter.
    pub fn write_url(&self) -> String {
        format!("{}://{}:{}/write", self.scheme, self.host, self.port)
    }
}

/// Retry behavior for sink writes: exponential backoff with jitter.
///
/// Transport errors and 5xx responses are retried; 4xx responses (bad
/// request, auth) never are. `no_retry()` restores strict fire-and-forget
/// behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts per record (1 = no retries).
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Cap for the exponential backoff.
    pub max_delay: Duration,
    /// 0.1 means each delay is randomized by ±10 %.
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    /// Single attempt, no backoff.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Backoff before retry attempt `attempt` (1-indexed; 0 means the first
    /// try and sleeps nothing).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let base = self.base_delay.as_millis() as f64;
        let exp = base * 2.0_f64.powi(attempt as i32 - 1);
        let capped = exp.min(self.max_delay.as_millis() as f64);

        let jittered = if self.jitter_factor > 0.0 {
            let range = capped * self.jitter_factor;
            let jitter = (rand::rng().random::<f64>() * 2.0 - 1.0) * range;
            (capped + jitter).max(0.0)
        } else {
            capped
        };
        Duration::from_millis(jittered as u64)
    }
}

/// Error type for sink writes.
#[derive(Debug)]
pub enum WriteError {
    /// The HTTP client could not be initialized.
    Client(String),
    /// The sink rejected a record.
    Rejected {
        status: u16,
        measurement: String,
        host: String,
    },
    /// Transport-level failure (connect, timeout, ...).
    Transport { measurement: String, reason: String },
}

impl std::fmt::Display for WriteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteError::Client(msg) => write!(f, "sink client: {}", msg),
            WriteError::Rejected {
                status,
                measurement,
                host,
            } => write!(
                f,
                "sink rejected {} for {} with status {}",
                measurement, host, status
            ),
            WriteError::Transport {
                measurement,
                reason,
            } => write!(f, "sink transport error writing {}: {}", measurement, reason),
        }
    }
}

impl std::error::Error for WriteError {}

/// Outcome of one successful dispatch call.
#[derive(Debug, Clone, Copy)]
pub struct WriteReport {
    pub written: usize,
    pub elapsed: Duration,
}

enum PostFailure {
    Rejected(u16),
    Transport(String),
}

impl PostFailure {
    fn retryable(&self) -> bool {
        match self {
            PostFailure::Rejected(status) => *status >= 500,
            PostFailure::Transport(_) => true,
        }
    }
}

/// Ships line-protocol records to the sink.
pub struct WriteDispatcher {
    client: reqwest::blocking::Client,
    url: String,
    database: String,
    /// `Basic <base64(user:pass)>`, built once per dispatcher lifetime.
    auth_header: String,
    retry: RetryConfig,
}

impl WriteDispatcher {
    /// Builds a dispatcher for one sink.
    ///
    /// `throttle` caps the idle connection pool at 2; otherwise the pool is
    /// zero and every write releases its connection.
    pub fn new(
        sink: &SinkConfig,
        credentials: &SinkCredentials,
        retry: RetryConfig,
        throttle: bool,
    ) -> Result<Self, WriteError> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(if throttle { 2 } else { 0 })
            .build()
            .map_err(|e| WriteError::Client(e.to_string()))?;

        let basic = STANDARD.encode(format!("{}:{}", credentials.user, credentials.password));
        Ok(Self {
            client,
            url: sink.write_url(),
            database: sink.database.clone(),
            auth_header: format!("Basic {}", basic),
            retry,
        })
    }

    /// Writes records in order, one POST per record.
    ///
    /// The first record that still fails after retries aborts the remaining
    /// writes and propagates.
    pub fn write(&self, records: &[LineProtocolRecord]) -> Result<WriteReport, WriteError> {
        let start = Instant::now();
        for record in records {
            let host = record.tags.get("host").cloned().unwrap_or_default();
            self.post_with_retry(&record.to_line(), &record.measurement, &host)?;
        }
        let report = WriteReport {
            written: records.len(),
            elapsed: start.elapsed(),
        };
        info!(
            written = report.written,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "dispatch complete"
        );
        Ok(report)
    }

    /// Writes pre-rendered line-protocol lines (e.g. a collect-stage file
    /// artifact replayed by a later write invocation).
    pub fn write_lines(&self, lines: &[String]) -> Result<WriteReport, WriteError> {
        let start = Instant::now();
        let mut written = 0;
        for line in lines {
            if line.trim().is_empty() {
                continue;
            }
            let measurement = line
                .split([',', ' '])
                .next()
                .unwrap_or(line.as_str())
                .to_string();
            self.post_with_retry(line, &measurement, "")?;
            written += 1;
        }
        let report = WriteReport {
            written,
            elapsed: start.elapsed(),
        };
        info!(
            written = report.written,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "dispatch complete"
        );
        Ok(report)
    }

    fn post_with_retry(
        &self,
        line: &str,
        measurement: &str,
        host: &str,
    ) -> Result<(), WriteError> {
        let mut attempt: u32 = 0;
        loop {
            match self.post_once(line) {
                Ok(()) => return Ok(()),
                Err(failure) => {
                    attempt += 1;
                    if failure.retryable() && attempt < self.retry.max_attempts {
                        let delay = self.retry.delay_for_attempt(attempt);
                        debug!(
                            measurement,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "write failed, backing off"
                        );
                        thread::sleep(delay);
                        continue;
                    }
                    let error = match failure {
                        PostFailure::Rejected(status) => WriteError::Rejected {
                            status,
                            measurement: measurement.to_string(),
                            host: host.to_string(),
                        },
                        PostFailure::Transport(reason) => WriteError::Transport {
                            measurement: measurement.to_string(),
                            reason,
                        },
                    };
                    warn!(measurement, host, "aborting dispatch: {}", error);
                    return Err(error);
                }
            }
        }
    }

    fn post_once(&self, line: &str) -> Result<(), PostFailure> {
        let mut body = String::with_capacity(line.len() + 1);
        body.push_str(line);
        body.push('\n');

        let response = self
            .client
            .post(&self.url)
            .query(&[("db", self.database.as_str())])
            .header("authorization", &self.auth_header)
            .header("content-type", "text/plain")
            .body(body)
            .send()
            .map_err(|e| PostFailure::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(PostFailure::Rejected(status.as_u16()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::mpsc;

    use crate::models::FieldValue;

    fn record() -> LineProtocolRecord {
        let mut tags = BTreeMap::new();
        tags.insert("host".to_string(), "myvm002".to_string());
        tags.insert("vc".to_string(), "vc01".to_string());
        LineProtocolRecord {
            measurement: "cpu.usage.average".to_string(),
            tags,
            field: FieldValue::Num(4.25),
            timestamp_ns: 1_700_000_000_000_000_000,
        }
    }

    /// Accepts `connections` requests, answers each with `status_line`, and
    /// sends the raw request text back over the channel.
    fn serve(
        listener: TcpListener,
        connections: usize,
        status_line: &'static str,
    ) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            for _ in 0..connections {
                let (mut stream, _) = listener.accept().unwrap();
                let mut raw = Vec::new();
                let mut buf = [0u8; 1024];
                loop {
                    let n = stream.read(&mut buf).unwrap();
                    raw.extend_from_slice(&buf[..n]);
                    let text = String::from_utf8_lossy(&raw);
                    if let Some(header_end) = text.find("\r\n\r\n") {
                        let content_length = text
                            .lines()
                            .find_map(|l| {
                                l.to_ascii_lowercase()
                                    .strip_prefix("content-length:")
                                    .map(|v| v.trim().parse::<usize>().unwrap())
                            })
                            .unwrap_or(0);
                        if raw.len() >= header_end + 4 + content_length {
                            break;
                        }
                    }
                }
                let response = format!(
                    "HTTP/1.1 {}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                    status_line
                );
                stream.write_all(response.as_bytes()).unwrap();
                tx.send(String::from_utf8_lossy(&raw).into_owned()).unwrap();
            }
        });
        rx
    }

    fn local_sink(listener: &TcpListener) -> SinkConfig {
        let addr = listener.local_addr().unwrap();
        let mut sink = SinkConfig::new(addr.ip().to_string(), "telegraf");
        sink.port = addr.port();
        sink
    }

    fn creds() -> SinkCredentials {
        SinkCredentials {
            user: "admin".to_string(),
            password: "secret".to_string(),
        }
    }

    #[test]
    fn test_write_url() {
        let sink = SinkConfig::new("influx01", "telegraf");
        assert_eq!(sink.write_url(), "http://influx01:8086/write");
    }

    #[test]
    fn test_write_posts_record_with_auth_and_db() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let sink = local_sink(&listener);
        let rx = serve(listener, 1, "204 No Content");

        let dispatcher =
            WriteDispatcher::new(&sink, &creds(), RetryConfig::no_retry(), false).unwrap();
        let report = dispatcher.write(&[record()]).unwrap();
        assert_eq!(report.written, 1);

        let request = rx.recv().unwrap();
        assert!(request.starts_with("POST /write?db=telegraf HTTP/1.1"));
        // base64("admin:secret")
        assert!(request.contains("authorization: Basic YWRtaW46c2VjcmV0"));
        assert!(request.contains(
            "cpu.usage.average,host=myvm002,vc=vc01 value=4.25 1700000000000000000\n"
        ));
    }

    #[test]
    fn test_rejected_write_aborts_remaining() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let sink = local_sink(&listener);
        // Only one connection is served; a second POST would hang, so the
        // dispatcher aborting after the 400 is what lets this test finish.
        let rx = serve(listener, 1, "400 Bad Request");

        let dispatcher =
            WriteDispatcher::new(&sink, &creds(), RetryConfig::no_retry(), false).unwrap();
        let result = dispatcher.write(&[record(), record()]);
        match result {
            Err(WriteError::Rejected {
                status,
                measurement,
                host,
            }) => {
                assert_eq!(status, 400);
                assert_eq!(measurement, "cpu.usage.average");
                assert_eq!(host, "myvm002");
            }
            other => panic!("expected rejection, got {:?}", other.map(|r| r.written)),
        }
        drop(rx);
    }

    #[test]
    fn test_server_error_is_retried() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let sink = local_sink(&listener);
        let rx = serve(listener, 2, "500 Internal Server Error");

        let retry = RetryConfig {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            jitter_factor: 0.0,
        };
        let dispatcher = WriteDispatcher::new(&sink, &creds(), retry, false).unwrap();
        let result = dispatcher.write(&[record()]);
        assert!(matches!(
            result,
            Err(WriteError::Rejected { status: 500, .. })
        ));
        // Both served connections were consumed by the same record.
        assert_eq!(rx.iter().count(), 2);
    }

    #[test]
    fn test_write_lines_skips_blanks() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let sink = local_sink(&listener);
        let rx = serve(listener, 1, "204 No Content");

        let dispatcher =
            WriteDispatcher::new(&sink, &creds(), RetryConfig::no_retry(), false).unwrap();
        let lines = vec![
            String::new(),
            "cpu.usage.average,host=a value=1 1700000000000000000".to_string(),
        ];
        let report = dispatcher.write_lines(&lines).unwrap();
        assert_eq!(report.written, 1);
        drop(rx);
    }

    #[test]
    fn test_retry_delay_bounds() {
        let retry = RetryConfig::default();
        assert_eq!(retry.delay_for_attempt(0), Duration::ZERO);
        for attempt in 1..10 {
            let delay = retry.delay_for_attempt(attempt);
            // Cap plus the 10 % jitter margin.
            assert!(delay <= Duration::from_millis(5500));
        }
    }

    #[test]
    fn test_retry_delay_grows_without_jitter() {
        let retry = RetryConfig {
            jitter_factor: 0.0,
            ..Default::default()
        };
        assert_eq!(retry.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(retry.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(retry.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(retry.delay_for_attempt(10), Duration::from_secs(5));
    }
}
