//! # Transcode Pipeline
//!
//! A [`TranscodeJob`] owns one encoder process. Raw source bytes are pumped
//! into the encoder's stdin by a feeder task as they arrive, and encoded bytes
//! are pulled from its stdout by the caller, so neither side is buffered as a
//! whole.
//!
//! ```text
//! SourceReader --feeder task--> [encoder stdin]  encoder  [stdout] --next_chunk()--> caller
//!                                                   |
//!                                                [stderr] --> tail kept for error reports
//! ```
//!
//! The process is spawned with `kill_on_drop`, and the feeder and stderr
//! tasks are aborted when the job is dropped, so every exit path (success,
//! source failure, idle timeout, caller cancellation) tears the process down.

use std::{
    process::Stdio,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use bytes::{Bytes, BytesMut};
use reqwest::Client;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    process::{Child, ChildStdout, Command},
    task::JoinHandle,
    time::timeout,
};
use tracing::{debug, info, warn};

use crate::{
    config::EncoderSettings,
    error::{StreamError, StreamResult},
    types::{ProviderSource, SourceLocator},
};

const CHUNK_SIZE: usize = 64 * 1024;
const STDERR_TAIL: usize = 4 * 1024;

/// Single-use reader over a located raw-audio source.
pub enum SourceReader {
    Http(reqwest::Response),
    File(tokio::fs::File),
}

impl SourceReader {
    pub async fn open(locator: &SourceLocator, client: &Client) -> StreamResult<Self> {
        match locator {
            SourceLocator::Http(url) => {
                let res = client
                    .get(url)
                    .send()
                    .await
                    .map_err(|e| StreamError::SourceRead(e.to_string()))?;
                if !res.status().is_success() {
                    return Err(StreamError::SourceRead(format!(
                        "source download returned {}",
                        res.status()
                    )));
                }
                Ok(SourceReader::Http(res))
            }
            SourceLocator::File(path) => tokio::fs::File::open(path)
                .await
                .map(SourceReader::File)
                .map_err(|e| StreamError::SourceRead(format!("{}: {}", path.display(), e))),
        }
    }

    /// Next slice of raw bytes, `None` at the end of the source.
    pub async fn next_chunk(&mut self) -> StreamResult<Option<Bytes>> {
        match self {
            SourceReader::Http(res) => res
                .chunk()
                .await
                .map_err(|e| StreamError::SourceRead(e.to_string())),
            SourceReader::File(file) => {
                let mut buf = BytesMut::with_capacity(CHUNK_SIZE);
                let n = file
                    .read_buf(&mut buf)
                    .await
                    .map_err(|e| StreamError::SourceRead(e.to_string()))?;
                Ok((n > 0).then(|| buf.freeze()))
            }
        }
    }
}

/// Spawns encoder jobs with one fixed configuration.
pub struct Transcoder {
    settings: EncoderSettings,
    client: Client,
    spawned: AtomicUsize,
}

impl Transcoder {
    /// `client` is used for HTTP sources; it should not carry a total request
    /// timeout, since downloads are bounded by the encoder idle timeout instead.
    pub fn new(settings: EncoderSettings, client: Client) -> Self {
        Self {
            settings,
            client,
            spawned: AtomicUsize::new(0),
        }
    }

    pub fn bitrate(&self) -> &str {
        &self.settings.bitrate
    }

    /// Number of encoder processes spawned so far.
    pub fn jobs_started(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }

    /// Opens `source` and starts encoding it at the configured bitrate.
    pub async fn transcode(&self, source: &ProviderSource) -> StreamResult<TranscodeJob> {
        let reader = SourceReader::open(&source.locator, &self.client).await?;

        let mut child = Command::new(&self.settings.program)
            .args(self.settings.resolved_args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                StreamError::EncodeProcess(format!(
                    "failed to spawn {}: {}",
                    self.settings.program.display(),
                    e
                ))
            })?;
        self.spawned.fetch_add(1, Ordering::SeqCst);
        info!(
            provider = %source.provider,
            bitrate = %self.settings.bitrate,
            pid = child.id(),
            "transcode: encoder started"
        );

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(StreamError::EncodeProcess("encoder pipes unavailable".into()));
        };

        let feeder = tokio::spawn(feed(reader, stdin));
        let stderr = tokio::spawn(collect_tail(stderr));

        Ok(TranscodeJob {
            child,
            stdout,
            feeder: Some(feeder),
            stderr: Some(stderr),
            idle_timeout: self.settings.idle_timeout,
            finished: false,
        })
    }
}

async fn feed(mut reader: SourceReader, mut stdin: tokio::process::ChildStdin) -> StreamResult<u64> {
    let mut fed = 0u64;
    while let Some(chunk) = reader.next_chunk().await? {
        if let Err(e) = stdin.write_all(&chunk).await {
            // the encoder stopped reading; its exit status decides the outcome
            debug!(error = %e, fed, "transcode: encoder closed stdin");
            return Ok(fed);
        }
        fed += chunk.len() as u64;
    }
    // closing stdin is the encoder's end-of-input
    drop(stdin);
    Ok(fed)
}

async fn collect_tail(mut stderr: tokio::process::ChildStderr) -> String {
    let mut tail = Vec::new();
    let mut buf = [0u8; 1024];
    while let Ok(n) = stderr.read(&mut buf).await {
        if n == 0 {
            break;
        }
        tail.extend_from_slice(&buf[..n]);
        if tail.len() > STDERR_TAIL {
            tail.drain(..tail.len() - STDERR_TAIL);
        }
    }
    String::from_utf8_lossy(&tail).trim().to_string()
}

/// One running encoder process and its pipes.
pub struct TranscodeJob {
    child: Child,
    stdout: ChildStdout,
    feeder: Option<JoinHandle<StreamResult<u64>>>,
    stderr: Option<JoinHandle<String>>,
    idle_timeout: Duration,
    finished: bool,
}

impl TranscodeJob {
    /// Next encoded chunk; `None` once the encoder exited successfully.
    pub async fn next_chunk(&mut self) -> StreamResult<Option<Bytes>> {
        if self.finished {
            return Ok(None);
        }

        let mut buf = BytesMut::with_capacity(CHUNK_SIZE);
        match timeout(self.idle_timeout, self.stdout.read_buf(&mut buf)).await {
            Err(_) => {
                self.abort().await;
                Err(StreamError::Timeout(format!(
                    "encoder produced no output for {:?}",
                    self.idle_timeout
                )))
            }
            Ok(Err(e)) => {
                self.abort().await;
                Err(StreamError::EncodeProcess(format!(
                    "reading encoder output failed: {}",
                    e
                )))
            }
            Ok(Ok(0)) => self.finish().await.map(|_| None),
            Ok(Ok(_)) => Ok(Some(buf.freeze())),
        }
    }

    /// Settles a job whose stdout closed. The exit status is checked before
    /// the feeder is joined, and the feeder gets at most one idle interval to
    /// wind down, so a stalled source cannot hold a dead encoder's job open.
    async fn finish(&mut self) -> StreamResult<()> {
        self.finished = true;

        let status = match timeout(self.idle_timeout, self.child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                self.abort().await;
                return Err(StreamError::EncodeProcess(format!(
                    "waiting for encoder failed: {}",
                    e
                )));
            }
            Err(_) => {
                self.abort().await;
                return Err(StreamError::Timeout("encoder did not exit".into()));
            }
        };

        if !status.success() {
            if let Some(feeder) = self.feeder.take() {
                feeder.abort();
            }
            let stderr = match self.stderr.take() {
                Some(task) => task.await.unwrap_or_default(),
                None => String::new(),
            };
            warn!(%status, stderr = %stderr, "transcode: encoder failed");
            return Err(StreamError::EncodeProcess(if stderr.is_empty() {
                format!("encoder exited with {}", status)
            } else {
                format!("encoder exited with {}: {}", status, stderr)
            }));
        }

        let Some(mut feeder) = self.feeder.take() else {
            return Ok(());
        };
        match timeout(self.idle_timeout, &mut feeder).await {
            Ok(Ok(Ok(fed))) => {
                debug!(fed, "transcode: source fully fed");
                Ok(())
            }
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(e)) => Err(StreamError::EncodeProcess(format!("feeder task failed: {}", e))),
            Err(_) => {
                feeder.abort();
                Err(StreamError::Timeout(format!(
                    "source stalled for {:?} after the encoder exited",
                    self.idle_timeout
                )))
            }
        }
    }

    /// Kills the encoder and stops pumping the source.
    pub async fn abort(&mut self) {
        self.finished = true;
        if let Some(feeder) = self.feeder.take() {
            feeder.abort();
        }
        if let Err(e) = self.child.kill().await {
            debug!(error = %e, "transcode: kill failed (already exited?)");
        }
    }
}

impl Drop for TranscodeJob {
    fn drop(&mut self) {
        if let Some(feeder) = self.feeder.take() {
            feeder.abort();
        }
        if let Some(stderr) = self.stderr.take() {
            stderr.abort();
        }
    }
}
