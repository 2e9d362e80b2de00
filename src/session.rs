//! Progressive reader over one cache entry.
//!
//! A [`StreamSession`] reads the entry's backing file strictly in order and
//! never past the byte count the writer has announced as flushed. When it
//! catches up with a still-growing file it parks on the episode's progress
//! channel, waking at least once per liveness interval to re-check the status.

use std::{io, path::Path, time::Duration};

use bytes::{Bytes, BytesMut};
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt},
    sync::watch,
    time::timeout,
};
use tracing::trace;

use crate::{
    cache::{CacheHandle, CacheKey, EpisodeStatus, Progress},
    error::{StreamError, StreamResult},
};

const READ_CHUNK: usize = 64 * 1024;

pub struct StreamSession {
    handle: CacheHandle,
    progress: watch::Receiver<Progress>,
    file: Option<File>,
    position: u64,
    pending: Option<Bytes>,
    liveness: Duration,
}

impl StreamSession {
    /// Binds a session to the entry behind `handle`. The handle, and with it
    /// the entry's eviction protection, lives as long as the session.
    pub fn open(handle: CacheHandle) -> Self {
        let progress = handle.subscribe();
        let liveness = handle.reader_liveness();
        Self {
            handle,
            progress,
            file: None,
            position: 0,
            pending: None,
            liveness,
        }
    }

    pub fn key(&self) -> &CacheKey {
        self.handle.key()
    }

    /// Bytes handed out so far, including a primed chunk.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Final length of the entry, once it is `Ready`.
    pub fn content_length(&self) -> Option<u64> {
        self.handle.len()
    }

    /// Waits for the first chunk (or the end of an empty entry) and keeps it
    /// for the next [`StreamSession::read`], so a failing fetch is reported
    /// before anything is sent to the client.
    pub async fn prime(&mut self) -> StreamResult<()> {
        if self.pending.is_none() {
            self.pending = self.read_next().await?;
        }
        Ok(())
    }

    /// Next chunk of the entry, `None` once the entry is `Ready` and fully read.
    ///
    /// Blocks while the writer has not flushed more bytes. A failed episode
    /// surfaces its recorded error, even when earlier bytes were delivered.
    pub async fn read(&mut self) -> StreamResult<Option<Bytes>> {
        if let Some(chunk) = self.pending.take() {
            return Ok(Some(chunk));
        }
        self.read_next().await
    }

    /// Ends the session and releases its reader hold.
    pub fn close(self) {
        drop(self);
    }

    async fn read_next(&mut self) -> StreamResult<Option<Bytes>> {
        loop {
            // never keep the watch borrow across an await
            let progress = self.progress.borrow_and_update().clone();

            if let EpisodeStatus::Failed(e) = &progress.status {
                return Err(e.clone());
            }
            if self.position < progress.written {
                let chunk = self.read_flushed(progress.written, &progress.status).await?;
                return Ok(Some(chunk));
            }
            if progress.status == EpisodeStatus::Ready {
                return Ok(None);
            }

            match timeout(self.liveness, self.progress.changed()).await {
                Ok(Ok(())) => {}
                Err(_) => trace!(key = %self.handle.key(), "session: liveness check"),
                Ok(Err(_)) => {
                    return Err(StreamError::SourceRead(
                        "fetch episode went away while streaming".into(),
                    ));
                }
            }
        }
    }

    async fn read_flushed(&mut self, written: u64, status: &EpisodeStatus) -> StreamResult<Bytes> {
        if self.file.is_none() {
            self.file = Some(self.open_backing_file(status).await?);
        }
        let Some(file) = self.file.as_mut() else {
            return Err(StreamError::Io("cache file not open".into()));
        };

        let want = (written - self.position).min(READ_CHUNK as u64) as usize;
        let mut buf = BytesMut::zeroed(want);
        let n = file.read(&mut buf).await?;
        if n == 0 {
            return Err(StreamError::Io(format!(
                "cache file for {} is shorter than the {} bytes flushed",
                self.handle.key(),
                written
            )));
        }
        buf.truncate(n);
        self.position += n as u64;
        Ok(buf.freeze())
    }

    /// Opens the file the writer is appending to. The partial file may have
    /// been renamed to its final name between two progress updates; an open
    /// descriptor survives that rename.
    async fn open_backing_file(&self, status: &EpisodeStatus) -> StreamResult<File> {
        let (first, second) = match status {
            EpisodeStatus::Ready => (self.handle.final_path(), self.handle.part_path()),
            _ => (self.handle.part_path(), self.handle.final_path()),
        };
        match open_at(first, self.position).await {
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Ok(open_at(second, self.position).await?)
            }
            other => Ok(other?),
        }
    }
}

async fn open_at(path: &Path, position: u64) -> io::Result<File> {
    let mut file = File::open(path).await?;
    if position > 0 {
        file.seek(io::SeekFrom::Start(position)).await?;
    }
    Ok(file)
}
