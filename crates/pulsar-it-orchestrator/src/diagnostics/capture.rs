//! Copying container logs and directories into the artifact area.
//!
//! Captures are best-effort. Every failure is logged and swallowed so that a
//! broken diagnostic never masks the outcome of the test that triggered it.

use flate2::write::GzEncoder;
use flate2::Compression;
use futures::StreamExt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::runner::CommandRunner;
use crate::error::{OrchestratorError, Result};
use crate::runtime::ByteStream;

/// Returns the file name of the `index`-th log capture of a container.
///
/// ```
/// use pulsar_it_orchestrator::diagnostics::log_file_name;
///
/// assert_eq!(log_file_name(None), "docker.log");
/// assert_eq!(log_file_name(Some(0)), "docker.0.log");
/// ```
pub fn log_file_name(index: Option<usize>) -> String {
    match index {
        None => "docker.log".to_string(),
        Some(n) => format!("docker.{}.log", n),
    }
}

/// Turns an in-container path into a flat file-name stem.
pub fn sanitize_path(path: &str) -> String {
    path.replace('/', "-").trim_start_matches('-').to_string()
}

/// Returns the file name of the `index`-th archive of `path`.
pub fn archive_file_name(path: &str, index: Option<usize>) -> String {
    let stem = sanitize_path(path);
    match index {
        None => format!("{}.tar.gz", stem),
        Some(n) => format!("{}_{}.tar.gz", stem, n),
    }
}

/// Returns the first path in `dir` that does not exist yet, trying the
/// unsuffixed name first and then indices 0, 1, 2, ...
pub fn available_path<F>(dir: &Path, name_for: F) -> PathBuf
where
    F: Fn(Option<usize>) -> String,
{
    let candidate = dir.join(name_for(None));
    if !candidate.exists() {
        return candidate;
    }

    let mut index = 0;
    loop {
        let candidate = dir.join(name_for(Some(index)));
        if !candidate.exists() {
            return candidate;
        }
        index += 1;
    }
}

enum CaptureSink {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<File>),
}

impl CaptureSink {
    fn create(path: &Path, compress: bool) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(if compress {
            Self::Gzip(GzEncoder::new(file, Compression::default()))
        } else {
            Self::Plain(BufWriter::new(file))
        })
    }

    fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        match self {
            Self::Plain(writer) => writer.write_all(chunk),
            Self::Gzip(encoder) => encoder.write_all(chunk),
        }
    }

    fn finish(self) -> io::Result<()> {
        match self {
            Self::Plain(mut writer) => writer.flush(),
            Self::Gzip(encoder) => encoder.finish().map(drop),
        }
    }
}

async fn drain_to_file(mut stream: ByteStream, path: PathBuf, compress: bool) -> Result<u64> {
    let mut sink = CaptureSink::create(&path, compress)?;
    let mut written = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        sink.write_chunk(&chunk)?;
        written += chunk.len() as u64;
    }

    sink.finish()?;
    Ok(written)
}

impl CommandRunner {
    /// Writes the container's stdout/stderr log to
    /// `<output_root>/container-logs/<container>/docker[.<n>].log`.
    ///
    /// Returns the written path, or `None` if the capture failed.
    pub async fn dump_container_log(&self, container_id: &str) -> Option<PathBuf> {
        let stream = self.runtime().logs(container_id, false);
        self.capture(container_id, "log", stream, false, log_file_name)
            .await
    }

    /// Writes a gzip-compressed tar archive of `path` inside the container to
    /// `<output_root>/container-logs/<container>/<sanitized-path>[_<n>].tar.gz`.
    ///
    /// Returns the written path, or `None` if the capture failed.
    pub async fn dump_container_dir(&self, container_id: &str, path: &str) -> Option<PathBuf> {
        let stream = self.runtime().download(container_id, path);
        self.capture(container_id, path, stream, true, |index| {
            archive_file_name(path, index)
        })
        .await
    }

    async fn capture<F>(
        &self,
        container_id: &str,
        what: &str,
        stream: ByteStream,
        compress: bool,
        name_for: F,
    ) -> Option<PathBuf>
    where
        F: Fn(Option<usize>) -> String,
    {
        match self
            .try_capture(container_id, stream, compress, name_for)
            .await
        {
            Ok((path, bytes)) => {
                info!(
                    container = %container_id,
                    capture = %what,
                    path = %path.display(),
                    bytes,
                    "Captured diagnostics"
                );
                Some(path)
            }
            Err(e) => {
                warn!(
                    container = %container_id,
                    capture = %what,
                    error = %e,
                    "Diagnostic capture failed"
                );
                None
            }
        }
    }

    async fn try_capture<F>(
        &self,
        container_id: &str,
        stream: ByteStream,
        compress: bool,
        name_for: F,
    ) -> Result<(PathBuf, u64)>
    where
        F: Fn(Option<usize>) -> String,
    {
        let container = self.container_name(container_id).await?;
        let dir = self.output_root.join("container-logs").join(&container);
        std::fs::create_dir_all(&dir)?;
        let path = available_path(&dir, name_for);

        let mut task = tokio::spawn(drain_to_file(stream, path.clone(), compress));
        let finished = tokio::time::timeout(self.capture_timeout, &mut task).await;

        let reason = match finished {
            Ok(Ok(Ok(bytes))) => return Ok((path, bytes)),
            Ok(Ok(Err(e))) => e.to_string(),
            Ok(Err(join_error)) => join_error.to_string(),
            Err(_) => {
                task.abort();
                // Wait for the writer to drop its file handle.
                let _ = task.await;
                format!("timed out after {:?}", self.capture_timeout)
            }
        };

        // A truncated archive must not pass for a complete one.
        if let Err(e) = std::fs::remove_file(&path) {
            if e.kind() != io::ErrorKind::NotFound {
                debug!(path = %path.display(), error = %e, "Could not remove partial capture");
            }
        }

        Err(OrchestratorError::diagnostic_capture(container, reason))
    }
}
