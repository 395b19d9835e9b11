//! Streaming asset download.
//!
//! The body is streamed into a temporary file next to the destination. The
//! optional compression pass rewrites that same file, which is then renamed
//! into place. The temporary file is removed on every failure path, and each
//! retry starts from a new one.

use std::fs;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::time::Duration;

use tempfile::NamedTempFile;
use tracing::debug;

use crate::compress::{Compressor, compress_or_original};
use crate::error::{DownloadError, TransportError};
use crate::format::ImageFormat;
use crate::http::{HttpRequest, HttpResponse, RetryPolicy, RetryingClient, Transport};

const COPY_BUF_SIZE: usize = 64 * 1024;

/// A file written by [`AssetDownloader::fetch_and_place`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placed {
    /// Size of the final file.
    pub bytes_written: u64,
    /// Whether the compressor output was kept.
    pub compressed: bool,
}

/// Downloads rendered images to their output paths.
pub struct AssetDownloader<'a, T> {
    http: &'a RetryingClient<T>,
    policy: &'a RetryPolicy,
    timeout: Duration,
    compressor: Option<&'a dyn Compressor>,
}

impl<'a, T: Transport> AssetDownloader<'a, T> {
    /// Create a downloader.
    ///
    /// `policy` should only retry connection failures: a render URL that
    /// answers with an error status is not going to recover.
    pub fn new(http: &'a RetryingClient<T>, policy: &'a RetryPolicy, timeout: Duration) -> Self {
        Self {
            http,
            policy,
            timeout,
            compressor: None,
        }
    }

    /// Use `compressor` for downloads that request compression.
    #[must_use]
    pub fn with_compressor(mut self, compressor: Option<&'a dyn Compressor>) -> Self {
        self.compressor = compressor;
        self
    }

    /// Download `url` to `destination`.
    ///
    /// Parent directories are created once the server has answered with a
    /// success status. A connection lost while the body streams in is
    /// retried like a failed request, into a fresh temporary file. When
    /// `compress` is set and a compressor is configured, the downloaded bytes
    /// go through [`compress_or_original`] before the file is finalized.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError`] if the request fails after retries, the
    /// response is not a success, or the file cannot be written.
    pub fn fetch_and_place(
        &self,
        url: &str,
        destination: &Path,
        format: ImageFormat,
        compress: bool,
    ) -> Result<Placed, DownloadError> {
        let request = HttpRequest::get(url).timeout(self.timeout);
        let mut temp = self
            .http
            .send_with(&request, self.policy, |response| receive(response, destination))?;

        let mut compressed = false;
        if compress && let Some(compressor) = self.compressor {
            compressed = self
                .compress_in_place(&mut temp, compressor, format)
                .map_err(|e| io_error(temp.path(), e))?;
        }

        temp.as_file().sync_all().map_err(|e| io_error(temp.path(), e))?;
        temp.persist(destination)
            .map_err(|e| io_error(destination, e.error))?;

        let bytes_written = fs::metadata(destination)
            .map_err(|e| io_error(destination, e))?
            .len();
        debug!(url, path = %destination.display(), bytes_written, compressed, "Asset placed");

        Ok(Placed {
            bytes_written,
            compressed,
        })
    }

    /// Replace the temp file's content with the compressor's output.
    fn compress_in_place(
        &self,
        temp: &mut NamedTempFile,
        compressor: &dyn Compressor,
        format: ImageFormat,
    ) -> io::Result<bool> {
        let file = temp.as_file_mut();
        let mut original = Vec::new();
        file.seek(SeekFrom::Start(0))?;
        file.read_to_end(&mut original)?;

        let outcome = compress_or_original(original, Some(compressor), format);
        if outcome.compressed {
            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&outcome.bytes)?;
        }
        Ok(outcome.compressed)
    }
}

/// Stream a success response into a new temporary file next to `destination`.
///
/// Read errors come from the connection and are reported as transport
/// errors; write errors are local I/O errors.
fn receive(response: HttpResponse, destination: &Path) -> Result<NamedTempFile, DownloadError> {
    if !response.is_success() {
        return Err(response.into_error().into());
    }

    let parent = destination.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
    let mut temp = tempfile::Builder::new()
        .prefix(".figdl-")
        .suffix(".part")
        .tempfile_in(parent)
        .map_err(|e| io_error(parent, e))?;

    let mut body = response.into_reader();
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    loop {
        let n = match body.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(TransportError::from_io(&e).into()),
        };
        temp.as_file_mut()
            .write_all(&buf[..n])
            .map_err(|e| io_error(temp.path(), e))?;
    }
    Ok(temp)
}

fn io_error(path: &Path, source: io::Error) -> DownloadError {
    DownloadError::Io {
        path: path.to_path_buf(),
        source,
    }
}
