use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};

use camino::{Utf8Path, Utf8PathBuf};
use crc32fast::Hasher;
use serde::Serialize;

use crate::config::{DEFAULT_BUFFER_SIZE, DEFAULT_MAX_ATTEMPTS};
use crate::datastore::FileStoreClient;
use crate::domain::{FilePermId, RemoteFile, ResolvedFile};
use crate::error::KiraError;
use crate::layout::OutputLayout;
use crate::progress::TransferProgress;

pub const SIDECAR_EXTENSION: &str = "crc32";
pub const MISMATCH_LOG_FILE: &str = "checksum-mismatch.log";

#[derive(Debug, Clone)]
pub struct TransferSettings {
    pub buffer_size: usize,
    pub max_attempts: u32,
    /// Accept a sidecar checksum without re-reading the local file.
    pub trust_sidecar: bool,
    /// Download even when a valid local copy exists.
    pub force: bool,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            trust_sidecar: false,
            force: false,
        }
    }
}

/// Outcome of one file's attempt sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadReport {
    pub file: FilePermId,
    pub path: Utf8PathBuf,
    pub expected: u32,
    /// Checksum of the last complete stream; `None` when no attempt finished.
    pub actual: Option<u32>,
    pub attempts: u32,
    /// The local copy was already valid and nothing was downloaded.
    pub reused: bool,
    pub error: Option<String>,
}

impl DownloadReport {
    pub fn is_success(&self) -> bool {
        self.actual == Some(self.expected)
    }
}

/// Append-only record of files that failed verification on every attempt.
#[derive(Debug, Clone)]
pub struct MismatchLog {
    path: Utf8PathBuf,
}

impl MismatchLog {
    pub fn in_dir(logs_dir: &Utf8Path) -> Self {
        Self {
            path: logs_dir.join(MISMATCH_LOG_FILE),
        }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Writes the whole line with one `write_all` on an append-mode handle, so
    /// concurrent runs interleave whole lines.
    pub fn append(&self, report: &DownloadReport) -> Result<(), KiraError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| KiraError::Filesystem(format!("create {parent}: {err}")))?;
        }
        let actual = report
            .actual
            .map(|crc| format!("{crc:08x}"))
            .unwrap_or_else(|| "-".to_string());
        let line = format!(
            "{}\t{:08x}\t{actual}\t{}\n",
            chrono::Utc::now().to_rfc3339(),
            report.expected,
            report.path
        );
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path.as_std_path())
            .map_err(|err| KiraError::Filesystem(format!("open {}: {err}", self.path)))?;
        file.write_all(line.as_bytes())
            .map_err(|err| KiraError::Filesystem(format!("write {}: {err}", self.path)))
    }
}

pub struct TransferEngine {
    layout: OutputLayout,
    settings: TransferSettings,
    mismatch_log: MismatchLog,
}

impl TransferEngine {
    pub fn new(layout: OutputLayout, settings: TransferSettings, mismatch_log: MismatchLog) -> Self {
        Self {
            layout,
            settings,
            mismatch_log,
        }
    }

    pub fn output_path(&self, file: &ResolvedFile) -> Result<Utf8PathBuf, KiraError> {
        self.layout.resolve(&file.file.path, file.sample_code())
    }

    /// Runs the full state machine for one file. `Err` is returned only when
    /// the output path cannot be prepared; download and verification failures
    /// end in a failed report instead.
    pub fn transfer<F: FileStoreClient + ?Sized>(
        &self,
        file: &ResolvedFile,
        store: &F,
        progress: &mut dyn TransferProgress,
    ) -> Result<DownloadReport, KiraError> {
        let path = self.layout.prepare(&file.file.path, file.sample_code())?;
        let expected = file.file.crc32;

        if !self.settings.force && self.existing_checksum(&path, &file.file) == Some(expected) {
            tracing::info!(path = %path, "valid local copy, skipping download");
            return Ok(DownloadReport {
                file: file.file.perm_id.clone(),
                path,
                expected,
                actual: Some(expected),
                attempts: 0,
                reused: true,
                error: None,
            });
        }

        let max_attempts = self.settings.max_attempts.max(1);
        let mut last_actual = None;
        let mut last_error = None;
        for attempt in 1..=max_attempts {
            progress.start(file.file.name(), file.file.length);
            let outcome = self.attempt(file, store, &path, progress);
            progress.finish();

            match outcome {
                Ok(actual) if actual == expected => {
                    if let Err(err) = write_sidecar(&path, actual) {
                        tracing::warn!(path = %path, "could not write checksum sidecar: {err}");
                    }
                    tracing::info!(path = %path, attempt, "downloaded");
                    return Ok(DownloadReport {
                        file: file.file.perm_id.clone(),
                        path,
                        expected,
                        actual: Some(actual),
                        attempts: attempt,
                        reused: false,
                        error: None,
                    });
                }
                Ok(actual) => {
                    tracing::warn!(
                        path = %path,
                        "attempt {attempt}/{max_attempts} failed: checksum {actual:08x} != expected {expected:08x}"
                    );
                    last_actual = Some(actual);
                    last_error = Some(format!(
                        "checksum mismatch: expected {expected:08x}, got {actual:08x}"
                    ));
                }
                Err(err) => {
                    tracing::warn!(path = %path, "attempt {attempt}/{max_attempts} failed: {err}");
                    last_actual = None;
                    last_error = Some(err.to_string());
                }
            }
        }

        let report = DownloadReport {
            file: file.file.perm_id.clone(),
            path,
            expected,
            actual: last_actual,
            attempts: max_attempts,
            reused: false,
            error: last_error,
        };
        if let Err(err) = self.mismatch_log.append(&report) {
            tracing::warn!("could not append to {}: {err}", self.mismatch_log.path());
        }
        tracing::error!(path = %report.path, "giving up after {max_attempts} attempts");
        Ok(report)
    }

    /// One streaming download into `path`, truncating whatever is there.
    /// Returns the CRC32 of the bytes written.
    fn attempt<F: FileStoreClient + ?Sized>(
        &self,
        file: &ResolvedFile,
        store: &F,
        path: &Utf8Path,
        progress: &mut dyn TransferProgress,
    ) -> Result<u32, KiraError> {
        let mut reader = store.download_file(&file.file.perm_id)?;
        let mut output = File::create(path.as_std_path())
            .map_err(|err| KiraError::Filesystem(format!("create {path}: {err}")))?;
        let mut buffer = vec![0u8; self.settings.buffer_size.max(1)];
        let mut hasher = Hasher::new();
        loop {
            let read = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(read) => read,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(KiraError::Transfer(format!("read {}: {err}", file.file.perm_id))),
            };
            output
                .write_all(&buffer[..read])
                .map_err(|err| KiraError::Filesystem(format!("write {path}: {err}")))?;
            hasher.update(&buffer[..read]);
            progress.on_bytes(read as u64);
        }
        output
            .flush()
            .map_err(|err| KiraError::Filesystem(format!("flush {path}: {err}")))?;
        Ok(hasher.finalize())
    }

    /// Checksum of an existing local copy, or `None` when there is no usable
    /// copy. A size mismatch rules the file out without reading it. The
    /// sidecar is a cache: unless trusted it only gets compared with, and if
    /// needed replaced by, a fresh computation.
    fn existing_checksum(&self, path: &Utf8Path, remote: &RemoteFile) -> Option<u32> {
        let metadata = fs::metadata(path.as_std_path()).ok()?;
        if !metadata.is_file() {
            return None;
        }
        if metadata.len() != remote.length {
            tracing::debug!(path = %path, "local size differs from remote");
            return None;
        }

        let recorded = read_sidecar(path);
        if self.settings.trust_sidecar {
            if let Some(crc) = recorded {
                return Some(crc);
            }
        }

        let computed = match checksum_file(path, self.settings.buffer_size) {
            Ok(crc) => crc,
            Err(err) => {
                tracing::warn!(path = %path, "could not read local copy: {err}");
                return None;
            }
        };
        if recorded.is_some_and(|crc| crc != computed) {
            tracing::warn!(path = %path, "checksum sidecar disagrees with file contents");
        }
        if computed == remote.crc32 && recorded != Some(computed) {
            if let Err(err) = write_sidecar(path, computed) {
                tracing::warn!(path = %path, "could not write checksum sidecar: {err}");
            }
        }
        Some(computed)
    }
}

pub fn sidecar_path(path: &Utf8Path) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{path}.{SIDECAR_EXTENSION}"))
}

pub fn sidecar_line(crc: u32, name: &str) -> String {
    format!("{crc:08x}\t{name}\n")
}

/// Writes `<hex>\t<file name>` next to `path` via a temp file and rename.
pub fn write_sidecar(path: &Utf8Path, crc: u32) -> Result<(), KiraError> {
    let name = path.file_name().unwrap_or_default();
    let target = sidecar_path(path);
    let parent = target
        .parent()
        .ok_or_else(|| KiraError::Filesystem("invalid sidecar path".to_string()))?;
    let mut temp = tempfile::Builder::new()
        .prefix(".kira-sf-crc")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    temp.write_all(sidecar_line(crc, name).as_bytes())
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    temp.persist(target.as_std_path())
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    Ok(())
}

/// Reads the sidecar for `path`. Unreadable, malformed, or sidecars naming a
/// different file yield `None`.
pub fn read_sidecar(path: &Utf8Path) -> Option<u32> {
    let content = fs::read_to_string(sidecar_path(path).as_std_path()).ok()?;
    let line = content.lines().next()?;
    let (hex, name) = line.split_once('\t')?;
    if name.trim() != path.file_name()? {
        return None;
    }
    u32::from_str_radix(hex.trim(), 16).ok()
}

pub fn checksum_file(path: &Utf8Path, buffer_size: usize) -> io::Result<u32> {
    let mut file = File::open(path.as_std_path())?;
    let mut buffer = vec![0u8; buffer_size.max(1)];
    let mut hasher = Hasher::new();
    loop {
        match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => hasher.update(&buffer[..read]),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(hasher.finalize())
}
