use std::collections::HashSet;
use std::time::Instant;

use camino::Utf8PathBuf;
use serde::Serialize;

use crate::datastore::FileStoreClient;
use crate::domain::{FilePermId, ResolvedFile, SampleCode};
use crate::error::KiraError;
use crate::filter::FileFilter;
use crate::metadata::MetadataClient;
use crate::progress::{ProgressEvent, ProgressSink, TransferProgress};
use crate::resolver::FileResolver;
use crate::sort::sort_files;
use crate::transfer::{DownloadReport, TransferEngine};
use crate::walker::GraphWalker;

/// An identifier whose discovery or resolution failed with a connection
/// error. Other identifiers of the same run are unaffected.
#[derive(Debug, Clone, Serialize)]
pub struct RootFailure {
    pub root: SampleCode,
    pub message: String,
}

/// Files selected for a batch of identifiers, sorted newest dataset first.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub files: Vec<ResolvedFile>,
    pub samples: usize,
    pub failed_roots: Vec<RootFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListResult {
    pub files: Vec<ListEntry>,
    pub failed_roots: Vec<RootFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListEntry {
    pub root: SampleCode,
    pub sample: String,
    pub dataset: String,
    pub registered_at: String,
    pub path: String,
    pub length: u64,
    pub crc32: String,
    pub store: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlannedFile {
    pub file: FilePermId,
    pub path: Utf8PathBuf,
    pub length: u64,
}

/// A file that never reached the attempt loop, e.g. because its output path
/// was rejected.
#[derive(Debug, Clone, Serialize)]
pub struct FileError {
    pub file: FilePermId,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DownloadResult {
    pub reports: Vec<DownloadReport>,
    pub planned: Vec<PlannedFile>,
    pub errors: Vec<FileError>,
    pub failed_roots: Vec<RootFailure>,
    pub dry_run: bool,
}

impl DownloadResult {
    pub fn succeeded(&self) -> usize {
        self.reports.iter().filter(|report| report.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.reports.len() - self.succeeded() + self.errors.len()
    }

    pub fn reused(&self) -> usize {
        self.reports.iter().filter(|report| report.reused).count()
    }

    pub fn summary(&self) -> String {
        if self.dry_run {
            return format!("{} files planned", self.planned.len());
        }
        format!("{} succeeded, {} failures", self.succeeded(), self.failed())
    }

    /// True when the process should exit non-zero.
    pub fn has_failures(&self) -> bool {
        self.failed() > 0 || !self.failed_roots.is_empty()
    }
}

pub struct App<M: MetadataClient, F: FileStoreClient> {
    metadata: M,
    stores: Vec<F>,
}

impl<M: MetadataClient, F: FileStoreClient> App<M, F> {
    pub fn new(metadata: M, stores: Vec<F>) -> Self {
        Self { metadata, stores }
    }

    pub fn stores(&self) -> &[F] {
        &self.stores
    }

    /// Discovery, resolution, filtering and sorting for every identifier.
    /// Connection errors are recorded per identifier; anything else aborts.
    pub fn select(
        &self,
        roots: &[SampleCode],
        filter: &FileFilter,
        sink: &dyn ProgressSink,
    ) -> Result<Selection, KiraError> {
        let started = Instant::now();
        let mut walker = GraphWalker::new(&self.metadata);
        let resolver = FileResolver::new(&self.stores);
        let mut seen = HashSet::new();
        let mut selection = Selection::default();

        for root in roots {
            sink.event(ProgressEvent {
                message: format!("phase=Discover; sample {root}"),
                elapsed: Some(started.elapsed()),
            });
            // Samples of an identifier that fails stay unvisited for the
            // identifiers after it.
            let resolved = walker.explore(root).and_then(|walk| {
                let files = resolver.resolve_files(&walk.samples, sink)?;
                Ok((walk, files))
            });
            let files = match resolved {
                Ok((walk, files)) => {
                    walker.commit(&walk);
                    selection.samples += walk.samples.len();
                    files
                }
                Err(err) if err.is_connection() => {
                    tracing::error!(sample = %root, "skipping identifier: {err}");
                    selection.failed_roots.push(RootFailure {
                        root: root.clone(),
                        message: err.to_string(),
                    });
                    continue;
                }
                Err(err) => return Err(err),
            };
            for file in files {
                if !filter.matches(&file.file) {
                    continue;
                }
                if seen.insert(file.file.perm_id.clone()) {
                    selection.files.push(file);
                }
            }
        }

        sort_files(&mut selection.files);
        sink.event(ProgressEvent {
            message: format!(
                "phase=Select; {} files from {} samples",
                selection.files.len(),
                selection.samples
            ),
            elapsed: Some(started.elapsed()),
        });
        Ok(selection)
    }

    pub fn list(
        &self,
        roots: &[SampleCode],
        filter: &FileFilter,
        sink: &dyn ProgressSink,
    ) -> Result<ListResult, KiraError> {
        let selection = self.select(roots, filter, sink)?;
        let files = selection
            .files
            .iter()
            .map(|file| ListEntry {
                root: file.root.clone(),
                sample: file.sample_code().to_string(),
                dataset: file.dataset.perm_id.clone(),
                registered_at: file.dataset.registered_at.to_rfc3339(),
                path: file.file.path.clone(),
                length: file.file.length,
                crc32: format!("{:08x}", file.file.crc32),
                store: self
                    .stores
                    .get(file.store)
                    .map(|store| store.name().to_string())
                    .unwrap_or_default(),
            })
            .collect();
        Ok(ListResult {
            files,
            failed_roots: selection.failed_roots,
        })
    }

    /// Transfers every selected file in sorted order. A failing file never
    /// stops the ones after it.
    pub fn download(
        &self,
        roots: &[SampleCode],
        filter: &FileFilter,
        engine: &TransferEngine,
        dry_run: bool,
        progress: &mut dyn TransferProgress,
        sink: &dyn ProgressSink,
    ) -> Result<DownloadResult, KiraError> {
        let selection = self.select(roots, filter, sink)?;
        let mut result = DownloadResult {
            failed_roots: selection.failed_roots,
            dry_run,
            ..DownloadResult::default()
        };

        let total = selection.files.len();
        for (index, file) in selection.files.iter().enumerate() {
            if dry_run {
                match engine.output_path(file) {
                    Ok(path) => result.planned.push(PlannedFile {
                        file: file.file.perm_id.clone(),
                        path,
                        length: file.file.length,
                    }),
                    Err(err) => result.errors.push(FileError {
                        file: file.file.perm_id.clone(),
                        message: err.to_string(),
                    }),
                }
                continue;
            }

            sink.event(ProgressEvent {
                message: format!("phase=Transfer; {}/{total} {}", index + 1, file.file.perm_id),
                elapsed: None,
            });
            let outcome = match self.stores.get(file.store) {
                Some(store) => engine.transfer(file, store, progress),
                None => Err(KiraError::ServiceContract(format!(
                    "no data store at index {} for {}",
                    file.store, file.file.perm_id
                ))),
            };
            match outcome {
                Ok(report) => result.reports.push(report),
                Err(err) => {
                    tracing::error!(file = %file.file.perm_id, "{err}");
                    result.errors.push(FileError {
                        file: file.file.perm_id.clone(),
                        message: err.to_string(),
                    });
                }
            }
        }

        tracing::info!("{}", result.summary());
        Ok(result)
    }
}
