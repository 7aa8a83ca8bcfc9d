use std::collections::{HashMap, HashSet};

use crate::datastore::FileStoreClient;
use crate::domain::{DatasetRecord, ResolvedFile, SampleCode};
use crate::error::KiraError;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::walker::DiscoveredSample;

/// Looks up the files of discovered datasets on every configured store.
pub struct FileResolver<'a, F: FileStoreClient> {
    stores: &'a [F],
}

impl<'a, F: FileStoreClient> FileResolver<'a, F> {
    pub fn new(stores: &'a [F]) -> Self {
        Self { stores }
    }

    /// Returns the leaf files of every dataset owned by `samples`, each joined
    /// to its dataset. A file the service attributes to a dataset that was not
    /// discovered is a contract violation and aborts resolution.
    pub fn resolve_files(
        &self,
        samples: &[DiscoveredSample],
        sink: &dyn ProgressSink,
    ) -> Result<Vec<ResolvedFile>, KiraError> {
        let mut known: HashMap<&str, (&DatasetRecord, &SampleCode)> = HashMap::new();
        for sample in samples {
            for dataset in &sample.datasets {
                known
                    .entry(dataset.perm_id.as_str())
                    .or_insert((dataset, &sample.root));
            }
        }

        let mut queried = HashSet::new();
        let mut seen = HashSet::new();
        let mut files = Vec::new();
        for sample in samples {
            for dataset in &sample.datasets {
                if !queried.insert(dataset) {
                    continue;
                }
                sink.event(ProgressEvent {
                    message: format!(
                        "phase=Resolve; dataset {} of {}",
                        dataset.perm_id, dataset.sample_code
                    ),
                    elapsed: None,
                });

                for (store_index, store) in self.stores.iter().enumerate() {
                    let listed = store.list_files(&dataset.perm_id)?;
                    tracing::debug!(
                        dataset = %dataset.perm_id,
                        store = store.name(),
                        entries = listed.len(),
                        "listed files"
                    );
                    for file in listed {
                        if file.directory {
                            continue;
                        }
                        let (owner, root) = if file.dataset_perm_id() == dataset.perm_id {
                            (dataset, &sample.root)
                        } else {
                            known.get(file.dataset_perm_id()).copied().ok_or_else(|| {
                                KiraError::ServiceContract(format!(
                                    "store {} returned {} for unknown dataset {} while listing {}",
                                    store.name(),
                                    file.path,
                                    file.dataset_perm_id(),
                                    dataset.perm_id
                                ))
                            })?
                        };
                        if !seen.insert(file.perm_id.clone()) {
                            continue;
                        }
                        files.push(ResolvedFile {
                            file,
                            dataset: owner.clone(),
                            root: root.clone(),
                            store: store_index,
                        });
                    }
                }
            }
        }
        Ok(files)
    }
}
