use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Read};
use std::sync::Mutex;

use assert_matches::assert_matches;
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{TimeZone, Utc};

use kira_sample_fetch::app::App;
use kira_sample_fetch::datastore::FileStoreClient;
use kira_sample_fetch::domain::{FilePermId, RemoteFile, SampleCode, SampleTree};
use kira_sample_fetch::error::KiraError;
use kira_sample_fetch::filter::FileFilter;
use kira_sample_fetch::layout::OutputLayout;
use kira_sample_fetch::metadata::MetadataClient;
use kira_sample_fetch::output::JsonOutput;
use kira_sample_fetch::progress::SilentProgress;
use kira_sample_fetch::transfer::{MismatchLog, TransferEngine, TransferSettings};

#[derive(Default)]
struct MockMetadata {
    trees: HashMap<String, SampleTree>,
    calls: Mutex<usize>,
}

impl MetadataClient for MockMetadata {
    fn search_samples_by_code(&self, code: &SampleCode) -> Result<SampleTree, KiraError> {
        *self.calls.lock().unwrap() += 1;
        if code.as_str().starts_with("DOWN") {
            return Err(KiraError::MetadataStatus {
                status: 503,
                message: "maintenance".to_string(),
            });
        }
        Ok(self.trees.get(code.as_str()).cloned().unwrap_or_default())
    }
}

#[derive(Default)]
struct MockStore {
    name: String,
    listings: HashMap<String, Vec<RemoteFile>>,
    contents: HashMap<FilePermId, Vec<u8>>,
    downloads: Mutex<Vec<FilePermId>>,
    failing_listings: HashSet<String>,
}

impl MockStore {
    fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    fn with_file(mut self, dataset: &str, path: &str, content: &[u8]) -> Self {
        let file = remote(dataset, path, content);
        self.contents.insert(file.perm_id.clone(), content.to_vec());
        self.listings.entry(dataset.to_string()).or_default().push(file);
        self
    }

    fn with_directory(mut self, dataset: &str, path: &str) -> Self {
        let mut entry = remote(dataset, path, b"");
        entry.directory = true;
        self.listings.entry(dataset.to_string()).or_default().push(entry);
        self
    }
}

impl FileStoreClient for MockStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_files(&self, dataset_perm_id: &str) -> Result<Vec<RemoteFile>, KiraError> {
        if self.failing_listings.contains(dataset_perm_id) {
            return Err(KiraError::DataStoreHttp(format!(
                "connection reset while listing {dataset_perm_id}"
            )));
        }
        Ok(self.listings.get(dataset_perm_id).cloned().unwrap_or_default())
    }

    fn download_file(&self, file: &FilePermId) -> Result<Box<dyn Read + Send>, KiraError> {
        self.downloads.lock().unwrap().push(file.clone());
        let content = self
            .contents
            .get(file)
            .cloned()
            .ok_or_else(|| KiraError::DataStoreStatus {
                status: 404,
                message: file.to_string(),
            })?;
        Ok(Box::new(Cursor::new(content)))
    }
}

fn remote(dataset: &str, path: &str, content: &[u8]) -> RemoteFile {
    RemoteFile {
        perm_id: FilePermId {
            dataset: dataset.to_string(),
            path: path.to_string(),
        },
        path: path.to_string(),
        length: content.len() as u64,
        crc32: crc32fast::hash(content),
        directory: false,
    }
}

fn code(value: &str) -> SampleCode {
    value.parse().unwrap()
}

/// `PAT01` owns `DS-OLD`; its child `BIO01` owns the newer `DS-NEW`.
fn patient_metadata() -> MockMetadata {
    let mut tree = SampleTree::new();
    let patient = tree.push("PAT01", "PATIENT");
    let biopsy = tree.push("BIO01", "BIOPSY");
    tree.add_root(patient);
    tree.add_child(patient, biopsy);
    tree.add_dataset(
        patient,
        "DS-OLD",
        Utc.with_ymd_and_hms(2023, 5, 1, 8, 0, 0).unwrap(),
    );
    tree.add_dataset(
        biopsy,
        "DS-NEW",
        Utc.with_ymd_and_hms(2024, 2, 1, 8, 0, 0).unwrap(),
    );

    let mut metadata = MockMetadata::default();
    metadata.trees.insert("PAT01".to_string(), tree);
    metadata
}

fn patient_store() -> MockStore {
    MockStore::named("DSS1")
        .with_file("DS-OLD", "original/a.fastq.gz", b"old reads")
        .with_directory("DS-NEW", "original/run1")
        .with_file("DS-NEW", "original/run1/b.fastq.gz", b"new reads")
        .with_file("DS-NEW", "original/run1/notes.txt", b"free text")
}

/// `RA1` and `RB1` both parent `SHARED`; the listing of `DS-A` fails.
fn shared_child_app() -> App<MockMetadata, MockStore> {
    let registered = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
    let mut metadata = MockMetadata::default();
    for (root, dataset) in [("RA1", "DS-A"), ("RB1", "DS-B")] {
        let mut tree = SampleTree::new();
        let parent = tree.push(root, "PATIENT");
        let shared = tree.push("SHARED", "BIOPSY");
        tree.add_root(parent);
        tree.add_child(parent, shared);
        tree.add_dataset(parent, dataset, registered);
        tree.add_dataset(shared, "DS-S", registered);
        metadata.trees.insert(root.to_string(), tree);
    }

    let mut store = MockStore::named("DSS1")
        .with_file("DS-A", "original/a.txt", b"a")
        .with_file("DS-B", "original/b.txt", b"b")
        .with_file("DS-S", "original/s.txt", b"s");
    store.failing_listings.insert("DS-A".to_string());
    App::new(metadata, vec![store])
}

fn engine(root: &Utf8Path) -> TransferEngine {
    TransferEngine::new(
        OutputLayout::new(root.join("out"), false),
        TransferSettings::default(),
        MismatchLog::in_dir(&root.join("logs")),
    )
}

fn scratch() -> (tempfile::TempDir, Utf8PathBuf) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    (temp, root)
}

#[test]
fn end_to_end_two_roots_one_empty() {
    let (_temp, root) = scratch();
    let app = App::new(patient_metadata(), vec![patient_store()]);
    let filter = FileFilter::new(&[".FASTQ.GZ"], None).unwrap();

    let result = app
        .download(
            &[code("NOTHING"), code("PAT01")],
            &filter,
            &engine(&root),
            false,
            &mut SilentProgress,
            &JsonOutput,
        )
        .unwrap();

    let paths: Vec<_> = result.reports.iter().map(|r| r.path.clone()).collect();
    assert_eq!(
        paths,
        vec![
            root.join("out/BIO01/b.fastq.gz"),
            root.join("out/PAT01/a.fastq.gz"),
        ]
    );
    assert_eq!(result.summary(), "2 succeeded, 0 failures");
    assert!(!result.has_failures());
    assert!(result.failed_roots.is_empty());
    assert_eq!(
        std::fs::read(root.join("out/BIO01/b.fastq.gz").as_std_path()).unwrap(),
        b"new reads"
    );
    assert!(!root.join("out/BIO01/notes.txt").as_std_path().exists());
}

#[test]
fn rerun_reuses_everything() {
    let (_temp, root) = scratch();
    let app = App::new(patient_metadata(), vec![patient_store()]);
    let filter = FileFilter::default();
    let engine = engine(&root);
    let roots = [code("PAT01")];

    app.download(&roots, &filter, &engine, false, &mut SilentProgress, &JsonOutput)
        .unwrap();
    let again = app
        .download(&roots, &filter, &engine, false, &mut SilentProgress, &JsonOutput)
        .unwrap();

    assert_eq!(again.reused(), 3);
    assert_eq!(app.stores()[0].downloads.lock().unwrap().len(), 3);
}

#[test]
fn connection_error_only_skips_its_identifier() {
    let (_temp, root) = scratch();
    let app = App::new(patient_metadata(), vec![patient_store()]);
    let filter = FileFilter::new::<&str>(&[], Some(r"original/.*\.fastq\.gz")).unwrap();

    let result = app
        .download(
            &[code("DOWN1"), code("PAT01")],
            &filter,
            &engine(&root),
            false,
            &mut SilentProgress,
            &JsonOutput,
        )
        .unwrap();

    assert_eq!(result.failed_roots.len(), 1);
    assert_eq!(result.failed_roots[0].root.as_str(), "DOWN1");
    assert_eq!(result.succeeded(), 2);
    assert!(result.has_failures());
}

#[test]
fn files_for_unknown_dataset_abort_selection() {
    let mut store = MockStore::named("DSS1")
        .with_file("DS-OLD", "original/a.fastq.gz", b"old reads")
        .with_file("DS-NEW", "original/b.fastq.gz", b"new reads");
    let stray = remote("DS-GHOST", "original/ghost.txt", b"boo");
    store.listings.get_mut("DS-OLD").unwrap().push(stray);

    let app = App::new(patient_metadata(), vec![store]);
    let err = app
        .select(&[code("PAT01")], &FileFilter::default(), &JsonOutput)
        .unwrap_err();
    assert_matches!(err, KiraError::ServiceContract(_));
}

#[test]
fn files_are_unioned_across_stores() {
    let first = MockStore::named("DSS1").with_file("DS-OLD", "original/a.fastq.gz", b"old reads");
    let second = MockStore::named("DSS2").with_file("DS-NEW", "original/b.fastq.gz", b"new reads");
    let app = App::new(patient_metadata(), vec![first, second]);

    let listed = app
        .list(&[code("PAT01")], &FileFilter::default(), &JsonOutput)
        .unwrap();
    let stores: Vec<_> = listed.files.iter().map(|f| f.store.as_str()).collect();
    assert_eq!(stores, vec!["DSS2", "DSS1"]);
    assert_eq!(listed.files[0].sample, "BIO01");
    assert_eq!(listed.files[0].root.as_str(), "PAT01");
}

#[test]
fn same_root_twice_is_selected_once() {
    let app = App::new(patient_metadata(), vec![patient_store()]);
    let selection = app
        .select(
            &[code("PAT01"), code("PAT01")],
            &FileFilter::default(),
            &JsonOutput,
        )
        .unwrap();
    assert_eq!(selection.files.len(), 3);
}

#[test]
fn dry_run_plans_without_writing() {
    let (_temp, root) = scratch();
    let app = App::new(patient_metadata(), vec![patient_store()]);

    let result = app
        .download(
            &[code("PAT01")],
            &FileFilter::default(),
            &engine(&root),
            true,
            &mut SilentProgress,
            &JsonOutput,
        )
        .unwrap();

    assert_eq!(result.planned.len(), 3);
    assert!(result.reports.is_empty());
    assert_eq!(result.summary(), "3 files planned");
    assert!(!root.join("out").as_std_path().exists());
    assert!(app.stores()[0].downloads.lock().unwrap().is_empty());
}

#[test]
fn missing_remote_file_fails_alone() {
    let (_temp, root) = scratch();
    let mut store = patient_store();
    let missing = FilePermId {
        dataset: "DS-OLD".to_string(),
        path: "original/a.fastq.gz".to_string(),
    };
    store.contents.remove(&missing);
    let app = App::new(patient_metadata(), vec![store]);

    let result = app
        .download(
            &[code("PAT01")],
            &FileFilter::default(),
            &engine(&root),
            false,
            &mut SilentProgress,
            &JsonOutput,
        )
        .unwrap();

    assert_eq!(result.summary(), "2 succeeded, 1 failures");
    assert!(result.has_failures());
    let failed = result.reports.iter().find(|r| !r.is_success()).unwrap();
    assert_eq!(failed.file, missing);
    assert_eq!(failed.attempts, TransferSettings::default().max_attempts);
}

#[test]
fn store_connection_error_skips_identifier_without_hiding_shared_samples() {
    let app = shared_child_app();

    let selection = app
        .select(&[code("RA1"), code("RB1")], &FileFilter::default(), &JsonOutput)
        .unwrap();

    let failed: Vec<_> = selection.failed_roots.iter().map(|f| f.root.as_str()).collect();
    assert_eq!(failed, vec!["RA1"]);
    let mut datasets: Vec<_> = selection
        .files
        .iter()
        .map(|f| f.dataset.perm_id.as_str())
        .collect();
    datasets.sort();
    assert_eq!(datasets, vec!["DS-B", "DS-S"]);
    assert!(selection.files.iter().all(|f| f.root.as_str() == "RB1"));
    assert_eq!(selection.samples, 2);
}

#[test]
fn store_connection_error_after_shared_samples_were_resolved() {
    let (_temp, root) = scratch();
    let app = shared_child_app();

    let result = app
        .download(
            &[code("RB1"), code("RA1")],
            &FileFilter::default(),
            &engine(&root),
            false,
            &mut SilentProgress,
            &JsonOutput,
        )
        .unwrap();

    assert_eq!(result.failed_roots.len(), 1);
    assert_eq!(result.failed_roots[0].root.as_str(), "RA1");
    assert_eq!(result.summary(), "2 succeeded, 0 failures");
    assert!(result.has_failures());
    assert!(root.join("out/SHARED/s.txt").as_std_path().exists());
    assert!(root.join("out/RB1/b.txt").as_std_path().exists());
}
