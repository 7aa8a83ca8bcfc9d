use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::KiraError;

pub const MIN_SAMPLE_CODE_LEN: usize = 3;

/// A user-supplied sample code, trimmed and upper-cased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SampleCode(String);

impl SampleCode {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SampleCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SampleCode {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_uppercase();
        let is_valid = normalized.len() >= MIN_SAMPLE_CODE_LEN
            && normalized
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.'));
        if !is_valid {
            return Err(KiraError::InvalidSampleCode(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

/// Parses identifiers given on the command line, dropping duplicates while
/// keeping the first occurrence order.
pub fn parse_sample_codes<I, S>(values: I) -> Result<Vec<SampleCode>, KiraError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut codes = Vec::new();
    for value in values {
        let code: SampleCode = value.as_ref().parse()?;
        if seen.insert(code.clone()) {
            codes.push(code);
        }
    }
    Ok(codes)
}

/// Reads one identifier per line. Blank lines and `#` comments are skipped.
pub fn load_identifier_file(path: &Path) -> Result<Vec<SampleCode>, KiraError> {
    let content = fs::read_to_string(path).map_err(|err| KiraError::IdentifierFile {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;
    let lines = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'));
    let codes = parse_sample_codes(lines)?;
    if codes.is_empty() {
        return Err(KiraError::IdentifierFile {
            path: path.to_path_buf(),
            message: "no identifiers found".to_string(),
        });
    }
    Ok(codes)
}

/// Identifiers come either from the command line or from a file, never both.
pub fn collect_sample_codes(ids: &[String], id_file: Option<&Path>) -> Result<Vec<SampleCode>, KiraError> {
    match (ids.is_empty(), id_file) {
        (false, Some(_)) => Err(KiraError::ConflictingInputs(
            "sample codes and --id-file are mutually exclusive".to_string(),
        )),
        (true, None) => Err(KiraError::ConflictingInputs(
            "provide sample codes or --id-file".to_string(),
        )),
        (true, Some(path)) => load_identifier_file(path),
        (false, None) => parse_sample_codes(ids),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DatasetRecord {
    pub perm_id: String,
    pub sample_code: String,
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleNode {
    pub code: String,
    pub type_code: String,
    pub children: Vec<usize>,
    pub datasets: Vec<DatasetRecord>,
}

/// Arena holding one metadata response. Child links are indices into
/// `nodes`, so shared descendants and cycles never duplicate a node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleTree {
    nodes: Vec<SampleNode>,
    roots: Vec<usize>,
}

impl SampleTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, code: &str, type_code: &str) -> usize {
        self.nodes.push(SampleNode {
            code: code.to_string(),
            type_code: type_code.to_string(),
            children: Vec::new(),
            datasets: Vec::new(),
        });
        self.nodes.len() - 1
    }

    pub fn add_root(&mut self, index: usize) {
        if !self.roots.contains(&index) {
            self.roots.push(index);
        }
    }

    pub fn add_child(&mut self, parent: usize, child: usize) {
        if let Some(node) = self.nodes.get_mut(parent) {
            node.children.push(child);
        }
    }

    pub fn add_dataset(&mut self, index: usize, perm_id: &str, registered_at: DateTime<Utc>) {
        if let Some(node) = self.nodes.get_mut(index) {
            let dataset = DatasetRecord {
                perm_id: perm_id.to_string(),
                sample_code: node.code.clone(),
                registered_at,
            };
            node.datasets.push(dataset);
        }
    }

    pub fn node(&self, index: usize) -> Option<&SampleNode> {
        self.nodes.get(index)
    }

    pub fn roots(&self) -> &[usize] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Identity of a file inside a data store: owning dataset plus path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FilePermId {
    pub dataset: String,
    pub path: String,
}

impl fmt::Display for FilePermId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.dataset, self.path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteFile {
    pub perm_id: FilePermId,
    pub path: String,
    pub length: u64,
    pub crc32: u32,
    pub directory: bool,
}

impl RemoteFile {
    pub fn dataset_perm_id(&self) -> &str {
        &self.perm_id.dataset
    }

    /// Last path segment of the remote path.
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// A remote file joined with the dataset and sample that own it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedFile {
    pub file: RemoteFile,
    pub dataset: DatasetRecord,
    pub root: SampleCode,
    #[serde(skip)]
    pub store: usize,
}

impl ResolvedFile {
    pub fn sample_code(&self) -> &str {
        &self.dataset.sample_code
    }
}
