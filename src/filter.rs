use regex::Regex;

use crate::domain::RemoteFile;
use crate::error::KiraError;

/// Suffix and full-path pattern criteria. Both must hold when both are set.
#[derive(Debug, Clone, Default)]
pub struct FileFilter {
    suffixes: Vec<String>,
    pattern: Option<Regex>,
}

impl FileFilter {
    /// Compiles `pattern` up front so a bad expression fails before any
    /// network call.
    pub fn new<S: AsRef<str>>(suffixes: &[S], pattern: Option<&str>) -> Result<Self, KiraError> {
        let suffixes = suffixes
            .iter()
            .map(|suffix| suffix.as_ref().trim().to_ascii_lowercase())
            .filter(|suffix| !suffix.is_empty())
            .collect();
        let pattern = pattern
            .map(|pattern| {
                Regex::new(&format!("^(?:{pattern})$"))
                    .map_err(|err| KiraError::InvalidPattern(format!("{pattern}: {err}")))
            })
            .transpose()?;
        Ok(Self { suffixes, pattern })
    }

    pub fn is_empty(&self) -> bool {
        self.suffixes.is_empty() && self.pattern.is_none()
    }

    pub fn matches(&self, file: &RemoteFile) -> bool {
        if file.directory {
            return false;
        }
        if !self.suffixes.is_empty() {
            let name = file.name().to_ascii_lowercase();
            if !self.suffixes.iter().any(|suffix| name.ends_with(suffix)) {
                return false;
            }
        }
        match &self.pattern {
            Some(pattern) => pattern.is_match(&file.path),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::domain::FilePermId;

    fn file(path: &str, directory: bool) -> RemoteFile {
        RemoteFile {
            perm_id: FilePermId {
                dataset: "DS1".to_string(),
                path: path.to_string(),
            },
            path: path.to_string(),
            length: 1,
            crc32: 0,
            directory,
        }
    }

    #[test]
    fn empty_filter_accepts_files_only() {
        let filter = FileFilter::new::<&str>(&[], None).unwrap();
        assert!(filter.is_empty());
        assert!(filter.matches(&file("original/a.bam", false)));
        assert!(!filter.matches(&file("original/run1", true)));
    }

    #[test]
    fn suffix_is_case_insensitive() {
        let upper = FileFilter::new(&["TXT"], None).unwrap();
        let lower = FileFilter::new(&["txt"], None).unwrap();
        for path in ["original/a.TXT", "original/a.txt"] {
            assert!(upper.matches(&file(path, false)));
            assert!(lower.matches(&file(path, false)));
        }
        assert!(!lower.matches(&file("original/txt/a.csv", false)));
    }

    #[test]
    fn pattern_requires_full_match() {
        let filter = FileFilter::new::<&str>(&[], Some(r"original/.*\.fastq\.gz")).unwrap();
        assert!(filter.matches(&file("original/run1/r1.fastq.gz", false)));
        assert!(!filter.matches(&file("copy/original/r1.fastq.gz", false)));
        assert!(!filter.matches(&file("original/r1.fastq.gz.md5", false)));
    }

    #[test]
    fn both_criteria_must_hold() {
        let filter = FileFilter::new(&[".gz"], Some(r"original/run1/.*")).unwrap();
        assert!(filter.matches(&file("original/run1/r1.fastq.gz", false)));
        assert!(!filter.matches(&file("original/run2/r1.fastq.gz", false)));
        assert!(!filter.matches(&file("original/run1/r1.fastq", false)));
    }

    #[test]
    fn invalid_pattern_fails_eagerly() {
        let err = FileFilter::new::<&str>(&[], Some("(unclosed")).unwrap_err();
        assert_matches!(err, KiraError::InvalidPattern(_));
    }
}
