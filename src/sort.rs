use std::cmp::Ordering;

use crate::domain::ResolvedFile;

/// Newest dataset first, then remote path ignoring ASCII case. The file
/// permanent ID breaks any remaining tie so the order is total.
pub fn compare_files(a: &ResolvedFile, b: &ResolvedFile) -> Ordering {
    b.dataset
        .registered_at
        .cmp(&a.dataset.registered_at)
        .then_with(|| cmp_ignore_ascii_case(&a.file.path, &b.file.path))
        .then_with(|| a.file.perm_id.cmp(&b.file.perm_id))
}

pub fn sort_files(files: &mut [ResolvedFile]) {
    files.sort_by(compare_files);
}

fn cmp_ignore_ascii_case(a: &str, b: &str) -> Ordering {
    a.bytes()
        .map(|byte| byte.to_ascii_lowercase())
        .cmp(b.bytes().map(|byte| byte.to_ascii_lowercase()))
}
