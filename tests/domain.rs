use std::path::Path;

use assert_matches::assert_matches;

use kira_sample_fetch::domain::{
    SampleCode, collect_sample_codes, load_identifier_file, parse_sample_codes,
};
use kira_sample_fetch::error::{ErrorKind, KiraError};

#[test]
fn parse_sample_code_valid() {
    let code: SampleCode = "pat-0042".parse().unwrap();
    assert_eq!(code.as_str(), "PAT-0042");
    assert_eq!(code.to_string(), "PAT-0042");
}

#[test]
fn parse_sample_code_invalid() {
    for value in ["", "  ", "S1", "A B C", "S1/child", "/SPACE/S01", "S01\"", "S01*"] {
        let err = value.parse::<SampleCode>().unwrap_err();
        assert_matches!(err, KiraError::InvalidSampleCode(_));
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}

#[test]
fn parse_sample_code_accepts_code_alphabet() {
    let code: SampleCode = " bio_01-a.2 ".parse().unwrap();
    assert_eq!(code.as_str(), "BIO_01-A.2");
}

#[test]
fn duplicates_keep_first_occurrence() {
    let codes = parse_sample_codes(["s01", "S02", "S01 ", "s03"]).unwrap();
    let codes: Vec<_> = codes.iter().map(SampleCode::as_str).collect();
    assert_eq!(codes, vec!["S01", "S02", "S03"]);
}

#[test]
fn identifier_file_skips_comments_and_blanks() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("ids.txt");
    std::fs::write(&path, "# batch 7\nS01\n\n  s02  \n# done\n").unwrap();

    let codes = load_identifier_file(&path).unwrap();
    assert_eq!(codes.len(), 2);
    assert_eq!(codes[1].as_str(), "S02");
}

#[test]
fn identifier_file_without_codes_is_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("ids.txt");
    std::fs::write(&path, "# nothing here\n\n").unwrap();

    let err = load_identifier_file(&path).unwrap_err();
    assert_matches!(err, KiraError::IdentifierFile { .. });
}

#[test]
fn identifier_file_with_short_code_fails_eagerly() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("ids.txt");
    std::fs::write(&path, "S01\nX\n").unwrap();

    let err = load_identifier_file(&path).unwrap_err();
    assert_matches!(err, KiraError::InvalidSampleCode(_));
}

#[test]
fn ids_and_id_file_are_exclusive() {
    let ids = vec!["S01".to_string()];
    let err = collect_sample_codes(&ids, Some(Path::new("ids.txt"))).unwrap_err();
    assert_matches!(err, KiraError::ConflictingInputs(_));

    let err = collect_sample_codes(&[], None).unwrap_err();
    assert_matches!(err, KiraError::ConflictingInputs(_));

    let codes = collect_sample_codes(&ids, None).unwrap();
    assert_eq!(codes.len(), 1);
}
