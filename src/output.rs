use std::fmt::Write as _;
use std::io::{self, Write};

use clap::ValueEnum;
use serde::Serialize;

use crate::app::{DownloadResult, ListResult};
use crate::progress::{ProgressEvent, ProgressSink, bytes_to_human};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

/// How `list` renders the selected files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// One line per file.
    #[default]
    Plain,
    /// Files grouped under their dataset.
    Grouped,
    Json,
}

impl OutputFormat {
    pub fn render(self, result: &ListResult) -> Result<String, serde_json::Error> {
        match self {
            OutputFormat::Plain => Ok(render_plain(result)),
            OutputFormat::Grouped => Ok(render_grouped(result)),
            OutputFormat::Json => serde_json::to_string_pretty(result),
        }
    }
}

fn render_plain(result: &ListResult) -> String {
    let mut out = String::new();
    for entry in &result.files {
        let _ = writeln!(
            out,
            "{}\t{}\t{}\t{:>10}\t{}",
            entry.sample,
            entry.dataset,
            entry.registered_at,
            bytes_to_human(entry.length),
            entry.path
        );
    }
    push_failed_roots(&mut out, result);
    out
}

fn render_grouped(result: &ListResult) -> String {
    let mut out = String::new();
    let mut current: Option<&str> = None;
    for entry in &result.files {
        if current != Some(entry.dataset.as_str()) {
            if current.is_some() {
                out.push('\n');
            }
            let _ = writeln!(
                out,
                "{} ({}, registered {})",
                entry.dataset, entry.sample, entry.registered_at
            );
            current = Some(entry.dataset.as_str());
        }
        let _ = writeln!(
            out,
            "  {:>10}  {}  {}",
            bytes_to_human(entry.length),
            entry.crc32,
            entry.path
        );
    }
    push_failed_roots(&mut out, result);
    out
}

fn push_failed_roots(out: &mut String, result: &ListResult) {
    for failure in &result.failed_roots {
        let _ = writeln!(out, "failed: {} ({})", failure.root, failure.message);
    }
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_list(result: &ListResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_download(result: &DownloadResult) -> io::Result<()> {
        #[derive(Serialize)]
        struct Envelope<'a> {
            summary: String,
            succeeded: usize,
            failed: usize,
            #[serde(flatten)]
            result: &'a DownloadResult,
        }
        Self::print_json(&Envelope {
            summary: result.summary(),
            succeeded: result.succeeded(),
            failed: result.failed(),
            result,
        })
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}
