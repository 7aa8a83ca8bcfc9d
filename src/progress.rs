use std::io::{self, Write};
use std::time::{Duration, Instant};

use crossterm::cursor::MoveToColumn;
use crossterm::style::Print;
use crossterm::terminal::{Clear, ClearType};
use crossterm::{QueueableCommand, queue};

pub const DEFAULT_REDRAW_STEP: f64 = 0.1;

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

/// Receives pipeline phase events; purely informational.
pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Forwards phase events to the log.
pub struct LogSink;

impl ProgressSink for LogSink {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => tracing::info!("{} ({} ms)", event.message, elapsed.as_millis()),
            None => tracing::info!("{}", event.message),
        }
    }
}

/// Byte-level progress of a single file transfer. Implementations must
/// never fail; display problems are swallowed.
pub trait TransferProgress {
    fn start(&mut self, label: &str, total: u64);
    fn on_bytes(&mut self, delta: u64);
    fn finish(&mut self);
}

pub struct SilentProgress;

impl TransferProgress for SilentProgress {
    fn start(&mut self, _label: &str, _total: u64) {}
    fn on_bytes(&mut self, _delta: u64) {}
    fn finish(&mut self) {}
}

/// Decides when to redraw: once `interval` has passed since the last draw,
/// or when progress crosses the next `step` fraction of the total.
#[derive(Debug, Clone)]
pub struct Throttle {
    interval: Duration,
    step: f64,
    last: Option<Instant>,
    last_bucket: u64,
}

impl Throttle {
    pub fn new(interval: Duration, step: f64) -> Self {
        Self {
            interval,
            step,
            last: None,
            last_bucket: 0,
        }
    }

    pub fn reset(&mut self) {
        self.last = None;
        self.last_bucket = 0;
    }

    pub fn should_draw(&mut self, now: Instant, done: u64, total: u64) -> bool {
        let bucket = if total > 0 && self.step > 0.0 {
            ((done as f64 / total as f64) / self.step).floor() as u64
        } else {
            0
        };
        let due = match self.last {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        };
        if due || bucket > self.last_bucket {
            self.last = Some(now);
            self.last_bucket = bucket;
            return true;
        }
        false
    }
}

/// Single self-overwriting status line on stderr.
pub struct ConsoleProgress {
    throttle: Throttle,
    label: String,
    total: u64,
    done: u64,
    started: Instant,
}

impl ConsoleProgress {
    pub fn new(interval: Duration) -> Self {
        Self {
            throttle: Throttle::new(interval, DEFAULT_REDRAW_STEP),
            label: String::new(),
            total: 0,
            done: 0,
            started: Instant::now(),
        }
    }

    fn draw(&self) -> io::Result<()> {
        let elapsed = self.started.elapsed().as_secs_f64();
        let rate = if elapsed > 0.0 {
            (self.done as f64 / elapsed) as u64
        } else {
            0
        };
        let percent = if self.total > 0 {
            self.done as f64 * 100.0 / self.total as f64
        } else {
            100.0
        };
        let line = format!(
            "{} {percent:>5.1}% {}/{} {}/s",
            self.label,
            bytes_to_human(self.done),
            bytes_to_human(self.total),
            bytes_to_human(rate)
        );
        let mut stderr = io::stderr();
        queue!(stderr, MoveToColumn(0), Clear(ClearType::CurrentLine), Print(line))?;
        stderr.flush()
    }
}

impl TransferProgress for ConsoleProgress {
    fn start(&mut self, label: &str, total: u64) {
        self.label = shorten(label, 40);
        self.total = total;
        self.done = 0;
        self.started = Instant::now();
        self.throttle.reset();
    }

    fn on_bytes(&mut self, delta: u64) {
        self.done = self.done.saturating_add(delta);
        if self.throttle.should_draw(Instant::now(), self.done, self.total) {
            let _ = self.draw();
        }
    }

    fn finish(&mut self) {
        let _ = self.draw();
        let mut stderr = io::stderr();
        let _ = stderr.queue(Print("\n"));
        let _ = stderr.flush();
    }
}

fn shorten(label: &str, max: usize) -> String {
    let count = label.chars().count();
    if count <= max {
        return label.to_string();
    }
    let tail: String = label.chars().skip(count - (max - 1)).collect();
    format!("…{tail}")
}

pub fn bytes_to_human(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;
    let value = bytes as f64;
    if value >= GB {
        format!("{:.1} GB", value / GB)
    } else if value >= MB {
        format!("{:.1} MB", value / MB)
    } else if value >= KB {
        format!("{:.1} KB", value / KB)
    } else {
        format!("{bytes} B")
    }
}
