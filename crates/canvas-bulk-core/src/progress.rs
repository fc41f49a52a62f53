//! Progress reporting for TTY and non-TTY environments.
//!
//! The executor and walkers only see the [`ProgressSink`] trait. The CLI
//! plugs in an indicatif bar (TTY) or [`LogProgress`] (non-TTY); tests use
//! recording sinks or [`NoProgress`].

use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// Discrete progress event. A side channel, never part of the result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Total work is known
    Determinate { total: usize },
    /// Work of unknown size, e.g. page walking
    Indeterminate { label: String },
    /// One more task settled
    Advanced {
        processed: usize,
        total: usize,
        label: String,
    },
    /// A window finished (1-based index)
    WindowSettled {
        window: usize,
        windows: usize,
        size: usize,
    },
    Done,
}

/// Observer receiving progress events. Implementations must not block.
pub trait ProgressSink: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

impl<S: ProgressSink + ?Sized> ProgressSink for Arc<S> {
    fn report(&self, event: ProgressEvent) {
        (**self).report(event);
    }
}

impl<S: ProgressSink + ?Sized> ProgressSink for Box<S> {
    fn report(&self, event: ProgressEvent) {
        (**self).report(event);
    }
}

/// Discards all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Non-TTY sink: one log line per window, nothing per task.
#[derive(Debug, Clone)]
pub struct LogProgress {
    name: String,
}

impl LogProgress {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl ProgressSink for LogProgress {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Determinate { total } => {
                log::info!("{}: {} tasks", self.name, fmt_num(total));
            }
            ProgressEvent::Indeterminate { label } => log::info!("{}: {label}", self.name),
            ProgressEvent::WindowSettled {
                window,
                windows,
                size,
            } => log::info!(
                "{}: window {window}/{windows} settled ({size} tasks)",
                self.name
            ),
            ProgressEvent::Advanced { .. } => {}
            ProgressEvent::Done => log::info!("{}: done", self.name),
        }
    }
}

/// Task counter bar
fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{prefix:<16.dim} {bar:30.green/dim} {pos:>6}/{len:6} {eta:>4} {wide_msg:.dim}")
        .expect("invalid template")
        .progress_chars("--")
}

/// Spinner shown while the amount of work is unknown
fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.green} {prefix:<16.cyan.bold} {wide_msg}")
        .expect("invalid template")
}

impl ProgressSink for ProgressBar {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Determinate { total } => {
                self.disable_steady_tick();
                self.set_style(bar_style());
                self.set_length(total as u64);
                self.set_position(0);
            }
            ProgressEvent::Indeterminate { label } => {
                self.set_style(spinner_style());
                self.enable_steady_tick(Duration::from_millis(80));
                self.set_message(label);
            }
            ProgressEvent::Advanced {
                processed, label, ..
            } => {
                self.set_position(processed as u64);
                self.set_message(label);
            }
            ProgressEvent::WindowSettled {
                window, windows, ..
            } => self.set_message(format!("window {window}/{windows}")),
            ProgressEvent::Done => self.finish_and_clear(),
        }
    }
}

/// Central progress context managing multi-progress bars.
pub struct ProgressContext {
    multi: MultiProgress,
    is_tty: bool,
}

impl ProgressContext {
    /// Create new context, detecting TTY automatically.
    pub fn new() -> Self {
        let is_tty = std::io::stderr().is_terminal();
        Self {
            multi: MultiProgress::new(),
            is_tty,
        }
    }

    /// Sink for one operation: a managed bar on a TTY, log lines otherwise.
    pub fn sink(&self, name: &str) -> Box<dyn ProgressSink> {
        if !self.is_tty {
            return Box::new(LogProgress::new(name));
        }
        let pb = self.multi.add(ProgressBar::new(0));
        pb.set_style(spinner_style());
        // Truncate long names to keep bars aligned
        let display: String = name.chars().take(16).collect();
        pb.set_prefix(display);
        Box::new(pb)
    }

    /// Print a line above managed progress bars (avoids interference).
    pub fn println(&self, msg: impl AsRef<str>) {
        if self.is_tty {
            let _ = self.multi.println(msg);
        } else {
            eprintln!("{}", msg.as_ref());
        }
    }

    /// Whether running in TTY mode.
    pub fn is_tty(&self) -> bool {
        self.is_tty
    }

    /// Get reference to `MultiProgress` for log bridge.
    pub fn multi(&self) -> &MultiProgress {
        &self.multi
    }
}

impl Default for ProgressContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe wrapper for `ProgressContext`.
pub type SharedProgress = Arc<ProgressContext>;

/// Format number with thousand separators.
pub fn fmt_num(n: usize) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}
