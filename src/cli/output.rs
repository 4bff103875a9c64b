//! Output formatting and progress indicators
//!
//! This module provides utilities for displaying progress bars and
//! formatted messages to the user.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};

use indicatif::{HumanBytes, ProgressBar, ProgressStyle};

use crate::infra::fetch::Progress;

static QUIET: AtomicBool = AtomicBool::new(false);
static JSON: AtomicBool = AtomicBool::new(false);

/// Output settings taken from the global command-line flags
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputConfig {
    pub quiet: bool,
    pub json: bool,
    pub verbose: u8,
}

impl OutputConfig {
    pub fn new(quiet: bool, json: bool, verbose: u8) -> Self {
        Self {
            quiet,
            json,
            verbose,
        }
    }

    /// Make this configuration visible to [`is_quiet`] and friends
    pub fn apply_global(self) {
        QUIET.store(self.quiet, Ordering::Relaxed);
        JSON.store(self.json, Ordering::Relaxed);
    }

    /// Log level for the tracing subscriber
    pub fn log_level(self) -> tracing::Level {
        match self.verbose {
            0 => tracing::Level::WARN,
            1 => tracing::Level::INFO,
            _ => tracing::Level::DEBUG,
        }
    }
}

pub fn is_quiet() -> bool {
    QUIET.load(Ordering::Relaxed)
}

pub fn is_json() -> bool {
    JSON.load(Ordering::Relaxed)
}

/// Print a success line unless quiet or in JSON mode
pub fn print_success(message: &str) {
    if !is_quiet() && !is_json() {
        println!("{} {message}", status::SUCCESS);
    }
}

/// Print an indented detail line unless quiet or in JSON mode
pub fn print_detail(label: &str, value: &str) {
    if !is_quiet() && !is_json() {
        println!("  {label:<10} {value}");
    }
}

/// Report a fatal error on stderr, with its cause chain
pub fn display_error(error: &anyhow::Error) {
    eprintln!("{} {error}", status::ERROR);
    for cause in error.chain().skip(1) {
        eprintln!("  caused by: {cause}");
    }
}

/// Create a progress bar for loads, measured in percent
pub fn create_load_bar(label: &str) -> ProgressBar {
    if is_quiet() || is_json() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg:30} [{bar:40.cyan/blue}] {pos:>3}%")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓▒░"),
    );
    pb.set_message(label.to_string());
    pb
}

/// Move `bar` to the state described by `progress`
pub fn update_load_bar(bar: &ProgressBar, progress: &Progress) {
    match progress.percent() {
        Some(percent) => bar.set_position(u64::from(percent)),
        None => bar.set_message(format!("{}", HumanBytes(progress.received))),
    }
    if progress.finished {
        bar.finish();
    }
}

/// Progress callback for loads done by the mount engine
///
/// Opens a fresh bar whenever the label changes.
pub fn engine_progress() -> impl FnMut(&str, &Progress) -> ControlFlow<()> {
    let mut current: Option<(String, ProgressBar)> = None;
    move |label: &str, progress: &Progress| {
        if current.as_ref().map_or(true, |(l, _)| l != label) {
            if let Some((_, bar)) = current.take() {
                bar.abandon();
            }
            current = Some((label.to_string(), create_load_bar(label)));
        }
        if let Some((_, bar)) = &current {
            update_load_bar(bar, progress);
        }
        ControlFlow::Continue(())
    }
}

/// Status message prefixes
pub mod status {
    /// Success prefix (green checkmark)
    pub const SUCCESS: &str = "✓";

    /// Error prefix (red X)
    pub const ERROR: &str = "✗";
}
