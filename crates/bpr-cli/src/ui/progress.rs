//! Spinner feedback for `bpr index` and `bpr eval`.
//!
//! Drawn on stderr by `indicatif`. Hidden under `--quiet`, under `--json`, and
//! whenever stdout is redirected, so piped output stays clean.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

/// How much progress feedback a command may draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressMode {
    /// Animated spinner on a terminal.
    Interactive,
    /// `--quiet` or redirected stdout: final results only.
    Quiet,
    /// `--json`: nothing but the JSON document.
    Silent,
}

impl ProgressMode {
    pub fn detect(quiet: bool, json: bool) -> Self {
        match (json, quiet || !atty::is(atty::Stream::Stdout)) {
            (true, _) => Self::Silent,
            (false, true) => Self::Quiet,
            (false, false) => Self::Interactive,
        }
    }

    pub fn is_interactive(&self) -> bool {
        *self == Self::Interactive
    }
}

const TICKS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";
const TEMPLATE: &str = "{spinner:.cyan} {msg} [{elapsed}]";

/// Spinner handle. `ProgressBar` is internally synchronised, so the evaluation
/// workers update it directly through the progress callback.
pub struct Progress {
    bar: ProgressBar,
}

impl Progress {
    pub fn spinner(message: &str, mode: ProgressMode) -> Self {
        if !mode.is_interactive() {
            return Self {
                bar: ProgressBar::hidden(),
            };
        }

        let bar = ProgressBar::new_spinner().with_message(message.to_string());
        if let Ok(style) = ProgressStyle::with_template(TEMPLATE) {
            bar.set_style(style.tick_chars(TICKS));
        }
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar }
    }

    pub fn set_message(&self, message: &str) {
        self.bar.set_message(message.to_string());
    }

    /// Remove the spinner line before results are printed.
    pub fn finish_clear(&self) {
        self.bar.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_wins_over_quiet() {
        assert_eq!(ProgressMode::detect(false, true), ProgressMode::Silent);
        assert_eq!(ProgressMode::detect(true, true), ProgressMode::Silent);
    }

    #[test]
    fn test_quiet_mode() {
        let mode = ProgressMode::detect(true, false);
        assert_eq!(mode, ProgressMode::Quiet);
        assert!(!mode.is_interactive());
    }

    #[test]
    fn test_hidden_spinner_accepts_updates_from_threads() {
        let progress = Progress::spinner("Evaluating", ProgressMode::Silent);
        std::thread::scope(|s| {
            s.spawn(|| progress.set_message("q1"));
            s.spawn(|| progress.set_message("q2"));
        });
        progress.finish_clear();
    }
}
