//! `--color` handling.
//!
//! `auto` colours only a terminal stdout and honours `NO_COLOR`
//! (https://no-color.org/).

use std::io::IsTerminal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorMode {
    Always,
    Never,
    #[default]
    Auto,
}

impl ColorMode {
    /// Case-insensitive `always` / `never` / `auto`.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        [("always", Self::Always), ("never", Self::Never), ("auto", Self::Auto)]
            .into_iter()
            .find(|(name, _)| s.eq_ignore_ascii_case(name))
            .map(|(_, mode)| mode)
    }

    pub fn is_enabled(&self) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::Auto => std::env::var_os("NO_COLOR").is_none() && std::io::stdout().is_terminal(),
        }
    }
}

const FALLBACK_WIDTH: usize = 100;

/// Width of the attached terminal, 100 columns when there is none.
pub fn terminal_width() -> usize {
    match terminal_size::terminal_size() {
        Some((terminal_size::Width(w), _)) => usize::from(w),
        None => FALLBACK_WIDTH,
    }
}
