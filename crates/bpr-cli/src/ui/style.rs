//! Message styling for CLI output.
//!
//! | Prefix | Meaning | Color |
//! |--------|---------|-------|
//! | `[ok]` | Success | Green |
//! | `[err]` | Error | Red |
//! | `[warn]` | Warning | Yellow |
//! | `[info]` | Information | Blue |
//! | `[hint]` | Suggestion | Cyan |
//!
//! With colors disabled every helper returns plain text, which is what the
//! integration tests match against.

use owo_colors::{AnsiColors, OwoColorize};

use super::color::ColorMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Ok,
    Err,
    Warn,
    Info,
    Hint,
}

impl MessageType {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Ok => "[ok]",
            Self::Err => "[err]",
            Self::Warn => "[warn]",
            Self::Info => "[info]",
            Self::Hint => "[hint]",
        }
    }

    fn color(&self) -> AnsiColors {
        match self {
            Self::Ok => AnsiColors::Green,
            Self::Err => AnsiColors::Red,
            Self::Warn => AnsiColors::Yellow,
            Self::Info => AnsiColors::Blue,
            Self::Hint => AnsiColors::Cyan,
        }
    }
}

/// Output styling resolved once from `--color`.
#[derive(Debug, Clone)]
pub struct Style {
    colors: bool,
}

impl Style {
    pub fn new(color_mode: ColorMode) -> Self {
        Self {
            colors: color_mode.is_enabled(),
        }
    }

    pub fn colors_enabled(&self) -> bool {
        self.colors
    }

    fn paint(&self, text: &str, color: AnsiColors) -> String {
        if self.colors {
            text.color(color).to_string()
        } else {
            text.to_string()
        }
    }

    /// `[ok] Indexed 120 chunks`
    pub fn message(&self, msg_type: MessageType, text: &str) -> String {
        format!("{} {}", self.paint(msg_type.prefix(), msg_type.color()), text)
    }

    /// Indented `label: value` line under a message.
    pub fn message_detail(&self, label: &str, value: &str) -> String {
        format!("     {}: {}", label, value)
    }

    pub fn section(&self, title: &str) -> String {
        if self.colors {
            title.bold().to_string()
        } else {
            title.to_string()
        }
    }

    /// An error followed by optional `Cause:` and `Hint:` lines.
    pub fn error_with_context(&self, msg: &str, cause: Option<&str>, hint: Option<&str>) -> String {
        let mut lines = vec![self.message(MessageType::Err, msg)];
        lines.extend(cause.map(|c| format!("      Cause: {}", c)));
        lines.extend(hint.map(|h| format!("      Hint: {}", h)));
        lines.join("\n")
    }

    pub fn key_value(&self, key: &str, value: &str) -> String {
        if self.colors {
            format!("{}: {}", key.dimmed(), value)
        } else {
            format!("{}: {}", key, value)
        }
    }

    /// `yes` (highlighted) or `no`.
    pub fn flag(&self, value: bool) -> String {
        if value {
            self.paint("yes", AnsiColors::Yellow)
        } else {
            "no".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain() -> Style {
        Style::new(ColorMode::Never)
    }

    #[test]
    fn test_message_prefixes() {
        let style = plain();
        assert_eq!(style.message(MessageType::Ok, "Done"), "[ok] Done");
        assert_eq!(style.message(MessageType::Err, "Failed"), "[err] Failed");
        assert_eq!(style.message(MessageType::Warn, "Careful"), "[warn] Careful");
        assert_eq!(style.message(MessageType::Hint, "Try"), "[hint] Try");
    }

    #[test]
    fn test_error_with_context() {
        let style = plain();
        let output = style.error_with_context(
            "Invalid configuration",
            Some("No index found"),
            Some("Run `bpr index` first"),
        );
        assert_eq!(
            output,
            "[err] Invalid configuration\n      Cause: No index found\n      Hint: Run `bpr index` first"
        );
        assert_eq!(style.error_with_context("Oops", None, None), "[err] Oops");
    }

    #[test]
    fn test_plain_formatting() {
        let style = plain();
        assert!(!style.colors_enabled());
        assert_eq!(style.key_value("k", "10"), "k: 10");
        assert_eq!(style.message_detail("Report", "out.json"), "     Report: out.json");
        assert_eq!(style.flag(true), "yes");
        assert_eq!(style.flag(false), "no");
        assert_eq!(style.section("SUMMARY"), "SUMMARY");
    }

    #[test]
    fn test_colored_output_differs() {
        let style = Style::new(ColorMode::Always);
        assert_ne!(style.message(MessageType::Ok, "Done"), "[ok] Done");
        assert!(style.message(MessageType::Ok, "Done").contains("Done"));
    }
}
