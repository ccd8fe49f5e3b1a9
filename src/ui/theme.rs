//! Terminal styles for `devac` output
//!
//! Picked once per process. Piped output, including `--json`, stays plain.

use owo_colors::Style;
use std::sync::OnceLock;

static THEME: OnceLock<Theme> = OnceLock::new();

#[derive(Debug, Clone)]
pub struct Theme {
    /// Command banners and section titles
    pub header: Style,
    /// Completed writes: registrations, refreshes, released locks
    pub success: Style,
    pub error: Style,
    /// Stale locks and repos, skipped refreshes
    pub warn: Style,
    pub info: Style,
    /// Secondary labels such as hit depth
    pub dim: Style,
    /// File paths next to entity names
    pub muted: Style,
    /// Entity names in traversal hits
    pub entity: Style,
}

impl Theme {
    /// Colours only when stdout is a terminal
    pub fn detect() -> Self {
        if !console::Term::stdout().is_term() {
            return Self::plain();
        }
        Self::colored()
    }

    pub fn colored() -> Self {
        Self {
            header: Style::new().blue().bold(),
            success: Style::new().green().bold(),
            error: Style::new().red().bold(),
            warn: Style::new().yellow(),
            info: Style::new().cyan(),
            dim: Style::new().dimmed(),
            muted: Style::new().bright_black(),
            entity: Style::new().bold().underline(),
        }
    }

    pub fn plain() -> Self {
        Self {
            header: Style::new(),
            success: Style::new(),
            error: Style::new(),
            warn: Style::new(),
            info: Style::new(),
            dim: Style::new(),
            muted: Style::new(),
            entity: Style::new(),
        }
    }
}

/// Process-wide theme, detected on first use
pub fn theme() -> &'static Theme {
    THEME.get_or_init(Theme::detect)
}

#[cfg(test)]
mod tests {
    use super::*;
    use owo_colors::OwoColorize;

    #[test]
    fn test_plain_theme_emits_no_escapes() {
        let plain = Theme::plain();
        let rendered = format!("{}", "parseConfig".style(plain.entity));
        assert_eq!(rendered, "parseConfig");
    }

    #[test]
    fn test_colored_theme_styles_entities() {
        let colored = Theme::colored();
        let rendered = format!("{}", "parseConfig".style(colored.entity));
        assert!(rendered.contains("parseConfig"));
        assert!(rendered.contains('\u{1b}'));
    }
}
