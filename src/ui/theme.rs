use owo_colors::Style;
use std::sync::OnceLock;

static THEME: OnceLock<Theme> = OnceLock::new();

/// Terminal styles shared by the CLI output helpers
#[derive(Debug, Clone)]
pub struct Theme {
    pub header: Style,
    pub success: Style,
    pub error: Style,
    pub warn: Style,
    /// Values next to a dimmed label
    pub accent: Style,
    pub dim: Style,
    pub muted: Style,
}

impl Theme {
    pub fn new(colored: bool) -> Self {
        if !colored {
            return Self {
                header: Style::new(),
                success: Style::new(),
                error: Style::new(),
                warn: Style::new(),
                accent: Style::new(),
                dim: Style::new(),
                muted: Style::new(),
            };
        }
        Self {
            header: Style::new().cyan().bold(),
            success: Style::new().green().bold(),
            error: Style::new().red().bold(),
            warn: Style::new().yellow(),
            accent: Style::new().magenta().bold(),
            dim: Style::new().dimmed(),
            muted: Style::new().bright_black().italic(),
        }
    }

    /// Colors on a terminal unless `NO_COLOR` or `CLICOLOR=0` opt out
    pub fn terminal_wants_color() -> bool {
        let no_color = std::env::var_os("NO_COLOR").is_some_and(|v| !v.is_empty());
        !no_color && console::colors_enabled() && console::Term::stdout().is_term()
    }
}

/// Fix the theme for the rest of the process. Later calls are ignored.
pub fn init_theme(colored: bool) {
    let _ = THEME.set(Theme::new(colored));
}

pub fn theme() -> &'static Theme {
    THEME.get_or_init(|| Theme::new(Theme::terminal_wants_color()))
}
