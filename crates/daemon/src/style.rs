//! Terminal styling for change reports and startup output.

use console::Style;

use dotmirror_core::reconcile::ChangeKind;
use dotmirror_core::report::ReportStyle;

/// Coloured report lines: green for added, yellow for modified, red for
/// deleted.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleStyle;

impl ReportStyle for ConsoleStyle {
    fn heading(&self, text: &str) -> String {
        header(text)
    }

    fn entry(&self, kind: ChangeKind, text: &str) -> String {
        let (marker, style) = match kind {
            ChangeKind::Added => ("+", Style::new().green()),
            ChangeKind::Modified => ("~", Style::new().yellow()),
            ChangeKind::Deleted => ("-", Style::new().red()),
        };
        format!("  {} {}", style.apply_to(marker), style.apply_to(text))
    }

    fn overflow(&self, text: &str) -> String {
        format!("  {}", dim(text))
    }
}

/// Bold text.
pub fn header(msg: &str) -> String {
    Style::new().bold().apply_to(msg).to_string()
}

pub fn dim(msg: &str) -> String {
    Style::new().dim().apply_to(msg).to_string()
}

/// Green checkmark followed by `msg`.
pub fn success(msg: &str) -> String {
    format!("{} {}", Style::new().green().apply_to("✓"), msg)
}

/// Red cross followed by `msg`.
pub fn error(msg: &str) -> String {
    format!("{} {}", Style::new().red().apply_to("✗"), msg)
}
