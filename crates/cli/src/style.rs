//! Terminal styling helpers.

use console::Style;

use forksync_core::FileStatus;

/// Green with a checkmark.
pub fn success(msg: &str) -> String {
    let style = Style::new().green();
    format!("{} {}", style.apply_to("✓"), msg)
}

/// Red with a cross.
pub fn error(msg: &str) -> String {
    let style = Style::new().red();
    format!("{} {}", style.apply_to("✗"), msg)
}

/// Yellow with a warning sign.
pub fn warn(msg: &str) -> String {
    let style = Style::new().yellow();
    format!("{} {}", style.apply_to("⚠"), msg)
}

pub fn header(msg: &str) -> String {
    let style = Style::new().bold();
    style.apply_to(msg).to_string()
}

pub fn dim(msg: &str) -> String {
    let style = Style::new().dim();
    style.apply_to(msg).to_string()
}

/// Table colour for a file status.
pub fn status_color(status: FileStatus) -> Option<comfy_table::Color> {
    match status {
        FileStatus::Drifted | FileStatus::Diverged => Some(comfy_table::Color::Red),
        FileStatus::Behind | FileStatus::Deleted => Some(comfy_table::Color::Yellow),
        FileStatus::Ahead | FileStatus::Local => Some(comfy_table::Color::Green),
        FileStatus::Pinned | FileStatus::Ignored => Some(comfy_table::Color::Blue),
        FileStatus::Identical | FileStatus::Renamed => None,
    }
}
