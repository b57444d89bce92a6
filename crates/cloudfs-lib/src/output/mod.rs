pub mod progress;

use crossterm::style::{Color, Stylize};
use serde::Serialize;

use crate::cloud::Resource;

/// Print a success message in green to stdout.
pub fn success(msg: &str) {
    println!("{}", msg.with(Color::Green));
}

/// Print an error message in red to stderr.
pub fn error(msg: &str) {
    eprintln!("{}", msg.with(Color::Red));
}

/// Print a warning message in yellow to stderr.
pub fn warning(msg: &str) {
    eprintln!("{}", msg.with(Color::Yellow));
}

/// Print an info message in cyan to stdout.
pub fn info(msg: &str) {
    println!("{}", msg.with(Color::Cyan));
}

/// Pretty-print any serializable value as JSON on stdout.
pub fn json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(e) => error(&format!("Failed to encode JSON: {e}")),
    }
}

/// Human-readable byte count, binary units.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// One listing line: kind, size, modification time, name.
pub fn format_resource(r: &Resource) -> String {
    let kind = if r.is_dir { "DIR " } else { "FILE" };
    let size = if r.is_dir && r.size == 0 {
        "-".to_string()
    } else {
        format_size(r.size)
    };
    format!(
        "{kind}  {size:>10}  {}  {}",
        r.modified.format("%Y-%m-%d %H:%M"),
        r.name
    )
}

/// Print a directory listing, directories in blue.
pub fn print_listing<'a>(items: impl IntoIterator<Item = &'a Resource>) {
    let mut empty = true;
    for r in items {
        empty = false;
        let line = format_resource(r);
        if r.is_dir {
            println!("{}", line.with(Color::Blue));
        } else {
            println!("{line}");
        }
    }
    if empty {
        println!("(empty folder)");
    }
}
