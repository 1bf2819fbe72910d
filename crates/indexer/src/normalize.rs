//! Repeat-detection keys for syslog-style lines.

use once_cell::sync::Lazy;
use regex::Regex;

/// `Nov 04 23:58:33 archlinux ` at the start of a `journalctl -o short` line.
static TIMESTAMP_HOST_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Z][a-z]{2}\s+\d+\s+\d+:\d+:\d+\s+\S+\s+").expect("valid prefix regex")
});
static PID_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[\d+\]").expect("valid pid regex"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid ws regex"));

/// Strip the volatile parts of a log line (leading timestamp and hostname,
/// `[pid]` markers) and collapse whitespace.
///
/// Lines that differ only in those fields map to the same key. The result may
/// be empty; callers drop empty keys.
#[must_use]
pub fn normalize_line(line: &str) -> String {
    // One pass can expose a new prefix or marker (`[1[2]]`, `  Nov 04 ...`),
    // so apply until stable. Every pass that changes the text shortens it or
    // replaces a non-ASCII-space blank with ' ', so this terminates.
    let mut current = normalize_once(line);
    loop {
        let next = normalize_once(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

fn normalize_once(line: &str) -> String {
    let line = TIMESTAMP_HOST_PREFIX.replace(line, "");
    let line = PID_MARKER.replace_all(&line, "");
    let line = WHITESPACE.replace_all(&line, " ");
    line.trim().to_string()
}
