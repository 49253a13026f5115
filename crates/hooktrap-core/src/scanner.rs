//! Line scanner for tunnel subprocess output.
//!
//! localhost.run announces the assigned hostname on a line like:
//!
//! `99d05824229039.lhr.life tunneled with tls termination, https://99d05824229039.lhr.life`
//!
//! The scanner is a pure function over single lines so tunnel discovery can
//! be tested without a real subprocess. Callers feed lines from stdout and
//! stderr and stop at the first decisive outcome.

use once_cell::sync::Lazy;
use regex::Regex;

/// Decisive result of scanning one output line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Public URL assigned by the relay.
    Url(String),
    /// Fatal connection failure reported by the ssh client.
    Failure(String),
}

static RELAY_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"https?://[a-zA-Z0-9\-]+\.(?:lhr\.life|localhost\.run)")
        .expect("relay URL pattern is valid")
});

/// Failure signatures in the ssh client's diagnostic output.
const FAILURE_SIGNATURES: [&str; 3] = [
    "Connection refused",
    "Permission denied",
    "Host key verification failed",
];

/// Scan one line of subprocess output for a tunnel URL or failure signature.
///
/// Failure signatures take precedence over URLs on the same line; in
/// practice they never co-occur. Returns `None` for uninteresting lines.
pub fn scan_line(line: &str) -> Option<ScanOutcome> {
    let line = line.trim();

    for signature in FAILURE_SIGNATURES {
        if line.contains(signature) {
            return Some(ScanOutcome::Failure(line.to_string()));
        }
    }

    RELAY_URL
        .find(line)
        .map(|m| ScanOutcome::Url(m.as_str().to_string()))
}
