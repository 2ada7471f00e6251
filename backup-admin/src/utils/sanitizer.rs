//! Redaction and classification of error text before it reaches a caller.
//!
//! Raw detail is logged by the caller; only the output of [`sanitize`] or
//! [`classify`] may be returned over HTTP.

use regex::Regex;
use std::sync::OnceLock;

struct Redaction {
    pattern: Regex,
    replacement: &'static str,
}

fn redactions() -> &'static [Redaction] {
    static REDACTIONS: OnceLock<Vec<Redaction>> = OnceLock::new();
    REDACTIONS.get_or_init(|| {
        let rule = |pattern: &str, replacement: &'static str| Redaction {
            pattern: Regex::new(pattern).unwrap(),
            replacement,
        };
        vec![
            rule(
                r"postgres(?:ql)?://[^:/\s@]+:[^@\s]+@[^/\s]+(?:/[^\s?\x22']*)?",
                "postgresql://***:***@***/***(credentials hidden)",
            ),
            rule(
                r"mysql://[^:/\s@]+:[^@\s]+@[^/\s]+(?:/[^\s?\x22']*)?",
                "mysql://***:***@***/***(credentials hidden)",
            ),
            rule(
                r"mongodb(?:\+srv)?://[^:/\s@]+:[^@\s]+@[^/\s]+(?:/[^\s?\x22']*)?",
                "mongodb://***:***@***/***(credentials hidden)",
            ),
            rule(r"/(?:home|Users)/[^/\s]+", "/***"),
            rule(r"[A-Za-z]:\\[^\s\x22']*", r"C:\***"),
            rule(
                r"(?i)(\w*(?:password|pwd|secret|key|token))\s*[=:]\s*[^\s;&\x22']+",
                "${1}=***(hidden)",
            ),
        ]
    })
}

/// Removes connection credentials, home-directory paths, Windows paths and
/// `secret=value` pairs from `raw`.
pub fn sanitize(raw: &str) -> String {
    let mut out = raw.to_string();
    for r in redactions() {
        out = r.pattern.replace_all(&out, r.replacement).into_owned();
    }
    out
}

/// Known failure categories, checked in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    ToolNotFound,
    PermissionDenied,
    MissingFile,
    ConnectionRefused,
    AuthenticationFailed,
    Timeout,
    DiskSpace,
}

impl FailureKind {
    const ORDER: [FailureKind; 7] = [
        FailureKind::ToolNotFound,
        FailureKind::PermissionDenied,
        FailureKind::MissingFile,
        FailureKind::ConnectionRefused,
        FailureKind::AuthenticationFailed,
        FailureKind::Timeout,
        FailureKind::DiskSpace,
    ];

    fn markers(self) -> &'static [&'static str] {
        match self {
            FailureKind::ToolNotFound => &[
                "command not found",
                "not found in path",
                "executable not found",
            ],
            FailureKind::PermissionDenied => &["permission denied", "eacces", "os error 13"],
            FailureKind::MissingFile => &["no such file or directory", "enoent", "os error 2)"],
            FailureKind::ConnectionRefused => &[
                "connection refused",
                "could not connect",
                "connection to server",
                "econnrefused",
                "pool timed out while waiting for an open connection",
            ],
            FailureKind::AuthenticationFailed => &[
                "authentication failed",
                "password authentication",
                "no password supplied",
            ],
            FailureKind::Timeout => &["timeout", "timed out"],
            FailureKind::DiskSpace => &["no space left", "disk full", "disk quota", "enospc"],
        }
    }

    /// First category whose marker appears in `raw` (case-insensitive).
    pub fn detect(raw: &str) -> Option<FailureKind> {
        let lower = raw.to_lowercase();
        Self::ORDER
            .into_iter()
            .find(|kind| kind.markers().iter().any(|m| lower.contains(m)))
    }

    fn message(self) -> &'static str {
        match self {
            FailureKind::ToolNotFound => "the PostgreSQL client tools (pg_dump/psql) are not available. Please ensure they are installed.",
            FailureKind::PermissionDenied => "permission denied. Please check file system and database permissions.",
            FailureKind::MissingFile => "required files or directories are missing.",
            FailureKind::ConnectionRefused => "unable to connect to the database. Please check database connectivity.",
            FailureKind::AuthenticationFailed => "database authentication failed. Please check database credentials.",
            FailureKind::Timeout => "the operation timed out. The database might be too large or busy.",
            FailureKind::DiskSpace => "insufficient disk space.",
        }
    }
}

/// Maps raw error text to a canned, context-prefixed message.
pub fn classify(raw: &str, context: &str) -> String {
    match FailureKind::detect(raw) {
        Some(kind) => format!("{context} failed: {}", kind.message()),
        None => format!(
            "{context} failed due to an unexpected error. Please try again or contact support."
        ),
    }
}
