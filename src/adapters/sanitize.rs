//! Log redaction for patient identifiers and secrets.
//!
//! Formatted log lines pass through [`SanitizingMakeWriter`] before reaching
//! the sink. Each line is scanned once with a `RegexSet`; only the rules that
//! fired are then applied, in table order. Redacted classes:
//! - record ids (UUIDs) and medical record numbers
//! - emails, phone numbers and dates of birth
//! - bearer tokens, JWTs and `key=value` style secrets
//! - encrypted content tokens and long hex key material
//!
//! Services should still keep sensitive values out of log calls; this writer
//! only catches what slips through.
//!
//! # Limits
//!
//! Input beyond [`max_bytes`] is dropped and marked `[TRUNCATED]`. The limit
//! defaults to 16 KiB and is set at startup from `CLEARCARE_SANITIZE_MAX_BYTES`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

use regex::{Regex, RegexSet};
use tracing_subscriber::fmt::MakeWriter;

pub const DEFAULT_MAX_BYTES: usize = 16 * 1024;

static MAX_BYTES: AtomicUsize = AtomicUsize::new(DEFAULT_MAX_BYTES);

static RULES: OnceLock<Rules> = OnceLock::new();

/// (pattern, replacement). Order matters: earlier rules run first, so
/// specific shapes are listed before the broad ones that would swallow them.
const RULE_TABLE: &[(&str, &str)] = &[
    // Encrypted content tokens (v1.<fingerprint>.<base64>)
    (r"\bv1\.[0-9a-f]{16}\.[A-Za-z0-9+/]+={0,2}", "[REDACTED-CIPHERTEXT]"),
    (
        r"(?i)\bbearer\s+[A-Za-z0-9._~+/-]{16,}=*",
        "Bearer [REDACTED-TOKEN]",
    ),
    (
        r"\beyJ[A-Za-z0-9_-]{10,}\.[A-Za-z0-9_-]{10,}\.[A-Za-z0-9_-]{10,}\b",
        "[REDACTED-JWT]",
    ),
    (
        r"(?i)\b(?:password|passwd|secret|api[_-]?key|token|two[_-]?factor[_-]?secret|totp)\b\s*[:=]\s*\S{8,}",
        "[REDACTED-SECRET]",
    ),
    (
        r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}",
        "[REDACTED-ID]",
    ),
    (r"(?i)\bMRN[-:#\s]*[A-Z0-9]{5,12}\b", "[REDACTED-MRN]"),
    (
        r"(?i)\b(?:dob|date[_ ]of[_ ]birth|dateOfBirth)\b\W{0,4}\d{4}-\d{2}-\d{2}",
        "[REDACTED-DOB]",
    ),
    (
        r"(?i)\b[a-z0-9](?:[a-z0-9._%+-]{0,62}[a-z0-9])?@(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]{2,}\b",
        "[REDACTED-EMAIL]",
    ),
    (
        r"(?:\+\d{1,3}[-.\s]?)?\(?\b\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}\b",
        "[REDACTED-PHONE]",
    ),
    (r"\b[0-9a-fA-F]{32,}\b", "[REDACTED-KEY]"),
];

struct Rules {
    set: RegexSet,
    compiled: Vec<(Regex, &'static str)>,
}

fn rules() -> &'static Rules {
    RULES.get_or_init(|| {
        let set = RegexSet::new(RULE_TABLE.iter().map(|(p, _)| *p)).expect("Valid regex set");
        let compiled = RULE_TABLE
            .iter()
            .map(|(p, r)| (Regex::new(p).expect("Valid regex"), *r))
            .collect();
        Rules { set, compiled }
    })
}

/// Current per-call input cap in bytes.
#[must_use]
pub fn max_bytes() -> usize {
    MAX_BYTES.load(Ordering::Relaxed)
}

/// Set the per-call input cap. Zero is ignored.
pub fn set_max_bytes(limit: usize) {
    if limit > 0 {
        MAX_BYTES.store(limit, Ordering::Relaxed);
    }
}

fn clip(input: &str, limit: usize) -> (&str, bool) {
    if input.len() <= limit {
        return (input, false);
    }
    let mut end = limit;
    while end > 0 && !input.is_char_boundary(end) {
        end -= 1;
    }
    (&input[..end], true)
}

/// Redact sensitive substrings from `input`.
#[must_use]
pub fn sanitize(input: &str) -> String {
    redact(input, max_bytes())
}

fn redact(input: &str, limit: usize) -> String {
    let rules = rules();
    let (head, clipped) = clip(input, limit);

    let mut out = head.to_string();
    for idx in rules.set.matches(head).iter() {
        let (regex, replacement) = &rules.compiled[idx];
        out = regex.replace_all(&out, *replacement).into_owned();
    }
    if clipped {
        out.push_str(" [TRUNCATED]");
    }
    out
}

/// Whether `input` would be altered by [`sanitize`].
#[must_use]
pub fn contains_sensitive(input: &str) -> bool {
    let (head, _) = clip(input, max_bytes());
    rules().set.is_match(head)
}

/// A `MakeWriter` that redacts each formatted line before passing it on.
#[derive(Debug, Clone)]
pub struct SanitizingMakeWriter<M> {
    inner: M,
}

impl<M> SanitizingMakeWriter<M> {
    #[must_use]
    pub fn new(inner: M) -> Self {
        Self { inner }
    }
}

/// Line-buffering writer returned by [`SanitizingMakeWriter`].
pub struct SanitizingWriter<W> {
    inner: W,
    pending: Vec<u8>,
}

impl<W: std::io::Write> SanitizingWriter<W> {
    fn emit(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        let text = String::from_utf8_lossy(bytes);
        self.inner.write_all(sanitize(&text).as_bytes())
    }

    fn drain_lines(&mut self) -> std::io::Result<()> {
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.emit(&line)?;
        }
        Ok(())
    }
}

impl<W: std::io::Write> std::io::Write for SanitizingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.pending.extend_from_slice(buf);

        // A line with no newline in sight is flushed in one piece.
        if self.pending.len() > max_bytes().saturating_mul(2) {
            let chunk = std::mem::take(&mut self.pending);
            self.emit(&chunk)?;
            self.inner.write_all(b"\n")?;
            return Ok(buf.len());
        }

        self.drain_lines()?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.drain_lines()?;
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            self.emit(&rest)?;
        }
        self.inner.flush()
    }
}

impl<'a, M> MakeWriter<'a> for SanitizingMakeWriter<M>
where
    M: MakeWriter<'a>,
{
    type Writer = SanitizingWriter<M::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        SanitizingWriter {
            inner: self.inner.make_writer(),
            pending: Vec::new(),
        }
    }
}
