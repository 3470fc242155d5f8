//! Post-processing: deterministic cleanup of extracted PDF text and of raw
//! model responses.
//!
//! PDF text extraction yields CRLF line endings, form feeds, runs of spaces
//! from column layout, and stray control bytes. The model does better on
//! compact text, and downstream JSON is smaller, so every extracted document
//! goes through [`clean_text`] before inference.
//!
//! ## Rule Order
//!
//! Line endings are normalised first so the control-character pass can keep
//! `\n` and `\t` without worrying about `\r`; horizontal whitespace is
//! collapsed before blank-line collapsing so lines containing only spaces
//! count as blank.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all text-cleanup rules to raw extracted text.
///
/// Rules (applied in order):
/// 1. Normalise line endings (CRLF / CR → LF)
/// 2. Strip control characters except `\n` and `\t`
/// 3. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 4. Collapse runs of horizontal whitespace to a single space
/// 5. Trim whitespace at both ends of each line
/// 6. Collapse 3+ consecutive newlines to exactly 2
/// 7. Trim leading/trailing whitespace
pub fn clean_text(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = strip_control_chars(&s);
    let s = remove_invisible_chars(&s);
    let s = collapse_horizontal_whitespace(&s);
    let s = trim_lines(&s);
    let s = collapse_blank_lines(&s);
    s.trim().to_string()
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2: Strip control characters ─────────────────────────────────────────

fn strip_control_chars(input: &str) -> String {
    input
        .chars()
        .filter(|&c| c == '\n' || c == '\t' || !c.is_control())
        .collect()
}

// ── Rule 3: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 4: Collapse horizontal whitespace ───────────────────────────────────

static RE_HORIZONTAL_WS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\S\n]+").expect("valid whitespace regex"));

fn collapse_horizontal_whitespace(input: &str) -> String {
    RE_HORIZONTAL_WS.replace_all(input, " ").to_string()
}

// ── Rule 5: Trim each line ───────────────────────────────────────────────────

fn trim_lines(input: &str) -> String {
    input
        .split('\n')
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 6: Collapse excessive blank lines ───────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n{3,}").expect("valid blank-line regex"));

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").to_string()
}

// ── Response cleanup: strip an outer code fence ──────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^```[A-Za-z0-9_-]*[ \t]*\n?(.*?)\n?```\s*$").expect("valid fence regex")
});

/// Strip a markdown code fence wrapping the whole response, if any.
///
/// Models are told not to fence their JSON and do it anyway.
pub fn strip_code_fences(input: &str) -> String {
    let trimmed = input.trim();
    match RE_OUTER_FENCES.captures(trimmed) {
        Some(caps) => caps[1].trim().to_string(),
        None => trimmed.to_string(),
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
