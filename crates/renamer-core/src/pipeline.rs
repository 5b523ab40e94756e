//! Filename transform pipeline.
//!
//! [`preview`] is a pure function: the same original name and directives
//! always produce the same candidate. Steps run in a fixed order, each one
//! operating on the output of the previous:
//!
//! 1. split into stem and extension
//! 2. remove `remove_text` from the stem
//! 3. replace `replace.old` with `replace.new` in the stem
//! 4. apply the case mode to the stem
//! 5. concatenate `prefix + stem + suffix + timestamp + extension`
//! 6. [`sanitize`]

use crate::directive::Directives;
use crate::validate::is_illegal_char;

/// Maximum length of a produced filename, in bytes.
///
/// Leaves room for a collision suffix and a `.tmp` staging extension within
/// the usual 255-byte filesystem limit.
pub const MAX_FILENAME_BYTES: usize = 200;

/// Stem substituted when nothing usable remains.
pub const FALLBACK_STEM: &str = "unnamed";

/// Splits a filename into `(stem, extension)`.
///
/// The extension includes its leading dot. A dot that only has dots before it
/// does not start an extension, so `.bashrc` has none.
#[must_use]
pub fn split_name(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if name.get(..idx).is_some_and(|s| s.chars().any(|c| c != '.')) => {
            name.split_at(idx)
        }
        _ => (name, ""),
    }
}

/// Computes the candidate filename for `original_name` under `directives`.
#[must_use]
pub fn preview(original_name: &str, directives: &Directives) -> String {
    let (stem, ext) = split_name(original_name);

    let mut stem = stem.to_string();
    if !directives.remove_text.is_empty() {
        stem = stem.replace(&directives.remove_text, "");
    }
    if !directives.replace.old.is_empty() {
        stem = stem.replace(&directives.replace.old, &directives.replace.new);
    }
    let stem = directives.case_mode.apply(&stem);

    let timestamp = directives
        .timestamp
        .as_ref()
        .map_or("", |t| t.rendered.as_str());

    // cleaned on its own so trailing dots cannot merge with the extension's
    let mut base = clean_to_fixpoint(&format!(
        "{}{}{}{}",
        directives.prefix, stem, directives.suffix, timestamp
    ));
    if base.is_empty() {
        base = FALLBACK_STEM.to_string();
    }

    sanitize(&format!("{base}{ext}"))
}

/// Makes `name` safe to use as a single filename component.
///
/// Idempotent. The result never contains a path separator, a reserved
/// character, a control character or `..`, is never empty and is at most
/// [`MAX_FILENAME_BYTES`] long.
#[must_use]
pub fn sanitize(name: &str) -> String {
    let cleaned = clean_to_fixpoint(name);
    if cleaned.is_empty() {
        FALLBACK_STEM.to_string()
    } else {
        cleaned
    }
}

/// Repeats [`clean_once`] until it stops changing the string.
///
/// Every pass that changes the string makes it strictly shorter, so this
/// terminates.
fn clean_to_fixpoint(name: &str) -> String {
    let mut current = name.to_string();
    loop {
        let next = clean_once(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

fn clean_once(name: &str) -> String {
    let stripped: String = name.chars().filter(|c| !is_illegal_char(*c)).collect();
    let no_traversal = stripped.replace("..", "");
    let trimmed = trim_edges(&no_traversal);
    cap_length(trimmed)
}

fn trim_edges(s: &str) -> &str {
    s.trim_matches(|c: char| c.is_whitespace() || c == '.')
}

/// Truncates to [`MAX_FILENAME_BYTES`], keeping the extension when it is short
/// enough to leave room for a stem.
fn cap_length(name: &str) -> String {
    if name.len() <= MAX_FILENAME_BYTES {
        return name.to_string();
    }

    let (stem, ext) = split_name(name);
    if !ext.is_empty() && ext.len() <= MAX_FILENAME_BYTES / 2 {
        let stem = truncate_to_boundary(stem, MAX_FILENAME_BYTES - ext.len());
        format!("{stem}{ext}")
    } else {
        truncate_to_boundary(name, MAX_FILENAME_BYTES).to_string()
    }
}

fn truncate_to_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s.get(..end).unwrap_or_default()
}
