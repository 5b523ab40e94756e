//! Transform directives and the user-issuable action set.
//!
//! A [`Directives`] record holds one value per transform field. Every field is
//! independently settable and overwriting a field never consults any other
//! field's previous value.

use std::fmt;
use std::fmt::Write as _;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::validate::validate_text;

// ============================================================================
// Case Mode
// ============================================================================

/// Case transformation applied to the filename stem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseMode {
    /// Leave the stem unchanged.
    #[default]
    None,
    /// UPPERCASE
    Upper,
    /// lowercase
    Lower,
    /// Title Case
    Title,
}

impl CaseMode {
    /// Parses a case keyword (`upper`, `lower`, `title`, `none`).
    pub fn parse(s: &str) -> DomainResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "upper" | "uppercase" => Ok(Self::Upper),
            "lower" | "lowercase" => Ok(Self::Lower),
            "title" => Ok(Self::Title),
            "none" | "" => Ok(Self::None),
            other => Err(DomainError::InvalidFieldValue {
                field: "case".to_string(),
                value: other.to_string(),
                expected: "upper, lower, title or none".to_string(),
            }),
        }
    }

    /// Applies this case mode to `text`.
    #[must_use]
    pub fn apply(&self, text: &str) -> String {
        match self {
            Self::None => text.to_string(),
            Self::Upper => text.to_uppercase(),
            Self::Lower => text.to_lowercase(),
            Self::Title => title_case(text),
        }
    }

    /// Returns the display label for this mode.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Upper => "upper",
            Self::Lower => "lower",
            Self::Title => "title",
        }
    }
}

impl fmt::Display for CaseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Uppercases every letter that follows a non-letter and lowercases the rest.
fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev_is_letter = false;

    for c in text.chars() {
        if c.is_alphabetic() {
            if prev_is_letter {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_is_letter = true;
        } else {
            out.push(c);
            prev_is_letter = false;
        }
    }

    out
}

// ============================================================================
// Timestamp Format
// ============================================================================

/// Timestamp appended to the composed name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampFormat {
    /// `%Y%m%d_%H%M%S`
    Ymdhms,
    /// `%Y-%m-%d`
    Ymd,
    /// `%d-%m-%Y`
    Dmy,
    /// Any strftime pattern.
    Custom(String),
}

impl TimestampFormat {
    /// Parses a preset keyword or a custom strftime pattern (must contain `%`).
    pub fn parse(s: &str) -> DomainResult<Self> {
        let s = s.trim();
        let format = match s.to_ascii_lowercase().as_str() {
            "ymdhms" => Self::Ymdhms,
            "ymd" => Self::Ymd,
            "dmy" => Self::Dmy,
            _ if s.contains('%') => Self::Custom(s.to_string()),
            other => {
                return Err(DomainError::InvalidFieldValue {
                    field: "timestamp".to_string(),
                    value: other.to_string(),
                    expected: "ymdhms, ymd, dmy or a strftime pattern".to_string(),
                })
            }
        };
        format.check()?;
        Ok(format)
    }

    /// Returns the strftime pattern for this format.
    #[must_use]
    pub fn pattern(&self) -> &str {
        match self {
            Self::Ymdhms => "%Y%m%d_%H%M%S",
            Self::Ymd => "%Y-%m-%d",
            Self::Dmy => "%d-%m-%Y",
            Self::Custom(pattern) => pattern,
        }
    }

    /// Verifies that the pattern parses.
    fn check(&self) -> DomainResult<()> {
        let pattern = self.pattern();
        if StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error)) {
            return Err(DomainError::InvalidTimestampFormat {
                format: pattern.to_string(),
                reason: "unrecognized strftime specifier".to_string(),
            });
        }
        Ok(())
    }

    /// Renders the timestamp suffix (with its leading `_`) for `now`.
    ///
    /// # Errors
    ///
    /// Fails if the pattern does not parse or renders to text that is not
    /// valid inside a filename (e.g. `%D` produces slashes).
    pub fn render(&self, now: &DateTime<Local>) -> DomainResult<String> {
        self.check()?;

        let mut rendered = String::new();
        write!(rendered, "{}", now.format_with_items(StrftimeItems::new(self.pattern()))).map_err(
            |_| DomainError::InvalidTimestampFormat {
                format: self.pattern().to_string(),
                reason: "could not be rendered".to_string(),
            },
        )?;

        let rendered = validate_text(&rendered, "timestamp", false)?;
        Ok(format!("_{rendered}"))
    }
}

impl fmt::Display for TimestampFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ymdhms => write!(f, "YYYYMMDD_HHMMSS"),
            Self::Ymd => write!(f, "YYYY-MM-DD"),
            Self::Dmy => write!(f, "DD-MM-YYYY"),
            Self::Custom(pattern) => write!(f, "{pattern}"),
        }
    }
}

/// A timestamp directive: the chosen format and the text rendered when it was set.
///
/// Rendering happens once so that previews stay deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp {
    pub format: TimestampFormat,
    pub rendered: String,
}

// ============================================================================
// Directives
// ============================================================================

/// Text replacement pair. An empty `new` deletes every occurrence of `old`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplacePair {
    pub old: String,
    pub new: String,
}

/// One labelled line of the directive summary shown beside the preview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryEntry {
    pub label: String,
    pub value: String,
}

impl SummaryEntry {
    fn new(label: &str, value: impl Into<String>) -> Self {
        Self {
            label: label.to_string(),
            value: value.into(),
        }
    }
}

/// The ordered set of transform directives for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directives {
    pub prefix: String,
    pub suffix: String,
    pub remove_text: String,
    pub replace: ReplacePair,
    pub case_mode: CaseMode,
    pub timestamp: Option<Timestamp>,
}

impl Directives {
    /// Applies a directive action, validating its input first.
    ///
    /// On error the directives are left untouched.
    ///
    /// # Errors
    ///
    /// - `DomainError::InvalidInput` for text failing validation
    /// - `DomainError::InvalidTimestampFormat` for an unusable timestamp pattern
    /// - `DomainError::InvalidFieldValue` for `Commit`/`Cancel`, which are not directives
    pub fn apply(&mut self, action: &Action, now: &DateTime<Local>) -> DomainResult<()> {
        match action {
            Action::SetPrefix { text } => self.prefix = validate_text(text, "prefix", false)?,
            Action::SetSuffix { text } => self.suffix = validate_text(text, "suffix", false)?,
            Action::SetRemove { text } => {
                self.remove_text = validate_text(text, "remove text", false)?;
            }
            Action::SetReplace { old, new } => {
                let old = validate_text(old, "text to replace", false)?;
                let new = validate_text(new, "replacement", true)?;
                self.replace = ReplacePair { old, new };
            }
            Action::SetCase { mode } => self.case_mode = *mode,
            Action::SetTimestamp { format } => {
                let rendered = format.render(now)?;
                self.timestamp = Some(Timestamp {
                    format: format.clone(),
                    rendered,
                });
            }
            Action::Reset => self.reset(),
            Action::Commit | Action::Cancel => {
                return Err(DomainError::InvalidFieldValue {
                    field: "directive".to_string(),
                    value: action.name().to_string(),
                    expected: "a directive action".to_string(),
                })
            }
        }
        Ok(())
    }

    /// Restores every field to its default.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Returns true if no directive is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Returns a human-readable summary of the pending directives.
    #[must_use]
    pub fn summary(&self) -> Vec<SummaryEntry> {
        fn or_none(s: &str) -> String {
            if s.is_empty() {
                "none".to_string()
            } else {
                s.to_string()
            }
        }

        let replace = if self.replace.old.is_empty() {
            "none".to_string()
        } else if self.replace.new.is_empty() {
            format!("{} -> (delete)", self.replace.old)
        } else {
            format!("{} -> {}", self.replace.old, self.replace.new)
        };

        let timestamp = self
            .timestamp
            .as_ref()
            .map_or_else(|| "none".to_string(), |t| t.format.to_string());

        vec![
            SummaryEntry::new("Prefix", or_none(&self.prefix)),
            SummaryEntry::new("Suffix", or_none(&self.suffix)),
            SummaryEntry::new("Remove", or_none(&self.remove_text)),
            SummaryEntry::new("Replace", replace),
            SummaryEntry::new("Case", self.case_mode.label()),
            SummaryEntry::new("Timestamp", timestamp),
        ]
    }
}

// ============================================================================
// Actions
// ============================================================================

/// Every action a user can issue against a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    SetPrefix { text: String },
    SetSuffix { text: String },
    SetRemove { text: String },
    SetReplace { old: String, new: String },
    SetCase { mode: CaseMode },
    SetTimestamp { format: TimestampFormat },
    Reset,
    Commit,
    Cancel,
}

impl Action {
    /// Returns true for actions that only modify directives.
    #[must_use]
    pub fn is_directive(&self) -> bool {
        !matches!(self, Self::Commit | Self::Cancel)
    }

    /// Returns the wire name of this action.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::SetPrefix { .. } => "set_prefix",
            Self::SetSuffix { .. } => "set_suffix",
            Self::SetRemove { .. } => "set_remove",
            Self::SetReplace { .. } => "set_replace",
            Self::SetCase { .. } => "set_case",
            Self::SetTimestamp { .. } => "set_timestamp",
            Self::Reset => "reset",
            Self::Commit => "commit",
            Self::Cancel => "cancel",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 3, 14, 9, 26, 53).unwrap()
    }

    #[test]
    fn test_case_mode_parse() {
        assert_eq!(CaseMode::parse("UPPER").unwrap(), CaseMode::Upper);
        assert_eq!(CaseMode::parse("lower").unwrap(), CaseMode::Lower);
        assert_eq!(CaseMode::parse("title").unwrap(), CaseMode::Title);
        assert_eq!(CaseMode::parse("none").unwrap(), CaseMode::None);
        assert!(CaseMode::parse("sponge").is_err());
    }

    #[test]
    fn test_title_case() {
        assert_eq!(CaseMode::Title.apply("my report"), "My Report");
        assert_eq!(CaseMode::Title.apply("hello_WORLD"), "Hello_World");
        assert_eq!(CaseMode::Title.apply("q1 2025 plan"), "Q1 2025 Plan");
    }

    #[test]
    fn test_timestamp_presets_render() {
        let now = fixed_now();
        assert_eq!(TimestampFormat::Ymdhms.render(&now).unwrap(), "_20250314_092653");
        assert_eq!(TimestampFormat::Ymd.render(&now).unwrap(), "_2025-03-14");
        assert_eq!(TimestampFormat::Dmy.render(&now).unwrap(), "_14-03-2025");
    }

    #[test]
    fn test_timestamp_parse() {
        assert_eq!(TimestampFormat::parse("ymd").unwrap(), TimestampFormat::Ymd);
        assert_eq!(
            TimestampFormat::parse("%Y").unwrap(),
            TimestampFormat::Custom("%Y".to_string())
        );
        assert!(TimestampFormat::parse("yesterday").is_err());
        assert!(TimestampFormat::parse("%Q").is_err());
    }

    #[test]
    fn test_timestamp_rejects_slashes_in_output() {
        let format = TimestampFormat::Custom("%D".to_string());
        assert!(format.render(&fixed_now()).is_err());
    }

    #[test]
    fn test_apply_sets_fields_independently() {
        let now = fixed_now();
        let mut d = Directives::default();
        d.apply(&Action::SetPrefix { text: "Q1_".into() }, &now).unwrap();
        d.apply(&Action::SetSuffix { text: "_v2".into() }, &now).unwrap();
        d.apply(&Action::SetPrefix { text: "Q2_".into() }, &now).unwrap();

        assert_eq!(d.prefix, "Q2_");
        assert_eq!(d.suffix, "_v2");
    }

    #[test]
    fn test_apply_invalid_leaves_directives_untouched() {
        let now = fixed_now();
        let mut d = Directives::default();
        d.apply(&Action::SetPrefix { text: "ok".into() }, &now).unwrap();

        let before = d.clone();
        assert!(d.apply(&Action::SetPrefix { text: "a/b".into() }, &now).is_err());
        assert_eq!(d, before);
    }

    #[test]
    fn test_apply_replace_allows_empty_new() {
        let mut d = Directives::default();
        d.apply(
            &Action::SetReplace {
                old: "draft".into(),
                new: String::new(),
            },
            &fixed_now(),
        )
        .unwrap();
        assert_eq!(d.replace.old, "draft");
        assert_eq!(d.replace.new, "");
    }

    #[test]
    fn test_apply_rejects_commit() {
        let mut d = Directives::default();
        assert!(d.apply(&Action::Commit, &fixed_now()).is_err());
    }

    #[test]
    fn test_reset() {
        let now = fixed_now();
        let mut d = Directives::default();
        d.apply(&Action::SetCase { mode: CaseMode::Upper }, &now).unwrap();
        d.apply(&Action::SetTimestamp { format: TimestampFormat::Ymd }, &now).unwrap();
        assert!(!d.is_empty());

        d.apply(&Action::Reset, &now).unwrap();
        assert!(d.is_empty());
    }

    #[test]
    fn test_summary() {
        let mut d = Directives::default();
        d.apply(
            &Action::SetReplace {
                old: "a".into(),
                new: String::new(),
            },
            &fixed_now(),
        )
        .unwrap();

        let summary = d.summary();
        assert_eq!(summary.len(), 6);
        assert_eq!(summary[0].value, "none");
        assert_eq!(summary[3].value, "a -> (delete)");
        assert_eq!(summary[4].value, "none");
    }

    #[test]
    fn test_action_serialization() {
        let action = Action::SetCase { mode: CaseMode::Title };
        let json = serde_json::to_string(&action).unwrap();
        assert_eq!(json, r#"{"kind":"set_case","mode":"title"}"#);

        let parsed: Action = serde_json::from_str(r#"{"kind":"commit"}"#).unwrap();
        assert_eq!(parsed, Action::Commit);
    }
}
