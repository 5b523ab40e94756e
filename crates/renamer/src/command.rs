//! Slash-command parser for the interactive editor.
//!
//! Lines look like chat commands: `/prefix Q1_`, `/replace draft final`,
//! `/case title`. Free text is never sent; the daemon validates directive text
//! again before it is applied.

use renamer_core::{Action, CaseMode, TimestampFormat};

use crate::error::{CliError, Result};

/// Placeholder for an empty replacement, for clients that cannot send one.
pub const EMPTY_MARKER: &str = "/empty";

/// Help shown for `/help` and after an unknown command.
pub const HELP: &str = "\
Commands:
  /prefix TEXT          add TEXT before the name
  /suffix TEXT          add TEXT after the name (before the extension)
  /remove TEXT          delete every occurrence of TEXT
  /replace OLD [NEW]    replace OLD with NEW (omit NEW or use /empty to delete)
  /case MODE            upper, lower, title or none
  /timestamp FORMAT     ymdhms, ymd, dmy or a strftime pattern like %Y%m
  /reset                clear every directive
  /apply                rename and deliver the file
  /cancel               discard the upload
  /help                 show this help
  /quit                 cancel and leave";

/// One parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Send this action to the daemon.
    Action(Action),
    Help,
    Quit,
}

/// Parses one input line. Blank lines yield `None`.
///
/// # Errors
///
/// `CliError::InvalidCommand` for free text, unknown commands, missing
/// arguments and unparseable case or timestamp values.
pub fn parse_line(line: &str) -> Result<Option<Command>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let Some(body) = line.strip_prefix('/') else {
        return Err(CliError::InvalidCommand(
            "commands start with '/', type /help for the list".to_string(),
        ));
    };

    let (name, arg) = match body.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (body, ""),
    };

    let command = match name.to_ascii_lowercase().as_str() {
        "prefix" => Command::Action(Action::SetPrefix {
            text: required(arg, "/prefix TEXT")?,
        }),
        "suffix" => Command::Action(Action::SetSuffix {
            text: required(arg, "/suffix TEXT")?,
        }),
        "remove" => Command::Action(Action::SetRemove {
            text: required(arg, "/remove TEXT")?,
        }),
        "replace" => parse_replace(arg)?,
        "case" => {
            let mode = CaseMode::parse(&required(arg, "/case upper|lower|title|none")?)
                .map_err(|e| CliError::InvalidCommand(e.to_string()))?;
            Command::Action(Action::SetCase { mode })
        }
        "timestamp" => {
            let format = TimestampFormat::parse(&required(arg, "/timestamp ymdhms|ymd|dmy|PATTERN")?)
                .map_err(|e| CliError::InvalidCommand(e.to_string()))?;
            Command::Action(Action::SetTimestamp { format })
        }
        "reset" => Command::Action(Action::Reset),
        "apply" | "commit" => Command::Action(Action::Commit),
        "cancel" => Command::Action(Action::Cancel),
        "help" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => {
            return Err(CliError::InvalidCommand(format!(
                "unknown command /{other}, type /help for the list"
            )))
        }
    };

    Ok(Some(command))
}

fn required(arg: &str, usage: &str) -> Result<String> {
    if arg.is_empty() {
        return Err(CliError::InvalidCommand(format!("usage: {usage}")));
    }
    Ok(arg.to_string())
}

fn parse_replace(arg: &str) -> Result<Command> {
    let (old, new) = match arg.split_once(char::is_whitespace) {
        Some((old, new)) => (old, new.trim()),
        None => (arg, ""),
    };
    let old = required(old, "/replace OLD [NEW]")?;
    let new = if new == EMPTY_MARKER { "" } else { new };

    Ok(Command::Action(Action::SetReplace {
        old,
        new: new.to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(line: &str) -> Action {
        match parse_line(line).unwrap() {
            Some(Command::Action(action)) => action,
            other => panic!("Expected an action for {line:?}, got {other:?}"),
        }
    }

    #[test]
    fn test_text_directives() {
        assert_eq!(
            action("/prefix Q1_"),
            Action::SetPrefix {
                text: "Q1_".to_string()
            }
        );
        assert_eq!(
            action("  /suffix   _final  "),
            Action::SetSuffix {
                text: "_final".to_string()
            }
        );
        assert_eq!(
            action("/remove draft copy"),
            Action::SetRemove {
                text: "draft copy".to_string()
            }
        );
    }

    #[test]
    fn test_replace_forms() {
        assert_eq!(
            action("/replace draft final"),
            Action::SetReplace {
                old: "draft".to_string(),
                new: "final".to_string()
            }
        );
        let delete = Action::SetReplace {
            old: "_copy".to_string(),
            new: String::new(),
        };
        assert_eq!(action("/replace _copy"), delete);
        assert_eq!(action("/replace _copy /empty"), delete);
    }

    #[test]
    fn test_case_and_timestamp() {
        assert_eq!(
            action("/case Title"),
            Action::SetCase {
                mode: CaseMode::Title
            }
        );
        assert_eq!(
            action("/timestamp ymd"),
            Action::SetTimestamp {
                format: TimestampFormat::Ymd
            }
        );
        assert!(matches!(
            parse_line("/case shouty"),
            Err(CliError::InvalidCommand(_))
        ));
        assert!(matches!(
            parse_line("/timestamp soon"),
            Err(CliError::InvalidCommand(_))
        ));
    }

    #[test]
    fn test_control_commands() {
        assert_eq!(action("/apply"), Action::Commit);
        assert_eq!(action("/cancel"), Action::Cancel);
        assert_eq!(action("/reset"), Action::Reset);
        assert_eq!(parse_line("/help").unwrap(), Some(Command::Help));
        assert_eq!(parse_line("/QUIT").unwrap(), Some(Command::Quit));
    }

    #[test]
    fn test_rejects_free_text_and_unknown() {
        assert_eq!(parse_line("   ").unwrap(), None);

        let err = parse_line("make it uppercase").unwrap_err();
        assert!(err.to_string().contains("/help"));

        let err = parse_line("/frobnicate").unwrap_err();
        assert!(err.to_string().contains("/frobnicate"));

        let err = parse_line("/prefix").unwrap_err();
        assert!(err.to_string().contains("usage"));
    }
}
