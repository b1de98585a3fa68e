//! The assistant-output command grammar.
//!
//! Assistant replies may carry automation directives as whole lines of the
//! form `KIND:payload` with five recognized kinds. [`parse`] splits a reply
//! into the prose that gets spoken and the ordered command list; the scanner
//! is deterministic and independent of the prompt text that teaches the
//! model the format.

pub mod executor;

use serde::Serialize;
use tracing::warn;

/// The five recognized directive kinds, matched as literal uppercase tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CommandKind {
    Type,
    Open,
    Search,
    Press,
    Click,
}

impl CommandKind {
    fn from_token(token: &str) -> Option<Self> {
        match token {
            "TYPE" => Some(Self::Type),
            "OPEN" => Some(Self::Open),
            "SEARCH" => Some(Self::Search),
            "PRESS" => Some(Self::Press),
            "CLICK" => Some(Self::Click),
            _ => None,
        }
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Type => write!(f, "TYPE"),
            Self::Open => write!(f, "OPEN"),
            Self::Search => write!(f, "SEARCH"),
            Self::Press => write!(f, "PRESS"),
            Self::Click => write!(f, "CLICK"),
        }
    }
}

/// One parsed directive, immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub kind: CommandKind,
    pub payload: String,
}

/// Result of scanning one assistant reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReply {
    /// The reply with every recognized command line removed, trimmed. This
    /// is what gets spoken and shown, so the user never hears a directive.
    pub display_text: String,
    /// Commands in the textual order they appeared.
    pub commands: Vec<Command>,
}

/// Parse a CLICK payload as two comma-separated integers.
pub fn parse_click_coords(payload: &str) -> Option<(i32, i32)> {
    let (x, y) = payload.split_once(',')?;
    Some((x.trim().parse().ok()?, y.trim().parse().ok()?))
}

/// Split an assistant reply into prose and commands.
///
/// A line is a directive when, after trimming, it starts with a recognized
/// kind token immediately followed by `:`. A CLICK directive whose payload
/// is not two integers is dropped with a diagnostic; everything else keeps
/// flowing.
pub fn parse(text: &str) -> ParsedReply {
    let mut commands = Vec::new();
    let mut prose = Vec::new();

    for line in text.lines() {
        let trimmed = line.trim();
        let directive = trimmed.split_once(':').and_then(|(token, payload)| {
            let kind = CommandKind::from_token(token)?;
            Some((kind, payload.trim().to_string()))
        });
        match directive {
            Some((CommandKind::Click, payload)) if parse_click_coords(&payload).is_none() => {
                warn!(payload = %payload, "Dropping CLICK with malformed coordinates");
            }
            Some((kind, payload)) => commands.push(Command { kind, payload }),
            None => prose.push(line),
        }
    }

    ParsedReply {
        display_text: prose.join("\n").trim().to_string(),
        commands,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_then_type_scenario() {
        let parsed = parse("OPEN:notepad\nTYPE:hello world\nOpening notepad.");
        assert_eq!(parsed.display_text, "Opening notepad.");
        assert_eq!(
            parsed.commands,
            vec![
                Command {
                    kind: CommandKind::Open,
                    payload: "notepad".into(),
                },
                Command {
                    kind: CommandKind::Type,
                    payload: "hello world".into(),
                },
            ]
        );
    }

    #[test]
    fn test_click_scenario() {
        let parsed = parse("CLICK:960,540\nDone.");
        assert_eq!(parsed.display_text, "Done.");
        assert_eq!(
            parsed.commands,
            vec![Command {
                kind: CommandKind::Click,
                payload: "960,540".into(),
            }]
        );
    }

    #[test]
    fn test_malformed_click_is_dropped() {
        let parsed = parse("CLICK:abc,def\nDone.");
        assert!(parsed.commands.is_empty());
        assert_eq!(parsed.display_text, "Done.");
    }

    #[test]
    fn test_prose_only_round_trip() {
        let input = "Sure, the capital of France is Paris.";
        let parsed = parse(input);
        assert!(parsed.commands.is_empty());
        assert_eq!(parsed.display_text, input);
    }

    #[test]
    fn test_reparse_display_text_yields_no_commands() {
        let parsed = parse("OPEN:chrome\nSEARCH:rust language\nOpening and searching.");
        let again = parse(&parsed.display_text);
        assert!(again.commands.is_empty());
        assert_eq!(again.display_text, parsed.display_text);
    }

    #[test]
    fn test_commands_keep_textual_order() {
        let parsed = parse("PRESS:ctrl+t\nTYPE:first\nCLICK:10,20\nAll set.");
        let kinds: Vec<_> = parsed.commands.iter().map(|c| c.kind).collect();
        assert_eq!(
            kinds,
            vec![CommandKind::Press, CommandKind::Type, CommandKind::Click]
        );
    }

    #[test]
    fn test_lowercase_token_is_prose() {
        let parsed = parse("type:hello\nReally.");
        assert!(parsed.commands.is_empty());
        assert_eq!(parsed.display_text, "type:hello\nReally.");
    }

    #[test]
    fn test_payload_is_trimmed_and_may_contain_colons() {
        let parsed = parse("SEARCH:  how to exit vim : a guide  ");
        assert_eq!(parsed.commands[0].payload, "how to exit vim : a guide");
        assert_eq!(parsed.display_text, "");
    }

    #[test]
    fn test_indented_command_line_is_recognized() {
        let parsed = parse("  OPEN:calculator\nOpening it.");
        assert_eq!(parsed.commands.len(), 1);
        assert_eq!(parsed.display_text, "Opening it.");
    }

    #[test]
    fn test_click_coords_parsing() {
        assert_eq!(parse_click_coords("960,540"), Some((960, 540)));
        assert_eq!(parse_click_coords(" 10 , 20 "), Some((10, 20)));
        assert_eq!(parse_click_coords("abc,def"), None);
        assert_eq!(parse_click_coords("960"), None);
        assert_eq!(parse_click_coords("960,540,1"), None);
    }
}
