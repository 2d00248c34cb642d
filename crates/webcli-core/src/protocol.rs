//! Wire protocol frames exchanged with the browser terminal.
//!
//! Text frames, one JSON object per logical event.

use serde::{Deserialize, Serialize};

/// Frame from the browser terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// A line of input: a command, or a credential while a masked prompt
    /// is active.
    Line { text: String },
    /// Tab-completion request carrying the current partial input.
    Tab { partial: String },
    /// Ctrl-C: stop the foreground job, if any.
    Interrupt,
}

/// Frame to the browser terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Plain output line.
    Output { text: String },
    /// Prompt with its label; `masked` marks password entry, so the UI
    /// must not echo the next line.
    Prompt { label: String, masked: bool },
    /// Reply to a tab-completion request.
    Completion {
        #[serde(flatten)]
        reply: CompletionReply,
    },
}

/// The three completion outcomes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CompletionReply {
    /// Exactly one match: replace the whole input with `value`.
    Replace { value: String },
    /// Several matches: show them, leave the input unchanged.
    Matches { candidates: Vec<String> },
    /// Nothing matched: leave the input unchanged.
    NoMatch,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frames_deserialize() {
        let line: ClientFrame = serde_json::from_str(r#"{"type":"line","text":"help"}"#).unwrap();
        assert_eq!(
            line,
            ClientFrame::Line {
                text: "help".into()
            }
        );

        let tab: ClientFrame = serde_json::from_str(r#"{"type":"tab","partial":"user"}"#).unwrap();
        assert_eq!(
            tab,
            ClientFrame::Tab {
                partial: "user".into()
            }
        );

        let interrupt: ClientFrame = serde_json::from_str(r#"{"type":"interrupt"}"#).unwrap();
        assert_eq!(interrupt, ClientFrame::Interrupt);
    }

    #[test]
    fn prompt_frame_carries_the_masked_flag() {
        let frame = ServerFrame::Prompt {
            label: "password: ".into(),
            masked: true,
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains(r#""type":"prompt""#));
        assert!(json.contains(r#""masked":true"#));
    }

    #[test]
    fn completion_replies_are_tagged() {
        let frame = ServerFrame::Completion {
            reply: CompletionReply::Replace {
                value: "userctl ".into(),
            },
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains(r#""type":"completion""#));
        assert!(json.contains(r#""result":"replace""#));

        let frame = ServerFrame::Completion {
            reply: CompletionReply::NoMatch,
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains(r#""result":"no_match""#));
    }
}
