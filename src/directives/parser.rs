//! Incremental directive scanner.
//!
//! Generated text arrives in arbitrary chunks, so the `ACTION:` marker and
//! the JSON object after it can be split anywhere. The scanner is an
//! explicit state machine that buffers a candidate directive until its JSON
//! object closes; a partial buffer is never parsed as final. Text outside
//! directives passes through unchanged.

use serde_json::Value;
use tracing::warn;

use super::{ActionDirective, DIRECTIVE_MARKER};
use crate::error::DirectiveError;

/// Scanner state.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ScanState {
    /// Outside any directive; `matched` marker characters seen so far.
    Outside { matched: usize },
    /// Marker seen; skipping whitespace until the opening brace.
    AwaitJson { held: String },
    /// Inside the JSON object; brace depth with string/escape awareness.
    InsideJson {
        depth: u32,
        in_string: bool,
        escaped: bool,
    },
}

/// Result of feeding one chunk (or finishing the stream).
#[derive(Debug, Default)]
pub struct ScanOutput {
    /// Pass-through text with directives removed.
    pub text: String,
    /// Directives completed within this chunk.
    pub directives: Vec<ActionDirective>,
    /// Syntactically complete objects that failed validation.
    pub malformed: usize,
}

impl ScanOutput {
    fn merge(&mut self, other: ScanOutput) {
        self.text.push_str(&other.text);
        self.directives.extend(other.directives);
        self.malformed += other.malformed;
    }
}

/// Buffered incremental parser for the `ACTION: {...}` grammar.
#[derive(Debug)]
pub struct DirectiveScanner {
    state: ScanState,
    buffer: String,
}

impl Default for DirectiveScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl DirectiveScanner {
    pub fn new() -> Self {
        Self {
            state: ScanState::Outside { matched: 0 },
            buffer: String::new(),
        }
    }

    /// Feed one chunk of generated text.
    pub fn push(&mut self, chunk: &str) -> ScanOutput {
        let mut output = ScanOutput::default();
        for ch in chunk.chars() {
            self.step(ch, &mut output);
        }
        output
    }

    /// Flush at end of stream. An unterminated directive is returned as
    /// plain text rather than being parsed from a partial buffer.
    pub fn finish(&mut self) -> ScanOutput {
        let mut output = ScanOutput::default();
        match std::mem::replace(&mut self.state, ScanState::Outside { matched: 0 }) {
            ScanState::Outside { matched } => {
                output.text.push_str(&DIRECTIVE_MARKER[..matched]);
            }
            ScanState::AwaitJson { held } => {
                output.text.push_str(DIRECTIVE_MARKER);
                output.text.push_str(&held);
            }
            ScanState::InsideJson { .. } => {
                warn!("stream ended inside a directive; emitting raw text");
                output.text.push_str(DIRECTIVE_MARKER);
                output.text.push(' ');
                output.text.push_str(&self.buffer);
            }
        }
        self.buffer.clear();
        output
    }

    /// Convenience for complete texts: one push, then finish.
    pub fn scan_all(&mut self, text: &str) -> ScanOutput {
        let mut output = self.push(text);
        output.merge(self.finish());
        output
    }

    fn step(&mut self, ch: char, output: &mut ScanOutput) {
        match &mut self.state {
            ScanState::Outside { matched } => {
                let marker = DIRECTIVE_MARKER.as_bytes();
                if ch.is_ascii() && ch as u8 == marker[*matched] {
                    *matched += 1;
                    if *matched == marker.len() {
                        self.state = ScanState::AwaitJson {
                            held: String::new(),
                        };
                    }
                } else {
                    // Flush the partial marker match, then retry this char
                    // as a fresh potential marker start.
                    output.text.push_str(&DIRECTIVE_MARKER[..*matched]);
                    if ch.is_ascii() && ch as u8 == marker[0] {
                        *matched = 1;
                    } else {
                        *matched = 0;
                        output.text.push(ch);
                    }
                }
            }
            ScanState::AwaitJson { held } => {
                if ch == '{' {
                    self.buffer.clear();
                    self.buffer.push('{');
                    self.state = ScanState::InsideJson {
                        depth: 1,
                        in_string: false,
                        escaped: false,
                    };
                } else if ch.is_whitespace() && held.len() < 8 {
                    held.push(ch);
                } else {
                    // Marker not followed by an object: it was ordinary text.
                    output.text.push_str(DIRECTIVE_MARKER);
                    output.text.push_str(held);
                    output.text.push(ch);
                    self.state = ScanState::Outside { matched: 0 };
                }
            }
            ScanState::InsideJson {
                depth,
                in_string,
                escaped,
            } => {
                self.buffer.push(ch);
                if *escaped {
                    *escaped = false;
                } else if *in_string {
                    match ch {
                        '\\' => *escaped = true,
                        '"' => *in_string = false,
                        _ => {}
                    }
                } else {
                    match ch {
                        '"' => *in_string = true,
                        '{' => *depth += 1,
                        '}' => {
                            *depth -= 1;
                            if *depth == 0 {
                                self.complete(output);
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    fn complete(&mut self, output: &mut ScanOutput) {
        let raw = std::mem::take(&mut self.buffer);
        self.state = ScanState::Outside { matched: 0 };

        match serde_json::from_str::<Value>(&raw) {
            Ok(value) => match ActionDirective::from_value(value) {
                Some(directive) => output.directives.push(directive),
                None => {
                    let err = DirectiveError::Parse("missing string type or object data".into());
                    warn!(%err, "skipping directive");
                    output.malformed += 1;
                }
            },
            Err(err) => {
                let err = DirectiveError::Parse(err.to_string());
                warn!(%err, "skipping directive");
                output.malformed += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::DirectiveKind;
    use super::*;

    fn scan(text: &str) -> ScanOutput {
        DirectiveScanner::new().scan_all(text)
    }

    #[test]
    fn test_text_without_directives_passes_through() {
        let output = scan("Use a cache between the API and the database.");
        assert_eq!(output.text, "Use a cache between the API and the database.");
        assert!(output.directives.is_empty());
    }

    #[test]
    fn test_directive_is_extracted_and_removed_from_text() {
        let output = scan(
            "Add a cache. ACTION: {\"type\":\"add_component\",\"data\":{\"name\":\"Cache\"}} Done.",
        );
        assert_eq!(output.text, "Add a cache.  Done.");
        assert_eq!(output.directives.len(), 1);
        assert_eq!(output.directives[0].kind, DirectiveKind::AddComponent);
        assert_eq!(output.directives[0].data["name"], "Cache");
    }

    #[test]
    fn test_directive_split_across_many_chunks() {
        let text = "before ACTION: {\"type\":\"add_connection\",\"data\":{\"from\":\"a\",\"to\":\"b\"}} after";
        let mut scanner = DirectiveScanner::new();
        let mut output = ScanOutput::default();
        // Feed one character at a time, the worst chunking possible.
        for ch in text.chars() {
            output.merge(scanner.push(&ch.to_string()));
        }
        output.merge(scanner.finish());

        assert_eq!(output.text, "before  after");
        assert_eq!(output.directives.len(), 1);
        assert_eq!(output.directives[0].kind, DirectiveKind::AddConnection);
    }

    #[test]
    fn test_nested_objects_and_braces_in_strings() {
        let output = scan(
            "ACTION: {\"type\":\"update_metadata\",\"data\":{\"note\":\"a } in a string\",\"nested\":{\"k\":1}}}",
        );
        assert_eq!(output.directives.len(), 1);
        assert_eq!(output.directives[0].data["nested"]["k"], 1);
    }

    #[test]
    fn test_multiple_directives_in_one_response() {
        let output = scan(
            "ACTION: {\"type\":\"add_component\",\"data\":{\"name\":\"A\"}} and \
             ACTION: {\"type\":\"add_component\",\"data\":{\"name\":\"B\"}}",
        );
        assert_eq!(output.directives.len(), 2);
    }

    #[test]
    fn test_malformed_directive_is_skipped_not_fatal() {
        let output = scan("ACTION: {\"type\":\"x\"} trailing text");
        assert!(output.directives.is_empty());
        assert_eq!(output.malformed, 1);
        assert_eq!(output.text, " trailing text");
    }

    #[test]
    fn test_marker_without_object_is_plain_text() {
        let output = scan("The ACTION: plan is ready");
        assert_eq!(output.text, "The ACTION: plan is ready");
        assert!(output.directives.is_empty());
    }

    #[test]
    fn test_unterminated_directive_flushes_as_text() {
        let mut scanner = DirectiveScanner::new();
        let mut output = scanner.push("ACTION: {\"type\":\"add_component\",\"data\":{");
        output.merge(scanner.finish());
        assert!(output.directives.is_empty());
        assert!(output.text.contains("{\"type\":\"add_component\""));
    }

    #[test]
    fn test_partial_marker_is_not_swallowed() {
        let output = scan("REACTION: none");
        assert_eq!(output.text, "REACTION: none");
    }

    #[test]
    fn test_marker_split_across_chunks() {
        let mut scanner = DirectiveScanner::new();
        let mut output = scanner.push("ACT");
        output.merge(scanner.push("ION: {\"type\":\"canvas_update\",\"data\":{}}"));
        output.merge(scanner.finish());
        assert_eq!(output.directives.len(), 1);
        assert_eq!(output.directives[0].kind, DirectiveKind::CanvasUpdate);
    }
}
