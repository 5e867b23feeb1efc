//! Text tool-call extraction.
//!
//! Models without a native function-calling API are asked to emit a marker
//! followed by one JSON object:
//!
//! ```text
//! Let me work that out.
//! [TOOL_CALL] {"name": "multiply", "arguments": {"a": 15, "b": 8}}
//! ```
//!
//! The extractor captures the object after the first marker, runs it through
//! an ordered chain of conservative repairs until one yields a usable call,
//! and strips the protocol text from the visible content. Later markers are
//! removed but never executed. When nothing can be recovered the original
//! text is returned untouched so the turn can proceed as plain text.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;
use vanillaclaw_core::{ParseError, ToolCall};

/// Default marker literal.
pub const DEFAULT_MARKER: &str = "[TOOL_CALL]";

/// The outcome of scanning one model turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    /// Text with the protocol removed (or the original text on failure)
    pub cleaned_content: String,
    pub tool_call: Option<ToolCall>,
    pub parse_error: Option<ParseError>,
}

impl Extraction {
    fn plain(raw: &str) -> Self {
        Self {
            cleaned_content: raw.to_string(),
            tool_call: None,
            parse_error: None,
        }
    }

    fn failed(raw: &str, error: ParseError) -> Self {
        Self {
            cleaned_content: raw.to_string(),
            tool_call: None,
            parse_error: Some(error),
        }
    }
}

/// A repair step. Returns `None` when it has nothing to change.
type Repair = fn(&str) -> Option<String>;

/// Applied in order; the first candidate that yields a usable call wins.
const REPAIRS: &[(&str, Repair)] = &[
    ("as_is", as_is),
    ("close_braces", close_braces),
    ("strip_trailing_commas", strip_trailing_commas),
    ("strip_commas_and_close", strip_commas_and_close),
    ("normalize_quotes", normalize_quotes),
    (CUT_TRAILING_TEXT, cut_trailing_text),
];

/// Repair that shortens the payload; the text it cuts stays visible.
const CUT_TRAILING_TEXT: &str = "cut_trailing_text";

/// A marker occurrence and the byte range it occupies, payload included.
#[derive(Debug)]
struct MarkerSpan {
    start: usize,
    end: usize,
    payload: Option<(usize, usize)>,
}

/// Recovers at most one [`ToolCall`] per model turn.
#[derive(Debug, Clone)]
pub struct ToolCallExtractor {
    marker: String,
}

impl Default for ToolCallExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_MARKER)
    }
}

impl ToolCallExtractor {
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Extract the first tool call from `raw`.
    pub fn extract(&self, raw: &str) -> Extraction {
        let mut spans = self.find_markers(raw);
        let Some(first) = spans.first() else {
            return Extraction::plain(raw);
        };

        if spans.len() > 1 {
            debug!(
                markers = spans.len(),
                "Extractor: only the first tool call is honored"
            );
        }

        let Some((from, to)) = first.payload else {
            warn!("Extractor: marker without a JSON payload");
            return Extraction::failed(raw, ParseError::MissingPayload);
        };

        let payload = raw[from..to].trim_end();
        match repair(payload) {
            Ok((call, repair_name)) => {
                if repair_name == CUT_TRAILING_TEXT
                    && let Some(end) = last_member_end(payload)
                {
                    spans[0].end = from + end;
                }
                Extraction {
                    cleaned_content: strip_spans(raw, &spans),
                    tool_call: Some(call),
                    parse_error: None,
                }
            }
            Err(reason) => {
                warn!(reason = %reason, "Extractor: tool call could not be repaired");
                Extraction::failed(raw, ParseError::Unrepairable(reason))
            }
        }
    }

    /// Like [`extract`](Self::extract), but a call naming a tool that
    /// `is_known` rejects is downgraded to a parse failure.
    pub fn extract_known(&self, raw: &str, is_known: impl Fn(&str) -> bool) -> Extraction {
        let extraction = self.extract(raw);
        match &extraction.tool_call {
            Some(call) if !is_known(&call.name) => {
                warn!(tool = %call.name, "Extractor: call names an unregistered tool");
                Extraction::failed(raw, ParseError::UnknownTool(call.name.clone()))
            }
            _ => extraction,
        }
    }

    fn find_markers(&self, raw: &str) -> Vec<MarkerSpan> {
        let mut spans = Vec::new();
        if self.marker.is_empty() {
            return spans;
        }

        let mut cursor = 0;
        while let Some(offset) = raw[cursor..].find(&self.marker) {
            let start = cursor + offset;
            let after = start + self.marker.len();
            let rest = &raw[after..];
            let json_start = after + (rest.len() - rest.trim_start().len());

            let span = if raw[json_start..].starts_with('{') {
                let end = scan_object(raw, json_start, &self.marker);
                MarkerSpan {
                    start,
                    end,
                    payload: Some((json_start, end)),
                }
            } else {
                MarkerSpan {
                    start,
                    end: after,
                    payload: None,
                }
            };

            cursor = span.end;
            spans.push(span);
        }
        spans
    }
}

/// Tracks whether the scanner is inside a JSON string literal.
#[derive(Default)]
struct Lexer {
    in_string: bool,
    escaped: bool,
}

impl Lexer {
    /// Feed one character; true when it is outside any string literal.
    fn structural(&mut self, c: char) -> bool {
        if self.in_string {
            if self.escaped {
                self.escaped = false;
            } else if c == '\\' {
                self.escaped = true;
            } else if c == '"' {
                self.in_string = false;
            }
            false
        } else if c == '"' {
            self.in_string = true;
            false
        } else {
            true
        }
    }
}

/// Find the end of the object opening at `start`. An object that never
/// closes runs to the next marker outside a string, or to the end of text.
fn scan_object(text: &str, start: usize, marker: &str) -> usize {
    let mut lexer = Lexer::default();
    let mut depth = 0usize;

    for (i, c) in text[start..].char_indices() {
        let pos = start + i;
        if i > 0 && !lexer.in_string && text[pos..].starts_with(marker) {
            return pos;
        }
        if lexer.structural(c) {
            match c {
                '{' => depth += 1,
                '}' => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        return pos + c.len_utf8();
                    }
                }
                _ => {}
            }
        }
    }
    text.len()
}

/// Run the repair chain. Returns the call and the repair that produced it.
fn repair(payload: &str) -> Result<(ToolCall, &'static str), String> {
    let mut first_error = None;

    for (name, step) in REPAIRS {
        let Some(candidate) = step(payload) else {
            continue;
        };
        match parse_call(&candidate) {
            Ok(call) => {
                if *name != "as_is" {
                    debug!(repair = *name, tool = %call.name, "Extractor: repaired tool call");
                }
                return Ok((call, *name));
            }
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }

    Err(first_error.unwrap_or_else(|| "empty payload".into()))
}

fn parse_call(candidate: &str) -> Result<ToolCall, String> {
    let value: Value = serde_json::from_str(candidate).map_err(|e| e.to_string())?;

    let name = value
        .get("name")
        .and_then(Value::as_str)
        .filter(|n| !n.is_empty())
        .ok_or("missing string field 'name'")?;
    let arguments = value
        .get("arguments")
        .filter(|a| a.is_object())
        .ok_or("missing object field 'arguments'")?;

    Ok(ToolCall {
        id: format!("call_{}", Uuid::new_v4().simple()),
        name: name.to_string(),
        arguments: arguments.clone(),
    })
}

/// Remove every marker span, then trim.
fn strip_spans(raw: &str, spans: &[MarkerSpan]) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut cursor = 0;
    for span in spans {
        out.push_str(&raw[cursor..span.start]);
        cursor = span.end;
    }
    out.push_str(&raw[cursor..]);
    out.trim().to_string()
}

// ── Repairs ───────────────────────────────────────────────────────────────

fn as_is(s: &str) -> Option<String> {
    Some(s.to_string())
}

/// Close an unterminated string and any open objects or arrays.
fn close_braces(s: &str) -> Option<String> {
    let mut lexer = Lexer::default();
    let mut open = Vec::new();
    for c in s.chars() {
        if lexer.structural(c) {
            match c {
                '{' => open.push('}'),
                '[' => open.push(']'),
                '}' | ']' => {
                    open.pop();
                }
                _ => {}
            }
        }
    }

    if open.is_empty() && !lexer.in_string {
        return None;
    }

    let mut out = s.trim_end().to_string();
    if lexer.in_string {
        out.push('"');
    }
    out.extend(open.iter().rev());
    Some(out)
}

/// Drop commas that are followed only by whitespace and a closer or the end.
fn strip_trailing_commas(s: &str) -> Option<String> {
    let chars: Vec<char> = s.chars().collect();
    let mut lexer = Lexer::default();
    let mut out = String::with_capacity(s.len());
    let mut changed = false;

    for (i, &c) in chars.iter().enumerate() {
        if lexer.structural(c) && c == ',' {
            let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
            if matches!(next, None | Some('}') | Some(']')) {
                changed = true;
                continue;
            }
        }
        out.push(c);
    }

    changed.then_some(out)
}

fn strip_commas_and_close(s: &str) -> Option<String> {
    close_braces(&strip_trailing_commas(s)?)
}

fn is_smart_quote(c: char) -> bool {
    matches!(c, '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{201F}' | '\u{2033}')
}

/// Replace typographic double quotes, then apply the syntactic repairs.
fn normalize_quotes(s: &str) -> Option<String> {
    if !s.chars().any(is_smart_quote) {
        return None;
    }
    let normalized: String = s
        .chars()
        .map(|c| if is_smart_quote(c) { '"' } else { c })
        .collect();
    let normalized = strip_trailing_commas(&normalized).unwrap_or(normalized);
    Some(close_braces(&normalized).unwrap_or(normalized))
}

/// Byte offset just past the last value that closed directly inside the
/// outer object, e.g. the end of a complete `arguments` object.
fn last_member_end(s: &str) -> Option<usize> {
    let mut lexer = Lexer::default();
    let mut depth = 0usize;
    let mut end = None;
    for (i, c) in s.char_indices() {
        if lexer.structural(c) {
            match c {
                '{' | '[' => depth += 1,
                '}' | ']' => {
                    depth = depth.saturating_sub(1);
                    if depth == 1 {
                        end = Some(i + c.len_utf8());
                    }
                }
                _ => {}
            }
        }
    }
    end
}

/// Drop prose that ran on after an unclosed call, then close what is open.
fn cut_trailing_text(s: &str) -> Option<String> {
    let end = last_member_end(s).filter(|&end| end < s.len())?;
    let cut = &s[..end];
    Some(close_braces(cut).unwrap_or_else(|| cut.to_string()))
}
