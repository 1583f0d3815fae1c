use std::{
    collections::BTreeMap,
    fmt,
    sync::{Arc, LazyLock},
    time::Instant,
};

use regex::Regex;
use serde::Serialize;

use crate::{
    HarmonyError, Result,
    encoding::Tokenizer,
    tokens::{CHANNEL_FINAL, Role, SpecialToken, TokenId},
};

static SPECIAL_LITERAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<\|[^|]*\|>").expect("special-token pattern is valid"));

/// Terminal classification of a generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// The model finished its turn naturally (`<|return|>`).
    Stop,
    /// The token budget ran out before a terminal marker.
    Length,
    /// The model requested a tool call (`<|call|>`).
    ToolUse,
    /// The caller cancelled generation between tokens.
    Cancelled,
    /// Generation failed.
    Error,
}

impl FinishReason {
    /// The OpenAI-style wire form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::Length => "length",
            Self::ToolUse => "tool_use",
            Self::Cancelled => "cancelled",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One event produced while feeding tokens to the parser.
#[derive(Debug, Clone)]
pub struct StreamEvent {
    /// Channel the event belongs to. Empty when the model omitted the
    /// channel header.
    pub channel: String,
    /// Decoded text added by this token. Empty on terminal events.
    pub delta: String,
    /// Whether this event is on the user-facing `final` channel.
    pub is_final: bool,
    /// Present on the terminal event only.
    pub finish_reason: Option<FinishReason>,
}

/// A message recovered from the token stream.
#[derive(Debug, Clone)]
pub struct ParsedMessage {
    /// Role read after `<|start|>`, or the role the parser was primed with.
    pub role: String,
    /// Channel name, empty when the header was absent.
    pub channel: String,
    /// Decoded message content.
    pub text: String,
}

/// Parse accounting attached to a [`ParsedResponse`].
#[derive(Debug, Clone, Default)]
pub struct ParseMeta {
    /// Number of tokens consumed.
    pub token_count: usize,
    /// Wall-clock parse time in milliseconds.
    pub parse_ms: u64,
    /// Number of messages recovered.
    pub message_count: usize,
    /// Cause recorded when the channel structure could not be recovered and
    /// the fallback path produced `final` instead.
    pub error: Option<String>,
}

/// Structured result of parsing a complete response.
#[derive(Debug, Clone)]
pub struct ParsedResponse {
    /// User-facing text. Never absent: empty when nothing was recovered.
    pub final_text: String,
    /// Chain-of-thought, when extracted.
    pub analysis: Option<String>,
    /// Meta-narration, when extracted.
    pub commentary: Option<String>,
    /// Content of any other channels, keyed by channel name.
    pub channels: Option<BTreeMap<String, String>>,
    /// Terminal marker seen in the stream, if any.
    pub finish_reason: Option<FinishReason>,
    /// Parse accounting.
    pub meta: ParseMeta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Before or between messages.
    Outside,
    /// Reading role tokens after `<|start|>`. Role names may span several
    /// ordinary tokens, so this state also waits for the header marker.
    Role,
    /// Reading channel-name tokens after `<|channel|>`.
    Channel,
    /// Producing content for the current `(role, channel)`.
    Content,
}

/// Incremental parser over a Harmony token stream.
///
/// Feed tokens one at a time with [`StreamParser::process`]; content tokens
/// inside a message yield a [`StreamEvent`] each. The parser never fails on
/// malformed input: unexpected tokens are absorbed and open messages are
/// closed implicitly.
pub struct StreamParser {
    tokenizer: Arc<dyn Tokenizer>,
    state: State,
    role_ids: Vec<TokenId>,
    channel_ids: Vec<TokenId>,
    content_ids: Vec<TokenId>,
    current_role: String,
    current_channel: String,
    messages: Vec<ParsedMessage>,
    finish: Option<FinishReason>,
}

impl StreamParser {
    /// Create a parser primed with the role the stream continues from. The
    /// generation prompt leaves an open assistant turn, so model output may
    /// begin with `<|channel|>` without a preceding `<|start|>`.
    pub fn new(tokenizer: Arc<dyn Tokenizer>, role: Role) -> Self {
        Self {
            tokenizer,
            state: State::Outside,
            role_ids: Vec::new(),
            channel_ids: Vec::new(),
            content_ids: Vec::new(),
            current_role: role.as_str().to_string(),
            current_channel: String::new(),
            messages: Vec::new(),
            finish: None,
        }
    }

    /// Messages recovered so far.
    pub fn messages(&self) -> &[ParsedMessage] {
        &self.messages
    }

    /// Terminal marker seen so far, if any.
    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.finish
    }

    /// Feed one token, decoding the content delta from the token id.
    pub fn process(&mut self, id: TokenId) -> Option<StreamEvent> {
        self.advance(id, None)
    }

    /// Feed one token with the engine-decoded text for it. Preferred on the
    /// streaming path: engines decode incrementally and resolve split
    /// multi-byte sequences correctly.
    pub fn process_with_text(&mut self, id: TokenId, text: &str) -> Option<StreamEvent> {
        self.advance(id, Some(text))
    }

    /// Signal end-of-stream. An open message is closed implicitly; if no
    /// terminal marker was seen the generation ran out of budget, which the
    /// returned event reports as [`FinishReason::Length`].
    pub fn process_eos(&mut self) -> Option<StreamEvent> {
        if self.state != State::Content {
            return None;
        }

        let channel = self.current_channel.clone();
        self.close_message();
        self.state = State::Outside;

        if self.finish.is_some() {
            return None;
        }

        self.finish = Some(FinishReason::Length);

        Some(StreamEvent {
            is_final: channel == CHANNEL_FINAL,
            channel,
            delta: String::new(),
            finish_reason: Some(FinishReason::Length),
        })
    }

    fn advance(&mut self, id: TokenId, text: Option<&str>) -> Option<StreamEvent> {
        let Some(special) = SpecialToken::from_id(id) else {
            return self.ordinary(id, text);
        };

        match special {
            SpecialToken::Start => {
                // A new message while one is open counts as an implicit end.
                if self.state == State::Content {
                    self.close_message();
                }

                self.state = State::Role;
                self.role_ids.clear();
                None
            }
            SpecialToken::Channel => {
                if self.state == State::Content {
                    self.close_message();
                }
                if self.state == State::Role {
                    self.capture_role();
                }

                self.state = State::Channel;
                self.channel_ids.clear();
                None
            }
            SpecialToken::Message => {
                match self.state {
                    State::Channel => {
                        self.current_channel = self.tokenizer.decode(&self.channel_ids).trim().to_string();
                    }
                    State::Role => {
                        self.capture_role();
                        self.current_channel.clear();
                    }
                    // Content without a header: tolerate and attribute to
                    // the unnamed channel.
                    State::Outside | State::Content => {
                        if self.state == State::Content {
                            self.close_message();
                        }
                        self.current_channel.clear();
                    }
                }

                self.state = State::Content;
                self.content_ids.clear();
                None
            }
            SpecialToken::End => {
                if self.state == State::Content {
                    self.close_message();
                }

                // Message boundary only; the stream continues.
                self.state = State::Outside;
                None
            }
            SpecialToken::Return => self.terminal(FinishReason::Stop),
            SpecialToken::Call => self.terminal(FinishReason::ToolUse),
        }
    }

    fn ordinary(&mut self, id: TokenId, text: Option<&str>) -> Option<StreamEvent> {
        match self.state {
            // Tokens between messages carry no channel; ignored here, the
            // batch fallback path recovers them from the raw stream.
            State::Outside => None,
            State::Role => {
                self.role_ids.push(id);
                None
            }
            State::Channel => {
                self.channel_ids.push(id);
                None
            }
            State::Content => {
                self.content_ids.push(id);

                let delta = match text {
                    Some(text) => text.to_string(),
                    None => self.tokenizer.decode(&[id]),
                };

                Some(StreamEvent {
                    channel: self.current_channel.clone(),
                    is_final: self.current_channel == CHANNEL_FINAL,
                    delta,
                    finish_reason: None,
                })
            }
        }
    }

    fn terminal(&mut self, reason: FinishReason) -> Option<StreamEvent> {
        let channel = self.current_channel.clone();

        if self.state == State::Content {
            self.close_message();
        }

        self.state = State::Outside;

        if self.finish.is_none() {
            self.finish = Some(reason);
        }

        Some(StreamEvent {
            is_final: channel == CHANNEL_FINAL,
            channel,
            delta: String::new(),
            finish_reason: Some(reason),
        })
    }

    fn capture_role(&mut self) {
        let role = self.tokenizer.decode(&self.role_ids).trim().to_string();
        if !role.is_empty() {
            self.current_role = role;
        }
    }

    fn close_message(&mut self) {
        // Re-decode the whole buffer so multi-byte sequences split across
        // tokens resolve.
        let text = self.tokenizer.decode(&self.content_ids);
        self.content_ids.clear();

        self.messages.push(ParsedMessage {
            role: self.current_role.clone(),
            channel: self.current_channel.clone(),
            text,
        });
    }
}

/// Parse a complete token stream into channels.
///
/// This never fails on malformed input; the contract is that
/// [`ParsedResponse::final_text`] always exists, possibly empty. Only an
/// empty token list is an error. With `extract_final_only`, analysis and
/// commentary are not extracted.
pub fn parse_tokens(
    tokenizer: &Arc<dyn Tokenizer>,
    token_ids: &[TokenId],
    extract_final_only: bool,
) -> Result<ParsedResponse> {
    if token_ids.is_empty() {
        return Err(HarmonyError::InvalidInput("token ids cannot be empty".into()));
    }

    let started = Instant::now();

    let mut parser = StreamParser::new(Arc::clone(tokenizer), Role::Assistant);
    for &id in token_ids {
        parser.process(id);
    }
    parser.process_eos();

    let mut final_text = String::new();
    let mut analysis = String::new();
    let mut commentary = String::new();
    let mut channels: BTreeMap<String, String> = BTreeMap::new();
    let mut tagged = 0usize;

    for message in &parser.messages {
        if message.channel.is_empty() {
            continue;
        }

        tagged += 1;
        channels
            .entry(message.channel.clone())
            .or_default()
            .push_str(&message.text);

        match message.channel.as_str() {
            "final" => final_text.push_str(&message.text),
            "analysis" if !extract_final_only => analysis.push_str(&message.text),
            "commentary" if !extract_final_only => commentary.push_str(&message.text),
            _ => {}
        }
    }

    let mut error = None;

    if tagged == 0 {
        // Fallback: the model ignored the channel structure. Strip every
        // control literal and surface the remainder as user-facing text.
        let decoded = tokenizer.decode(token_ids);
        final_text = strip_special_tokens(&decoded);
        error = Some("no channel-tagged messages recovered; stripped control tokens".to_string());
        log::warn!("harmony parse fell back to raw text extraction ({} tokens)", token_ids.len());
    }

    let meta = ParseMeta {
        token_count: token_ids.len(),
        parse_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        message_count: parser.messages.len(),
        error,
    };

    Ok(ParsedResponse {
        final_text: final_text.trim().to_string(),
        analysis: Some(analysis.trim().to_string()).filter(|text| !text.is_empty()),
        commentary: Some(commentary.trim().to_string()).filter(|text| !text.is_empty()),
        channels: Some(channels).filter(|map| !map.is_empty()),
        finish_reason: parser.finish,
        meta,
    })
}

/// Parse a decoded text response by re-encoding it first.
///
/// Legacy path for engines that only yield text; the token-based machine
/// stays authoritative.
pub fn parse_text(tokenizer: &Arc<dyn Tokenizer>, text: &str, extract_final_only: bool) -> Result<ParsedResponse> {
    if text.is_empty() {
        return Err(HarmonyError::InvalidInput("response text cannot be empty".into()));
    }

    let token_ids = tokenizer.encode(text, true);
    parse_tokens(tokenizer, &token_ids, extract_final_only)
}

/// Whether a token stream is structurally valid Harmony: framed messages
/// with at least one recoverable non-empty message.
pub fn is_valid(tokenizer: &Arc<dyn Tokenizer>, token_ids: &[TokenId]) -> bool {
    if token_ids.is_empty() {
        return false;
    }

    let has_start = token_ids.contains(&SpecialToken::Start.id());
    let has_message = token_ids.contains(&SpecialToken::Message.id());
    let has_close = token_ids.contains(&SpecialToken::End.id()) || token_ids.contains(&SpecialToken::Return.id());

    if !(has_start && has_message && has_close) {
        return false;
    }

    let mut parser = StreamParser::new(Arc::clone(tokenizer), Role::Assistant);
    for &id in token_ids {
        parser.process(id);
    }
    parser.process_eos();

    parser.messages().iter().any(|message| !message.text.trim().is_empty())
}

/// Look up a channel on a parsed response. Typed channels resolve to their
/// dedicated fields; anything else falls through to the channels map.
pub fn extract_channel<'a>(parsed: &'a ParsedResponse, channel: &str) -> Option<&'a str> {
    match channel {
        "final" => Some(parsed.final_text.as_str()),
        "analysis" => parsed.analysis.as_deref(),
        "commentary" => parsed.commentary.as_deref(),
        other => parsed
            .channels
            .as_ref()
            .and_then(|channels| channels.get(other))
            .map(String::as_str),
    }
}

/// Remove every `<|…|>` control literal from decoded text.
pub fn strip_special_tokens(text: &str) -> String {
    SPECIAL_LITERAL.replace_all(text, "").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::HarmonyEncoding;

    fn tokenizer() -> Arc<dyn Tokenizer> {
        Arc::new(HarmonyEncoding::o200k().expect("o200k encoding should load"))
    }

    fn encode(tokenizer: &Arc<dyn Tokenizer>, text: &str) -> Vec<TokenId> {
        tokenizer.encode(text, true)
    }

    #[test]
    fn extracts_channels_from_a_complete_response() {
        let tokenizer = tokenizer();
        let raw = "<|channel|>analysis<|message|>User asks \"2+2\". Simple.<|end|>\
                   <|start|>assistant<|channel|>final<|message|>2 + 2 = 4<|return|>";

        let parsed = parse_tokens(&tokenizer, &encode(&tokenizer, raw), false).expect("parse should succeed");

        assert_eq!(parsed.final_text, "2 + 2 = 4");
        assert_eq!(parsed.analysis.as_deref(), Some("User asks \"2+2\". Simple."));
        assert_eq!(parsed.commentary, None);
        assert_eq!(parsed.finish_reason, Some(FinishReason::Stop));
        assert_eq!(parsed.meta.message_count, 2);
        assert!(parsed.meta.error.is_none());
    }

    #[test]
    fn extract_final_only_skips_side_channels() {
        let tokenizer = tokenizer();
        let raw = "<|channel|>analysis<|message|>thinking...<|end|>\
                   <|start|>assistant<|channel|>final<|message|>done<|return|>";

        let parsed = parse_tokens(&tokenizer, &encode(&tokenizer, raw), true).expect("parse should succeed");

        assert_eq!(parsed.final_text, "done");
        assert_eq!(parsed.analysis, None);
        // The raw channel map still carries everything for diagnostics.
        assert!(parsed.channels.as_ref().is_some_and(|map| map.contains_key("analysis")));
    }

    #[test]
    fn call_marker_reports_tool_use() {
        let tokenizer = tokenizer();
        let raw = "<|channel|>commentary<|message|>Need the weather tool.<|end|>\
                   <|start|>assistant<|channel|>tool_use<|message|>{\"location\":\"SF\"}<|call|>";

        let parsed = parse_tokens(&tokenizer, &encode(&tokenizer, raw), false).expect("parse should succeed");

        assert_eq!(parsed.finish_reason, Some(FinishReason::ToolUse));
        assert_eq!(extract_channel(&parsed, "tool_use"), Some("{\"location\":\"SF\"}"));
        assert_eq!(parsed.commentary.as_deref(), Some("Need the weather tool."));
    }

    #[test]
    fn truncated_stream_closes_implicitly_with_length() {
        let tokenizer = tokenizer();
        let raw = "<|channel|>final<|message|>The answer is";

        let parsed = parse_tokens(&tokenizer, &encode(&tokenizer, raw), false).expect("parse should succeed");

        assert_eq!(parsed.final_text, "The answer is");
        assert_eq!(parsed.finish_reason, Some(FinishReason::Length));
    }

    #[test]
    fn start_inside_content_is_an_implicit_end() {
        let tokenizer = tokenizer();
        let raw = "<|channel|>analysis<|message|>half a thought\
                   <|start|>assistant<|channel|>final<|message|>whole answer<|return|>";

        let parsed = parse_tokens(&tokenizer, &encode(&tokenizer, raw), false).expect("parse should succeed");

        assert_eq!(parsed.analysis.as_deref(), Some("half a thought"));
        assert_eq!(parsed.final_text, "whole answer");
    }

    #[test]
    fn end_closes_the_message_but_not_the_stream() {
        let tokenizer = tokenizer();
        let raw = "<|channel|>final<|message|>part one<|end|>\
                   <|start|>assistant<|channel|>final<|message|> part two<|return|>";

        let parsed = parse_tokens(&tokenizer, &encode(&tokenizer, raw), false).expect("parse should succeed");

        assert_eq!(parsed.final_text, "part one part two");
        assert_eq!(parsed.finish_reason, Some(FinishReason::Stop));
    }

    #[test]
    fn unchanneled_output_falls_back_to_stripped_text() {
        let tokenizer = tokenizer();
        let raw = "<|message|>Hello there.<|return|>";

        let parsed = parse_tokens(&tokenizer, &encode(&tokenizer, raw), false).expect("parse should succeed");

        assert_eq!(parsed.final_text, "Hello there.");
        assert!(parsed.meta.error.is_some());
    }

    #[test]
    fn plain_text_output_is_surfaced_verbatim() {
        let tokenizer = tokenizer();
        let ids = tokenizer.encode("Just a plain answer.", false);

        let parsed = parse_tokens(&tokenizer, &ids, false).expect("parse should succeed");

        assert_eq!(parsed.final_text, "Just a plain answer.");
        assert!(parsed.meta.error.is_some());
    }

    #[test]
    fn final_text_never_contains_control_literals() {
        let tokenizer = tokenizer();

        let samples = [
            "<|channel|>final<|message|>ok<|return|>",
            "<|start|><|start|><|message|><|end|>",
            "garbage <|channel|> more garbage",
            "<|return|>",
        ];

        for raw in samples {
            let parsed = parse_tokens(&tokenizer, &encode(&tokenizer, raw), false).expect("parse should succeed");
            assert!(
                !parsed.final_text.contains("<|"),
                "control literal leaked for {raw:?}: {:?}",
                parsed.final_text
            );
        }
    }

    #[test]
    fn empty_input_is_the_only_error() {
        let tokenizer = tokenizer();
        assert!(parse_tokens(&tokenizer, &[], false).is_err());
        assert!(parse_text(&tokenizer, "", false).is_err());
    }

    #[test]
    fn text_mode_matches_token_mode() {
        let tokenizer = tokenizer();
        let raw = "<|channel|>final<|message|>same either way<|return|>";

        let from_text = parse_text(&tokenizer, raw, false).expect("parse should succeed");
        let from_tokens = parse_tokens(&tokenizer, &encode(&tokenizer, raw), false).expect("parse should succeed");

        assert_eq!(from_text.final_text, from_tokens.final_text);
        assert_eq!(from_text.finish_reason, from_tokens.finish_reason);
    }

    #[test]
    fn streaming_deltas_concatenate_to_the_batch_final() {
        let tokenizer = tokenizer();
        let raw = "<|channel|>analysis<|message|>hidden<|end|>\
                   <|start|>assistant<|channel|>final<|message|>2 + 2 = 4<|return|>";
        let ids = encode(&tokenizer, raw);

        let mut parser = StreamParser::new(Arc::clone(&tokenizer), Role::Assistant);
        let mut streamed = String::new();
        let mut finish = None;

        for &id in &ids {
            if let Some(event) = parser.process(id) {
                assert!(!event.delta.contains("<|"));

                if event.is_final {
                    streamed.push_str(&event.delta);
                }
                if event.finish_reason.is_some() {
                    finish = event.finish_reason;
                }
            }
        }
        parser.process_eos();

        let batch = parse_tokens(&tokenizer, &ids, true).expect("parse should succeed");
        assert_eq!(streamed.trim(), batch.final_text);
        assert_eq!(finish, Some(FinishReason::Stop));
    }

    #[test]
    fn stream_parser_reports_non_final_channels() {
        let tokenizer = tokenizer();
        let ids = encode(&tokenizer, "<|channel|>analysis<|message|>let me think<|end|>");

        let mut parser = StreamParser::new(Arc::clone(&tokenizer), Role::Assistant);
        let mut saw_analysis = false;

        for &id in &ids {
            if let Some(event) = parser.process(id) {
                assert_eq!(event.channel, "analysis");
                assert!(!event.is_final);
                saw_analysis = true;
            }
        }

        assert!(saw_analysis);
    }

    #[test]
    fn eos_without_open_message_reports_nothing() {
        let tokenizer = tokenizer();
        let ids = encode(&tokenizer, "<|channel|>final<|message|>done<|return|>");

        let mut parser = StreamParser::new(Arc::clone(&tokenizer), Role::Assistant);
        for &id in &ids {
            parser.process(id);
        }

        assert!(parser.process_eos().is_none());
        assert_eq!(parser.finish_reason(), Some(FinishReason::Stop));
    }

    #[test]
    fn validates_well_formed_streams() {
        let tokenizer = tokenizer();

        let valid = encode(
            &tokenizer,
            "<|start|>assistant<|channel|>final<|message|>hello<|return|>",
        );
        assert!(is_valid(&tokenizer, &valid));

        let no_framing = tokenizer.encode("hello", false);
        assert!(!is_valid(&tokenizer, &no_framing));

        let unterminated = encode(&tokenizer, "<|start|>assistant<|message|>hello");
        assert!(!is_valid(&tokenizer, &unterminated));

        assert!(!is_valid(&tokenizer, &[]));
    }

    #[test]
    fn roles_are_read_through_either_header_form() {
        let tokenizer = tokenizer();
        let raw = "<|start|>user<|message|>a question<|end|>\
                   <|start|>assistant<|channel|>final<|message|>an answer<|return|>";

        let mut parser = StreamParser::new(Arc::clone(&tokenizer), Role::Assistant);
        for id in encode(&tokenizer, raw) {
            parser.process(id);
        }

        let roles: Vec<&str> = parser.messages().iter().map(|message| message.role.as_str()).collect();
        assert_eq!(roles, vec!["user", "assistant"]);
    }

    #[test]
    fn extract_channel_prefers_dedicated_fields() {
        let tokenizer = tokenizer();
        let raw = "<|channel|>analysis<|message|>thinking<|end|>\
                   <|start|>assistant<|channel|>final<|message|>answer<|return|>";

        let parsed = parse_tokens(&tokenizer, &encode(&tokenizer, raw), false).expect("parse should succeed");

        assert_eq!(extract_channel(&parsed, "final"), Some("answer"));
        assert_eq!(extract_channel(&parsed, "analysis"), Some("thinking"));
        assert_eq!(extract_channel(&parsed, "commentary"), None);
        assert_eq!(extract_channel(&parsed, "does-not-exist"), None);
    }

    #[test]
    fn strips_control_literals_from_text() {
        assert_eq!(
            strip_special_tokens("<|start|>assistant<|message|>hi<|end|>"),
            "assistanthi"
        );
        assert_eq!(strip_special_tokens("no tokens here"), "no tokens here");
    }
}
