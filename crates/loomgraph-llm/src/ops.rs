//! The four typed operations the chat pipeline and deferred processor are
//! built on (§4.4): classify a query, answer it, detect PII in the
//! exchange, and analyze a finished conversation for promotion into the
//! graph. Every operation tolerates upstream failure by returning a neutral
//! default instead of propagating an error — context assembly and
//! extraction both degrade gracefully rather than fail the caller (§7).

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::provider::{ChatRequest, LlmProvider, Message, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseLength {
    Short,
    Medium,
    Long,
}

impl ResponseLength {
    pub fn max_tokens(&self) -> u32 {
        match self {
            ResponseLength::Short => 100,
            ResponseLength::Medium => 512,
            ResponseLength::Long => 1024,
        }
    }
}

impl Default for ResponseLength {
    fn default() -> Self {
        ResponseLength::Medium
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryClassification {
    pub is_trivial: bool,
    pub suggested_response_length: ResponseLength,
}

impl Default for QueryClassification {
    fn default() -> Self {
        Self {
            is_trivial: false,
            suggested_response_length: ResponseLength::Medium,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PiiDetection {
    pub contains_pii: bool,
    pub pii_types: Vec<String>,
    pub explanation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationAnalysis {
    pub is_useful: bool,
    pub reason: String,
    pub topics: Vec<String>,
    pub insights: Vec<String>,
    pub summary: String,
    pub related_topics: Vec<String>,
    pub is_complete: bool,
}

impl Default for ConversationAnalysis {
    fn default() -> Self {
        Self {
            is_useful: false,
            reason: String::new(),
            topics: Vec::new(),
            insights: Vec::new(),
            summary: String::new(),
            related_topics: Vec::new(),
            is_complete: true,
        }
    }
}

const MAX_ANALYSIS_TOPICS: usize = 6;
const MAX_ANALYSIS_INSIGHTS: usize = 4;

/// Classify a user query before the main completion: is it trivial (a
/// greeting, an acknowledgement) and how long should the reply be.
pub async fn classify_query(provider: &dyn LlmProvider, model: &str, query: &str) -> QueryClassification {
    let system = "You classify a single user message for a chat assistant. \
        Respond with a JSON object only: {\"is_trivial\": bool, \"suggested_response_length\": \"short\"|\"medium\"|\"long\"}. \
        Trivial messages are greetings, thanks, or small talk that need no depth.";

    let req = ChatRequest {
        model: model.to_string(),
        system: system.to_string(),
        messages: vec![Message {
            role: Role::User,
            content: query.to_string(),
        }],
        max_tokens: 100,
        temperature: 0.1,
        response_format_json: true,
    };

    match provider.send(&req).await {
        Ok(resp) => parse_json_with_fences(&resp.content).unwrap_or_else(|| {
            warn!("classify_query: unparseable response, using default");
            QueryClassification::default()
        }),
        Err(e) => {
            warn!(error = %e, "classify_query failed, using default");
            QueryClassification::default()
        }
    }
}

/// Produce the grounded reply. `context` is the assembled prompt preamble
/// from §4.1 (personal insights, global pool, semantic hits) and may be empty.
pub async fn chat(
    provider: &dyn LlmProvider,
    model: &str,
    messages: Vec<Message>,
    context: Option<&str>,
    length: ResponseLength,
) -> Result<crate::provider::ChatResponse, crate::provider::ProviderError> {
    let system = build_system_prompt(context);
    let req = ChatRequest {
        model: model.to_string(),
        system,
        messages,
        max_tokens: length.max_tokens(),
        temperature: 0.7,
        response_format_json: false,
    };
    provider.send(&req).await
}

/// Streaming counterpart of [`chat`] — forwards chunks to `tx` as they arrive.
pub async fn chat_stream(
    provider: &dyn LlmProvider,
    model: &str,
    messages: Vec<Message>,
    context: Option<&str>,
    length: ResponseLength,
    tx: tokio::sync::mpsc::Sender<crate::provider::StreamEvent>,
) -> Result<(), crate::provider::ProviderError> {
    let system = build_system_prompt(context);
    let req = ChatRequest {
        model: model.to_string(),
        system,
        messages,
        max_tokens: length.max_tokens(),
        temperature: 0.7,
        response_format_json: false,
    };
    provider.send_stream(&req, tx).await
}

fn build_system_prompt(context: Option<&str>) -> String {
    let persona = "You are a helpful assistant with a persistent, personal knowledge graph of \
        past conversations. Use any grounding context below when it's relevant; don't mention \
        the mechanics of how you remember things.";
    match context {
        Some(c) if !c.trim().is_empty() => format!("{persona}\n\n## Context\n{c}"),
        _ => persona.to_string(),
    }
}

/// Ask whether a (query, response) pair contains personally identifiable
/// information that should not leave the user's private graph.
pub async fn detect_pii(
    provider: &dyn LlmProvider,
    model: &str,
    user_query: &str,
    assistant_response: &str,
) -> PiiDetection {
    let system = "You screen a chat exchange for personally identifiable information (PII): \
        full names, email addresses, phone numbers, postal addresses, government ID numbers, \
        medical information, financial details, dates of birth, and account credentials. \
        Respond with a JSON object only: \
        {\"contains_pii\": bool, \"pii_types\": [string], \"explanation\": string}.";

    let content = format!("User: {user_query}\n\nAssistant: {assistant_response}");
    let req = ChatRequest {
        model: model.to_string(),
        system: system.to_string(),
        messages: vec![Message {
            role: Role::User,
            content,
        }],
        max_tokens: 256,
        temperature: 0.1,
        response_format_json: true,
    };

    match provider.send(&req).await {
        Ok(resp) => parse_json_with_fences(&resp.content).unwrap_or_default(),
        Err(e) => {
            warn!(error = %e, "detect_pii failed, using default");
            PiiDetection::default()
        }
    }
}

/// Classify a finished conversation for promotion into the graph (§4.2 step 3).
pub async fn analyze_conversation(
    provider: &dyn LlmProvider,
    model: &str,
    transcript: &[(String, String)],
) -> ConversationAnalysis {
    let system = "You analyze a finished conversation between a user and an assistant to decide \
        whether it is worth remembering. Respond with a JSON object only: \
        {\"is_useful\": bool, \"reason\": string, \"topics\": [string] (at most 6), \
        \"insights\": [string] (at most 4, concrete takeaways), \"summary\": string, \
        \"related_topics\": [string], \"is_complete\": bool}. \
        A conversation is useful if it taught something durable about the user or the world; \
        greetings, small talk, and abandoned one-liners are not useful.";

    let body = transcript
        .iter()
        .map(|(role, content)| format!("{role}: {content}"))
        .collect::<Vec<_>>()
        .join("\n");

    let req = ChatRequest {
        model: model.to_string(),
        system: system.to_string(),
        messages: vec![Message {
            role: Role::User,
            content: body,
        }],
        max_tokens: 600,
        temperature: 0.2,
        response_format_json: true,
    };

    match provider.send(&req).await {
        Ok(resp) => match parse_json_with_fences::<ConversationAnalysis>(&resp.content) {
            Some(mut analysis) => {
                analysis.topics.truncate(MAX_ANALYSIS_TOPICS);
                analysis.insights.truncate(MAX_ANALYSIS_INSIGHTS);
                analysis
            }
            None => {
                warn!("analyze_conversation: unparseable response, using default");
                ConversationAnalysis::default()
            }
        },
        Err(e) => {
            warn!(error = %e, "analyze_conversation failed, using default");
            ConversationAnalysis::default()
        }
    }
}

/// Parse a JSON object out of an LLM response, tolerating a leading/trailing
/// ```` ```json ```` code fence (§9 design note: LLM JSON is duck-typed).
fn parse_json_with_fences<T: for<'de> Deserialize<'de>>(raw: &str) -> Option<T> {
    let trimmed = raw.trim();
    let stripped = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed)
        .trim();
    let stripped = stripped.strip_suffix("```").unwrap_or(stripped).trim();
    serde_json::from_str(stripped).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_json() {
        let v: QueryClassification =
            parse_json_with_fences(r#"{"is_trivial": true, "suggested_response_length": "short"}"#).unwrap();
        assert!(v.is_trivial);
        assert_eq!(v.suggested_response_length, ResponseLength::Short);
    }

    #[test]
    fn tolerates_code_fences() {
        let raw = "```json\n{\"is_trivial\": false, \"suggested_response_length\": \"long\"}\n```";
        let v: QueryClassification = parse_json_with_fences(raw).unwrap();
        assert!(!v.is_trivial);
        assert_eq!(v.suggested_response_length, ResponseLength::Long);
    }

    #[test]
    fn returns_none_on_garbage() {
        let v: Option<QueryClassification> = parse_json_with_fences("not json at all");
        assert!(v.is_none());
    }

    #[test]
    fn analysis_default_is_complete_and_empty() {
        let d = ConversationAnalysis::default();
        assert!(d.is_complete);
        assert!(!d.is_useful);
        assert!(d.topics.is_empty());
    }
}
