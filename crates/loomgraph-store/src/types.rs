use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub consent_global: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    pub summary: Option<String>,
    pub message_count: u32,
    pub created_at: String,
    pub updated_at: String,
    pub processed: bool,
    /// `None` = not yet judged, `Some(true/false)` = processor verdict.
    pub is_useful: Option<bool>,
    pub usefulness_reason: Option<String>,
    pub global_sharing_blocked: bool,
    pub deleted: bool,
    pub deleted_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

impl std::str::FromStr for MessageRole {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            other => Err(format!("unknown message role: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub conversation_id: String,
    pub role: MessageRole,
    pub content: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topic {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicRelation {
    pub id: i64,
    pub source_topic_id: i64,
    pub target_topic_id: i64,
    pub strength: f64,
    pub relation_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Insight {
    pub id: i64,
    pub conversation_id: String,
    pub user_id: String,
    pub content: String,
    pub importance_score: f64,
    pub vector_ref: Option<String>,
    pub created_at: String,
}

/// An insight together with the topics it was linked to — convenience
/// projection used by context-assembly and graph queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsightWithTopics {
    #[serde(flatten)]
    pub insight: Insight,
    pub topics: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalInsight {
    pub id: String,
    pub content: String,
    pub topic_ids: Vec<i64>,
    pub use_count: u32,
    pub created_at: String,
}

/// Conversation summary surfaced in the global pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConversationSummary {
    pub conversation_id: String,
    pub summary: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingLogEntry {
    pub id: i64,
    pub conversation_id: String,
    pub user_id: String,
    pub created_at: String,
    pub is_useful: bool,
    pub reason: Option<String>,
    pub topics_extracted: Vec<String>,
    pub insights_count: u32,
}

/// One row of the idle-selection query (§4.2): the minimum the processor
/// needs before it loads the full conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DueConversation {
    pub id: String,
    pub user_id: String,
}

/// A topic node as returned by the graph aggregate queries of §4.3/§6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub topic_id: i64,
    pub name: String,
    pub frequency: u32,
    pub normalized_frequency: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: i64,
    pub target: i64,
    pub strength: f64,
    #[serde(rename = "type")]
    pub relation_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphStats {
    pub topic_count: usize,
    pub edge_count: usize,
    pub insight_count: usize,
    pub conversation_count: usize,
}

/// The `graph` sub-object of a knowledge-map response (§6): the drawable
/// node/edge set, with dangling edges already excluded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSection {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

/// Combined map for one user's slice of the graph (§4.3 `getUserKnowledgeMap`,
/// §6 `/api/graph/user/:userId/map|full`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserKnowledgeMap {
    pub stats: GraphStats,
    pub graph: GraphSection,
    pub topics: Vec<Topic>,
    pub relations: Vec<TopicRelation>,
    pub insights: Vec<InsightWithTopics>,
    pub conversations: Vec<Conversation>,
}

/// Combined map for the whole graph (§6 `/api/graph/global`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalKnowledgeMap {
    pub stats: GraphStats,
    pub graph: GraphSection,
    pub topics: Vec<Topic>,
    pub relations: Vec<TopicRelation>,
    pub insights: Vec<GlobalInsight>,
    pub conversations: Vec<GlobalConversationSummary>,
}
