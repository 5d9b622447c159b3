use std::sync::Mutex;

use rusqlite::Connection;

use crate::db::init_db;
use crate::error::Result;
use crate::types::*;
use crate::{conversations, graph, insights, processing_log, topics, users};

/// Ground truth for the knowledge graph: users, conversations, messages,
/// topics, edges, insights and the processing log, all on one SQLite
/// connection guarded by a mutex.
///
/// A single mutex (rather than one per table) gives every write a total
/// order, which is what makes the "user message persisted before assistant
/// message, and a concurrent second turn observes the first" guarantee of
/// §5 hold without extra bookkeeping.
pub struct GraphStore {
    conn: Mutex<Connection>,
}

impl GraphStore {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::new(conn)
    }

    // -- users ---------------------------------------------------------

    pub fn get_or_create_user(&self, user_id: &str) -> Result<User> {
        let conn = self.conn.lock().unwrap();
        users::get_or_create_user(&conn, user_id)
    }

    pub fn set_consent_global(&self, user_id: &str, consent: bool) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        users::set_consent_global(&conn, user_id, consent)
    }

    pub fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        let conn = self.conn.lock().unwrap();
        users::get_user(&conn, user_id)
    }

    // -- conversations ---------------------------------------------------

    pub fn create_conversation(&self, conversation_id: &str, user_id: &str) -> Result<Conversation> {
        let conn = self.conn.lock().unwrap();
        conversations::create_conversation(&conn, conversation_id, user_id)
    }

    pub fn get_conversation(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        let conn = self.conn.lock().unwrap();
        conversations::get_conversation(&conn, conversation_id)
    }

    pub fn add_message(&self, conversation_id: &str, role: MessageRole, content: &str) -> Result<Message> {
        let conn = self.conn.lock().unwrap();
        conversations::add_message(&conn, conversation_id, role, content)
    }

    pub fn get_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let conn = self.conn.lock().unwrap();
        conversations::get_messages(&conn, conversation_id)
    }

    pub fn set_global_sharing_blocked(&self, conversation_id: &str, blocked: bool) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conversations::set_global_sharing_blocked(&conn, conversation_id, blocked)
    }

    pub fn is_global_sharing_blocked(&self, conversation_id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        conversations::is_global_sharing_blocked(&conn, conversation_id)
    }

    pub fn list_user_conversations(&self, user_id: &str, limit: usize) -> Result<Vec<Conversation>> {
        let conn = self.conn.lock().unwrap();
        conversations::list_user_conversations(&conn, user_id, limit)
    }

    pub fn get_due_conversations(&self, idle_threshold_secs: i64, limit: usize) -> Result<Vec<DueConversation>> {
        let conn = self.conn.lock().unwrap();
        conversations::get_due_conversations(&conn, idle_threshold_secs, limit)
    }

    pub fn mark_processed(
        &self,
        conversation_id: &str,
        is_useful: bool,
        reason: Option<&str>,
        summary: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conversations::mark_processed(&conn, conversation_id, is_useful, reason, summary)
    }

    pub fn delete_conversation_from_user_graph(&self, conversation_id: &str, user_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conversations::delete_conversation_from_user_graph(&conn, conversation_id, user_id)
    }

    // -- topics ----------------------------------------------------------

    pub fn get_or_create_topic(&self, name: &str) -> Result<Topic> {
        let conn = self.conn.lock().unwrap();
        topics::get_or_create_topic(&conn, name)
    }

    pub fn link_topics(&self, topic_a: i64, topic_b: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        topics::link_topics(&conn, topic_a, topic_b)
    }

    pub fn get_topic_by_name(&self, name: &str) -> Result<Option<Topic>> {
        let conn = self.conn.lock().unwrap();
        topics::get_topic_by_name(&conn, name)
    }

    pub fn get_all_user_topics(&self, user_id: &str) -> Result<Vec<Topic>> {
        let conn = self.conn.lock().unwrap();
        topics::get_all_user_topics(&conn, user_id)
    }

    pub fn get_suggested_topics(&self, current_topic_ids: &[i64], limit: usize) -> Result<Vec<Topic>> {
        let conn = self.conn.lock().unwrap();
        topics::get_suggested_topics(&conn, current_topic_ids, limit)
    }

    pub fn link_topics_with_strength(&self, topic_a: i64, topic_b: i64, strength: Option<f64>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        topics::link_topics_with_strength(&conn, topic_a, topic_b, strength)
    }

    // -- insights ----------------------------------------------------------

    pub fn save_insight(
        &self,
        conversation_id: &str,
        user_id: &str,
        content: &str,
        importance_score: f64,
    ) -> Result<Insight> {
        let conn = self.conn.lock().unwrap();
        insights::save_insight(&conn, conversation_id, user_id, content, importance_score)
    }

    pub fn set_insight_vector_ref(&self, insight_id: i64, vector_ref: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        insights::set_insight_vector_ref(&conn, insight_id, vector_ref)
    }

    pub fn link_insight_topic(&self, insight_id: i64, topic_id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        insights::link_insight_topic(&conn, insight_id, topic_id)
    }

    pub fn link_conversation_topic(&self, conversation_id: &str, topic_id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        insights::link_conversation_topic(&conn, conversation_id, topic_id)
    }

    pub fn get_recent_user_insights(&self, user_id: &str, limit: usize) -> Result<Vec<InsightWithTopics>> {
        let conn = self.conn.lock().unwrap();
        insights::get_recent_user_insights(&conn, user_id, limit)
    }

    pub fn get_related_insights(&self, user_id: &str, topic_ids: &[i64], limit: usize) -> Result<Vec<InsightWithTopics>> {
        let conn = self.conn.lock().unwrap();
        insights::get_related_insights(&conn, user_id, topic_ids, limit)
    }

    pub fn get_global_insights(&self, excluding_user: &str, limit: usize) -> Result<Vec<GlobalInsight>> {
        let conn = self.conn.lock().unwrap();
        insights::get_global_insights(&conn, excluding_user, limit)
    }

    pub fn get_global_conversation_summaries(
        &self,
        excluding_user: &str,
        limit: usize,
    ) -> Result<Vec<GlobalConversationSummary>> {
        let conn = self.conn.lock().unwrap();
        insights::get_global_conversation_summaries(&conn, excluding_user, limit)
    }

    pub fn upsert_global_insight(&self, conversation_id: &str, content: &str, topic_ids: &[i64]) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        insights::upsert_global_insight(&conn, conversation_id, content, topic_ids)
    }

    pub fn delete_insight(&self, insight_id: i64) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        insights::delete_insight(&conn, insight_id)
    }

    // -- graph aggregates --------------------------------------------------

    pub fn get_graph_nodes(&self, user_id: Option<&str>) -> Result<Vec<GraphNode>> {
        let conn = self.conn.lock().unwrap();
        graph::get_graph_nodes(&conn, user_id)
    }

    pub fn get_graph_edges(&self, node_ids: &[i64]) -> Result<Vec<GraphEdge>> {
        let conn = self.conn.lock().unwrap();
        graph::get_graph_edges(&conn, node_ids)
    }

    pub fn get_graph_stats(&self, user_id: Option<&str>) -> Result<GraphStats> {
        let conn = self.conn.lock().unwrap();
        graph::get_graph_stats(&conn, user_id)
    }

    pub fn get_user_knowledge_map(&self, user_id: &str) -> Result<UserKnowledgeMap> {
        let conn = self.conn.lock().unwrap();
        graph::get_user_knowledge_map(&conn, user_id)
    }

    pub fn get_global_knowledge_map(&self, excluding_user: &str) -> Result<GlobalKnowledgeMap> {
        let conn = self.conn.lock().unwrap();
        graph::get_global_knowledge_map(&conn, excluding_user)
    }

    // -- processing log ------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn append_processing_log(
        &self,
        conversation_id: &str,
        user_id: &str,
        is_useful: bool,
        reason: Option<&str>,
        topics_extracted: &[String],
        insights_count: u32,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        processing_log::append_log(
            &conn,
            conversation_id,
            user_id,
            is_useful,
            reason,
            topics_extracted,
            insights_count,
        )
    }

    pub fn get_processing_logs(&self, limit: usize) -> Result<Vec<ProcessingLogEntry>> {
        let conn = self.conn.lock().unwrap();
        processing_log::get_logs(&conn, limit)
    }

    pub fn get_processing_log_for_conversation(&self, conversation_id: &str) -> Result<Option<ProcessingLogEntry>> {
        let conn = self.conn.lock().unwrap();
        processing_log::get_log_for_conversation(&conn, conversation_id)
    }

    pub fn get_processor_stats(&self) -> Result<processing_log::ProcessorStats> {
        let conn = self.conn.lock().unwrap();
        processing_log::get_stats(&conn)
    }

    /// Run a closure with exclusive access to the connection so the deferred
    /// processor's multi-step promotion (§4.2 step 5) executes as a single
    /// logical transaction.
    pub fn with_transaction<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch("BEGIN IMMEDIATE")?;
        match f(&conn) {
            Ok(value) => {
                conn.execute_batch("COMMIT")?;
                Ok(value)
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_rolls_back_on_error() {
        let store = GraphStore::new(Connection::open_in_memory().unwrap()).unwrap();
        store.get_or_create_user("u1").unwrap();
        let result: Result<()> = store.with_transaction(|conn| {
            conversations::create_conversation(conn, "c1", "u1")?;
            Err(crate::error::StoreError::InvalidInput("forced".to_string()))
        });
        assert!(result.is_err());
        assert!(store.get_conversation("c1").unwrap().is_none());
    }
}
