//! Context assembly for the chat pipeline (§4.1 item 4). Pulls grounding
//! material from four sources — the user's own insight history, the shared
//! global pool, topics the user hasn't touched recently, and a semantic
//! search over the vector index — and renders it into a single prompt
//! preamble. Every source degrades to "contributes nothing" on failure;
//! context assembly itself never fails the chat turn.

use loomgraph_store::GraphStore;
use loomgraph_vector::VectorAdapter;

const MAX_PERSONAL_INSIGHTS: usize = 15;
const MAX_GLOBAL_SUMMARIES: usize = 15;
const MAX_GLOBAL_INSIGHTS: usize = 15;
const MAX_FALLBACK_INSIGHTS: usize = 3;
const MAX_VECTOR_HITS: usize = 3;

/// Evidence that grounded the answer — the `relatedContext` surfaced in the
/// chat response, one entry per personal insight actually rendered into the
/// prompt (§4.1: "topic and score").
#[derive(Debug, Clone, serde::Serialize)]
pub struct RelatedContextItem {
    pub topic: String,
    pub score: f64,
}

/// A rendered context block plus the personal-insight evidence behind it.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct AssembledContext {
    pub text: String,
    pub related: Vec<RelatedContextItem>,
}

/// Build the system-prompt context block for one chat turn.
pub async fn assemble(
    store: &GraphStore,
    vector: Option<&VectorAdapter>,
    user_id: &str,
    query: &str,
) -> AssembledContext {
    let mut sections = Vec::new();
    let mut related = Vec::new();

    let personal = store
        .get_recent_user_insights(user_id, MAX_PERSONAL_INSIGHTS)
        .unwrap_or_default();
    if !personal.is_empty() {
        let mut s = String::from("### What you know about this person\n");
        for i in &personal {
            s.push_str(&format!("- {}\n", i.insight.content));
            related.push(RelatedContextItem {
                topic: i.topics.join(", "),
                score: i.insight.importance_score,
            });
        }
        sections.push(s);
    } else {
        let topics = store.get_all_user_topics(user_id).unwrap_or_default();
        if !topics.is_empty() {
            let topic_ids: Vec<i64> = topics.iter().map(|t| t.id).collect();
            let fallback = store
                .get_related_insights(user_id, &topic_ids, MAX_FALLBACK_INSIGHTS)
                .unwrap_or_default();
            if !fallback.is_empty() {
                let mut s = String::from("### Topics this person has touched on before\n");
                for i in &fallback {
                    s.push_str(&format!("- {}\n", i.insight.content));
                    related.push(RelatedContextItem {
                        topic: i.topics.join(", "),
                        score: i.insight.importance_score,
                    });
                }
                sections.push(s);
            }
        }
    }

    let global_summaries = store
        .get_global_conversation_summaries(user_id, MAX_GLOBAL_SUMMARIES)
        .unwrap_or_default();
    if !global_summaries.is_empty() {
        let mut s = String::from("### Other conversations the community has shared\n");
        for g in &global_summaries {
            s.push_str(&format!("- {}\n", g.summary));
        }
        sections.push(s);
    }

    let global_insights = store
        .get_global_insights(user_id, MAX_GLOBAL_INSIGHTS)
        .unwrap_or_default();
    if !global_insights.is_empty() {
        let mut s = String::from("### Shared community insights\n");
        for g in &global_insights {
            s.push_str(&format!("- {}\n", g.content));
        }
        sections.push(s);
    }

    let hits = loomgraph_vector::search_or_empty(vector, query, user_id, MAX_VECTOR_HITS).await;
    if !hits.is_empty() {
        let mut s = String::from("### Semantically related material\n");
        for h in &hits {
            s.push_str(&format!("- {}\n", h.content));
        }
        sections.push(s);
    }

    AssembledContext {
        text: sections.join("\n"),
        related,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn store() -> GraphStore {
        GraphStore::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn empty_graph_yields_empty_context() {
        let store = store();
        store.get_or_create_user("u1").unwrap();
        let ctx = assemble(&store, None, "u1", "hello").await;
        assert!(ctx.text.is_empty());
        assert!(ctx.related.is_empty());
    }

    #[tokio::test]
    async fn personal_insight_surfaces_in_context() {
        let store = store();
        store.get_or_create_user("u1").unwrap();
        store.create_conversation("c1", "u1").unwrap();
        store
            .save_insight("c1", "u1", "likes rust and distributed systems", 0.8)
            .unwrap();
        let ctx = assemble(&store, None, "u1", "what do I like?").await;
        assert!(ctx.text.contains("likes rust and distributed systems"));
        assert_eq!(ctx.related.len(), 1);
        assert_eq!(ctx.related[0].score, 0.8);
    }

    #[tokio::test]
    async fn nonempty_personal_pool_never_triggers_the_topic_fallback() {
        let store = store();
        store.get_or_create_user("u1").unwrap();
        store.create_conversation("c1", "u1").unwrap();
        store.save_insight("c1", "u1", "likes rust", 0.7).unwrap();

        // a single personal insight is non-empty, so the topic-fallback
        // section (previously gated on `personal.len() < 3`) must not
        // appear alongside it.
        let ctx = assemble(&store, None, "u1", "what do I like?").await;
        assert!(!ctx.text.contains("Topics this person has touched on before"));
    }
}
