//! PII gate run after a completed chat turn (§4.1 item 6). Once a
//! conversation is flagged, every later turn skips the check — there's
//! nothing to gain from re-screening a conversation that can never be
//! shared globally again.
//!
//! This is deliberately independent of `User.consent_global` (the
//! profile-level opt-in to having *any* conversation promoted into the
//! global pool, §3). The consent this module reads is the per-request
//! `globalSharingConsent` the caller passes for *this* exchange, because a
//! PII hit can warrant blocking even for a user who has globally opted in.

use loomgraph_llm::ops::PiiDetection;
use loomgraph_llm::provider::LlmProvider;
use loomgraph_store::GraphStore;
use tracing::debug;

/// Outcome of one PII-gate pass, surfaced to the HTTP layer via `ChatTurn`.
#[derive(Debug, Clone, Default)]
pub struct PiiOutcome {
    /// `Some` only when the probe actually ran (not trivial, not already
    /// blocked) — the `piiDetection?` field of the response.
    pub detection: Option<PiiDetection>,
    pub global_sharing_blocked: bool,
}

/// Screen a completed exchange for PII. `consent` is the caller's per-request
/// `globalSharingConsent`: `Some(false)` blocks immediately on detection,
/// `None` leaves the flag untouched and returns the detection for the caller
/// to act on (the UI is expected to call the PII-consent endpoint next),
/// `Some(true)` is a no-op on the flag either way.
pub async fn run(
    store: &GraphStore,
    provider: &dyn LlmProvider,
    model: &str,
    conversation_id: &str,
    user_query: &str,
    assistant_response: &str,
    consent: Option<bool>,
) -> PiiOutcome {
    let already_blocked = store.is_global_sharing_blocked(conversation_id).unwrap_or(false);

    if already_blocked || is_trivial_exchange(user_query, assistant_response) {
        return PiiOutcome {
            detection: None,
            global_sharing_blocked: already_blocked,
        };
    }

    let detection = loomgraph_llm::ops::detect_pii(provider, model, user_query, assistant_response).await;
    if !detection.contains_pii {
        return PiiOutcome {
            detection: None,
            global_sharing_blocked: false,
        };
    }

    if consent == Some(false) {
        debug!(
            conversation_id = %conversation_id,
            pii_types = ?detection.pii_types,
            "blocking global sharing: PII detected, consent declined"
        );
        let _ = store.set_global_sharing_blocked(conversation_id, true);
    }

    let global_sharing_blocked = store.is_global_sharing_blocked(conversation_id).unwrap_or(false);
    PiiOutcome {
        detection: Some(detection),
        global_sharing_blocked,
    }
}

fn is_trivial_exchange(user_query: &str, assistant_response: &str) -> bool {
    user_query.trim().len() < 4 && assistant_response.trim().len() < 40
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use loomgraph_llm::provider::{ChatRequest, ChatResponse, ProviderError};
    use rusqlite::Connection;

    struct FakeDetector {
        contains_pii: bool,
    }

    #[async_trait]
    impl LlmProvider for FakeDetector {
        fn name(&self) -> &str {
            "fake-detector"
        }

        async fn send(&self, _req: &ChatRequest) -> std::result::Result<ChatResponse, ProviderError> {
            let content = if self.contains_pii {
                r#"{"contains_pii": true, "pii_types": ["email"], "explanation": "contains an email address"}"#
            } else {
                r#"{"contains_pii": false, "pii_types": [], "explanation": ""}"#
            };
            Ok(ChatResponse {
                content: content.to_string(),
                model: "fake".to_string(),
                tokens_in: 1,
                tokens_out: 1,
                stop_reason: "end_turn".to_string(),
            })
        }
    }

    fn store() -> GraphStore {
        let store = GraphStore::new(Connection::open_in_memory().unwrap()).unwrap();
        store.get_or_create_user("u1").unwrap();
        store.create_conversation("c1", "u1").unwrap();
        store
    }

    #[tokio::test]
    async fn consent_omitted_returns_detection_without_blocking() {
        let store = store();
        let provider = FakeDetector { contains_pii: true };
        let outcome = run(&store, &provider, "m", "c1", "reach me at a@b.com", "noted", None).await;
        assert!(outcome.detection.is_some());
        assert!(!outcome.global_sharing_blocked);
        assert!(!store.is_global_sharing_blocked("c1").unwrap());
    }

    #[tokio::test]
    async fn consent_declined_blocks_immediately() {
        let store = store();
        let provider = FakeDetector { contains_pii: true };
        let outcome = run(&store, &provider, "m", "c1", "reach me at a@b.com", "noted", Some(false)).await;
        assert!(outcome.global_sharing_blocked);
        assert!(store.is_global_sharing_blocked("c1").unwrap());
    }

    #[tokio::test]
    async fn consent_granted_does_not_block() {
        let store = store();
        let provider = FakeDetector { contains_pii: true };
        let outcome = run(&store, &provider, "m", "c1", "reach me at a@b.com", "noted", Some(true)).await;
        assert!(!outcome.global_sharing_blocked);
        assert!(!store.is_global_sharing_blocked("c1").unwrap());
    }

    #[tokio::test]
    async fn no_pii_skips_consent_entirely() {
        let store = store();
        let provider = FakeDetector { contains_pii: false };
        let outcome = run(&store, &provider, "m", "c1", "a long enough user query here", "a long enough assistant reply here", Some(false)).await;
        assert!(outcome.detection.is_none());
        assert!(!outcome.global_sharing_blocked);
    }

    #[tokio::test]
    async fn already_blocked_conversation_skips_the_probe() {
        let store = store();
        store.set_global_sharing_blocked("c1", true).unwrap();
        let provider = FakeDetector { contains_pii: true };
        let outcome = run(&store, &provider, "m", "c1", "reach me at a@b.com", "noted", None).await;
        assert!(outcome.detection.is_none());
        assert!(outcome.global_sharing_blocked);
    }
}
