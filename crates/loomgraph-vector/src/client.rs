use tracing::warn;

use loomgraph_core::config::EmbeddingConfig;

use crate::error::{Result, VectorError};
use crate::types::{EmbeddingRequest, EmbeddingResponse, VectorHit};

/// Adapter over a remote embedding index (§4.5). Callers only ever see text
/// in and scored hits out — embedding happens inside the adapter, never in
/// the caller.
pub struct VectorAdapter {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    dimensions: Option<u32>,
}

impl VectorAdapter {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: config.api_key,
            base_url: config.base_url,
            model: config.model,
            dimensions: config.dimensions,
        }
    }

    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let req = EmbeddingRequest {
            model: &self.model,
            input: texts.to_vec(),
            dimensions: self.dimensions,
        };
        let resp = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(VectorError::Api {
                status,
                message: text,
            });
        }

        let mut parsed: EmbeddingResponse = resp
            .json()
            .await
            .map_err(|e| VectorError::Parse(e.to_string()))?;
        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }

    /// Upsert a single insight's content into the index, auto-embedding it
    /// first. Metadata (`user_id`, `topics`, `created_at`) is stored
    /// alongside the vector so `search` can filter by user.
    pub async fn store(&self, id: &str, content: &str, user_id: &str, topics: &[String]) -> Result<()> {
        let embedding = self.embed(&[content]).await?.pop().ok_or_else(|| {
            VectorError::Parse("embedding API returned no vectors".to_string())
        })?;

        let body = serde_json::json!({
            "id": id,
            "vector": embedding,
            "metadata": {
                "content": content,
                "user_id": user_id,
                "topics": topics.join(","),
                "created_at": chrono::Utc::now().to_rfc3339(),
            },
        });

        let resp = self
            .client
            .post(format!("{}/vectors/upsert", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            return Err(VectorError::IndexApi {
                status,
                message: text,
            });
        }
        Ok(())
    }

    /// Semantic search, optionally scoped to a user, returning hits above
    /// `MIN_SCORE` (§4.1 item 4).
    pub async fn search(&self, query: &str, user_id: Option<&str>, top_k: usize) -> Result<Vec<VectorHit>> {
        const MIN_SCORE: f32 = 0.5;

        let embedding = self
            .embed(&[query])
            .await?
            .pop()
            .ok_or_else(|| VectorError::Parse("embedding API returned no vectors".to_string()))?;

        let mut body = serde_json::json!({
            "vector": embedding,
            "top_k": top_k,
        });
        if let Some(uid) = user_id {
            body["filter"] = serde_json::json!(format!("user_id = '{}'", uid.replace('\'', "")));
        }

        let resp = self
            .client
            .post(format!("{}/vectors/query", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            return Err(VectorError::IndexApi {
                status,
                message: text,
            });
        }

        let parsed: serde_json::Value = resp.json().await.map_err(|e| VectorError::Parse(e.to_string()))?;
        let matches = parsed["matches"].as_array().cloned().unwrap_or_default();

        let hits = matches
            .into_iter()
            .filter_map(|m| {
                let score = m["score"].as_f64()? as f32;
                if score < MIN_SCORE {
                    return None;
                }
                let topics = m["metadata"]["topics"]
                    .as_str()
                    .unwrap_or_default()
                    .split(',')
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect();
                Some(VectorHit {
                    id: m["id"].as_str().unwrap_or_default().to_string(),
                    content: m["metadata"]["content"].as_str().unwrap_or_default().to_string(),
                    topics,
                    score,
                })
            })
            .collect();
        Ok(hits)
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let resp = self
            .client
            .post(format!("{}/vectors/delete", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "id": id }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            return Err(VectorError::IndexApi {
                status,
                message: text,
            });
        }
        Ok(())
    }
}

/// Run `search` and log+swallow any failure, returning an empty result.
/// This is the call site the chat pipeline actually uses (§4.1 item 4,
/// §7: vector failures are non-fatal for the turn).
pub async fn search_or_empty(adapter: Option<&VectorAdapter>, query: &str, user_id: &str, top_k: usize) -> Vec<VectorHit> {
    let Some(adapter) = adapter else {
        return Vec::new();
    };
    match adapter.search(query, Some(user_id), top_k).await {
        Ok(hits) => hits,
        Err(e) => {
            warn!(error = %e, "vector search failed, continuing with graph-only context");
            Vec::new()
        }
    }
}
