pub mod anthropic;
pub mod ollama;
pub mod openai;
pub mod ops;
pub mod provider;
pub mod stream;

use loomgraph_core::config::{LlmConfig, LlmProviderKind};
use provider::LlmProvider;

/// Build the configured provider and resolve the model to use for requests.
/// Mirrors the teacher's provider-registry pattern, trimmed to the three
/// backends this system supports.
pub fn build_provider(config: &LlmConfig) -> (Box<dyn LlmProvider>, String) {
    match config.provider {
        LlmProviderKind::Anthropic => {
            let cfg = config
                .anthropic
                .clone()
                .expect("llm.provider = anthropic requires an [llm.anthropic] block");
            (
                Box::new(anthropic::AnthropicProvider::new(cfg.api_key, cfg.base_url)),
                cfg.model,
            )
        }
        LlmProviderKind::Openai => {
            let cfg = config
                .openai
                .clone()
                .expect("llm.provider = openai requires an [llm.openai] block");
            (
                Box::new(openai::OpenAiProvider::new(cfg.api_key, cfg.base_url)),
                cfg.model,
            )
        }
        LlmProviderKind::Ollama => {
            let cfg = config
                .ollama
                .clone()
                .expect("llm.provider = ollama requires an [llm.ollama] block");
            (Box::new(ollama::provider(cfg.base_url)), cfg.model)
        }
    }
}
