use crate::openai::OpenAiProvider;

/// Ollama speaks the OpenAI chat-completions shape at `/v1/chat/completions`
/// and needs no API key — this is just a named constructor over
/// [`OpenAiProvider`] so config and logs say "ollama" rather than "openai".
pub fn provider(base_url: String) -> OpenAiProvider {
    OpenAiProvider::without_auth("ollama", base_url)
}
