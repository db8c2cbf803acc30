pub mod anthropic;
pub mod client;
pub mod fallback;
pub mod openai;
pub mod stream;

pub use anthropic::AnthropicClient;
pub use client::{
    CompletionRequest, CompletionResponse, LlmProvider, Message, Mode, ProviderError, Role,
};
pub use fallback::FallbackClient;
pub use openai::OpenAiClient;
pub use stream::{parse_sse_line, parse_strict_json, SseParsed, StreamEvent};
