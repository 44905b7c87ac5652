// Re-export async_openai types for consumers
pub use async_openai::types::chat::{
  ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
  ChatCompletionRequestUserMessage,
};

mod cosine_similarity;
pub use cosine_similarity::cosine_similarity;

mod embed;
pub use embed::embed;

mod embed_many;
pub use embed_many::embed_many;

mod embed_shared;
pub use embed_shared::process_embedding;

mod generate_json;
pub use generate_json::generate_json;

mod generate_text;
pub use generate_text::generate_text;
