use anyhow::anyhow;
use async_openai::{Client, config::OpenAIConfig, types::embeddings::CreateEmbeddingRequestArgs};
use atomem_shared::APP_ENV;

use crate::embed_shared::{EMBEDDING_DIM, process_embedding};

/// Embed a single text into a fixed-dimension, L2-normalised vector.
pub async fn embed(input: &str) -> anyhow::Result<Vec<f32>> {
  let config = OpenAIConfig::new()
    .with_api_key(&APP_ENV.openai_api_key)
    .with_api_base(&APP_ENV.openai_base_url);

  let client = Client::with_config(config);

  let request = CreateEmbeddingRequestArgs::default()
    .model(&APP_ENV.openai_embedding_model)
    .input(input)
    .dimensions(EMBEDDING_DIM as u32)
    .build()?;

  let embedding = client
    .embeddings()
    .create(request)
    .await
    .map(|r| r.data.into_iter())?
    .map(|e| e.embedding)
    .next_back()
    .ok_or_else(|| anyhow!("empty embedding"))?;

  process_embedding(embedding)
}
