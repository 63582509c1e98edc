// Embeddings module
// Batched embedding generation against an Ollama-compatible HTTP API

pub mod client;

pub use client::{BatchEmbeddings, EmbedFailure, EmbedItem, EmbeddingClient, EmbeddingVector};
