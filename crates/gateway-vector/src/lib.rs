//! Retrieval-augmentation vector store adapters.

pub mod in_memory;
pub mod qdrant_store;

pub use in_memory::InMemoryVectorStore;
pub use qdrant_store::QdrantVectorStore;
