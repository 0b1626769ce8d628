pub mod orchestrator;
pub mod reranker;
pub mod retriever;
pub mod runtime;
pub mod safety;
pub mod vector_index;

pub use orchestrator::Orchestrator;
pub use retriever::Retriever;
pub use runtime::{LlmRuntime, RuntimeClient};
pub use safety::SafetyFilter;
pub use vector_index::{EmbeddingClient, InMemoryVectorIndex, VectorIndexGateway};
