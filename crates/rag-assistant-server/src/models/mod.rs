pub mod catalog;
pub mod chat;
pub mod mcp;
pub mod orchestrator;
pub mod retrieval;
pub mod safety;

pub use chat::{ChatMessage, UserContext};
pub use mcp::{JsonMap, McpExecuteRequest, McpExecuteResponse};
pub use retrieval::{RetrievalHit, RetrievalQuery, RetrievalResponse, StepTrace};
