pub mod context;
pub mod engine;
pub mod window;

pub use engine::Orchestrator;
pub use window::{next_radius, ProgressiveWindowState};
