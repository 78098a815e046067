pub mod orchestrator;
pub mod selector;

pub use orchestrator::{CycleOrchestrator, CycleRunner};
pub use selector::{CategorySelector, CategoryWeights};
