pub mod config;
pub mod engine;
pub mod errors;
pub mod llm;
pub mod model;
pub mod orchestrator;
pub mod store;
