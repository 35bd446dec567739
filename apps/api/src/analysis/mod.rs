pub mod handlers;
pub mod inflight;
pub mod models;
pub mod normalizer;
pub mod pipeline;
pub mod prompts;
pub mod store;
pub mod validator;

pub use pipeline::{PipelineConfig, ResumeAnalyzer};
