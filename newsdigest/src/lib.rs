// Library interface for newsdigest modules
// This allows tests and the binary to share the pipeline

pub mod compose;
pub mod ingestion;
pub mod llm;
pub mod model;
pub mod pipeline;
pub mod publish;
