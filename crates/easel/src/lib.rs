pub mod codec;
pub mod errors;
pub mod models;
pub mod orchestrator;
pub mod preprocess;
pub mod prompt_template;
pub mod providers;
pub mod session;
pub mod vision;
