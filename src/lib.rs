pub mod answer;
pub mod config;
pub mod error;
pub mod llm;
pub mod models;
pub mod rag;
pub mod server;
pub mod templates;
