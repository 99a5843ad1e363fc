//! Email Agent: RAG-assisted reply drafting for a Gmail inbox.

pub mod config;
pub mod embedding;
pub mod error;
pub mod llm;
pub mod logging;
pub mod mail;
pub mod modes;
pub mod pipeline;
pub mod retry;
pub mod store;
pub mod text;
pub mod web;
