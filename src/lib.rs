//! FinBot — watches a mailbox and answers financial email.

pub mod agent;
pub mod channels;
pub mod config;
pub mod context;
pub mod error;
pub mod extract;
pub mod llm;
pub mod store;
pub mod tools;
pub mod trace;
pub mod watcher;
