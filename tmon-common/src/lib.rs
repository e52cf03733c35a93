//! # Topic Monitor Common Library
//!
//! Shared code for the topic monitor crates:
//! - Domain model (query keys, articles, topic results)
//! - Line-delimited JSON wire helpers and timestamp format
//! - Event types (PipelineEvent) and the EventBus
//! - Bootstrap configuration loading

pub mod config;
pub mod error;
pub mod events;
pub mod models;
pub mod wire;

pub use error::{Error, Result};
pub use models::{
    Article, CorpusDocument, DocumentTopics, MonitorState, Notification, QueryKey, SourceMatch,
    TopicResult,
};
