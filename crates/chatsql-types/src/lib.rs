//! Shared types for the chatsql conversational analytics service
//!
//! This crate provides the data model, error taxonomy, configuration
//! structures, and streaming event shapes used across every chatsql crate.
//! It has no I/O dependencies: storage, network, and model-provider
//! implementations live in `chatsql-infra`.

pub mod config;
pub mod error;
pub mod event;
pub mod model;

pub use error::{ChatSqlError, Result};
