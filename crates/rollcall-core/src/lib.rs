//! Rollcall Core - Shared types, configuration and storage plumbing
//!
//! This crate provides the foundational types used across all Rollcall components.

pub mod config;
pub mod db;
pub mod error;
pub mod protocol;
pub mod role;

pub use config::Config;
pub use db::{unix_timestamp, Database, DatabaseError};
pub use error::{Error, Result};
pub use role::{Capability, Principal, Role};
