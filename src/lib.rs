//! Entity store - SQLite persistence for tasks, notes, jobs and their audit trail.
//!
//! This crate provides the storage core behind the `estore` CLI.
//!
//! # Architecture
//!
//! - [`storage`] - Migrations, table registry, transactions and the repository
//! - [`model`] - Entity, audit and query types
//! - [`config`] - Store path and environment configuration
//! - [`cli`] - Command-line interface using clap
//! - [`error`] - Error types and handling

#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod error;
pub mod model;
pub mod storage;

pub use error::{Error, Result};
pub use storage::{CoreRepository, RepositoryOptions};
