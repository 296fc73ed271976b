//! Backup Validator Library
//!
//! A small HTTP service that runs named validation scripts from a fixed
//! directory on behalf of allow-listed clients, passing request parameters
//! as `--name=value` arguments and returning the script's output.

pub mod bridge;
pub mod config;
pub mod logging;
pub mod metrics;
pub mod policy;
pub mod server;
