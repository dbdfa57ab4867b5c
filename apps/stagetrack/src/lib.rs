//! # stagetrack
//!
//! The application layer around `stagetrack-core`: HTTP API, CLI,
//! configuration, time conversion and the offline scan journal.
//!
//! Exposed as a library so the integration tests can drive the router
//! directly.

pub mod api;
pub mod cli;
pub mod config;
pub mod journal;
pub mod timefmt;
