//! # queryd
//!
//! Executes caller-described outbound HTTP requests on a bounded worker pool
//! and stores what came back.
//!
//! The core is the dispatch [`engine`]: a bounded submission queue, an idle
//! registry, a fixed set of workers, and a dispatcher that pairs them and
//! drains in-flight work on shutdown. Around it sit the HTTP [`api`], the
//! outbound [`executor`], Postgres persistence ([`db`]), configuration, and
//! telemetry.

pub mod api;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod executor;
pub mod model;
pub mod telemetry;
