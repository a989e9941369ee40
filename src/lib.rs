//! photomatte
//!
//! Asynchronous image background-removal service. Images are submitted
//! over HTTP, carried through a durable queue with at-least-once
//! delivery, processed by a worker against an external inference
//! endpoint, and retrieved later by polling the job's status.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod pipeline;
pub mod routes;
pub mod services;
