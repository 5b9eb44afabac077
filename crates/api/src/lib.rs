//! HTTP API: configuration, demo jobs, routing, and request/response mapping.

pub mod app;
pub mod config;
pub mod demo;
