//! Infrastructure layer: execution repositories and the batch engine.

pub mod jobs;
pub mod repository;
