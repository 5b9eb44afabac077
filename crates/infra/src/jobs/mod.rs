//! Batch job engine.
//!
//! ## Components
//!
//! - `item`: `ItemSource` / `ItemTransform` / `ItemSink` contracts
//! - `adapters`: list, iterator, JSON-lines and closure adapters
//! - `skip`: `SkipPolicy`, the per-item fault tolerance rule
//! - `definition`: `JobDefinition`, `StepDefinition` and their builders
//! - `registry`: `JobRegistry`, the read-only name → definition map
//! - `chunk`: the read/transform/write loop
//! - `executor`: per-step retry engine
//! - `launcher`: instance resolution, resumability, execution lifecycle
//! - `operator`: submission and query façade

pub mod adapters;
pub mod chunk;
pub mod definition;
pub mod executor;
pub mod item;
pub mod launcher;
pub mod operator;
pub mod registry;
pub mod skip;

pub use adapters::{
    CollectingSink, FnSink, FnTransform, IterSource, JsonLinesSink, JsonLinesSource, VecSource,
};
pub use chunk::ChunkProcessor;
pub use definition::{
    ChunkStep, ChunkStepBuilder, DEFAULT_CHUNK_SIZE, JobDefinition, StepContext, StepDefinition,
    TaskAction, TaskStep, TaskStepBuilder,
};
pub use executor::StepExecutor;
pub use item::{Identity, ItemSink, ItemSource, ItemTransform, NoSink};
pub use launcher::JobLauncher;
pub use operator::{JobOperator, LaunchAcknowledgement, LaunchHandle};
pub use registry::{JobRegistry, JobRegistryBuilder};
pub use skip::{SkipPolicy, SkippableFaults};
