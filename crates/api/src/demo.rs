//! Jobs registered by the service binary.
//!
//! - `SampleJob`: two task steps that each sleep briefly
//! - `FailingJob`: `Step1`, then `ErrorStep`, which always fails
//! - `SquaresJob`: chunk step over 1..=50 keeping even squares
//! - `CleaningJob`: chunk step normalizing raw JSON rows, skipping bad ones

use std::thread;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Value, json};
use tracing::info;

use batchforge_core::{BatchResult, FaultCategory, ItemFault};
use batchforge_infra::jobs::{
    ChunkStep, FnSink, FnTransform, IterSource, JobDefinition, JobRegistry, SkipPolicy,
    StepContext, StepDefinition, TaskStep, VecSource,
};

#[derive(Debug, Clone, Copy)]
pub struct DemoOptions {
    /// How long each `SampleJob`/`FailingJob` task step sleeps.
    pub step_delay: Duration,
}

impl Default for DemoOptions {
    fn default() -> Self {
        Self {
            step_delay: Duration::from_secs(1),
        }
    }
}

impl DemoOptions {
    /// No sleeping; for tests.
    pub fn fast() -> Self {
        Self {
            step_delay: Duration::ZERO,
        }
    }
}

pub fn demo_registry() -> BatchResult<JobRegistry> {
    demo_registry_with(DemoOptions::default())
}

pub fn demo_registry_with(options: DemoOptions) -> BatchResult<JobRegistry> {
    Ok(JobRegistry::builder()
        .register(sample_job(options)?)?
        .register(failing_job(options)?)?
        .register(squares_job()?)?
        .register(cleaning_job()?)?
        .build())
}

fn sleeping_step(name: &'static str, delay: Duration) -> BatchResult<StepDefinition> {
    TaskStep::builder(name, move |ctx: &StepContext<'_>| {
        info!(job_name = ctx.job_name, step_name = ctx.step_name, "executing step");
        thread::sleep(delay);
        Ok(())
    })
    .build()
}

fn sample_job(options: DemoOptions) -> BatchResult<JobDefinition> {
    JobDefinition::new(
        "SampleJob",
        vec![
            sleeping_step("Step1", options.step_delay)?,
            sleeping_step("Step2", options.step_delay)?,
        ],
    )
}

fn failing_job(options: DemoOptions) -> BatchResult<JobDefinition> {
    let error_step = TaskStep::builder("ErrorStep", |_: &StepContext<'_>| {
        anyhow::bail!("Something went wrong!")
    })
    .build()?;
    JobDefinition::new(
        "FailingJob",
        vec![sleeping_step("Step1", options.step_delay)?, error_step],
    )
}

fn squares_job() -> BatchResult<JobDefinition> {
    let step = ChunkStep::builder("SquareNumbers", IterSource::new(|| 1..=50i64))
        .transform(FnTransform::new(|x: i64| {
            let square = x * x;
            Ok((square % 2 == 0).then_some(square))
        }))
        .sink(FnSink::new(|batch: Vec<i64>| {
            info!(items = batch.len(), sum = batch.iter().sum::<i64>(), "squares written");
            Ok(())
        }))
        .chunk_size(10)
        .build()?;
    JobDefinition::new("SquaresJob", vec![step])
}

/// A normalized row produced by `CleaningJob`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleanRow {
    pub id: i64,
    pub name: String,
    pub value: f64,
}

/// Rows without an id or with a negative value are filtered; a non-integer id
/// is a validation fault and an unreadable value a parse fault.
pub fn clean_row(row: Value) -> Result<Option<CleanRow>, ItemFault> {
    let id = match row.get("id").and_then(Value::as_str).map(str::trim) {
        None | Some("") => return Ok(None),
        Some(id) => id,
    };
    let id: i64 = id
        .parse()
        .map_err(|_| ItemFault::validation(format!("id {id:?} is not an integer")))?;

    let name = row
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_uppercase();

    let value = match row.get("value") {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| ItemFault::parse(format!("value {s:?} is not a number")))?,
        _ => 0.0,
    };
    if value < 0.0 {
        return Ok(None);
    }

    Ok(Some(CleanRow { id, name, value }))
}

fn raw_rows() -> Vec<Value> {
    vec![
        json!({"id": "1", "name": " alice ", "value": "10.5"}),
        json!({"id": "", "name": "no id", "value": "3"}),
        json!({"id": "x7", "name": "bob", "value": "2"}),
        json!({"id": "4", "name": "carol", "value": "-1"}),
        json!({"id": "5", "name": "dave", "value": "abc"}),
        json!({"id": "6", "name": " erin", "value": 7}),
    ]
}

fn cleaning_job() -> BatchResult<JobDefinition> {
    let step = ChunkStep::builder("CleanRows", VecSource::new(raw_rows()))
        .transform(FnTransform::new(clean_row))
        .sink(FnSink::new(|rows: Vec<CleanRow>| {
            info!(rows = rows.len(), "cleaned rows written");
            Ok(())
        }))
        .chunk_size(4)
        .skip_policy(SkipPolicy::limited_to(5, FaultCategory::DATA))
        .build()?;
    JobDefinition::new("CleaningJob", vec![step])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_holds_every_demo_job() {
        let registry = demo_registry_with(DemoOptions::fast()).unwrap();
        assert_eq!(
            registry.names(),
            vec!["CleaningJob", "FailingJob", "SampleJob", "SquaresJob"]
        );
    }

    #[test]
    fn row_cleaning_outcomes() {
        assert_eq!(
            clean_row(json!({"id": "1", "name": " alice ", "value": "10.5"})).unwrap(),
            Some(CleanRow {
                id: 1,
                name: "ALICE".into(),
                value: 10.5
            })
        );
        assert_eq!(clean_row(json!({"name": "x"})).unwrap(), None);
        assert_eq!(clean_row(json!({"id": "2", "value": "-3"})).unwrap(), None);
        assert_eq!(
            clean_row(json!({"id": "x7"})).unwrap_err().category,
            FaultCategory::Validation
        );
        assert_eq!(
            clean_row(json!({"id": "5", "value": "abc"})).unwrap_err().category,
            FaultCategory::Parse
        );
    }
}
