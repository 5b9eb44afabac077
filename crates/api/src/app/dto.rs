use serde::{Deserialize, Serialize};

use batchforge_infra::jobs::{JobDefinition, StepDefinition};

// -------------------------
// Request DTOs
// -------------------------

/// Body of `POST /jobs/:job_name/launch`. Both fields are optional.
#[derive(Debug, Default, Deserialize)]
pub struct LaunchRequest {
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub force: Option<bool>,
}

/// `?force=true` is accepted as well as the body field.
#[derive(Debug, Default, Deserialize)]
pub struct LaunchQuery {
    pub force: Option<bool>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct StepSummary {
    pub name: String,
    pub kind: &'static str,
    pub max_retries: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct JobSummary {
    pub name: String,
    pub steps: Vec<StepSummary>,
}

impl From<&JobDefinition> for JobSummary {
    fn from(job: &JobDefinition) -> Self {
        Self {
            name: job.name().to_string(),
            steps: job
                .steps()
                .iter()
                .map(|step| StepSummary {
                    name: step.name().to_string(),
                    kind: step.kind(),
                    max_retries: step.max_retries(),
                    chunk_size: match step {
                        StepDefinition::Chunk(chunk) => Some(chunk.chunk_size()),
                        StepDefinition::Task(_) => None,
                    },
                })
                .collect(),
        }
    }
}
