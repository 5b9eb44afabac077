//! Postgres-backed execution repository.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | RepositoryError |
//! |------------|----------------------|-----------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (foreign key violation) | `23503` | `NotFound` |
//! | Database (other) | any | `Storage` |
//! | PoolClosed / network / decode | N/A | `Storage` |
//!
//! ## Sync bridge
//!
//! `JobRepository` is synchronous; the launcher runs on plain worker threads.
//! The repository keeps the `tokio` runtime handle it was built on and drives
//! each async query with `Handle::block_on`. Do not call the sync trait from
//! inside an async task: wrap it in `spawn_blocking` or a dedicated thread.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tokio::runtime::Handle;
use tracing::instrument;

use batchforge_core::{
    BatchStatus, ExitCode, JobExecution, JobExecutionId, JobInstance, JobInstanceId, JobParameter,
    JobParameters, ParameterValue, StepExecution, StepExecutionId,
};

use super::r#trait::{JobRepository, RepositoryError};

const SCHEMA: &str = include_str!("../../migrations/0001_batch_schema.sql");

/// Postgres-backed execution repository.
///
/// Each trait call is one transaction (or one autocommit statement), so every
/// record write is durable before the call returns.
#[derive(Debug, Clone)]
pub struct PostgresJobRepository {
    pool: Arc<PgPool>,
    runtime: Handle,
}

impl PostgresJobRepository {
    /// Wrap an existing pool; `runtime` drives the sync trait methods.
    pub fn new(pool: PgPool, runtime: Handle) -> Self {
        Self {
            pool: Arc::new(pool),
            runtime,
        }
    }

    /// Connect a pool and bind the repository to the current runtime.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, RepositoryError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool, Handle::current()))
    }

    /// Create the batch tables and indexes if they do not exist.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), RepositoryError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub async fn find_instance_async(
        &self,
        job_name: &str,
        job_key: &str,
    ) -> Result<Option<JobInstance>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT id, job_name, job_key
            FROM batch_job_instance
            WHERE job_name = $1 AND job_key = $2
            "#,
        )
        .bind(job_name)
        .bind(job_key)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_instance", e))?;

        row.map(|r| instance_from_row(&r)).transpose()
    }

    /// Insert the instance and its parameters in one transaction.
    ///
    /// The `(job_name, job_key)` unique constraint turns a concurrent insert
    /// into a no-op; the surviving row is read back and returned.
    #[instrument(skip(self, parameters), fields(parameter_count = parameters.len()), err)]
    pub async fn create_instance_async(
        &self,
        job_name: &str,
        job_key: &str,
        parameters: &JobParameters,
    ) -> Result<JobInstance, RepositoryError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let candidate = JobInstance::new(job_name, job_key);
        let inserted = sqlx::query(
            r#"
            INSERT INTO batch_job_instance (id, job_name, job_key)
            VALUES ($1, $2, $3)
            ON CONFLICT (job_name, job_key) DO NOTHING
            "#,
        )
        .bind(candidate.id.as_uuid())
        .bind(job_name)
        .bind(job_key)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_instance", e))?
        .rows_affected();

        if inserted == 0 {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return self
                .find_instance_async(job_name, job_key)
                .await?
                .ok_or_else(|| {
                    RepositoryError::Conflict(format!(
                        "instance ({job_name}, {job_key}) vanished after conflict"
                    ))
                });
        }

        for param in parameters.to_records(candidate.id) {
            let (string_val, date_val, long_val, double_val) = parameter_slots(&param.value);
            sqlx::query(
                r#"
                INSERT INTO batch_job_parameter (
                    job_instance_id, key_name, type_cd,
                    string_val, date_val, long_val, double_val
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(candidate.id.as_uuid())
            .bind(&param.key_name)
            .bind(param.value.type_code())
            .bind(string_val)
            .bind(date_val)
            .bind(long_val)
            .bind(double_val)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_parameter", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(candidate)
    }

    #[instrument(skip(self), err)]
    pub async fn get_instance_async(
        &self,
        id: JobInstanceId,
    ) -> Result<Option<JobInstance>, RepositoryError> {
        let row = sqlx::query("SELECT id, job_name, job_key FROM batch_job_instance WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_instance", e))?;

        row.map(|r| instance_from_row(&r)).transpose()
    }

    #[instrument(skip(self), err)]
    pub async fn instance_parameters_async(
        &self,
        id: JobInstanceId,
    ) -> Result<Vec<JobParameter>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT job_instance_id, key_name, type_cd, string_val, date_val, long_val, double_val
            FROM batch_job_parameter
            WHERE job_instance_id = $1
            ORDER BY key_name ASC
            "#,
        )
        .bind(id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("instance_parameters", e))?;

        rows.iter().map(parameter_from_row).collect()
    }

    #[instrument(skip(self), err)]
    pub async fn completed_step_names_async(
        &self,
        instance_id: JobInstanceId,
    ) -> Result<HashSet<String>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT s.step_name
            FROM batch_step_execution s
            JOIN batch_job_execution j ON j.id = s.job_execution_id
            WHERE j.job_instance_id = $1 AND s.status = 'COMPLETED'
            "#,
        )
        .bind(instance_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("completed_step_names", e))?;

        rows.iter()
            .map(|r| r.try_get::<String, _>("step_name").map_err(decode_error))
            .collect()
    }

    #[instrument(skip(self, execution), fields(job_execution_id = %execution.id), err)]
    pub async fn create_job_execution_async(
        &self,
        execution: &JobExecution,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO batch_job_execution (
                id, job_instance_id, status, start_time, end_time, exit_code, exit_message
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(execution.id.as_uuid())
        .bind(execution.job_instance_id.as_uuid())
        .bind(execution.status.as_str())
        .bind(execution.start_time)
        .bind(execution.end_time)
        .bind(execution.exit_code.as_str())
        .bind(execution.exit_message.as_deref())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_job_execution", e))?;
        Ok(())
    }

    #[instrument(skip(self, execution), fields(job_execution_id = %execution.id), err)]
    pub async fn update_job_execution_async(
        &self,
        execution: &JobExecution,
    ) -> Result<(), RepositoryError> {
        let updated = sqlx::query(
            r#"
            UPDATE batch_job_execution
            SET status = $2, start_time = $3, end_time = $4, exit_code = $5, exit_message = $6
            WHERE id = $1
            "#,
        )
        .bind(execution.id.as_uuid())
        .bind(execution.status.as_str())
        .bind(execution.start_time)
        .bind(execution.end_time)
        .bind(execution.exit_code.as_str())
        .bind(execution.exit_message.as_deref())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_job_execution", e))?
        .rows_affected();

        if updated == 0 {
            return Err(RepositoryError::NotFound(format!("job execution {}", execution.id)));
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub async fn get_job_execution_async(
        &self,
        id: JobExecutionId,
    ) -> Result<Option<JobExecution>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT id, job_instance_id, status, start_time, end_time, exit_code, exit_message
            FROM batch_job_execution
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_job_execution", e))?;

        row.map(|r| job_execution_from_row(&r)).transpose()
    }

    #[instrument(skip(self), err)]
    pub async fn list_job_executions_async(&self) -> Result<Vec<JobExecution>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, job_instance_id, status, start_time, end_time, exit_code, exit_message
            FROM batch_job_execution
            ORDER BY start_time ASC NULLS FIRST, id ASC
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_job_executions", e))?;

        rows.iter().map(job_execution_from_row).collect()
    }

    #[instrument(skip(self, execution), fields(step_name = %execution.step_name), err)]
    pub async fn create_step_execution_async(
        &self,
        execution: &StepExecution,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO batch_step_execution (
                id, job_execution_id, step_name, status, start_time, end_time,
                exit_code, exit_message, retry_count, read_count, write_count,
                filter_count, skip_count, commit_count
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(execution.id.as_uuid())
        .bind(execution.job_execution_id.as_uuid())
        .bind(&execution.step_name)
        .bind(execution.status.as_str())
        .bind(execution.start_time)
        .bind(execution.end_time)
        .bind(execution.exit_code.as_str())
        .bind(execution.exit_message.as_deref())
        .bind(execution.retry_count as i32)
        .bind(execution.read_count as i64)
        .bind(execution.write_count as i64)
        .bind(execution.filter_count as i64)
        .bind(execution.skip_count as i64)
        .bind(execution.commit_count as i64)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_step_execution", e))?;
        Ok(())
    }

    #[instrument(skip(self, execution), fields(step_name = %execution.step_name), err)]
    pub async fn update_step_execution_async(
        &self,
        execution: &StepExecution,
    ) -> Result<(), RepositoryError> {
        let updated = sqlx::query(
            r#"
            UPDATE batch_step_execution
            SET status = $2, start_time = $3, end_time = $4, exit_code = $5,
                exit_message = $6, retry_count = $7, read_count = $8, write_count = $9,
                filter_count = $10, skip_count = $11, commit_count = $12
            WHERE id = $1
            "#,
        )
        .bind(execution.id.as_uuid())
        .bind(execution.status.as_str())
        .bind(execution.start_time)
        .bind(execution.end_time)
        .bind(execution.exit_code.as_str())
        .bind(execution.exit_message.as_deref())
        .bind(execution.retry_count as i32)
        .bind(execution.read_count as i64)
        .bind(execution.write_count as i64)
        .bind(execution.filter_count as i64)
        .bind(execution.skip_count as i64)
        .bind(execution.commit_count as i64)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_step_execution", e))?
        .rows_affected();

        if updated == 0 {
            return Err(RepositoryError::NotFound(format!("step execution {}", execution.id)));
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub async fn list_step_executions_async(
        &self,
        job_execution_id: JobExecutionId,
    ) -> Result<Vec<StepExecution>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, job_execution_id, step_name, status, start_time, end_time,
                   exit_code, exit_message, retry_count, read_count, write_count,
                   filter_count, skip_count, commit_count
            FROM batch_step_execution
            WHERE job_execution_id = $1
            ORDER BY start_time ASC NULLS FIRST, id ASC
            "#,
        )
        .bind(job_execution_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_step_executions", e))?;

        rows.iter().map(step_execution_from_row).collect()
    }
}

impl JobRepository for PostgresJobRepository {
    fn find_instance(
        &self,
        job_name: &str,
        job_key: &str,
    ) -> Result<Option<JobInstance>, RepositoryError> {
        self.runtime.block_on(self.find_instance_async(job_name, job_key))
    }

    fn create_instance(
        &self,
        job_name: &str,
        job_key: &str,
        parameters: &JobParameters,
    ) -> Result<JobInstance, RepositoryError> {
        self.runtime
            .block_on(self.create_instance_async(job_name, job_key, parameters))
    }

    fn get_instance(&self, id: JobInstanceId) -> Result<Option<JobInstance>, RepositoryError> {
        self.runtime.block_on(self.get_instance_async(id))
    }

    fn instance_parameters(&self, id: JobInstanceId) -> Result<Vec<JobParameter>, RepositoryError> {
        self.runtime.block_on(self.instance_parameters_async(id))
    }

    fn completed_step_names(
        &self,
        instance_id: JobInstanceId,
    ) -> Result<HashSet<String>, RepositoryError> {
        self.runtime
            .block_on(self.completed_step_names_async(instance_id))
    }

    fn create_job_execution(&self, execution: &JobExecution) -> Result<(), RepositoryError> {
        self.runtime.block_on(self.create_job_execution_async(execution))
    }

    fn update_job_execution(&self, execution: &JobExecution) -> Result<(), RepositoryError> {
        self.runtime.block_on(self.update_job_execution_async(execution))
    }

    fn get_job_execution(&self, id: JobExecutionId) -> Result<Option<JobExecution>, RepositoryError> {
        self.runtime.block_on(self.get_job_execution_async(id))
    }

    fn list_job_executions(&self) -> Result<Vec<JobExecution>, RepositoryError> {
        self.runtime.block_on(self.list_job_executions_async())
    }

    fn create_step_execution(&self, execution: &StepExecution) -> Result<(), RepositoryError> {
        self.runtime.block_on(self.create_step_execution_async(execution))
    }

    fn update_step_execution(&self, execution: &StepExecution) -> Result<(), RepositoryError> {
        self.runtime.block_on(self.update_step_execution_async(execution))
    }

    fn list_step_executions(
        &self,
        job_execution_id: JobExecutionId,
    ) -> Result<Vec<StepExecution>, RepositoryError> {
        self.runtime
            .block_on(self.list_step_executions_async(job_execution_id))
    }
}

type ParameterSlots<'a> = (Option<&'a str>, Option<DateTime<Utc>>, Option<i64>, Option<f64>);

fn parameter_slots(value: &ParameterValue) -> ParameterSlots<'_> {
    match value {
        ParameterValue::Text(s) => (Some(s.as_str()), None, None, None),
        ParameterValue::Timestamp(ts) => (None, Some(*ts), None, None),
        ParameterValue::Integer(i) => (None, None, Some(*i), None),
        ParameterValue::Float(f) => (None, None, None, Some(*f)),
    }
}

fn instance_from_row(row: &PgRow) -> Result<JobInstance, RepositoryError> {
    Ok(JobInstance {
        id: JobInstanceId::from_uuid(row.try_get("id").map_err(decode_error)?),
        job_name: row.try_get("job_name").map_err(decode_error)?,
        job_key: row.try_get("job_key").map_err(decode_error)?,
    })
}

fn parameter_from_row(row: &PgRow) -> Result<JobParameter, RepositoryError> {
    let type_cd: String = row.try_get("type_cd").map_err(decode_error)?;
    let value = match type_cd.as_str() {
        "STRING" => ParameterValue::Text(required(row, "string_val")?),
        "DATE" => ParameterValue::Timestamp(required(row, "date_val")?),
        "LONG" => ParameterValue::Integer(required(row, "long_val")?),
        "DOUBLE" => ParameterValue::Float(required(row, "double_val")?),
        other => {
            return Err(RepositoryError::Storage(format!(
                "unknown parameter type code: {other}"
            )));
        }
    };

    Ok(JobParameter {
        job_instance_id: JobInstanceId::from_uuid(
            row.try_get("job_instance_id").map_err(decode_error)?,
        ),
        key_name: row.try_get("key_name").map_err(decode_error)?,
        value,
    })
}

fn job_execution_from_row(row: &PgRow) -> Result<JobExecution, RepositoryError> {
    Ok(JobExecution {
        id: JobExecutionId::from_uuid(row.try_get("id").map_err(decode_error)?),
        job_instance_id: JobInstanceId::from_uuid(
            row.try_get("job_instance_id").map_err(decode_error)?,
        ),
        status: parse_status(row)?,
        start_time: row.try_get("start_time").map_err(decode_error)?,
        end_time: row.try_get("end_time").map_err(decode_error)?,
        exit_code: parse_exit_code(row)?,
        exit_message: row.try_get("exit_message").map_err(decode_error)?,
    })
}

fn step_execution_from_row(row: &PgRow) -> Result<StepExecution, RepositoryError> {
    Ok(StepExecution {
        id: StepExecutionId::from_uuid(row.try_get("id").map_err(decode_error)?),
        job_execution_id: JobExecutionId::from_uuid(
            row.try_get("job_execution_id").map_err(decode_error)?,
        ),
        step_name: row.try_get("step_name").map_err(decode_error)?,
        status: parse_status(row)?,
        start_time: row.try_get("start_time").map_err(decode_error)?,
        end_time: row.try_get("end_time").map_err(decode_error)?,
        exit_code: parse_exit_code(row)?,
        exit_message: row.try_get("exit_message").map_err(decode_error)?,
        retry_count: row.try_get::<i32, _>("retry_count").map_err(decode_error)? as u32,
        read_count: counter(row, "read_count")?,
        write_count: counter(row, "write_count")?,
        filter_count: counter(row, "filter_count")?,
        skip_count: counter(row, "skip_count")?,
        commit_count: counter(row, "commit_count")?,
    })
}

fn required<'r, T>(row: &'r PgRow, column: &str) -> Result<T, RepositoryError>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get::<Option<T>, _>(column)
        .map_err(decode_error)?
        .ok_or_else(|| RepositoryError::Storage(format!("parameter slot {column} is empty")))
}

fn counter(row: &PgRow, column: &str) -> Result<u64, RepositoryError> {
    Ok(row.try_get::<i64, _>(column).map_err(decode_error)?.max(0) as u64)
}

fn parse_status(row: &PgRow) -> Result<BatchStatus, RepositoryError> {
    let raw: String = row.try_get("status").map_err(decode_error)?;
    raw.parse().map_err(RepositoryError::Storage)
}

fn parse_exit_code(row: &PgRow) -> Result<ExitCode, RepositoryError> {
    let raw: String = row.try_get("exit_code").map_err(decode_error)?;
    raw.parse().map_err(RepositoryError::Storage)
}

fn decode_error(err: sqlx::Error) -> RepositoryError {
    RepositoryError::Storage(format!("failed to decode row: {err}"))
}

/// Map SQLx errors to RepositoryError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> RepositoryError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => RepositoryError::Conflict(msg),
                Some("23503") => RepositoryError::NotFound(msg),
                _ => RepositoryError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            RepositoryError::Storage(format!("connection pool closed in {}", operation))
        }
        _ => RepositoryError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}
