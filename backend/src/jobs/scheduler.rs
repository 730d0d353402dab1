// Job scheduler - wires the billing sweep and maintenance into cron

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler as TokioScheduler, JobSchedulerError};
use tracing::{error, info};
use uuid::Uuid;

use super::BillingSweepJob;
use crate::config::JobSettings;
use crate::services::cache::CacheService;
use crate::services::email::EmailService;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Scheduler error: {0}")]
    SchedulerError(#[from] JobSchedulerError),
}

pub type JobResult<T> = Result<T, JobError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// How often the billing sweep runs (hours)
    pub billing_sweep_interval_hours: u32,
    pub auto_invoice_enabled: bool,
    pub payment_reminder_enabled: bool,
    /// Due-date offset for orders without a lead time of their own (days)
    pub default_lead_time_days: i32,
    /// How often expired cache entries are purged (hours)
    pub cache_cleanup_interval_hours: u32,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            billing_sweep_interval_hours: 4,
            auto_invoice_enabled: true,
            payment_reminder_enabled: true,
            default_lead_time_days: 30,
            cache_cleanup_interval_hours: 24,
        }
    }
}

impl From<&JobSettings> for JobConfig {
    fn from(settings: &JobSettings) -> Self {
        Self {
            billing_sweep_interval_hours: settings.billing_sweep_interval_hours,
            auto_invoice_enabled: settings.auto_invoice_enabled,
            payment_reminder_enabled: settings.payment_reminder_enabled,
            default_lead_time_days: settings.default_lead_time_days,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobExecutionLog {
    pub id: Uuid,
    pub job_name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: JobStatus,
    pub items_processed: i32,
    pub errors: Vec<String>,
    pub duration_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
    PartialFailure,
}

impl JobExecutionLog {
    fn failed(job_name: &str, started_at: DateTime<Utc>, error: String) -> Self {
        let completed_at = Utc::now();
        Self {
            id: Uuid::new_v4(),
            job_name: job_name.to_string(),
            started_at,
            completed_at: Some(completed_at),
            status: JobStatus::Failed,
            items_processed: 0,
            errors: vec![error],
            duration_ms: Some((completed_at - started_at).num_milliseconds()),
        }
    }
}

const MAX_EXECUTION_LOGS: usize = 100;

pub struct JobScheduler {
    scheduler: TokioScheduler,
    db_pool: PgPool,
    email_service: Option<EmailService>,
    config: JobConfig,
    execution_logs: Arc<RwLock<Vec<JobExecutionLog>>>,
}

impl JobScheduler {
    pub async fn new(
        db_pool: PgPool,
        email_service: Option<EmailService>,
        config: JobConfig,
    ) -> JobResult<Self> {
        let scheduler = TokioScheduler::new().await?;

        Ok(Self {
            scheduler,
            db_pool,
            email_service,
            config,
            execution_logs: Arc::new(RwLock::new(Vec::new())),
        })
    }

    pub async fn start(&self) -> JobResult<()> {
        info!("Starting background job scheduler");

        self.schedule_billing_sweep().await?;
        self.schedule_cache_cleanup().await?;
        self.scheduler.start().await?;

        info!("Background job scheduler started successfully");
        Ok(())
    }

    pub async fn shutdown(&mut self) -> JobResult<()> {
        info!("Shutting down background job scheduler");
        self.scheduler.shutdown().await?;
        Ok(())
    }

    async fn schedule_billing_sweep(&self) -> JobResult<()> {
        let interval = self.config.billing_sweep_interval_hours.max(1);
        let cron_expr = format!("0 0 */{} * * *", interval); // Every N hours

        let db_pool = self.db_pool.clone();
        let email_service = self.email_service.clone();
        let config = self.config.clone();
        let logs = self.execution_logs.clone();

        let job = Job::new_async(cron_expr.as_str(), move |_uuid, _lock| {
            let db_pool = db_pool.clone();
            let email_service = email_service.clone();
            let config = config.clone();
            let logs = logs.clone();

            Box::pin(async move {
                let log_id = Uuid::new_v4();
                let started_at = Utc::now();

                info!("Running billing sweep job");

                let sweep = BillingSweepJob::new(
                    db_pool,
                    email_service,
                    config.auto_invoice_enabled,
                    config.payment_reminder_enabled,
                    config.default_lead_time_days,
                );

                match sweep.run().await {
                    Ok(result) => {
                        let completed_at = Utc::now();
                        let duration = (completed_at - started_at).num_milliseconds();

                        let log = JobExecutionLog {
                            id: log_id,
                            job_name: "Billing Sweep".to_string(),
                            started_at,
                            completed_at: Some(completed_at),
                            status: if result.errors.is_empty() {
                                JobStatus::Completed
                            } else {
                                JobStatus::PartialFailure
                            },
                            items_processed: result.items_processed(),
                            errors: result.errors.clone(),
                            duration_ms: Some(duration),
                        };

                        let mut logs = logs.write().await;
                        logs.push(log);
                        if logs.len() > MAX_EXECUTION_LOGS {
                            logs.remove(0);
                        }

                        info!(
                            "Billing sweep completed: {} generated, {} marked overdue, {} reminders, {} errors",
                            result.invoices_generated,
                            result.invoices_marked_overdue,
                            result.reminders_sent,
                            result.errors.len()
                        );
                    }
                    Err(e) => {
                        error!("Billing sweep failed: {}", e);

                        let mut logs = logs.write().await;
                        logs.push(JobExecutionLog::failed(
                            "Billing Sweep",
                            started_at,
                            e.to_string(),
                        ));
                        if logs.len() > MAX_EXECUTION_LOGS {
                            logs.remove(0);
                        }
                    }
                }
            })
        })?;

        self.scheduler.add(job).await?;
        info!("Scheduled billing sweep to run every {} hours", interval);

        Ok(())
    }

    async fn schedule_cache_cleanup(&self) -> JobResult<()> {
        let interval = self.config.cache_cleanup_interval_hours.max(1);
        let cron_expr = format!("0 30 */{} * * *", interval);

        let db_pool = self.db_pool.clone();

        let job = Job::new_async(cron_expr.as_str(), move |_uuid, _lock| {
            let db_pool = db_pool.clone();

            Box::pin(async move {
                let cache = CacheService::new(db_pool);
                match cache.cleanup_expired().await {
                    Ok(removed) if removed > 0 => {
                        info!("Cache cleanup removed {} expired entries", removed)
                    }
                    Ok(_) => {}
                    Err(e) => error!("Cache cleanup failed: {}", e),
                }
            })
        })?;

        self.scheduler.add(job).await?;
        info!("Scheduled cache cleanup to run every {} hours", interval);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_runs_land_in_the_execution_log() {
        let started = Utc::now();
        let log = JobExecutionLog::failed("Billing Sweep", started, "connection refused".into());

        assert_eq!(log.status, JobStatus::Failed);
        assert_eq!(log.items_processed, 0);
        assert_eq!(log.errors, vec!["connection refused".to_string()]);
        assert!(log.completed_at.is_some());
        assert!(log.duration_ms.unwrap_or(0) >= 0);
    }

    #[test]
    fn job_config_carries_all_sweep_settings() {
        let settings = JobSettings {
            billing_sweep_interval_hours: 6,
            auto_invoice_enabled: false,
            payment_reminder_enabled: true,
            default_lead_time_days: 45,
        };
        let config = JobConfig::from(&settings);

        assert_eq!(config.billing_sweep_interval_hours, 6);
        assert!(!config.auto_invoice_enabled);
        assert_eq!(config.default_lead_time_days, 45);
        assert_eq!(config.cache_cleanup_interval_hours, 24);
    }
}
