// Background jobs
//
// The billing sweep (invoice generation, overdue marking, payment reminders)
// and cache maintenance run on tokio-cron-scheduler at configured intervals.

pub mod billing;
pub mod scheduler;

pub use billing::BillingSweepJob;
pub use scheduler::{JobConfig, JobError, JobResult, JobScheduler};
