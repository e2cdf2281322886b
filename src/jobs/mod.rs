// Background jobs: the recurring delivery tick and daily maintenance.

pub mod maintenance;
pub mod scheduler;

pub use maintenance::MaintenanceJobs;
pub use scheduler::{DeliveryTick, JobConfig, JobRunner, TickSummary};
