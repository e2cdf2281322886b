// Campaign enrollment lifecycle.

pub mod engine;

pub use engine::{CampaignEngine, EnrollOutcome, StopReason};
