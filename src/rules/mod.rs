// Trigger rule evaluation.
//
// Rules are configuration consumed read-only by this engine: each names the
// event types it reacts to, the conditions that must hold over the
// subject's recent history, and the actions to apply when it fires.

pub mod actions;
pub mod conditions;
pub mod engine;

pub use actions::Action;
pub use conditions::Condition;
pub use engine::{RuleEngine, TriggerRule};
