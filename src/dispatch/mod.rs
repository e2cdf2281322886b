// Message dispatch: resolve a claimed message into a notification and
// deliver it through the transports.

pub mod dispatcher;
pub mod render;

pub use dispatcher::{DispatchOutcome, Dispatcher, DispatcherConfig};
