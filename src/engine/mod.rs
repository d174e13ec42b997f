pub mod aggregate;
pub mod catalog;
pub mod poller;
pub mod registry;

pub use poller::{ExecutionPoller, PollOutcome, PollSettings};
pub use registry::PollerRegistry;
