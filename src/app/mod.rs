mod orchestrator;
mod runtime;
mod shutdown;
mod types;

#[cfg(test)]
mod tests;

pub use orchestrator::LuckycamOrchestrator;
pub use types::{RunOptions, RunSummary, ShutdownReason};
