pub mod detector;
pub mod prompt;
pub mod state;

#[cfg(test)]
mod tests;

pub use detector::{ArrivalDetector, DetectorConfig};
pub use prompt::{PromptController, PromptTimings, ShowOutcome};
pub use state::{ArrivalSession, ArrivalSnapshot, Decision, MonitorStatus, SessionPhase};
