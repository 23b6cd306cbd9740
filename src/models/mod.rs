mod fraud;
mod identity;
mod spot;

pub use fraud::{FraudReport, FraudReportStatus, FraudSeverity, FRAUD_REASON_NOT_AVAILABLE};
pub use identity::UserIdentity;
pub use spot::{SpotDocument, SpotRecord, SpotStatus};
