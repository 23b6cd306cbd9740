pub mod fraud_reports;
pub mod spots;
