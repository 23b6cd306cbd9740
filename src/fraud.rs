use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::models::UserIdentity;

/// What the reconciler hands to the fraud-report UI once the arrival prompt
/// has been hidden.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FraudHandoff {
    pub spot_id: String,
    pub reporter: UserIdentity,
    pub reported: UserIdentity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FraudFlowOutcome {
    Submitted { notes: Option<String> },
    /// The user backed out; nothing is written.
    Cancelled,
}

/// The external fraud-report dialog. Implementations typically ask the user
/// to confirm before anything is written.
#[async_trait]
pub trait FraudReportFlow: Send + Sync {
    async fn begin(&self, handoff: FraudHandoff) -> Result<FraudFlowOutcome>;
}

/// Submits every report without asking. Used by the command shell, where the
/// `fraud` command already is the confirmation.
#[derive(Debug, Clone, Default)]
pub struct AutoSubmitFraudFlow;

#[async_trait]
impl FraudReportFlow for AutoSubmitFraudFlow {
    async fn begin(&self, _handoff: FraudHandoff) -> Result<FraudFlowOutcome> {
        Ok(FraudFlowOutcome::Submitted { notes: None })
    }
}

/// Masks an email for display: `abc***@domain`, or `a***@domain` when the local
/// part has three characters or fewer.
pub fn obfuscate_email(email: &str) -> String {
    if email.is_empty() {
        return String::new();
    }
    let (local, domain) = email.split_once('@').unwrap_or((email, ""));
    let visible: String = if local.chars().count() <= 3 {
        local.chars().take(1).collect()
    } else {
        local.chars().take(3).collect()
    };
    format!("{visible}***@{domain}")
}
