use serde::{Deserialize, Serialize};

/// Who a spot or a fraud report is attributed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
    pub user_id: String,
    pub email: String,
    pub name: String,
}

impl UserIdentity {
    pub fn new(
        user_id: impl Into<String>,
        email: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            email: email.into(),
            name: name.into(),
        }
    }

    /// Stand-in for a signed-out user acting as a reporter.
    pub fn anonymous_reporter() -> Self {
        Self::new("anonymous", "anonymous@example.com", "Anonymous Reporter")
    }

    /// Reads `PARKSPOT_USER_ID`, `PARKSPOT_USER_EMAIL` and `PARKSPOT_USER_NAME`,
    /// falling back to the anonymous reporter for anything unset.
    pub fn from_env() -> Self {
        let fallback = Self::anonymous_reporter();
        let read = |key: &str, default: String| {
            std::env::var(key)
                .ok()
                .filter(|value| !value.trim().is_empty())
                .unwrap_or(default)
        };

        Self {
            user_id: read("PARKSPOT_USER_ID", fallback.user_id),
            email: read("PARKSPOT_USER_EMAIL", fallback.email),
            name: read("PARKSPOT_USER_NAME", fallback.name),
        }
    }
}
