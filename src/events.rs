use serde::Serialize;
use tokio::sync::broadcast;

use crate::arrival::{ArrivalSession, Decision, MonitorStatus};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum NoticeLevel {
    Info,
    Error,
}

/// A non-blocking toast/alert for the user.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserNotice {
    pub level: NoticeLevel,
    pub title: String,
    pub message: String,
}

impl UserNotice {
    pub fn info(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            title: title.into(),
            message: message.into(),
        }
    }

    pub fn error(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            title: title.into(),
            message: message.into(),
        }
    }
}

/// Everything the UI layer needs to render the arrival flow.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ArrivalEvent {
    #[serde(rename_all = "camelCase")]
    StateChanged {
        status: MonitorStatus,
        selected_spot_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    PromptShown {
        session: ArrivalSession,
        fade_in_ms: u64,
    },
    #[serde(rename_all = "camelCase")]
    Countdown {
        session_id: String,
        remaining_secs: u64,
    },
    #[serde(rename_all = "camelCase")]
    PromptClosing {
        session_id: String,
        decision: Decision,
        closing_ms: u64,
    },
    /// The prompt is gone. `decision` is `None` when it was cancelled by a
    /// selection change rather than resolved.
    #[serde(rename_all = "camelCase")]
    PromptHidden {
        session_id: String,
        decision: Option<Decision>,
    },
    #[serde(rename_all = "camelCase")]
    SessionResolved {
        session_id: String,
        spot_id: String,
        decision: Decision,
    },
    Notice(UserNotice),
}

/// Fan-out of [`ArrivalEvent`]s. Emitting with no subscribers is not an error.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ArrivalEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ArrivalEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: ArrivalEvent) {
        let _ = self.sender.send(event);
    }

    pub fn notify(&self, notice: UserNotice) {
        self.emit(ArrivalEvent::Notice(notice));
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
