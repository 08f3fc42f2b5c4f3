use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::SyncResult,
    notifications::NotificationLevel,
    timer::{SessionType, TimerState, TimerStatus},
};

/// Closed set of message kinds; subscribers are keyed on this.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    TimerUpdate,
    SessionComplete,
    SessionStart,
    SessionPause,
    SessionReset,
    Notification,
    Ping,
}

/// Full timer snapshot carried by `timer_update`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimerSyncData {
    pub current_time: u32,
    pub initial_time: u32,
    pub status: TimerStatus,
    pub session_type: SessionType,
    pub current_session: Option<u32>,
    pub completed_sessions: u32,
    pub last_update: DateTime<Utc>,
}

impl TimerSyncData {
    pub fn from_state(state: &TimerState, last_update: DateTime<Utc>) -> Self {
        Self {
            current_time: state.current_time,
            initial_time: state.initial_time,
            status: state.status,
            session_type: state.session_type,
            current_session: state.current_session,
            completed_sessions: state.completed_sessions,
            last_update,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionStartPayload {
    pub session_type: SessionType,
    pub duration: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionPausePayload {
    pub remaining_time: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionResetPayload {
    pub session_type: SessionType,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionCompletePayload {
    pub session_type: SessionType,
    pub duration: u32,
    pub completed_sessions: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationPayload {
    pub message: String,
    #[serde(rename = "type", default)]
    pub level: NotificationLevel,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PingPayload {}

/// Kind-specific body, tagged on the wire as `{"type": ..., "payload": ...}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum SyncPayload {
    TimerUpdate(TimerSyncData),
    SessionComplete(SessionCompletePayload),
    SessionStart(SessionStartPayload),
    SessionPause(SessionPausePayload),
    SessionReset(SessionResetPayload),
    Notification(NotificationPayload),
    Ping(PingPayload),
}

impl SyncPayload {
    pub fn kind(&self) -> MessageKind {
        match self {
            SyncPayload::TimerUpdate(_) => MessageKind::TimerUpdate,
            SyncPayload::SessionComplete(_) => MessageKind::SessionComplete,
            SyncPayload::SessionStart(_) => MessageKind::SessionStart,
            SyncPayload::SessionPause(_) => MessageKind::SessionPause,
            SyncPayload::SessionReset(_) => MessageKind::SessionReset,
            SyncPayload::Notification(_) => MessageKind::Notification,
            SyncPayload::Ping(_) => MessageKind::Ping,
        }
    }
}

/// One frame of the sync protocol. Built once at send time or parsed once
/// at receive time; never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncMessage {
    #[serde(flatten)]
    pub payload: SyncPayload,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "userId", default)]
    pub user_id: Option<String>,
}

impl SyncMessage {
    pub fn new(payload: SyncPayload, timestamp: DateTime<Utc>, user_id: Option<String>) -> Self {
        Self {
            payload,
            timestamp,
            user_id,
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.payload.kind()
    }

    pub fn parse(text: &str) -> SyncResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> SyncResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_browser_timer_update() {
        let raw = json!({
            "type": "timer_update",
            "payload": {
                "currentTime": 1495,
                "initialTime": 1500,
                "status": "running",
                "sessionType": "work",
                "currentSession": 1,
                "completedSessions": 0,
                "lastUpdate": "2024-05-01T10:00:00.000Z"
            },
            "timestamp": "2024-05-01T10:00:00.000Z",
            "userId": "user_1714557600000_abc123xyz"
        })
        .to_string();

        let message = SyncMessage::parse(&raw).unwrap();
        assert_eq!(message.kind(), MessageKind::TimerUpdate);
        assert_eq!(message.user_id.as_deref(), Some("user_1714557600000_abc123xyz"));
        match message.payload {
            SyncPayload::TimerUpdate(data) => {
                assert_eq!(data.current_time, 1495);
                assert_eq!(data.status, TimerStatus::Running);
                assert_eq!(data.current_session, Some(1));
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn serializes_envelope_fields_flat() {
        let message = SyncMessage::new(
            SyncPayload::SessionPause(SessionPausePayload { remaining_time: 42 }),
            Utc::now(),
            None,
        );
        let value: serde_json::Value = serde_json::from_str(&message.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "session_pause");
        assert_eq!(value["payload"]["remainingTime"], 42);
        assert!(value["timestamp"].is_string());
        assert!(value["userId"].is_null());
    }

    #[test]
    fn ping_carries_empty_payload() {
        let message = SyncMessage::new(SyncPayload::Ping(PingPayload {}), Utc::now(), None);
        let value: serde_json::Value = serde_json::from_str(&message.to_json().unwrap()).unwrap();
        assert_eq!(value["payload"], json!({}));
    }

    #[test]
    fn notification_level_defaults_to_info() {
        let raw = r#"{"type":"notification","payload":{"message":"hi"},"timestamp":"2024-05-01T10:00:00Z"}"#;
        let message = SyncMessage::parse(raw).unwrap();
        assert_eq!(
            message.payload,
            SyncPayload::Notification(NotificationPayload {
                message: "hi".into(),
                level: NotificationLevel::Info,
            })
        );
        assert_eq!(message.user_id, None);
    }

    #[test]
    fn rejects_unknown_kind_and_garbage() {
        assert!(SyncMessage::parse("not json").is_err());
        let unknown = r#"{"type":"teleport","payload":{},"timestamp":"2024-05-01T10:00:00Z"}"#;
        assert!(SyncMessage::parse(unknown).is_err());
        let missing_timestamp = r#"{"type":"ping","payload":{}}"#;
        assert!(SyncMessage::parse(missing_timestamp).is_err());
    }
}
