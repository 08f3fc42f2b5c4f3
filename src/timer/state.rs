use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "camelCase")]
pub enum TimerStatus {
    #[default]
    Idle,
    Running,
    Paused,
    Finished,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "camelCase")]
pub enum SessionType {
    #[default]
    Work,
    ShortBreak,
    LongBreak,
}

impl SessionType {
    pub fn is_break(self) -> bool {
        !matches!(self, SessionType::Work)
    }

    pub fn label(self) -> &'static str {
        match self {
            SessionType::Work => "work",
            SessionType::ShortBreak => "shortBreak",
            SessionType::LongBreak => "longBreak",
        }
    }
}

/// Durations are whole seconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimerSettings {
    pub work_duration: u32,
    pub short_break_duration: u32,
    pub long_break_duration: u32,
    pub sessions_until_long_break: u32,
    pub auto_start_breaks: bool,
    pub auto_start_work: bool,
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            work_duration: 25 * 60,
            short_break_duration: 5 * 60,
            long_break_duration: 15 * 60,
            sessions_until_long_break: 4,
            auto_start_breaks: false,
            auto_start_work: false,
        }
    }
}

impl TimerSettings {
    pub fn duration_for(&self, session_type: SessionType) -> u32 {
        match session_type {
            SessionType::Work => self.work_duration,
            SessionType::ShortBreak => self.short_break_duration,
            SessionType::LongBreak => self.long_break_duration,
        }
    }

    /// Returns a new snapshot with the patch applied, or an error if the
    /// merged result would be invalid. `self` is never touched.
    pub fn merged(&self, patch: &TimerSettingsPatch) -> Result<Self> {
        let merged = Self {
            work_duration: patch.work_duration.unwrap_or(self.work_duration),
            short_break_duration: patch
                .short_break_duration
                .unwrap_or(self.short_break_duration),
            long_break_duration: patch
                .long_break_duration
                .unwrap_or(self.long_break_duration),
            sessions_until_long_break: patch
                .sessions_until_long_break
                .unwrap_or(self.sessions_until_long_break),
            auto_start_breaks: patch.auto_start_breaks.unwrap_or(self.auto_start_breaks),
            auto_start_work: patch.auto_start_work.unwrap_or(self.auto_start_work),
        };
        merged.validate()?;
        Ok(merged)
    }

    pub fn validate(&self) -> Result<()> {
        if self.work_duration == 0 || self.short_break_duration == 0 || self.long_break_duration == 0
        {
            bail!("session durations must be greater than zero");
        }
        if self.sessions_until_long_break < 2 {
            bail!(
                "sessions_until_long_break must be at least 2 (got {})",
                self.sessions_until_long_break
            );
        }
        Ok(())
    }
}

/// Partial settings update; `None` keeps the current value.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct TimerSettingsPatch {
    pub work_duration: Option<u32>,
    pub short_break_duration: Option<u32>,
    pub long_break_duration: Option<u32>,
    pub sessions_until_long_break: Option<u32>,
    pub auto_start_breaks: Option<bool>,
    pub auto_start_work: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub session_type: SessionType,
    /// Seconds spent in the session.
    pub duration: u32,
    pub completed: bool,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryStats {
    pub total_sessions: usize,
    pub completed_sessions: usize,
    pub work_sessions: usize,
    pub total_seconds: u64,
}

/// Countdown state for one timer instance.
///
/// Every operation is a plain synchronous transition; the caller supplies
/// `now` so the machine never reads a clock itself. Operations that are not
/// valid in the current status return `false` and leave the state untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TimerState {
    pub current_time: u32,
    pub initial_time: u32,
    pub status: TimerStatus,
    pub session_type: SessionType,
    pub current_session: Option<u32>,
    pub completed_sessions: u32,
    pub settings: TimerSettings,
    /// Newest first.
    pub history: VecDeque<SessionRecord>,
    pub session_start_time: Option<DateTime<Utc>>,
}

impl Default for TimerState {
    fn default() -> Self {
        Self::new(TimerSettings::default())
    }
}

impl TimerState {
    pub fn new(settings: TimerSettings) -> Self {
        let initial_time = settings.duration_for(SessionType::Work);
        Self {
            current_time: initial_time,
            initial_time,
            status: TimerStatus::Idle,
            session_type: SessionType::Work,
            current_session: None,
            completed_sessions: 0,
            settings,
            history: VecDeque::new(),
            session_start_time: None,
        }
    }

    pub fn elapsed(&self) -> u32 {
        self.initial_time.saturating_sub(self.current_time)
    }

    pub fn start(&mut self, now: DateTime<Utc>) -> bool {
        match self.status {
            TimerStatus::Running | TimerStatus::Finished => false,
            TimerStatus::Idle | TimerStatus::Paused if self.current_time == 0 => false,
            TimerStatus::Idle | TimerStatus::Paused => {
                let fresh =
                    self.status == TimerStatus::Idle || self.current_time == self.initial_time;
                if fresh {
                    self.current_session = Some(self.current_session.unwrap_or(0) + 1);
                    self.session_start_time = Some(now);
                }
                self.status = TimerStatus::Running;
                true
            }
        }
    }

    pub fn pause(&mut self) -> bool {
        if self.status != TimerStatus::Running {
            return false;
        }
        self.status = TimerStatus::Paused;
        true
    }

    /// Returns the record written for an abandoned session, if any.
    /// A finished session already has its record, so resetting it writes none.
    pub fn reset(&mut self, now: DateTime<Utc>) -> Option<SessionRecord> {
        let mut recorded = None;
        if self.status != TimerStatus::Finished && self.current_time != self.initial_time {
            if let Some(start_time) = self.session_start_time {
                let record = SessionRecord {
                    id: Uuid::new_v4().to_string(),
                    session_type: self.session_type,
                    duration: self.elapsed(),
                    completed: false,
                    start_time,
                    end_time: now,
                };
                self.history.push_front(record.clone());
                recorded = Some(record);
            }
        }

        self.status = TimerStatus::Idle;
        self.current_time = self.initial_time;
        self.session_start_time = None;
        recorded
    }

    /// One-second decrement. Returns `true` when the tick was applied.
    pub fn tick(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != TimerStatus::Running || self.current_time == 0 {
            return false;
        }
        self.current_time -= 1;
        if self.current_time == 0 {
            self.finish(now);
        }
        true
    }

    pub fn set_session_type(&mut self, session_type: SessionType) {
        self.session_type = session_type;
        self.initial_time = self.settings.duration_for(session_type);
        self.current_time = self.initial_time;
        self.status = TimerStatus::Idle;
        self.session_start_time = None;
    }

    pub fn update_settings(&mut self, patch: &TimerSettingsPatch) -> Result<()> {
        self.settings = self.settings.merged(patch)?;
        if self.status == TimerStatus::Idle {
            self.initial_time = self.settings.duration_for(self.session_type);
            self.current_time = self.initial_time;
        }
        Ok(())
    }

    pub fn next_session_type(&self) -> SessionType {
        match self.session_type {
            SessionType::Work => {
                let cycle = self.settings.sessions_until_long_break;
                if self.completed_sessions > 0 && self.completed_sessions % cycle == 0 {
                    SessionType::LongBreak
                } else {
                    SessionType::ShortBreak
                }
            }
            SessionType::ShortBreak | SessionType::LongBreak => SessionType::Work,
        }
    }

    pub fn advance(&mut self) -> SessionType {
        let next = self.next_session_type();
        self.set_session_type(next);
        next
    }

    /// Whether a session that just finished should roll straight into the next.
    pub fn should_auto_start_next(&self) -> bool {
        if self.status != TimerStatus::Finished {
            return false;
        }
        if self.next_session_type().is_break() {
            self.settings.auto_start_breaks
        } else {
            self.settings.auto_start_work
        }
    }

    /// Overwrites the remaining time with a value reported by a peer,
    /// clamped to `[0, initial_time]`. Returns the value applied.
    ///
    /// A finished session is left alone, and so is an idle one asked to
    /// jump to zero. Landing on zero while running or paused completes the
    /// session.
    pub fn correct_remaining(&mut self, remote_remaining: u32, now: DateTime<Utc>) -> Option<u32> {
        let corrected = remote_remaining.min(self.initial_time);
        match self.status {
            TimerStatus::Finished => return None,
            TimerStatus::Idle if corrected == 0 => return None,
            _ => {}
        }

        self.current_time = corrected;
        if corrected == 0 {
            self.finish(now);
        }
        Some(corrected)
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    pub fn history_stats(&self) -> HistoryStats {
        self.history.iter().fold(
            HistoryStats {
                total_sessions: self.history.len(),
                ..HistoryStats::default()
            },
            |mut stats, record| {
                if record.completed {
                    stats.completed_sessions += 1;
                }
                if record.session_type == SessionType::Work {
                    stats.work_sessions += 1;
                }
                stats.total_seconds += u64::from(record.duration);
                stats
            },
        )
    }

    fn finish(&mut self, now: DateTime<Utc>) {
        self.status = TimerStatus::Finished;
        if let Some(start_time) = self.session_start_time {
            self.history.push_front(SessionRecord {
                id: Uuid::new_v4().to_string(),
                session_type: self.session_type,
                duration: self.initial_time,
                completed: true,
                start_time,
                end_time: now,
            });
        }
        if self.session_type == SessionType::Work {
            self.completed_sessions += 1;
        }
    }
}
