pub mod commands;
pub mod controller;
pub mod state;

pub use controller::{TimerController, TimerEvent, TimerEventKind};
pub use state::{
    HistoryStats, SessionRecord, SessionType, TimerSettings, TimerSettingsPatch, TimerState,
    TimerStatus,
};
