use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::{
    timer::{SessionType, TimerSettingsPatch, TimerState},
    AppState,
};

const HELP: &str = "\
commands:
  start | pause | reset | next
  work | short | long             switch session type
  set work|short|long <minutes>
  set cycle <sessions>            work sessions before a long break
  set autobreaks|autowork on|off
  status | history | clear
  connect [url] | disconnect
  help | quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Start,
    Pause,
    Reset,
    Next,
    Switch(SessionType),
    Set(TimerSettingsPatch),
    Status,
    History,
    Clear,
    Connect(Option<String>),
    Disconnect,
    Help,
    Quit,
}

impl FromStr for ConsoleCommand {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let head = words
            .next()
            .ok_or_else(|| anyhow!("empty command"))?
            .to_ascii_lowercase();

        let command = match head.as_str() {
            "start" | "resume" => ConsoleCommand::Start,
            "pause" => ConsoleCommand::Pause,
            "reset" => ConsoleCommand::Reset,
            "next" | "skip" => ConsoleCommand::Next,
            "work" => ConsoleCommand::Switch(SessionType::Work),
            "short" => ConsoleCommand::Switch(SessionType::ShortBreak),
            "long" => ConsoleCommand::Switch(SessionType::LongBreak),
            "status" => ConsoleCommand::Status,
            "history" => ConsoleCommand::History,
            "clear" => ConsoleCommand::Clear,
            "connect" => ConsoleCommand::Connect(words.next().map(str::to_string)),
            "disconnect" => ConsoleCommand::Disconnect,
            "help" | "?" => ConsoleCommand::Help,
            "quit" | "exit" => ConsoleCommand::Quit,
            "set" => {
                let field = words.next().context("usage: set <field> <value>")?;
                let value = words.next().context("usage: set <field> <value>")?;
                ConsoleCommand::Set(parse_setting(field, value)?)
            }
            other => bail!("unknown command '{other}' (try 'help')"),
        };

        if words.next().is_some() {
            bail!("too many arguments for '{head}'");
        }
        Ok(command)
    }
}

fn parse_setting(field: &str, value: &str) -> Result<TimerSettingsPatch> {
    let mut patch = TimerSettingsPatch::default();
    match field.to_ascii_lowercase().as_str() {
        "work" => patch.work_duration = Some(minutes(value)?),
        "short" => patch.short_break_duration = Some(minutes(value)?),
        "long" => patch.long_break_duration = Some(minutes(value)?),
        "cycle" => {
            patch.sessions_until_long_break = Some(
                value
                    .parse()
                    .with_context(|| format!("'{value}' is not a session count"))?,
            )
        }
        "autobreaks" => patch.auto_start_breaks = Some(switch(value)?),
        "autowork" => patch.auto_start_work = Some(switch(value)?),
        other => bail!("unknown setting '{other}'"),
    }
    Ok(patch)
}

fn minutes(value: &str) -> Result<u32> {
    let minutes: u32 = value
        .parse()
        .with_context(|| format!("'{value}' is not a number of minutes"))?;
    minutes
        .checked_mul(60)
        .ok_or_else(|| anyhow!("{minutes} minutes is too long"))
}

fn switch(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "on" | "true" | "1" => Ok(true),
        "off" | "false" | "0" => Ok(false),
        other => bail!("expected on/off, got '{other}'"),
    }
}

/// Renders seconds as `MM:SS`.
pub fn format_time(seconds: u32) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

pub fn describe(state: &TimerState) -> String {
    let session = state
        .current_session
        .map(|n| format!(" #{n}"))
        .unwrap_or_default();
    format!(
        "{}{} {} [{:?}] | {} work sessions completed",
        state.session_type.label(),
        session,
        format_time(state.current_time),
        state.status,
        state.completed_sessions
    )
}

/// Runs one command. `Ok(None)` asks the console to exit.
pub async fn execute(app: &AppState, command: ConsoleCommand) -> Result<Option<String>> {
    let coordinator = &app.coordinator;
    let timer = coordinator.timer();

    let reply = match command {
        ConsoleCommand::Start => {
            if coordinator.start().await {
                describe(&timer.get_state().await)
            } else {
                "timer is already running or finished (reset or next first)".to_string()
            }
        }
        ConsoleCommand::Pause => {
            if coordinator.pause().await {
                describe(&timer.get_state().await)
            } else {
                "timer is not running".to_string()
            }
        }
        ConsoleCommand::Reset => match coordinator.reset().await {
            Some(record) => format!(
                "reset; recorded {} of {}",
                format_time(record.duration),
                record.session_type.label()
            ),
            None => describe(&timer.get_state().await),
        },
        ConsoleCommand::Next => {
            let next = timer.advance().await;
            format!("next up: {}", next.label())
        }
        ConsoleCommand::Switch(session_type) => {
            timer.set_session_type(session_type).await;
            describe(&timer.get_state().await)
        }
        ConsoleCommand::Set(patch) => {
            let settings = timer.update_settings(patch).await?;
            app.settings.update_timer_settings(settings)?;
            format!(
                "work {}m, short {}m, long {}m, long break every {} sessions, auto breaks {}, auto work {}",
                settings.work_duration / 60,
                settings.short_break_duration / 60,
                settings.long_break_duration / 60,
                settings.sessions_until_long_break,
                settings.auto_start_breaks,
                settings.auto_start_work
            )
        }
        ConsoleCommand::Status => {
            let state = timer.get_state().await;
            format!(
                "{} | sync {}",
                describe(&state),
                coordinator.channel().connection_state()
            )
        }
        ConsoleCommand::History => {
            let state = timer.get_state().await;
            if state.history.is_empty() {
                "no sessions yet".to_string()
            } else {
                let stats = state.history_stats();
                let mut lines: Vec<String> = state
                    .history
                    .iter()
                    .map(|record| {
                        format!(
                            "{} {:<11} {} {}",
                            record.end_time.format("%Y-%m-%d %H:%M"),
                            record.session_type.label(),
                            format_time(record.duration),
                            if record.completed { "done" } else { "stopped" }
                        )
                    })
                    .collect();
                lines.push(format!(
                    "{} sessions, {} completed, {} work, {} total",
                    stats.total_sessions,
                    stats.completed_sessions,
                    stats.work_sessions,
                    format_time(u32::try_from(stats.total_seconds).unwrap_or(u32::MAX))
                ));
                lines.join("\n")
            }
        }
        ConsoleCommand::Clear => {
            timer.clear_history().await;
            "history cleared".to_string()
        }
        ConsoleCommand::Connect(address) => {
            let channel = coordinator.channel();
            match address {
                Some(address) => channel.connect(&address).await?,
                None => channel.connect_default().await?,
            }
            format!("sync {}", channel.connection_state())
        }
        ConsoleCommand::Disconnect => {
            coordinator.channel().disconnect().await;
            format!("sync {}", coordinator.channel().connection_state())
        }
        ConsoleCommand::Help => HELP.to_string(),
        ConsoleCommand::Quit => return Ok(None),
    };

    Ok(Some(reply))
}

/// Reads commands from stdin until `quit` or end of input.
pub async fn run_console(app: &AppState) -> Result<()> {
    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let outcome = match line.parse::<ConsoleCommand>() {
            Ok(command) => execute(app, command).await,
            Err(err) => Err(err),
        };
        match outcome {
            Ok(Some(reply)) => println!("{reply}"),
            Ok(None) => break,
            Err(err) => println!("error: {err:#}"),
        }
    }
    Ok(())
}
