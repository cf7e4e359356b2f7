use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::element::Point;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BotPhase {
    Idle,
    Running,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// A message went out through the reply target.
    Sent,
    /// No suitable target before the page ran out; profile skipped.
    TargetNotFound,
    /// The target was tapped but sending failed; profile skipped.
    SendFailed,
    /// No message could be chosen; profile skipped.
    NoMessage,
    /// Profile was handled in an earlier run; skipped.
    AlreadySeen,
}

#[derive(Debug, Clone, Serialize)]
pub struct InteractionRecord {
    pub profile: Option<String>,
    pub outcome: Outcome,
    pub message: Option<String>,
    /// Profile text the target was matched against.
    pub context: Option<String>,
    pub target: Option<Point>,
    pub at: DateTime<Utc>,
    pub duration_secs: f64,
}

pub struct AppStateInner {
    pub phase: BotPhase,
    pub current_profile: Option<String>,
    pub interactions: Vec<InteractionRecord>,
    pub run_handle: Option<JoinHandle<()>>,
    pub config: Config,
    pub pause_notify: Arc<Notify>,
    pub profiles_processed: u32,
}

pub type AppState = Arc<Mutex<AppStateInner>>;

impl AppStateInner {
    pub fn new(config: Config) -> Self {
        Self {
            phase: BotPhase::Idle,
            current_profile: None,
            interactions: Vec::new(),
            run_handle: None,
            config,
            pause_notify: Arc::new(Notify::new()),
            profiles_processed: 0,
        }
    }

    pub fn record(&mut self, record: InteractionRecord) {
        self.profiles_processed += 1;
        self.interactions.push(record);
    }

    pub fn messages_sent(&self) -> usize {
        self.interactions
            .iter()
            .filter(|r| r.outcome == Outcome::Sent)
            .count()
    }
}
