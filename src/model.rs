use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Resolved host settings, built once from CLI arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    pub data_dir: PathBuf,
    pub builds_file: PathBuf,
    pub tree_cache_dir: PathBuf,
    pub worker: WorkerSpec,
    pub write_policy: WritePolicy,
    pub write_queue: usize,
    pub preload: bool,
}

/// How to launch the backend worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSpec {
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
}

/// What happens to an outbound command when the worker's input can't take it right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum WritePolicy {
    /// Drop the command being submitted; nothing is queued or retried.
    DropNewest,
    /// Wait a bounded time for queue space, then drop as busy. Commands are still dropped
    /// once the input has closed.
    Wait,
}

/// Outcome of submitting a command to the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    Dropped(DropReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The write queue was full.
    Busy,
    /// The worker's input stream is closed.
    Unwritable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityStatus {
    Available,
    Completed,
}

impl ActivityStatus {
    pub fn toggled(self) -> Self {
        match self {
            ActivityStatus::Available => ActivityStatus::Completed,
            ActivityStatus::Completed => ActivityStatus::Available,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResetCadence {
    Daily,
    Weekly,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    pub status: ActivityStatus,
    pub reset: ResetCadence,
}

/// A tracked character as persisted in the roster file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Character {
    pub name: String,
    // Either a number or "?" when unknown.
    pub level: serde_json::Value,
    pub realm: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub portrait_url: Option<String>,
    #[serde(default = "default_activities")]
    pub activities: BTreeMap<String, Activity>,
    #[serde(default)]
    pub last_reset_check: Option<String>,
}

fn default_region() -> String {
    "eu".to_string()
}

/// Activities every new character starts with.
pub fn default_activities() -> BTreeMap<String, Activity> {
    [
        ("Raid", ResetCadence::Weekly),
        ("Mythic+", ResetCadence::Weekly),
        ("Expeditions", ResetCadence::Weekly),
        ("World Quests", ResetCadence::Daily),
    ]
    .into_iter()
    .map(|(name, reset)| {
        (
            name.to_string(),
            Activity {
                status: ActivityStatus::Available,
                reset,
            },
        )
    })
    .collect()
}

impl Character {
    /// Case-insensitive identity used to de-duplicate and look up characters.
    pub fn is(&self, name: &str, realm: &str) -> bool {
        self.name.eq_ignore_ascii_case(name) && self.realm.eq_ignore_ascii_case(realm)
    }
}
