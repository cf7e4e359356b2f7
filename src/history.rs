//! On-disk record of what the bot saw and did.
//!
//! ```text
//! <root>/dumps/dump_<ts>.xml          every UI dump sampled
//! <root>/screens/screen_<ts>.png      every screenshot sampled
//! <root>/matches/<name>_<ts>.xml      dump of each profile a message went to
//! <root>/messages/<name>_<ts>.txt     each message sent
//! <root>/interactions.log             one handled profile name per line
//! <root>/interactions.jsonl           one InteractionRecord per line
//! ```
//!
//! Writes are best-effort: failures are logged and the run carries on.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Dump,
    Screenshot,
}

impl ArtifactKind {
    fn dir(self) -> &'static str {
        match self {
            ArtifactKind::Dump => "dumps",
            ArtifactKind::Screenshot => "screens",
        }
    }

    fn file_name(self, ts: &str) -> String {
        match self {
            ArtifactKind::Dump => format!("dump_{ts}.xml"),
            ArtifactKind::Screenshot => format!("screen_{ts}.png"),
        }
    }
}

const SUBDIRS: [&str; 4] = ["dumps", "screens", "matches", "messages"];

#[derive(Debug)]
pub struct History {
    root: PathBuf,
}

impl History {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for sub in SUBDIRS {
            let dir = root.join(sub);
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        tracing::info!("history folders ready under {}", root.display());
        Ok(Self { root })
    }

    fn timestamp() -> String {
        Local::now().format("%Y%m%d_%H%M%S_%3f").to_string()
    }

    fn write(&self, path: PathBuf, bytes: &[u8]) -> Option<PathBuf> {
        match fs::write(&path, bytes) {
            Ok(()) => {
                tracing::debug!("saved {}", path.display());
                Some(path)
            }
            Err(e) => {
                tracing::warn!("failed to write {}: {e}", path.display());
                None
            }
        }
    }

    pub fn save_artifact(&self, kind: ArtifactKind, bytes: &[u8]) -> Option<PathBuf> {
        let path = self
            .root
            .join(kind.dir())
            .join(kind.file_name(&Self::timestamp()));
        self.write(path, bytes)
    }

    /// Keep the dump of a profile that was messaged, for later review.
    pub fn save_match_dump(&self, profile: &str, xml: &str) -> Option<PathBuf> {
        let path = self
            .root
            .join("matches")
            .join(format!("{}_{}.xml", file_safe(profile), Self::timestamp()));
        self.write(path, xml.as_bytes())
    }

    pub fn save_message(&self, profile: &str, message: &str) -> Option<PathBuf> {
        let path = self
            .root
            .join("messages")
            .join(format!("{}_{}.txt", file_safe(profile), Self::timestamp()));
        self.write(path, message.as_bytes())
    }

    fn interaction_log(&self) -> PathBuf {
        self.root.join("interactions.log")
    }

    /// Whether `profile` was already handled in this or an earlier run
    /// (case-insensitive).
    pub fn has_interacted(&self, profile: &str) -> bool {
        let Ok(raw) = fs::read_to_string(self.interaction_log()) else {
            return false;
        };
        let wanted = profile.trim().to_lowercase();
        raw.lines().any(|line| line.trim().to_lowercase() == wanted)
    }

    pub fn log_interaction(&self, profile: &str) {
        self.append_line(&self.interaction_log(), profile.trim());
        tracing::info!("logged interaction with {profile:?}");
    }

    pub fn append_record<T: Serialize>(&self, record: &T) {
        let line = match serde_json::to_string(record) {
            Ok(l) => l,
            Err(e) => {
                tracing::warn!("failed to serialize interaction record: {e}");
                return;
            }
        };
        self.append_line(&self.root.join("interactions.jsonl"), &line);
    }

    fn append_line(&self, path: &Path, line: &str) {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(mut f) => {
                if let Err(e) = writeln!(f, "{line}") {
                    tracing::warn!("failed to write to {}: {e}", path.display());
                }
            }
            Err(e) => {
                tracing::warn!("failed to open {}: {e}", path.display());
            }
        }
    }
}

fn file_safe(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "unknown".into()
    } else {
        cleaned
    }
}
