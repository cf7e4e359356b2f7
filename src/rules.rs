//! Hard-coded reply rules, used when message generation is off or fails.
//!
//! Rules are read from a JSON array:
//!
//! ```json
//! [
//!   {"condition": "contains coffee", "message": "Coffee first, crosswords after?"},
//!   {"condition": "startswith A", "message": "Hi! Your name caught my eye."}
//! ]
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum Condition {
    /// Profile text contains the keyword (case-insensitive).
    Contains(String),
    /// Profile name starts with the prefix (case-insensitive).
    StartsWith(String),
}

impl TryFrom<String> for Condition {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        let raw = raw.trim();
        let (op, arg) = raw.split_once(char::is_whitespace).unwrap_or((raw, ""));
        let arg = arg.trim();
        if arg.is_empty() {
            return Err(format!("condition {raw:?} has no argument"));
        }
        match op.to_ascii_lowercase().as_str() {
            "contains" => Ok(Condition::Contains(arg.to_lowercase())),
            "startswith" | "starts_with" => Ok(Condition::StartsWith(arg.to_lowercase())),
            other => Err(format!("unknown condition {other:?}, expected contains or startswith")),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Rule {
    pub condition: Condition,
    pub message: String,
}

pub fn load_rules(path: impl AsRef<Path>) -> Result<Vec<Rule>> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read rules from {}", path.display()))?;
    let rules: Vec<Rule> = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse rules in {}", path.display()))?;
    tracing::info!("loaded {} rule(s) from {}", rules.len(), path.display());
    Ok(rules)
}

/// The message of the first rule that matches the profile.
///
/// `name` is the profile name from the UI; when absent, a `Name: <word>` line
/// in `text` is used instead.
pub fn match_rules<'a>(rules: &'a [Rule], text: &str, name: Option<&str>) -> Option<&'a str> {
    let text = text.to_lowercase();
    let name = name
        .map(str::to_string)
        .or_else(|| name_from_text(&text))
        .map(|n| n.to_lowercase());

    for rule in rules {
        let matched = match &rule.condition {
            Condition::Contains(keyword) => text.contains(keyword.as_str()),
            Condition::StartsWith(prefix) => name
                .as_deref()
                .is_some_and(|n| n.starts_with(prefix.as_str())),
        };
        if matched {
            tracing::info!("rule matched: {:?}", rule.condition);
            return Some(&rule.message);
        }
    }

    tracing::info!("no rules matched");
    None
}

fn name_from_text(text: &str) -> Option<String> {
    let idx = text.find("name:")?;
    let word: String = text[idx + "name:".len()..]
        .trim_start()
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    (!word.is_empty()).then_some(word)
}
