use std::process::Output;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

use crate::config::{Config, SwipeConfig};

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("`{0}` returned no data")]
    Empty(String),
}

/// Android key code for DEL (backspace).
pub const KEYCODE_DEL: u32 = 67;

/// Longest text sent in a single `input text` call.
const INPUT_CHUNK_LEN: usize = 100;

/// Remote path uiautomator writes its dump to.
const REMOTE_DUMP_PATH: &str = "/sdcard/ui.xml";

/// Shell-level operations on the device. Every call blocks until the
/// underlying command returns.
#[async_trait]
pub trait DeviceBridge: Send + Sync {
    /// PNG screenshot of the current screen.
    async fn capture(&self) -> Result<Vec<u8>, BridgeError>;

    /// uiautomator XML dump of the current screen.
    async fn dump_tree(&self) -> Result<String, BridgeError>;

    async fn tap(&self, x: u32, y: u32) -> Result<(), BridgeError>;

    async fn swipe(&self, swipe: &SwipeConfig) -> Result<(), BridgeError>;

    /// Type `text` into the focused field.
    async fn input_text(&self, text: &str) -> Result<(), BridgeError>;

    async fn key_event(&self, code: u32) -> Result<(), BridgeError>;
}

/// `adb` command-line bridge.
pub struct Adb {
    program: String,
    serial: Option<String>,
}

impl Adb {
    pub fn new(program: impl Into<String>, serial: Option<String>) -> Self {
        Self {
            program: program.into(),
            serial,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.adb_path.clone(), config.device_serial.clone())
    }

    fn describe(&self, args: &[&str]) -> String {
        let mut parts = vec![self.program.as_str()];
        if let Some(serial) = &self.serial {
            parts.extend(["-s", serial.as_str()]);
        }
        parts.extend_from_slice(args);
        parts.join(" ")
    }

    async fn run(&self, args: &[&str]) -> Result<Vec<u8>, BridgeError> {
        let mut cmd = Command::new(&self.program);
        if let Some(serial) = &self.serial {
            cmd.arg("-s").arg(serial);
        }
        cmd.args(args).kill_on_drop(true);

        tracing::debug!("running {}", self.describe(args));
        let output: Output = cmd.output().await.map_err(|source| BridgeError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        if !output.status.success() {
            return Err(BridgeError::CommandFailed {
                command: self.describe(args),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(output.stdout)
    }

    async fn shell(&self, args: &[&str]) -> Result<(), BridgeError> {
        let mut full = vec!["shell"];
        full.extend_from_slice(args);
        self.run(&full).await.map(|_| ())
    }
}

#[async_trait]
impl DeviceBridge for Adb {
    async fn capture(&self) -> Result<Vec<u8>, BridgeError> {
        let args = ["exec-out", "screencap", "-p"];
        let png = self.run(&args).await?;
        if png.is_empty() {
            return Err(BridgeError::Empty(self.describe(&args)));
        }
        Ok(png)
    }

    async fn dump_tree(&self) -> Result<String, BridgeError> {
        self.shell(&["uiautomator", "dump", REMOTE_DUMP_PATH]).await?;

        let args = ["exec-out", "cat", REMOTE_DUMP_PATH];
        let xml = self.run(&args).await?;
        let xml = String::from_utf8_lossy(&xml).trim().to_string();
        if xml.is_empty() {
            return Err(BridgeError::Empty(self.describe(&args)));
        }
        Ok(xml)
    }

    async fn tap(&self, x: u32, y: u32) -> Result<(), BridgeError> {
        tracing::info!("tapping at ({x}, {y})");
        self.shell(&["input", "tap", &x.to_string(), &y.to_string()])
            .await
    }

    async fn swipe(&self, swipe: &SwipeConfig) -> Result<(), BridgeError> {
        tracing::debug!(
            "swiping ({}, {}) -> ({}, {}) over {}ms",
            swipe.x1, swipe.y1, swipe.x2, swipe.y2, swipe.duration_ms
        );
        self.shell(&[
            "input",
            "swipe",
            &swipe.x1.to_string(),
            &swipe.y1.to_string(),
            &swipe.x2.to_string(),
            &swipe.y2.to_string(),
            &swipe.duration_ms.to_string(),
        ])
        .await
    }

    async fn input_text(&self, text: &str) -> Result<(), BridgeError> {
        for chunk in encode_text_chunks(text, INPUT_CHUNK_LEN) {
            self.shell(&["input", "text", &chunk]).await?;
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        }
        Ok(())
    }

    async fn key_event(&self, code: u32) -> Result<(), BridgeError> {
        self.shell(&["input", "keyevent", &code.to_string()]).await
    }
}

/// Split `text` into `input text` arguments of at most `max_len` source
/// characters each. Spaces become `%s` and characters the device shell would
/// interpret are backslash-escaped.
pub fn encode_text_chunks(text: &str, max_len: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(max_len.max(1))
        .map(|chunk| {
            let mut encoded = String::with_capacity(chunk.len() * 2);
            for &c in chunk {
                match c {
                    ' ' => encoded.push_str("%s"),
                    '(' | ')' | '?' | '*' | '[' | ']' | '{' | '}' | '#' | '~' | '!' | '%' => {
                        encoded.push('\\');
                        encoded.push(c);
                    }
                    _ => encoded.push(c),
                }
            }
            encoded
        })
        .collect()
}
