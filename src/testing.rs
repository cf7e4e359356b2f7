//! In-memory stand-ins for the device, OCR and language model.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use image::DynamicImage;

use crate::bridge::{BridgeError, DeviceBridge};
use crate::config::SwipeConfig;
use crate::llm::{MessageGenerator, SuitabilityPredicate};
use crate::ocr::{OcrError, TextRecognizer};
use crate::snapshot::{Sampler, Snapshot};

#[derive(Debug, Clone, PartialEq)]
pub enum BridgeCall {
    Tap(u32, u32),
    Swipe(SwipeConfig),
    Text(String),
    Key(u32),
}

/// Pops from the front, but keeps handing out the last entry once only one
/// is left.
fn next_sticky<T: Clone>(queue: &Mutex<VecDeque<T>>) -> Option<T> {
    let mut queue = queue.lock().unwrap();
    if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    }
}

/// Device that serves scripted dumps and screenshots and records every
/// action. With nothing scripted, captures fail as an unreachable device would.
#[derive(Default)]
pub struct FakeBridge {
    dumps: Mutex<VecDeque<String>>,
    screenshots: Mutex<VecDeque<Vec<u8>>>,
    calls: Mutex<Vec<BridgeCall>>,
}

impl FakeBridge {
    pub fn with_dumps<S: Into<String>>(dumps: impl IntoIterator<Item = S>) -> Self {
        Self {
            dumps: Mutex::new(dumps.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub fn with_screenshots(screenshots: impl IntoIterator<Item = Vec<u8>>) -> Self {
        Self {
            screenshots: Mutex::new(screenshots.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<BridgeCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: BridgeCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl DeviceBridge for FakeBridge {
    async fn capture(&self) -> Result<Vec<u8>, BridgeError> {
        next_sticky(&self.screenshots).ok_or_else(|| BridgeError::Empty("fake screencap".into()))
    }

    async fn dump_tree(&self) -> Result<String, BridgeError> {
        next_sticky(&self.dumps).ok_or_else(|| BridgeError::Empty("fake uiautomator dump".into()))
    }

    async fn tap(&self, x: u32, y: u32) -> Result<(), BridgeError> {
        self.record(BridgeCall::Tap(x, y));
        Ok(())
    }

    async fn swipe(&self, swipe: &SwipeConfig) -> Result<(), BridgeError> {
        self.record(BridgeCall::Swipe(*swipe));
        Ok(())
    }

    async fn input_text(&self, text: &str) -> Result<(), BridgeError> {
        self.record(BridgeCall::Text(text.to_string()));
        Ok(())
    }

    async fn key_event(&self, code: u32) -> Result<(), BridgeError> {
        self.record(BridgeCall::Key(code));
        Ok(())
    }
}

/// Sampler that replays a fixed list of snapshots, repeating the last one.
pub struct ScriptedSampler {
    snapshots: Mutex<VecDeque<Snapshot>>,
    samples: AtomicU32,
}

impl ScriptedSampler {
    pub fn trees<S: Into<String>>(dumps: impl IntoIterator<Item = S>) -> Self {
        Self {
            snapshots: Mutex::new(
                dumps
                    .into_iter()
                    .map(|xml| Snapshot::from_tree(xml.into()))
                    .collect(),
            ),
            samples: AtomicU32::new(0),
        }
    }

    pub fn failing() -> Self {
        Self::trees(Vec::<String>::new())
    }

    pub fn samples(&self) -> u32 {
        self.samples.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sampler for ScriptedSampler {
    async fn sample(&self) -> Result<Snapshot> {
        self.samples.fetch_add(1, Ordering::SeqCst);
        next_sticky(&self.snapshots).ok_or_else(|| anyhow::anyhow!("device unreachable"))
    }
}

/// Predicate with a fixed answer that remembers what it was asked.
pub struct FixedPredicate {
    verdict: bool,
    seen: Mutex<Vec<(String, String)>>,
}

impl FixedPredicate {
    pub fn new(verdict: bool) -> Self {
        Self {
            verdict,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn seen(&self) -> Vec<(String, String)> {
        self.seen.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl SuitabilityPredicate for FixedPredicate {
    async fn is_suitable(&self, context: &str, message: &str) -> bool {
        self.seen
            .lock()
            .unwrap()
            .push((context.to_string(), message.to_string()));
        self.verdict
    }
}

pub struct FakeRecognizer {
    text: String,
}

impl FakeRecognizer {
    pub fn new(text: &str) -> Self {
        Self { text: text.into() }
    }
}

#[async_trait]
impl TextRecognizer for FakeRecognizer {
    async fn recognize(&self, _image: &DynamicImage) -> Result<String, OcrError> {
        Ok(self.text.clone())
    }
}

pub struct FakeGenerator {
    message: Option<String>,
}

impl FakeGenerator {
    pub fn new(message: Option<&str>) -> Self {
        Self {
            message: message.map(str::to_string),
        }
    }
}

#[async_trait]
impl MessageGenerator for FakeGenerator {
    async fn generate(&self, _bio: &str) -> Option<String> {
        self.message.clone()
    }
}

/// `img` encoded as PNG, as `screencap -p` would return it.
pub fn png_bytes(img: &DynamicImage) -> Vec<u8> {
    let mut png = std::io::Cursor::new(Vec::new());
    img.write_to(&mut png, image::ImageFormat::Png).unwrap();
    png.into_inner()
}

/// A dump with no text and no buttons; `seed` only makes it unique.
pub fn blank_dump(seed: u32) -> String {
    format!(
        r#"<hierarchy rotation="0"><node index="0" text="" class="android.widget.FrameLayout" content-desc="" clickable="false" focusable="false" focused="false" bounds="[0,0][1080,{}]" /></hierarchy>"#,
        seed.max(1)
    )
}

/// A dump holding one TextView per entry, stacked top to bottom.
pub fn dump_with_texts(texts: &[&str]) -> String {
    let nodes: String = texts
        .iter()
        .enumerate()
        .map(|(i, text)| {
            let top = 100 + i * 100;
            format!(
                r#"<node index="{i}" text="{text}" class="android.widget.TextView" content-desc="" clickable="false" focusable="false" focused="false" bounds="[0,{top}][1080,{}]" />"#,
                top + 80
            )
        })
        .collect();
    format!(
        r#"<hierarchy rotation="0"><node index="0" text="" class="android.widget.FrameLayout" content-desc="" clickable="false" focusable="false" focused="false" bounds="[0,0][1080,2400]">{nodes}</node></hierarchy>"#
    )
}
