use std::collections::HashSet;
use std::time::Duration;

use anyhow::{Result, bail};

use crate::bridge::DeviceBridge;
use crate::config::SwipeConfig;
use crate::convergence::{Action, ConvergenceDetector};
use crate::finder::FinderSettings;
use crate::ocr::TextRecognizer;
use crate::snapshot::{Sampler, Snapshot, SnapshotContent};
use crate::uidump::UiTree;

/// Scroll down the profile collecting every distinct line of text, stopping
/// once the page converges or `settings.max_cycles` samples were taken.
///
/// Fails only when not a single snapshot could be taken.
pub async fn read_profile(
    sampler: &dyn Sampler,
    bridge: &dyn DeviceBridge,
    recognizer: &dyn TextRecognizer,
    settings: &FinderSettings,
) -> Result<String> {
    let mut detector = ConvergenceDetector::new(settings.convergence);
    let mut lines = Vec::new();
    let mut seen = HashSet::new();

    for cycle in 1..=settings.max_cycles {
        let snapshot = match sampler.sample().await {
            Ok(s) => s,
            Err(e) if cycle == 1 => return Err(e.context("failed to sample profile")),
            Err(e) => {
                tracing::warn!("stopping profile read, sampling failed: {e:#}");
                break;
            }
        };

        match detector.update(&snapshot.fingerprint) {
            Action::Continue => {
                for line in snapshot_text(&snapshot, recognizer).await {
                    if seen.insert(line.to_lowercase()) {
                        lines.push(line);
                    }
                }
            }
            Action::Scroll => {}
            Action::Stop => break,
        }

        if cycle < settings.max_cycles {
            if let Err(e) = bridge.swipe(&settings.swipe).await {
                tracing::warn!("swipe failed while reading profile: {e}");
            }
            detector.record_scroll();
            tokio::time::sleep(settings.settle).await;
        }
    }

    if lines.is_empty() {
        bail!("no text found on profile");
    }
    tracing::info!(
        "read {} line(s) of profile text over {} scroll(s)",
        lines.len(),
        detector.state().scrolls
    );
    Ok(lines.join("\n"))
}

async fn snapshot_text(snapshot: &Snapshot, recognizer: &dyn TextRecognizer) -> Vec<String> {
    match &snapshot.content {
        SnapshotContent::Tree(xml) => match UiTree::parse(xml) {
            Ok(tree) => tree.texts().map(str::to_string).collect(),
            Err(e) => {
                tracing::warn!("skipping unparseable profile dump: {e}");
                Vec::new()
            }
        },
        SnapshotContent::Image { image, .. } => match recognizer.recognize(image).await {
            Ok(text) => text.lines().map(str::to_string).collect(),
            Err(e) => {
                tracing::warn!("profile OCR failed: {e}");
                Vec::new()
            }
        },
    }
}

/// Swipe back up `count` times.
pub async fn scroll_to_top(
    bridge: &dyn DeviceBridge,
    swipe: &SwipeConfig,
    count: u32,
    settle: Duration,
) {
    let up = swipe.reversed();
    for _ in 0..count {
        if let Err(e) = bridge.swipe(&up).await {
            tracing::warn!("swipe failed while scrolling to top: {e}");
            return;
        }
        tokio::time::sleep(settle).await;
    }
}
