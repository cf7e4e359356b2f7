use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use image::DynamicImage;
use sha2::{Digest, Sha256};

use crate::bridge::DeviceBridge;
use crate::config::Strategy;
use crate::history::{ArtifactKind, History};

/// Content key of a snapshot: SHA-256 of the captured bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(bytes: &[u8]) -> Self {
        Fingerprint(format!("{:x}", Sha256::digest(bytes)))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short prefix is plenty for logs.
        f.write_str(&self.0[..self.0.len().min(12)])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotKind {
    Image,
    Tree,
}

impl From<Strategy> for SnapshotKind {
    fn from(strategy: Strategy) -> Self {
        match strategy {
            Strategy::Structural => SnapshotKind::Tree,
            Strategy::Visual => SnapshotKind::Image,
        }
    }
}

#[derive(Debug, Clone)]
pub enum SnapshotContent {
    Image { png: Vec<u8>, image: DynamicImage },
    Tree(String),
}

/// One capture of the device's UI state.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub content: SnapshotContent,
    pub fingerprint: Fingerprint,
}

impl Snapshot {
    pub fn from_png(png: Vec<u8>) -> Result<Self> {
        let image = image::load_from_memory(&png).context("failed to decode screenshot")?;
        Ok(Snapshot {
            fingerprint: Fingerprint::of(&png),
            content: SnapshotContent::Image { png, image },
        })
    }

    pub fn from_tree(xml: String) -> Self {
        Snapshot {
            fingerprint: Fingerprint::of(xml.as_bytes()),
            content: SnapshotContent::Tree(xml),
        }
    }

    pub fn image(&self) -> Option<&DynamicImage> {
        match &self.content {
            SnapshotContent::Image { image, .. } => Some(image),
            SnapshotContent::Tree(_) => None,
        }
    }

    pub fn tree(&self) -> Option<&str> {
        match &self.content {
            SnapshotContent::Tree(xml) => Some(xml),
            SnapshotContent::Image { .. } => None,
        }
    }
}

#[async_trait]
pub trait Sampler: Send + Sync {
    /// Capture the current UI state. Fails when the device is unreachable or
    /// returns nothing usable.
    async fn sample(&self) -> Result<Snapshot>;
}

/// Samples the device through the bridge, optionally keeping a copy of each
/// raw capture in the history directory.
pub struct DeviceSampler {
    bridge: Arc<dyn DeviceBridge>,
    kind: SnapshotKind,
    history: Option<Arc<History>>,
}

impl DeviceSampler {
    pub fn new(
        bridge: Arc<dyn DeviceBridge>,
        kind: SnapshotKind,
        history: Option<Arc<History>>,
    ) -> Self {
        Self {
            bridge,
            kind,
            history,
        }
    }
}

#[async_trait]
impl Sampler for DeviceSampler {
    async fn sample(&self) -> Result<Snapshot> {
        match self.kind {
            SnapshotKind::Image => {
                let png = self
                    .bridge
                    .capture()
                    .await
                    .context("failed to capture screenshot")?;
                if let Some(history) = &self.history {
                    history.save_artifact(ArtifactKind::Screenshot, &png);
                }
                Snapshot::from_png(png)
            }
            SnapshotKind::Tree => {
                let xml = self
                    .bridge
                    .dump_tree()
                    .await
                    .context("failed to dump UI tree")?;
                if let Some(history) = &self.history {
                    history.save_artifact(ArtifactKind::Dump, xml.as_bytes());
                }
                Ok(Snapshot::from_tree(xml))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeBridge, png_bytes};

    #[test]
    fn test_fingerprint_tracks_content() {
        let a = Snapshot::from_tree("<hierarchy/>".into());
        let b = Snapshot::from_tree("<hierarchy/>".into());
        let c = Snapshot::from_tree("<hierarchy rotation=\"1\"/>".into());
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_ne!(a.fingerprint, c.fingerprint);
        assert_eq!(a.fingerprint.to_string().len(), 12);
    }

    #[test]
    fn test_from_png_rejects_garbage() {
        assert!(Snapshot::from_png(b"not a png".to_vec()).is_err());
    }

    #[tokio::test]
    async fn test_device_sampler_tree() {
        let bridge = Arc::new(FakeBridge::with_dumps(["<hierarchy/>"]));
        let sampler = DeviceSampler::new(bridge, SnapshotKind::Tree, None);

        let snapshot = sampler.sample().await.unwrap();
        assert_eq!(snapshot.tree(), Some("<hierarchy/>"));
        assert!(snapshot.image().is_none());
    }

    #[tokio::test]
    async fn test_device_sampler_image_saved_to_history() {
        let dir = tempfile::tempdir().unwrap();
        let history = Arc::new(History::open(dir.path()).unwrap());
        let png = png_bytes(&DynamicImage::new_rgb8(16, 24));
        let bridge = Arc::new(FakeBridge::with_screenshots([png.clone()]));
        let sampler = DeviceSampler::new(bridge, SnapshotKind::Image, Some(history));

        let snapshot = sampler.sample().await.unwrap();
        let image = snapshot.image().unwrap();
        assert_eq!((image.width(), image.height()), (16, 24));
        assert!(snapshot.tree().is_none());
        assert_eq!(snapshot.fingerprint, Fingerprint::of(&png));

        let saved: Vec<_> = std::fs::read_dir(dir.path().join("screens"))
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        assert_eq!(saved.len(), 1);
        assert_eq!(std::fs::read(&saved[0]).unwrap(), png);
        assert_eq!(std::fs::read_dir(dir.path().join("dumps")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_device_sampler_unreachable() {
        let bridge = Arc::new(FakeBridge::default());
        let sampler = DeviceSampler::new(bridge, SnapshotKind::Image, None);
        assert!(sampler.sample().await.is_err());
    }
}
