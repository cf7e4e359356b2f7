use std::sync::Arc;

use serde::Serialize;

use crate::config::{ResolverConfig, Strategy};
use crate::detector::{self, PreparedTemplate};
use crate::element::{Element, Point};
use crate::llm::SuitabilityPredicate;
use crate::ocr::TextRecognizer;
use crate::snapshot::{Snapshot, SnapshotKind};
use crate::uidump::UiTree;

/// An element the bot could act on, with the text it appears to answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub element: Element,
    pub context: String,
}

/// An accepted candidate: where to tap, and why.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub element: Element,
    pub point: Point,
    pub context: String,
}

/// Finds the reply button whose surrounding text suits the message, using
/// either the UI dump or template matching on the screenshot.
pub struct TargetResolver {
    config: ResolverConfig,
    template: Option<PreparedTemplate>,
    recognizer: Option<Arc<dyn TextRecognizer>>,
}

impl TargetResolver {
    pub fn structural(config: ResolverConfig) -> Self {
        Self {
            config: ResolverConfig {
                strategy: Strategy::Structural,
                ..config
            },
            template: None,
            recognizer: None,
        }
    }

    pub fn visual(
        config: ResolverConfig,
        template: Option<PreparedTemplate>,
        recognizer: Arc<dyn TextRecognizer>,
    ) -> Self {
        Self {
            config: ResolverConfig {
                strategy: Strategy::Visual,
                ..config
            },
            template,
            recognizer: Some(recognizer),
        }
    }

    /// Build the resolver for the configured strategy. A missing template
    /// is not fatal: the visual strategy then never finds anything.
    pub fn from_config(config: &ResolverConfig, recognizer: Arc<dyn TextRecognizer>) -> Self {
        match config.strategy {
            Strategy::Structural => Self::structural(config.clone()),
            Strategy::Visual => {
                let template = match detector::load_template(&config.template_name) {
                    Ok(img) => detector::prepare_template(&img, config.match_scale_down),
                    Err(e) => {
                        tracing::warn!("visual strategy without template: {e:#}");
                        None
                    }
                };
                Self::visual(config.clone(), template, recognizer)
            }
        }
    }

    pub fn snapshot_kind(&self) -> SnapshotKind {
        self.config.strategy.into()
    }

    /// Candidates in discovery order. Problems with the snapshot yield none.
    pub async fn candidates(&self, snapshot: &Snapshot) -> Vec<Candidate> {
        match self.config.strategy {
            Strategy::Structural => self.structural_candidates(snapshot),
            Strategy::Visual => self.visual_candidates(snapshot).await,
        }
    }

    /// The first candidate with context that `predicate` accepts for `message`.
    pub async fn resolve(
        &self,
        snapshot: &Snapshot,
        predicate: &dyn SuitabilityPredicate,
        message: &str,
    ) -> Option<Resolution> {
        let candidates = self.candidates(snapshot).await;
        tracing::debug!("{} candidate(s) in snapshot {}", candidates.len(), snapshot.fingerprint);

        for candidate in candidates {
            if candidate.context.trim().is_empty() {
                tracing::debug!("candidate at {} has no nearby text, skipping", candidate.element.center());
                continue;
            }

            tracing::info!(
                "candidate at {} next to {:?}",
                candidate.element.center(),
                candidate.context
            );
            if predicate.is_suitable(&candidate.context, message).await {
                return Some(Resolution {
                    point: candidate.element.center(),
                    element: candidate.element,
                    context: candidate.context,
                });
            }
        }

        None
    }

    fn structural_candidates(&self, snapshot: &Snapshot) -> Vec<Candidate> {
        let Some(xml) = snapshot.tree() else {
            tracing::warn!("structural strategy needs a UI dump, got a screenshot");
            return Vec::new();
        };
        let tree = match UiTree::parse(xml) {
            Ok(tree) => tree,
            Err(e) => {
                tracing::warn!("skipping unparseable dump: {e}");
                return Vec::new();
            }
        };

        tree.find_by_class_and_desc(&self.config.button_class, &self.config.button_desc)
            .map(|element| Candidate {
                context: context_for(&tree, element, self.config.context_distance)
                    .unwrap_or_default(),
                element: element.clone(),
            })
            .collect()
    }

    async fn visual_candidates(&self, snapshot: &Snapshot) -> Vec<Candidate> {
        let Some(image) = snapshot.image() else {
            tracing::warn!("visual strategy needs a screenshot, got a UI dump");
            return Vec::new();
        };
        let Some(template) = &self.template else {
            tracing::warn!("no template loaded, visual strategy cannot match");
            return Vec::new();
        };

        let best = detector::find_best_match(image, template);
        let Some(m) = detector::accept_match(best, self.config.match_threshold) else {
            return Vec::new();
        };
        tracing::info!(
            "template matched around {} score={:.3} via {:?}",
            m.center(),
            m.score,
            m.method
        );

        let crop = detector::crop_with_margin(image, &m, self.config.crop_margin);
        let context = match &self.recognizer {
            Some(recognizer) => match recognizer.recognize(&crop).await {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!("text recognition near match failed: {e}");
                    String::new()
                }
            },
            None => String::new(),
        };

        vec![Candidate {
            element: Element {
                index: 0,
                parent: None,
                depth: 0,
                bounds: m.bounds(),
                class: format!("template:{}", self.config.template_name),
                text: None,
                description: None,
                clickable: true,
                focusable: false,
                focused: false,
            },
            context,
        }]
    }
}

/// Prompt text of an element: its text, else its content description.
/// Labels of three characters or fewer are too generic to count.
fn prompt_text(element: &Element) -> Option<&str> {
    element
        .text()
        .or_else(|| Some(element.description().trim()).filter(|d| !d.is_empty()))
        .filter(|t| t.chars().count() > 3)
}

/// Text that `candidate` answers: the closest prompt text above it, searched
/// in the candidate's parent first and then ever wider ancestors. Elements in
/// the candidate's own subtree never count.
///
/// The closest text is prefixed with the earlier sibling texts of its block
/// (a prompt's title above its answer), joined by `" | "`.
pub fn context_for(tree: &UiTree, candidate: &Element, max_distance: u32) -> Option<String> {
    let center_y = candidate.center().y;

    for scope in tree.ancestors(candidate.index) {
        let closest = tree
            .descendants(scope.index)
            .iter()
            .filter(|e| prompt_text(e).is_some() && e.center().y < center_y)
            .filter(|e| !tree.is_within(e.index, candidate.index))
            .filter_map(|e| {
                let gap = candidate.bounds.top.saturating_sub(e.bounds.bottom);
                (gap <= max_distance).then_some((gap, e))
            })
            .min_by_key(|(gap, e)| (*gap, std::cmp::Reverse(e.index)))
            .map(|(_, e)| e);

        if let Some(closest) = closest {
            return Some(block_text(tree, closest, max_distance));
        }
    }

    None
}

fn block_text(tree: &UiTree, closest: &Element, max_distance: u32) -> String {
    let mut parts: Vec<&str> = match closest.parent {
        Some(parent) => tree
            .descendants(parent)
            .iter()
            .filter(|e| e.parent == Some(parent) && e.index < closest.index)
            .filter(|e| {
                e.bounds.bottom <= closest.bounds.top
                    && closest.bounds.top - e.bounds.bottom <= max_distance
            })
            .filter_map(prompt_text)
            .collect(),
        None => Vec::new(),
    };
    parts.extend(prompt_text(closest));
    parts.join(" | ")
}
