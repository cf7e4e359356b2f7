use std::path::PathBuf;

use anyhow::Result;
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageBuffer, Luma};
use imageproc::template_matching::{MatchTemplateMethod, match_template};
use serde::Serialize;

use crate::element::{Bounds, Point};

/// Smallest template side (after downscaling) still worth matching.
const MIN_TEMPLATE_SIDE: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    /// Normalized cross-correlation; score is the maximum.
    CrossCorrelation,
    /// Normalized sum of squared differences; score is `1 - minimum`.
    SquaredDifference,
}

/// Best template location in a screenshot, in original screenshot pixels.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemplateMatch {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub score: f32,
    pub method: MatchMethod,
}

impl TemplateMatch {
    pub fn bounds(&self) -> Bounds {
        Bounds {
            left: self.x,
            top: self.y,
            right: self.x + self.width,
            bottom: self.y + self.height,
        }
    }

    pub fn center(&self) -> Point {
        self.bounds().center()
    }
}

/// Grayscale reference image, downscaled once at startup and reused for every
/// capture.
#[derive(Debug, Clone)]
pub struct PreparedTemplate {
    pub gray: GrayImage,
    pub scale_down: u32,
    pub original_width: u32,
    pub original_height: u32,
}

pub fn prepare_template(img: &DynamicImage, scale_down: u32) -> Option<PreparedTemplate> {
    let scale_down = scale_down.max(1);
    let small_w = img.width() / scale_down;
    let small_h = img.height() / scale_down;

    if small_w < MIN_TEMPLATE_SIDE || small_h < MIN_TEMPLATE_SIDE {
        tracing::warn!(
            "template {}x{} too small after 1/{scale_down} downscale",
            img.width(),
            img.height()
        );
        return None;
    }

    Some(PreparedTemplate {
        gray: downscale(img, scale_down),
        scale_down,
        original_width: img.width(),
        original_height: img.height(),
    })
}

fn downscale(img: &DynamicImage, scale_down: u32) -> GrayImage {
    if scale_down <= 1 {
        return img.to_luma8();
    }
    img.resize_exact(
        img.width() / scale_down,
        img.height() / scale_down,
        FilterType::Triangle,
    )
    .to_luma8()
}

/// Locate `template` in `screenshot` with both normalized methods and keep
/// whichever is more confident. `None` when the template does not fit or no
/// finite score was produced.
pub fn find_best_match(
    screenshot: &DynamicImage,
    template: &PreparedTemplate,
) -> Option<TemplateMatch> {
    let scale = template.scale_down;
    let small = downscale(screenshot, scale);

    if template.gray.width() > small.width() || template.gray.height() > small.height() {
        tracing::warn!(
            "template {}x{} is too large for screenshot {}x{}",
            template.gray.width(),
            template.gray.height(),
            small.width(),
            small.height()
        );
        return None;
    }

    let ccorr = match_template(
        &small,
        &template.gray,
        MatchTemplateMethod::CrossCorrelationNormalized,
    );
    let sqdiff = match_template(
        &small,
        &template.gray,
        MatchTemplateMethod::SumOfSquaredErrorsNormalized,
    );

    let by_ccorr = extreme(&ccorr, |a, b| a > b).map(|(x, y, v)| (x, y, v, MatchMethod::CrossCorrelation));
    let by_sqdiff =
        extreme(&sqdiff, |a, b| a < b).map(|(x, y, v)| (x, y, 1.0 - v, MatchMethod::SquaredDifference));

    tracing::debug!(
        "template {}x{}: ccorr={:?} sqdiff={:?}",
        template.gray.width(),
        template.gray.height(),
        by_ccorr.map(|m| m.2),
        by_sqdiff.map(|m| m.2)
    );

    let (x, y, score, method) = match (by_ccorr, by_sqdiff) {
        (Some(a), Some(b)) => {
            if b.2 > a.2 {
                b
            } else {
                a
            }
        }
        (a, b) => a.or(b)?,
    };

    Some(TemplateMatch {
        x: x * scale,
        y: y * scale,
        width: template.original_width,
        height: template.original_height,
        score,
        method,
    })
}

/// Position and value of the first finite extreme under `better`.
fn extreme(
    result: &ImageBuffer<Luma<f32>, Vec<f32>>,
    better: impl Fn(f32, f32) -> bool,
) -> Option<(u32, u32, f32)> {
    let mut best: Option<(u32, u32, f32)> = None;
    for (x, y, pixel) in result.enumerate_pixels() {
        let value = pixel.0[0];
        if !value.is_finite() {
            continue;
        }
        if best.is_none_or(|(_, _, b)| better(value, b)) {
            best = Some((x, y, value));
        }
    }
    best
}

/// Keep `m` only when it clears `threshold`.
pub fn accept_match(m: Option<TemplateMatch>, threshold: f32) -> Option<TemplateMatch> {
    match m {
        Some(m) if m.score >= threshold => Some(m),
        Some(m) => {
            tracing::debug!(
                "best match {:.3} ({:?}) below threshold {threshold:.2}",
                m.score,
                m.method
            );
            None
        }
        None => None,
    }
}

/// The match region grown by `margin` on every side, clamped to the image.
pub fn crop_with_margin(image: &DynamicImage, m: &TemplateMatch, margin: u32) -> DynamicImage {
    let left = m.x.saturating_sub(margin).min(image.width());
    let top = m.y.saturating_sub(margin).min(image.height());
    let right = m.x.saturating_add(m.width).saturating_add(margin).min(image.width());
    let bottom = m.y.saturating_add(m.height).saturating_add(margin).min(image.height());
    image.crop_imm(left, top, right - left, bottom - top)
}

/// Load the template image `name` (a `.png` suffix is added when missing).
///
/// Search order:
/// 1. `PROMPTPILOT_ASSETS_DIR` env var (if set)
/// 2. Relative to CWD (`./assets/...`)
/// 3. Relative to the binary's `../share/promptpilot/`
pub fn load_template(name: &str) -> Result<DynamicImage> {
    let base = name.trim().to_lowercase().replace(' ', "_");
    let filename = if base.ends_with(".png") {
        base
    } else {
        format!("{base}.png")
    };

    let env_assets = std::env::var("PROMPTPILOT_ASSETS_DIR").ok().map(PathBuf::from);
    let bin_share = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent()?.parent().map(|p| p.join("share/promptpilot")));

    let candidates: Vec<PathBuf> = [
        env_assets.map(|d| d.join(&filename)),
        Some(PathBuf::from("assets").join(&filename)),
        bin_share.map(|d| d.join("assets").join(&filename)),
    ]
    .into_iter()
    .flatten()
    .collect();

    for path in &candidates {
        if !path.exists() {
            continue;
        }
        match image::open(path) {
            Ok(img) => {
                tracing::info!("loaded template image: {}", path.display());
                return Ok(img);
            }
            Err(e) => tracing::warn!("failed to decode {}: {e}", path.display()),
        }
    }

    anyhow::bail!("template {filename} not found in any search path")
}
