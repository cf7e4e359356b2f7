use std::fmt::Display;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    MissingEnv(String),

    #[error("invalid value for {name}: {value:?} ({reason})")]
    Invalid {
        name: String,
        value: String,
        reason: String,
    },
}

/// How the target resolver looks for the reply button.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Parse the uiautomator dump and filter nodes by class and description.
    Structural,
    /// Template-match a reference image against the screenshot.
    Visual,
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "structural" | "tree" | "dump" => Ok(Strategy::Structural),
            "visual" | "image" | "template" => Ok(Strategy::Visual),
            other => Err(format!("unknown strategy '{other}', expected structural or visual")),
        }
    }
}

/// Swipe gesture in device pixels. The default scrolls one screen down on a
/// 1080-wide emulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwipeConfig {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
    pub duration_ms: u32,
}

impl Default for SwipeConfig {
    fn default() -> Self {
        Self {
            x1: 500,
            y1: 1500,
            x2: 500,
            y2: 800,
            duration_ms: 300,
        }
    }
}

impl SwipeConfig {
    /// The same gesture in the opposite direction (used to get back to the top).
    pub fn reversed(&self) -> Self {
        Self {
            x1: self.x2,
            y1: self.y2,
            x2: self.x1,
            y2: self.y1,
            duration_ms: self.duration_ms,
        }
    }
}

impl FromStr for SwipeConfig {
    type Err = String;

    /// Parses `x1,y1,x2,y2,duration_ms`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s
            .split(',')
            .map(|p| p.trim().parse::<u32>().map_err(|e| format!("{p}: {e}")))
            .collect::<Result<Vec<_>, _>>()?;

        match parts.as_slice() {
            &[x1, y1, x2, y2, duration_ms] => Ok(Self {
                x1,
                y1,
                x2,
                y2,
                duration_ms,
            }),
            _ => Err(format!("expected 5 comma-separated numbers, got {}", parts.len())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvergenceConfig {
    /// Consecutive identical samples after which the page is considered exhausted.
    pub repeat_threshold: u32,
    /// Extra scrolls issued once the threshold is reached, to ride out rendering lag.
    pub extra_confirmations: u32,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            repeat_threshold: 2,
            extra_confirmations: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub strategy: Strategy,
    /// Required class of a structural candidate (e.g. `android.widget.Button`).
    pub button_class: String,
    /// Substring the candidate's content description must contain.
    pub button_desc: String,
    /// Max vertical gap (px) between a candidate and the text it answers.
    pub context_distance: u32,
    /// Minimum template-match confidence for the visual strategy.
    pub match_threshold: f32,
    /// Margin (px) cropped around a visual match for text recognition.
    pub crop_margin: u32,
    /// Template image name, looked up in the assets directories.
    pub template_name: String,
    /// Downscale factor applied to screenshot and template before matching.
    pub match_scale_down: u32,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::Structural,
            button_class: "android.widget.Button".into(),
            button_desc: "Like".into(),
            context_distance: 300,
            match_threshold: 0.45,
            crop_margin: 100,
            template_name: "like_button".into(),
            match_scale_down: 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub url: String,
    /// Model used for the yes/no suitability judgement.
    pub judge_model: String,
    pub timeout_secs: u64,
    pub generation_enabled: bool,
    pub generation_model: String,
    pub temperature: f32,
    pub max_retries: u32,
    /// Persona and tone woven into the generation prompt.
    pub personality: String,
    pub style: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:11434/api/generate".into(),
            judge_model: "mistral".into(),
            timeout_secs: 10,
            generation_enabled: false,
            generation_model: "llama3.1:8b-instruct-q4_0".into(),
            temperature: 0.2,
            max_retries: 3,
            personality: "friendly".into(),
            style: "playful".into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub auth_token: String,
    pub listen_addr: String,
    pub adb_path: String,
    /// `adb -s` serial; unset means the single attached device.
    pub device_serial: Option<String>,
    pub tesseract_path: String,
    pub resolver: ResolverConfig,
    pub convergence: ConvergenceConfig,
    /// Sampling cycles allowed while looking for the reply button.
    pub max_scrolls: u32,
    /// Sampling cycles allowed while reading a profile.
    pub bio_max_scrolls: u32,
    pub scroll_to_top_swipes: u32,
    pub swipe: SwipeConfig,
    /// Delay after each swipe/tap before the next capture.
    pub settle_delay_ms: u64,
    pub llm: LlmConfig,
    pub rules_file: Option<String>,
    pub history_dir: Option<String>,
    /// Tap the dialog's Cancel button when sending fails.
    pub cancel_fallback: bool,
    pub between_profiles_min_secs: f64,
    pub between_profiles_max_secs: f64,
    pub max_profiles: Option<u32>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let auth_token = lookup("PROMPTPILOT_AUTH_TOKEN")
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ConfigError::MissingEnv("PROMPTPILOT_AUTH_TOKEN".into()))?;

        let listen_addr =
            lookup("PROMPTPILOT_LISTEN_ADDR").unwrap_or_else(|| "127.0.0.1:8091".into());
        let adb_path = lookup("PROMPTPILOT_ADB_PATH").unwrap_or_else(|| "adb".into());
        let device_serial = lookup("PROMPTPILOT_DEVICE_SERIAL").filter(|s| !s.is_empty());
        let tesseract_path =
            lookup("PROMPTPILOT_TESSERACT_PATH").unwrap_or_else(|| "tesseract".into());

        let defaults = ResolverConfig::default();
        let resolver = ResolverConfig {
            strategy: parsed(&lookup, "PROMPTPILOT_STRATEGY", defaults.strategy)?,
            button_class: lookup("PROMPTPILOT_BUTTON_CLASS").unwrap_or(defaults.button_class),
            button_desc: lookup("PROMPTPILOT_BUTTON_DESC").unwrap_or(defaults.button_desc),
            context_distance: parsed(
                &lookup,
                "PROMPTPILOT_CONTEXT_DISTANCE",
                defaults.context_distance,
            )?,
            match_threshold: parsed(&lookup, "PROMPTPILOT_MATCH_THRESHOLD", defaults.match_threshold)?,
            crop_margin: parsed(&lookup, "PROMPTPILOT_CROP_MARGIN", defaults.crop_margin)?,
            template_name: lookup("PROMPTPILOT_TEMPLATE").unwrap_or(defaults.template_name),
            match_scale_down: parsed(
                &lookup,
                "PROMPTPILOT_MATCH_SCALE_DOWN",
                defaults.match_scale_down,
            )?,
        };
        if resolver.match_scale_down == 0 {
            return Err(invalid("PROMPTPILOT_MATCH_SCALE_DOWN", 0, "must be at least 1"));
        }
        if !(resolver.match_threshold > 0.0 && resolver.match_threshold <= 1.0) {
            return Err(invalid(
                "PROMPTPILOT_MATCH_THRESHOLD",
                resolver.match_threshold,
                "must be in (0, 1]",
            ));
        }

        let defaults = ConvergenceConfig::default();
        let convergence = ConvergenceConfig {
            repeat_threshold: parsed(&lookup, "PROMPTPILOT_REPEAT_THRESHOLD", defaults.repeat_threshold)?,
            extra_confirmations: parsed(
                &lookup,
                "PROMPTPILOT_EXTRA_CONFIRMATIONS",
                defaults.extra_confirmations,
            )?,
        };
        if convergence.repeat_threshold == 0 {
            return Err(invalid("PROMPTPILOT_REPEAT_THRESHOLD", 0, "must be at least 1"));
        }

        let max_scrolls: u32 = parsed(&lookup, "PROMPTPILOT_MAX_SCROLLS", 15)?;
        if max_scrolls == 0 {
            return Err(invalid("PROMPTPILOT_MAX_SCROLLS", 0, "must be at least 1"));
        }
        let bio_max_scrolls = parsed(&lookup, "PROMPTPILOT_BIO_MAX_SCROLLS", 7)?;
        let scroll_to_top_swipes = parsed(&lookup, "PROMPTPILOT_SCROLL_TO_TOP_SWIPES", 8)?;
        let swipe = parsed(&lookup, "PROMPTPILOT_SWIPE", SwipeConfig::default())?;
        let settle_delay_ms = parsed(&lookup, "PROMPTPILOT_SETTLE_DELAY_MS", 1500)?;

        let defaults = LlmConfig::default();
        let llm = LlmConfig {
            url: lookup("PROMPTPILOT_OLLAMA_URL").unwrap_or(defaults.url),
            judge_model: lookup("PROMPTPILOT_JUDGE_MODEL").unwrap_or(defaults.judge_model),
            timeout_secs: parsed(&lookup, "PROMPTPILOT_LLM_TIMEOUT_SECS", defaults.timeout_secs)?,
            generation_enabled: flag(&lookup, "PROMPTPILOT_GENERATION_ENABLED"),
            generation_model: lookup("PROMPTPILOT_GENERATION_MODEL")
                .unwrap_or(defaults.generation_model),
            temperature: parsed(&lookup, "PROMPTPILOT_TEMPERATURE", defaults.temperature)?,
            max_retries: parsed(&lookup, "PROMPTPILOT_MAX_RETRIES", defaults.max_retries)?,
            personality: lookup("PROMPTPILOT_PERSONALITY").unwrap_or(defaults.personality),
            style: lookup("PROMPTPILOT_STYLE").unwrap_or(defaults.style),
        };

        let between_profiles_min_secs: f64 = parsed(&lookup, "PROMPTPILOT_BETWEEN_MIN_SECS", 15.0)?;
        let between_profiles_max_secs: f64 = parsed(&lookup, "PROMPTPILOT_BETWEEN_MAX_SECS", 30.0)?;
        if !(between_profiles_min_secs.is_finite() && between_profiles_min_secs >= 0.0) {
            return Err(invalid(
                "PROMPTPILOT_BETWEEN_MIN_SECS",
                between_profiles_min_secs,
                "must be a finite number >= 0",
            ));
        }
        if !(between_profiles_max_secs.is_finite()
            && between_profiles_max_secs >= between_profiles_min_secs)
        {
            return Err(invalid(
                "PROMPTPILOT_BETWEEN_MAX_SECS",
                between_profiles_max_secs,
                "must be finite and >= PROMPTPILOT_BETWEEN_MIN_SECS",
            ));
        }

        let max_profiles = match lookup("PROMPTPILOT_MAX_PROFILES") {
            Some(v) => Some(
                v.trim()
                    .parse::<u32>()
                    .map_err(|e| invalid("PROMPTPILOT_MAX_PROFILES", &v, e))?,
            ),
            None => None,
        };

        Ok(Config {
            auth_token,
            listen_addr,
            adb_path,
            device_serial,
            tesseract_path,
            resolver,
            convergence,
            max_scrolls,
            bio_max_scrolls,
            scroll_to_top_swipes,
            swipe,
            settle_delay_ms,
            llm,
            rules_file: lookup("PROMPTPILOT_RULES_FILE").filter(|s| !s.is_empty()),
            history_dir: lookup("PROMPTPILOT_HISTORY_DIR").filter(|s| !s.is_empty()),
            cancel_fallback: lookup("PROMPTPILOT_CANCEL_FALLBACK")
                .map(|v| is_truthy(&v))
                .unwrap_or(true),
            between_profiles_min_secs,
            between_profiles_max_secs,
            max_profiles,
        })
    }
}

fn parsed<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(name) {
        Some(v) => v.trim().parse::<T>().map_err(|e| invalid(name, &v, e)),
        None => Ok(default),
    }
}

fn flag(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> bool {
    lookup(name).map(|v| is_truthy(&v)).unwrap_or(false)
}

fn is_truthy(v: &str) -> bool {
    v == "1" || v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes")
}

fn invalid(name: &str, value: impl Display, reason: impl Display) -> ConfigError {
    ConfigError::Invalid {
        name: name.into(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[("PROMPTPILOT_AUTH_TOKEN", "secret")]).unwrap();
        assert_eq!(config.resolver.strategy, Strategy::Structural);
        assert_eq!(config.resolver.context_distance, 300);
        assert_eq!(config.resolver.crop_margin, 100);
        assert!((config.resolver.match_threshold - 0.45).abs() < f32::EPSILON);
        assert_eq!(config.convergence, ConvergenceConfig::default());
        assert_eq!(config.max_scrolls, 15);
        assert_eq!(config.swipe, SwipeConfig::default());
        assert!(config.cancel_fallback);
        assert!(!config.llm.generation_enabled);
        assert_eq!(config.max_profiles, None);
    }

    #[test]
    fn test_missing_auth_token() {
        let err = config_from(&[]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnv(ref name) if name == "PROMPTPILOT_AUTH_TOKEN"));
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("PROMPTPILOT_AUTH_TOKEN", "secret"),
            ("PROMPTPILOT_STRATEGY", "visual"),
            ("PROMPTPILOT_REPEAT_THRESHOLD", "3"),
            ("PROMPTPILOT_EXTRA_CONFIRMATIONS", "0"),
            ("PROMPTPILOT_SWIPE", "540, 1600, 540, 400, 500"),
            ("PROMPTPILOT_GENERATION_ENABLED", "true"),
            ("PROMPTPILOT_MAX_PROFILES", "4"),
            ("PROMPTPILOT_DEVICE_SERIAL", "emulator-5554"),
        ])
        .unwrap();
        assert_eq!(config.resolver.strategy, Strategy::Visual);
        assert_eq!(config.convergence.repeat_threshold, 3);
        assert_eq!(config.convergence.extra_confirmations, 0);
        assert_eq!(
            config.swipe,
            SwipeConfig {
                x1: 540,
                y1: 1600,
                x2: 540,
                y2: 400,
                duration_ms: 500
            }
        );
        assert!(config.llm.generation_enabled);
        assert_eq!(config.max_profiles, Some(4));
        assert_eq!(config.device_serial.as_deref(), Some("emulator-5554"));
    }

    #[test]
    fn test_invalid_values() {
        let err = config_from(&[
            ("PROMPTPILOT_AUTH_TOKEN", "secret"),
            ("PROMPTPILOT_STRATEGY", "telepathy"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref name, .. } if name == "PROMPTPILOT_STRATEGY"));

        let err = config_from(&[
            ("PROMPTPILOT_AUTH_TOKEN", "secret"),
            ("PROMPTPILOT_REPEAT_THRESHOLD", "0"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));

        let err = config_from(&[
            ("PROMPTPILOT_AUTH_TOKEN", "secret"),
            ("PROMPTPILOT_SWIPE", "1,2,3"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));

        let err = config_from(&[
            ("PROMPTPILOT_AUTH_TOKEN", "secret"),
            ("PROMPTPILOT_BETWEEN_MIN_SECS", "10"),
            ("PROMPTPILOT_BETWEEN_MAX_SECS", "5"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_between_profiles_must_be_finite() {
        for (min, max) in [("15", "inf"), ("NaN", "30"), ("NaN", "NaN"), ("-inf", "5")] {
            let err = config_from(&[
                ("PROMPTPILOT_AUTH_TOKEN", "secret"),
                ("PROMPTPILOT_BETWEEN_MIN_SECS", min),
                ("PROMPTPILOT_BETWEEN_MAX_SECS", max),
            ])
            .unwrap_err();
            assert!(matches!(err, ConfigError::Invalid { .. }), "{min}..={max}");
        }

        let config = config_from(&[
            ("PROMPTPILOT_AUTH_TOKEN", "secret"),
            ("PROMPTPILOT_BETWEEN_MIN_SECS", "2.5"),
            ("PROMPTPILOT_BETWEEN_MAX_SECS", "2.5"),
        ])
        .unwrap();
        assert_eq!(config.between_profiles_max_secs, 2.5);
    }

    #[test]
    fn test_swipe_reversed() {
        let swipe = SwipeConfig::default().reversed();
        assert_eq!((swipe.y1, swipe.y2), (800, 1500));
    }
}
