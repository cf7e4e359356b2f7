use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use rand::Rng;
use tokio::time::{Duration, sleep};

use crate::bridge::{Adb, DeviceBridge};
use crate::config::Config;
use crate::finder::{FindOutcome, FinderSettings, find_target};
use crate::history::History;
use crate::llm::{LlmGenerator, LlmJudge, MessageGenerator, OllamaClient, SuitabilityPredicate};
use crate::ocr::{Tesseract, TextRecognizer};
use crate::profile::{read_profile, scroll_to_top};
use crate::resolver::TargetResolver;
use crate::rules::{Rule, load_rules, match_rules};
use crate::sender::Sender;
use crate::snapshot::{DeviceSampler, Sampler};
use crate::state::{AppState, BotPhase, InteractionRecord, Outcome};
use crate::uidump::UiTree;

/// Everything needed to work through one profile after another.
pub struct Bot {
    config: Config,
    bridge: Arc<dyn DeviceBridge>,
    recognizer: Arc<dyn TextRecognizer>,
    predicate: Arc<dyn SuitabilityPredicate>,
    generator: Option<Arc<dyn MessageGenerator>>,
    rules: Vec<Rule>,
    resolver: TargetResolver,
    history: Option<Arc<History>>,
    sampler: Option<Arc<dyn Sampler>>,
}

impl Bot {
    /// A bot with the configured resolver, no generator, no rules and no history.
    pub fn new(
        config: Config,
        bridge: Arc<dyn DeviceBridge>,
        recognizer: Arc<dyn TextRecognizer>,
        predicate: Arc<dyn SuitabilityPredicate>,
    ) -> Self {
        let resolver = TargetResolver::from_config(&config.resolver, recognizer.clone());
        Self {
            config,
            bridge,
            recognizer,
            predicate,
            generator: None,
            rules: Vec::new(),
            resolver,
            history: None,
            sampler: None,
        }
    }

    /// Wire up the real device, OCR and language model from `config`.
    pub fn from_config(config: Config) -> Result<Self> {
        let bridge: Arc<dyn DeviceBridge> = Arc::new(Adb::from_config(&config));
        let recognizer: Arc<dyn TextRecognizer> = Arc::new(Tesseract::new(&config.tesseract_path));

        let ollama = Arc::new(
            OllamaClient::from_config(&config.llm).context("failed to set up language model client")?,
        );
        let predicate = Arc::new(LlmJudge::new(ollama.clone(), &config.llm.judge_model));
        let generator = config.llm.generation_enabled.then(|| {
            Arc::new(LlmGenerator::new(ollama.clone(), &config.llm)) as Arc<dyn MessageGenerator>
        });

        let rules = match &config.rules_file {
            Some(path) => load_rules(path)?,
            None => Vec::new(),
        };
        let history = config
            .history_dir
            .as_ref()
            .map(History::open)
            .transpose()?
            .map(Arc::new);

        let mut bot = Self::new(config, bridge, recognizer, predicate).with_rules(rules);
        bot.generator = generator;
        bot.history = history;
        Ok(bot)
    }

    pub fn with_generator(mut self, generator: Arc<dyn MessageGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn with_rules(mut self, rules: Vec<Rule>) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_resolver(mut self, resolver: TargetResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_history(mut self, history: Arc<History>) -> Self {
        self.history = Some(history);
        self
    }

    /// Replace the device sampler (the bridge is still used for taps and dumps).
    pub fn with_sampler(mut self, sampler: Arc<dyn Sampler>) -> Self {
        self.sampler = Some(sampler);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn bridge(&self) -> &Arc<dyn DeviceBridge> {
        &self.bridge
    }

    fn sampler(&self) -> Arc<dyn Sampler> {
        match &self.sampler {
            Some(sampler) => sampler.clone(),
            None => Arc::new(DeviceSampler::new(
                self.bridge.clone(),
                self.resolver.snapshot_kind(),
                self.history.clone(),
            )),
        }
    }

    fn settle(&self) -> Duration {
        Duration::from_millis(self.config.settle_delay_ms)
    }

    /// Handle the profile currently on screen: read it, pick a message, find
    /// the matching reply target and send, or skip the profile.
    pub async fn process_profile(&self) -> InteractionRecord {
        let started = Instant::now();
        let (profile, dump) = self.current_profile().await;

        let mut record = InteractionRecord {
            profile: profile.clone(),
            outcome: Outcome::AlreadySeen,
            message: None,
            context: None,
            target: None,
            at: Utc::now(),
            duration_secs: 0.0,
        };

        match &profile {
            Some(name) => tracing::info!("processing profile {name:?}"),
            None => tracing::warn!("profile name not found, processing anyway"),
        }

        if let (Some(name), Some(history)) = (&profile, &self.history)
            && history.has_interacted(name)
        {
            tracing::info!("already interacted with {name:?}, skipping");
            self.skip_profile().await;
            record.duration_secs = started.elapsed().as_secs_f64();
            return record;
        }

        let outcome = self.work_profile(profile.as_deref(), &mut record).await;
        record.outcome = outcome;
        if record.outcome == Outcome::Sent
            && let (Some(history), Some(name), Some(xml)) = (&self.history, &profile, &dump)
        {
            history.save_match_dump(name, xml);
        }

        record.duration_secs = started.elapsed().as_secs_f64();
        if let Some(history) = &self.history {
            if let Some(name) = &profile {
                history.log_interaction(name);
            }
            history.append_record(&record);
        }
        record
    }

    async fn work_profile(&self, profile: Option<&str>, record: &mut InteractionRecord) -> Outcome {
        let sampler = self.sampler();
        let settle = self.settle();

        let bio_settings = FinderSettings {
            max_cycles: self.config.bio_max_scrolls.max(1),
            ..FinderSettings::from_config(&self.config)
        };
        let bio = match read_profile(
            sampler.as_ref(),
            self.bridge.as_ref(),
            self.recognizer.as_ref(),
            &bio_settings,
        )
        .await
        {
            Ok(bio) => bio,
            Err(e) => {
                tracing::warn!("could not read profile: {e:#}");
                String::new()
            }
        };
        tracing::debug!("profile text: {bio:?}");
        scroll_to_top(
            self.bridge.as_ref(),
            &self.config.swipe,
            self.config.scroll_to_top_swipes,
            settle,
        )
        .await;

        let Some(message) = self.choose_message(&bio, profile).await else {
            tracing::info!("no suitable message, skipping profile");
            self.skip_profile().await;
            return Outcome::NoMessage;
        };
        record.message = Some(message.clone());

        let outcome = find_target(
            sampler.as_ref(),
            self.bridge.as_ref(),
            &self.resolver,
            self.predicate.as_ref(),
            &message,
            &FinderSettings::from_config(&self.config),
        )
        .await;

        let resolution = match outcome {
            FindOutcome::Found { resolution, .. } => resolution,
            FindOutcome::NotFound { reason, .. } => {
                tracing::info!("no reply target ({reason}), skipping profile");
                self.skip_profile().await;
                return Outcome::TargetNotFound;
            }
        };
        record.context = Some(resolution.context.clone());
        record.target = Some(resolution.point);

        let point = resolution.point;
        if let Err(e) = self.bridge.tap(point.x, point.y).await {
            tracing::error!("failed to tap reply target: {e}");
            self.skip_profile().await;
            return Outcome::SendFailed;
        }
        sleep(settle).await;

        let sender = Sender::new(self.bridge.clone(), settle, self.config.cancel_fallback);
        match sender.send(&message).await {
            Ok(()) => {
                if let Some(history) = &self.history {
                    history.save_message(profile.unwrap_or("unknown"), &message);
                }
                Outcome::Sent
            }
            Err(_) => {
                self.skip_profile().await;
                Outcome::SendFailed
            }
        }
    }

    /// Name of the profile on screen, plus the dump it came from.
    async fn current_profile(&self) -> (Option<String>, Option<String>) {
        let xml = match self.bridge.dump_tree().await {
            Ok(xml) => xml,
            Err(e) => {
                tracing::warn!("failed to dump profile: {e}");
                return (None, None);
            }
        };
        let name = match UiTree::parse(&xml) {
            Ok(tree) => tree.profile_name().map(str::to_string),
            Err(e) => {
                tracing::warn!("failed to parse profile dump: {e}");
                None
            }
        };
        (name, Some(xml))
    }

    /// Generated message if generation is on and succeeds, otherwise the
    /// first matching rule.
    async fn choose_message(&self, bio: &str, profile: Option<&str>) -> Option<String> {
        if let Some(generator) = &self.generator
            && !bio.trim().is_empty()
        {
            if let Some(message) = generator.generate(bio).await {
                return Some(message);
            }
            tracing::warn!("generation failed, falling back to rules");
        }

        match_rules(&self.rules, bio, profile).map(str::to_string)
    }

    /// Tap the profile's Skip button. Returns whether one was tapped.
    pub async fn skip_profile(&self) -> bool {
        let skip = match self.bridge.dump_tree().await {
            Ok(xml) => match UiTree::parse(&xml) {
                Ok(tree) => tree.skip_button().map(|e| e.center()),
                Err(e) => {
                    tracing::warn!("failed to parse dump while skipping: {e}");
                    None
                }
            },
            Err(e) => {
                tracing::warn!("failed to dump while skipping: {e}");
                None
            }
        };

        let Some(point) = skip else {
            tracing::warn!("skip button not found");
            return false;
        };
        tracing::info!("skipping profile via {point}");
        if let Err(e) = self.bridge.tap(point.x, point.y).await {
            tracing::warn!("failed to tap skip: {e}");
            return false;
        }
        sleep(self.settle()).await;
        true
    }
}

/// Check whether the bot should keep going. Blocks while paused.
async fn check_should_continue(state: &AppState) -> bool {
    loop {
        let (phase, notify) = {
            let s = state.lock().await;
            (s.phase, s.pause_notify.clone())
        };
        match phase {
            BotPhase::Running => return true,
            BotPhase::Paused => {
                tracing::info!("bot paused, waiting for resume");
                notify.notified().await;
            }
            BotPhase::Idle => return false,
        }
    }
}

pub async fn run_session(state: AppState, bot: Arc<Bot>) -> Result<()> {
    let config = bot.config().clone();
    {
        let mut s = state.lock().await;
        s.phase = BotPhase::Running;
        s.profiles_processed = 0;
    }

    tracing::info!(
        "starting session, strategy {:?}, max profiles {:?}",
        config.resolver.strategy,
        config.max_profiles
    );

    loop {
        if !check_should_continue(&state).await {
            tracing::info!("bot stopped");
            return Ok(());
        }

        let processed = state.lock().await.profiles_processed;
        if let Some(max) = config.max_profiles
            && processed >= max
        {
            tracing::info!("processed {processed} profile(s), session complete");
            let mut s = state.lock().await;
            s.phase = BotPhase::Idle;
            s.current_profile = None;
            return Ok(());
        }

        let record = bot.process_profile().await;
        tracing::info!(
            "profile {:?}: {:?} in {:.1}s",
            record.profile,
            record.outcome,
            record.duration_secs
        );
        {
            let mut s = state.lock().await;
            s.current_profile = record.profile.clone();
            s.record(record);
        }

        let wait = rand::thread_rng().gen_range(
            config.between_profiles_min_secs..=config.between_profiles_max_secs,
        );
        tracing::info!("waiting {wait:.1}s before next profile");
        sleep(Duration::from_secs_f64(wait)).await;
    }
}
