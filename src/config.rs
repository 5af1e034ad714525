//! Configuration types for the assistant.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Top-level configuration for the assistant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    /// Turn-taking behaviour (continuous mode, settle delay).
    pub turn: TurnConfig,
    /// Utterance filter heuristics.
    pub filter: FilterConfig,
    /// Speech output queue settings.
    pub queue: QueueConfig,
    /// Listening watchdog timing.
    pub watchdog: WatchdogConfig,
    /// Scene query behaviour (timeout).
    pub query: QueryConfig,
    /// Scene-understanding HTTP service.
    pub scene: SceneConfig,
    /// Camera frame source.
    pub camera: CameraConfig,
    /// Fixed phrases the assistant speaks on its own.
    pub messages: MessagesConfig,
    /// Console speech ports used by the `lookout` binary.
    pub console: ConsoleConfig,
}

/// Turn controller configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnConfig {
    /// Start listening on launch and resume after every answer.
    pub continuous: bool,
    /// Pause between the end of playback and reopening the microphone (ms).
    ///
    /// Keeps the playback tail from being captured as input.
    pub settle_delay_ms: u64,
    /// Consecutive no-input errors tolerated silently before a spoken prompt.
    ///
    /// Set to 0 to never prompt.
    pub no_input_prompt_after: u32,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            continuous: true,
            settle_delay_ms: 1_500,
            no_input_prompt_after: 2,
        }
    }
}

impl TurnConfig {
    /// Settle delay as a [`Duration`].
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

/// Utterance filter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Transcripts with at least this many words are always accepted.
    pub min_words: usize,
    /// Minimum words for a transcript that contains a keyword.
    pub keyword_min_words: usize,
    /// Interrogatives and action verbs that mark a genuine request.
    pub keywords: Vec<String>,
    /// Fragments of the assistant's own voice that keep leaking into the mic.
    pub echo_phrases: Vec<String>,
    /// Phrases that ask for a scene description rather than a specific answer.
    pub describe_phrases: Vec<String>,
    /// How many recently spoken outputs are remembered for echo detection.
    pub recent_output_memory: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        let words = |list: &[&str]| list.iter().map(|s| (*s).to_owned()).collect();
        Self {
            min_words: 4,
            keyword_min_words: 2,
            keywords: words(&[
                "what", "where", "who", "which", "how", "when", "why", "is", "are", "can", "does",
                "find", "help", "see", "look", "read", "describe", "tell", "show", "identify",
            ]),
            echo_phrases: words(&[
                "i'm listening",
                "let me take a look",
                "sorry i couldn't",
                "camera is not ready",
                "i didn't catch that",
            ]),
            describe_phrases: words(&[
                "what do you see",
                "what can you see",
                "describe",
                "what's in front",
                "what is in front",
                "look around",
                "what's around",
                "what is around",
            ]),
            recent_output_memory: 3,
        }
    }
}

/// Speech output queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum pending responses; a full queue is cleared before the next enqueue.
    pub max_depth: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { max_depth: 2 }
    }
}

/// Listening watchdog configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// How often to verify that speech input is still running (ms).
    pub interval_ms: u64,
    /// Delay before retrying a failed restart (ms).
    pub retry_backoff_ms: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            interval_ms: 20_000,
            retry_backoff_ms: 2_000,
        }
    }
}

/// Scene query configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Upper bound on a single scene query (ms). Set to 0 to disable.
    pub timeout_ms: u64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self { timeout_ms: 20_000 }
    }
}

impl QueryConfig {
    /// Query timeout, or `None` when disabled.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}

/// Scene-understanding service configuration (OpenAI-compatible vision API).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    /// Base URL of the API, without the `/chat/completions` suffix.
    pub api_url: String,
    /// Vision-capable model name.
    pub model: String,
    /// API key. Falls back to the `LOOKOUT_API_KEY` environment variable when empty.
    pub api_key: String,
    /// Maximum tokens in a reply. Replies are spoken, so keep this short.
    pub max_tokens: u32,
    /// System prompt sent with every query.
    pub system_prompt: String,
    /// User prompt used for scene descriptions.
    pub describe_prompt: String,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1".to_owned(),
            model: "gpt-4o-mini".to_owned(),
            api_key: String::new(),
            max_tokens: 150,
            system_prompt: "You are the eyes of a blind or visually impaired person. \
                Answer in one or two short spoken sentences. Mention obstacles, people \
                and text that matter for moving around safely. Never use markdown."
                .to_owned(),
            describe_prompt: "Describe what is in front of me.".to_owned(),
        }
    }
}

impl SceneConfig {
    /// The configured API key, or the `LOOKOUT_API_KEY` environment variable.
    pub fn effective_api_key(&self) -> Option<String> {
        if !self.api_key.trim().is_empty() {
            return Some(self.api_key.trim().to_owned());
        }
        std::env::var("LOOKOUT_API_KEY")
            .ok()
            .map(|k| k.trim().to_owned())
            .filter(|k| !k.is_empty())
    }
}

/// Camera frame source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Image file holding the most recent camera frame.
    pub frame_path: Option<PathBuf>,
    /// Frames larger than this (either side, pixels) are downscaled before upload.
    pub max_dimension: u32,
    /// JPEG quality for re-encoded frames (1-100).
    pub jpeg_quality: u8,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            frame_path: None,
            max_dimension: 1024,
            jpeg_quality: 80,
        }
    }
}

/// Phrases the assistant speaks without asking the scene service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagesConfig {
    /// Spoken when no camera frame is available.
    pub camera_not_ready: String,
    /// Spoken when the scene query fails or times out.
    pub query_failed: String,
    /// Spoken after repeated no-input errors.
    pub no_input_prompt: String,
    /// Spoken once when microphone permission is denied.
    pub input_permission_denied: String,
    /// Spoken once when speech recognition is unsupported.
    pub input_unsupported: String,
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            camera_not_ready: "The camera is not ready yet. Please try again in a moment."
                .to_owned(),
            query_failed: "Sorry, I couldn't get an answer right now.".to_owned(),
            no_input_prompt: "I didn't catch that. Ask me what you'd like to know.".to_owned(),
            input_permission_denied:
                "I can't use the microphone. Please allow microphone access, then start me again."
                    .to_owned(),
            input_unsupported: "Speech recognition isn't available on this device.".to_owned(),
        }
    }
}

/// Console speech ports used by the `lookout` binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Simulated playback speed.
    pub ms_per_word: u64,
    /// Silently end a listening session after this many seconds without a
    /// result, the way browser recognition does. Set to 0 to disable.
    pub input_session_secs: u64,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            ms_per_word: 250,
            input_session_secs: 0,
        }
    }
}

impl AssistantConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)
            .map_err(|e| crate::error::AssistantError::Config(e.to_string()))?;
        config.clamp_to_safe_ranges();
        Ok(config)
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::AssistantError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/lookout/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("lookout").join("config.toml")
        } else if let Some(config) = dirs::config_dir() {
            config.join("lookout").join("config.toml")
        } else {
            PathBuf::from("/tmp/lookout-config/config.toml")
        }
    }

    /// Replace values that would wedge the controller with the nearest usable ones.
    pub fn clamp_to_safe_ranges(&mut self) {
        if self.queue.max_depth == 0 {
            warn!("queue.max_depth = 0 would drop every response; using 1");
            self.queue.max_depth = 1;
        }
        if self.watchdog.interval_ms == 0 {
            let fallback = WatchdogConfig::default().interval_ms;
            warn!("watchdog.interval_ms = 0 is not a valid period; using {fallback}");
            self.watchdog.interval_ms = fallback;
        }
        if self.watchdog.retry_backoff_ms == 0 {
            let fallback = WatchdogConfig::default().retry_backoff_ms;
            warn!("watchdog.retry_backoff_ms = 0 allows a tight restart loop; using {fallback}");
            self.watchdog.retry_backoff_ms = fallback;
        }
        if self.filter.keyword_min_words == 0 {
            self.filter.keyword_min_words = 1;
        }
        self.camera.jpeg_quality = self.camera.jpeg_quality.clamp(1, 100);
    }
}
