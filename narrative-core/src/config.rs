//! Engine and oracle configuration.

use std::time::Duration;

/// Default model for the narrator oracle.
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// The character the engine performs.
#[derive(Debug, Clone)]
pub struct Persona {
    pub name: String,
    pub persona: String,
    pub speech_style: String,
}

impl Default for Persona {
    fn default() -> Self {
        Self {
            name: "Sable".to_string(),
            persona: "A night-shift archivist in a half-flooded city library who answers \
                      letters nobody else will. Warm but guarded, she keeps a secret about \
                      where she came from and why she stays."
                .to_string(),
            speech_style: "Short, deliberate sentences. Dry humour. Notices small details \
                           and leaves some questions unanswered."
                .to_string(),
        }
    }
}

/// Configuration for the turn pipeline.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Run the event predictor on turns that are a multiple of this.
    pub prediction_interval: u32,

    /// Background predictions allowed in flight per session.
    pub max_background_predictions: usize,

    /// History entries shown to the perception stage.
    pub perception_history: usize,

    /// History entries shown to the director stage.
    pub director_history: usize,

    /// History entries shown to the performance stage.
    pub performance_history: usize,

    /// History entries shown to the predictor.
    pub predictor_history: usize,

    /// The performed character.
    pub persona: Persona,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            prediction_interval: 5,
            max_background_predictions: 1,
            perception_history: 6,
            director_history: 6,
            performance_history: 8,
            predictor_history: 4,
            persona: Persona::default(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the prediction cadence. Zero disables prediction.
    pub fn with_prediction_interval(mut self, interval: u32) -> Self {
        self.prediction_interval = interval;
        self
    }

    pub fn with_max_background_predictions(mut self, max: usize) -> Self {
        self.max_background_predictions = max.max(1);
        self
    }

    pub fn with_persona(mut self, persona: Persona) -> Self {
        self.persona = persona;
        self
    }

    /// Whether the turn numbered `turn` (before its increment) schedules a
    /// background prediction.
    pub fn prediction_due(&self, turn: u32) -> bool {
        self.prediction_interval != 0 && turn % self.prediction_interval == 0
    }
}

/// Configuration for the Claude-backed oracle.
#[derive(Debug, Clone)]
pub struct OracleConfig {
    pub api_key: String,

    /// Anthropic-compatible endpoint root; `None` for the default.
    pub base_url: Option<String>,

    pub model: String,

    pub max_tokens: usize,

    pub temperature: Option<f32>,

    /// Upper bound on a single oracle call.
    pub timeout: Duration,
}

impl OracleConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 1024,
            temperature: None,
            timeout: Duration::from_secs(60),
        }
    }

    /// Read the oracle configuration from the environment.
    ///
    /// `ANTHROPIC_API_KEY` is required; `ANTHROPIC_BASE_URL`,
    /// `NARRATIVE_MODEL` and `NARRATIVE_ORACLE_TIMEOUT_SECS` are optional.
    pub fn from_env() -> Result<Self, claude::Error> {
        let api_key = std::env::var("ANTHROPIC_API_KEY").map_err(|_| claude::Error::NoApiKey)?;
        let mut config = Self::new(api_key);

        if let Ok(url) = std::env::var("ANTHROPIC_BASE_URL") {
            if !url.trim().is_empty() {
                config.base_url = Some(url);
            }
        }
        if let Ok(model) = std::env::var("NARRATIVE_MODEL") {
            if !model.trim().is_empty() {
                config.model = model;
            }
        }
        if let Ok(secs) = std::env::var("NARRATIVE_ORACLE_TIMEOUT_SECS") {
            let secs: u64 = secs.trim().parse().map_err(|_| {
                claude::Error::Config(format!("NARRATIVE_ORACLE_TIMEOUT_SECS is not a number: {secs}"))
            })?;
            config.timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_tokens(mut self, tokens: usize) -> Self {
        self.max_tokens = tokens;
        self
    }

    pub fn with_temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_builder() {
        let config = EngineConfig::new()
            .with_prediction_interval(3)
            .with_max_background_predictions(0);

        assert_eq!(config.prediction_interval, 3);
        assert_eq!(config.max_background_predictions, 1);
        assert_eq!(config.persona.name, "Sable");
    }

    #[test]
    fn test_prediction_due() {
        let config = EngineConfig::default();
        assert!(config.prediction_due(0));
        assert!(!config.prediction_due(1));
        assert!(!config.prediction_due(4));
        assert!(config.prediction_due(5));
        assert!(config.prediction_due(10));

        let disabled = EngineConfig::default().with_prediction_interval(0);
        assert!(!disabled.prediction_due(0));
    }

    #[test]
    fn test_oracle_config_builder() {
        let config = OracleConfig::new("key")
            .with_model("MiniMax-M2.5")
            .with_base_url("https://api.example.com/anthropic/v1")
            .with_max_tokens(2048)
            .with_timeout(Duration::from_secs(5));

        assert_eq!(config.model, "MiniMax-M2.5");
        assert_eq!(config.max_tokens, 2048);
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert!(config.base_url.is_some());
    }
}
