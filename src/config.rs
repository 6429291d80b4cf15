//! Session configuration.
//!
//! A [`SessionConfig`] is the declarative, serde-friendly description callers
//! edit; [`SessionConfig::compile`] validates it into an immutable
//! [`CompiledConfig`] carrying a deterministic `config_id`, so two sessions
//! with the same parameters report the same id in telemetry.
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::abr::{AbrStrategy, ReplayError, ReplayTable};
use crate::budget::DEFAULT_THROUGHPUT_WINDOW;
use crate::predict::VpStrategy;
use crate::utility::MetricSelector;

pub const DEFAULT_TARGET_FPS: u32 = 24;
pub const DEFAULT_STARTUP_BUFFER_SECS: f64 = 2.0;
/// 10 Mbit/s, used until the first retrieval barrier completes.
pub const DEFAULT_INITIAL_BANDWIDTH: f64 = 1_250_000.0;

/// Error produced when session parameters fail validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("target frame rate must be positive")]
    ZeroFrameRate,
    #[error("startup buffer must be a finite, non-negative number of seconds")]
    InvalidStartupBuffer,
    #[error("resume buffer must be a finite, non-negative number of seconds")]
    InvalidResumeBuffer,
    #[error("bola parameters must have V > 0 and gamma >= 0")]
    InvalidBolaParams,
    #[error("initial bandwidth must be finite and positive")]
    InvalidInitialBandwidth,
    #[error("throughput window must hold at least one sample")]
    ZeroThroughputWindow,
    #[error("replay file is only valid with the FromFileInput strategy")]
    ReplayFileWithoutReplayStrategy,
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    Replay(#[from] ReplayError),
}

/// Parameters fixed before a session starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub target_fps: u32,
    pub startup_buffer_secs: f64,
    pub resume_buffer_secs: f64,
    pub abr: AbrStrategy,
    pub vp_strategy: VpStrategy,
    pub metric: MetricSelector,
    /// Loaded into the `FromFileInput` table at compile time.
    pub replay_file: Option<PathBuf>,
    pub initial_bandwidth_bytes_per_sec: f64,
    pub throughput_window: usize,
    /// Seeds the Random strategy; entropy when absent.
    pub rng_seed: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            target_fps: DEFAULT_TARGET_FPS,
            startup_buffer_secs: DEFAULT_STARTUP_BUFFER_SECS,
            resume_buffer_secs: DEFAULT_STARTUP_BUFFER_SECS,
            abr: AbrStrategy::default(),
            vp_strategy: VpStrategy::default(),
            metric: MetricSelector::default(),
            replay_file: None,
            initial_bandwidth_bytes_per_sec: DEFAULT_INITIAL_BANDWIDTH,
            throughput_window: DEFAULT_THROUGHPUT_WINDOW,
            rng_seed: None,
        }
    }
}

impl SessionConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn with_abr(mut self, abr: AbrStrategy) -> Self {
        self.abr = abr;
        self
    }

    pub fn with_metric(mut self, metric: MetricSelector) -> Self {
        self.metric = metric;
        self
    }

    pub fn with_vp_strategy(mut self, vp_strategy: VpStrategy) -> Self {
        self.vp_strategy = vp_strategy;
        self
    }

    /// Validates and freezes the configuration.
    ///
    /// # Guarantees
    /// * Rejects a zero frame rate, negative or non-finite buffer thresholds,
    ///   invalid Bola parameters and an empty throughput window.
    /// * Loads `replay_file` into the `FromFileInput` table.
    /// * Produces a deterministic `config_id` over the normalized parameters.
    pub fn compile(mut self) -> Result<CompiledConfig, ConfigError> {
        if self.target_fps == 0 {
            return Err(ConfigError::ZeroFrameRate);
        }
        if !(self.startup_buffer_secs.is_finite() && self.startup_buffer_secs >= 0.0) {
            return Err(ConfigError::InvalidStartupBuffer);
        }
        if !(self.resume_buffer_secs.is_finite() && self.resume_buffer_secs >= 0.0) {
            return Err(ConfigError::InvalidResumeBuffer);
        }
        if let AbrStrategy::Bola(params) = &self.abr {
            if !params.is_valid() {
                return Err(ConfigError::InvalidBolaParams);
            }
        }
        if !(self.initial_bandwidth_bytes_per_sec.is_finite() && self.initial_bandwidth_bytes_per_sec > 0.0) {
            return Err(ConfigError::InvalidInitialBandwidth);
        }
        if self.throughput_window == 0 {
            return Err(ConfigError::ZeroThroughputWindow);
        }
        if let Some(path) = self.replay_file.take() {
            match &mut self.abr {
                AbrStrategy::FromFileInput { table } => *table = ReplayTable::from_path(path)?,
                _ => return Err(ConfigError::ReplayFileWithoutReplayStrategy),
            }
        }

        let normalized = serde_json::to_vec(&self)?;
        let digest = Sha256::digest(&normalized);
        let config_id = digest.iter().map(|byte| format!("{:02x}", byte)).collect();

        Ok(CompiledConfig {
            inner: self,
            config_id,
        })
    }
}

/// Validated, immutable session configuration.
#[derive(Debug, Clone)]
pub struct CompiledConfig {
    inner: SessionConfig,
    config_id: String,
}

impl CompiledConfig {
    /// Stable id derived from the normalized parameters.
    pub fn config_id(&self) -> &str {
        &self.config_id
    }

    pub fn target_fps(&self) -> u32 {
        self.inner.target_fps
    }

    /// One segment per frame.
    pub fn segment_duration_secs(&self) -> f64 {
        1.0 / f64::from(self.inner.target_fps)
    }

    pub fn startup_buffer_secs(&self) -> f64 {
        self.inner.startup_buffer_secs
    }

    pub fn resume_buffer_secs(&self) -> f64 {
        self.inner.resume_buffer_secs
    }

    pub fn abr(&self) -> &AbrStrategy {
        &self.inner.abr
    }

    pub fn vp_strategy(&self) -> VpStrategy {
        self.inner.vp_strategy
    }

    pub fn metric(&self) -> MetricSelector {
        self.inner.metric
    }

    pub fn initial_bandwidth_bytes_per_sec(&self) -> f64 {
        self.inner.initial_bandwidth_bytes_per_sec
    }

    pub fn throughput_window(&self) -> usize {
        self.inner.throughput_window
    }

    pub fn rng_seed(&self) -> Option<u64> {
        self.inner.rng_seed
    }

    pub fn as_config(&self) -> &SessionConfig {
        &self.inner
    }
}
