//! Configuration of the learning loop.
//!
//! [`LearnerConfig`] is read from an optional TOML file, with `FLEETLEARN__*`
//! environment variables taking precedence, see [`load`].

// For coverage on nightly
#![allow(unexpected_cfgs)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use fleetlearn_peer::PeerIdentity;

mod utils;

/// Delay between learning rounds while new nodes keep showing up.
pub const DEFAULT_SHORT_INTERVAL: Duration = Duration::from_secs(5);

/// Delay between learning rounds once the fleet looks stable.
pub const DEFAULT_LONG_INTERVAL: Duration = Duration::from_secs(90);

/// Consecutive rounds without new nodes after which learning slows down.
pub const DEFAULT_ROUNDS_BEFORE_SLOWDOWN: usize = 10;

pub const DEFAULT_LEARNING_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_SEED_RETRY_ATTEMPTS: usize = 3;

/// Prefix of the environment variables overriding the configuration file,
/// e.g. `FLEETLEARN__FEDERATED_ONLY=false`.
pub const ENV_PREFIX: &str = "FLEETLEARN";

/// How deeply candidates learned from a teacher are verified before admission.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Eagerness {
    /// Stamp and interface checks only
    #[default]
    Lazy,
    /// Stamp, interface and a live round-trip to the candidate
    Eager,
}

/// What the scheduled learning task does with a fatal fault.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnLearningError {
    /// Run the teardown hook, record the fault and stop the task with it.
    Abort,
    /// Log the fault and keep learning.
    #[default]
    Resume,
}

/// A well-known node used to anchor initial connectivity.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SeedNode {
    /// Expected identity; when set, a seed advertising another identity is rejected.
    #[serde(default)]
    pub identity: Option<PeerIdentity>,
    pub host: String,
    #[serde(deserialize_with = "utils::int_from_anything")]
    pub port: u16,
}

impl SeedNode {
    pub fn new(identity: Option<PeerIdentity>, host: impl Into<String>, port: u16) -> Self {
        Self {
            identity,
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for SeedNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.identity {
            Some(identity) => write!(f, "{}|{}:{}", identity, self.host, self.port),
            None => write!(f, "{}:{}", self.host, self.port),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearnerConfig {
    #[serde(with = "humantime_serde")]
    pub short_interval: Duration,

    #[serde(with = "humantime_serde")]
    pub long_interval: Duration,

    #[serde(deserialize_with = "utils::int_from_anything")]
    pub rounds_before_slowdown: usize,

    /// Default timeout of the blocking-wait helpers
    #[serde(with = "humantime_serde")]
    pub learning_timeout: Duration,

    /// How often the blocking-wait helpers look at the fleet
    #[serde(with = "humantime_serde")]
    pub wait_poll_interval: Duration,

    /// Accept nodes without identity evidence
    #[serde(deserialize_with = "utils::bool_from_anything")]
    pub federated_only: bool,

    /// Verification depth used by the scheduled learning task
    pub eagerness: Eagerness,

    pub on_error: OnLearningError,

    pub seed_nodes: Vec<SeedNode>,

    /// Total attempts made to reach each seed node
    #[serde(deserialize_with = "utils::int_from_anything")]
    pub seed_retry_attempts: usize,

    /// Load previously stored nodes once seeding is done
    #[serde(deserialize_with = "utils::bool_from_anything")]
    pub read_storage_on_seed: bool,

    /// Save every accepted node to the node store
    #[serde(deserialize_with = "utils::bool_from_anything")]
    pub save_metadata: bool,

    pub certificates_dir: PathBuf,

    /// Write the certificates of newly learned nodes to `certificates_dir`
    #[serde(deserialize_with = "utils::bool_from_anything")]
    pub persist_certificates: bool,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            short_interval: DEFAULT_SHORT_INTERVAL,
            long_interval: DEFAULT_LONG_INTERVAL,
            rounds_before_slowdown: DEFAULT_ROUNDS_BEFORE_SLOWDOWN,
            learning_timeout: DEFAULT_LEARNING_TIMEOUT,
            wait_poll_interval: DEFAULT_WAIT_POLL_INTERVAL,
            federated_only: true,
            eagerness: Eagerness::Lazy,
            on_error: OnLearningError::Resume,
            seed_nodes: Vec::new(),
            seed_retry_attempts: DEFAULT_SEED_RETRY_ATTEMPTS,
            read_storage_on_seed: true,
            save_metadata: false,
            certificates_dir: std::env::temp_dir().join("fleetlearn-certs"),
            persist_certificates: true,
        }
    }
}

impl LearnerConfig {
    pub fn validate(&self) -> eyre::Result<()> {
        eyre::ensure!(
            !self.short_interval.is_zero(),
            "short_interval must be greater than zero"
        );
        eyre::ensure!(
            self.long_interval >= self.short_interval,
            "long_interval ({:?}) must not be shorter than short_interval ({:?})",
            self.long_interval,
            self.short_interval
        );
        eyre::ensure!(
            !self.wait_poll_interval.is_zero(),
            "wait_poll_interval must be greater than zero"
        );
        eyre::ensure!(
            self.seed_retry_attempts > 0,
            "seed_retry_attempts must be at least 1"
        );

        Ok(())
    }
}

/// Load the configuration from an optional TOML file, then apply the
/// `FLEETLEARN__*` environment overrides on top.
pub fn load(path: Option<&Path>) -> eyre::Result<LearnerConfig> {
    load_with_env(path, config::Environment::with_prefix(ENV_PREFIX))
}

fn load_with_env(path: Option<&Path>, env: config::Environment) -> eyre::Result<LearnerConfig> {
    let mut builder = config::Config::builder();

    if let Some(path) = path {
        tracing::debug!(path = %path.display(), "Loading learner configuration");

        builder = builder.add_source(
            config::File::from(path)
                .format(config::FileFormat::Toml)
                .required(true),
        );
    }

    let config: LearnerConfig = builder
        .add_source(env.separator("__"))
        .build()?
        .try_deserialize()?;

    config.validate()?;

    Ok(config)
}
