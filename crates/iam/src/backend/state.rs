use std::{fmt, sync::Arc};

use parking_lot::RwLock;
use tracing::info;

use super::{BackendConfig, ConfigStorage, storage::CONFIG_KEY};
use crate::error::{NotConfiguredSnafu, Result};

/// Lifecycle phase of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendPhase {
    /// No configuration has been written.
    Unconfigured,
    /// A valid configuration is live.
    Configured,
    /// The configuration was withdrawn; it is kept until replaced or reset.
    Invalidated,
}

impl BackendPhase {
    /// Name for logs and errors.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unconfigured => "unconfigured",
            Self::Configured => "configured",
            Self::Invalidated => "invalidated",
        }
    }
}

impl fmt::Display for BackendPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
enum Phase {
    Unconfigured,
    Configured(Arc<BackendConfig>),
    Invalidated(Arc<BackendConfig>),
}

/// Explicit configuration state machine.
///
/// ```text
/// Unconfigured --configure--> Configured --invalidate--> Invalidated
///      ^                        ^  |                          |
///      |                        +--|------- configure --------+
///      +-------- reset ------------+--------- reset ----------+
/// ```
#[derive(Debug)]
pub struct BackendState {
    phase: RwLock<Phase>,
}

impl Default for BackendState {
    fn default() -> Self {
        Self { phase: RwLock::new(Phase::Unconfigured) }
    }
}

impl BackendState {
    /// Unconfigured state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// State restored from the sealed blob in `storage`, unconfigured when
    /// nothing is stored.
    ///
    /// # Errors
    ///
    /// Returns storage errors and unseal errors for corrupt or invalid blobs.
    pub fn load(storage: &dyn ConfigStorage) -> Result<Self> {
        let state = Self::new();
        if let Some(blob) = storage.get(CONFIG_KEY)? {
            state.configure(BackendConfig::unseal(&blob)?)?;
        }
        Ok(state)
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> BackendPhase {
        match *self.phase.read() {
            Phase::Unconfigured => BackendPhase::Unconfigured,
            Phase::Configured(_) => BackendPhase::Configured,
            Phase::Invalidated(_) => BackendPhase::Invalidated,
        }
    }

    /// Validates `config` and makes it live, from any phase.
    ///
    /// # Errors
    ///
    /// Returns [`IamError::Config`](crate::IamError::Config); the phase is unchanged.
    pub fn configure(&self, config: BackendConfig) -> Result<()> {
        config.validate()?;
        let mut phase = self.phase.write();
        let from = phase_name(&phase);
        let changed = match &*phase {
            Phase::Configured(previous) | Phase::Invalidated(previous) => **previous != config,
            Phase::Unconfigured => true,
        };
        *phase = Phase::Configured(Arc::new(config));
        info!(from, changed, "backend configured");
        Ok(())
    }

    /// [`configure`](Self::configure), persisting the sealed blob first.
    ///
    /// # Errors
    ///
    /// Returns validation, seal and storage errors; nothing changes on error.
    pub fn configure_persisted(&self, storage: &dyn ConfigStorage, config: BackendConfig) -> Result<()> {
        config.validate()?;
        storage.put(CONFIG_KEY, &config.seal()?)?;
        self.configure(config)
    }

    /// Withdraws a live configuration. Returns whether the phase changed.
    pub fn invalidate(&self) -> bool {
        let mut phase = self.phase.write();
        let next = match &*phase {
            Phase::Configured(config) => Phase::Invalidated(Arc::clone(config)),
            _ => return false,
        };
        *phase = next;
        info!("backend configuration invalidated");
        true
    }

    /// The configuration withdrawn by [`invalidate`](Self::invalidate), while
    /// the phase is [`BackendPhase::Invalidated`].
    #[must_use]
    pub fn withdrawn(&self) -> Option<Arc<BackendConfig>> {
        match &*self.phase.read() {
            Phase::Invalidated(config) => Some(Arc::clone(config)),
            _ => None,
        }
    }

    /// Drops any configuration.
    pub fn reset(&self) {
        let mut phase = self.phase.write();
        let from = phase_name(&phase);
        *phase = Phase::Unconfigured;
        info!(from, "backend reset");
    }

    /// [`reset`](Self::reset), deleting the persisted blob first.
    ///
    /// # Errors
    ///
    /// Returns storage errors; the phase is unchanged on error.
    pub fn reset_persisted(&self, storage: &dyn ConfigStorage) -> Result<()> {
        storage.delete(CONFIG_KEY)?;
        self.reset();
        Ok(())
    }

    /// The live configuration.
    ///
    /// # Errors
    ///
    /// Returns [`IamError::NotConfigured`](crate::IamError::NotConfigured)
    /// unless the phase is [`BackendPhase::Configured`].
    pub fn live(&self) -> Result<Arc<BackendConfig>> {
        match &*self.phase.read() {
            Phase::Configured(config) => Ok(Arc::clone(config)),
            other => NotConfiguredSnafu { phase: phase_name(other) }.fail(),
        }
    }
}

fn phase_name(phase: &Phase) -> &'static str {
    match phase {
        Phase::Unconfigured => BackendPhase::Unconfigured.as_str(),
        Phase::Configured(_) => BackendPhase::Configured.as_str(),
        Phase::Invalidated(_) => BackendPhase::Invalidated.as_str(),
    }
}
