//! Capability resolution: pick a real backend or its fallback, once, at startup.
//!
//! Each capability in the [`Registry`] has exactly one fallback provider and
//! any number of real providers. [`ModuleResolver::resolve`] tries the real
//! providers in registration order and accepts the first one whose declared
//! surface covers the whole [`CapabilityContract`] and whose probe succeeds.
//! Anything else (no provider, partial surface, probe error, probe panic)
//! selects the fallback and records why. Resolution never fails for a
//! registered capability.
//!
//! # Example
//!
//! ```rust,no_run
//! use updogo::config::RobotConfig;
//! use updogo::resolver::{ModuleResolver, Registry};
//!
//! # fn main() -> updogo::Result<()> {
//! let config = RobotConfig::default();
//! let registry = Registry::builtin()?;
//! let report = ModuleResolver::new(&registry, &config).resolve_all();
//! for capability in report.get_status().fallback {
//!     println!("{capability} is running on its fallback");
//! }
//! # Ok(())
//! # }
//! ```

use crate::capability::{CapabilityContract, CapabilityId};
use crate::config::RobotConfig;
use crate::error::{Result, RobotError, panic_message};
use crate::worker::Worker;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Whether a provider is a real backend or the contract-preserving stand-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Real,
    Fallback,
}

/// Factory for one implementation of a capability.
pub trait WorkerProvider: Send + Sync {
    /// Short implementation name used in logs and status reports.
    fn name(&self) -> &str;

    fn capability(&self) -> CapabilityId;

    fn kind(&self) -> ProviderKind;

    /// Command names this implementation accepts.
    fn commands(&self) -> &'static [&'static str];

    /// Event names this implementation can emit.
    fn events(&self) -> &'static [&'static str];

    /// Check that the implementation can run here (binary present, endpoint
    /// configured, ...). Must not acquire devices.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when the implementation is unavailable.
    fn probe(&self, config: &RobotConfig) -> Result<()>;

    /// Construct a worker from this capability's config section.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker cannot be constructed.
    fn build(&self, config: &RobotConfig) -> Result<Box<dyn Worker>>;
}

/// Providers registered for one capability.
#[derive(Clone)]
pub struct CapabilityEntry {
    fallback: Arc<dyn WorkerProvider>,
    real: Vec<Arc<dyn WorkerProvider>>,
}

impl CapabilityEntry {
    pub fn fallback(&self) -> &Arc<dyn WorkerProvider> {
        &self.fallback
    }

    pub fn real(&self) -> &[Arc<dyn WorkerProvider>] {
        &self.real
    }
}

/// Static set of providers, keyed by capability.
#[derive(Clone, Default)]
pub struct Registry {
    entries: BTreeMap<CapabilityId, CapabilityEntry>,
}

impl Registry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every backend shipped in this crate.
    ///
    /// # Errors
    ///
    /// Returns an error if a built-in provider violates its contract.
    pub fn builtin() -> Result<Self> {
        let mut registry = Self::new();
        registry.register_fallback(Arc::new(crate::tts::SimulatedTtsProvider))?;
        registry.register_real(Arc::new(crate::tts::CommandTtsProvider))?;
        registry.register_fallback(Arc::new(crate::stt::SimulatedSttProvider))?;
        registry.register_real(Arc::new(crate::stt::CommandSttProvider))?;
        registry.register_fallback(Arc::new(crate::emotion::SimpleEmotionProvider))?;
        registry.register_real(Arc::new(crate::emotion::KeywordEmotionProvider))?;
        registry.register_fallback(Arc::new(crate::nlp::CannedNlpProvider))?;
        registry.register_real(Arc::new(crate::nlp::ChatNlpProvider))?;
        registry.register_fallback(Arc::new(crate::camera::TestPatternCameraProvider))?;
        registry.register_real(Arc::new(crate::camera::ReplayCameraProvider))?;
        registry.register_fallback(Arc::new(crate::image_save::UnavailableImageSaveProvider))?;
        registry.register_real(Arc::new(crate::image_save::DiskImageSaveProvider))?;
        Ok(registry)
    }

    /// Register (or replace) the fallback for a capability.
    ///
    /// # Errors
    ///
    /// Returns an error if `provider` is not a fallback or does not cover
    /// the whole contract.
    pub fn register_fallback(&mut self, provider: Arc<dyn WorkerProvider>) -> Result<()> {
        let capability = provider.capability();
        if provider.kind() != ProviderKind::Fallback {
            return Err(RobotError::Resolution(format!(
                "{} is not a fallback provider",
                provider.name()
            )));
        }
        let missing = capability
            .contract()
            .missing_members(provider.commands(), provider.events());
        if !missing.is_empty() {
            return Err(RobotError::Resolution(format!(
                "fallback {} for {capability} is missing {}",
                provider.name(),
                missing.join(", ")
            )));
        }
        match self.entries.get_mut(&capability) {
            Some(entry) => entry.fallback = provider,
            None => {
                self.entries.insert(
                    capability,
                    CapabilityEntry {
                        fallback: provider,
                        real: Vec::new(),
                    },
                );
            }
        }
        Ok(())
    }

    /// Register a real provider. Its capability must already have a fallback.
    ///
    /// The provider's contract is checked during resolution, not here.
    ///
    /// # Errors
    ///
    /// Returns an error if `provider` is a fallback or its capability has no fallback yet.
    pub fn register_real(&mut self, provider: Arc<dyn WorkerProvider>) -> Result<()> {
        if provider.kind() != ProviderKind::Real {
            return Err(RobotError::Resolution(format!(
                "{} is not a real provider",
                provider.name()
            )));
        }
        let capability = provider.capability();
        let entry = self.entries.get_mut(&capability).ok_or_else(|| {
            RobotError::Resolution(format!(
                "register a fallback for {capability} before {}",
                provider.name()
            ))
        })?;
        entry.real.push(provider);
        Ok(())
    }

    pub fn entry(&self, capability: CapabilityId) -> Option<&CapabilityEntry> {
        self.entries.get(&capability)
    }

    /// Registered capabilities in order.
    pub fn capabilities(&self) -> impl Iterator<Item = CapabilityId> + '_ {
        self.entries.keys().copied()
    }
}

/// Implementation chosen for one capability.
#[derive(Clone)]
pub enum Resolution {
    /// A real backend passed its contract check and probe.
    Real(Arc<dyn WorkerProvider>),
    /// The fallback was selected, with the reason the real backend was not.
    Fallback {
        provider: Arc<dyn WorkerProvider>,
        reason: String,
    },
}

impl Resolution {
    pub fn provider(&self) -> &Arc<dyn WorkerProvider> {
        match self {
            Self::Real(provider) | Self::Fallback { provider, .. } => provider,
        }
    }

    pub fn kind(&self) -> ProviderKind {
        match self {
            Self::Real(_) => ProviderKind::Real,
            Self::Fallback { .. } => ProviderKind::Fallback,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback { .. })
    }

    /// Why the real backend was rejected, for fallback resolutions.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Real(_) => None,
            Self::Fallback { reason, .. } => Some(reason),
        }
    }
}

impl fmt::Debug for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Real(provider) => f.debug_tuple("Real").field(&provider.name()).finish(),
            Self::Fallback { provider, reason } => f
                .debug_struct("Fallback")
                .field("provider", &provider.name())
                .field("reason", reason)
                .finish(),
        }
    }
}

/// A capability that fell back, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolutionFailure {
    pub capability: CapabilityId,
    pub reason: String,
}

/// Snapshot of the status query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleStatus {
    pub active: Vec<CapabilityId>,
    pub fallback: Vec<CapabilityId>,
    pub failures: Vec<String>,
}

/// Outcome of resolving every registered capability. Immutable once built.
#[derive(Debug, Clone)]
pub struct ResolutionReport {
    resolutions: BTreeMap<CapabilityId, Resolution>,
    failures: Vec<ResolutionFailure>,
    resolved_at: DateTime<Utc>,
}

impl ResolutionReport {
    /// Build a report from individual resolutions.
    pub fn from_resolutions(resolutions: impl IntoIterator<Item = (CapabilityId, Resolution)>) -> Self {
        let resolutions: BTreeMap<_, _> = resolutions.into_iter().collect();
        let failures = resolutions
            .iter()
            .filter_map(|(capability, resolution)| {
                resolution.reason().map(|reason| ResolutionFailure {
                    capability: *capability,
                    reason: reason.to_owned(),
                })
            })
            .collect();
        Self {
            resolutions,
            failures,
            resolved_at: Utc::now(),
        }
    }

    pub fn resolution(&self, capability: CapabilityId) -> Option<&Resolution> {
        self.resolutions.get(&capability)
    }

    pub fn iter(&self) -> impl Iterator<Item = (CapabilityId, &Resolution)> + '_ {
        self.resolutions.iter().map(|(c, r)| (*c, r))
    }

    pub fn failures(&self) -> &[ResolutionFailure] {
        &self.failures
    }

    /// True when at least one capability runs on its fallback.
    pub fn is_degraded(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn resolved_at(&self) -> DateTime<Utc> {
        self.resolved_at
    }

    /// Which capabilities are real, which fell back, and why.
    pub fn get_status(&self) -> ModuleStatus {
        let (fallback, active): (Vec<_>, Vec<_>) = self
            .resolutions
            .iter()
            .map(|(capability, resolution)| (*capability, resolution.is_fallback()))
            .partition(|(_, is_fallback)| *is_fallback);
        ModuleStatus {
            active: active.into_iter().map(|(c, _)| c).collect(),
            fallback: fallback.into_iter().map(|(c, _)| c).collect(),
            failures: self
                .failures
                .iter()
                .map(|f| format!("{}: {}", f.capability, f.reason))
                .collect(),
        }
    }
}

/// Resolves capabilities against a registry and configuration.
pub struct ModuleResolver<'a> {
    registry: &'a Registry,
    config: &'a RobotConfig,
    degraded: AtomicBool,
}

impl<'a> ModuleResolver<'a> {
    pub fn new(registry: &'a Registry, config: &'a RobotConfig) -> Self {
        Self {
            registry,
            config,
            degraded: AtomicBool::new(false),
        }
    }

    /// True once any capability resolved to its fallback.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    /// Resolve one capability.
    ///
    /// # Errors
    ///
    /// Only when `capability` is not registered or `contract` belongs to a
    /// different capability. Every registered capability resolves.
    pub fn resolve(&self, capability: CapabilityId, contract: &CapabilityContract) -> Result<Resolution> {
        if contract.capability != capability {
            return Err(RobotError::Resolution(format!(
                "contract for {} used to resolve {capability}",
                contract.capability
            )));
        }
        let entry = self.registry.entry(capability).ok_or_else(|| {
            RobotError::Resolution(format!("{capability} is not registered"))
        })?;

        let resolution = match self.select_real(capability, contract, entry) {
            Ok(provider) => {
                info!(%capability, provider = provider.name(), "using real implementation");
                Resolution::Real(provider)
            }
            Err(reason) => {
                warn!(
                    %capability,
                    fallback = entry.fallback.name(),
                    reason = reason.as_str(),
                    "using fallback implementation"
                );
                if !self.degraded.swap(true, Ordering::AcqRel) {
                    warn!("running in degraded mode: at least one capability uses its fallback");
                }
                Resolution::Fallback {
                    provider: Arc::clone(&entry.fallback),
                    reason,
                }
            }
        };
        Ok(resolution)
    }

    /// Resolve every registered capability into a report.
    pub fn resolve_all(&self) -> ResolutionReport {
        let resolutions: Vec<_> = self
            .registry
            .capabilities()
            .filter_map(|capability| {
                self.resolve(capability, capability.contract())
                    .ok()
                    .map(|resolution| (capability, resolution))
            })
            .collect();
        let report = ResolutionReport::from_resolutions(resolutions);
        let status = report.get_status();
        info!(
            active = status.active.len(),
            fallback = status.fallback.len(),
            "capability resolution complete"
        );
        report
    }

    fn select_real(
        &self,
        capability: CapabilityId,
        contract: &CapabilityContract,
        entry: &CapabilityEntry,
    ) -> std::result::Result<Arc<dyn WorkerProvider>, String> {
        if self.config.forces_fallback(capability) {
            return Err("forced by configuration".to_owned());
        }
        if entry.real.is_empty() {
            return Err("no implementation registered".to_owned());
        }

        let mut reasons = Vec::with_capacity(entry.real.len());
        for provider in &entry.real {
            match self.check(provider.as_ref(), contract) {
                Ok(()) => return Ok(Arc::clone(provider)),
                Err(why) => {
                    debug!(%capability, provider = provider.name(), why = why.as_str(), "real implementation rejected");
                    reasons.push(format!("{} ({why})", provider.name()));
                }
            }
        }
        Err(reasons.join("; "))
    }

    fn check(&self, provider: &dyn WorkerProvider, contract: &CapabilityContract) -> std::result::Result<(), String> {
        if provider.capability() != contract.capability {
            return Err(format!("registered for {}", provider.capability()));
        }
        let missing = contract.missing_members(provider.commands(), provider.events());
        if !missing.is_empty() {
            return Err(format!("missing contract members: {}", missing.join(", ")));
        }
        match catch_unwind(AssertUnwindSafe(|| provider.probe(self.config))) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(format!("not available: {e}")),
            Err(panic) => Err(format!("probe panicked: {}", panic_message(panic.as_ref()))),
        }
    }
}
