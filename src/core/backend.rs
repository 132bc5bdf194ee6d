//! Compute backend negotiation.
//!
//! A [`BackendNegotiator`] walks an ordered list of named initializers and
//! keeps the first one that comes up. The outcome, success or failure, is
//! fixed for the lifetime of the negotiator.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::error::{AppError, BackendAttempt, Result};

/// Default preference order for the built-in backends.
pub const DEFAULT_BACKENDS: &[&str] = &["cpu", "cuda"];

/// Where inference runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    /// Host CPU.
    Cpu,
    /// CUDA device with the given ordinal.
    Cuda(usize),
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(ordinal) => write!(f, "cuda:{}", ordinal),
        }
    }
}

#[cfg(feature = "torch")]
impl From<Device> for tch::Device {
    fn from(device: Device) -> Self {
        match device {
            Device::Cpu => tch::Device::Cpu,
            Device::Cuda(ordinal) => tch::Device::Cuda(ordinal),
        }
    }
}

type Initializer = dyn Fn() -> anyhow::Result<Device> + Send + Sync;

/// A named backend initializer.
#[derive(Clone)]
pub struct BackendCandidate {
    name: String,
    init: Arc<Initializer>,
}

impl BackendCandidate {
    /// Wrap an initializer. It runs on the blocking pool and should return
    /// the device it brought up.
    pub fn new<F>(name: impl Into<String>, init: F) -> Self
    where
        F: Fn() -> anyhow::Result<Device> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            init: Arc::new(init),
        }
    }

    /// Backend identifier.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for BackendCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendCandidate")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// The backend selected by negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveBackend {
    /// Identifier of the winning candidate.
    pub name: String,
    /// Device it initialized.
    pub device: Device,
}

/// Observable negotiation state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiatorState {
    /// Nothing attempted yet.
    Uninitialized,
    /// A negotiation run is in flight.
    Initializing,
    /// A backend is active.
    Ready(ActiveBackend),
    /// Every candidate failed; this is terminal.
    Failed,
}

type Outcome = std::result::Result<ActiveBackend, Vec<BackendAttempt>>;

/// Selects and initializes one compute backend per process.
#[derive(Debug)]
pub struct BackendNegotiator {
    candidates: Vec<BackendCandidate>,
    outcome: OnceCell<Outcome>,
    initializing: AtomicBool,
    runs: AtomicUsize,
}

impl BackendNegotiator {
    /// Negotiate over `candidates`, tried in the given order.
    pub fn new(candidates: Vec<BackendCandidate>) -> Self {
        Self {
            candidates,
            outcome: OnceCell::new(),
            initializing: AtomicBool::new(false),
            runs: AtomicUsize::new(0),
        }
    }

    /// Build a negotiator from backend names, resolved against the
    /// backends compiled into this build. Unknown names are skipped.
    pub fn from_preferences<S: AsRef<str>>(names: &[S]) -> Self {
        let registry = builtin_backends();
        let mut candidates = Vec::with_capacity(names.len());

        for name in names {
            let name = name.as_ref().trim();
            match registry.iter().find(|c| c.name().eq_ignore_ascii_case(name)) {
                Some(candidate) => candidates.push(candidate.clone()),
                None => log::warn!("Backend '{}' is not available in this build, skipping", name),
            }
        }

        Self::new(candidates)
    }

    /// Names of the candidates, in preference order.
    pub fn candidate_names(&self) -> Vec<&str> {
        self.candidates.iter().map(BackendCandidate::name).collect()
    }

    /// Make sure a backend is active, negotiating on the first call.
    ///
    /// # Errors
    ///
    /// `EnvironmentUnsupported` when there is no tokio runtime or nothing
    /// to try; `BackendUnavailable` when every candidate failed, now or on
    /// an earlier call.
    pub async fn ensure_ready(&self) -> Result<ActiveBackend> {
        if let Some(outcome) = self.outcome.get() {
            return Self::to_result(outcome);
        }

        if tokio::runtime::Handle::try_current().is_err() {
            return Err(AppError::EnvironmentUnsupported(
                "backend negotiation requires a tokio runtime".to_string(),
            ));
        }
        if self.candidates.is_empty() {
            return Err(AppError::EnvironmentUnsupported(
                "no compute backend is compiled into this build".to_string(),
            ));
        }

        let outcome = self.outcome.get_or_init(|| self.negotiate()).await;
        Self::to_result(outcome)
    }

    /// Current state of the negotiation.
    pub fn state(&self) -> NegotiatorState {
        match self.outcome.get() {
            Some(Ok(active)) => NegotiatorState::Ready(active.clone()),
            Some(Err(_)) => NegotiatorState::Failed,
            None if self.initializing.load(Ordering::Acquire) => NegotiatorState::Initializing,
            None => NegotiatorState::Uninitialized,
        }
    }

    /// How many negotiation runs have started.
    ///
    /// This stays at one once a run finishes. It only grows past one when a
    /// caller is cancelled mid-run and a later call starts over.
    pub fn initialization_runs(&self) -> usize {
        self.runs.load(Ordering::Acquire)
    }

    fn to_result(outcome: &Outcome) -> Result<ActiveBackend> {
        outcome.clone().map_err(|attempts| AppError::BackendUnavailable { attempts })
    }

    async fn negotiate(&self) -> Outcome {
        self.runs.fetch_add(1, Ordering::AcqRel);
        let _initializing = InitializingFlag::raise(&self.initializing);

        let mut attempts = Vec::new();
        let mut selected = None;

        for candidate in &self.candidates {
            let init = Arc::clone(&candidate.init);
            let result = match tokio::task::spawn_blocking(move || (*init)()).await {
                Ok(result) => result,
                Err(e) => Err(anyhow::anyhow!("initializer aborted: {}", e)),
            };

            match result {
                Ok(device) => {
                    log::info!("Compute backend initialized: {} ({})", candidate.name(), device);
                    selected = Some(ActiveBackend {
                        name: candidate.name().to_string(),
                        device,
                    });
                    break;
                }
                Err(e) => {
                    log::warn!("Backend {} unavailable, trying next: {:#}", candidate.name(), e);
                    attempts.push(BackendAttempt {
                        backend: candidate.name().to_string(),
                        error: format!("{:#}", e),
                    });
                }
            }
        }

        selected.ok_or_else(|| {
            log::error!("All compute backends failed to initialize");
            attempts
        })
    }
}

/// Marks a negotiation run as in flight until dropped, including when the
/// run is cancelled.
struct InitializingFlag<'a>(&'a AtomicBool);

impl<'a> InitializingFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self(flag)
    }
}

impl Drop for InitializingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Backends compiled into this build, in default preference order.
#[cfg(feature = "torch")]
pub fn builtin_backends() -> Vec<BackendCandidate> {
    use tch::{Kind, Tensor};

    let cpu = BackendCandidate::new("cpu", || {
        Tensor::f_zeros(&[1], (Kind::Float, tch::Device::Cpu))?;
        Ok(Device::Cpu)
    });

    let cuda = BackendCandidate::new("cuda", || {
        if !tch::Cuda::is_available() {
            anyhow::bail!("CUDA is not available");
        }
        Tensor::f_zeros(&[1], (Kind::Float, tch::Device::Cuda(0)))?;
        Ok(Device::Cuda(0))
    });

    vec![cpu, cuda]
}

/// Backends compiled into this build. Without the `torch` feature there
/// are none.
#[cfg(not(feature = "torch"))]
pub fn builtin_backends() -> Vec<BackendCandidate> {
    Vec::new()
}
