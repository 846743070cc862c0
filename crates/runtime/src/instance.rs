//! A loaded model plus its residency bookkeeping.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;
use tts_core::{
    ChunkIter, ComputeDevice, InferenceRequest, ModelConfig, ModelConfigId, Precision, Residency,
    TtsModel, TtsResult,
};

/// Device and precision a model currently has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceState {
    pub device: ComputeDevice,
    pub precision: Precision,
}

impl DeviceState {
    /// Accelerator or host.
    pub fn residency(&self) -> Residency {
        if self.device.is_accelerator() {
            Residency::OnAccelerator
        } else {
            Residency::OnHost
        }
    }
}

struct Inner {
    model: Box<dyn TtsModel>,
    state: DeviceState,
}

/// An expensive, stateful model handle owned by the model cache.
///
/// All model calls are serialized through one lock. The recorded state only
/// changes after the model reports success, so it never claims a device or
/// precision the model failed to reach.
pub struct ModelInstance {
    config: ModelConfig,
    inner: Mutex<Inner>,
    users: AtomicUsize,
    loaded_at: Instant,
}

impl std::fmt::Debug for ModelInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelInstance")
            .field("id", &self.config.id)
            .field("state", &self.state())
            .field("users", &self.users())
            .finish_non_exhaustive()
    }
}

impl ModelInstance {
    /// Wrap a freshly loaded model, which sits where its config puts it.
    pub fn new(config: ModelConfig, model: Box<dyn TtsModel>) -> Self {
        let state = DeviceState {
            device: config.device,
            precision: config.serving_precision(),
        };
        Self {
            config,
            inner: Mutex::new(Inner { model, state }),
            users: AtomicUsize::new(0),
            loaded_at: Instant::now(),
        }
    }

    /// Configuration this instance was built from.
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Cache key of this instance.
    pub fn id(&self) -> &ModelConfigId {
        &self.config.id
    }

    /// Current device and precision.
    pub fn state(&self) -> DeviceState {
        self.inner.lock().state
    }

    /// Requests currently holding a lease on this instance.
    pub fn users(&self) -> usize {
        self.users.load(Ordering::Acquire)
    }

    pub(crate) fn enter(&self) {
        self.users.fetch_add(1, Ordering::AcqRel);
    }

    /// Drop one user and return how many remain.
    pub(crate) fn leave(&self) -> usize {
        let before = self
            .users
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(1)))
            .unwrap_or_else(|n| n);
        before.saturating_sub(1)
    }

    /// Seconds since construction.
    pub fn age_secs(&self) -> u64 {
        self.loaded_at.elapsed().as_secs()
    }

    /// Start synthesis. The lock is released before chunks are pulled.
    pub fn run(&self, request: &InferenceRequest) -> TtsResult<ChunkIter> {
        self.inner.lock().model.run(request)
    }

    pub fn load_gpt_weights(&self, path: &Path) -> TtsResult<()> {
        self.inner.lock().model.load_gpt_weights(path)?;
        info!(config = %self.id(), weights = %path.display(), "text-to-semantic weights replaced");
        Ok(())
    }

    pub fn load_sovits_weights(&self, path: &Path) -> TtsResult<()> {
        self.inner.lock().model.load_sovits_weights(path)?;
        info!(config = %self.id(), weights = %path.display(), "vocoder weights replaced");
        Ok(())
    }

    pub fn set_ref_audio(&self, path: &Path) -> TtsResult<()> {
        self.inner.lock().model.set_ref_audio(path)?;
        info!(config = %self.id(), ref_audio = %path.display(), "reference audio set");
        Ok(())
    }

    /// Move to `target`, skipping steps already satisfied.
    ///
    /// # Returns
    /// Whether anything changed.
    pub(crate) fn transition(&self, target: DeviceState) -> TtsResult<bool> {
        let mut inner = self.inner.lock();
        if inner.state == target {
            return Ok(false);
        }
        if inner.state.device != target.device {
            inner.model.set_device(target.device)?;
            inner.state.device = target.device;
        }
        if inner.state.precision != target.precision {
            inner.model.set_precision(target.precision)?;
            inner.state.precision = target.precision;
        }
        Ok(true)
    }
}

impl Drop for ModelInstance {
    fn drop(&mut self) {
        info!(config = %self.config.id, age_secs = self.age_secs(), "model instance released");
    }
}
