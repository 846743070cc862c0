//! Residency management for cached model instances.
//!
//! Each request promotes its instance to the configured serving device
//! before inference and demotes it to host memory afterwards, so idle
//! instances do not hold accelerator memory.
//!
//! Transitions are serialized device-wide. With a single accelerator only
//! one instance should be promoted at a time; concurrent requests on
//! different instances can still both promote, in which case the last
//! promoter wins the memory. That is an operational constraint, not an
//! enforced invariant.
//!
//! Requests sharing one instance hold a [`Lease`] each. Demotion waits for
//! the last lease on an instance, so a stream keeps its instance hot until
//! it completes even when other requests on the same instance finish first.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};
use tts_core::{ComputeDevice, Precision, TtsError, TtsResult};

use crate::instance::{DeviceState, ModelInstance};
use crate::metrics::TtsMetrics;

/// Promotes and demotes model instances.
#[derive(Debug, Clone)]
pub struct DeviceManager {
    host_precision: Precision,
    transitions: Arc<Mutex<()>>,
    metrics: TtsMetrics,
}

impl DeviceManager {
    /// Create a manager that parks demoted instances at `host_precision`.
    pub fn new(host_precision: Precision, metrics: TtsMetrics) -> Self {
        Self {
            host_precision,
            transitions: Arc::new(Mutex::new(())),
            metrics,
        }
    }

    /// State a demoted instance ends up in.
    pub fn host_state(&self) -> DeviceState {
        DeviceState {
            device: ComputeDevice::Cpu,
            precision: self.host_precision,
        }
    }

    /// State a promoted instance ends up in.
    pub fn serving_state(instance: &ModelInstance) -> DeviceState {
        DeviceState {
            device: instance.config().device,
            precision: instance.config().serving_precision(),
        }
    }

    /// Move `instance` to its serving device and precision. No-op if already there.
    pub fn promote(&self, instance: &ModelInstance) -> TtsResult<()> {
        let target = Self::serving_state(instance);
        let _guard = self.transitions.lock();
        let changed = instance.transition(target).map_err(|e| {
            TtsError::device(format!("promote {} failed: {}", instance.id(), e.reason()))
        })?;
        if changed {
            self.metrics.promotion();
            info!(config = %instance.id(), device = %target.device, precision = ?target.precision, "instance promoted");
        } else {
            debug!(config = %instance.id(), "instance already promoted");
        }
        Ok(())
    }

    /// Move `instance` to host memory. No-op if already there, and deferred
    /// while any lease on it is outstanding.
    pub fn demote(&self, instance: &ModelInstance) -> TtsResult<()> {
        let _guard = self.transitions.lock();
        let users = instance.users();
        if users > 0 {
            debug!(config = %instance.id(), users, "instance in use, demotion deferred");
            return Ok(());
        }
        self.to_host(instance)
    }

    /// Register one more user of `instance`.
    pub fn lease(&self, instance: Arc<ModelInstance>) -> Lease {
        instance.enter();
        Lease {
            devices: self.clone(),
            instance,
            finished: false,
        }
    }

    fn release(&self, instance: &ModelInstance, demote: bool) -> TtsResult<()> {
        let _guard = self.transitions.lock();
        let users = instance.leave();
        if users > 0 {
            debug!(config = %instance.id(), users, "instance still in use, demotion deferred");
            return Ok(());
        }
        if demote {
            self.to_host(instance)
        } else {
            Ok(())
        }
    }

    // Callers hold `transitions`.
    fn to_host(&self, instance: &ModelInstance) -> TtsResult<()> {
        let target = self.host_state();
        let changed = instance.transition(target).map_err(|e| {
            TtsError::device(format!("demote {} failed: {}", instance.id(), e.reason()))
        })?;
        if changed {
            self.metrics.demotion();
            info!(config = %instance.id(), precision = ?target.precision, "instance demoted");
        } else {
            debug!(config = %instance.id(), "instance already demoted");
        }
        Ok(())
    }
}

/// One request's claim on a cached instance.
///
/// Dropping an unfinished lease releases it and demotes when it was the last.
pub struct Lease {
    devices: DeviceManager,
    instance: Arc<ModelInstance>,
    finished: bool,
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("config", self.instance.id())
            .finish_non_exhaustive()
    }
}

impl Lease {
    pub fn instance(&self) -> &ModelInstance {
        &self.instance
    }

    pub fn promote(&self) -> TtsResult<()> {
        self.devices.promote(&self.instance)
    }

    /// Give the instance back. If no other lease remains and `demote` is set,
    /// the instance moves to host memory.
    pub fn finish(mut self, demote: bool) -> TtsResult<()> {
        self.finished = true;
        self.devices.release(&self.instance, demote)
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(e) = self.devices.release(&self.instance, true) {
            warn!(config = %self.instance.id(), error = %e, "demote on lease drop failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockEngine, MockModelProbe};
    use tts_core::{ModelConfig, ModelConfigId, Residency, TtsEngine};

    fn instance(yaml: &str) -> (ModelInstance, MockModelProbe) {
        let config = ModelConfig::from_yaml_str(ModelConfigId::resolve("device.yaml"), yaml).unwrap();
        let engine = MockEngine::new();
        let model = engine.load(&config).unwrap();
        let probe = engine.last_probe().unwrap();
        (ModelInstance::new(config, model), probe)
    }

    fn manager() -> DeviceManager {
        DeviceManager::new(Precision::Reduced, TtsMetrics::init_noop())
    }

    #[test]
    fn test_promote_demote_promote() {
        let (instance, _) = instance("custom:\n  device: cuda\n  is_half: false\n");
        let devices = manager();

        devices.promote(&instance).unwrap();
        assert_eq!(instance.state().residency(), Residency::OnAccelerator);
        assert_eq!(instance.state().precision, Precision::Full);

        devices.demote(&instance).unwrap();
        assert_eq!(instance.state().residency(), Residency::OnHost);
        assert_eq!(instance.state().precision, Precision::Reduced);

        devices.promote(&instance).unwrap();
        assert_eq!(instance.state().device, ComputeDevice::Cuda(0));
        assert_eq!(instance.state().precision, Precision::Full);
    }

    #[test]
    fn test_transitions_are_idempotent() {
        let (instance, probe) = instance("custom:\n  device: cuda:1\n  is_half: true\n");
        let devices = manager();

        devices.promote(&instance).unwrap();
        assert_eq!(probe.device_moves(), 0);

        devices.demote(&instance).unwrap();
        let after_first = instance.state();
        let moves = probe.device_moves();
        devices.demote(&instance).unwrap();
        assert_eq!(instance.state(), after_first);
        assert_eq!(probe.device_moves(), moves);
    }

    #[test]
    fn test_failed_transition_keeps_state() {
        let (instance, probe) = instance("custom:\n  device: cuda\n");
        let devices = manager();
        probe.fail_precision_changes(true);

        let err = devices.demote(&instance).unwrap_err();
        assert!(matches!(err, TtsError::Device(_)));
        // Device move succeeded, precision change did not.
        assert_eq!(instance.state().device, ComputeDevice::Cpu);
        assert_eq!(instance.state().precision, Precision::Full);

        probe.fail_precision_changes(false);
        devices.demote(&instance).unwrap();
        assert_eq!(instance.state(), devices.host_state());
    }

    #[test]
    fn test_last_lease_demotes() {
        let (instance, _) = instance("custom:\n  device: cuda\n");
        let instance = Arc::new(instance);
        let devices = manager();

        let first = devices.lease(Arc::clone(&instance));
        let second = devices.lease(Arc::clone(&instance));
        first.promote().unwrap();
        second.promote().unwrap();
        assert_eq!(instance.users(), 2);

        first.finish(true).unwrap();
        assert_eq!(instance.state().residency(), Residency::OnAccelerator);

        // Direct demotion also waits for the remaining lease.
        devices.demote(&instance).unwrap();
        assert_eq!(instance.state().residency(), Residency::OnAccelerator);

        second.finish(true).unwrap();
        assert_eq!(instance.users(), 0);
        assert_eq!(instance.state().residency(), Residency::OnHost);
    }

    #[test]
    fn test_last_lease_may_keep_hot() {
        let (instance, _) = instance("custom:\n  device: cuda\n");
        let instance = Arc::new(instance);
        let devices = manager();

        let lease = devices.lease(Arc::clone(&instance));
        lease.promote().unwrap();
        lease.finish(false).unwrap();
        assert_eq!(instance.state().residency(), Residency::OnAccelerator);
        assert_eq!(instance.users(), 0);
    }

    #[test]
    fn test_dropped_lease_demotes() {
        let (instance, _) = instance("custom:\n  device: cuda\n");
        let instance = Arc::new(instance);
        let devices = manager();

        {
            let lease = devices.lease(Arc::clone(&instance));
            lease.promote().unwrap();
        }
        assert_eq!(instance.users(), 0);
        assert_eq!(instance.state().residency(), Residency::OnHost);
    }
}
