//! Device enumeration and selection.

use tracing::{debug, error, info, warn};

use super::{DeviceDescriptor, ExecutionConfig, Version};
use crate::core::ComputeRuntime;
use crate::Result;

/// Finds compute devices, selects one and derives the launch tile.
///
/// With zero devices the manager stays in "no device" mode: no
/// descriptor, an all-zero [`ExecutionConfig`], and every render call
/// downstream becomes a no-op.
#[derive(Debug, Clone, Default)]
pub struct DeviceManager {
    device_count: u32,
    descriptor: Option<DeviceDescriptor>,
    execution: ExecutionConfig,
    tile_override: Option<[u32; 3]>,
    description: String,
    profile: String,
}

impl DeviceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Manager that derives its tile from `tile` instead of the 8x8x1 default.
    pub fn with_tile(tile: Option<[u32; 3]>) -> Self {
        Self {
            tile_override: tile,
            ..Self::default()
        }
    }

    /// Count devices and log a capability report for each.
    ///
    /// A failing count query is treated as zero devices.
    #[tracing::instrument(skip_all)]
    pub fn enumerate<R: ComputeRuntime + ?Sized>(&mut self, runtime: &R) -> u32 {
        let count = match runtime.device_count() {
            Ok(n) => n,
            Err(e) => {
                warn!("device count query failed: {e}");
                0
            }
        };
        self.device_count = count;

        if count == 0 {
            info!("no compute device available, rendering disabled");
        } else {
            info!("found {count} compute device(s)");
        }

        let mut names = Vec::new();
        let mut versions = (Version::default(), Version::default());
        for index in 0..count {
            match runtime.device_properties(index) {
                Ok(desc) => {
                    for line in desc.report().lines() {
                        info!("{line}");
                    }
                    versions = (desc.driver_version, desc.runtime_version);
                    names.push(desc.name);
                }
                Err(e) => warn!("device {index}: properties unavailable: {e}"),
            }
        }

        let mut profile = format!(
            "deviceQuery, Driver = {}, Driver Version = {}, Runtime Version = {}, NumDevs = {count}",
            runtime.backend_name(),
            versions.0,
            versions.1
        );
        for name in names.iter().take(2) {
            profile.push_str(", Device = ");
            profile.push_str(name);
        }
        debug!("{profile}");
        self.profile = profile;

        count
    }

    /// Select device `index` and record its capabilities.
    ///
    /// On failure the previous descriptor is kept.
    #[tracing::instrument(skip(self, runtime))]
    pub fn select_and_query<R: ComputeRuntime + ?Sized>(
        &mut self,
        runtime: &mut R,
        index: u32,
    ) -> Result<&DeviceDescriptor> {
        let desc = runtime
            .select_device(index)
            .and_then(|()| runtime.device_properties(index))
            .inspect_err(|e| error!("cannot select device {index}: {e}"))?;

        info!("selected device {index}: {desc}");
        self.description = desc.name.clone();
        let desc: &DeviceDescriptor = self.descriptor.insert(desc);
        Ok(desc)
    }

    /// Derive and store the launch tile for the selected device.
    pub fn derive_execution_config(&mut self) -> ExecutionConfig {
        self.execution = ExecutionConfig::derive(self.descriptor.as_ref(), self.tile_override);
        debug!(
            x = self.execution.x,
            y = self.execution.y,
            z = self.execution.z,
            "execution config"
        );
        self.execution
    }

    /// Forget the selected device, as after device loss.
    pub fn reset(&mut self) {
        self.descriptor = None;
        self.execution = ExecutionConfig::ZERO;
        self.description.clear();
    }

    pub fn device_count(&self) -> u32 {
        self.device_count
    }

    pub fn descriptor(&self) -> Option<&DeviceDescriptor> {
        self.descriptor.as_ref()
    }

    pub fn has_device(&self) -> bool {
        self.descriptor.is_some()
    }

    pub fn execution_config(&self) -> ExecutionConfig {
        self.execution
    }

    /// Name of the selected device, empty when none.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// One-line summary of the last enumeration.
    pub fn profile_string(&self) -> &str {
        &self.profile
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{HostRuntime, HostRuntimeConfig, NullRuntime};

    #[test]
    fn test_no_device_mode() {
        let mut runtime = NullRuntime::new();
        let mut mgr = DeviceManager::new();
        assert_eq!(mgr.enumerate(&runtime), 0);
        assert!(mgr.select_and_query(&mut runtime, 0).is_err());
        assert!(!mgr.has_device());
        assert_eq!(mgr.derive_execution_config(), ExecutionConfig::ZERO);
        assert!(mgr.profile_string().contains("NumDevs = 0"));
    }

    #[test]
    fn test_profile_lists_first_two_devices() {
        let runtime = HostRuntime::new(HostRuntimeConfig {
            devices: 3,
            ..Default::default()
        });
        let mut mgr = DeviceManager::new();
        assert_eq!(mgr.enumerate(&runtime), 3);
        let profile = mgr.profile_string();
        assert!(profile.starts_with("deviceQuery, Driver = host"));
        assert_eq!(profile.matches(", Device = ").count(), 2);
    }

    #[test]
    fn test_failed_selection_keeps_previous() {
        let mut runtime = HostRuntime::new(HostRuntimeConfig::default());
        let mut mgr = DeviceManager::new();
        mgr.enumerate(&runtime);
        mgr.select_and_query(&mut runtime, 0).unwrap();
        let before = mgr.descriptor().cloned();
        assert!(mgr.select_and_query(&mut runtime, 7).is_err());
        assert_eq!(mgr.descriptor().cloned(), before);
        assert_eq!(mgr.derive_execution_config(), ExecutionConfig::new(8, 8, 1));
    }
}
