//! Compute device capabilities.

use std::fmt;

use serde::{Deserialize, Serialize};

/// `major.minor` version pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Decode the packed `1000 * major + 10 * minor` form used by driver queries.
    pub const fn from_packed(packed: u32) -> Self {
        Self {
            major: packed / 1000,
            minor: (packed % 100) / 10,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Optional device features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceFeatures {
    pub ecc: bool,
    pub unified_addressing: bool,
    pub concurrent_kernels: bool,
}

/// Capabilities of one compute device, as reported by the runtime.
///
/// Immutable after selection. Re-queried only when the device session is
/// re-initialised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub index: u32,
    pub name: String,
    /// Runtime backend that produced this descriptor ("host", "vulkan", ...)
    pub backend: String,
    pub driver_version: Version,
    pub runtime_version: Version,
    pub compute_capability: Version,
    /// Bytes
    pub total_memory: u64,
    pub constant_memory: u64,
    pub shared_memory_per_block: u64,
    /// Largest single buffer allocation in bytes
    pub max_buffer_size: u64,
    pub warp_size: u32,
    pub multiprocessor_count: u32,
    pub max_threads_per_block: u32,
    pub max_threads_per_multiprocessor: u32,
    pub max_block_dims: [u32; 3],
    pub max_grid_dims: [u32; 3],
    pub features: DeviceFeatures,
}

impl DeviceDescriptor {
    /// Multi-line capability report, one property per line.
    pub fn report(&self) -> String {
        let yes_no = |b: bool| if b { "Yes" } else { "No" };
        let [bx, by, bz] = self.max_block_dims;
        let [gx, gy, gz] = self.max_grid_dims;
        let lines = [
            format!("Device {}: {} ({})", self.index, self.name, self.backend),
            format!(
                "  Driver Version / Runtime Version          {} / {}",
                self.driver_version, self.runtime_version
            ),
            format!("  Compute capability                        {}", self.compute_capability),
            format!(
                "  Total global memory                       {:.1} MBytes ({} bytes)",
                self.total_memory as f64 / 1_048_576.0,
                self.total_memory
            ),
            format!("  Largest buffer                            {} bytes", self.max_buffer_size),
            format!("  Constant memory                           {} bytes", self.constant_memory),
            format!("  Shared memory per block                   {} bytes", self.shared_memory_per_block),
            format!("  Multiprocessors                           {}", self.multiprocessor_count),
            format!("  Warp size                                 {}", self.warp_size),
            format!("  Max threads per multiprocessor            {}", self.max_threads_per_multiprocessor),
            format!("  Max threads per block                     {}", self.max_threads_per_block),
            format!("  Max block dimensions                      {bx} x {by} x {bz}"),
            format!("  Max grid dimensions                       {gx} x {gy} x {gz}"),
            format!("  Concurrent kernel execution               {}", yes_no(self.features.concurrent_kernels)),
            format!("  ECC enabled                               {}", yes_no(self.features.ecc)),
            format!("  Unified addressing                        {}", yes_no(self.features.unified_addressing)),
        ];
        lines.join("\n")
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] (compute {}, {} MB)",
            self.name,
            self.backend,
            self.compute_capability,
            self.total_memory / 1_048_576
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packed_version() {
        assert_eq!(Version::from_packed(12020), Version::new(12, 2));
        assert_eq!(Version::from_packed(5050).to_string(), "5.5");
    }
}
