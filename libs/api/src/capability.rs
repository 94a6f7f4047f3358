//! Node capability keys.
//!
//! Labels describe the hardware class and are written by the node agent.
//! Annotations carry fast-changing runtime state (utilization, cost).

/// Prefix applied to every capability key unless overridden.
pub const DEFAULT_LABEL_PREFIX: &str = "flexinfer.ai/";

/// Fully-prefixed capability label and annotation keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityKeys {
    pub prefix: String,

    // Labels
    pub gpu_vendor: String,
    pub gpu_vram: String,
    pub gpu_arch: String,
    pub gpu_int4: String,
    pub gpu_count: String,
    pub cpu_avx512: String,

    // Annotations
    pub gpu_util: String,
    pub cost: String,
}

impl CapabilityKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let key = |suffix: &str| format!("{prefix}{suffix}");
        Self {
            gpu_vendor: key("gpu.vendor"),
            gpu_vram: key("gpu.vram"),
            gpu_arch: key("gpu.arch"),
            gpu_int4: key("gpu.int4"),
            gpu_count: key("gpu.count"),
            cpu_avx512: key("cpu.avx512"),
            gpu_util: key("gpu.util"),
            cost: key("cost"),
            prefix,
        }
    }

    /// All label keys, in a stable order.
    pub fn label_keys(&self) -> [&str; 6] {
        [
            self.gpu_vendor.as_str(),
            self.gpu_vram.as_str(),
            self.gpu_arch.as_str(),
            self.gpu_int4.as_str(),
            self.gpu_count.as_str(),
            self.cpu_avx512.as_str(),
        ]
    }
}

impl Default for CapabilityKeys {
    fn default() -> Self {
        Self::new(DEFAULT_LABEL_PREFIX)
    }
}
