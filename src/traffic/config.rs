use serde::Deserialize;

use crate::mem::OperationKind;
use crate::sim::config::Config;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TrafficConfig {
    pub num_cores: usize,
    pub threads_per_core: usize,
    pub requests_per_core: u64,
    /// Cycles between issue and completion of a request.
    pub latency: u64,
    pub line_bytes: u64,
    /// Distinct lines each thread touches; small windows produce coalescing.
    pub window_lines: u64,
    pub base_address: u64,
    /// ROB slots cycled through per thread.
    pub rob_entries: u32,
    /// Probability that a request comes from kernel code.
    pub kernel_fraction: f64,
    pub seed: u64,
    pub mix: Vec<KindWeight>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct KindWeight {
    pub kind: OperationKind,
    pub weight: u32,
}

impl KindWeight {
    pub fn new(kind: OperationKind, weight: u32) -> Self {
        Self { kind, weight }
    }
}

impl Config for TrafficConfig {
    const SECTION: &'static str = "traffic";
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            num_cores: 2,
            threads_per_core: 1,
            requests_per_core: 1000,
            latency: 20,
            line_bytes: 64,
            window_lines: 16,
            base_address: 0x1000_0000,
            rob_entries: 8,
            kernel_fraction: 0.1,
            seed: 0,
            mix: vec![
                KindWeight::new(OperationKind::Load, 6),
                KindWeight::new(OperationKind::Store, 3),
                KindWeight::new(OperationKind::Fetch, 2),
                KindWeight::new(OperationKind::Prefetch, 1),
            ],
        }
    }
}

impl TrafficConfig {
    /// Panics on configurations the generator cannot draw from.
    pub fn ensure_valid(&self) {
        assert!(self.num_cores > 0, "num_cores must be > 0");
        assert!(self.threads_per_core > 0, "threads_per_core must be > 0");
        assert!(self.line_bytes > 0, "line_bytes must be > 0");
        assert!(self.window_lines > 0, "window_lines must be > 0");
        assert!(self.rob_entries > 0, "rob_entries must be > 0");
        assert!(
            (0.0..=1.0).contains(&self.kernel_fraction),
            "kernel_fraction must be within [0, 1]"
        );
        assert!(
            self.mix.iter().any(|entry| entry.weight > 0),
            "operation mix must have a non-zero weight"
        );
        for entry in &self.mix {
            assert!(
                entry.kind.is_valid(),
                "operation mix cannot contain {}",
                entry.kind
            );
        }
    }
}
