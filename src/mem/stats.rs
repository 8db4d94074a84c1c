use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PoolStats {
    allocations: u64,
    releases: u64,
    live: u64,
    peak_live: u64,
    slabs: u64,
    exhausted: u64,
}

impl PoolStats {
    pub fn allocations(&self) -> u64 {
        self.allocations
    }

    pub fn releases(&self) -> u64 {
        self.releases
    }

    pub fn live(&self) -> u64 {
        self.live
    }

    pub fn peak_live(&self) -> u64 {
        self.peak_live
    }

    pub fn slabs(&self) -> u64 {
        self.slabs
    }

    /// Allocation attempts refused because the slab cap was reached.
    pub fn exhausted(&self) -> u64 {
        self.exhausted
    }

    pub fn record_allocate(&mut self, count: u64) {
        self.allocations = self.allocations.saturating_add(count);
        self.live = self.live.saturating_add(count);
        self.peak_live = self.peak_live.max(self.live);
    }

    pub fn record_release(&mut self) {
        self.releases = self.releases.saturating_add(1);
        self.live = self.live.saturating_sub(1);
    }

    pub fn record_slab(&mut self) {
        self.slabs = self.slabs.saturating_add(1);
    }

    pub fn record_exhausted(&mut self) {
        self.exhausted = self.exhausted.saturating_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::PoolStats;

    #[test]
    fn tracks_peak_across_releases() {
        let mut stats = PoolStats::default();
        stats.record_allocate(3);
        stats.record_release();
        stats.record_release();
        stats.record_allocate(1);
        assert_eq!(stats.allocations(), 4);
        assert_eq!(stats.releases(), 2);
        assert_eq!(stats.live(), 2);
        assert_eq!(stats.peak_live(), 3);
    }

    #[test]
    fn serializes_all_counters() {
        let mut stats = PoolStats::default();
        stats.record_slab();
        stats.record_exhausted();
        let json = serde_json::to_value(stats).unwrap();
        assert_eq!(json["slabs"], 1);
        assert_eq!(json["exhausted"], 1);
        assert_eq!(json["live"], 0);
    }
}
