use anyhow::Context;
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::mem::{MemoryRequest, OperationKind};
use crate::timeq::Cycle;
use crate::traffic::config::TrafficConfig;
use crate::utils::bits;

const USER_TEXT_BASE: u64 = 0x0000_0000_0040_0000;
const KERNEL_TEXT_BASE: u64 = 0xffff_ffff_8100_0000;
const TEXT_SPAN: u64 = 0x10_0000;

/// Draws synthetic requests: kind from the configured mix, address from a per-thread window of
/// lines, owner RIP from user or kernel text.
#[derive(Debug)]
pub struct PatternEngine {
    rng: StdRng,
    kinds: Vec<OperationKind>,
    weights: WeightedIndex<u32>,
    line_bytes: u64,
    window_lines: u64,
    base_address: u64,
    kernel_fraction: f64,
}

impl PatternEngine {
    pub fn new(config: &TrafficConfig) -> anyhow::Result<Self> {
        let weights = WeightedIndex::new(config.mix.iter().map(|entry| entry.weight))
            .context("invalid operation mix weights")?;
        Ok(Self {
            rng: StdRng::seed_from_u64(config.seed),
            kinds: config.mix.iter().map(|entry| entry.kind).collect(),
            weights,
            line_bytes: config.line_bytes,
            window_lines: config.window_lines,
            base_address: config.base_address,
            kernel_fraction: config.kernel_fraction,
        })
    }

    pub fn draw(
        &mut self,
        core_id: usize,
        thread_id: usize,
        rob_id: i32,
        now: Cycle,
        owner_uuid: u64,
    ) -> MemoryRequest {
        let kind = self.kinds[self.weights.sample(&mut self.rng)];
        let is_instruction = kind == OperationKind::Fetch;

        let line = self.rng.gen_range(0..self.window_lines);
        let address = self.thread_base(core_id, thread_id) + line * self.line_bytes;

        let text_base = if self.rng.gen_bool(self.kernel_fraction) {
            KERNEL_TEXT_BASE
        } else {
            USER_TEXT_BASE
        };
        let owner_rip = text_base + (self.rng.gen_range(0..TEXT_SPAN) & !0x3);
        let physical_address = if is_instruction {
            self.fetch_line(owner_rip)
        } else {
            address
        };

        MemoryRequest::new(
            core_id,
            thread_id,
            physical_address,
            rob_id,
            now,
            is_instruction,
            owner_rip,
            owner_uuid,
            kind,
        )
    }

    // Line holding the instruction at `rip`, within the 48-bit physical space.
    fn fetch_line(&self, rip: u64) -> u64 {
        let addr = bits(rip, 0, 48);
        addr - addr % self.line_bytes
    }

    fn thread_base(&self, core_id: usize, thread_id: usize) -> u64 {
        let window_bytes = self.window_lines * self.line_bytes;
        let slot = ((core_id as u64) << 8) | thread_id as u64;
        self.base_address + slot * window_bytes
    }
}
