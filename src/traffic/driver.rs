use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::debug;
use serde::Serialize;
use smallvec::SmallVec;

use crate::mem::{
    CallbackSignal, MemoryRequest, OperationKind, PoolError, PoolLimits, PoolStats, RefRelease,
    RequestHandle, RequestPool, Signal, OPERATION_NAMES,
};
use crate::timeq::{Cycle, Ticket};
use crate::traffic::config::TrafficConfig;
use crate::traffic::patterns::PatternEngine;

#[derive(Debug)]
struct Inflight {
    handle: RequestHandle,
    ticket: Ticket,
}

#[derive(Debug)]
struct CoalesceEntry {
    handle: RequestHandle,
    // cycles at which duplicates were folded into this request
    merged: SmallVec<[Cycle; 2]>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TrafficSummary {
    pub cycles: Cycle,
    pub issued: u64,
    pub coalesced: u64,
    pub completed: u64,
    pub notified: u64,
    pub kernel: u64,
    pub instruction: u64,
    pub pool_stalls: u64,
    // completions the core signal refused and were retried on a later cycle
    pub notify_refusals: u64,
    // cycles completions sat at the queue front past their ready cycle
    pub notify_delay: Cycle,
    // cycles merged duplicates waited between folding in and completion
    pub coalesced_wait: Cycle,
    pub per_kind: BTreeMap<&'static str, u64>,
    pub pool: PoolStats,
}

/// Drives synthetic requests through two tracking stages that share each request: a fixed-latency
/// service queue and a coalescing table keyed by request identity. Each stage holds one reference;
/// a duplicate folded into a live request adds one more, released when the request completes.
pub struct TrafficDriver {
    config: TrafficConfig,
    pool: RequestPool,
    engine: PatternEngine,
    inflight: VecDeque<Inflight>,
    coalescer: HashMap<MemoryRequest, CoalesceEntry>,
    signals: Vec<Arc<dyn Signal>>,
    notified: Vec<Arc<AtomicU64>>,
    issued_per_core: Vec<u64>,
    rob_cursor: Vec<u32>,
    next_uuid: u64,
    per_kind: [u64; OperationKind::COUNT],
    summary: TrafficSummary,
}

impl TrafficDriver {
    pub fn new(config: TrafficConfig, limits: PoolLimits) -> anyhow::Result<Self> {
        config.ensure_valid();
        let engine = PatternEngine::new(&config)?;

        let mut signals: Vec<Arc<dyn Signal>> = Vec::with_capacity(config.num_cores);
        let mut notified = Vec::with_capacity(config.num_cores);
        for core_id in 0..config.num_cores {
            let counter = Arc::new(AtomicU64::new(0));
            let sink = Arc::clone(&counter);
            signals.push(Arc::new(CallbackSignal::new(
                format!("core{core_id}_mem_done"),
                move |_: &MemoryRequest| {
                    sink.fetch_add(1, Ordering::Relaxed);
                    true
                },
            )));
            notified.push(counter);
        }

        let threads = config.num_cores * config.threads_per_core;
        Ok(Self {
            pool: RequestPool::new(limits),
            engine,
            inflight: VecDeque::new(),
            coalescer: HashMap::new(),
            signals,
            notified,
            issued_per_core: vec![0; config.num_cores],
            rob_cursor: vec![0; threads],
            next_uuid: 0,
            per_kind: [0; OperationKind::COUNT],
            summary: TrafficSummary::default(),
            config,
        })
    }

    pub fn pool(&self) -> &RequestPool {
        &self.pool
    }

    pub fn is_done(&self) -> bool {
        self.inflight.is_empty()
            && self
                .issued_per_core
                .iter()
                .all(|&issued| issued >= self.config.requests_per_core)
    }

    /// Run until all traffic drains or `timeout` cycles pass.
    pub fn run(&mut self, timeout: Cycle) -> TrafficSummary {
        let mut now = 0;
        while !self.is_done() && now < timeout {
            self.tick(now);
            now += 1;
        }
        self.summary.cycles = now;
        self.summary()
    }

    pub fn tick(&mut self, now: Cycle) {
        self.complete_ready(now);
        for core_id in 0..self.config.num_cores {
            self.issue(core_id, now);
        }
    }

    pub fn summary(&self) -> TrafficSummary {
        let mut summary = self.summary.clone();
        summary.notified = self.notified.iter().map(|n| n.load(Ordering::Relaxed)).sum();
        summary.per_kind = OPERATION_NAMES
            .iter()
            .zip(self.per_kind.iter())
            .filter(|(_, &count)| count > 0)
            .map(|(&name, &count)| (name, count))
            .collect();
        summary.pool = self.pool.stats();
        summary
    }

    fn issue(&mut self, core_id: usize, now: Cycle) {
        let issued = self.issued_per_core[core_id];
        if issued >= self.config.requests_per_core {
            return;
        }

        let thread_id = (issued % self.config.threads_per_core as u64) as usize;
        let slot = core_id * self.config.threads_per_core + thread_id;
        let rob_id = self.rob_cursor[slot] as i32;
        let request = self.engine.draw(core_id, thread_id, rob_id, now, self.next_uuid);

        let handle = match self.pool.insert(request) {
            Ok(handle) => handle,
            Err(err @ PoolError::Exhausted { .. }) => {
                // retry next cycle with a fresh draw
                debug!("core {} stalled at cycle {}: {}", core_id, now, err);
                self.summary.pool_stalls += 1;
                return;
            }
            Err(err) => panic!("unexpected pool error: {}", err),
        };

        self.issued_per_core[core_id] += 1;
        self.rob_cursor[slot] = (self.rob_cursor[slot] + 1) % self.config.rob_entries;
        self.next_uuid += 1;
        self.record_issue(handle);

        let key = self.pool.get(handle).clone();
        if let Some(entry) = self.coalescer.get_mut(&key) {
            self.pool.acquire(entry.handle);
            self.pool
                .get_mut(entry.handle)
                .record_hop(format_args!("merge@{}", now));
            entry.merged.push(now);
            self.summary.coalesced += 1;
            debug!("coalesced duplicate into {:?}", entry.handle);
            self.pool.free(handle);
            return;
        }

        let request = self.pool.get_mut(handle);
        request.set_core_signal(Some(Arc::clone(&self.signals[core_id])));
        request.record_hop(format_args!("issue@{}", now));
        // one reference for the coalescing table, one for the service queue
        self.pool.acquire(handle);
        self.pool.acquire(handle);
        self.coalescer.insert(
            key,
            CoalesceEntry {
                handle,
                merged: SmallVec::new(),
            },
        );
        self.inflight.push_back(Inflight {
            handle,
            ticket: Ticket::new(now, self.config.latency),
        });
    }

    fn record_issue(&mut self, handle: RequestHandle) {
        let request = self.pool.get(handle);
        self.summary.issued += 1;
        self.per_kind[request.kind().index()] += 1;
        if request.is_kernel() {
            self.summary.kernel += 1;
        }
        if request.is_instruction() {
            self.summary.instruction += 1;
        }
    }

    fn complete_ready(&mut self, now: Cycle) {
        while let Some(&Inflight { handle, ticket }) = self.inflight.front() {
            if !ticket.is_ready(now) {
                break;
            }

            // a refused completion stays at the front and blocks the queue until accepted
            let request = self.pool.get_mut(handle);
            let accepted = match request.core_signal() {
                Some(signal) => signal.notify(request),
                None => true,
            };
            if !accepted {
                request.record_hop(format_args!("refused@{}", now));
                debug!("notify refused at cycle {}: {}", now, request);
                self.summary.notify_refusals += 1;
                break;
            }
            self.inflight.pop_front();

            request.record_hop(format_args!("done@{}+{}", now, now - ticket.issued_at()));
            debug!("complete {}", request);
            self.summary.notify_delay += now - ticket.ready_at();

            let key = request.clone();
            let entry = self
                .coalescer
                .remove(&key)
                .expect("in-flight request missing from coalescing table");
            debug_assert_eq!(entry.handle, handle);
            self.summary.coalesced_wait += entry.merged.iter().map(|&at| now - at).sum::<Cycle>();

            // merged duplicates, then the table, then the queue
            let holders = entry.merged.len() + 2;
            for _ in 0..holders {
                if let RefRelease::LastHolder = self.pool.release_ref(handle) {
                    self.pool.free(handle);
                }
            }
            self.summary.completed += 1;
        }
    }
}
