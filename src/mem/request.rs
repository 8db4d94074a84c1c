use std::fmt::{self, Write as _};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use super::ops::OperationKind;
use super::signal::Signal;
use crate::utils::bits;
use crate::Cycle;

/// One in-flight access to the memory hierarchy.
///
/// Identity fields are fixed at issue; only the operation kind, physical address, ROB id,
/// reference counter, history and completion signal change afterwards. The reference counter is
/// advisory: it is adjusted by whichever stages hold the request and is never used here to decide
/// when the request dies.
pub struct MemoryRequest {
    core_signal: Option<Arc<dyn Signal>>,
    history: String,

    physical_address: u64,
    init_cycle: Cycle,

    owner_rip: u64,
    owner_uuid: u64,
    core_id: usize,
    thread_id: usize,
    ref_counter: i32,
    rob_id: i32,

    kind: OperationKind,
    is_data: bool,
}

impl MemoryRequest {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        core_id: usize,
        thread_id: usize,
        physical_address: u64,
        rob_id: i32,
        init_cycle: Cycle,
        is_instruction: bool,
        owner_rip: u64,
        owner_uuid: u64,
        kind: OperationKind,
    ) -> Self {
        Self {
            core_signal: None,
            history: String::new(),
            physical_address,
            init_cycle,
            owner_rip,
            owner_uuid,
            core_id,
            thread_id,
            ref_counter: 0,
            rob_id,
            kind,
            is_data: !is_instruction,
        }
    }

    pub fn inc_ref_counter(&mut self) {
        self.ref_counter += 1;
    }

    /// Returns the counter after the decrement.
    pub fn dec_ref_counter(&mut self) -> i32 {
        self.ref_counter -= 1;
        self.ref_counter
    }

    pub fn core_id(&self) -> usize {
        self.core_id
    }

    pub fn thread_id(&self) -> usize {
        self.thread_id
    }

    pub fn init_cycle(&self) -> Cycle {
        self.init_cycle
    }

    pub fn owner_rip(&self) -> u64 {
        self.owner_rip
    }

    pub fn owner_uuid(&self) -> u64 {
        self.owner_uuid
    }

    pub fn physical_address(&self) -> u64 {
        self.physical_address
    }

    pub fn ref_counter(&self) -> i32 {
        self.ref_counter
    }

    pub fn rob_id(&self) -> i32 {
        self.rob_id
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn type_literal(&self) -> &'static str {
        self.kind.name()
    }

    pub fn is_data(&self) -> bool {
        self.is_data
    }

    pub fn is_instruction(&self) -> bool {
        !self.is_data
    }

    /// Privilege of the issuing instruction: any of RIP bits 48..63 set means kernel space.
    pub fn is_kernel(&self) -> bool {
        bits(self.owner_rip, 48, 16) != 0
    }

    /// Panics unless `kind` is a concrete operation.
    pub fn set_type(&mut self, kind: OperationKind) {
        assert!(
            kind.is_valid() && kind.index() < OperationKind::COUNT,
            "invalid operation type {:?} for request",
            kind
        );
        self.kind = kind;
    }

    pub fn set_physical_address(&mut self, addr: u64) {
        self.physical_address = addr;
    }

    pub fn set_ref_counter(&mut self, ref_counter: i32) {
        self.ref_counter = ref_counter;
    }

    pub fn set_rob_id(&mut self, rob_id: i32) {
        self.rob_id = rob_id;
    }

    pub fn history(&self) -> &str {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut String {
        &mut self.history
    }

    /// Append one hop to the history, e.g. `req.record_hop(format_args!("L1[{}] miss", cycle))`.
    pub fn record_hop(&mut self, hop: fmt::Arguments<'_>) {
        // writing to a String cannot fail
        let _ = self.history.write_fmt(hop);
        self.history.push(' ');
    }

    pub fn core_signal(&self) -> Option<&Arc<dyn Signal>> {
        self.core_signal.as_ref()
    }

    pub fn set_core_signal(&mut self, signal: Option<Arc<dyn Signal>>) {
        self.core_signal = signal;
    }
}

impl Default for MemoryRequest {
    fn default() -> Self {
        Self::new(0, 0, 0, 0, 0, false, 0, 0, OperationKind::Invalid)
    }
}

/// Copy of the addressing and identity fields. The copy starts with a zero reference count, an
/// empty history and no signal.
impl Clone for MemoryRequest {
    fn clone(&self) -> Self {
        Self {
            core_signal: None,
            history: String::new(),
            physical_address: self.physical_address,
            init_cycle: self.init_cycle,
            owner_rip: self.owner_rip,
            owner_uuid: self.owner_uuid,
            core_id: self.core_id,
            thread_id: self.thread_id,
            ref_counter: 0,
            rob_id: self.rob_id,
            kind: self.kind,
            is_data: self.is_data,
        }
    }
}

// Equality covers what decides whether two requests can be coalesced; timing, counter, history
// and signal are ignored.
impl PartialEq for MemoryRequest {
    fn eq(&self, other: &Self) -> bool {
        self.core_id == other.core_id
            && self.thread_id == other.thread_id
            && self.rob_id == other.rob_id
            && self.physical_address == other.physical_address
            && self.kind == other.kind
            && self.is_data == other.is_data
    }
}

impl Eq for MemoryRequest {}

impl Hash for MemoryRequest {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.core_id.hash(state);
        self.thread_id.hash(state);
        self.rob_id.hash(state);
        self.physical_address.hash(state);
        self.kind.hash(state);
        self.is_data.hash(state);
    }
}

impl fmt::Display for MemoryRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Memory Request: core[{}] ", self.core_id)?;
        write!(f, "thread[{}] ", self.thread_id)?;
        write!(f, "address[0x{:012x}] ", bits(self.physical_address, 0, 48))?;
        write!(f, "robid[{}] ", self.rob_id)?;
        write!(f, "init-cycle[{}] ", self.init_cycle)?;
        write!(f, "ref-counter[{}] ", self.ref_counter)?;
        write!(f, "op-type[{}] ", self.type_literal())?;
        write!(f, "isData[{}] ", self.is_data as u8)?;
        write!(f, "ownerUUID[{}] ", self.owner_uuid)?;
        write!(f, "ownerRIP[{:#x}] ", self.owner_rip)?;
        write!(f, "History[ {}] ", self.history)?;
        if let Some(signal) = &self.core_signal {
            write!(f, "Signal[ {}] ", signal.name())?;
        }
        Ok(())
    }
}

impl fmt::Debug for MemoryRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryRequest")
            .field("core_id", &self.core_id)
            .field("thread_id", &self.thread_id)
            .field("physical_address", &format_args!("{:#x}", self.physical_address))
            .field("rob_id", &self.rob_id)
            .field("init_cycle", &self.init_cycle)
            .field("ref_counter", &self.ref_counter)
            .field("kind", &self.kind)
            .field("is_data", &self.is_data)
            .field("owner_rip", &format_args!("{:#x}", self.owner_rip))
            .field("owner_uuid", &self.owner_uuid)
            .field("signal", &self.core_signal.as_ref().map(|s| s.name().to_string()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::mem::CallbackSignal;

    fn load(addr: u64, rob_id: i32, cycle: Cycle) -> MemoryRequest {
        MemoryRequest::new(0, 0, addr, rob_id, cycle, false, 0x400000, 1, OperationKind::Load)
    }

    fn load_from(owner_rip: u64) -> MemoryRequest {
        MemoryRequest::new(0, 0, 0, 0, 0, false, owner_rip, 0, OperationKind::Load)
    }

    fn done_signal(name: &str) -> Option<Arc<dyn Signal>> {
        Some(Arc::new(CallbackSignal::new(name, |_: &MemoryRequest| true)))
    }

    #[test]
    fn new_request_starts_clean() {
        let req = MemoryRequest::new(
            2,
            1,
            0xdead_b000,
            17,
            42,
            true,
            0x401000,
            77,
            OperationKind::Fetch,
        );
        assert_eq!(req.core_id(), 2);
        assert_eq!(req.thread_id(), 1);
        assert_eq!(req.physical_address(), 0xdead_b000);
        assert_eq!(req.rob_id(), 17);
        assert_eq!(req.init_cycle(), 42);
        assert!(req.is_instruction());
        assert!(!req.is_data());
        assert_eq!(req.owner_rip(), 0x401000);
        assert_eq!(req.owner_uuid(), 77);
        assert_eq!(req.kind(), OperationKind::Fetch);
        assert_eq!(req.ref_counter(), 0);
        assert!(req.history().is_empty());
        assert!(req.core_signal().is_none());
    }

    #[test]
    fn refcount_scenario() {
        let mut req = load(0x1000, 5, 100);
        req.inc_ref_counter();
        req.inc_ref_counter();
        assert_eq!(req.dec_ref_counter(), 1);
        assert_eq!(req.ref_counter(), 1);
        assert_eq!(req.type_literal(), "LOAD");

        let other = MemoryRequest::new(3, 3, 0, 0, 999, false, 0, 0, OperationKind::Store);
        let mut copy = other.clone();
        assert_ne!(copy, req);
        copy = req.clone();
        copy.set_rob_id(5);
        copy.set_physical_address(0x1000);
        assert_eq!(copy, req);
    }

    #[test]
    fn copy_gets_fresh_counter_history_and_no_signal() {
        let kernel_rip = 0xffff_8000_0000_1000;
        let mut req =
            MemoryRequest::new(1, 0, 0x80, 9, 7, false, kernel_rip, 55, OperationKind::Store);
        req.inc_ref_counter();
        req.record_hop(format_args!("L1 miss"));
        req.set_core_signal(done_signal("done"));

        let mut copy = req.clone();
        assert_eq!(copy.core_id(), req.core_id());
        assert_eq!(copy.thread_id(), req.thread_id());
        assert_eq!(copy.physical_address(), req.physical_address());
        assert_eq!(copy.kind(), req.kind());
        assert_eq!(copy.owner_rip(), req.owner_rip());
        assert_eq!(copy.owner_uuid(), req.owner_uuid());
        assert_eq!(copy.rob_id(), req.rob_id());
        assert_eq!(copy.init_cycle(), req.init_cycle());
        assert_eq!(copy.ref_counter(), 0);
        assert!(copy.history().is_empty());
        assert!(copy.core_signal().is_none());

        copy.history_mut().push_str("L2 hit");
        assert_eq!(req.history(), "L1 miss ");
        req.record_hop(format_args!("L2 fill"));
        assert_eq!(copy.history(), "L2 hit");
    }

    #[test]
    fn equality_ignores_timing_counter_and_history() {
        let a = load(0x1000, 5, 100);
        let mut b = load(0x1000, 5, 250);
        b.set_ref_counter(4);
        b.record_hop(format_args!("queued"));
        assert_eq!(a, b);

        let set: HashSet<_> = [a.clone(), b.clone()].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn each_identity_field_breaks_equality() {
        let base = load(0x1000, 5, 100);
        let variants = [
            MemoryRequest::new(1, 0, 0x1000, 5, 100, false, 0x400000, 1, OperationKind::Load),
            MemoryRequest::new(0, 1, 0x1000, 5, 100, false, 0x400000, 1, OperationKind::Load),
            MemoryRequest::new(0, 0, 0x1000, 6, 100, false, 0x400000, 1, OperationKind::Load),
            MemoryRequest::new(0, 0, 0x1040, 5, 100, false, 0x400000, 1, OperationKind::Load),
            MemoryRequest::new(0, 0, 0x1000, 5, 100, false, 0x400000, 1, OperationKind::Store),
            MemoryRequest::new(0, 0, 0x1000, 5, 100, true, 0x400000, 1, OperationKind::Load),
        ];
        for variant in &variants {
            assert_ne!(&base, variant);
        }
        // owner fields are not part of identity
        let other_owner =
            MemoryRequest::new(0, 0, 0x1000, 5, 100, false, 0x500000, 2, OperationKind::Load);
        assert_eq!(base, other_owner);
    }

    #[test]
    fn set_type_updates_literal() {
        let mut req = load(0x40, 0, 0);
        req.set_type(OperationKind::Evict);
        assert_eq!(req.kind(), OperationKind::Evict);
        assert_eq!(req.type_literal(), "EVICT");
    }

    #[test]
    #[should_panic(expected = "invalid operation type")]
    fn set_type_rejects_invalid() {
        let mut req = load(0x40, 0, 0);
        req.set_type(OperationKind::Invalid);
    }

    #[test]
    fn kernel_classification_uses_high_rip_bits() {
        assert!(!load_from(0x0000400000).is_kernel());
        assert!(!load_from(0x0000_7fff_ffff_ffff).is_kernel());
        assert!(load_from(0xffff_ffff_8100_0000).is_kernel());
        assert!(load_from(1 << 48).is_kernel());
    }

    #[test]
    fn display_renders_every_field() {
        let mut req =
            MemoryRequest::new(1, 2, 0x1000, 5, 100, false, 0x400123, 88, OperationKind::Load);
        req.inc_ref_counter();
        req.record_hop(format_args!("L1D"));
        let text = req.to_string();
        assert_eq!(
            text,
            "Memory Request: core[1] thread[2] address[0x000000001000] robid[5] \
             init-cycle[100] ref-counter[1] op-type[LOAD] isData[1] ownerUUID[88] \
             ownerRIP[0x400123] History[ L1D ] "
        );

        req.set_core_signal(done_signal("dcache_done"));
        assert!(req.to_string().ends_with("Signal[ dcache_done] "));
    }

    #[test]
    fn address_renders_as_48_bits() {
        let mut req = load(0xabcd_1234_5678_9000, 0, 0);
        assert!(req.to_string().contains("address[0x123456789000] "));
        assert_eq!(req.physical_address(), 0xabcd_1234_5678_9000);
        req.set_physical_address(0xffff_ffff_ffff);
        assert!(req.to_string().contains("address[0xffffffffffff] "));
        assert_eq!(req.physical_address(), 0xffff_ffff_ffff);
    }

    #[test]
    fn default_request_is_invalid_placeholder() {
        let req = MemoryRequest::default();
        assert_eq!(req.kind(), OperationKind::Invalid);
        assert_eq!(req.type_literal(), "INVALID");
        assert!(req.is_data());
    }
}
