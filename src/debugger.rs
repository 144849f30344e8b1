use alloc::vec::Vec;
use serde::{Deserialize, Serialize};

use crate::consts::LOG_BUFFER_CAPACITY;

// A single breakpoint or watchpoint
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub struct Guard {
    addr: u16,
    enabled: bool,
    hits: u64,
    skip: u64,
}

impl Guard {
    #[inline]
    #[must_use]
    pub fn addr(&self) -> u16 {
        self.addr
    }

    #[inline]
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[inline]
    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits
    }

    #[inline]
    #[must_use]
    pub fn skip(&self) -> u64 {
        self.skip
    }

    fn eval(&mut self, addr: u16) -> bool {
        if self.addr == addr && self.enabled {
            self.hits += 1;
            if self.hits > self.skip {
                return true;
            }
        }
        false
    }
}

// A collection of guards, used for both breakpoints and watchpoints
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Guards {
    guards: Vec<Guard>,
    needs_check: bool,
}

impl Guards {
    #[must_use]
    pub fn elements(&self) -> usize {
        self.guards.len()
    }

    #[must_use]
    pub fn guard_with_nr(&self, nr: usize) -> Option<&Guard> {
        self.guards.get(nr)
    }

    #[must_use]
    pub fn guard_at_addr(&self, addr: u16) -> Option<&Guard> {
        self.guards.iter().find(|g| g.addr == addr)
    }

    #[must_use]
    pub fn is_set_at(&self, addr: u16) -> bool {
        self.guard_at_addr(addr).is_some()
    }

    #[must_use]
    pub fn is_set_and_enabled_at(&self, addr: u16) -> bool {
        self.guard_at_addr(addr).map_or(false, |g| g.enabled)
    }

    #[must_use]
    pub fn is_set_and_disabled_at(&self, addr: u16) -> bool {
        self.guard_at_addr(addr).map_or(false, |g| !g.enabled)
    }

    pub fn add_at(&mut self, addr: u16, skip: u64) {
        if self.is_set_at(addr) {
            return;
        }
        self.guards.push(Guard {
            addr,
            enabled: true,
            hits: 0,
            skip,
        });
        self.needs_check = true;
    }

    pub fn remove_at(&mut self, addr: u16) {
        self.guards.retain(|g| g.addr != addr);
        self.needs_check = !self.guards.is_empty();
    }

    pub fn remove(&mut self, nr: usize) {
        if nr < self.guards.len() {
            self.guards.remove(nr);
        }
        self.needs_check = !self.guards.is_empty();
    }

    pub fn remove_all(&mut self) {
        self.guards.clear();
        self.needs_check = false;
    }

    pub fn set_enable(&mut self, nr: usize, value: bool) {
        if let Some(guard) = self.guards.get_mut(nr) {
            guard.enabled = value;
        }
    }

    pub fn enable(&mut self, nr: usize) {
        self.set_enable(nr, true);
    }

    pub fn disable(&mut self, nr: usize) {
        self.set_enable(nr, false);
    }

    pub fn set_enable_at(&mut self, addr: u16, value: bool) {
        if let Some(guard) = self.guards.iter_mut().find(|g| g.addr == addr) {
            guard.enabled = value;
        }
    }

    pub fn enable_at(&mut self, addr: u16) {
        self.set_enable_at(addr, true);
    }

    pub fn disable_at(&mut self, addr: u16) {
        self.set_enable_at(addr, false);
    }

    #[inline]
    pub(crate) fn needs_check(&self) -> bool {
        self.needs_check
    }

    pub(crate) fn eval(&mut self, addr: u16) -> bool {
        let mut hit = false;
        for guard in &mut self.guards {
            hit |= guard.eval(addr);
        }
        hit
    }
}

/* Single-stepping intent. A soft stop is a one-shot breakpoint: it is
 * consumed when reached and reported through the breakpoint delegate.
 */
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SoftStop {
    #[default]
    None,
    NextInstruction,
    Addr(u16),
}

// One slot of the instruction log
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedInstruction {
    pub cycle: u64,
    pub pc: u16,
    pub sp: u8,
    pub byte1: u8,
    pub byte2: u8,
    pub byte3: u8,
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub flags: u8,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Debugger {
    pub breakpoints: Guards,
    pub watchpoints: Guards,

    // Program counters of the most recent guard hits
    pub breakpoint_pc: Option<u16>,
    pub watchpoint_pc: Option<u16>,

    /* Ring buffer of logged instructions. log_cnt counts every logged
     * instruction and eventually exceeds the buffer capacity; use
     * `logged_instructions` for the number of retrievable entries.
     */
    log_buffer: Vec<RecordedInstruction>,
    log_cnt: usize,
    logging: bool,

    soft_stop: SoftStop,
}

impl Debugger {
    pub fn set_soft_stop(&mut self, stop: SoftStop) {
        self.soft_stop = stop;
    }

    #[must_use]
    pub fn soft_stop(&self) -> SoftStop {
        self.soft_stop
    }

    pub(crate) fn breakpoint_check_needed(&self) -> bool {
        self.breakpoints.needs_check() || self.soft_stop != SoftStop::None
    }

    // Evaluated by the engine whenever an instruction is about to start
    pub(crate) fn breakpoint_matches(&mut self, addr: u16) -> bool {
        let soft_hit = match self.soft_stop {
            SoftStop::NextInstruction => true,
            SoftStop::Addr(a) => a == addr,
            SoftStop::None => false,
        };
        if soft_hit {
            // Soft stops are deleted when reached
            self.soft_stop = SoftStop::None;
            self.breakpoint_pc = Some(addr);
            return true;
        }
        if self.breakpoints.eval(addr) {
            self.breakpoint_pc = Some(addr);
            return true;
        }
        false
    }

    //
    // Instruction log
    //

    pub fn enable_logging(&mut self) {
        self.logging = true;
    }

    pub fn disable_logging(&mut self) {
        self.logging = false;
    }

    #[must_use]
    pub fn is_logging(&self) -> bool {
        self.logging
    }

    #[must_use]
    pub fn logged_instructions(&self) -> usize {
        self.log_cnt.min(LOG_BUFFER_CAPACITY)
    }

    pub(crate) fn log(&mut self, record: RecordedInstruction) {
        let slot = self.log_cnt % LOG_BUFFER_CAPACITY;
        if slot < self.log_buffer.len() {
            self.log_buffer[slot] = record;
        } else {
            self.log_buffer.push(record);
        }
        self.log_cnt += 1;
    }

    // n == 0 returns the most recently logged instruction
    #[must_use]
    pub fn log_entry_rel(&self, n: usize) -> Option<&RecordedInstruction> {
        if n >= self.logged_instructions() {
            return None;
        }
        Some(&self.log_buffer[(self.log_cnt - 1 - n) % LOG_BUFFER_CAPACITY])
    }

    // n == 0 returns the oldest retrievable instruction
    #[must_use]
    pub fn log_entry_abs(&self, n: usize) -> Option<&RecordedInstruction> {
        if n >= self.logged_instructions() {
            return None;
        }
        self.log_entry_rel(self.logged_instructions() - 1 - n)
    }

    #[must_use]
    pub fn logged_pc0_rel(&self, n: usize) -> Option<u16> {
        self.log_entry_rel(n).map(|e| e.pc)
    }

    #[must_use]
    pub fn logged_pc0_abs(&self, n: usize) -> Option<u16> {
        self.log_entry_abs(n).map(|e| e.pc)
    }

    pub fn clear_log(&mut self) {
        self.log_buffer.clear();
        self.log_cnt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_skip_counts() {
        let mut guards = Guards::default();
        guards.add_at(0x1000, 2);
        assert!(!guards.eval(0x1000));
        assert!(!guards.eval(0x1000));
        assert!(guards.eval(0x1000));
        assert!(guards.eval(0x1000));
        assert_eq!(guards.guard_at_addr(0x1000).unwrap().hits(), 4);
    }

    #[test]
    fn disabled_guards_never_trigger() {
        let mut guards = Guards::default();
        guards.add_at(0x2000, 0);
        guards.disable_at(0x2000);
        assert!(!guards.eval(0x2000));
        assert!(guards.is_set_and_disabled_at(0x2000));
        guards.enable_at(0x2000);
        assert!(guards.eval(0x2000));
    }

    #[test]
    fn duplicate_guards_are_ignored() {
        let mut guards = Guards::default();
        guards.add_at(0x3000, 0);
        guards.add_at(0x3000, 5);
        assert_eq!(guards.elements(), 1);
        assert_eq!(guards.guard_with_nr(0).unwrap().skip(), 0);
    }

    #[test]
    fn removing_last_guard_clears_check() {
        let mut guards = Guards::default();
        guards.add_at(0x1234, 0);
        assert!(guards.needs_check());
        guards.remove_at(0x1234);
        assert!(!guards.needs_check());
    }

    #[test]
    fn log_ring_overwrites_oldest() {
        let mut debugger = Debugger::default();
        for i in 0..(LOG_BUFFER_CAPACITY + 10) {
            debugger.log(RecordedInstruction {
                pc: i as u16,
                ..RecordedInstruction::default()
            });
        }
        assert_eq!(debugger.logged_instructions(), LOG_BUFFER_CAPACITY);
        assert_eq!(
            debugger.logged_pc0_rel(0),
            Some((LOG_BUFFER_CAPACITY + 9) as u16)
        );
        assert_eq!(debugger.logged_pc0_abs(0), Some(10));
    }

    #[test]
    fn soft_stop_is_one_shot() {
        let mut debugger = Debugger::default();
        debugger.set_soft_stop(SoftStop::Addr(0x4000));
        assert!(debugger.breakpoint_check_needed());
        assert!(!debugger.breakpoint_matches(0x3FFF));
        assert!(debugger.breakpoint_matches(0x4000));
        assert!(!debugger.breakpoint_matches(0x4000));
        assert_eq!(debugger.breakpoint_pc, Some(0x4000));
    }
}
