use core::fmt;

use log::trace;
use serde::{Deserialize, Serialize};

use crate::bus::{Bus, IntSource};
use crate::consts::{ADDR_MASK_6507, ADDR_MASK_FULL, PORT_DATA_ADDR, PORT_DIR_ADDR, STACK_BASE};
use crate::debugger::Debugger;
use crate::disasm::Disassembler;
use crate::micro::MicroInstruction;
use crate::regs::{Registers, StatusFlags};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CpuModel {
    Mos6502,
    Mos6507,
    #[default]
    Mos6510,
    Mos8502,
}

/* One-cycle delay line keyed to the clock counter. Mirrors the silicon's
 * interrupt input latches: a value written during cycle N is returned by
 * `delayed` from cycle N+1 on.
 */
#[derive(Copy, Clone, Debug, Default, Serialize, Deserialize)]
pub(crate) struct DelayLine {
    pipeline: [u8; 2],
    time_stamp: u64,
}

impl DelayLine {
    pub fn write(&mut self, clock: u64, value: u8) {
        if clock > self.time_stamp {
            self.pipeline[1] = self.pipeline[0];
        }
        self.time_stamp = clock;
        self.pipeline[0] = value;
    }

    #[must_use]
    pub fn delayed(&self, clock: u64) -> u8 {
        if self.time_stamp >= clock {
            self.pipeline[1]
        } else {
            self.pipeline[0]
        }
    }

    pub fn clear(&mut self) {
        self.pipeline = [0; 2];
        self.time_stamp = 0;
    }
}

#[derive(Serialize, Deserialize)]
pub struct M65xx {
    model: CpuModel,

    // Elapsed cycles since power up
    pub(crate) clock: u64,

    // The next microinstruction to be executed
    pub(crate) next: MicroInstruction,

    // Opcode of the instruction in flight
    pub(crate) ir: u8,

    pub(crate) regs: Registers,

    /* Ready line. While pulled low the CPU freezes on read cycles; write
     * cycles proceed as on the physical chip. The up/down stamps record the
     * clock of the most recent transitions.
     */
    rdy_line: bool,
    rdy_line_up: u64,
    rdy_line_down: u64,

    /* Interrupt lines. Both are low-active: 0 means released, any set bit
     * names a device currently pulling the line down.
     */
    nmi_line: IntSource,
    irq_line: IntSource,

    // NMI is edge triggered: the detector latches the high-to-low
    // transition and stays set until the interrupt is acknowledged.
    edge_detector: DelayLine,

    // IRQ is level triggered: polling sees the line state of the previous
    // cycle.
    level_detector: DelayLine,

    // Polling results, sampled one cycle before an instruction completes
    pub(crate) do_nmi: bool,
    pub(crate) do_irq: bool,

    pub debugger: Debugger,
    pub disassembler: Disassembler,
}

impl M65xx {
    #[must_use]
    pub fn new() -> M65xx {
        M65xx {
            model: CpuModel::default(),
            clock: 0,
            next: MicroInstruction::Fetch,
            ir: 0,
            regs: Registers::default(),
            rdy_line: true,
            rdy_line_up: 0,
            rdy_line_down: 0,
            nmi_line: 0,
            irq_line: 0,
            edge_detector: DelayLine::default(),
            level_detector: DelayLine::default(),
            do_nmi: false,
            do_irq: false,
            debugger: Debugger::default(),
            disassembler: Disassembler::new(),
        }
    }

    //
    // Configuration
    //

    pub fn set_model(&mut self, model: CpuModel) -> Result<(), &'static str> {
        if !self.in_fetch_phase() {
            return Err("model change outside fetch phase");
        }
        self.model = model;
        Ok(())
    }

    #[inline]
    #[must_use]
    pub fn model(&self) -> CpuModel {
        self.model
    }

    #[inline]
    #[must_use]
    pub fn has_processor_port(&self) -> bool {
        matches!(self.model, CpuModel::Mos6510 | CpuModel::Mos8502)
    }

    #[inline]
    #[must_use]
    pub fn addr_mask(&self) -> u16 {
        match self.model {
            CpuModel::Mos6507 => ADDR_MASK_6507,
            _ => ADDR_MASK_FULL,
        }
    }

    //
    // State queries
    //

    #[inline]
    #[must_use]
    pub fn is_jammed(&self) -> bool {
        matches!(self.next, MicroInstruction::Jam | MicroInstruction::Jam2)
    }

    #[inline]
    #[must_use]
    pub fn in_fetch_phase(&self) -> bool {
        self.next == MicroInstruction::Fetch
    }

    #[inline]
    #[must_use]
    pub fn clock(&self) -> u64 {
        self.clock
    }

    //
    // Interrupt lines
    //

    pub fn pull_down_nmi_line(&mut self, source: IntSource) {
        debug_assert!(source != 0);

        // Only a high-to-low transition of the physical line arms the edge
        // detector. A line held low by any other source has no effect.
        if self.nmi_line == 0 {
            self.edge_detector.write(self.clock, 1);
        }
        self.nmi_line |= source;
    }

    pub fn release_nmi_line(&mut self, source: IntSource) {
        self.nmi_line &= !source;
    }

    pub fn pull_down_irq_line(&mut self, source: IntSource) {
        debug_assert!(source != 0);

        self.irq_line |= source;
        self.level_detector.write(self.clock, self.irq_line);
    }

    pub fn release_irq_line(&mut self, source: IntSource) {
        self.irq_line &= !source;
        self.level_detector.write(self.clock, self.irq_line);
    }

    #[inline]
    #[must_use]
    pub fn nmi_line(&self) -> IntSource {
        self.nmi_line
    }

    #[inline]
    #[must_use]
    pub fn irq_line(&self) -> IntSource {
        self.irq_line
    }

    pub(crate) fn nmi_edge_pending(&self) -> bool {
        self.edge_detector.delayed(self.clock) != 0
    }

    pub(crate) fn irq_level_pending(&self) -> bool {
        self.level_detector.delayed(self.clock) != 0
    }

    pub(crate) fn acknowledge_nmi(&mut self) {
        self.edge_detector.clear();
        self.do_nmi = false;
    }

    //
    // RDY line
    //

    pub fn set_rdy(&mut self, value: bool) {
        if self.rdy_line != value {
            if value {
                self.rdy_line_up = self.clock;
            } else {
                self.rdy_line_down = self.clock;
            }
        }
        self.rdy_line = value;
    }

    #[inline]
    #[must_use]
    pub fn rdy_line(&self) -> bool {
        self.rdy_line
    }

    #[must_use]
    pub fn rdy_line_up(&self) -> u64 {
        self.rdy_line_up
    }

    #[must_use]
    pub fn rdy_line_down(&self) -> u64 {
        self.rdy_line_down
    }

    //
    // Registers and flags
    //

    #[inline]
    #[must_use]
    pub fn a(&self) -> u8 {
        self.regs.a
    }

    #[inline]
    #[must_use]
    pub fn x(&self) -> u8 {
        self.regs.x
    }

    #[inline]
    #[must_use]
    pub fn y(&self) -> u8 {
        self.regs.y
    }

    #[inline]
    #[must_use]
    pub fn sp(&self) -> u8 {
        self.regs.sp
    }

    #[inline]
    #[must_use]
    pub fn pc(&self) -> u16 {
        self.regs.pc
    }

    /* The frozen program counter: the address the instruction in flight was
     * fetched from. Unlike pc it does not move while the instruction's
     * remaining microcycles execute.
     */
    #[inline]
    #[must_use]
    pub fn pc0(&self) -> u16 {
        self.regs.pc0
    }

    pub fn set_a(&mut self, a: u8) {
        self.regs.a = a;
    }

    pub fn set_x(&mut self, x: u8) {
        self.regs.x = x;
    }

    pub fn set_y(&mut self, y: u8) {
        self.regs.y = y;
    }

    pub fn set_sp(&mut self, sp: u8) {
        self.regs.sp = sp;
    }

    pub fn set_pc(&mut self, pc: u16) {
        self.regs.pc = pc;
    }

    #[must_use]
    pub fn n(&self) -> bool {
        self.regs.sr.contains(StatusFlags::N)
    }

    pub fn set_n(&mut self, value: bool) {
        self.regs.sr.set(StatusFlags::N, value);
    }

    #[must_use]
    pub fn v(&self) -> bool {
        self.regs.sr.contains(StatusFlags::V)
    }

    pub fn set_v(&mut self, value: bool) {
        self.regs.sr.set(StatusFlags::V, value);
    }

    #[must_use]
    pub fn b(&self) -> bool {
        self.regs.sr.contains(StatusFlags::B)
    }

    pub fn set_b(&mut self, value: bool) {
        self.regs.sr.set(StatusFlags::B, value);
    }

    #[must_use]
    pub fn d(&self) -> bool {
        self.regs.sr.contains(StatusFlags::D)
    }

    pub fn set_d(&mut self, value: bool) {
        self.regs.sr.set(StatusFlags::D, value);
    }

    #[must_use]
    pub fn i(&self) -> bool {
        self.regs.sr.contains(StatusFlags::I)
    }

    pub fn set_i(&mut self, value: bool) {
        self.regs.sr.set(StatusFlags::I, value);
    }

    #[must_use]
    pub fn z(&self) -> bool {
        self.regs.sr.contains(StatusFlags::Z)
    }

    pub fn set_z(&mut self, value: bool) {
        self.regs.sr.set(StatusFlags::Z, value);
    }

    #[must_use]
    pub fn c(&self) -> bool {
        self.regs.sr.contains(StatusFlags::C)
    }

    pub fn set_c(&mut self, value: bool) {
        self.regs.sr.set(StatusFlags::C, value);
    }

    #[must_use]
    pub fn p(&self) -> u8 {
        self.regs.p()
    }

    pub fn set_p(&mut self, p: u8) {
        self.regs.set_p(p);
    }

    // Continues program execution at the specified address
    pub fn jump(&mut self, addr: u16) {
        self.regs.pc = addr;
        self.regs.pc0 = addr;
        self.next = MicroInstruction::Fetch;
    }

    //
    // Reset
    //

    /* Hard reset: seven bus cycles. Two internal cycles, three phantom
     * stack accesses (the pushes of the interrupt sequence turned into
     * reads, so memory is untouched while SP still drops by three), then
     * the two reset vector fetches.
     */
    pub fn reset<B: Bus>(&mut self, bus: &mut B) {
        self.next = MicroInstruction::Fetch;
        self.ir = 0;
        self.do_nmi = false;
        self.do_irq = false;
        self.nmi_line = 0;
        self.irq_line = 0;
        self.edge_detector.clear();
        self.level_detector.clear();
        self.rdy_line = true;

        self.regs.adl = 0;
        self.regs.adh = 0;
        self.regs.idl = 0;
        self.regs.ovl = false;
        self.regs.pport.direction = 0;
        self.regs.pport.data = 0;

        self.regs.sr.remove(StatusFlags::D);
        self.regs.sr.insert(StatusFlags::I | StatusFlags::B);

        self.clock += 2;
        for _ in 0..3 {
            self.clock += 1;
            let sp = self.regs.sp;
            self.read_stack_idle(bus, sp);
            self.regs.sp = sp.wrapping_sub(1);
        }

        self.clock += 2;
        let pc = bus.read_reset_vector();
        self.regs.pc = pc;
        self.regs.pc0 = pc;

        trace!("Reset, pc:{:04x} {:?}", pc, self);
    }

    //
    // Memory interface
    //

    pub(crate) fn bus_read<B: Bus>(&mut self, bus: &mut B, addr: u16) -> u8 {
        let addr = addr & self.addr_mask();
        let val = if self.has_processor_port() && addr <= PORT_DATA_ADDR {
            self.read_port(bus, addr)
        } else {
            bus.read(addr)
        };
        self.check_watchpoint(bus, addr);
        val
    }

    pub(crate) fn bus_write<B: Bus>(&mut self, bus: &mut B, addr: u16, val: u8) {
        let addr = addr & self.addr_mask();
        if self.has_processor_port() && addr <= PORT_DATA_ADDR {
            self.write_port(bus, addr, val);
        } else {
            bus.write(addr, val);
        }
        self.check_watchpoint(bus, addr);
    }

    #[inline]
    pub(crate) fn read_zero_page<B: Bus>(&mut self, bus: &mut B, addr: u8) -> u8 {
        self.bus_read(bus, addr as u16)
    }

    #[inline]
    pub(crate) fn read_stack<B: Bus>(&mut self, bus: &mut B, sp: u8) -> u8 {
        self.bus_read(bus, STACK_BASE | sp as u16)
    }

    // Idle variants: scheduling markers for the dummy cycles. The host
    // sees them as ordinary reads.
    #[inline]
    pub(crate) fn read_idle<B: Bus>(&mut self, bus: &mut B, addr: u16) {
        self.bus_read(bus, addr);
    }

    #[inline]
    pub(crate) fn read_zero_page_idle<B: Bus>(&mut self, bus: &mut B, addr: u8) {
        self.bus_read(bus, addr as u16);
    }

    #[inline]
    pub(crate) fn read_stack_idle<B: Bus>(&mut self, bus: &mut B, sp: u8) {
        self.bus_read(bus, STACK_BASE | sp as u16);
    }

    #[inline]
    pub(crate) fn write_zero_page<B: Bus>(&mut self, bus: &mut B, addr: u8, val: u8) {
        self.bus_write(bus, addr as u16, val);
    }

    #[inline]
    pub(crate) fn write_stack<B: Bus>(&mut self, bus: &mut B, sp: u8, val: u8) {
        self.bus_write(bus, STACK_BASE | sp as u16, val);
    }

    fn check_watchpoint<B: Bus>(&mut self, bus: &mut B, addr: u16) {
        if self.debugger.watchpoints.needs_check() && self.debugger.watchpoints.eval(addr) {
            self.debugger.watchpoint_pc = Some(self.regs.pc0);
            bus.watchpoint_reached(addr);
        }
    }

    //
    // Processor port
    //

    fn read_port<B: Bus>(&mut self, bus: &mut B, addr: u16) -> u8 {
        let port = &self.regs.pport;
        if addr == PORT_DIR_ADDR {
            port.direction
        } else {
            (port.data & port.direction) | (bus.external_port_bits() & !port.direction)
        }
    }

    fn write_port<B: Bus>(&mut self, bus: &mut B, addr: u16, val: u8) {
        if addr == PORT_DIR_ADDR {
            self.regs.pport.direction = val;
        } else {
            self.regs.pport.data = val;
        }
        bus.port_did_write(self.regs.pport.direction, self.regs.pport.data);
    }

    //
    // ALU
    //

    pub(crate) fn set_nz(&mut self, value: u8) {
        self.regs.sr.remove(StatusFlags::N | StatusFlags::Z);
        if value == 0 {
            self.regs.sr.insert(StatusFlags::Z);
        } else if value & 0x80 != 0 {
            self.regs.sr.insert(StatusFlags::N);
        }
    }

    pub(crate) fn adc(&mut self, val: u8) {
        if self.regs.sr.contains(StatusFlags::D) {
            self.adc_bcd(val);
        } else {
            self.adc_binary(val);
        }
    }

    fn adc_binary(&mut self, val: u8) {
        let a = self.regs.a;
        let c: u8 = if self.regs.sr.contains(StatusFlags::C) { 1 } else { 0 };
        let sum = a as u16 + val as u16 + c as u16;
        self.regs.sr.remove(StatusFlags::V | StatusFlags::C);
        self.set_nz(sum as u8);
        if !(a ^ val) & (a ^ sum as u8) & 0x80 != 0 {
            self.regs.sr.insert(StatusFlags::V);
        }
        if sum & 0xFF00 != 0 {
            self.regs.sr.insert(StatusFlags::C);
        }
        self.regs.a = sum as u8;
    }

    /* Decimal add. N, V and Z are derived from the binary intermediate,
     * only the carry reflects the decimal result.
     */
    fn adc_bcd(&mut self, val: u8) {
        let a = self.regs.a;
        let c: u8 = if self.regs.sr.contains(StatusFlags::C) { 1 } else { 0 };
        self.regs.sr
            .remove(StatusFlags::N | StatusFlags::V | StatusFlags::Z | StatusFlags::C);
        let mut al = (a & 0x0F) + (val & 0x0F) + c;
        if al > 9 {
            al += 6;
        }
        let mut ah: u8 = (a >> 4) + (val >> 4) + if al > 0x0F { 1 } else { 0 };
        if (a as u16 + val as u16 + c as u16) as u8 == 0 {
            self.regs.sr.insert(StatusFlags::Z);
        } else if ah & 0x08 != 0 {
            self.regs.sr.insert(StatusFlags::N);
        }
        if !(a ^ val) & (a ^ (ah << 4)) & 0x80 != 0 {
            self.regs.sr.insert(StatusFlags::V);
        }
        if ah > 9 {
            ah += 6;
        }
        if ah > 15 {
            self.regs.sr.insert(StatusFlags::C);
        }
        self.regs.a = (ah << 4) | (al & 0x0F);
    }

    pub(crate) fn sbc(&mut self, val: u8) {
        if self.regs.sr.contains(StatusFlags::D) {
            self.sbc_bcd(val);
        } else {
            self.sbc_binary(val);
        }
    }

    fn sbc_binary(&mut self, val: u8) {
        let a = self.regs.a;
        let c: u8 = if self.regs.sr.contains(StatusFlags::C) { 0 } else { 1 };
        let diff = (a as u16).wrapping_sub(val as u16).wrapping_sub(c as u16);
        self.regs.sr.remove(StatusFlags::V | StatusFlags::C);
        self.set_nz(diff as u8);
        if (a ^ val) & (a ^ diff as u8) & 0x80 != 0 {
            self.regs.sr.insert(StatusFlags::V);
        }
        if diff & 0xFF00 == 0 {
            self.regs.sr.insert(StatusFlags::C);
        }
        self.regs.a = diff as u8;
    }

    // Decimal subtract. All flags come from the binary intermediate.
    fn sbc_bcd(&mut self, val: u8) {
        let a = self.regs.a;
        let c: u8 = if self.regs.sr.contains(StatusFlags::C) { 0 } else { 1 };
        self.regs.sr
            .remove(StatusFlags::N | StatusFlags::V | StatusFlags::Z | StatusFlags::C);
        let diff = (a as u16).wrapping_sub(val as u16).wrapping_sub(c as u16);
        let mut al = (a & 0x0F).wrapping_sub(val & 0x0F).wrapping_sub(c);
        if (al as i8) < 0 {
            al = al.wrapping_sub(6);
        }
        let mut ah: u8 = (a >> 4)
            .wrapping_sub(val >> 4)
            .wrapping_sub(if (al as i8) < 0 { 1 } else { 0 });
        if diff as u8 == 0 {
            self.regs.sr.insert(StatusFlags::Z);
        } else if diff & 0x80 != 0 {
            self.regs.sr.insert(StatusFlags::N);
        }
        if (a ^ val) & (a ^ diff as u8) & 0x80 != 0 {
            self.regs.sr.insert(StatusFlags::V);
        }
        if diff & 0xFF00 == 0 {
            self.regs.sr.insert(StatusFlags::C);
        }
        if ah & 0x80 != 0 {
            ah = ah.wrapping_sub(6);
        }
        self.regs.a = (ah << 4) | (al & 0x0F);
    }

    pub(crate) fn cmp(&mut self, r: u8, v: u8) {
        let t = (r as u16).wrapping_sub(v as u16);
        self.set_nz(t as u8);
        self.regs.sr.set(StatusFlags::C, t & 0xFF00 == 0);
    }

    pub(crate) fn asl(&mut self, v: u8) -> u8 {
        self.set_nz(v << 1);
        self.regs.sr.set(StatusFlags::C, v & 0x80 != 0);
        v << 1
    }

    pub(crate) fn lsr(&mut self, v: u8) -> u8 {
        self.set_nz(v >> 1);
        self.regs.sr.set(StatusFlags::C, v & 0x01 != 0);
        v >> 1
    }

    pub(crate) fn rol(&mut self, v: u8) -> u8 {
        let carry = self.regs.sr.contains(StatusFlags::C);
        self.regs.sr.set(StatusFlags::C, v & 0x80 != 0);
        let mut r = v << 1;
        if carry {
            r |= 0x01;
        }
        self.set_nz(r);
        r
    }

    pub(crate) fn ror(&mut self, v: u8) -> u8 {
        let carry = self.regs.sr.contains(StatusFlags::C);
        self.regs.sr.set(StatusFlags::C, v & 0x01 != 0);
        let mut r = v >> 1;
        if carry {
            r |= 0x80;
        }
        self.set_nz(r);
        r
    }

    pub(crate) fn bit_test(&mut self, v: u8) {
        self.regs.sr.set(StatusFlags::Z, self.regs.a & v == 0);
        self.regs.sr.remove(StatusFlags::N | StatusFlags::V);
        self.regs.sr |= StatusFlags::from_bits_truncate(v) & (StatusFlags::N | StatusFlags::V);
    }

    /* ARR: AND, then rotate right. The carry and overflow come from the
     * intermediate, and decimal mode applies its own nibble fixups.
     */
    pub(crate) fn arr(&mut self, val: u8) {
        let t = self.regs.a & val;
        let c_in: u8 = if self.regs.sr.contains(StatusFlags::C) { 0x80 } else { 0 };
        let mut r = (t >> 1) | c_in;
        self.set_nz(r);
        if self.regs.sr.contains(StatusFlags::D) {
            self.regs.sr.set(StatusFlags::V, (t ^ r) & 0x40 != 0);
            if (t & 0x0F) + (t & 0x01) > 5 {
                r = (r & 0xF0) | (r.wrapping_add(6) & 0x0F);
            }
            let high_fix = (t & 0xF0) as u16 + (t & 0x10) as u16 > 0x50;
            if high_fix {
                r = (r & 0x0F) | (r.wrapping_add(0x60) & 0xF0);
            }
            self.regs.sr.set(StatusFlags::C, high_fix);
        } else {
            self.regs.sr.set(StatusFlags::C, r & 0x40 != 0);
            self.regs.sr
                .set(StatusFlags::V, ((r >> 6) ^ (r >> 5)) & 0x01 != 0);
        }
        self.regs.a = r;
    }

    pub(crate) fn axs(&mut self, val: u8) {
        let t = (self.regs.a & self.regs.x) as u16;
        let r = t.wrapping_sub(val as u16);
        self.regs.sr.set(StatusFlags::C, t >= val as u16);
        self.regs.x = r as u8;
        self.set_nz(r as u8);
    }
}

impl Default for M65xx {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for M65xx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{ clk:{} pc:{:04x} a:{:02x} x:{:02x} y:{:02x} sp:{:02x} p:{:08b} ir:{:02x} next:{:?} }}",
            self.clock,
            self.regs.pc,
            self.regs.a,
            self.regs.x,
            self.regs.y,
            self.regs.sp,
            self.regs.p(),
            self.ir,
            self.next
        )
    }
}
