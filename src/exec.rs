use log::trace;

use crate::bus::Bus;
use crate::consts::{ANE_MAGIC, INTV_ADDR, NMIV_ADDR};
use crate::cpu::M65xx;
use crate::debugger::RecordedInstruction;
use crate::micro::{AccessKind, AddressingMode, Instr, MicroInstruction, OPCODES};
use crate::regs::StatusFlags;

impl M65xx {
    /* Advances the CPU by one bus cycle. Every cycle performs at most one
     * memory access; dummy accesses required by the silicon are performed
     * and therefore visible to the host.
     */
    pub fn step<B: Bus>(&mut self, bus: &mut B) {
        self.clock += 1;

        // The RDY line freezes read cycles only. The clock keeps running
        // and the pending microinstruction stays pending.
        if !self.rdy_line() && self.is_read_cycle() {
            return;
        }

        match self.next {
            MicroInstruction::Fetch => self.fetch(bus),

            MicroInstruction::Jam => {
                trace!("Jammed {:?}", self);
                bus.cpu_did_jam();
                self.next = MicroInstruction::Jam2;
            }
            MicroInstruction::Jam2 => {}

            MicroInstruction::Implied => {
                self.read_idle(bus, self.regs.pc);
                self.poll_interrupts();
                self.execute_implied();
                self.done_polled(bus);
            }

            MicroInstruction::Accumulator => {
                self.read_idle(bus, self.regs.pc);
                self.poll_interrupts();
                let a = self.regs.a;
                self.regs.a = self.rmw_op(a);
                self.done_polled(bus);
            }

            MicroInstruction::Immediate => {
                let v = self.fetch_operand(bus);
                self.poll_interrupts();
                self.execute_read(v);
                self.done_polled(bus);
            }

            //
            // Zero page
            //
            MicroInstruction::ZpgLo => {
                self.regs.adl = self.fetch_operand(bus);
                self.regs.adh = 0;
                self.next = MicroInstruction::ZpgAccess;
            }
            MicroInstruction::ZpgAccess => self.effective_access(bus),

            //
            // Zero page indexed
            //
            MicroInstruction::ZpgIdxLo => {
                self.regs.adl = self.fetch_operand(bus);
                self.regs.adh = 0;
                self.next = MicroInstruction::ZpgIdxDummy;
            }
            MicroInstruction::ZpgIdxDummy => {
                // Dummy read at the un-indexed address; the sum stays
                // inside the zero page.
                let base = self.regs.adl;
                self.read_zero_page_idle(bus, base);
                self.regs.adl = base.wrapping_add(self.index_reg());
                self.next = MicroInstruction::ZpgIdxAccess;
            }
            MicroInstruction::ZpgIdxAccess => self.effective_access(bus),

            //
            // Absolute
            //
            MicroInstruction::AbsLo => {
                self.regs.adl = self.fetch_operand(bus);
                self.next = MicroInstruction::AbsHi;
            }
            MicroInstruction::AbsHi => {
                self.regs.adh = self.fetch_operand(bus);
                self.next = MicroInstruction::AbsAccess;
            }
            MicroInstruction::AbsAccess => self.effective_access(bus),

            //
            // Absolute indexed
            //
            MicroInstruction::AbsIdxLo => {
                self.regs.adl = self.fetch_operand(bus);
                self.next = MicroInstruction::AbsIdxHi;
            }
            MicroInstruction::AbsIdxHi => {
                self.regs.adh = self.fetch_operand(bus);
                self.index_add();
                self.next = if self.can_skip_fixup() {
                    MicroInstruction::AbsIdxAccess
                } else {
                    MicroInstruction::AbsIdxFixup
                };
            }
            MicroInstruction::AbsIdxFixup => {
                self.fixup(bus);
                self.next = MicroInstruction::AbsIdxAccess;
            }
            MicroInstruction::AbsIdxAccess => self.effective_access(bus),

            //
            // (Indirect,X)
            //
            MicroInstruction::IndXLo => {
                self.regs.idl = self.fetch_operand(bus);
                self.next = MicroInstruction::IndXDummy;
            }
            MicroInstruction::IndXDummy => {
                let base = self.regs.idl;
                self.read_zero_page_idle(bus, base);
                self.regs.idl = base.wrapping_add(self.regs.x);
                self.next = MicroInstruction::IndXPtrLo;
            }
            MicroInstruction::IndXPtrLo => {
                let ptr = self.regs.idl;
                self.regs.adl = self.read_zero_page(bus, ptr);
                self.next = MicroInstruction::IndXPtrHi;
            }
            MicroInstruction::IndXPtrHi => {
                let ptr = self.regs.idl.wrapping_add(1);
                self.regs.adh = self.read_zero_page(bus, ptr);
                self.next = MicroInstruction::IndXAccess;
            }
            MicroInstruction::IndXAccess => self.effective_access(bus),

            //
            // (Indirect),Y
            //
            MicroInstruction::IndYLo => {
                self.regs.idl = self.fetch_operand(bus);
                self.next = MicroInstruction::IndYPtrLo;
            }
            MicroInstruction::IndYPtrLo => {
                let ptr = self.regs.idl;
                self.regs.adl = self.read_zero_page(bus, ptr);
                self.next = MicroInstruction::IndYPtrHi;
            }
            MicroInstruction::IndYPtrHi => {
                let ptr = self.regs.idl.wrapping_add(1);
                self.regs.adh = self.read_zero_page(bus, ptr);
                self.index_add();
                self.next = if self.can_skip_fixup() {
                    MicroInstruction::IndYAccess
                } else {
                    MicroInstruction::IndYFixup
                };
            }
            MicroInstruction::IndYFixup => {
                self.fixup(bus);
                self.next = MicroInstruction::IndYAccess;
            }
            MicroInstruction::IndYAccess => self.effective_access(bus),

            //
            // Read-modify-write tail
            //
            MicroInstruction::RmwModify => {
                // The silicon writes the unmodified value back while the
                // ALU is busy. This dummy write is externally visible.
                let addr = self.addr16();
                let v = self.regs.idl;
                self.bus_write(bus, addr, v);
                self.regs.idl = self.rmw_op(v);
                self.next = MicroInstruction::RmwWrite;
            }
            MicroInstruction::RmwWrite => {
                let addr = self.addr16();
                let v = self.regs.idl;
                self.bus_write(bus, addr, v);
                self.poll_interrupts();
                self.done_polled(bus);
            }

            //
            // Branches
            //
            MicroInstruction::Branch => {
                self.regs.idl = self.fetch_operand(bus);
                self.poll_interrupts();
                if self.branch_condition() {
                    self.next = MicroInstruction::BranchTaken;
                } else {
                    self.done_polled(bus);
                }
            }
            MicroInstruction::BranchTaken => {
                let pc = self.regs.pc;
                self.read_idle(bus, pc);
                let target = pc.wrapping_add(self.regs.idl as i8 as u16);
                if target & 0xFF00 == pc & 0xFF00 {
                    /* No page crossing: the branch completes without a
                     * second interrupt poll, so a line asserted while the
                     * branch was in flight is not serviced before the next
                     * instruction.
                     */
                    self.regs.pc = target;
                    self.done_polled(bus);
                } else {
                    self.regs.adh = (target >> 8) as u8;
                    self.regs.pc = (pc & 0xFF00) | (target & 0x00FF);
                    self.next = MicroInstruction::BranchFixup;
                }
            }
            MicroInstruction::BranchFixup => {
                // Dummy read at the not-yet-corrected target
                let pc = self.regs.pc;
                self.read_idle(bus, pc);
                self.regs.pc = (self.regs.adh as u16) << 8 | (pc & 0x00FF);
                self.poll_interrupts();
                self.done_polled(bus);
            }

            //
            // Jumps
            //
            MicroInstruction::JmpLo => {
                self.regs.adl = self.fetch_operand(bus);
                self.next = MicroInstruction::JmpHi;
            }
            MicroInstruction::JmpHi => {
                self.regs.adh = self.bus_read(bus, self.regs.pc);
                self.regs.pc = self.addr16();
                self.poll_interrupts();
                self.done_polled(bus);
            }

            MicroInstruction::JmpIndLo => {
                self.regs.adl = self.fetch_operand(bus);
                self.next = MicroInstruction::JmpIndHi;
            }
            MicroInstruction::JmpIndHi => {
                self.regs.adh = self.fetch_operand(bus);
                self.next = MicroInstruction::JmpIndPtrLo;
            }
            MicroInstruction::JmpIndPtrLo => {
                let addr = self.addr16();
                self.regs.idl = self.bus_read(bus, addr);
                /* The low byte of the pointer wraps around inside the
                 * page; a pointer at $xxFF fetches its high byte from
                 * $xx00.
                 */
                self.regs.adl = self.regs.adl.wrapping_add(1);
                self.next = MicroInstruction::JmpIndPtrHi;
            }
            MicroInstruction::JmpIndPtrHi => {
                let addr = self.addr16();
                let hi = self.bus_read(bus, addr);
                self.regs.pc = (hi as u16) << 8 | self.regs.idl as u16;
                self.poll_interrupts();
                self.done_polled(bus);
            }

            //
            // Stack operations
            //
            MicroInstruction::Push => {
                self.read_idle(bus, self.regs.pc);
                self.next = MicroInstruction::PushWrite;
            }
            MicroInstruction::PushWrite => {
                let v = match OPCODES[self.ir as usize].instr {
                    Instr::Php => self.regs.p() | StatusFlags::B.bits(),
                    _ => self.regs.a,
                };
                let sp = self.regs.sp;
                self.write_stack(bus, sp, v);
                self.regs.sp = sp.wrapping_sub(1);
                self.poll_interrupts();
                self.done_polled(bus);
            }

            MicroInstruction::Pull => {
                self.read_idle(bus, self.regs.pc);
                self.next = MicroInstruction::PullIdle;
            }
            MicroInstruction::PullIdle => {
                let sp = self.regs.sp;
                self.read_stack_idle(bus, sp);
                self.next = MicroInstruction::PullRead;
            }
            MicroInstruction::PullRead => {
                self.regs.sp = self.regs.sp.wrapping_add(1);
                let sp = self.regs.sp;
                let v = self.read_stack(bus, sp);
                self.poll_interrupts();
                match OPCODES[self.ir as usize].instr {
                    Instr::Plp => self.regs.set_p_without_b(v),
                    _ => {
                        self.regs.a = v;
                        self.set_nz(v);
                    }
                }
                self.done_polled(bus);
            }

            //
            // JSR / RTS / RTI
            //
            MicroInstruction::Jsr(0) => {
                self.regs.adl = self.fetch_operand(bus);
                self.next = MicroInstruction::Jsr(1);
            }
            MicroInstruction::Jsr(1) => {
                let sp = self.regs.sp;
                self.read_stack_idle(bus, sp);
                self.next = MicroInstruction::Jsr(2);
            }
            MicroInstruction::Jsr(2) => {
                let sp = self.regs.sp;
                let pch = (self.regs.pc >> 8) as u8;
                self.write_stack(bus, sp, pch);
                self.regs.sp = sp.wrapping_sub(1);
                self.next = MicroInstruction::Jsr(3);
            }
            MicroInstruction::Jsr(3) => {
                let sp = self.regs.sp;
                let pcl = self.regs.pc as u8;
                self.write_stack(bus, sp, pcl);
                self.regs.sp = sp.wrapping_sub(1);
                self.next = MicroInstruction::Jsr(4);
            }
            MicroInstruction::Jsr(_) => {
                self.regs.adh = self.bus_read(bus, self.regs.pc);
                self.regs.pc = self.addr16();
                self.poll_interrupts();
                self.done_polled(bus);
            }

            MicroInstruction::Rts(0) => {
                self.read_idle(bus, self.regs.pc);
                self.next = MicroInstruction::Rts(1);
            }
            MicroInstruction::Rts(1) => {
                let sp = self.regs.sp;
                self.read_stack_idle(bus, sp);
                self.next = MicroInstruction::Rts(2);
            }
            MicroInstruction::Rts(2) => {
                self.regs.sp = self.regs.sp.wrapping_add(1);
                let sp = self.regs.sp;
                self.regs.idl = self.read_stack(bus, sp);
                self.next = MicroInstruction::Rts(3);
            }
            MicroInstruction::Rts(3) => {
                self.regs.sp = self.regs.sp.wrapping_add(1);
                let sp = self.regs.sp;
                let hi = self.read_stack(bus, sp);
                self.regs.pc = (hi as u16) << 8 | self.regs.idl as u16;
                self.next = MicroInstruction::Rts(4);
            }
            MicroInstruction::Rts(_) => {
                self.read_idle(bus, self.regs.pc);
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.poll_interrupts();
                self.done_polled(bus);
            }

            MicroInstruction::Rti(0) => {
                self.read_idle(bus, self.regs.pc);
                self.next = MicroInstruction::Rti(1);
            }
            MicroInstruction::Rti(1) => {
                let sp = self.regs.sp;
                self.read_stack_idle(bus, sp);
                self.next = MicroInstruction::Rti(2);
            }
            MicroInstruction::Rti(2) => {
                self.regs.sp = self.regs.sp.wrapping_add(1);
                let sp = self.regs.sp;
                let p = self.read_stack(bus, sp);
                self.regs.set_p_without_b(p);
                self.next = MicroInstruction::Rti(3);
            }
            MicroInstruction::Rti(3) => {
                self.regs.sp = self.regs.sp.wrapping_add(1);
                let sp = self.regs.sp;
                self.regs.idl = self.read_stack(bus, sp);
                self.next = MicroInstruction::Rti(4);
            }
            MicroInstruction::Rti(_) => {
                self.regs.sp = self.regs.sp.wrapping_add(1);
                let sp = self.regs.sp;
                let hi = self.read_stack(bus, sp);
                self.regs.pc = (hi as u16) << 8 | self.regs.idl as u16;
                self.poll_interrupts();
                self.done_polled(bus);
            }

            //
            // BRK and the interrupt sequences
            //
            MicroInstruction::Brk(0) => {
                // Padding byte; BRK is effectively two bytes long
                let pc = self.regs.pc;
                self.bus_read(bus, pc);
                self.regs.pc = pc.wrapping_add(1);
                self.next = MicroInstruction::Brk(1);
            }
            MicroInstruction::Brk(1) => {
                self.push_pch(bus);
                self.next = MicroInstruction::Brk(2);
            }
            MicroInstruction::Brk(2) => {
                self.push_pcl(bus);
                self.next = MicroInstruction::Brk(3);
            }
            MicroInstruction::Brk(3) => {
                let p = self.regs.p() | StatusFlags::B.bits();
                let sp = self.regs.sp;
                self.write_stack(bus, sp, p);
                self.regs.sp = sp.wrapping_sub(1);

                /* An NMI edge detected while the BRK sequence is pushing
                 * hijacks the vector: the break is serviced through
                 * $FFFA/$FFFB instead of $FFFE/$FFFF.
                 */
                if self.nmi_edge_pending() {
                    self.acknowledge_nmi();
                    bus.nmi_will_trigger();
                    self.load_vector(NMIV_ADDR);
                } else {
                    self.load_vector(INTV_ADDR);
                }
                self.next = MicroInstruction::Brk(4);
            }
            MicroInstruction::Brk(4) => {
                self.regs.sr.insert(StatusFlags::I);
                let addr = self.addr16();
                self.regs.idl = self.bus_read(bus, addr);
                self.regs.adl = self.regs.adl.wrapping_add(1);
                self.next = MicroInstruction::Brk(5);
            }
            MicroInstruction::Brk(_) => {
                let hijacked = self.vector_is_nmi();
                self.load_pc_from_vector(bus);
                if hijacked {
                    bus.nmi_did_trigger();
                }
                self.next = MicroInstruction::Fetch;
            }

            MicroInstruction::Irq(0) => {
                self.read_idle(bus, self.regs.pc);
                self.next = MicroInstruction::Irq(1);
            }
            MicroInstruction::Irq(1) => {
                self.read_idle(bus, self.regs.pc);
                self.next = MicroInstruction::Irq(2);
            }
            MicroInstruction::Irq(2) => {
                self.push_pch(bus);
                self.next = MicroInstruction::Irq(3);
            }
            MicroInstruction::Irq(3) => {
                self.push_pcl(bus);
                self.next = MicroInstruction::Irq(4);
            }
            MicroInstruction::Irq(4) => {
                let p = self.regs.p_with_cleared_b();
                let sp = self.regs.sp;
                self.write_stack(bus, sp, p);
                self.regs.sp = sp.wrapping_sub(1);

                // A late NMI edge hijacks the IRQ sequence as well
                if self.nmi_edge_pending() {
                    self.acknowledge_nmi();
                    bus.nmi_will_trigger();
                    self.load_vector(NMIV_ADDR);
                } else {
                    self.load_vector(INTV_ADDR);
                }
                self.next = MicroInstruction::Irq(5);
            }
            MicroInstruction::Irq(5) => {
                self.regs.sr.insert(StatusFlags::I);
                let addr = self.addr16();
                self.regs.idl = self.bus_read(bus, addr);
                self.regs.adl = self.regs.adl.wrapping_add(1);
                self.next = MicroInstruction::Irq(6);
            }
            MicroInstruction::Irq(_) => {
                let hijacked = self.vector_is_nmi();
                self.load_pc_from_vector(bus);
                if hijacked {
                    bus.nmi_did_trigger();
                } else {
                    bus.irq_did_trigger();
                }
                self.next = MicroInstruction::Fetch;
            }

            MicroInstruction::Nmi(0) => {
                self.read_idle(bus, self.regs.pc);
                self.next = MicroInstruction::Nmi(1);
            }
            MicroInstruction::Nmi(1) => {
                self.read_idle(bus, self.regs.pc);
                self.next = MicroInstruction::Nmi(2);
            }
            MicroInstruction::Nmi(2) => {
                self.push_pch(bus);
                self.next = MicroInstruction::Nmi(3);
            }
            MicroInstruction::Nmi(3) => {
                self.push_pcl(bus);
                self.next = MicroInstruction::Nmi(4);
            }
            MicroInstruction::Nmi(4) => {
                let p = self.regs.p_with_cleared_b();
                let sp = self.regs.sp;
                self.write_stack(bus, sp, p);
                self.regs.sp = sp.wrapping_sub(1);
                self.load_vector(NMIV_ADDR);
                self.next = MicroInstruction::Nmi(5);
            }
            MicroInstruction::Nmi(5) => {
                self.regs.sr.insert(StatusFlags::I);
                let addr = self.addr16();
                self.regs.idl = self.bus_read(bus, addr);
                self.regs.adl = self.regs.adl.wrapping_add(1);
                self.next = MicroInstruction::Nmi(6);
            }
            MicroInstruction::Nmi(_) => {
                self.load_pc_from_vector(bus);
                bus.nmi_did_trigger();
                self.next = MicroInstruction::Fetch;
            }
        }
    }

    // Equivalent to calling `step` the given number of times
    pub fn step_n<B: Bus>(&mut self, bus: &mut B, count: usize) {
        for _ in 0..count {
            self.step(bus);
        }
    }

    /* Steps until the current instruction has completed. A pending
     * interrupt sequence counts as an instruction of its own: the loop
     * stops right before it begins. A jammed CPU and a CPU frozen by the
     * RDY line cannot complete an instruction; both end the loop after a
     * single cycle instead of spinning.
     */
    pub fn step_instruction<B: Bus>(&mut self, bus: &mut B) {
        loop {
            self.step(bus);
            if self.at_instruction_boundary() || self.is_jammed() {
                break;
            }
            if !self.rdy_line() && self.is_read_cycle() {
                break;
            }
        }
    }

    pub fn step_instructions<B: Bus>(&mut self, bus: &mut B, count: usize) {
        for _ in 0..count {
            self.step_instruction(bus);
        }
    }

    // Completes the instruction in flight; a no-op in the fetch phase
    pub fn finish_instruction<B: Bus>(&mut self, bus: &mut B) {
        while !self.in_fetch_phase() {
            if self.is_jammed() || (!self.rdy_line() && self.is_read_cycle()) {
                break;
            }
            self.step(bus);
        }
    }

    //
    // Cycle classification
    //

    fn at_instruction_boundary(&self) -> bool {
        matches!(
            self.next,
            MicroInstruction::Fetch | MicroInstruction::Irq(0) | MicroInstruction::Nmi(0)
        )
    }

    fn is_read_cycle(&self) -> bool {
        use MicroInstruction::*;

        match self.next {
            Jam | Jam2 => false,
            PushWrite | RmwModify | RmwWrite => false,
            Jsr(2) | Jsr(3) => false,
            Brk(1) | Brk(2) | Brk(3) => false,
            Irq(2) | Irq(3) | Irq(4) => false,
            Nmi(2) | Nmi(3) | Nmi(4) => false,
            ZpgAccess | ZpgIdxAccess | AbsAccess | AbsIdxAccess | IndXAccess | IndYAccess => {
                OPCODES[self.ir as usize].instr.access_kind() != AccessKind::Write
            }
            _ => true,
        }
    }

    //
    // Fetch phase
    //

    fn fetch<B: Bus>(&mut self, bus: &mut B) {
        let pc = self.regs.pc;
        self.regs.pc0 = pc;

        if self.debugger.breakpoint_check_needed() && self.debugger.breakpoint_matches(pc) {
            bus.breakpoint_reached(pc);
        }
        if self.debugger.is_logging() {
            let record = self.record_instruction(bus);
            self.debugger.log(record);
            bus.instruction_logged();
        }

        self.ir = self.bus_read(bus, pc);
        self.regs.pc = pc.wrapping_add(1);
        self.next = OPCODES[self.ir as usize].micro;
        trace!("Fetch {:?}", self);
    }

    fn record_instruction<B: Bus>(&self, bus: &B) -> RecordedInstruction {
        let pc = self.regs.pc0;
        let opcode = bus.read_dasm(pc);
        let length = OPCODES[opcode as usize].mode.length();
        RecordedInstruction {
            cycle: self.clock,
            pc,
            sp: self.regs.sp,
            byte1: opcode,
            byte2: if length > 1 { bus.read_dasm(pc.wrapping_add(1)) } else { 0 },
            byte3: if length > 2 { bus.read_dasm(pc.wrapping_add(2)) } else { 0 },
            a: self.regs.a,
            x: self.regs.x,
            y: self.regs.y,
            flags: self.regs.p(),
        }
    }

    //
    // Interrupt polling
    //

    /* Runs during the final microcycle of an instruction. The detectors are
     * delayed by one cycle, so this observes the line state of the
     * penultimate cycle.
     */
    fn poll_interrupts(&mut self) {
        self.do_nmi = self.nmi_edge_pending();
        self.do_irq = self.irq_level_pending() && !self.regs.sr.contains(StatusFlags::I);
    }

    fn done_polled<B: Bus>(&mut self, bus: &mut B) {
        if self.do_nmi {
            // NMI wins; a simultaneously pending IRQ is dropped and will
            // be picked up again by level polling.
            self.acknowledge_nmi();
            bus.nmi_will_trigger();
            trace!("NMI {:?}", self);
            self.next = MicroInstruction::Nmi(0);
        } else if self.do_irq {
            self.do_irq = false;
            bus.irq_will_trigger();
            trace!("IRQ {:?}", self);
            self.next = MicroInstruction::Irq(0);
        } else {
            self.next = MicroInstruction::Fetch;
        }
    }

    //
    // Addressing helpers
    //

    #[inline]
    fn addr16(&self) -> u16 {
        (self.regs.adh as u16) << 8 | self.regs.adl as u16
    }

    fn fetch_operand<B: Bus>(&mut self, bus: &mut B) -> u8 {
        let pc = self.regs.pc;
        let v = self.bus_read(bus, pc);
        self.regs.pc = pc.wrapping_add(1);
        v
    }

    fn index_reg(&self) -> u8 {
        match OPCODES[self.ir as usize].mode {
            AddressingMode::ZeroPageX | AddressingMode::AbsoluteX => self.regs.x,
            AddressingMode::ZeroPageY | AddressingMode::AbsoluteY => self.regs.y,
            _ => self.regs.y,
        }
    }

    // Adds the index register to the address low byte and latches the
    // page-crossing overflow.
    fn index_add(&mut self) {
        let (sum, carry) = self.regs.adl.overflowing_add(self.index_reg());
        self.regs.adl = sum;
        self.regs.ovl = carry;
    }

    // Reads skip the fixup cycle when no page boundary was crossed; writes
    // and modifies always take it.
    fn can_skip_fixup(&self) -> bool {
        OPCODES[self.ir as usize].instr.access_kind() == AccessKind::Read && !self.regs.ovl
    }

    /* The extra indexed cycle: a dummy read at the not-yet-corrected
     * address, then the high byte is fixed. The unstable stores compute
     * their operand here; when the index carry is set, the corrupted high
     * byte replaces the carry correction (documented silicon model).
     */
    fn fixup<B: Bus>(&mut self, bus: &mut B) {
        let addr = self.addr16();
        self.read_idle(bus, addr);

        let instr = OPCODES[self.ir as usize].instr;
        match instr {
            Instr::Sha | Instr::Shx | Instr::Shy | Instr::Tas => {
                let combo = match instr {
                    Instr::Shx => self.regs.x,
                    Instr::Shy => self.regs.y,
                    _ => self.regs.a & self.regs.x,
                };
                if instr == Instr::Tas {
                    self.regs.sp = self.regs.a & self.regs.x;
                }
                let v = combo & self.regs.adh.wrapping_add(1);
                self.regs.idl = v;
                if self.regs.ovl {
                    self.regs.adh = v;
                }
            }
            _ => {
                if self.regs.ovl {
                    self.regs.adh = self.regs.adh.wrapping_add(1);
                }
            }
        }
    }

    // Terminal cycle of every addressing sequence: the effective address
    // sits in adh/adl and the operation decides the bus direction.
    fn effective_access<B: Bus>(&mut self, bus: &mut B) {
        let addr = self.addr16();
        match OPCODES[self.ir as usize].instr.access_kind() {
            AccessKind::Read => {
                let v = self.bus_read(bus, addr);
                self.poll_interrupts();
                self.execute_read(v);
                self.done_polled(bus);
            }
            AccessKind::Write => {
                let v = self.store_value();
                self.bus_write(bus, addr, v);
                self.poll_interrupts();
                self.done_polled(bus);
            }
            AccessKind::Modify => {
                self.regs.idl = self.bus_read(bus, addr);
                self.next = MicroInstruction::RmwModify;
            }
        }
    }

    //
    // Interrupt sequence helpers
    //

    fn push_pch<B: Bus>(&mut self, bus: &mut B) {
        let sp = self.regs.sp;
        let pch = (self.regs.pc >> 8) as u8;
        self.write_stack(bus, sp, pch);
        self.regs.sp = sp.wrapping_sub(1);
    }

    fn push_pcl<B: Bus>(&mut self, bus: &mut B) {
        let sp = self.regs.sp;
        let pcl = self.regs.pc as u8;
        self.write_stack(bus, sp, pcl);
        self.regs.sp = sp.wrapping_sub(1);
    }

    fn load_vector(&mut self, vector: u16) {
        self.regs.adl = vector as u8;
        self.regs.adh = (vector >> 8) as u8;
    }

    fn vector_is_nmi(&self) -> bool {
        self.regs.adl == (NMIV_ADDR as u8).wrapping_add(1)
    }

    fn load_pc_from_vector<B: Bus>(&mut self, bus: &mut B) {
        let addr = self.addr16();
        let hi = self.bus_read(bus, addr);
        self.regs.pc = (hi as u16) << 8 | self.regs.idl as u16;
    }

    //
    // Operation execution
    //

    fn branch_condition(&self) -> bool {
        let sr = self.regs.sr;
        match OPCODES[self.ir as usize].instr {
            Instr::Bcc => !sr.contains(StatusFlags::C),
            Instr::Bcs => sr.contains(StatusFlags::C),
            Instr::Beq => sr.contains(StatusFlags::Z),
            Instr::Bne => !sr.contains(StatusFlags::Z),
            Instr::Bmi => sr.contains(StatusFlags::N),
            Instr::Bpl => !sr.contains(StatusFlags::N),
            Instr::Bvc => !sr.contains(StatusFlags::V),
            Instr::Bvs => sr.contains(StatusFlags::V),
            _ => false,
        }
    }

    fn execute_implied(&mut self) {
        match OPCODES[self.ir as usize].instr {
            Instr::Clc => self.regs.sr.remove(StatusFlags::C),
            Instr::Cld => self.regs.sr.remove(StatusFlags::D),
            Instr::Cli => self.regs.sr.remove(StatusFlags::I),
            Instr::Clv => self.regs.sr.remove(StatusFlags::V),
            Instr::Sec => self.regs.sr.insert(StatusFlags::C),
            Instr::Sed => self.regs.sr.insert(StatusFlags::D),
            Instr::Sei => self.regs.sr.insert(StatusFlags::I),
            Instr::Dex => {
                self.regs.x = self.regs.x.wrapping_sub(1);
                let x = self.regs.x;
                self.set_nz(x);
            }
            Instr::Dey => {
                self.regs.y = self.regs.y.wrapping_sub(1);
                let y = self.regs.y;
                self.set_nz(y);
            }
            Instr::Inx => {
                self.regs.x = self.regs.x.wrapping_add(1);
                let x = self.regs.x;
                self.set_nz(x);
            }
            Instr::Iny => {
                self.regs.y = self.regs.y.wrapping_add(1);
                let y = self.regs.y;
                self.set_nz(y);
            }
            Instr::Tax => {
                self.regs.x = self.regs.a;
                let x = self.regs.x;
                self.set_nz(x);
            }
            Instr::Tay => {
                self.regs.y = self.regs.a;
                let y = self.regs.y;
                self.set_nz(y);
            }
            Instr::Tsx => {
                self.regs.x = self.regs.sp;
                let x = self.regs.x;
                self.set_nz(x);
            }
            Instr::Txa => {
                self.regs.a = self.regs.x;
                let a = self.regs.a;
                self.set_nz(a);
            }
            Instr::Txs => self.regs.sp = self.regs.x,
            Instr::Tya => {
                self.regs.a = self.regs.y;
                let a = self.regs.a;
                self.set_nz(a);
            }
            _ => {}
        }
    }

    fn execute_read(&mut self, v: u8) {
        match OPCODES[self.ir as usize].instr {
            Instr::Adc => self.adc(v),
            Instr::Sbc => self.sbc(v),
            Instr::And => {
                self.regs.a &= v;
                let a = self.regs.a;
                self.set_nz(a);
            }
            Instr::Ora => {
                self.regs.a |= v;
                let a = self.regs.a;
                self.set_nz(a);
            }
            Instr::Eor => {
                self.regs.a ^= v;
                let a = self.regs.a;
                self.set_nz(a);
            }
            Instr::Bit => self.bit_test(v),
            Instr::Cmp => {
                let a = self.regs.a;
                self.cmp(a, v);
            }
            Instr::Cpx => {
                let x = self.regs.x;
                self.cmp(x, v);
            }
            Instr::Cpy => {
                let y = self.regs.y;
                self.cmp(y, v);
            }
            Instr::Lda => {
                self.regs.a = v;
                self.set_nz(v);
            }
            Instr::Ldx => {
                self.regs.x = v;
                self.set_nz(v);
            }
            Instr::Ldy => {
                self.regs.y = v;
                self.set_nz(v);
            }
            Instr::Lax => {
                self.regs.a = v;
                self.regs.x = v;
                self.set_nz(v);
            }
            Instr::Las => {
                let r = v & self.regs.sp;
                self.regs.a = r;
                self.regs.x = r;
                self.regs.sp = r;
                self.set_nz(r);
            }
            Instr::Anc => {
                self.regs.a &= v;
                let a = self.regs.a;
                self.set_nz(a);
                self.regs.sr.set(StatusFlags::C, a & 0x80 != 0);
            }
            Instr::Alr => {
                let t = self.regs.a & v;
                self.regs.a = self.lsr(t);
            }
            Instr::Arr => self.arr(v),
            Instr::Axs => self.axs(v),
            Instr::Ane => {
                let r = (self.regs.a | ANE_MAGIC) & self.regs.x & v;
                self.regs.a = r;
                self.set_nz(r);
            }
            Instr::Lxa => {
                let r = (self.regs.a | ANE_MAGIC) & v;
                self.regs.a = r;
                self.regs.x = r;
                self.set_nz(r);
            }
            _ => {}
        }
    }

    fn rmw_op(&mut self, v: u8) -> u8 {
        match OPCODES[self.ir as usize].instr {
            Instr::Asl => self.asl(v),
            Instr::Lsr => self.lsr(v),
            Instr::Rol => self.rol(v),
            Instr::Ror => self.ror(v),
            Instr::Inc => {
                let r = v.wrapping_add(1);
                self.set_nz(r);
                r
            }
            Instr::Dec => {
                let r = v.wrapping_sub(1);
                self.set_nz(r);
                r
            }
            Instr::Slo => {
                let r = self.asl(v);
                self.regs.a |= r;
                let a = self.regs.a;
                self.set_nz(a);
                r
            }
            Instr::Rla => {
                let r = self.rol(v);
                self.regs.a &= r;
                let a = self.regs.a;
                self.set_nz(a);
                r
            }
            Instr::Sre => {
                let r = self.lsr(v);
                self.regs.a ^= r;
                let a = self.regs.a;
                self.set_nz(a);
                r
            }
            Instr::Rra => {
                let r = self.ror(v);
                self.adc(r);
                r
            }
            Instr::Dcp => {
                let r = v.wrapping_sub(1);
                let a = self.regs.a;
                self.cmp(a, r);
                r
            }
            Instr::Isc => {
                let r = v.wrapping_add(1);
                self.sbc(r);
                r
            }
            _ => v,
        }
    }

    fn store_value(&self) -> u8 {
        match OPCODES[self.ir as usize].instr {
            Instr::Sta => self.regs.a,
            Instr::Stx => self.regs.x,
            Instr::Sty => self.regs.y,
            Instr::Sax => self.regs.a & self.regs.x,
            // Precomputed during the fixup cycle
            Instr::Sha | Instr::Shx | Instr::Shy | Instr::Tas => self.regs.idl,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use crate::bus::Bus;
    use crate::consts::{INTV_ADDR, NMIV_ADDR, RESV_ADDR};
    use crate::cpu::{CpuModel, M65xx};
    use crate::debugger::SoftStop;

    struct TestBus {
        ram: Vec<u8>,
        reads: Vec<u16>,
        writes: Vec<(u16, u8)>,
        jams: usize,
        breakpoints_hit: Vec<u16>,
        watchpoints_hit: Vec<u16>,
        nmi_will: usize,
        nmi_did: usize,
        irq_will: usize,
        irq_did: usize,
        logged: usize,
        port_writes: Vec<(u8, u8)>,
        ext_port: u8,
    }

    impl TestBus {
        fn new() -> Self {
            TestBus {
                ram: vec![0; 0x10000],
                reads: Vec::new(),
                writes: Vec::new(),
                jams: 0,
                breakpoints_hit: Vec::new(),
                watchpoints_hit: Vec::new(),
                nmi_will: 0,
                nmi_did: 0,
                irq_will: 0,
                irq_did: 0,
                logged: 0,
                port_writes: Vec::new(),
                ext_port: 0,
            }
        }

        fn copy(&mut self, dest: u16, buf: &[u8]) {
            let d = dest as usize;
            self.ram[d..d + buf.len()].copy_from_slice(buf);
        }

        fn w16(&mut self, addr: u16, data: u16) {
            self.ram[addr as usize] = data as u8;
            self.ram[addr as usize + 1] = (data >> 8) as u8;
        }

        fn get(&self, addr: u16) -> u8 {
            self.ram[addr as usize]
        }

        fn reads_of(&self, addr: u16) -> usize {
            self.reads.iter().filter(|a| **a == addr).count()
        }
    }

    impl Bus for TestBus {
        fn read(&mut self, addr: u16) -> u8 {
            self.reads.push(addr);
            self.ram[addr as usize]
        }

        fn write(&mut self, addr: u16, val: u8) {
            self.writes.push((addr, val));
            self.ram[addr as usize] = val;
        }

        fn read_dasm(&self, addr: u16) -> u8 {
            self.ram[addr as usize]
        }

        fn external_port_bits(&self) -> u8 {
            self.ext_port
        }

        fn port_did_write(&mut self, direction: u8, data: u8) {
            self.port_writes.push((direction, data));
        }

        fn cpu_did_jam(&mut self) {
            self.jams += 1;
        }

        fn irq_will_trigger(&mut self) {
            self.irq_will += 1;
        }

        fn irq_did_trigger(&mut self) {
            self.irq_did += 1;
        }

        fn nmi_will_trigger(&mut self) {
            self.nmi_will += 1;
        }

        fn nmi_did_trigger(&mut self) {
            self.nmi_did += 1;
        }

        fn breakpoint_reached(&mut self, addr: u16) {
            self.breakpoints_hit.push(addr);
        }

        fn watchpoint_reached(&mut self, addr: u16) {
            self.watchpoints_hit.push(addr);
        }

        fn instruction_logged(&mut self) {
            self.logged += 1;
        }
    }

    fn power_up(prog: &[u8], at: u16) -> (M65xx, TestBus) {
        let mut bus = TestBus::new();
        bus.copy(at, prog);
        bus.w16(RESV_ADDR, at);
        let mut cpu = M65xx::new();
        cpu.set_model(CpuModel::Mos6502).unwrap();
        cpu.reset(&mut bus);
        bus.reads.clear();
        bus.writes.clear();
        (cpu, bus)
    }

    fn step_instr(cpu: &mut M65xx, bus: &mut TestBus) -> u64 {
        let before = cpu.clock();
        cpu.step_instruction(bus);
        cpu.clock() - before
    }

    #[test]
    fn reset_enters_fetch_at_vector() {
        let (cpu, _bus) = power_up(&[0xEA], 0x0600);
        assert!(cpu.in_fetch_phase());
        assert_eq!(cpu.pc(), 0x0600);
        assert_eq!(cpu.pc0(), 0x0600);
        assert_eq!(cpu.sp(), 0xFD);
        assert!(cpu.i());
        assert!(!cpu.d());
        assert!(cpu.b());
    }

    #[test]
    fn fibonacci() {
        let prog = [
            0xA2, 0x01, // LDX #$01
            0x8E, 0x00, 0x02, // STX $0200
            0x8E, 0x01, 0x02, // STX $0201
            0xCA, // DEX
            0xBD, 0x00, 0x02, // LDA $0200,X
            0x7D, 0x01, 0x02, // ADC $0201,X
            0x9D, 0x02, 0x02, // STA $0202,X
            0xE8, // INX
            0xE0, 0x08, // CPX #$08
            0xD0, 0xF2, // BNE $0609
            0x00, // BRK
        ];
        let (mut cpu, mut bus) = power_up(&prog, 0x0600);

        while bus.get(cpu.pc0()) != 0x00 {
            cpu.step_instruction(&mut bus);
        }

        let expected = [1u8, 1, 2, 3, 5, 8, 13, 21, 34, 55];
        for (i, want) in expected.iter().enumerate() {
            assert_eq!(bus.get(0x0200 + i as u16), *want, "ram[{:04x}]", 0x0200 + i);
        }
    }

    #[test]
    fn documented_cycle_counts() {
        // (program, expected cycles of the first instruction)
        let cases: &[(&[u8], u64)] = &[
            (&[0xA9, 0x01], 2),             // LDA #
            (&[0xA5, 0x10], 3),             // LDA zpg
            (&[0xB5, 0x10], 4),             // LDA zpg,X
            (&[0xB6, 0x10], 4),             // LDX zpg,Y
            (&[0xAD, 0x00, 0x12], 4),       // LDA abs
            (&[0xBD, 0x00, 0x12], 4),       // LDA abs,X (no crossing)
            (&[0x9D, 0x00, 0x12], 5),       // STA abs,X (always 5)
            (&[0xA1, 0x10], 6),             // LDA (zp,X)
            (&[0xB1, 0x10], 5),             // LDA (zp),Y (no crossing)
            (&[0x91, 0x10], 6),             // STA (zp),Y (always 6)
            (&[0x06, 0x10], 5),             // ASL zpg
            (&[0x16, 0x10], 6),             // ASL zpg,X
            (&[0x0E, 0x00, 0x12], 6),       // ASL abs
            (&[0x1E, 0x00, 0x12], 7),       // ASL abs,X
            (&[0x48], 3),                   // PHA
            (&[0x68], 4),                   // PLA
            (&[0x08], 3),                   // PHP
            (&[0x28], 4),                   // PLP
            (&[0x20, 0x00, 0x12], 6),       // JSR
            (&[0x4C, 0x00, 0x12], 3),       // JMP abs
            (&[0x6C, 0x00, 0x12], 5),       // JMP (ind)
            (&[0x00], 7),                   // BRK
            (&[0xEA], 2),                   // NOP
            (&[0xAA], 2),                   // TAX
            (&[0xC7, 0x10], 5),             // DCP* zpg
            (&[0xD3, 0x10], 8),             // DCP* (zp),Y
            (&[0xDB, 0x00, 0x12], 7),       // DCP* abs,Y
        ];
        for (prog, want) in cases {
            let (mut cpu, mut bus) = power_up(prog, 0x0400);
            let ticks = step_instr(&mut cpu, &mut bus);
            assert_eq!(ticks, *want, "opcode {:02X}", prog[0]);
        }
    }

    #[test]
    fn indexed_page_crossing_adds_a_cycle() {
        let (mut cpu, mut bus) = power_up(&[0xBD, 0xFF, 0x12], 0x0400); // LDA $12FF,X
        cpu.set_x(0x02);
        assert_eq!(step_instr(&mut cpu, &mut bus), 5);
        // Dummy read at the wrong page precedes the corrected access
        assert_eq!(bus.reads_of(0x1201), 1);
        assert_eq!(bus.reads_of(0x1301), 1);

        let (mut cpu, mut bus) = power_up(&[0xB9, 0xFE, 0x12], 0x0400); // LDA $12FE,Y
        cpu.set_y(0x01);
        assert_eq!(step_instr(&mut cpu, &mut bus), 4);
        assert_eq!(bus.reads_of(0x12FF), 1);
    }

    #[test]
    fn ind_y_page_crossing() {
        let (mut cpu, mut bus) = power_up(&[0xB1, 0x80], 0x0400); // LDA ($80),Y
        bus.ram[0x80] = 0xFF;
        bus.ram[0x81] = 0x20;
        bus.ram[0x2100] = 0x5A;
        cpu.set_y(0x01);
        assert_eq!(step_instr(&mut cpu, &mut bus), 6);
        assert_eq!(cpu.a(), 0x5A);
        assert_eq!(bus.reads_of(0x2000), 1); // wrong-page dummy read
    }

    #[test]
    fn zero_page_pointer_wraps() {
        // Pointer high byte of ($FF),Y comes from $00
        let (mut cpu, mut bus) = power_up(&[0xB1, 0xFF], 0x0400);
        bus.ram[0xFF] = 0x34;
        bus.ram[0x00] = 0x12;
        bus.ram[0x1234] = 0x99;
        assert_eq!(step_instr(&mut cpu, &mut bus), 5);
        assert_eq!(cpu.a(), 0x99);

        // Zero page indexing wraps inside the page
        let (mut cpu, mut bus) = power_up(&[0xB5, 0xFF], 0x0400); // LDA $FF,X
        bus.ram[0x01] = 0x42;
        cpu.set_x(0x02);
        assert_eq!(step_instr(&mut cpu, &mut bus), 4);
        assert_eq!(cpu.a(), 0x42);
        assert_eq!(bus.reads_of(0x00FF), 1); // un-indexed dummy read
    }

    #[test]
    fn jmp_indirect_page_boundary_bug() {
        let (mut cpu, mut bus) = power_up(&[0x6C, 0xFF, 0x30], 0x0400); // JMP ($30FF)
        bus.ram[0x30FF] = 0x40;
        bus.ram[0x3000] = 0x80;
        bus.ram[0x3100] = 0x50;
        assert_eq!(step_instr(&mut cpu, &mut bus), 5);
        assert_eq!(cpu.pc(), 0x8040);
    }

    #[test]
    fn branch_timing() {
        // Not taken: 2 cycles
        let (mut cpu, mut bus) = power_up(&[0xF0, 0x10], 0x0400); // BEQ +$10
        cpu.set_z(false);
        assert_eq!(step_instr(&mut cpu, &mut bus), 2);
        assert_eq!(cpu.pc(), 0x0402);

        // Taken, same page: 3 cycles
        let (mut cpu, mut bus) = power_up(&[0xF0, 0x10], 0x0400);
        cpu.set_z(true);
        assert_eq!(step_instr(&mut cpu, &mut bus), 3);
        assert_eq!(cpu.pc(), 0x0412);

        // Taken, page crossed: 4 cycles
        let (mut cpu, mut bus) = power_up(&[0xF0, 0x10], 0x02F0); // BEQ at $02F0
        cpu.set_z(true);
        assert_eq!(step_instr(&mut cpu, &mut bus), 4);
        assert_eq!(cpu.pc(), 0x0302);

        // Backwards across a page
        let (mut cpu, mut bus) = power_up(&[0xD0, 0xFA], 0x0500); // BNE -6
        cpu.set_z(false);
        assert_eq!(step_instr(&mut cpu, &mut bus), 4);
        assert_eq!(cpu.pc(), 0x04FC);
    }

    #[test]
    fn rmw_performs_dummy_write() {
        let (mut cpu, mut bus) = power_up(&[0x06, 0x10], 0x0400); // ASL $10
        bus.ram[0x10] = 0x41;
        step_instr(&mut cpu, &mut bus);
        assert_eq!(bus.writes, vec![(0x0010, 0x41), (0x0010, 0x82)]);
    }

    #[test]
    fn adc_bcd_program() {
        let prog = [
            0xF8, // SED
            0xA9, 0x15, // LDA #$15
            0x18, // CLC
            0x69, 0x27, // ADC #$27
        ];
        let (mut cpu, mut bus) = power_up(&prog, 0x0400);
        cpu.step_instructions(&mut bus, 4);
        assert_eq!(cpu.a(), 0x42);
        assert!(!cpu.c());
        assert!(!cpu.z());
        assert!(!cpu.n());
    }

    #[test]
    fn stack_wraps_inside_page_one() {
        let (mut cpu, mut bus) = power_up(&[0x48, 0x48], 0x0400); // PHA, PHA
        cpu.set_sp(0x00);
        cpu.set_a(0xAB);
        step_instr(&mut cpu, &mut bus);
        assert_eq!(bus.get(0x0100), 0xAB);
        assert_eq!(cpu.sp(), 0xFF);
        step_instr(&mut cpu, &mut bus);
        assert_eq!(bus.get(0x01FF), 0xAB);
    }

    #[test]
    fn jsr_rts_round_trip() {
        let prog = [
            0x20, 0x10, 0x04, // JSR $0410
            0xEA, // NOP
        ];
        let (mut cpu, mut bus) = power_up(&prog, 0x0400);
        bus.ram[0x0410] = 0x60; // RTS
        assert_eq!(step_instr(&mut cpu, &mut bus), 6);
        assert_eq!(cpu.pc(), 0x0410);
        // Return address on the stack is the address of the JSR's last byte
        assert_eq!(bus.get(0x01FD), 0x04);
        assert_eq!(bus.get(0x01FC), 0x02);
        assert_eq!(step_instr(&mut cpu, &mut bus), 6);
        assert_eq!(cpu.pc(), 0x0403);
    }

    #[test]
    fn brk_and_rti() {
        let (mut cpu, mut bus) = power_up(&[0x00], 0x0400);
        bus.w16(INTV_ADDR, 0x8000);
        bus.ram[0x8000] = 0x40; // RTI
        assert_eq!(step_instr(&mut cpu, &mut bus), 7);
        assert_eq!(cpu.pc(), 0x8000);
        assert!(cpu.i());
        // Pushed P has B set, bit 5 set
        let pushed = bus.get(0x01FB);
        assert_eq!(pushed & 0x30, 0x30);
        // Pushed return address skips the padding byte
        assert_eq!(bus.get(0x01FD), 0x04);
        assert_eq!(bus.get(0x01FC), 0x02);
        assert_eq!(step_instr(&mut cpu, &mut bus), 6);
        assert_eq!(cpu.pc(), 0x0402);
    }

    #[test]
    fn irq_serviced_when_enabled() {
        let prog = [
            0x58, // CLI
            0xEA, // NOP
            0xEA, // NOP
        ];
        let (mut cpu, mut bus) = power_up(&prog, 0x0400);
        bus.w16(INTV_ADDR, 0x9000);
        cpu.step_instruction(&mut bus); // CLI
        cpu.pull_down_irq_line(0x01);

        // The NOP at $0401 completes first, then the 7-cycle sequence runs
        cpu.step_instruction(&mut bus);
        assert_eq!(cpu.pc0(), 0x0401);
        let ticks = step_instr(&mut cpu, &mut bus);
        assert_eq!(ticks, 7);
        assert_eq!(cpu.pc(), 0x9000);
        assert!(cpu.i());
        assert_eq!(bus.irq_will, 1);
        assert_eq!(bus.irq_did, 1);
        // Pushed P has B clear
        assert_eq!(bus.get(0x01FB) & 0x10, 0x00);
        // Return address is the interrupted instruction
        assert_eq!(bus.get(0x01FD), 0x04);
        assert_eq!(bus.get(0x01FC), 0x02);
    }

    #[test]
    fn irq_masked_by_i_flag() {
        let (mut cpu, mut bus) = power_up(&[0xEA, 0xEA, 0xEA], 0x0400);
        cpu.pull_down_irq_line(0x01); // I is set after reset
        cpu.step_instructions(&mut bus, 3);
        assert_eq!(cpu.pc(), 0x0403);
        assert_eq!(bus.irq_will, 0);
    }

    #[test]
    fn cli_delays_irq_by_one_instruction() {
        let prog = [
            0x58, // CLI
            0xE8, // INX
            0xE8, // INX
        ];
        let (mut cpu, mut bus) = power_up(&prog, 0x0400);
        bus.w16(INTV_ADDR, 0x9000);
        cpu.pull_down_irq_line(0x01);

        // The IRQ is polled with the old I flag during CLI itself, so the
        // following instruction still executes.
        cpu.step_instruction(&mut bus);
        cpu.step_instruction(&mut bus);
        assert_eq!(cpu.x(), 1);
        cpu.step_instruction(&mut bus);
        assert_eq!(cpu.pc(), 0x9000);
        assert_eq!(cpu.x(), 1);
    }

    #[test]
    fn irq_released_before_poll_is_dropped() {
        let (mut cpu, mut bus) = power_up(&[0x58, 0xEA, 0xEA, 0xEA], 0x0400);
        cpu.step_instruction(&mut bus); // CLI
        cpu.pull_down_irq_line(0x01);
        cpu.release_irq_line(0x01);
        cpu.step_instructions(&mut bus, 3);
        assert_eq!(bus.irq_will, 0);
        assert_eq!(cpu.pc(), 0x0404);
    }

    #[test]
    fn nmi_edge_detected_once_while_held() {
        let (mut cpu, mut bus) = power_up(&[0xEA; 16], 0x0400);
        bus.w16(NMIV_ADDR, 0xA000);
        bus.ram[0xA000..0xA010].fill(0xEA);
        cpu.pull_down_nmi_line(0x01);

        cpu.step_instruction(&mut bus); // NOP at $0400
        cpu.step_instruction(&mut bus); // NMI sequence
        assert_eq!(cpu.pc(), 0xA000);
        assert_eq!(bus.nmi_will, 1);
        assert_eq!(bus.nmi_did, 1);

        // The line stays low; no second service
        cpu.step_instructions(&mut bus, 4);
        assert_eq!(bus.nmi_will, 1);

        // Release and pull again: a new edge
        cpu.release_nmi_line(0x01);
        cpu.pull_down_nmi_line(0x01);
        cpu.step_instructions(&mut bus, 2);
        assert_eq!(bus.nmi_will, 2);
    }

    #[test]
    fn nmi_wins_over_irq() {
        let (mut cpu, mut bus) = power_up(&[0x58, 0xEA, 0xEA], 0x0400);
        bus.w16(NMIV_ADDR, 0xA000);
        bus.w16(INTV_ADDR, 0x9000);
        bus.ram[0xA000] = 0xEA;
        cpu.step_instruction(&mut bus); // CLI
        cpu.pull_down_irq_line(0x01);
        cpu.pull_down_nmi_line(0x01);
        cpu.step_instruction(&mut bus); // NOP
        cpu.step_instruction(&mut bus); // interrupt sequence
        assert_eq!(cpu.pc(), 0xA000);
        assert_eq!(bus.nmi_will, 1);
        assert_eq!(bus.irq_will, 0);
    }

    #[test]
    fn nmi_hijacks_brk() {
        let (mut cpu, mut bus) = power_up(&[0x00], 0xC000);
        bus.w16(NMIV_ADDR, 0xA000);
        bus.w16(INTV_ADDR, 0x9000);

        cpu.step(&mut bus); // cycle 1: fetch
        cpu.step(&mut bus); // cycle 2: padding byte
        cpu.pull_down_nmi_line(0x01);
        cpu.finish_instruction(&mut bus);

        // BRK still pushes P with B set, but the NMI vector is used
        assert_eq!(cpu.pc(), 0xA000);
        let pushed = bus.get(0x01FB);
        assert_ne!(pushed & 0x10, 0);
        assert_eq!(bus.nmi_will, 1);
        assert_eq!(bus.nmi_did, 1);

        // The hijacked edge is consumed; no separate NMI sequence follows
        bus.ram[0xA000] = 0xEA;
        cpu.step_instruction(&mut bus);
        assert_eq!(cpu.pc(), 0xA001);
        assert_eq!(bus.nmi_will, 1);
    }

    #[test]
    fn rdy_freezes_read_cycles() {
        let (mut cpu, mut bus) = power_up(&[0xAD, 0x34, 0x12, 0xEA], 0x0400); // LDA $1234
        bus.ram[0x1234] = 0x77;
        cpu.set_rdy(false);

        let before = cpu.clock();
        cpu.step_n(&mut bus, 10);
        assert_eq!(cpu.clock(), before + 10);
        assert_eq!(bus.reads_of(0x1234), 0);
        assert_eq!(cpu.a(), 0x00);
        assert!(cpu.in_fetch_phase()); // still stuck on the opcode fetch

        cpu.set_rdy(true);
        cpu.step_instruction(&mut bus);
        assert_eq!(cpu.a(), 0x77);
        assert_eq!(bus.reads_of(0x1234), 1);
        cpu.step_instruction(&mut bus); // NOP proceeds normally
        assert_eq!(cpu.pc(), 0x0404);
    }

    #[test]
    fn rdy_does_not_block_writes() {
        let (mut cpu, mut bus) = power_up(&[0x8D, 0x34, 0x12], 0x0400); // STA $1234
        cpu.set_a(0x5C);
        cpu.step_n(&mut bus, 3); // fetch, operand lo, operand hi
        cpu.set_rdy(false);
        cpu.step(&mut bus); // the write cycle proceeds
        assert_eq!(bus.get(0x1234), 0x5C);
    }

    #[test]
    fn jam_halts_until_reset() {
        let (mut cpu, mut bus) = power_up(&[0x02], 0x0400);
        cpu.step_instruction(&mut bus);
        assert!(cpu.is_jammed());
        cpu.step(&mut bus); // the lockup cycle signals the host once
        assert_eq!(bus.jams, 1);

        let accesses = bus.reads.len() + bus.writes.len();
        let clock = cpu.clock();
        cpu.step_n(&mut bus, 5);
        assert_eq!(cpu.clock(), clock + 5);
        assert_eq!(bus.reads.len() + bus.writes.len(), accesses);
        assert_eq!(bus.jams, 1);

        cpu.reset(&mut bus);
        assert!(!cpu.is_jammed());
        assert!(cpu.in_fetch_phase());
    }

    #[test]
    fn processor_port_intercepts_page_zero() {
        let prog = [
            0xA9, 0x0F, // LDA #$0F
            0x85, 0x00, // STA $00  (direction)
            0xA9, 0x05, // LDA #$05
            0x85, 0x01, // STA $01  (data)
            0xA5, 0x01, // LDA $01
        ];
        let mut bus = TestBus::new();
        bus.copy(0x0400, &prog);
        bus.w16(RESV_ADDR, 0x0400);
        bus.ext_port = 0xA0;
        let mut cpu = M65xx::new(); // 6510 by default
        cpu.reset(&mut bus);

        cpu.step_instructions(&mut bus, 5);
        // Output bits from the data register, input bits from outside
        assert_eq!(cpu.a(), 0x05 | 0xA0);
        assert_eq!(bus.port_writes, vec![(0x0F, 0x00), (0x0F, 0x05)]);
        // RAM behind the port is untouched
        assert_eq!(bus.get(0x0000), 0x00);
        assert_eq!(bus.get(0x0001), 0x00);
    }

    #[test]
    fn models_without_port_use_memory() {
        let prog = [
            0xA9, 0x0F, // LDA #$0F
            0x85, 0x00, // STA $00
            0xA5, 0x00, // LDA $00
        ];
        let (mut cpu, mut bus) = power_up(&prog, 0x0400);
        cpu.step_instructions(&mut bus, 3);
        assert_eq!(bus.get(0x0000), 0x0F);
        assert_eq!(cpu.a(), 0x0F);
        assert!(bus.port_writes.is_empty());
    }

    #[test]
    fn model_6507_masks_the_address_bus() {
        let mut bus = TestBus::new();
        bus.copy(0x0400, &[0xAD, 0x34, 0xF2]); // LDA $F234
        bus.w16(RESV_ADDR, 0x0400);
        bus.ram[0x1234] = 0x3C;
        let mut cpu = M65xx::new();
        cpu.set_model(CpuModel::Mos6507).unwrap();
        cpu.reset(&mut bus);
        bus.reads.clear();

        cpu.step_instruction(&mut bus);
        assert_eq!(cpu.a(), 0x3C);
        assert_eq!(bus.reads_of(0x1234), 1);
        assert_eq!(bus.reads_of(0xF234), 0);
    }

    #[test]
    fn model_change_requires_fetch_phase() {
        let (mut cpu, mut bus) = power_up(&[0xAD, 0x34, 0x12], 0x0400);
        cpu.step(&mut bus);
        assert!(cpu.set_model(CpuModel::Mos6510).is_err());
        cpu.finish_instruction(&mut bus);
        assert!(cpu.set_model(CpuModel::Mos6510).is_ok());
    }

    #[test]
    fn step_instructions_equivalence() {
        let prog = [
            0xA2, 0x05, // LDX #$05
            0xCA, // DEX
            0xD0, 0xFD, // BNE -3
            0xEA, // NOP
        ];
        let (mut a, mut bus_a) = power_up(&prog, 0x0400);
        let (mut b, mut bus_b) = power_up(&prog, 0x0400);

        a.step_instructions(&mut bus_a, 8);
        for _ in 0..8 {
            b.step_instruction(&mut bus_b);
        }
        assert_eq!(a.clock(), b.clock());
        assert_eq!(a.pc(), b.pc());
        assert_eq!(a.x(), b.x());
        assert_eq!(a.p(), b.p());
    }

    #[test]
    fn pc0_frozen_during_instruction() {
        let (mut cpu, mut bus) = power_up(&[0xAD, 0x34, 0x12], 0x0400);
        cpu.step(&mut bus);
        cpu.step(&mut bus);
        assert_eq!(cpu.pc0(), 0x0400);
        assert_eq!(cpu.pc(), 0x0402);
        cpu.finish_instruction(&mut bus);
        assert_eq!(cpu.pc0(), 0x0400);
    }

    #[test]
    fn breakpoint_reported_at_fetch() {
        let (mut cpu, mut bus) = power_up(&[0xEA, 0xEA, 0xEA], 0x0400);
        cpu.debugger.breakpoints.add_at(0x0401, 0);
        cpu.step_instructions(&mut bus, 3);
        assert_eq!(bus.breakpoints_hit, vec![0x0401]);
        assert_eq!(cpu.debugger.breakpoint_pc, Some(0x0401));
    }

    #[test]
    fn watchpoint_reported_on_access() {
        let (mut cpu, mut bus) = power_up(&[0x8D, 0x00, 0x02], 0x0400); // STA $0200
        cpu.debugger.watchpoints.add_at(0x0200, 0);
        cpu.step_instruction(&mut bus);
        assert_eq!(bus.watchpoints_hit, vec![0x0200]);
        assert_eq!(cpu.debugger.watchpoint_pc, Some(0x0400));
    }

    #[test]
    fn soft_stop_reports_next_instruction() {
        let (mut cpu, mut bus) = power_up(&[0xEA, 0xEA], 0x0400);
        cpu.debugger.set_soft_stop(SoftStop::NextInstruction);
        cpu.step_instructions(&mut bus, 2);
        assert_eq!(bus.breakpoints_hit, vec![0x0400]);
    }

    #[test]
    fn instruction_log_records_state() {
        let prog = [
            0xA9, 0x42, // LDA #$42
            0x8D, 0x00, 0x02, // STA $0200
        ];
        let (mut cpu, mut bus) = power_up(&prog, 0x0400);
        cpu.debugger.enable_logging();
        cpu.step_instructions(&mut bus, 2);

        assert_eq!(bus.logged, 2);
        assert_eq!(cpu.debugger.logged_instructions(), 2);
        let first = cpu.debugger.log_entry_abs(0).copied().unwrap();
        assert_eq!(first.pc, 0x0400);
        assert_eq!(first.byte1, 0xA9);
        assert_eq!(first.byte2, 0x42);
        assert_eq!(first.byte3, 0x00);
        let second = cpu.debugger.log_entry_rel(0).copied().unwrap();
        assert_eq!(second.pc, 0x0402);
        assert_eq!(second.byte1, 0x8D);
        assert_eq!(second.a, 0x42);
    }

    #[test]
    fn jump_restarts_at_address() {
        let (mut cpu, mut bus) = power_up(&[0xEA; 8], 0x0400);
        bus.ram[0x0500] = 0xE8; // INX
        cpu.step(&mut bus); // into the NOP
        cpu.jump(0x0500);
        assert!(cpu.in_fetch_phase());
        cpu.step_instruction(&mut bus);
        assert_eq!(cpu.x(), 1);
        assert_eq!(cpu.pc0(), 0x0500);
    }

    #[test]
    fn unstable_stores_use_documented_model() {
        #[cfg(feature = "unstable-ops")]
        {
            // SHX $12F8,Y with Y = $10 crosses a page: the value X & (H+1)
            // also replaces the target high byte.
            let (mut cpu, mut bus) = power_up(&[0x9E, 0xF8, 0x12], 0x0400);
            cpu.set_x(0xFF);
            cpu.set_y(0x10);
            step_instr(&mut cpu, &mut bus);
            let v = 0xFF & 0x13;
            assert_eq!(bus.get((v as u16) << 8 | 0x08), v);

            // Without a crossing the target is untouched
            let (mut cpu, mut bus) = power_up(&[0x9E, 0x10, 0x12], 0x0400);
            cpu.set_x(0x3F);
            cpu.set_y(0x01);
            step_instr(&mut cpu, &mut bus);
            assert_eq!(bus.get(0x1211), 0x3F & 0x13);
        }
    }

    #[test]
    fn lax_and_sax() {
        let (mut cpu, mut bus) = power_up(&[0xA7, 0x10, 0x87, 0x11], 0x0400); // LAX $10, SAX $11
        bus.ram[0x10] = 0x6E;
        cpu.step_instruction(&mut bus);
        assert_eq!(cpu.a(), 0x6E);
        assert_eq!(cpu.x(), 0x6E);
        cpu.step_instruction(&mut bus);
        assert_eq!(bus.get(0x11), 0x6E);
    }

    #[test]
    fn snapshot_round_trip() {
        let prog = [
            0xA2, 0x05, // LDX #$05
            0xCA, // DEX
            0xD0, 0xFD, // BNE -3
            0xEA, // NOP
        ];
        let (mut cpu, mut bus) = power_up(&prog, 0x0400);
        cpu.step_instructions(&mut bus, 3);

        let mut buf = [0u8; 4096];
        crate::serialize(&cpu, &mut buf).unwrap();
        let mut restored = crate::deserialize(&buf).unwrap();

        cpu.step_instructions(&mut bus, 4);
        restored.step_instructions(&mut bus, 4);
        assert_eq!(cpu.clock(), restored.clock());
        assert_eq!(cpu.pc(), restored.pc());
        assert_eq!(cpu.x(), restored.x());
        assert_eq!(cpu.p(), restored.p());
    }
}
