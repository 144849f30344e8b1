use serde::{Deserialize, Serialize};

/* One tag per microcycle of work. The engine holds the tag of the next
 * cycle; the opcode table stores the tag of the cycle following the fetch
 * phase. Multi-cycle interrupt and subroutine sequences carry their cycle
 * index as payload.
 */
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MicroInstruction {
    Fetch,

    // Lockup state entered by the twelve halting opcodes. Jam signals the
    // host once, Jam2 keeps the clock ticking without bus traffic.
    Jam,
    Jam2,

    Implied,
    Accumulator,
    Immediate,

    ZpgLo,
    ZpgAccess,

    ZpgIdxLo,
    ZpgIdxDummy,
    ZpgIdxAccess,

    AbsLo,
    AbsHi,
    AbsAccess,

    AbsIdxLo,
    AbsIdxHi,
    AbsIdxFixup,
    AbsIdxAccess,

    IndXLo,
    IndXDummy,
    IndXPtrLo,
    IndXPtrHi,
    IndXAccess,

    IndYLo,
    IndYPtrLo,
    IndYPtrHi,
    IndYFixup,
    IndYAccess,

    // Shared read-modify-write tail: value was read at the access cycle,
    // Modify writes it back unmodified while the ALU works, Write stores
    // the result.
    RmwModify,
    RmwWrite,

    Branch,
    BranchTaken,
    BranchFixup,

    JmpLo,
    JmpHi,

    JmpIndLo,
    JmpIndHi,
    JmpIndPtrLo,
    JmpIndPtrHi,

    Push,
    PushWrite,

    Pull,
    PullIdle,
    PullRead,

    Jsr(u8),
    Rts(u8),
    Rti(u8),
    Brk(u8),
    Irq(u8),
    Nmi(u8),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressingMode {
    Implied,
    Accumulator,
    Immediate,
    ZeroPage,
    ZeroPageX,
    ZeroPageY,
    Absolute,
    AbsoluteX,
    AbsoluteY,
    IndirectX,
    IndirectY,
    Indirect,
    Relative,
    Direct,
}

impl AddressingMode {
    // Instruction length in bytes, opcode included.
    #[must_use]
    pub const fn length(self) -> usize {
        match self {
            AddressingMode::Implied | AddressingMode::Accumulator => 1,
            AddressingMode::Immediate
            | AddressingMode::ZeroPage
            | AddressingMode::ZeroPageX
            | AddressingMode::ZeroPageY
            | AddressingMode::IndirectX
            | AddressingMode::IndirectY
            | AddressingMode::Relative => 2,
            AddressingMode::Absolute
            | AddressingMode::AbsoluteX
            | AddressingMode::AbsoluteY
            | AddressingMode::Indirect
            | AddressingMode::Direct => 3,
        }
    }
}

// Operation selector consulted by the terminal cycles of the addressing
// sequences. Control flow and stack operations never reach an access cycle;
// their semantics live entirely in their microinstruction tags.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instr {
    Adc,
    And,
    Asl,
    Bcc,
    Bcs,
    Beq,
    Bit,
    Bmi,
    Bne,
    Bpl,
    Brk,
    Bvc,
    Bvs,
    Clc,
    Cld,
    Cli,
    Clv,
    Cmp,
    Cpx,
    Cpy,
    Dec,
    Dex,
    Dey,
    Eor,
    Inc,
    Inx,
    Iny,
    Jmp,
    Jsr,
    Lda,
    Ldx,
    Ldy,
    Lsr,
    Nop,
    Ora,
    Pha,
    Php,
    Pla,
    Plp,
    Rol,
    Ror,
    Rti,
    Rts,
    Sbc,
    Sec,
    Sed,
    Sei,
    Sta,
    Stx,
    Sty,
    Tax,
    Tay,
    Tsx,
    Txa,
    Txs,
    Tya,

    Slo,
    Rla,
    Sre,
    Rra,
    Sax,
    Lax,
    Dcp,
    Isc,
    Anc,
    Alr,
    Arr,
    Axs,

    Ane,
    Lxa,
    Sha,
    Shx,
    Shy,
    Tas,
    Las,

    Jam,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum AccessKind {
    Read,
    Write,
    Modify,
}

impl Instr {
    pub(crate) const fn access_kind(self) -> AccessKind {
        match self {
            Instr::Sta
            | Instr::Stx
            | Instr::Sty
            | Instr::Sax
            | Instr::Sha
            | Instr::Shx
            | Instr::Shy
            | Instr::Tas => AccessKind::Write,
            Instr::Asl
            | Instr::Lsr
            | Instr::Rol
            | Instr::Ror
            | Instr::Inc
            | Instr::Dec
            | Instr::Slo
            | Instr::Rla
            | Instr::Sre
            | Instr::Rra
            | Instr::Dcp
            | Instr::Isc => AccessKind::Modify,
            _ => AccessKind::Read,
        }
    }

    /* True for the opcodes whose result depends on internal bus noise on
     * real silicon. The emulation always produces the documented
     * magic-constant result.
     */
    #[must_use]
    pub const fn is_unstable(self) -> bool {
        matches!(
            self,
            Instr::Ane
                | Instr::Lxa
                | Instr::Sha
                | Instr::Shx
                | Instr::Shy
                | Instr::Tas
                | Instr::Las
        )
    }
}

#[derive(Copy, Clone, Debug)]
pub struct OpEntry {
    pub mnemonic: &'static str,
    pub mode: AddressingMode,
    pub instr: Instr,
    pub micro: MicroInstruction,
}

const fn op(mnemonic: &'static str, mode: AddressingMode, instr: Instr) -> OpEntry {
    // First microinstruction after the fetch phase.
    let micro = match instr {
        Instr::Jam => MicroInstruction::Jam,
        Instr::Brk => MicroInstruction::Brk(0),
        Instr::Jsr => MicroInstruction::Jsr(0),
        Instr::Rts => MicroInstruction::Rts(0),
        Instr::Rti => MicroInstruction::Rti(0),
        Instr::Pha | Instr::Php => MicroInstruction::Push,
        Instr::Pla | Instr::Plp => MicroInstruction::Pull,
        Instr::Jmp => match mode {
            AddressingMode::Indirect => MicroInstruction::JmpIndLo,
            _ => MicroInstruction::JmpLo,
        },
        _ => match mode {
            AddressingMode::Implied => MicroInstruction::Implied,
            AddressingMode::Accumulator => MicroInstruction::Accumulator,
            AddressingMode::Immediate => MicroInstruction::Immediate,
            AddressingMode::ZeroPage => MicroInstruction::ZpgLo,
            AddressingMode::ZeroPageX | AddressingMode::ZeroPageY => MicroInstruction::ZpgIdxLo,
            AddressingMode::Absolute | AddressingMode::Direct => MicroInstruction::AbsLo,
            AddressingMode::AbsoluteX | AddressingMode::AbsoluteY => MicroInstruction::AbsIdxLo,
            AddressingMode::IndirectX => MicroInstruction::IndXLo,
            AddressingMode::IndirectY => MicroInstruction::IndYLo,
            AddressingMode::Relative => MicroInstruction::Branch,
            AddressingMode::Indirect => MicroInstruction::JmpIndLo,
        },
    };
    OpEntry {
        mnemonic,
        mode,
        instr,
        micro,
    }
}

/* The 256-entry opcode map, immutable after construction. Unassigned slots
 * keep the lockup entry.
 */
pub static OPCODES: [OpEntry; 256] = register_instructions();

const fn register_instructions() -> [OpEntry; 256] {
    use AddressingMode::*;

    let mut t = [op("???", Implied, Instr::Jam); 256];

    // Legal instructions
    t[0x69] = op("ADC", Immediate, Instr::Adc);
    t[0x65] = op("ADC", ZeroPage, Instr::Adc);
    t[0x75] = op("ADC", ZeroPageX, Instr::Adc);
    t[0x6D] = op("ADC", Absolute, Instr::Adc);
    t[0x7D] = op("ADC", AbsoluteX, Instr::Adc);
    t[0x79] = op("ADC", AbsoluteY, Instr::Adc);
    t[0x61] = op("ADC", IndirectX, Instr::Adc);
    t[0x71] = op("ADC", IndirectY, Instr::Adc);

    t[0x29] = op("AND", Immediate, Instr::And);
    t[0x25] = op("AND", ZeroPage, Instr::And);
    t[0x35] = op("AND", ZeroPageX, Instr::And);
    t[0x2D] = op("AND", Absolute, Instr::And);
    t[0x3D] = op("AND", AbsoluteX, Instr::And);
    t[0x39] = op("AND", AbsoluteY, Instr::And);
    t[0x21] = op("AND", IndirectX, Instr::And);
    t[0x31] = op("AND", IndirectY, Instr::And);

    t[0x0A] = op("ASL", Accumulator, Instr::Asl);
    t[0x06] = op("ASL", ZeroPage, Instr::Asl);
    t[0x16] = op("ASL", ZeroPageX, Instr::Asl);
    t[0x0E] = op("ASL", Absolute, Instr::Asl);
    t[0x1E] = op("ASL", AbsoluteX, Instr::Asl);

    t[0x90] = op("BCC", Relative, Instr::Bcc);
    t[0xB0] = op("BCS", Relative, Instr::Bcs);
    t[0xF0] = op("BEQ", Relative, Instr::Beq);

    t[0x24] = op("BIT", ZeroPage, Instr::Bit);
    t[0x2C] = op("BIT", Absolute, Instr::Bit);

    t[0x30] = op("BMI", Relative, Instr::Bmi);
    t[0xD0] = op("BNE", Relative, Instr::Bne);
    t[0x10] = op("BPL", Relative, Instr::Bpl);
    t[0x00] = op("BRK", Implied, Instr::Brk);
    t[0x50] = op("BVC", Relative, Instr::Bvc);
    t[0x70] = op("BVS", Relative, Instr::Bvs);

    t[0x18] = op("CLC", Implied, Instr::Clc);
    t[0xD8] = op("CLD", Implied, Instr::Cld);
    t[0x58] = op("CLI", Implied, Instr::Cli);
    t[0xB8] = op("CLV", Implied, Instr::Clv);

    t[0xC9] = op("CMP", Immediate, Instr::Cmp);
    t[0xC5] = op("CMP", ZeroPage, Instr::Cmp);
    t[0xD5] = op("CMP", ZeroPageX, Instr::Cmp);
    t[0xCD] = op("CMP", Absolute, Instr::Cmp);
    t[0xDD] = op("CMP", AbsoluteX, Instr::Cmp);
    t[0xD9] = op("CMP", AbsoluteY, Instr::Cmp);
    t[0xC1] = op("CMP", IndirectX, Instr::Cmp);
    t[0xD1] = op("CMP", IndirectY, Instr::Cmp);

    t[0xE0] = op("CPX", Immediate, Instr::Cpx);
    t[0xE4] = op("CPX", ZeroPage, Instr::Cpx);
    t[0xEC] = op("CPX", Absolute, Instr::Cpx);

    t[0xC0] = op("CPY", Immediate, Instr::Cpy);
    t[0xC4] = op("CPY", ZeroPage, Instr::Cpy);
    t[0xCC] = op("CPY", Absolute, Instr::Cpy);

    t[0xC6] = op("DEC", ZeroPage, Instr::Dec);
    t[0xD6] = op("DEC", ZeroPageX, Instr::Dec);
    t[0xCE] = op("DEC", Absolute, Instr::Dec);
    t[0xDE] = op("DEC", AbsoluteX, Instr::Dec);

    t[0xCA] = op("DEX", Implied, Instr::Dex);
    t[0x88] = op("DEY", Implied, Instr::Dey);

    t[0x49] = op("EOR", Immediate, Instr::Eor);
    t[0x45] = op("EOR", ZeroPage, Instr::Eor);
    t[0x55] = op("EOR", ZeroPageX, Instr::Eor);
    t[0x4D] = op("EOR", Absolute, Instr::Eor);
    t[0x5D] = op("EOR", AbsoluteX, Instr::Eor);
    t[0x59] = op("EOR", AbsoluteY, Instr::Eor);
    t[0x41] = op("EOR", IndirectX, Instr::Eor);
    t[0x51] = op("EOR", IndirectY, Instr::Eor);

    t[0xE6] = op("INC", ZeroPage, Instr::Inc);
    t[0xF6] = op("INC", ZeroPageX, Instr::Inc);
    t[0xEE] = op("INC", Absolute, Instr::Inc);
    t[0xFE] = op("INC", AbsoluteX, Instr::Inc);

    t[0xE8] = op("INX", Implied, Instr::Inx);
    t[0xC8] = op("INY", Implied, Instr::Iny);

    t[0x4C] = op("JMP", Direct, Instr::Jmp);
    t[0x6C] = op("JMP", Indirect, Instr::Jmp);

    t[0x20] = op("JSR", Direct, Instr::Jsr);

    t[0xA9] = op("LDA", Immediate, Instr::Lda);
    t[0xA5] = op("LDA", ZeroPage, Instr::Lda);
    t[0xB5] = op("LDA", ZeroPageX, Instr::Lda);
    t[0xAD] = op("LDA", Absolute, Instr::Lda);
    t[0xBD] = op("LDA", AbsoluteX, Instr::Lda);
    t[0xB9] = op("LDA", AbsoluteY, Instr::Lda);
    t[0xA1] = op("LDA", IndirectX, Instr::Lda);
    t[0xB1] = op("LDA", IndirectY, Instr::Lda);

    t[0xA2] = op("LDX", Immediate, Instr::Ldx);
    t[0xA6] = op("LDX", ZeroPage, Instr::Ldx);
    t[0xB6] = op("LDX", ZeroPageY, Instr::Ldx);
    t[0xAE] = op("LDX", Absolute, Instr::Ldx);
    t[0xBE] = op("LDX", AbsoluteY, Instr::Ldx);

    t[0xA0] = op("LDY", Immediate, Instr::Ldy);
    t[0xA4] = op("LDY", ZeroPage, Instr::Ldy);
    t[0xB4] = op("LDY", ZeroPageX, Instr::Ldy);
    t[0xAC] = op("LDY", Absolute, Instr::Ldy);
    t[0xBC] = op("LDY", AbsoluteX, Instr::Ldy);

    t[0x4A] = op("LSR", Accumulator, Instr::Lsr);
    t[0x46] = op("LSR", ZeroPage, Instr::Lsr);
    t[0x56] = op("LSR", ZeroPageX, Instr::Lsr);
    t[0x4E] = op("LSR", Absolute, Instr::Lsr);
    t[0x5E] = op("LSR", AbsoluteX, Instr::Lsr);

    t[0xEA] = op("NOP", Implied, Instr::Nop);

    t[0x09] = op("ORA", Immediate, Instr::Ora);
    t[0x05] = op("ORA", ZeroPage, Instr::Ora);
    t[0x15] = op("ORA", ZeroPageX, Instr::Ora);
    t[0x0D] = op("ORA", Absolute, Instr::Ora);
    t[0x1D] = op("ORA", AbsoluteX, Instr::Ora);
    t[0x19] = op("ORA", AbsoluteY, Instr::Ora);
    t[0x01] = op("ORA", IndirectX, Instr::Ora);
    t[0x11] = op("ORA", IndirectY, Instr::Ora);

    t[0x48] = op("PHA", Implied, Instr::Pha);
    t[0x08] = op("PHP", Implied, Instr::Php);
    t[0x68] = op("PLA", Implied, Instr::Pla);
    t[0x28] = op("PLP", Implied, Instr::Plp);

    t[0x2A] = op("ROL", Accumulator, Instr::Rol);
    t[0x26] = op("ROL", ZeroPage, Instr::Rol);
    t[0x36] = op("ROL", ZeroPageX, Instr::Rol);
    t[0x2E] = op("ROL", Absolute, Instr::Rol);
    t[0x3E] = op("ROL", AbsoluteX, Instr::Rol);

    t[0x6A] = op("ROR", Accumulator, Instr::Ror);
    t[0x66] = op("ROR", ZeroPage, Instr::Ror);
    t[0x76] = op("ROR", ZeroPageX, Instr::Ror);
    t[0x6E] = op("ROR", Absolute, Instr::Ror);
    t[0x7E] = op("ROR", AbsoluteX, Instr::Ror);

    t[0x40] = op("RTI", Implied, Instr::Rti);
    t[0x60] = op("RTS", Implied, Instr::Rts);

    t[0xE9] = op("SBC", Immediate, Instr::Sbc);
    t[0xE5] = op("SBC", ZeroPage, Instr::Sbc);
    t[0xF5] = op("SBC", ZeroPageX, Instr::Sbc);
    t[0xED] = op("SBC", Absolute, Instr::Sbc);
    t[0xFD] = op("SBC", AbsoluteX, Instr::Sbc);
    t[0xF9] = op("SBC", AbsoluteY, Instr::Sbc);
    t[0xE1] = op("SBC", IndirectX, Instr::Sbc);
    t[0xF1] = op("SBC", IndirectY, Instr::Sbc);

    t[0x38] = op("SEC", Implied, Instr::Sec);
    t[0xF8] = op("SED", Implied, Instr::Sed);
    t[0x78] = op("SEI", Implied, Instr::Sei);

    t[0x85] = op("STA", ZeroPage, Instr::Sta);
    t[0x95] = op("STA", ZeroPageX, Instr::Sta);
    t[0x8D] = op("STA", Absolute, Instr::Sta);
    t[0x9D] = op("STA", AbsoluteX, Instr::Sta);
    t[0x99] = op("STA", AbsoluteY, Instr::Sta);
    t[0x81] = op("STA", IndirectX, Instr::Sta);
    t[0x91] = op("STA", IndirectY, Instr::Sta);

    t[0x86] = op("STX", ZeroPage, Instr::Stx);
    t[0x96] = op("STX", ZeroPageY, Instr::Stx);
    t[0x8E] = op("STX", Absolute, Instr::Stx);

    t[0x84] = op("STY", ZeroPage, Instr::Sty);
    t[0x94] = op("STY", ZeroPageX, Instr::Sty);
    t[0x8C] = op("STY", Absolute, Instr::Sty);

    t[0xAA] = op("TAX", Implied, Instr::Tax);
    t[0xA8] = op("TAY", Implied, Instr::Tay);
    t[0xBA] = op("TSX", Implied, Instr::Tsx);
    t[0x8A] = op("TXA", Implied, Instr::Txa);
    t[0x9A] = op("TXS", Implied, Instr::Txs);
    t[0x98] = op("TYA", Implied, Instr::Tya);

    // Illegal instructions
    t[0x4B] = op("ALR*", Immediate, Instr::Alr);

    t[0x0B] = op("ANC*", Immediate, Instr::Anc);
    t[0x2B] = op("ANC*", Immediate, Instr::Anc);

    t[0x6B] = op("ARR*", Immediate, Instr::Arr);
    t[0xCB] = op("AXS*", Immediate, Instr::Axs);

    t[0xC7] = op("DCP*", ZeroPage, Instr::Dcp);
    t[0xD7] = op("DCP*", ZeroPageX, Instr::Dcp);
    t[0xC3] = op("DCP*", IndirectX, Instr::Dcp);
    t[0xD3] = op("DCP*", IndirectY, Instr::Dcp);
    t[0xCF] = op("DCP*", Absolute, Instr::Dcp);
    t[0xDF] = op("DCP*", AbsoluteX, Instr::Dcp);
    t[0xDB] = op("DCP*", AbsoluteY, Instr::Dcp);

    t[0xE7] = op("ISC*", ZeroPage, Instr::Isc);
    t[0xF7] = op("ISC*", ZeroPageX, Instr::Isc);
    t[0xE3] = op("ISC*", IndirectX, Instr::Isc);
    t[0xF3] = op("ISC*", IndirectY, Instr::Isc);
    t[0xEF] = op("ISC*", Absolute, Instr::Isc);
    t[0xFF] = op("ISC*", AbsoluteX, Instr::Isc);
    t[0xFB] = op("ISC*", AbsoluteY, Instr::Isc);

    t[0xA7] = op("LAX*", ZeroPage, Instr::Lax);
    t[0xB7] = op("LAX*", ZeroPageY, Instr::Lax);
    t[0xA3] = op("LAX*", IndirectX, Instr::Lax);
    t[0xB3] = op("LAX*", IndirectY, Instr::Lax);
    t[0xAF] = op("LAX*", Absolute, Instr::Lax);
    t[0xBF] = op("LAX*", AbsoluteY, Instr::Lax);

    t[0x80] = op("NOP*", Immediate, Instr::Nop);
    t[0x82] = op("NOP*", Immediate, Instr::Nop);
    t[0x89] = op("NOP*", Immediate, Instr::Nop);
    t[0xC2] = op("NOP*", Immediate, Instr::Nop);
    t[0xE2] = op("NOP*", Immediate, Instr::Nop);
    t[0x1A] = op("NOP*", Implied, Instr::Nop);
    t[0x3A] = op("NOP*", Implied, Instr::Nop);
    t[0x5A] = op("NOP*", Implied, Instr::Nop);
    t[0x7A] = op("NOP*", Implied, Instr::Nop);
    t[0xDA] = op("NOP*", Implied, Instr::Nop);
    t[0xFA] = op("NOP*", Implied, Instr::Nop);
    t[0x04] = op("NOP*", ZeroPage, Instr::Nop);
    t[0x44] = op("NOP*", ZeroPage, Instr::Nop);
    t[0x64] = op("NOP*", ZeroPage, Instr::Nop);
    t[0x0C] = op("NOP*", Absolute, Instr::Nop);
    t[0x14] = op("NOP*", ZeroPageX, Instr::Nop);
    t[0x34] = op("NOP*", ZeroPageX, Instr::Nop);
    t[0x54] = op("NOP*", ZeroPageX, Instr::Nop);
    t[0x74] = op("NOP*", ZeroPageX, Instr::Nop);
    t[0xD4] = op("NOP*", ZeroPageX, Instr::Nop);
    t[0xF4] = op("NOP*", ZeroPageX, Instr::Nop);
    t[0x1C] = op("NOP*", AbsoluteX, Instr::Nop);
    t[0x3C] = op("NOP*", AbsoluteX, Instr::Nop);
    t[0x5C] = op("NOP*", AbsoluteX, Instr::Nop);
    t[0x7C] = op("NOP*", AbsoluteX, Instr::Nop);
    t[0xDC] = op("NOP*", AbsoluteX, Instr::Nop);
    t[0xFC] = op("NOP*", AbsoluteX, Instr::Nop);

    t[0x27] = op("RLA*", ZeroPage, Instr::Rla);
    t[0x37] = op("RLA*", ZeroPageX, Instr::Rla);
    t[0x23] = op("RLA*", IndirectX, Instr::Rla);
    t[0x33] = op("RLA*", IndirectY, Instr::Rla);
    t[0x2F] = op("RLA*", Absolute, Instr::Rla);
    t[0x3F] = op("RLA*", AbsoluteX, Instr::Rla);
    t[0x3B] = op("RLA*", AbsoluteY, Instr::Rla);

    t[0x67] = op("RRA*", ZeroPage, Instr::Rra);
    t[0x77] = op("RRA*", ZeroPageX, Instr::Rra);
    t[0x63] = op("RRA*", IndirectX, Instr::Rra);
    t[0x73] = op("RRA*", IndirectY, Instr::Rra);
    t[0x6F] = op("RRA*", Absolute, Instr::Rra);
    t[0x7F] = op("RRA*", AbsoluteX, Instr::Rra);
    t[0x7B] = op("RRA*", AbsoluteY, Instr::Rra);

    t[0x87] = op("SAX*", ZeroPage, Instr::Sax);
    t[0x97] = op("SAX*", ZeroPageY, Instr::Sax);
    t[0x83] = op("SAX*", IndirectX, Instr::Sax);
    t[0x8F] = op("SAX*", Absolute, Instr::Sax);

    t[0xEB] = op("SBC*", Immediate, Instr::Sbc);

    t[0x07] = op("SLO*", ZeroPage, Instr::Slo);
    t[0x17] = op("SLO*", ZeroPageX, Instr::Slo);
    t[0x03] = op("SLO*", IndirectX, Instr::Slo);
    t[0x13] = op("SLO*", IndirectY, Instr::Slo);
    t[0x0F] = op("SLO*", Absolute, Instr::Slo);
    t[0x1F] = op("SLO*", AbsoluteX, Instr::Slo);
    t[0x1B] = op("SLO*", AbsoluteY, Instr::Slo);

    t[0x47] = op("SRE*", ZeroPage, Instr::Sre);
    t[0x57] = op("SRE*", ZeroPageX, Instr::Sre);
    t[0x43] = op("SRE*", IndirectX, Instr::Sre);
    t[0x53] = op("SRE*", IndirectY, Instr::Sre);
    t[0x4F] = op("SRE*", Absolute, Instr::Sre);
    t[0x5F] = op("SRE*", AbsoluteX, Instr::Sre);
    t[0x5B] = op("SRE*", AbsoluteY, Instr::Sre);

    #[cfg(feature = "unstable-ops")]
    {
        t[0x8B] = op("ANE*", Immediate, Instr::Ane);
        t[0xAB] = op("LXA*", Immediate, Instr::Lxa);

        t[0x93] = op("SHA*", IndirectY, Instr::Sha);
        t[0x9F] = op("SHA*", AbsoluteY, Instr::Sha);
        t[0x9E] = op("SHX*", AbsoluteY, Instr::Shx);
        t[0x9C] = op("SHY*", AbsoluteX, Instr::Shy);
        t[0x9B] = op("TAS*", AbsoluteY, Instr::Tas);
        t[0xBB] = op("LAS*", AbsoluteY, Instr::Las);
    }

    t
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lockup_slots() {
        for opcode in [
            0x02u8, 0x12, 0x22, 0x32, 0x42, 0x52, 0x62, 0x72, 0x92, 0xB2, 0xD2, 0xF2,
        ] {
            let entry = &OPCODES[opcode as usize];
            assert_eq!(entry.instr, Instr::Jam, "opcode {opcode:02X}");
            assert_eq!(entry.micro, MicroInstruction::Jam);
            assert_eq!(entry.mnemonic, "???");
        }
    }

    #[test]
    fn assigned_slots() {
        let jammed = OPCODES.iter().filter(|e| e.instr == Instr::Jam).count();
        #[cfg(feature = "unstable-ops")]
        assert_eq!(jammed, 12);
        #[cfg(not(feature = "unstable-ops"))]
        assert_eq!(jammed, 12 + 8);
    }

    #[test]
    fn unstable_marking() {
        assert!(OPCODES[0x9E].instr.is_unstable() || !cfg!(feature = "unstable-ops"));
        assert!(!Instr::Lda.is_unstable());
        assert!(!Instr::Sax.is_unstable());
    }

    #[test]
    fn first_microinstruction() {
        assert_eq!(OPCODES[0x00].micro, MicroInstruction::Brk(0));
        assert_eq!(OPCODES[0x20].micro, MicroInstruction::Jsr(0));
        assert_eq!(OPCODES[0x4C].micro, MicroInstruction::JmpLo);
        assert_eq!(OPCODES[0x6C].micro, MicroInstruction::JmpIndLo);
        assert_eq!(OPCODES[0xA9].micro, MicroInstruction::Immediate);
        assert_eq!(OPCODES[0xBD].micro, MicroInstruction::AbsIdxLo);
        assert_eq!(OPCODES[0x91].micro, MicroInstruction::IndYLo);
        assert_eq!(OPCODES[0x48].micro, MicroInstruction::Push);
        assert_eq!(OPCODES[0x68].micro, MicroInstruction::Pull);
    }
}
