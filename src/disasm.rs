use alloc::string::String;
use core::fmt::Write;

use serde::{Deserialize, Serialize};

use crate::bus::Bus;
use crate::micro::{AddressingMode, OPCODES};
use crate::regs::StatusFlags;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberFormat {
    // 10 or 16
    pub radix: u8,
    pub upper_case: bool,
}

impl Default for NumberFormat {
    fn default() -> NumberFormat {
        NumberFormat {
            radix: 16,
            upper_case: true,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, Serialize, Deserialize)]
pub struct DasmStyle {
    pub number_format: NumberFormat,
    pub tab: usize,
}

/* Pure disassembler: everything derives from three opcode bytes and the
 * opcode table. Memory is only touched through the side-effect-free
 * `read_dasm` callback.
 */
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub struct Disassembler {
    instr_style: DasmStyle,
    data_style: DasmStyle,
}

impl Default for Disassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Disassembler {
    #[must_use]
    pub fn new() -> Disassembler {
        let style = DasmStyle {
            number_format: NumberFormat::default(),
            tab: 4,
        };
        Disassembler {
            instr_style: style,
            data_style: style,
        }
    }

    pub fn set_number_format(
        &mut self,
        instr_format: NumberFormat,
        data_format: NumberFormat,
    ) -> Result<(), &'static str> {
        for fmt in [instr_format, data_format] {
            if fmt.radix != 10 && fmt.radix != 16 {
                return Err("radix must be 10 or 16");
            }
        }
        self.instr_style.number_format = instr_format;
        self.data_style.number_format = data_format;
        Ok(())
    }

    pub fn set_indentation(&mut self, tab: usize) {
        self.instr_style.tab = tab;
        self.data_style.tab = tab;
    }

    // Disassembles the instruction at the given address. Returns the
    // textual form and the instruction length in bytes.
    #[must_use]
    pub fn disassemble<B: Bus>(&self, bus: &B, addr: u16) -> (String, usize) {
        self.disassemble_bytes(
            addr,
            bus.read_dasm(addr),
            bus.read_dasm(addr.wrapping_add(1)),
            bus.read_dasm(addr.wrapping_add(2)),
        )
    }

    #[must_use]
    pub fn disassemble_bytes(&self, pc: u16, byte1: u8, byte2: u8, byte3: u8) -> (String, usize) {
        let entry = &OPCODES[byte1 as usize];
        let fmt = self.instr_style.number_format;
        let mut out = String::with_capacity(16);
        out.push_str(entry.mnemonic);

        let operand = match entry.mode {
            AddressingMode::Implied | AddressingMode::Accumulator => String::new(),
            AddressingMode::Immediate => format!("#{}", fmt_u8(fmt, byte2)),
            AddressingMode::ZeroPage => fmt_u8(fmt, byte2),
            AddressingMode::ZeroPageX => format!("{},X", fmt_u8(fmt, byte2)),
            AddressingMode::ZeroPageY => format!("{},Y", fmt_u8(fmt, byte2)),
            AddressingMode::Absolute | AddressingMode::Direct => {
                fmt_u16(fmt, u16::from_le_bytes([byte2, byte3]))
            }
            AddressingMode::AbsoluteX => {
                format!("{},X", fmt_u16(fmt, u16::from_le_bytes([byte2, byte3])))
            }
            AddressingMode::AbsoluteY => {
                format!("{},Y", fmt_u16(fmt, u16::from_le_bytes([byte2, byte3])))
            }
            AddressingMode::Indirect => {
                format!("({})", fmt_u16(fmt, u16::from_le_bytes([byte2, byte3])))
            }
            AddressingMode::IndirectX => format!("({},X)", fmt_u8(fmt, byte2)),
            AddressingMode::IndirectY => format!("({}),Y", fmt_u8(fmt, byte2)),
            AddressingMode::Relative => {
                // Branch targets are shown as absolute addresses
                let target = pc.wrapping_add(2).wrapping_add(byte2 as i8 as u16);
                fmt_u16(fmt, target)
            }
        };

        if !operand.is_empty() {
            while out.len() < self.instr_style.tab {
                out.push(' ');
            }
            if !out.ends_with(' ') {
                out.push(' ');
            }
            out.push_str(&operand);
        }

        (out, entry.mode.length())
    }

    // Raw instruction bytes, space separated
    #[must_use]
    pub fn dump_bytes<B: Bus>(&self, bus: &B, addr: u16, count: usize) -> String {
        let fmt = self.data_style.number_format;
        let mut out = String::new();
        for i in 0..count {
            if i > 0 {
                out.push(' ');
            }
            out.push_str(&fmt_u8_bare(fmt, bus.read_dasm(addr.wrapping_add(i as u16))));
        }
        out
    }

    #[must_use]
    pub fn dump_byte(&self, value: u8) -> String {
        fmt_u8_bare(self.data_style.number_format, value)
    }

    #[must_use]
    pub fn dump_word(&self, value: u16) -> String {
        fmt_u16_bare(self.data_style.number_format, value)
    }

    // Eight characters, NV-BDIZC, lowercase for cleared bits
    #[must_use]
    pub fn disassemble_flags(&self, p: u8) -> String {
        let mut out = String::with_capacity(8);
        let flag = |mask: StatusFlags, set: char, cleared: char| {
            if p & mask.bits() != 0 {
                set
            } else {
                cleared
            }
        };
        out.push(flag(StatusFlags::N, 'N', 'n'));
        out.push(flag(StatusFlags::V, 'V', 'v'));
        out.push('-');
        out.push(flag(StatusFlags::B, 'B', 'b'));
        out.push(flag(StatusFlags::D, 'D', 'd'));
        out.push(flag(StatusFlags::I, 'I', 'i'));
        out.push(flag(StatusFlags::Z, 'Z', 'z'));
        out.push(flag(StatusFlags::C, 'C', 'c'));
        out
    }

    // One instruction per line: address, raw bytes, mnemonic and operand
    #[must_use]
    pub fn disassemble_range<B: Bus>(&self, bus: &B, addr: u16, count: usize) -> String {
        let mut out = String::new();
        let mut addr = addr;
        for _ in 0..count {
            let (instr, len) = self.disassemble(bus, addr);
            let bytes = self.dump_bytes(bus, addr, len);
            let _ = writeln!(
                out,
                "{}   {:<9}  {}",
                fmt_u16_bare(self.data_style.number_format, addr),
                bytes,
                instr
            );
            addr = addr.wrapping_add(len as u16);
        }
        out
    }
}

fn fmt_u8_bare(fmt: NumberFormat, value: u8) -> String {
    match (fmt.radix, fmt.upper_case) {
        (16, true) => format!("{value:02X}"),
        (16, false) => format!("{value:02x}"),
        _ => format!("{value:03}"),
    }
}

fn fmt_u16_bare(fmt: NumberFormat, value: u16) -> String {
    match (fmt.radix, fmt.upper_case) {
        (16, true) => format!("{value:04X}"),
        (16, false) => format!("{value:04x}"),
        _ => format!("{value:05}"),
    }
}

fn fmt_u8(fmt: NumberFormat, value: u8) -> String {
    if fmt.radix == 16 {
        format!("${}", fmt_u8_bare(fmt, value))
    } else {
        fmt_u8_bare(fmt, value)
    }
}

fn fmt_u16(fmt: NumberFormat, value: u16) -> String {
    if fmt.radix == 16 {
        format!("${}", fmt_u16_bare(fmt, value))
    } else {
        fmt_u16_bare(fmt, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    struct FlatRam(Vec<u8>);

    impl Bus for FlatRam {
        fn read(&mut self, addr: u16) -> u8 {
            self.0[addr as usize]
        }

        fn write(&mut self, addr: u16, val: u8) {
            self.0[addr as usize] = val;
        }

        fn read_dasm(&self, addr: u16) -> u8 {
            self.0[addr as usize]
        }
    }

    fn dasm(bytes: [u8; 3], pc: u16) -> String {
        Disassembler::new().disassemble_bytes(pc, bytes[0], bytes[1], bytes[2]).0
    }

    #[test]
    fn operand_formats() {
        assert_eq!(dasm([0xA9, 0x42, 0x00], 0), "LDA #$42");
        assert_eq!(dasm([0xA5, 0x42, 0x00], 0), "LDA $42");
        assert_eq!(dasm([0xB5, 0x42, 0x00], 0), "LDA $42,X");
        assert_eq!(dasm([0xB6, 0x42, 0x00], 0), "LDX $42,Y");
        assert_eq!(dasm([0xAD, 0x34, 0x12], 0), "LDA $1234");
        assert_eq!(dasm([0xBD, 0x34, 0x12], 0), "LDA $1234,X");
        assert_eq!(dasm([0xB9, 0x34, 0x12], 0), "LDA $1234,Y");
        assert_eq!(dasm([0x6C, 0x34, 0x12], 0), "JMP ($1234)");
        assert_eq!(dasm([0xA1, 0x42, 0x00], 0), "LDA ($42,X)");
        assert_eq!(dasm([0xB1, 0x42, 0x00], 0), "LDA ($42),Y");
        assert_eq!(dasm([0x0A, 0x00, 0x00], 0), "ASL");
        assert_eq!(dasm([0xEA, 0x00, 0x00], 0), "NOP");
    }

    #[test]
    fn illegal_mnemonics_are_starred() {
        assert_eq!(dasm([0xA7, 0x42, 0x00], 0), "LAX* $42");
        assert_eq!(dasm([0x02, 0x00, 0x00], 0), "???");
    }

    #[test]
    fn relative_targets_shown_as_absolute() {
        assert_eq!(dasm([0xF0, 0x10, 0x00], 0x02F0), "BEQ $0302");
        assert_eq!(dasm([0xD0, 0xF2, 0x00], 0x0615), "BNE $0609");
    }

    #[test]
    fn decimal_style() {
        let mut dasm = Disassembler::new();
        let fmt = NumberFormat {
            radix: 10,
            upper_case: true,
        };
        dasm.set_number_format(fmt, fmt).unwrap();
        let (text, len) = dasm.disassemble_bytes(0, 0xAD, 0x34, 0x12);
        assert_eq!(text, "LDA 04660");
        assert_eq!(len, 3);
        assert!(dasm
            .set_number_format(
                NumberFormat {
                    radix: 8,
                    upper_case: false
                },
                fmt
            )
            .is_err());
    }

    #[test]
    fn flag_dump() {
        let dasm = Disassembler::new();
        assert_eq!(dasm.disassemble_flags(0x00), "nv-bdizc");
        assert_eq!(dasm.disassemble_flags(0xFF), "NV-BDIZC");
        assert_eq!(dasm.disassemble_flags(0b1000_0011), "Nv-bdizC");
    }

    #[test]
    fn range_dump() {
        let mut ram = FlatRam(vec![0; 0x10000]);
        let prog = [0xA2, 0x01, 0x8E, 0x00, 0x02, 0xCA];
        ram.0[0x600..0x606].copy_from_slice(&prog);

        let dasm = Disassembler::new();
        let text = dasm.disassemble_range(&ram, 0x0600, 3);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "0600   A2 01      LDX #$01");
        assert_eq!(lines[1], "0602   8E 00 02   STX $0200");
        assert_eq!(lines[2], "0605   CA         DEX");
    }

    #[test]
    fn instruction_lengths() {
        let dasm = Disassembler::new();
        assert_eq!(dasm.disassemble_bytes(0, 0xEA, 0, 0).1, 1);
        assert_eq!(dasm.disassemble_bytes(0, 0xA9, 0, 0).1, 2);
        assert_eq!(dasm.disassemble_bytes(0, 0x4C, 0, 0).1, 3);
    }
}
