use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct StatusFlags: u8 {
        const N = 0b10000000; // 80
        const V = 0b01000000; // 40
        const X = 0b00100000; // 20, hard-wired to 1 on external reads
        const B = 0b00010000; // 10
        const D = 0b00001000; // 08
        const I = 0b00000100; // 04
        const Z = 0b00000010; // 02
        const C = 0b00000001; // 01
    }
}

impl Default for StatusFlags {
    fn default() -> StatusFlags {
        StatusFlags::empty()
    }
}

#[derive(Copy, Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProcessorPort {
    pub data: u8,
    pub direction: u8,
}

/* The register file. pc is the live program counter; pc0 freezes the value
 * pc had when the current instruction was fetched and is only overwritten by
 * the next fetch. adl/adh/idl/ovl are the internal latches the multi-cycle
 * addressing sequences work through.
 */
#[derive(Copy, Clone, Debug, Default, Serialize, Deserialize)]
pub struct Registers {
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub sp: u8,
    pub pc: u16,
    pub pc0: u16,

    pub adl: u8,
    pub adh: u8,
    pub idl: u8,
    pub ovl: bool,

    pub sr: StatusFlags,
    pub pport: ProcessorPort,
}

impl Registers {
    #[inline]
    #[must_use]
    pub fn p(&self) -> u8 {
        (self.sr | StatusFlags::X).bits()
    }

    #[inline]
    #[must_use]
    pub fn p_with_cleared_b(&self) -> u8 {
        self.p() & !StatusFlags::B.bits()
    }

    #[inline]
    pub fn set_p(&mut self, p: u8) {
        self.sr = StatusFlags::from_bits_truncate(p);
    }

    // PLP and RTI leave B untouched.
    #[inline]
    pub fn set_p_without_b(&mut self, p: u8) {
        let b = self.sr & StatusFlags::B;
        self.sr = (StatusFlags::from_bits_truncate(p) & !StatusFlags::B) | b;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn p_round_trip() {
        let mut regs = Registers::default();
        for b in 0..=255u8 {
            regs.set_p(b);
            assert_eq!(regs.p(), b | 0x20);
        }
    }

    #[test]
    fn set_p_without_b_preserves_b() {
        let mut regs = Registers::default();
        regs.sr = StatusFlags::B;
        regs.set_p_without_b(0x00);
        assert!(regs.sr.contains(StatusFlags::B));
        regs.sr = StatusFlags::empty();
        regs.set_p_without_b(0xFF);
        assert!(!regs.sr.contains(StatusFlags::B));
        assert!(regs.sr.contains(StatusFlags::N | StatusFlags::C));
    }
}
