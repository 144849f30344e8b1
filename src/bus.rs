use crate::consts::RESV_ADDR;

/* Interrupt lines are driven by multiple devices at once, so every pull or
 * release names its source as one bit of this mask. A line is high only when
 * all sources have released it.
 */
pub type IntSource = u8;

/* Callback surface the enclosing host implements. All memory traffic of the
 * engine funnels through `read` and `write`; the remaining methods default
 * to no-ops so a minimal host only has to wire up memory.
 *
 * `read_dasm` must be free of side effects. The debugger and the
 * disassembler use it to inspect memory without disturbing I/O registers.
 */
pub trait Bus {
    fn read(&mut self, addr: u16) -> u8;

    fn write(&mut self, addr: u16, val: u8);

    fn read_dasm(&self, addr: u16) -> u8;

    fn read_reset_vector(&mut self) -> u16 {
        let lo = self.read(RESV_ADDR);
        let hi = self.read(RESV_ADDR + 1);
        u16::from_le_bytes([lo, hi])
    }

    // Level of the externally driven bits of the 6510/8502 processor port.
    // Bits configured as inputs in the direction register read from here.
    #[inline]
    fn external_port_bits(&self) -> u8 {
        0
    }

    // Called after a write to $0000/$0001 so the host can remap banks.
    #[inline]
    fn port_did_write(&mut self, _direction: u8, _data: u8) {}

    // State delegates
    #[inline]
    fn cpu_did_jam(&mut self) {}

    // Exception delegates
    #[inline]
    fn irq_will_trigger(&mut self) {}

    #[inline]
    fn irq_did_trigger(&mut self) {}

    #[inline]
    fn nmi_will_trigger(&mut self) {}

    #[inline]
    fn nmi_did_trigger(&mut self) {}

    // Debugger delegates
    #[inline]
    fn breakpoint_reached(&mut self, _addr: u16) {}

    #[inline]
    fn watchpoint_reached(&mut self, _addr: u16) {}

    #[inline]
    fn instruction_logged(&mut self) {}
}
