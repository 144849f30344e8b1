#![no_std]
#[macro_use]
extern crate alloc;

pub mod bus;
pub mod consts;
pub mod cpu;
pub mod debugger;
pub mod disasm;
pub mod micro;
pub mod regs;

mod exec;

pub use bus::{Bus, IntSource};
pub use cpu::{CpuModel, M65xx};
pub use disasm::Disassembler;

pub fn serialize(cpu: &M65xx, data: &mut [u8]) -> Result<(), &'static str> {
    match postcard::to_slice(&cpu, data) {
        Err(_) => Err("Serialization error."),
        Ok(_) => Ok(()),
    }
}

pub fn deserialize(data: &[u8]) -> Result<M65xx, &'static str> {
    match postcard::from_bytes::<M65xx>(data) {
        Err(_) => Err("Deserialization error"),
        Ok(cpu) => Ok(cpu),
    }
}

pub const fn info() -> (&'static str, &'static str) {
    ("mos65xx", env!("CARGO_PKG_VERSION"))
}
