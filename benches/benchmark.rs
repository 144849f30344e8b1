use criterion::{criterion_group, criterion_main, Criterion};
use mos65xx::{Bus, CpuModel, M65xx};

struct FlatRam([u8; 0x10000]);

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

const PROG: [u8; 24] = [
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
    0x4C, 0x00, 0x06, // JMP $0600
];

fn criterion_benchmark_step(c: &mut Criterion) {
    let mut ram = FlatRam([0; 0x10000]);
    ram.0[0x600..0x600 + PROG.len()].copy_from_slice(&PROG);
    ram.0[0xFFFC] = 0x00;
    ram.0[0xFFFD] = 0x06;

    let mut cpu = M65xx::new();
    cpu.set_model(CpuModel::Mos6502).unwrap();
    cpu.reset(&mut ram);

    c.bench_function("cpu step", |b| b.iter(|| cpu.step_n(&mut ram, 1000)));
}

criterion_group!(benches, criterion_benchmark_step);
criterion_main!(benches);
