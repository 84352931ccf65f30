mod alu;
mod mmu;

pub use alu::Flags;
pub use mmu::{Bus, MmuCpuExt};

use crate::{
    mbc::Mbc,
    state::{Interruptions, State},
};

const VECTORS: [u16; 5] = [0x0040, 0x0048, 0x0050, 0x0058, 0x0060];

const INVALID_OPCODES: [u8; 11] = [
    0xD3, 0xDB, 0xDD, 0xE3, 0xE4, 0xEB, 0xEC, 0xED, 0xF4, 0xFC, 0xFD,
];

#[derive(Clone)]
pub struct Cpu {
    pub a: u8,
    pub b: u8,
    pub c: u8,
    pub d: u8,
    pub e: u8,
    pub h: u8,
    pub l: u8,
    pub f: Flags,
    pub sp: u16,
    pub pc: u16,
    pub ime: bool,
    pub ime_scheduled: bool,
    pub halted: bool,
    pub stopped: bool,
    pub halt_bug: bool,
    pub hram: [u8; 127],
    pub interrupt_enable: Interruptions,
    pub boot_rom_disabled: bool,
    logged_invalid_opcodes: u16,
}

impl Default for Cpu {
    fn default() -> Self {
        Self {
            a: 0,
            b: 0,
            c: 0,
            d: 0,
            e: 0,
            h: 0,
            l: 0,
            f: Flags::empty(),
            sp: 0,
            pc: 0,
            ime: false,
            ime_scheduled: false,
            halted: false,
            stopped: false,
            halt_bug: false,
            hram: [0; 127],
            interrupt_enable: Interruptions::empty(),
            boot_rom_disabled: true,
            logged_invalid_opcodes: 0,
        }
    }
}

impl Cpu {
    fn af(&self) -> u16 {
        (u16::from(self.a) << 8) | u16::from(self.f.bits())
    }
    fn set_af(&mut self, value: u16) {
        self.a = (value >> 8) as u8;
        self.f = Flags::from_bits_truncate(value as u8);
    }
    fn bc(&self) -> u16 {
        u16::from_be_bytes([self.b, self.c])
    }
    fn set_bc(&mut self, value: u16) {
        [self.b, self.c] = value.to_be_bytes();
    }
    fn de(&self) -> u16 {
        u16::from_be_bytes([self.d, self.e])
    }
    fn set_de(&mut self, value: u16) {
        [self.d, self.e] = value.to_be_bytes();
    }
    fn hl(&self) -> u16 {
        u16::from_be_bytes([self.h, self.l])
    }
    fn set_hl(&mut self, value: u16) {
        [self.h, self.l] = value.to_be_bytes();
    }

    fn read_byte<M: Mbc + ?Sized>(&self, state: &State, bus: &Bus<M>, addr: u16) -> u8 {
        state.read(addr, self, bus)
    }
    fn write_byte<M: Mbc + ?Sized>(
        &mut self,
        state: &mut State,
        bus: &mut Bus<M>,
        addr: u16,
        value: u8,
    ) {
        state.write(addr, value, self, bus);
    }

    fn fetch_byte<M: Mbc + ?Sized>(&mut self, state: &State, bus: &Bus<M>) -> u8 {
        let byte = self.read_byte(state, bus, self.pc);
        self.pc = self.pc.wrapping_add(1);
        byte
    }

    fn fetch_word<M: Mbc + ?Sized>(&mut self, state: &State, bus: &Bus<M>) -> u16 {
        let lo = self.fetch_byte(state, bus);
        let hi = self.fetch_byte(state, bus);
        u16::from_be_bytes([hi, lo])
    }

    fn push_word<M: Mbc + ?Sized>(&mut self, state: &mut State, bus: &mut Bus<M>, value: u16) {
        let [hi, lo] = value.to_be_bytes();
        self.sp = self.sp.wrapping_sub(1);
        self.write_byte(state, bus, self.sp, hi);
        self.sp = self.sp.wrapping_sub(1);
        self.write_byte(state, bus, self.sp, lo);
    }

    fn pop_word<M: Mbc + ?Sized>(&mut self, state: &mut State, bus: &mut Bus<M>) -> u16 {
        let lo = self.read_byte(state, bus, self.sp);
        self.sp = self.sp.wrapping_add(1);
        let hi = self.read_byte(state, bus, self.sp);
        self.sp = self.sp.wrapping_add(1);
        u16::from_be_bytes([hi, lo])
    }

    /// Reads one of the eight 3-bit-encoded 8-bit operands {B,C,D,E,H,L,(HL),A}.
    fn get_r8<M: Mbc + ?Sized>(&self, state: &State, bus: &Bus<M>, index: u8) -> u8 {
        match index {
            0 => self.b,
            1 => self.c,
            2 => self.d,
            3 => self.e,
            4 => self.h,
            5 => self.l,
            6 => self.read_byte(state, bus, self.hl()),
            7 => self.a,
            _ => unreachable!("3-bit register code out of range"),
        }
    }

    fn set_r8<M: Mbc + ?Sized>(
        &mut self,
        state: &mut State,
        bus: &mut Bus<M>,
        index: u8,
        value: u8,
    ) {
        match index {
            0 => self.b = value,
            1 => self.c = value,
            2 => self.d = value,
            3 => self.e = value,
            4 => self.h = value,
            5 => self.l = value,
            6 => self.write_byte(state, bus, self.hl(), value),
            7 => self.a = value,
            _ => unreachable!("3-bit register code out of range"),
        }
    }

    fn condition(&self, code: u8) -> bool {
        match code {
            0 => !self.f.contains(Flags::Z),
            1 => self.f.contains(Flags::Z),
            2 => !self.f.contains(Flags::C),
            3 => self.f.contains(Flags::C),
            _ => unreachable!("2-bit condition code out of range"),
        }
    }

    /// Performs one step: EI delay, interrupt dispatch, HALT/STOP short-circuit,
    /// fetch (with the HALT-bug double-read), decode and execute. Returns the
    /// T-cycle cost of whatever it did.
    pub fn step<M: Mbc + ?Sized>(&mut self, state: &mut State, bus: &mut Bus<M>) -> u8 {
        if self.ime_scheduled {
            self.ime = true;
            self.ime_scheduled = false;
        }

        let pending = state.interrupt_flag.bits() & self.interrupt_enable.bits() & 0x1f;
        if pending != 0 {
            self.halted = false;
            if self.ime {
                self.ime = false;
                let bit = pending.trailing_zeros();
                state
                    .interrupt_flag
                    .remove(Interruptions::from_bits_truncate(1 << bit));
                self.push_word(state, bus, self.pc);
                self.pc = VECTORS[bit as usize];
                return 20;
            }
        }

        if self.halted || self.stopped {
            return 4;
        }

        let opcode = self.fetch_byte(state, bus);
        if self.halt_bug {
            self.pc = self.pc.wrapping_sub(1);
            self.halt_bug = false;
        }

        if opcode == 0xcb {
            let cb_opcode = self.fetch_byte(state, bus);
            return self.execute_cb(cb_opcode, state, bus);
        }

        self.execute(opcode, state, bus)
    }

    fn log_invalid_opcode_once(&mut self, opcode: u8) {
        let Some(slot) = INVALID_OPCODES.iter().position(|&o| o == opcode) else {
            return;
        };
        let bit = 1u16 << slot;
        if self.logged_invalid_opcodes & bit == 0 {
            self.logged_invalid_opcodes |= bit;
            log::warn!("invalid opcode 0x{opcode:02x} treated as NOP");
        }
    }

    fn execute<M: Mbc + ?Sized>(&mut self, opcode: u8, state: &mut State, bus: &mut Bus<M>) -> u8 {
        // Block 0x40..=0x7F is the regular LD r,r' table, indexed by 3-bit
        // register codes, except for the HALT hole at 0x76.
        if (0x40..=0x7f).contains(&opcode) && opcode != 0x76 {
            let dst = (opcode >> 3) & 0x7;
            let src = opcode & 0x7;
            let value = self.get_r8(state, bus, src);
            self.set_r8(state, bus, dst, value);
            return if dst == 6 || src == 6 { 8 } else { 4 };
        }

        // Block 0x80..=0xBF is ALU A,r indexed the same way.
        if (0x80..=0xbf).contains(&opcode) {
            let op = (opcode >> 3) & 0x7;
            let src = opcode & 0x7;
            let value = self.get_r8(state, bus, src);
            self.alu_op(op, value);
            return if src == 6 { 8 } else { 4 };
        }

        match opcode {
            0x00 => 4, // NOP
            0x01 => {
                let value = self.fetch_word(state, bus);
                self.set_bc(value);
                12
            }
            0x02 => {
                self.write_byte(state, bus, self.bc(), self.a);
                8
            }
            0x03 => {
                self.set_bc(self.bc().wrapping_add(1));
                8
            }
            0x04 => {
                self.b = alu::inc(&mut self.f, self.b);
                4
            }
            0x05 => {
                self.b = alu::dec(&mut self.f, self.b);
                4
            }
            0x06 => {
                self.b = self.fetch_byte(state, bus);
                8
            }
            0x07 => {
                self.a = alu::rlc(&mut self.f, self.a);
                self.f.remove(Flags::Z);
                4
            }
            0x08 => {
                let addr = self.fetch_word(state, bus);
                let [hi, lo] = self.sp.to_be_bytes();
                self.write_byte(state, bus, addr, lo);
                self.write_byte(state, bus, addr.wrapping_add(1), hi);
                20
            }
            0x09 => {
                let result = alu::add16(&mut self.f, self.hl(), self.bc());
                self.set_hl(result);
                8
            }
            0x0a => {
                self.a = self.read_byte(state, bus, self.bc());
                8
            }
            0x0b => {
                self.set_bc(self.bc().wrapping_sub(1));
                8
            }
            0x0c => {
                self.c = alu::inc(&mut self.f, self.c);
                4
            }
            0x0d => {
                self.c = alu::dec(&mut self.f, self.c);
                4
            }
            0x0e => {
                self.c = self.fetch_byte(state, bus);
                8
            }
            0x0f => {
                self.a = alu::rrc(&mut self.f, self.a);
                self.f.remove(Flags::Z);
                4
            }
            0x10 => {
                // STOP is architecturally 2 bytes; the conventional 0x00 padding byte is consumed.
                let _ = self.fetch_byte(state, bus);
                self.stopped = true;
                4
            }
            0x11 => {
                let value = self.fetch_word(state, bus);
                self.set_de(value);
                12
            }
            0x12 => {
                self.write_byte(state, bus, self.de(), self.a);
                8
            }
            0x13 => {
                self.set_de(self.de().wrapping_add(1));
                8
            }
            0x14 => {
                self.d = alu::inc(&mut self.f, self.d);
                4
            }
            0x15 => {
                self.d = alu::dec(&mut self.f, self.d);
                4
            }
            0x16 => {
                self.d = self.fetch_byte(state, bus);
                8
            }
            0x17 => {
                self.a = alu::rl(&mut self.f, self.a);
                self.f.remove(Flags::Z);
                4
            }
            0x18 => {
                let offset = self.fetch_byte(state, bus) as i8;
                self.pc = self.pc.wrapping_add_signed(i16::from(offset));
                12
            }
            0x19 => {
                let result = alu::add16(&mut self.f, self.hl(), self.de());
                self.set_hl(result);
                8
            }
            0x1a => {
                self.a = self.read_byte(state, bus, self.de());
                8
            }
            0x1b => {
                self.set_de(self.de().wrapping_sub(1));
                8
            }
            0x1c => {
                self.e = alu::inc(&mut self.f, self.e);
                4
            }
            0x1d => {
                self.e = alu::dec(&mut self.f, self.e);
                4
            }
            0x1e => {
                self.e = self.fetch_byte(state, bus);
                8
            }
            0x1f => {
                self.a = alu::rr(&mut self.f, self.a);
                self.f.remove(Flags::Z);
                4
            }
            0x20 | 0x28 | 0x30 | 0x38 => {
                let offset = self.fetch_byte(state, bus) as i8;
                let taken = self.condition((opcode >> 3) & 0x3);
                if taken {
                    self.pc = self.pc.wrapping_add_signed(i16::from(offset));
                    12
                } else {
                    8
                }
            }
            0x21 => {
                let value = self.fetch_word(state, bus);
                self.set_hl(value);
                12
            }
            0x22 => {
                self.write_byte(state, bus, self.hl(), self.a);
                self.set_hl(self.hl().wrapping_add(1));
                8
            }
            0x23 => {
                self.set_hl(self.hl().wrapping_add(1));
                8
            }
            0x24 => {
                self.h = alu::inc(&mut self.f, self.h);
                4
            }
            0x25 => {
                self.h = alu::dec(&mut self.f, self.h);
                4
            }
            0x26 => {
                self.h = self.fetch_byte(state, bus);
                8
            }
            0x27 => {
                self.a = alu::daa(&mut self.f, self.a);
                4
            }
            0x29 => {
                let result = alu::add16(&mut self.f, self.hl(), self.hl());
                self.set_hl(result);
                8
            }
            0x2a => {
                self.a = self.read_byte(state, bus, self.hl());
                self.set_hl(self.hl().wrapping_add(1));
                8
            }
            0x2b => {
                self.set_hl(self.hl().wrapping_sub(1));
                8
            }
            0x2c => {
                self.l = alu::inc(&mut self.f, self.l);
                4
            }
            0x2d => {
                self.l = alu::dec(&mut self.f, self.l);
                4
            }
            0x2e => {
                self.l = self.fetch_byte(state, bus);
                8
            }
            0x2f => {
                self.a = !self.a;
                self.f.insert(Flags::N | Flags::H);
                4
            }
            0x31 => {
                self.sp = self.fetch_word(state, bus);
                12
            }
            0x32 => {
                self.write_byte(state, bus, self.hl(), self.a);
                self.set_hl(self.hl().wrapping_sub(1));
                8
            }
            0x33 => {
                self.sp = self.sp.wrapping_add(1);
                8
            }
            0x34 => {
                let value = self.read_byte(state, bus, self.hl());
                let result = alu::inc(&mut self.f, value);
                self.write_byte(state, bus, self.hl(), result);
                12
            }
            0x35 => {
                let value = self.read_byte(state, bus, self.hl());
                let result = alu::dec(&mut self.f, value);
                self.write_byte(state, bus, self.hl(), result);
                12
            }
            0x36 => {
                let value = self.fetch_byte(state, bus);
                self.write_byte(state, bus, self.hl(), value);
                12
            }
            0x37 => {
                self.f.remove(Flags::N | Flags::H);
                self.f.insert(Flags::C);
                4
            }
            0x39 => {
                let result = alu::add16(&mut self.f, self.hl(), self.sp);
                self.set_hl(result);
                8
            }
            0x3a => {
                self.a = self.read_byte(state, bus, self.hl());
                self.set_hl(self.hl().wrapping_sub(1));
                8
            }
            0x3b => {
                self.sp = self.sp.wrapping_sub(1);
                8
            }
            0x3c => {
                self.a = alu::inc(&mut self.f, self.a);
                4
            }
            0x3d => {
                self.a = alu::dec(&mut self.f, self.a);
                4
            }
            0x3e => {
                self.a = self.fetch_byte(state, bus);
                8
            }
            0x3f => {
                self.f.remove(Flags::N | Flags::H);
                self.f.toggle(Flags::C);
                4
            }
            0x76 => {
                // doesn't halt if an interrupt is already pending: https://gbdev.io/pandocs/halt.html
                let pending = state.interrupt_flag.bits() & self.interrupt_enable.bits() & 0x1f;
                if pending != 0 && !self.ime {
                    self.halt_bug = true;
                } else {
                    self.halted = true;
                }
                4
            }
            0xc0 | 0xc8 | 0xd0 | 0xd8 => {
                let taken = self.condition((opcode >> 3) & 0x3);
                if taken {
                    self.pc = self.pop_word(state, bus);
                    20
                } else {
                    8
                }
            }
            0xc1 => {
                let value = self.pop_word(state, bus);
                self.set_bc(value);
                12
            }
            0xc2 | 0xca | 0xd2 | 0xda => {
                let addr = self.fetch_word(state, bus);
                let taken = self.condition((opcode >> 3) & 0x3);
                if taken {
                    self.pc = addr;
                    16
                } else {
                    12
                }
            }
            0xc3 => {
                self.pc = self.fetch_word(state, bus);
                16
            }
            0xc4 | 0xcc | 0xd4 | 0xdc => {
                let addr = self.fetch_word(state, bus);
                let taken = self.condition((opcode >> 3) & 0x3);
                if taken {
                    self.push_word(state, bus, self.pc);
                    self.pc = addr;
                    24
                } else {
                    12
                }
            }
            0xc5 => {
                self.push_word(state, bus, self.bc());
                16
            }
            0xc6 => {
                let value = self.fetch_byte(state, bus);
                self.alu_op(0, value);
                8
            }
            0xc7 | 0xcf | 0xd7 | 0xdf | 0xe7 | 0xef | 0xf7 | 0xff => {
                self.push_word(state, bus, self.pc);
                self.pc = u16::from(opcode & 0x38);
                16
            }
            0xc9 => {
                self.pc = self.pop_word(state, bus);
                16
            }
            0xcd => {
                let addr = self.fetch_word(state, bus);
                self.push_word(state, bus, self.pc);
                self.pc = addr;
                24
            }
            0xce => {
                let value = self.fetch_byte(state, bus);
                self.alu_op(1, value);
                8
            }
            0xd1 => {
                let value = self.pop_word(state, bus);
                self.set_de(value);
                12
            }
            0xd5 => {
                self.push_word(state, bus, self.de());
                16
            }
            0xd6 => {
                let value = self.fetch_byte(state, bus);
                self.alu_op(2, value);
                8
            }
            0xd9 => {
                self.pc = self.pop_word(state, bus);
                self.ime = true;
                16
            }
            0xde => {
                let value = self.fetch_byte(state, bus);
                self.alu_op(3, value);
                8
            }
            0xe0 => {
                let offset = self.fetch_byte(state, bus);
                self.write_byte(state, bus, 0xff00 | u16::from(offset), self.a);
                12
            }
            0xe1 => {
                let value = self.pop_word(state, bus);
                self.set_hl(value);
                12
            }
            0xe2 => {
                self.write_byte(state, bus, 0xff00 | u16::from(self.c), self.a);
                8
            }
            0xe5 => {
                self.push_word(state, bus, self.hl());
                16
            }
            0xe6 => {
                let value = self.fetch_byte(state, bus);
                self.alu_op(4, value);
                8
            }
            0xe8 => {
                let offset = self.fetch_byte(state, bus);
                self.sp = alu::add_sp_e(&mut self.f, self.sp, offset);
                16
            }
            0xe9 => {
                self.pc = self.hl();
                4
            }
            0xea => {
                let addr = self.fetch_word(state, bus);
                self.write_byte(state, bus, addr, self.a);
                16
            }
            0xee => {
                let value = self.fetch_byte(state, bus);
                self.alu_op(5, value);
                8
            }
            0xf0 => {
                let offset = self.fetch_byte(state, bus);
                self.a = self.read_byte(state, bus, 0xff00 | u16::from(offset));
                12
            }
            0xf1 => {
                let value = self.pop_word(state, bus);
                self.set_af(value);
                12
            }
            0xf2 => {
                self.a = self.read_byte(state, bus, 0xff00 | u16::from(self.c));
                8
            }
            0xf3 => {
                self.ime = false;
                self.ime_scheduled = false;
                4
            }
            0xf5 => {
                self.push_word(state, bus, self.af());
                16
            }
            0xf6 => {
                let value = self.fetch_byte(state, bus);
                self.alu_op(6, value);
                8
            }
            0xf8 => {
                let offset = self.fetch_byte(state, bus);
                let result = alu::add_sp_e(&mut self.f, self.sp, offset);
                self.set_hl(result);
                12
            }
            0xf9 => {
                self.sp = self.hl();
                8
            }
            0xfa => {
                let addr = self.fetch_word(state, bus);
                self.a = self.read_byte(state, bus, addr);
                16
            }
            0xfb => {
                self.ime_scheduled = true;
                4
            }
            0xfe => {
                let value = self.fetch_byte(state, bus);
                self.alu_op(7, value);
                8
            }
            _ => {
                self.log_invalid_opcode_once(opcode);
                4
            }
        }
    }

    /// ALU A,x dispatch shared by the 0x80..=0xBF register block and the
    /// 0xC6/CE/D6/DE/E6/EE/F6/FE immediate forms.
    fn alu_op(&mut self, op: u8, value: u8) {
        self.a = match op {
            0 => alu::add(&mut self.f, self.a, value),
            1 => alu::adc(&mut self.f, self.a, value),
            2 => alu::sub(&mut self.f, self.a, value),
            3 => alu::sbc(&mut self.f, self.a, value),
            4 => alu::and(&mut self.f, self.a, value),
            5 => alu::xor(&mut self.f, self.a, value),
            6 => alu::or(&mut self.f, self.a, value),
            7 => {
                alu::cp(&mut self.f, self.a, value);
                self.a
            }
            _ => unreachable!("3-bit ALU op code out of range"),
        };
    }

    fn execute_cb<M: Mbc + ?Sized>(
        &mut self,
        opcode: u8,
        state: &mut State,
        bus: &mut Bus<M>,
    ) -> u8 {
        let group = opcode >> 6;
        let sub = (opcode >> 3) & 0x7;
        let reg = opcode & 0x7;
        let value = self.get_r8(state, bus, reg);

        let result = match group {
            0 => match sub {
                0 => alu::rlc(&mut self.f, value),
                1 => alu::rrc(&mut self.f, value),
                2 => alu::rl(&mut self.f, value),
                3 => alu::rr(&mut self.f, value),
                4 => alu::sla(&mut self.f, value),
                5 => alu::sra(&mut self.f, value),
                6 => alu::swap(&mut self.f, value),
                7 => alu::srl(&mut self.f, value),
                _ => unreachable!(),
            },
            1 => {
                alu::bit(&mut self.f, value, sub);
                value
            }
            2 => value & !(1 << sub),
            3 => value | (1 << sub),
            _ => unreachable!(),
        };

        if group != 1 {
            self.set_r8(state, bus, reg, result);
        }

        match (group, reg) {
            (1, 6) => 12,
            (_, 6) => 16,
            _ => 8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        apu::Apu, dma::Dma, joypad::Joypad, mbc::Cartridge, mbc::CartridgeType, ppu::Ppu,
        timer::Timer,
    };

    const ROM_SIZE: usize = 0x8000;

    fn blank_rom() -> [u8; ROM_SIZE] {
        let mut rom = [0u8; ROM_SIZE];
        rom[0x148] = 0; // 32 KiB, no banking needed for these tests
        rom[0x149] = 0;
        rom
    }

    macro_rules! harness {
        ($rom:expr) => {
            (
                Cpu::default(),
                State::default(),
                Cartridge::new(&$rom[..], CartridgeType::RomOnly),
                Timer::default(),
                Joypad::default(),
                Apu::default(),
                Ppu::default(),
                Dma::default(),
            )
        };
    }

    macro_rules! step {
        ($cpu:expr, $state:expr, $cart:expr, $timer:expr, $joypad:expr, $apu:expr, $ppu:expr, $dma:expr) => {{
            let mut bus = Bus {
                mbc: &mut $cart,
                timer: &mut $timer,
                joypad: &mut $joypad,
                apu: &mut $apu,
                ppu: &mut $ppu,
                dma: &mut $dma,
            };
            $cpu.step(&mut $state, &mut bus)
        }};
    }

    #[test]
    fn push_pop_round_trips_through_stack() {
        let rom = blank_rom();
        let (mut cpu, mut state, mut cart, mut timer, mut joypad, mut apu, mut ppu, mut dma) =
            harness!(rom);
        cpu.sp = 0xfffe;
        cpu.set_bc(0xbeef);
        let mut bus = Bus {
            mbc: &mut cart,
            timer: &mut timer,
            joypad: &mut joypad,
            apu: &mut apu,
            ppu: &mut ppu,
            dma: &mut dma,
        };
        cpu.push_word(&mut state, &mut bus, cpu.bc());
        let popped = cpu.pop_word(&mut state, &mut bus);
        assert_eq!(popped, 0xbeef);
        assert_eq!(cpu.sp, 0xfffe);
    }

    #[test]
    fn inc_dec_boundary_flags() {
        let mut f = Flags::empty();
        let result = alu::inc(&mut f, 0xff);
        assert_eq!(result, 0);
        assert!(f.contains(Flags::Z));
        assert!(f.contains(Flags::H));

        let mut f = Flags::empty();
        let result = alu::dec(&mut f, 0x00);
        assert_eq!(result, 0xff);
        assert!(f.contains(Flags::H));
        assert!(f.contains(Flags::N));
    }

    #[test]
    fn halt_bug_executes_next_byte_twice() {
        let mut rom = blank_rom();
        // DI; HALT; INC A; (no further instructions needed)
        rom[0x100] = 0xf3; // DI
        rom[0x101] = 0x76; // HALT
        rom[0x102] = 0x3c; // INC A
        let (mut cpu, mut state, mut cart, mut timer, mut joypad, mut apu, mut ppu, mut dma) =
            harness!(rom);
        cpu.pc = 0x100;
        state.interrupt_flag = Interruptions::VBLANK;
        cpu.interrupt_enable = Interruptions::VBLANK;

        step!(cpu, state, cart, timer, joypad, apu, ppu, dma); // DI
        step!(cpu, state, cart, timer, joypad, apu, ppu, dma); // HALT observes a pending-but-masked interrupt, sets halt_bug
        assert!(cpu.halt_bug);
        let pc_after_halt = cpu.pc;
        step!(cpu, state, cart, timer, joypad, apu, ppu, dma); // INC A, PC decremented back before fetch so this byte is read again
        assert_eq!(cpu.a, 1);
        assert_eq!(cpu.pc, pc_after_halt + 1);
        step!(cpu, state, cart, timer, joypad, apu, ppu, dma); // the same INC A byte, read a second time
        assert_eq!(cpu.a, 2);
        assert_eq!(cpu.pc, pc_after_halt + 2);
    }

    #[test]
    fn ei_takes_effect_after_the_following_instruction() {
        let mut rom = blank_rom();
        rom[0x100] = 0xfb; // EI
        rom[0x101] = 0x00; // NOP
        let (mut cpu, mut state, mut cart, mut timer, mut joypad, mut apu, mut ppu, mut dma) =
            harness!(rom);
        cpu.pc = 0x100;

        step!(cpu, state, cart, timer, joypad, apu, ppu, dma); // EI: schedules
        assert!(!cpu.ime);
        step!(cpu, state, cart, timer, joypad, apu, ppu, dma); // NOP: ime becomes true at the top of this step
        assert!(cpu.ime);
    }

    #[test]
    fn invalid_opcode_behaves_as_nop() {
        let mut rom = blank_rom();
        rom[0x100] = 0xd3; // invalid
        let (mut cpu, mut state, mut cart, mut timer, mut joypad, mut apu, mut ppu, mut dma) =
            harness!(rom);
        cpu.pc = 0x100;
        let pc_before = cpu.pc;
        let cycles = step!(cpu, state, cart, timer, joypad, apu, ppu, dma);
        assert_eq!(cycles, 4);
        assert_eq!(cpu.pc, pc_before + 1);
    }
}
