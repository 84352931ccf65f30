use crate::{mbc::*, state::*};
use core::ops::Deref;

/// MBC2 has no external RAM chip: it carries 512x4-bit built-in RAM, addressed with the
/// low nibble of each byte and the high nibble fixed to 1s on read.
/// https://gbdev.io/pandocs/MBC2.html
#[derive(Clone)]
pub struct Mbc2<T> {
    rom: T,
    rom_bank: u8,
    rom_bank_count: u8,
    ram: [u8; 512],
    ram_enabled: bool,
}

impl<T: Deref<Target = [u8]>> Mbc2<T> {
    pub fn new(rom: T) -> Self {
        Self {
            rom_bank_count: u8::try_from(get_factor_32_kib_rom(rom.deref())).unwrap() << 1,
            rom,
            rom_bank: 1,
            ram: [0; 512],
            ram_enabled: false,
        }
    }

    fn get_switchable_rom_offset(&self) -> usize {
        let bank = self.rom_bank.max(1) & (self.rom_bank_count - 1).max(1);
        usize::from(bank) * usize::from(ROM_BANK_SIZE)
    }
}

impl<T: Deref<Target = [u8]>> Mbc for Mbc2<T> {
    fn read(&self, index: u16) -> u8 {
        match index {
            ROM_BANK..SWITCHABLE_ROM_BANK => self.rom[usize::from(index)],
            SWITCHABLE_ROM_BANK..VIDEO_RAM => {
                self.rom[self.get_switchable_rom_offset() + usize::from(index)
                    - usize::from(SWITCHABLE_ROM_BANK)]
            }
            // MBC2's built-in RAM is only wired up to 0xa000..0xa200, but the gameboy
            // echoes it across the whole 0xa000-0xbfff window.
            EXTERNAL_RAM..WORK_RAM => {
                if !self.ram_enabled {
                    return 0xff;
                }
                self.ram[usize::from(index) % self.ram.len()] | 0xf0
            }
            _ => panic!(),
        }
    }

    fn write(&mut self, index: u16, value: u8) {
        match index {
            // 0x0000-0x3FFF - bit 8 of the address distinguishes RAM-enable from
            // ROM-bank-select writes: even bank -> RAM enable, odd bank -> ROM bank.
            0x0000..=0x3fff => {
                if index & 0x100 == 0 {
                    self.ram_enabled = (value & 0x0f) == 0x0a;
                } else {
                    let bank = value & 0x0f;
                    self.rom_bank = if bank == 0 { 1 } else { bank };
                }
            }
            EXTERNAL_RAM..WORK_RAM => {
                if !self.ram_enabled {
                    return;
                }
                let len = self.ram.len();
                self.ram[usize::from(index) % len] = value & 0x0f;
            }
            _ => {}
        }
    }

    fn load_saved_ram(&mut self, save: &[u8]) {
        let min = save.len().min(self.ram.len());
        self.ram[..min].copy_from_slice(&save[..min]);
    }

    fn load_additional_data(&mut self, _: &[u8]) {}

    fn get_ram_to_save(&self) -> Option<&[u8]> {
        Some(&self.ram)
    }

    fn get_additional_data_to_save(&self, _: &mut [u8]) -> usize {
        0
    }
}
