mod mbc1;
mod mbc2;
mod mbc3;
mod mbc5;

use core::ops::Deref;

pub use mbc1::*;
pub use mbc2::*;
pub use mbc3::*;
pub use mbc5::*;

// this trait will make people able to build alien MBCs.
// Be careful about monomorphization
pub trait Mbc {
    // maybe too much responsibility?
    fn load_saved_ram(&mut self, save: &[u8]);
    // useful for RTC at the moment
    fn load_additional_data(&mut self, additional_data: &[u8]);
    fn read(&self, address: u16) -> u8;
    fn write(&mut self, address: u16, value: u8);
    fn get_ram_to_save(&self) -> Option<&[u8]>;
    /// Returns how many bytes were written into the buffer. Panics if the buffer is not big enough.
    fn get_additional_data_to_save(&self, buffer: &mut [u8]) -> usize;
}

impl<T: Deref<Target = [u8]>> Mbc for T {
    fn read(&self, address: u16) -> u8 {
        self[usize::from(address)]
    }

    fn write(&mut self, _: u16, _: u8) {}
    fn get_ram_to_save(&self) -> Option<&[u8]> {
        None
    }
    fn get_additional_data_to_save(&self, _: &mut [u8]) -> usize {
        0
    }
    fn load_saved_ram(&mut self, _: &[u8]) {}
    fn load_additional_data(&mut self, _: &[u8]) {}
}

#[derive(Debug, Clone, Copy)]
pub enum CartridgeType {
    RomOnly,
    Mbc1,
    Mbc1Ram,
    Mbc1RamBattery,
    Mbc2,
    Mbc2Battery,
    Mbc3TimerBattery,
    Mbc3TimerRamBattery,
    Mbc3,
    Mbc3Ram,
    Mbc3RamBattery,
    Mbc5,
    Mbc5RamBattery,
}

impl CartridgeType {
    pub fn has_battery(&self) -> bool {
        use CartridgeType::*;
        matches!(
            self,
            Mbc1RamBattery
                | Mbc2Battery
                | Mbc3TimerBattery
                | Mbc3TimerRamBattery
                | Mbc3RamBattery
                | Mbc5RamBattery
        )
    }

    pub fn has_rtc(&self) -> bool {
        matches!(
            self,
            CartridgeType::Mbc3TimerBattery | CartridgeType::Mbc3TimerRamBattery
        )
    }
}

impl TryFrom<u8> for CartridgeType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        // https://gbdev.io/pandocs/The_Cartridge_Header.html#0147--cartridge-type
        match value {
            0 => Ok(Self::RomOnly),
            1 => Ok(Self::Mbc1),
            2 => Ok(Self::Mbc1Ram),
            3 => Ok(Self::Mbc1RamBattery),
            5 => Ok(Self::Mbc2),
            6 => Ok(Self::Mbc2Battery),
            0x0f => Ok(Self::Mbc3TimerBattery),
            0x10 => Ok(Self::Mbc3TimerRamBattery),
            0x11 => Ok(Self::Mbc3),
            0x12 => Ok(Self::Mbc3Ram),
            0x13 => Ok(Self::Mbc3RamBattery),
            0x19 => Ok(Self::Mbc5),
            0x1b => Ok(Self::Mbc5RamBattery),
            _ => Err(value),
        }
    }
}

pub const ROM_BANK_SIZE: u16 = 16384;
pub const RAM_BANK_SIZE: u16 = 8192;

/// Static-dispatch union of every supported mapper, generic over the borrowed ROM byte slice.
/// `no_std` without allocation rules out `Box<dyn Mbc>`; this keeps construction and dispatch
/// entirely on the stack.
#[derive(Clone)]
pub enum Cartridge<'a> {
    RomOnly(&'a [u8]),
    Mbc1(Mbc1<&'a [u8]>),
    Mbc2(Mbc2<&'a [u8]>),
    Mbc3(Mbc3<&'a [u8]>),
    Mbc5(Mbc5<&'a [u8]>),
}

impl<'a> Cartridge<'a> {
    pub fn new(rom: &'a [u8], cartridge_type: CartridgeType) -> Self {
        match cartridge_type {
            CartridgeType::RomOnly => Self::RomOnly(rom),
            CartridgeType::Mbc1 | CartridgeType::Mbc1Ram | CartridgeType::Mbc1RamBattery => {
                Self::Mbc1(Mbc1::new(rom))
            }
            CartridgeType::Mbc2 | CartridgeType::Mbc2Battery => Self::Mbc2(Mbc2::new(rom)),
            CartridgeType::Mbc3TimerBattery
            | CartridgeType::Mbc3TimerRamBattery
            | CartridgeType::Mbc3
            | CartridgeType::Mbc3Ram
            | CartridgeType::Mbc3RamBattery => {
                Self::Mbc3(Mbc3::new(rom, cartridge_type.has_rtc()))
            }
            CartridgeType::Mbc5 | CartridgeType::Mbc5RamBattery => Self::Mbc5(Mbc5::new(rom)),
        }
    }

    /// Advances the MBC3 real-time clock, if present. No-op for every other mapper.
    pub fn tick_rtc_seconds(&mut self, elapsed: u64) {
        if let Self::Mbc3(mbc3) = self {
            mbc3.tick_rtc_seconds(elapsed);
        }
    }

    /// Advances the MBC3 real-time clock off a host-supplied wall clock, if present.
    pub fn tick_rtc<C: WallClock>(&mut self, clock: &C) {
        if let Self::Mbc3(mbc3) = self {
            mbc3.tick_rtc(clock);
        }
    }
}

impl Mbc for Cartridge<'_> {
    fn read(&self, address: u16) -> u8 {
        match self {
            Self::RomOnly(rom) => rom.read(address),
            Self::Mbc1(mbc) => mbc.read(address),
            Self::Mbc2(mbc) => mbc.read(address),
            Self::Mbc3(mbc) => mbc.read(address),
            Self::Mbc5(mbc) => mbc.read(address),
        }
    }

    fn write(&mut self, address: u16, value: u8) {
        match self {
            Self::RomOnly(_) => {}
            Self::Mbc1(mbc) => mbc.write(address, value),
            Self::Mbc2(mbc) => mbc.write(address, value),
            Self::Mbc3(mbc) => mbc.write(address, value),
            Self::Mbc5(mbc) => mbc.write(address, value),
        }
    }

    fn load_saved_ram(&mut self, save: &[u8]) {
        match self {
            Self::RomOnly(_) => {}
            Self::Mbc1(mbc) => mbc.load_saved_ram(save),
            Self::Mbc2(mbc) => mbc.load_saved_ram(save),
            Self::Mbc3(mbc) => mbc.load_saved_ram(save),
            Self::Mbc5(mbc) => mbc.load_saved_ram(save),
        }
    }

    fn load_additional_data(&mut self, data: &[u8]) {
        if let Self::Mbc3(mbc) = self {
            mbc.load_additional_data(data);
        }
    }

    fn get_ram_to_save(&self) -> Option<&[u8]> {
        match self {
            Self::RomOnly(_) => None,
            Self::Mbc1(mbc) => mbc.get_ram_to_save(),
            Self::Mbc2(mbc) => mbc.get_ram_to_save(),
            Self::Mbc3(mbc) => mbc.get_ram_to_save(),
            Self::Mbc5(mbc) => mbc.get_ram_to_save(),
        }
    }

    fn get_additional_data_to_save(&self, buffer: &mut [u8]) -> usize {
        match self {
            Self::Mbc3(mbc) => mbc.get_additional_data_to_save(buffer),
            _ => 0,
        }
    }
}

pub fn get_factor_32_kib_rom(rom: &[u8]) -> u16 {
    1 << rom[0x148]
}

// https://gbdev.io/pandocs/The_Cartridge_Header.html#0149--ram-size
pub fn get_factor_8_kib_ram(rom: &[u8]) -> u8 {
    match rom[0x149] {
        0 => 0,
        2 => 1,
        3 => 4,
        4 => 16,
        5 => 8,
        _ => panic!(),
    }
}
