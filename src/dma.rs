use core::ops::Range;

use crate::{
    mbc::Mbc,
    state::{MmuExt, State},
};

// about conflicts
// https://github.com/Gekkio/mooneye-gb/issues/39#issuecomment-265953981

#[derive(Clone)]
pub struct Dma {
    range: Range<u16>,
    is_active: bool,
    t_cycle_counter: u8,
}

impl Default for Dma {
    fn default() -> Self {
        Self {
            range: 0..0,
            is_active: false,
            t_cycle_counter: 0,
        }
    }
}

impl Dma {
    pub fn is_active(&self) -> bool {
        self.is_active
    }

    fn start_if_requested(&mut self, state: &mut State) {
        if state.dma_request {
            state.dma_request = false;
            self.range = u16::from_be_bytes([state.dma_register, 0])
                ..u16::from_be_bytes([state.dma_register, 0xa0]);
            // the bus is blocked from the write itself, not from the first copied byte
            self.is_active = true;
        }
    }

    fn copy_one_byte<M: Mbc + ?Sized>(&mut self, state: &mut State, mbc: &M) {
        if let Some(address) = self.range.next() {
            state.oam[usize::from(address as u8)] = state.read(address, mbc);
        }
        if self.range.is_empty() {
            self.is_active = false;
        }
    }

    /// Advances the transfer by `cycles` T-cycles, copying one byte every 4 T-cycles.
    pub fn step<M: Mbc + ?Sized>(&mut self, state: &mut State, mbc: &M, cycles: u8) {
        for _ in 0..cycles {
            self.start_if_requested(state);
            self.t_cycle_counter += 1;
            if self.t_cycle_counter >= 4 {
                self.t_cycle_counter = 0;
                if self.is_active {
                    self.copy_one_byte(state, mbc);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starting_a_transfer_blocks_the_bus_immediately() {
        let mut state = State::default();
        let mut dma = Dma::default();
        state.dma_register = 0xc0;
        state.dma_request = true;
        // the write itself (not the first copied byte) flips is_active
        dma.start_if_requested(&mut state);
        assert!(dma.is_active());
    }

    #[test]
    fn transfer_copies_source_into_oam_after_160_m_cycles() {
        use crate::mbc::{Cartridge, CartridgeType};

        let rom: [u8; 0x8000] = [0; 0x8000];
        let cartridge = Cartridge::new(&rom[..], CartridgeType::RomOnly);
        let mut state = State::default();
        state.wram[0] = 0x42;
        state.dma_register = 0xc0; // source 0xc000, inside WRAM
        state.dma_request = true;

        let mut dma = Dma::default();
        dma.step(&mut state, &cartridge, 640);

        assert!(!dma.is_active());
        assert_eq!(state.oam[0], 0x42);
    }
}
