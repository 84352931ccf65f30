/// Length counter shared by all four channels. `L` is 64 for pulse/noise, 256 for wave.
#[derive(Clone, Default)]
pub struct Length<const L: u16> {
    enabled: bool,
    counter: u16,
}

impl<const L: u16> Length<L> {
    pub fn write_initial(&mut self, value: u8) {
        self.counter = L - u16::from(value);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Sets the length-enable bit (NRx4 bit 6). If the frame sequencer is on a
    /// length-clocking step (an even step) and the bit is newly set, the extra
    /// clock quirk applies the same as a real 256 Hz tick would.
    /// Returns true if the channel should be switched off as a result.
    pub fn set_enabled(&mut self, enabled: bool, frame_sequencer_step: u8) -> bool {
        let was_enabled = self.enabled;
        self.enabled = enabled;
        if !was_enabled && enabled && frame_sequencer_step % 2 == 0 {
            return self.clock();
        }
        false
    }

    /// Reloads the counter to `L` if expired, applying the same extra-clock
    /// quirk as `set_enabled` when length is already enabled at trigger time.
    pub fn trigger(&mut self, frame_sequencer_step: u8) {
        if self.counter == 0 {
            self.counter = L;
            if self.enabled && frame_sequencer_step % 2 == 0 {
                self.clock();
            }
        }
    }

    fn clock(&mut self) -> bool {
        if self.counter == 0 {
            return false;
        }
        self.counter -= 1;
        self.counter == 0
    }

    /// Advances the counter one 256 Hz tick. Returns true if the channel should be
    /// switched off as a result (the counter just reached zero).
    pub fn tick(&mut self) -> bool {
        if !self.enabled {
            return false;
        }
        self.clock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enabling_on_an_even_step_applies_the_extra_clock() {
        let mut length = Length::<64>::default();
        length.write_initial(0); // counter = 64
        assert!(!length.set_enabled(true, 2));
        // the enable-time clock already took one off the 256 Hz budget
        assert!(!length.tick());
    }

    #[test]
    fn enabling_on_an_odd_step_does_not_clock() {
        let mut length = Length::<64>::default();
        length.write_initial(63); // counter = 1
        assert!(!length.set_enabled(true, 1));
        assert!(length.tick()); // only the real 256 Hz tick empties it
    }

    #[test]
    fn enabling_with_one_tick_left_on_an_even_step_disables_immediately() {
        let mut length = Length::<64>::default();
        length.write_initial(63); // counter = 1
        assert!(length.set_enabled(true, 4));
    }

    #[test]
    fn trigger_reload_on_an_even_step_with_length_enabled_consumes_one_tick() {
        let mut length = Length::<64>::default();
        length.write_initial(0); // counter = 64, expired after 64 ticks below
        for _ in 0..64 {
            length.set_enabled(true, 1);
            length.tick();
        }
        length.trigger(6); // reloads to 64, then the extra clock takes it to 63
        for _ in 0..62 {
            assert!(!length.tick());
        }
        assert!(length.tick());
    }
}
