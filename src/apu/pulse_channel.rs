use crate::apu::{
    envelope::Envelope,
    length::Length,
    sweep::{Ch1Sweep, Sweep},
};

// https://gbdev.io/pandocs/Audio_Registers.html#ff11--nr11-channel-1-length-timer--duty-cycle
const DUTY_TABLE: [[u8; 8]; 4] = [
    [0, 0, 0, 0, 0, 0, 0, 1],
    [1, 0, 0, 0, 0, 0, 0, 1],
    [1, 0, 0, 0, 0, 1, 1, 1],
    [0, 1, 1, 1, 1, 1, 1, 0],
];

#[derive(Clone, Default)]
pub struct PulseChannel<S: Sweep> {
    length: Length<64>,
    duty_cycle: u8,
    envelope: Envelope,
    period_low: u8,
    period_high: u8,
    is_enabled: bool,
    sweep: S,
    frequency_timer: u16,
    duty_position: u8,
}

impl<S: Sweep + Default> PulseChannel<S> {
    pub fn tick_envelope(&mut self) {
        if self.is_on() {
            self.envelope.tick();
        }
    }
    pub fn tick_length(&mut self) {
        self.is_enabled &= !self.length.tick();
    }
    pub fn get_nrx1(&self) -> u8 {
        (self.duty_cycle << 6) | 0b0011_1111
    }
    pub fn write_nrx1(&mut self, value: u8, is_apu_on: bool) {
        if is_apu_on {
            self.duty_cycle = value >> 6;
        }
        self.length.write_initial(value & 0x3f);
    }
    pub fn get_nrx2(&self) -> u8 {
        self.envelope.get_register()
    }
    pub fn write_nrx2(&mut self, value: u8) {
        self.envelope.write_register(value, self.is_enabled);
        self.is_enabled &= self.envelope.is_dac_on();
    }
    pub fn get_nrx3(&self) -> u8 {
        0xff
    }
    pub fn write_nrx3(&mut self, value: u8) {
        self.period_low = value;
    }
    pub fn get_nrx4(&self) -> u8 {
        ((self.length.is_enabled() as u8) << 6) | 0b1011_1111
    }
    pub fn write_nrx4(&mut self, value: u8, frame_sequencer_step: u8) {
        self.is_enabled &= !self.length.set_enabled(value & 0x40 != 0, frame_sequencer_step);
        self.period_high = value & 0x07;
        if value & 0x80 != 0 {
            self.trigger(frame_sequencer_step);
        }
    }

    pub fn trigger(&mut self, frame_sequencer_step: u8) {
        self.length.trigger(frame_sequencer_step);
        self.reload_frequency_timer();

        if !self.envelope.is_dac_on() {
            self.is_enabled = false;
            return;
        }

        self.envelope.trigger();
        self.is_enabled = self.sweep.trigger(self.get_period_value()).0;
    }

    pub fn is_on(&self) -> bool {
        self.is_enabled
    }

    pub fn is_dac_on(&self) -> bool {
        self.envelope.is_dac_on()
    }

    pub fn tick_sweep(&mut self) {
        if !self.is_on() {
            return;
        }
        let (is_enabled_from_sweep, new_period) = self.sweep.tick();
        if let Some(period) = new_period {
            self.set_period_value(period);
        }
        self.is_enabled = is_enabled_from_sweep;
    }

    // 11 bits
    fn get_period_value(&self) -> u16 {
        u16::from_be_bytes([self.period_high & 0x07, self.period_low])
    }

    fn set_period_value(&mut self, value: u16) {
        self.period_low = value as u8;
        self.period_high = ((value >> 8) as u8) & 0x07;
    }

    fn reload_frequency_timer(&mut self) {
        let period = self
            .sweep
            .get_period_value()
            .unwrap_or_else(|| self.get_period_value());
        self.frequency_timer = (2048 - period) * 4;
    }

    /// Advances the duty-cycle phase by `t_cycles` T-cycles.
    pub fn step(&mut self, t_cycles: u16) {
        let mut remaining = t_cycles;
        while remaining > 0 {
            if self.frequency_timer == 0 {
                self.reload_frequency_timer();
                self.duty_position = (self.duty_position + 1) % 8;
            }
            let step = self.frequency_timer.min(remaining);
            self.frequency_timer -= step;
            remaining -= step;
        }
    }

    /// 4-bit digital output sample (0 when off or DAC disabled).
    pub fn digital_output(&self) -> u8 {
        if !self.is_on() || !self.envelope.is_dac_on() {
            return 0;
        }
        let wave = DUTY_TABLE[usize::from(self.duty_cycle)];
        wave[usize::from(self.duty_position)] * self.envelope.volume()
    }
}

impl PulseChannel<Ch1Sweep> {
    pub fn get_nr10(&self) -> u8 {
        self.sweep.get_nr10() | 0x80
    }
    pub fn write_nr10(&mut self, value: u8) {
        self.sweep.set_nr10(value);
    }
}
