use core::f32::consts::PI;

use crate::apu::{noise_channel::NoiseChannel, pulse_channel::PulseChannel, sweep::Ch1Sweep, wave_channel::WaveChannel};

mod envelope;
mod length;
mod noise_channel;
mod pulse_channel;
mod sweep;
mod wave_channel;

// https://gbdev.io/pandocs/Audio_details.html#dacs
// Citation: If a DAC is enabled, the digital range $0 to $F is linearly translated to the analog range -1 to 1
// Importantly, the slope is negative: "digital 0" maps to "analog 1", not "analog -1".
fn dac(digital: u8) -> f32 {
    1. - f32::from(digital) / 15. * 2.
}

const FRAME_SEQUENCER_PERIOD: u16 = 8192;
const OUTPUT_SAMPLE_RATE: f32 = 44_100.;
const CYCLES_PER_SAMPLE: f32 = 4_194_304. / OUTPUT_SAMPLE_RATE;
const RING_CAPACITY: usize = 2048;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy,  PartialEq, Eq)]
    pub struct Nr52: u8 {
        const AUDIO_ON_OFF = 1 << 7;
        const CH4_ON = 1 << 3;
        const CH3_ON = 1 << 2;
        const CH2_ON = 1 << 1;
        const CH1_ON = 1;
    }
}

// Sound panning
bitflags::bitflags! {
    #[derive(Debug, Clone, Copy,  PartialEq, Eq, Default)]
    pub struct Nr51: u8 {
        const CH4_LEFT = 1 << 7;
        const CH3_LEFT = 1 << 6;
        const CH2_LEFT = 1 << 5;
        const CH1_LEFT = 1 << 4;
        const CH4_RIGHT = 1 << 3;
        const CH3_RIGHT = 1 << 2;
        const CH2_RIGHT = 1 << 1;
        const CH1_RIGHT = 1;
    }
}

// Master volume & VIN panning
bitflags::bitflags! {
    #[derive(Debug, Clone, Copy,  PartialEq, Eq, Default)]
    pub struct Nr50: u8 {
        const VIN_LEFT = 1 << 7;
        const LEFT_VOLUME_MASK = 0b0111_0000;
        const VIN_RIGHT = 1 << 3;
        const RIGHT_VOLUME_MASK = 0b0000_0111;
    }
}

/// A first-order RC high-pass filter, used to remove the DC offset that a DAC-on,
/// channel-off contribution of "analog 1" would otherwise leave in the mix.
#[derive(Clone)]
struct Hpf {
    previous: Option<(f32, f32)>, // input, output
    alpha: f32,
}

impl Hpf {
    fn new(cutoff_frequency: f32, sample_rate: f32) -> Self {
        let rc = 1. / (2. * PI * cutoff_frequency);
        Self {
            alpha: rc / (rc + 1. / sample_rate),
            previous: None,
        }
    }

    fn apply(&mut self, input: f32) -> f32 {
        if let Some((previous_input, previous_output)) = &mut self.previous {
            let output = self.alpha * (*previous_output + input - *previous_input);
            *previous_input = input;
            *previous_output = output;
            output
        } else {
            self.previous = Some((input, input));
            input
        }
    }
}

/// A first-order RC low-pass filter, smoothing away the steps a frequency-timer
/// square/duty model otherwise produces above the audible range.
#[derive(Clone)]
struct Lpf {
    previous_output: f32,
    alpha: f32,
}

impl Lpf {
    fn new(cutoff_frequency: f32, sample_rate: f32) -> Self {
        let rc = 1. / (2. * PI * cutoff_frequency);
        let dt = 1. / sample_rate;
        Self {
            previous_output: 0.,
            alpha: dt / (rc + dt),
        }
    }

    fn apply(&mut self, input: f32) -> f32 {
        self.previous_output += self.alpha * (input - self.previous_output);
        self.previous_output
    }
}

#[derive(Clone)]
struct SampleRing {
    buffer: [(f32, f32); RING_CAPACITY],
    head: usize,
    len: usize,
}

impl Default for SampleRing {
    fn default() -> Self {
        Self {
            buffer: [(0., 0.); RING_CAPACITY],
            head: 0,
            len: 0,
        }
    }
}

impl SampleRing {
    /// Drops the incoming sample if the ring is full; the host is expected to
    /// drain samples at least once per frame.
    fn push(&mut self, sample: (f32, f32)) {
        if self.len == RING_CAPACITY {
            return;
        }
        let index = (self.head + self.len) % RING_CAPACITY;
        self.buffer[index] = sample;
        self.len += 1;
    }

    /// Writes interleaved left/right samples into `out`, returning how many
    /// stereo frames were written.
    fn pop_into(&mut self, out: &mut [f32]) -> usize {
        let frames = (out.len() / 2).min(self.len);
        for i in 0..frames {
            let (left, right) = self.buffer[(self.head + i) % RING_CAPACITY];
            out[2 * i] = left;
            out[2 * i + 1] = right;
        }
        self.head = (self.head + frames) % RING_CAPACITY;
        self.len -= frames;
        frames
    }
}

#[derive(Clone)]
pub struct Apu {
    is_on: bool,
    nr51: Nr51,
    nr50: Nr50,
    pub ch1: PulseChannel<Ch1Sweep>,
    pub ch2: PulseChannel<()>,
    pub ch3: WaveChannel,
    pub ch4: NoiseChannel,
    frame_sequencer_timer: u16,
    frame_sequencer_step: u8,
    sample_timer: f32,
    hpf_left: Hpf,
    hpf_right: Hpf,
    lpf_left: Lpf,
    lpf_right: Lpf,
    samples: SampleRing,
}

impl Default for Apu {
    fn default() -> Self {
        Self {
            is_on: false,
            nr51: Nr51::default(),
            nr50: Nr50::default(),
            ch1: PulseChannel::default(),
            ch2: PulseChannel::default(),
            ch3: WaveChannel::default(),
            ch4: NoiseChannel::default(),
            frame_sequencer_timer: FRAME_SEQUENCER_PERIOD,
            frame_sequencer_step: 0,
            sample_timer: 0.,
            hpf_left: Hpf::new(20., OUTPUT_SAMPLE_RATE),
            hpf_right: Hpf::new(20., OUTPUT_SAMPLE_RATE),
            lpf_left: Lpf::new(14_000., OUTPUT_SAMPLE_RATE),
            lpf_right: Lpf::new(14_000., OUTPUT_SAMPLE_RATE),
            samples: SampleRing::default(),
        }
    }
}

impl Apu {
    pub fn sample_rate(&self) -> u32 {
        OUTPUT_SAMPLE_RATE as u32
    }

    /// Copies up to `out.len() / 2` stereo frames (interleaved left/right) into
    /// `out`, returning the number of frames actually written.
    pub fn get_samples(&mut self, out: &mut [f32]) -> usize {
        self.samples.pop_into(out)
    }

    pub fn get_nr52(&self) -> u8 {
        let mut flags = Nr52::empty();
        flags.set(Nr52::AUDIO_ON_OFF, self.is_on);
        flags.set(Nr52::CH4_ON, self.ch4.is_on());
        flags.set(Nr52::CH3_ON, self.ch3.is_on());
        flags.set(Nr52::CH2_ON, self.ch2.is_on());
        flags.set(Nr52::CH1_ON, self.ch1.is_on());

        flags.bits() | 0b0111_0000
    }

    pub fn write_nr52(&mut self, value: u8) {
        let is_on = Nr52::from_bits_retain(value).contains(Nr52::AUDIO_ON_OFF);
        if self.is_on == is_on {
            return;
        }
        self.is_on = is_on;
        if !self.is_on {
            let ram = self.ch3.ram();
            let mut ch3 = WaveChannel::default();
            ch3.set_ram(ram);
            *self = Self {
                ch3,
                ..Default::default()
            };
        }
    }
    pub fn get_nr51(&self) -> u8 {
        self.nr51.bits()
    }
    pub fn write_nr51(&mut self, value: u8) {
        self.nr51 = Nr51::from_bits_retain(value);
    }
    pub fn get_nr50(&self) -> u8 {
        self.nr50.bits()
    }
    pub fn write_nr50(&mut self, value: u8) {
        self.nr50 = Nr50::from_bits_retain(value);
    }

    fn tick_length(&mut self) {
        self.ch1.tick_length();
        self.ch2.tick_length();
        self.ch3.tick_length();
        self.ch4.tick_length();
    }

    fn tick_envelope(&mut self) {
        self.ch1.tick_envelope();
        self.ch2.tick_envelope();
        self.ch4.tick_envelope();
    }

    fn tick_frame_sequencer(&mut self) {
        match self.frame_sequencer_step {
            0 | 4 => self.tick_length(),
            2 | 6 => {
                self.tick_length();
                self.ch1.tick_sweep();
            }
            7 => self.tick_envelope(),
            _ => {}
        }
        self.frame_sequencer_step = (self.frame_sequencer_step + 1) % 8;
    }

    fn volume_left(&self) -> f32 {
        f32::from((self.nr50.bits() >> 4) & 0x7) + 1.
    }

    fn volume_right(&self) -> f32 {
        f32::from(self.nr50.bits() & 0x7) + 1.
    }

    fn mix(&self) -> (f32, f32) {
        let ch1 = if self.ch1.is_dac_on() {
            dac(self.ch1.digital_output())
        } else {
            0.
        };
        let ch2 = if self.ch2.is_dac_on() {
            dac(self.ch2.digital_output())
        } else {
            0.
        };
        let ch3 = if self.ch3.is_dac_on() {
            dac(self.ch3.digital_output())
        } else {
            0.
        };
        let ch4 = if self.ch4.is_dac_on() {
            dac(self.ch4.digital_output())
        } else {
            0.
        };

        let mut left = 0.;
        let mut right = 0.;
        if self.nr51.contains(Nr51::CH1_LEFT) {
            left += ch1;
        }
        if self.nr51.contains(Nr51::CH2_LEFT) {
            left += ch2;
        }
        if self.nr51.contains(Nr51::CH3_LEFT) {
            left += ch3;
        }
        if self.nr51.contains(Nr51::CH4_LEFT) {
            left += ch4;
        }
        if self.nr51.contains(Nr51::CH1_RIGHT) {
            right += ch1;
        }
        if self.nr51.contains(Nr51::CH2_RIGHT) {
            right += ch2;
        }
        if self.nr51.contains(Nr51::CH3_RIGHT) {
            right += ch3;
        }
        if self.nr51.contains(Nr51::CH4_RIGHT) {
            right += ch4;
        }

        (
            left / 4. * self.volume_left() / 8.,
            right / 4. * self.volume_right() / 8.,
        )
    }

    fn generate_sample(&mut self) {
        let (raw_left, raw_right) = self.mix();
        let left = self.lpf_left.apply(self.hpf_left.apply(raw_left));
        let right = self.lpf_right.apply(self.hpf_right.apply(raw_right));
        self.samples.push((left, right));
    }

    /// Advances every channel, the 512 Hz frame sequencer, and the sample-rate
    /// conversion accumulator by `cycles` T-cycles.
    pub fn step(&mut self, cycles: u8) {
        let cycles16 = u16::from(cycles);

        if self.is_on {
            self.ch1.step(cycles16);
            self.ch2.step(cycles16);
            self.ch3.step(cycles16);
            self.ch4.step(u32::from(cycles16));

            let mut remaining = cycles16;
            while remaining > 0 {
                let step = self.frame_sequencer_timer.min(remaining);
                self.frame_sequencer_timer -= step;
                remaining -= step;
                if self.frame_sequencer_timer == 0 {
                    self.frame_sequencer_timer = FRAME_SEQUENCER_PERIOD;
                    self.tick_frame_sequencer();
                }
            }
        }

        self.sample_timer += f32::from(cycles);
        while self.sample_timer >= CYCLES_PER_SAMPLE {
            self.sample_timer -= CYCLES_PER_SAMPLE;
            self.generate_sample();
        }
    }

    pub fn read(&self, index: u16) -> u8 {
        use crate::state::*;
        match index {
            CH1_SWEEP => self.ch1.get_nr10(),
            CH1_LENGTH_TIMER_AND_DUTY_CYCLE => self.ch1.get_nrx1(),
            CH1_VOLUME_AND_ENVELOPE => self.ch1.get_nrx2(),
            CH1_PERIOD_LOW => self.ch1.get_nrx3(),
            CH1_PERIOD_HIGH_AND_CONTROL => self.ch1.get_nrx4(),
            0xff15 => 0xff,
            CH2_LENGTH_TIMER_AND_DUTY_CYCLE => self.ch2.get_nrx1(),
            CH2_VOLUME_AND_ENVELOPE => self.ch2.get_nrx2(),
            CH2_PERIOD_LOW => self.ch2.get_nrx3(),
            CH2_PERIOD_HIGH_AND_CONTROL => self.ch2.get_nrx4(),
            CH3_DAC_ENABLE => self.ch3.get_nr30(),
            CH3_LENGTH_TIMER => self.ch3.get_nr31(),
            CH3_OUTPUT_LEVEL => self.ch3.get_nr32(),
            CH3_PERIOD_LOW => self.ch3.get_nr33(),
            CH3_PERIOD_HIGH_AND_CONTROL => self.ch3.get_nr34(),
            0xff1f => 0xff,
            CH4_LENGTH_TIMER => self.ch4.read_nr41(),
            CH4_VOLUME_AND_ENVELOPE => self.ch4.read_nr42(),
            CH4_FREQUENCY_AND_RANDOMNESS => self.ch4.read_nr43(),
            CH4_CONTROL => self.ch4.read_nr44(),
            MASTER_VOLUME_AND_VIN_PANNING => self.get_nr50(),
            SOUND_PANNING => self.get_nr51(),
            AUDIO_MASTER_CONTROL => self.get_nr52(),
            0xff27..WAVE => 0xff,
            WAVE..LCD_CONTROL => self.ch3.read_ram(u8::try_from(index - WAVE).unwrap()),
            _ => unreachable!(),
        }
    }

    pub fn write(&mut self, index: u16, value: u8) {
        use crate::state::*;

        // Per the well-known "blargg" APU test ROM behavior, the initial length
        // timer registers can still be written while the whole unit is off.
        match (index, self.is_on) {
            (CH1_SWEEP, true) => self.ch1.write_nr10(value),
            (CH1_LENGTH_TIMER_AND_DUTY_CYCLE, _) => self.ch1.write_nrx1(value, self.is_on),
            (CH1_VOLUME_AND_ENVELOPE, true) => self.ch1.write_nrx2(value),
            (CH1_PERIOD_LOW, true) => self.ch1.write_nrx3(value),
            (CH1_PERIOD_HIGH_AND_CONTROL, true) => {
                self.ch1.write_nrx4(value, self.frame_sequencer_step)
            }
            (CH2_LENGTH_TIMER_AND_DUTY_CYCLE, _) => self.ch2.write_nrx1(value, self.is_on),
            (CH2_VOLUME_AND_ENVELOPE, true) => self.ch2.write_nrx2(value),
            (CH2_PERIOD_LOW, true) => self.ch2.write_nrx3(value),
            (CH2_PERIOD_HIGH_AND_CONTROL, true) => {
                self.ch2.write_nrx4(value, self.frame_sequencer_step)
            }
            (CH3_DAC_ENABLE, true) => self.ch3.write_nr30(value),
            (CH3_LENGTH_TIMER, _) => self.ch3.write_nr31(value),
            (CH3_OUTPUT_LEVEL, true) => self.ch3.write_nr32(value),
            (CH3_PERIOD_LOW, true) => self.ch3.write_nr33(value),
            (CH3_PERIOD_HIGH_AND_CONTROL, true) => {
                self.ch3.write_nr34(value, self.frame_sequencer_step)
            }
            (CH4_LENGTH_TIMER, _) => self.ch4.write_nr41(value),
            (CH4_VOLUME_AND_ENVELOPE, true) => self.ch4.write_nr42(value),
            (CH4_FREQUENCY_AND_RANDOMNESS, true) => self.ch4.write_nr43(value),
            (CH4_CONTROL, true) => self.ch4.write_nr44(value, self.frame_sequencer_step),
            (MASTER_VOLUME_AND_VIN_PANNING, true) => self.write_nr50(value),
            (SOUND_PANNING, true) => self.write_nr51(value),
            (AUDIO_MASTER_CONTROL, _) => self.write_nr52(value),
            (WAVE..LCD_CONTROL, _) => {
                self.ch3
                    .write_ram(u8::try_from(index - WAVE).unwrap(), value);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::*;

    #[test]
    fn nr52_reports_master_power_bit() {
        let mut apu = Apu::default();
        apu.write(AUDIO_MASTER_CONTROL, 0x80);
        assert_eq!(apu.get_nr52() & 0x80, 0x80);
        apu.write(AUDIO_MASTER_CONTROL, 0x00);
        assert_eq!(apu.get_nr52() & 0x80, 0);
    }

    #[test]
    fn pulse_channel_produces_nonzero_samples_once_triggered() {
        let mut apu = Apu::default();
        apu.write(AUDIO_MASTER_CONTROL, 0x80);
        apu.write(SOUND_PANNING, 0xff);
        apu.write(MASTER_VOLUME_AND_VIN_PANNING, 0x77);
        apu.write(CH1_VOLUME_AND_ENVELOPE, 0xf0); // max volume, envelope off
        apu.write(CH1_PERIOD_LOW, 0x00);
        apu.write(CH1_PERIOD_HIGH_AND_CONTROL, 0x87); // trigger, period high bits
        for _ in 0..10_000 {
            apu.step(4);
        }
        let mut buf = [0.0_f32; 2];
        let frames = apu.get_samples(&mut buf);
        assert_eq!(frames, 1);
    }
}
