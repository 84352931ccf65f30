mod color;

use arrayvec::ArrayVec;

pub use color::{Color, ColorIndex};

use crate::state::{Interruptions, LcdStatus, State};

pub const WIDTH: u8 = 160;
pub const HEIGHT: u8 = 144;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct LcdControl: u8 {
        const LCD_PPU_ENABLE = 1 << 7;
        const WINDOW_TILE_MAP = 1 << 6;
        const WINDOW_ENABLE = 1 << 5;
        const BG_AND_WINDOW_TILES = 1 << 4;
        const BG_TILE_MAP = 1 << 3;
        const OBJ_SIZE = 1 << 2;
        const OBJ_ENABLE = 1 << 1;
        const BG_AND_WINDOW_ENABLE = 1;
    }
}

impl LcdControl {
    pub fn get_bg_tile_map_address(self) -> u16 {
        if self.contains(LcdControl::BG_TILE_MAP) {
            0x9c00
        } else {
            0x9800
        }
    }

    pub fn get_window_tile_map_address(self) -> u16 {
        if self.contains(LcdControl::WINDOW_TILE_MAP) {
            0x9c00
        } else {
            0x9800
        }
    }
}

const TILE_LENGTH: u8 = 16;
type Tile = [u8; 16];

pub fn get_line_from_tile(tile: &Tile, y: u8) -> [u8; 2] {
    debug_assert!(y < 8);
    tile[usize::from(y * 2)..usize::from((y + 1) * 2)]
        .try_into()
        .unwrap()
}

pub fn get_color_from_line(line: [u8; 2], x: u8) -> ColorIndex {
    debug_assert!(x < 8);
    ColorIndex::new((line[0] & (0x80 >> x)) != 0, (line[1] & (0x80 >> x)) != 0)
}

#[must_use]
pub fn get_bg_win_tile(vram: &[u8], index: u8, is_signed_addressing: bool) -> &Tile {
    let base = if is_signed_addressing {
        0x1000usize.strict_add_signed(isize::from(index.cast_signed()) * isize::from(TILE_LENGTH))
    } else {
        usize::from(index) * usize::from(TILE_LENGTH)
    };
    vram[base..base + usize::from(TILE_LENGTH)]
        .try_into()
        .unwrap()
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Default, Copy, PartialEq, Eq)]
    pub struct ObjectFlags: u8 {
        const PRIORITY = 1 << 7;
        const Y_FLIP = 1 << 6;
        const X_FLIP = 1 << 5;
        const DMG_PALETTE = 1 << 4;
    }
}

#[derive(Clone, Copy)]
struct ObjectAttribute {
    y: u8,
    x: u8,
    tile_index: u8,
    flags: ObjectFlags,
}

impl From<[u8; 4]> for ObjectAttribute {
    fn from([y, x, tile_index, flags]: [u8; 4]) -> Self {
        Self {
            y,
            x,
            tile_index,
            flags: ObjectFlags::from_bits_retain(flags),
        }
    }
}

const OAM_SCAN_DURATION: u16 = 80;
const LINE_DURATION: u16 = 456;
const VBLANK_LINES: u8 = 10;

#[derive(Clone)]
pub struct Ppu {
    mode_clock: u16,
    mode3_duration: u16,
    window_line_counter: u8,
    stat_line: bool,
    framebuffer: [Color; (WIDTH as usize) * (HEIGHT as usize)],
}

impl Default for Ppu {
    fn default() -> Self {
        Self {
            mode_clock: 0,
            mode3_duration: 172,
            window_line_counter: 0,
            stat_line: false,
            framebuffer: [Color::from_palette_index(0); (WIDTH as usize) * (HEIGHT as usize)],
        }
    }
}

impl Ppu {
    #[must_use]
    pub fn framebuffer(&self) -> &[Color; (WIDTH as usize) * (HEIGHT as usize)] {
        &self.framebuffer
    }

    pub(crate) fn check_stat_interrupt(&mut self, state: &mut State) {
        let mode_irq = match state.ppu_mode() {
            LcdStatus::HBLANK => state.lcd_status.contains(LcdStatus::HBLANK_INT),
            LcdStatus::VBLANK => state.lcd_status.contains(LcdStatus::VBLANK_INT),
            LcdStatus::OAM_SCAN => state.lcd_status.contains(LcdStatus::OAM_INT),
            _ => false,
        };
        let lyc_irq =
            state.lcd_status.contains(LcdStatus::LYC_INT) && state.ly == state.lyc;
        let line = mode_irq || lyc_irq;

        if line && !self.stat_line {
            state.interrupt_flag.insert(Interruptions::LCD);
        }
        self.stat_line = line;
    }

    fn enter_oam_scan(&mut self, state: &mut State) {
        self.mode_clock = 0;
        state.set_ppu_mode(LcdStatus::OAM_SCAN);
        state.update_lyc_flag();
        self.check_stat_interrupt(state);
    }

    /// Applies a write to LCDC. Disabling the LCD mid-frame resets `ly` to 0 and
    /// the STAT mode bits to the OAM-scan encoding; re-enabling resumes a fresh
    /// OAM scan, matching real hardware rather than freezing mid-mode.
    pub fn set_lcd_control(&mut self, state: &mut State, value: LcdControl) {
        let was_enabled = state.lcd_control.contains(LcdControl::LCD_PPU_ENABLE);
        let now_enabled = value.contains(LcdControl::LCD_PPU_ENABLE);
        state.lcd_control = value;

        if was_enabled && !now_enabled {
            state.ly = 0;
            state.update_lyc_flag();
            state.set_ppu_mode(LcdStatus::OAM_SCAN);
            self.mode_clock = 0;
            self.window_line_counter = 0;
            self.stat_line = false;
        } else if !was_enabled && now_enabled {
            self.window_line_counter = 0;
            self.enter_oam_scan(state);
        }
    }

    /// Advances the PPU by `cycles` T-cycles. Returns true exactly once per frame,
    /// at the Mode 0 -> Mode 1 transition.
    pub fn step(&mut self, state: &mut State, cycles: u8) -> bool {
        if !state.lcd_control.contains(LcdControl::LCD_PPU_ENABLE) {
            return false;
        }

        let mut frame_done = false;
        for _ in 0..cycles {
            frame_done |= self.tick(state);
        }
        frame_done
    }

    fn tick(&mut self, state: &mut State) -> bool {
        self.mode_clock += 1;
        let mut frame_done = false;

        match state.ppu_mode() {
            LcdStatus::OAM_SCAN if self.mode_clock == OAM_SCAN_DURATION => {
                let sprite_count = select_sprites_for_line(state).len() as u16;
                let window_active = state.lcd_control.contains(LcdControl::WINDOW_ENABLE)
                    && state.ly >= state.wy
                    && state.wx <= 166;
                self.mode3_duration = (172
                    + u16::from(state.scx & 7)
                    + 6 * sprite_count.min(10)
                    + if window_active { 6 } else { 0 })
                .clamp(172, 289);
                self.mode_clock = 0;
                state.set_ppu_mode(LcdStatus::DRAWING);
                self.check_stat_interrupt(state);
            }
            LcdStatus::DRAWING if self.mode_clock == self.mode3_duration => {
                self.render_scanline(state);
                self.mode_clock = 0;
                state.set_ppu_mode(LcdStatus::HBLANK);
                self.check_stat_interrupt(state);
            }
            LcdStatus::HBLANK
                if self.mode_clock == LINE_DURATION - OAM_SCAN_DURATION - self.mode3_duration =>
            {
                state.ly += 1;
                state.update_lyc_flag();
                if state.ly == HEIGHT {
                    self.mode_clock = 0;
                    state.set_ppu_mode(LcdStatus::VBLANK);
                    state.interrupt_flag.insert(Interruptions::VBLANK);
                    self.check_stat_interrupt(state);
                    frame_done = true;
                } else {
                    self.enter_oam_scan(state);
                }
            }
            LcdStatus::VBLANK if self.mode_clock == LINE_DURATION => {
                self.mode_clock = 0;
                state.ly += 1;
                if state.ly == HEIGHT + VBLANK_LINES {
                    state.ly = 0;
                    self.window_line_counter = 0;
                    self.enter_oam_scan(state);
                } else {
                    state.update_lyc_flag();
                    self.check_stat_interrupt(state);
                }
            }
            _ => {}
        }

        frame_done
    }

    fn render_scanline(&mut self, state: &mut State) {
        let ly = state.ly;
        let mut bg_indices = [0u8; WIDTH as usize];

        let window_enabled = state.lcd_control.contains(LcdControl::WINDOW_ENABLE)
            && ly >= state.wy
            && state.wx <= 166;
        let mut used_window_this_line = false;

        for x in 0..WIDTH {
            let bg_win_enabled = state
                .lcd_control
                .contains(LcdControl::BG_AND_WINDOW_ENABLE);

            let index = if bg_win_enabled {
                if window_enabled && x + 7 >= state.wx {
                    used_window_this_line = true;
                    let win_x = x + 7 - state.wx;
                    let win_y = self.window_line_counter;
                    self.bg_win_color_index(
                        state,
                        state.lcd_control.get_window_tile_map_address(),
                        win_x,
                        win_y,
                    )
                } else {
                    let bg_x = state.scx.wrapping_add(x);
                    let bg_y = state.scy.wrapping_add(ly);
                    self.bg_win_color_index(
                        state,
                        state.lcd_control.get_bg_tile_map_address(),
                        bg_x,
                        bg_y,
                    )
                }
            } else {
                ColorIndex::Zero
            };

            bg_indices[usize::from(x)] = index.bits();
            let color = index.get_color(state.bgp_register);
            self.framebuffer[usize::from(ly) * usize::from(WIDTH) + usize::from(x)] = color;
        }

        if used_window_this_line {
            self.window_line_counter += 1;
        }

        if state.lcd_control.contains(LcdControl::OBJ_ENABLE) {
            self.render_sprites(state, &bg_indices);
        }
    }

    fn bg_win_color_index(
        &self,
        state: &State,
        tile_map_base: u16,
        picture_x: u8,
        picture_y: u8,
    ) -> ColorIndex {
        let tile_map_index =
            u16::from(picture_x / 8) + u16::from(picture_y / 8) * 32;
        let tile_index = state.video_ram[usize::from(tile_map_base - 0x8000 + tile_map_index)];
        let tile = get_bg_win_tile(
            &state.video_ram[..0x1800],
            tile_index,
            !state
                .lcd_control
                .contains(LcdControl::BG_AND_WINDOW_TILES),
        );
        get_color_from_line(get_line_from_tile(tile, picture_y % 8), picture_x % 8)
    }

    fn render_sprites(&mut self, state: &mut State, bg_indices: &[u8; WIDTH as usize]) {
        let ly = state.ly;
        let is_big = state.lcd_control.contains(LcdControl::OBJ_SIZE);
        let mut sprites = select_sprites_for_line(state);
        // lower X wins; ties broken by lower OAM index. We render in reverse so
        // the highest-priority sprite is painted last.
        sprites.sort_by_key(|&(index, obj)| (obj.x, index));

        for &(_, obj) in sprites.iter().rev() {
            let y_flip = obj.flags.contains(ObjectFlags::Y_FLIP);
            let tile_index = (obj.tile_index & if is_big { 0xfe } else { 0xff })
                + u8::from(is_big && (ly + 8 >= obj.y) != y_flip);
            let tile = get_bg_win_tile(
                &state.video_ram[0..0x1000],
                tile_index,
                false,
            );
            let mut row = (ly + 16 - obj.y) % 8;
            if y_flip {
                row = 7 - row;
            }
            let line = get_line_from_tile(tile, row);

            for pixel in 0..8u8 {
                let Some(x) = (u16::from(obj.x) + u16::from(pixel)).checked_sub(8) else {
                    continue;
                };
                if x >= u16::from(WIDTH) {
                    continue;
                }
                let x = usize::from(x);
                let source_x = if obj.flags.contains(ObjectFlags::X_FLIP) {
                    7 - pixel
                } else {
                    pixel
                };
                let color_index = get_color_from_line(line, source_x);
                if color_index.is_transparent() {
                    continue;
                }
                if obj.flags.contains(ObjectFlags::PRIORITY) && bg_indices[x] != 0 {
                    continue;
                }
                let palette = if obj.flags.contains(ObjectFlags::DMG_PALETTE) {
                    state.obp1
                } else {
                    state.obp0
                };
                self.framebuffer[usize::from(ly) * usize::from(WIDTH) + x] =
                    color_index.get_color(palette);
            }
        }
    }
}

// https://gbdev.io/pandocs/OAM.html#selection-priority
fn select_sprites_for_line(state: &State) -> ArrayVec<(u16, ObjectAttribute), 10> {
    let ly = state.ly;
    let is_big = state.lcd_control.contains(LcdControl::OBJ_SIZE);
    let height = if is_big { 16 } else { 8 };
    state
        .oam
        .as_chunks::<4>()
        .0
        .iter()
        .enumerate()
        .map(|(index, slice)| (index as u16, ObjectAttribute::from(*slice)))
        .filter(|(_, obj)| obj.y <= ly + 16 && ly + 16 < obj.y + height)
        .take(10)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oam_scan_then_drawing_then_hblank_reaches_next_line() {
        let mut ppu = Ppu::default();
        let mut state = State::default();
        state.lcd_control.insert(LcdControl::LCD_PPU_ENABLE);
        state.set_ppu_mode(LcdStatus::OAM_SCAN);
        let mut cycles = 0;
        let mut frame_done = false;
        while state.ly == 0 && !frame_done {
            frame_done |= ppu.step(&mut state, 1);
            cycles += 1;
            if cycles > LINE_DURATION * 2 {
                panic!("line never completed");
            }
        }
        assert_eq!(state.ly, 1);
        assert_eq!(cycles, LINE_DURATION);
    }

    #[test]
    fn full_frame_is_70224_cycles_with_default_duration() {
        let mut ppu = Ppu::default();
        let mut state = State::default();
        state.lcd_control.insert(LcdControl::LCD_PPU_ENABLE);
        state.set_ppu_mode(LcdStatus::OAM_SCAN);
        let mut cycles: u32 = 0;
        loop {
            if ppu.step(&mut state, 1) {
                break;
            }
            cycles += 1;
            if cycles > 100_000 {
                panic!("frame never completed");
            }
        }
        assert_eq!(cycles, 70224 - 10 * 456);
    }

    #[test]
    fn disabled_lcd_does_not_advance() {
        let mut ppu = Ppu::default();
        let mut state = State::default();
        assert!(!ppu.step(&mut state, 100));
        assert_eq!(state.ly, 0);
    }

    #[test]
    fn disabling_lcd_resets_ly_and_resumes_oam_scan_on_enable() {
        let mut ppu = Ppu::default();
        let mut state = State::default();
        ppu.set_lcd_control(&mut state, LcdControl::LCD_PPU_ENABLE);
        state.ly = 80;
        ppu.set_lcd_control(&mut state, LcdControl::empty());
        assert_eq!(state.ly, 0);
        assert_eq!(state.ppu_mode(), LcdStatus::OAM_SCAN);

        ppu.set_lcd_control(&mut state, LcdControl::LCD_PPU_ENABLE);
        assert_eq!(state.ppu_mode(), LcdStatus::OAM_SCAN);
    }
}
