#[derive(PartialEq, Eq, Clone, Copy)]
pub enum ColorIndex {
    Zero,
    One,
    Two,
    Three,
}

impl ColorIndex {
    pub fn new(least_significant_bit: bool, most_significant_bit: bool) -> Self {
        match (most_significant_bit, least_significant_bit) {
            (true, true) => Self::Three,
            (true, false) => Self::Two,
            (false, true) => Self::One,
            (false, false) => Self::Zero,
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            Self::Zero => 0,
            Self::One => 1,
            Self::Two => 2,
            Self::Three => 3,
        }
    }

    pub fn is_transparent(self) -> bool {
        self == Self::Zero
    }

    pub fn get_color(self, palette: u8) -> Color {
        let shift = self.bits() * 2;
        Color::from_palette_index((palette >> shift) & 0b11)
    }
}

// https://gbdev.io/pandocs/Palettes.html — the classic DMG 4-shade green palette.
const PALETTE_RGBA: [u32; 4] = [0xFF9BBC0F, 0xFF8BAC0F, 0xFF306230, 0xFF0F380F];

#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct Color(u8);

impl Color {
    pub fn from_palette_index(index: u8) -> Self {
        Self(index & 0b11)
    }
}

impl From<Color> for u32 {
    fn from(c: Color) -> u32 {
        PALETTE_RGBA[usize::from(c.0)]
    }
}

impl From<Color> for [u8; 4] {
    fn from(c: Color) -> Self {
        u32::from(c).to_le_bytes()
    }
}
