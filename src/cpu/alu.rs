//! Centralized flag arithmetic for the opcode decoder. Every opcode body in
//! `mod.rs` that touches `Flags` goes through one of these so the flag
//! contract has a single implementation.

bitflags::bitflags! {
    #[derive(Debug, Clone, Default, Copy, PartialEq, Eq)]
    pub struct Flags: u8 {
        const Z = 1 << 7;
        const N = 1 << 6;
        const H = 1 << 5;
        const C = 1 << 4;
    }
}

fn half_carry_add(a: u8, b: u8) -> bool {
    (a & 0x0f) + (b & 0x0f) > 0x0f
}

fn half_carry_add_with_carry(a: u8, b: u8, carry: u8) -> bool {
    (a & 0x0f) + (b & 0x0f) + carry > 0x0f
}

fn half_carry_sub(a: u8, b: u8) -> bool {
    (a & 0x0f) < (b & 0x0f)
}

fn half_carry_sub_with_carry(a: u8, b: u8, carry: u8) -> bool {
    u16::from(a & 0x0f) < u16::from(b & 0x0f) + u16::from(carry)
}

pub fn add(f: &mut Flags, a: u8, b: u8) -> u8 {
    let (result, carry) = a.overflowing_add(b);
    f.set(Flags::Z, result == 0);
    f.remove(Flags::N);
    f.set(Flags::H, half_carry_add(a, b));
    f.set(Flags::C, carry);
    result
}

pub fn adc(f: &mut Flags, a: u8, b: u8) -> u8 {
    let carry_in = u8::from(f.contains(Flags::C));
    let result = a.wrapping_add(b).wrapping_add(carry_in);
    let carry = u16::from(a) + u16::from(b) + u16::from(carry_in) > 0xff;
    f.set(Flags::Z, result == 0);
    f.remove(Flags::N);
    f.set(Flags::H, half_carry_add_with_carry(a, b, carry_in));
    f.set(Flags::C, carry);
    result
}

pub fn sub(f: &mut Flags, a: u8, b: u8) -> u8 {
    let (result, carry) = a.overflowing_sub(b);
    f.set(Flags::Z, result == 0);
    f.insert(Flags::N);
    f.set(Flags::H, half_carry_sub(a, b));
    f.set(Flags::C, carry);
    result
}

pub fn sbc(f: &mut Flags, a: u8, b: u8) -> u8 {
    let carry_in = u8::from(f.contains(Flags::C));
    let result = a.wrapping_sub(b).wrapping_sub(carry_in);
    let carry = u16::from(a) < u16::from(b) + u16::from(carry_in);
    f.set(Flags::Z, result == 0);
    f.insert(Flags::N);
    f.set(Flags::H, half_carry_sub_with_carry(a, b, carry_in));
    f.set(Flags::C, carry);
    result
}

pub fn cp(f: &mut Flags, a: u8, b: u8) {
    sub(f, a, b);
}

pub fn and(f: &mut Flags, a: u8, b: u8) -> u8 {
    let result = a & b;
    f.set(Flags::Z, result == 0);
    f.remove(Flags::N | Flags::C);
    f.insert(Flags::H);
    result
}

pub fn or(f: &mut Flags, a: u8, b: u8) -> u8 {
    let result = a | b;
    f.set(Flags::Z, result == 0);
    f.remove(Flags::N | Flags::H | Flags::C);
    result
}

pub fn xor(f: &mut Flags, a: u8, b: u8) -> u8 {
    let result = a ^ b;
    f.set(Flags::Z, result == 0);
    f.remove(Flags::N | Flags::H | Flags::C);
    result
}

pub fn inc(f: &mut Flags, value: u8) -> u8 {
    let result = value.wrapping_add(1);
    f.set(Flags::Z, result == 0);
    f.remove(Flags::N);
    f.set(Flags::H, half_carry_add(value, 1));
    result
}

pub fn dec(f: &mut Flags, value: u8) -> u8 {
    let result = value.wrapping_sub(1);
    f.set(Flags::Z, result == 0);
    f.insert(Flags::N);
    f.set(Flags::H, half_carry_sub(value, 1));
    result
}

/// 16-bit ADD HL,rr: no Z flag, half-carry/carry out of bit 11/15.
pub fn add16(f: &mut Flags, a: u16, b: u16) -> u16 {
    let (result, carry) = a.overflowing_add(b);
    f.remove(Flags::N);
    f.set(Flags::H, (a & 0x0fff) + (b & 0x0fff) > 0x0fff);
    f.set(Flags::C, carry);
    result
}

/// SP + signed 8-bit displacement, used by `ADD SP,e` and `LD HL,SP+e`.
/// Flags are computed on the low byte, per the documented quirk.
pub fn add_sp_e(f: &mut Flags, sp: u16, e: u8) -> u16 {
    let sp_lo = sp as u8;
    let (_, carry) = sp_lo.overflowing_add(e);
    f.remove(Flags::Z | Flags::N);
    f.set(Flags::H, half_carry_add(sp_lo, e));
    f.set(Flags::C, carry);
    sp.wrapping_add_signed(i16::from(e as i8))
}

pub fn rlc(f: &mut Flags, value: u8) -> u8 {
    let result = value.rotate_left(1);
    f.set(Flags::Z, result == 0);
    f.remove(Flags::N | Flags::H);
    f.set(Flags::C, result & 1 != 0);
    result
}

pub fn rrc(f: &mut Flags, value: u8) -> u8 {
    let result = value.rotate_right(1);
    f.set(Flags::Z, result == 0);
    f.remove(Flags::N | Flags::H);
    f.set(Flags::C, value & 1 != 0);
    result
}

pub fn rl(f: &mut Flags, value: u8) -> u8 {
    let new_carry = value & 0x80 != 0;
    let result = (value << 1) | u8::from(f.contains(Flags::C));
    f.set(Flags::Z, result == 0);
    f.remove(Flags::N | Flags::H);
    f.set(Flags::C, new_carry);
    result
}

pub fn rr(f: &mut Flags, value: u8) -> u8 {
    let carry_in = f.contains(Flags::C);
    f.set(Flags::C, value & 1 != 0);
    let result = (value >> 1) | (u8::from(carry_in) << 7);
    f.set(Flags::Z, result == 0);
    f.remove(Flags::N | Flags::H);
    result
}

pub fn sla(f: &mut Flags, value: u8) -> u8 {
    let result = value << 1;
    f.set(Flags::Z, result == 0);
    f.remove(Flags::N | Flags::H);
    f.set(Flags::C, value & 0x80 != 0);
    result
}

pub fn sra(f: &mut Flags, value: u8) -> u8 {
    let result = (value >> 1) | (value & 0x80);
    f.set(Flags::Z, result == 0);
    f.remove(Flags::N | Flags::H);
    f.set(Flags::C, value & 1 != 0);
    result
}

pub fn srl(f: &mut Flags, value: u8) -> u8 {
    let result = value >> 1;
    f.set(Flags::Z, result == 0);
    f.remove(Flags::N | Flags::H);
    f.set(Flags::C, value & 1 != 0);
    result
}

pub fn swap(f: &mut Flags, value: u8) -> u8 {
    let result = (value >> 4) | (value << 4);
    f.set(Flags::Z, result == 0);
    f.remove(Flags::N | Flags::H | Flags::C);
    result
}

pub fn bit(f: &mut Flags, value: u8, index: u8) {
    f.set(Flags::Z, value & (1 << index) == 0);
    f.remove(Flags::N);
    f.insert(Flags::H);
}

pub fn daa(f: &mut Flags, a: u8) -> u8 {
    // https://rgbds.gbdev.io/docs/v1.0.0/gbz80.7#DAA
    let mut adjust = 0u8;
    let result = if f.contains(Flags::N) {
        if f.contains(Flags::H) {
            adjust += 0x06;
        }
        if f.contains(Flags::C) {
            adjust += 0x60;
        }
        a.wrapping_sub(adjust)
    } else {
        if f.contains(Flags::H) || (a & 0x0f) > 0x09 {
            adjust += 0x06;
        }
        if f.contains(Flags::C) || a > 0x99 {
            adjust += 0x60;
            f.insert(Flags::C);
        }
        a.wrapping_add(adjust)
    };
    f.set(Flags::Z, result == 0);
    f.remove(Flags::H);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_a_a_sets_half_carry_and_carry_at_0x80() {
        let mut f = Flags::empty();
        let result = add(&mut f, 0x80, 0x80);
        assert_eq!(result, 0);
        assert!(f.contains(Flags::Z));
        assert!(f.contains(Flags::C));
        assert!(!f.contains(Flags::H));
    }

    #[test]
    fn sbc_equal_operands_with_incoming_carry_borrows() {
        let mut f = Flags::C;
        let result = sbc(&mut f, 0x10, 0x10);
        assert_eq!(result, 0xff);
        assert!(f.contains(Flags::C));
        assert!(f.contains(Flags::H));
        assert!(!f.contains(Flags::Z));
    }

    #[test]
    fn daa_after_decimal_add() {
        let mut f = Flags::empty();
        let a = add(&mut f, 0x09, 0x08); // 0x11, H set
        let result = daa(&mut f, a);
        assert_eq!(result, 0x17);
    }

    #[test]
    fn daa_after_0x45_plus_0x38() {
        let mut f = Flags::empty();
        let result = daa(&mut f, 0x7d);
        assert_eq!(result, 0x83);
        assert!(!f.contains(Flags::C));
    }

    #[test]
    fn daa_after_0x83_plus_0x45() {
        let mut f = Flags::empty();
        let result = daa(&mut f, 0xc8);
        assert_eq!(result, 0x28);
        assert!(f.contains(Flags::C));
    }

    #[test]
    fn swap_clears_carry() {
        let mut f = Flags::C;
        let result = swap(&mut f, 0x12);
        assert_eq!(result, 0x21);
        assert!(!f.contains(Flags::C));
    }

    #[test]
    fn rlc_then_rrc_round_trips() {
        let mut f = Flags::empty();
        let rotated = rlc(&mut f, 0x81);
        let back = rrc(&mut f, rotated);
        assert_eq!(back, 0x81);
    }

    #[test]
    fn cpl_equivalent_double_complement_is_identity() {
        let value = 0x5au8;
        assert_eq!(!!value, value);
    }
}
