use fixed::types::I32F32;
use serde::{Deserialize, Serialize};

/// A length in PDF points (1/72 in), stored as fixed point so layout stays
/// deterministic across platforms.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Pt(I32F32);

impl Pt {
    pub const ZERO: Pt = Pt(I32F32::from_bits(0));

    pub fn from_f32(value: f32) -> Pt {
        if !value.is_finite() {
            return Pt::ZERO;
        }
        let milli = (value as f64 * 1000.0).round();
        let milli = milli.clamp(i64::MIN as f64, i64::MAX as f64) as i64;
        Pt::from_milli_i64(milli)
    }

    pub fn from_mm(value: f32) -> Pt {
        Pt::from_f32(value * 72.0 / 25.4)
    }

    pub fn to_f32(self) -> f32 {
        self.0.to_num()
    }

    pub fn to_milli_i64(self) -> i64 {
        let bits = self.0.to_bits() as i128;
        let denom = 1i128 << 32;
        let scaled = bits * 1000;
        let adj = if scaled >= 0 { denom / 2 } else { -denom / 2 };
        let milli = (scaled + adj) / denom;
        milli.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }

    pub fn from_milli_i64(milli: i64) -> Pt {
        let milli = milli as i128;
        let denom = 1i128 << 32;
        let adj = if milli >= 0 { 500 } else { -500 };
        let bits = (milli * denom + adj) / 1000;
        let bits = bits.clamp(i64::MIN as i128, i64::MAX as i128) as i64;
        Pt(I32F32::from_bits(bits))
    }

    pub fn max(self, other: Pt) -> Pt {
        if self >= other { self } else { other }
    }

    pub fn min(self, other: Pt) -> Pt {
        if self <= other { self } else { other }
    }
}

impl std::ops::Add for Pt {
    type Output = Pt;
    fn add(self, rhs: Pt) -> Pt {
        Pt::from_milli_i64(self.to_milli_i64().saturating_add(rhs.to_milli_i64()))
    }
}

impl std::ops::AddAssign for Pt {
    fn add_assign(&mut self, rhs: Pt) {
        *self = *self + rhs;
    }
}

impl std::ops::Sub for Pt {
    type Output = Pt;
    fn sub(self, rhs: Pt) -> Pt {
        Pt::from_milli_i64(self.to_milli_i64().saturating_sub(rhs.to_milli_i64()))
    }
}

impl std::ops::SubAssign for Pt {
    fn sub_assign(&mut self, rhs: Pt) {
        *self = *self - rhs;
    }
}

impl std::ops::Mul<f32> for Pt {
    type Output = Pt;
    fn mul(self, rhs: f32) -> Pt {
        if !rhs.is_finite() {
            return Pt::ZERO;
        }
        Pt::from_f32(self.to_f32() * rhs)
    }
}

impl std::ops::Div<i32> for Pt {
    type Output = Pt;
    fn div(self, rhs: i32) -> Pt {
        if rhs == 0 {
            return Pt::ZERO;
        }
        let milli = self.to_milli_i64() as i128;
        let den = rhs as i128;
        let half = den.abs() / 2;
        let value = if milli >= 0 {
            (milli + half) / den
        } else {
            -((-milli + half) / den)
        };
        Pt::from_milli_i64(value.clamp(i64::MIN as i128, i64::MAX as i128) as i64)
    }
}

impl std::iter::Sum for Pt {
    fn sum<I: Iterator<Item = Pt>>(iter: I) -> Pt {
        iter.fold(Pt::ZERO, |acc, v| acc + v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Size {
    pub width: Pt,
    pub height: Pt,
}

impl Size {
    /// ISO A4 in landscape orientation (297 mm x 210 mm).
    pub fn a4_landscape() -> Self {
        Self {
            width: Pt::from_f32(841.89),
            height: Pt::from_f32(595.28),
        }
    }

    pub fn from_mm(width_mm: f32, height_mm: f32) -> Self {
        Self {
            width: Pt::from_mm(width_mm),
            height: Pt::from_mm(height_mm),
        }
    }

    pub fn is_landscape(&self) -> bool {
        self.width > self.height
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: Pt,
    pub y: Pt,
    pub width: Pt,
    pub height: Pt,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x: Pt::from_f32(x),
            y: Pt::from_f32(y),
            width: Pt::from_f32(width),
            height: Pt::from_f32(height),
        }
    }

    pub fn inset(self, amount: f32) -> Self {
        let d = Pt::from_f32(amount);
        Self {
            x: self.x + d,
            y: self.y + d,
            width: (self.width - d - d).max(Pt::ZERO),
            height: (self.height - d - d).max(Pt::ZERO),
        }
    }

    pub fn bottom(&self) -> Pt {
        self.y + self.height
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Color {
    pub const BLACK: Color = Color {
        r: 0.0,
        g: 0.0,
        b: 0.0,
    };

    pub const WHITE: Color = Color {
        r: 1.0,
        g: 1.0,
        b: 1.0,
    };

    pub fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    pub fn rgb8(r: u8, g: u8, b: u8) -> Self {
        Self {
            r: r as f32 / 255.0,
            g: g as f32 / 255.0,
            b: b as f32 / 255.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pt_milli_round_trip_is_stable() {
        let v = Pt::from_f32(841.89);
        assert_eq!(v.to_milli_i64(), 841_890);
        assert_eq!(Pt::from_milli_i64(v.to_milli_i64()), v);
    }

    #[test]
    fn a4_landscape_matches_millimetre_conversion() {
        let page = Size::a4_landscape();
        let from_mm = Size::from_mm(297.0, 210.0);
        assert!(page.is_landscape());
        assert!((page.width.to_f32() - from_mm.width.to_f32()).abs() < 0.01);
        assert!((page.height.to_f32() - from_mm.height.to_f32()).abs() < 0.01);
    }

    #[test]
    fn division_rounds_half_away_from_zero() {
        assert_eq!((Pt::from_milli_i64(5) / 2).to_milli_i64(), 3);
        assert_eq!((Pt::from_milli_i64(-5) / 2).to_milli_i64(), -3);
        assert_eq!(Pt::from_f32(10.0) / 0, Pt::ZERO);
    }

    #[test]
    fn inset_never_goes_negative() {
        let r = Rect::new(0.0, 0.0, 10.0, 10.0).inset(8.0);
        assert_eq!(r.width, Pt::ZERO);
        assert_eq!(r.x, Pt::from_f32(8.0));
    }
}
