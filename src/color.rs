use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Opaque 8-bit RGB colour, written out as `#rrggbb`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid hex colour {0:?}")]
pub struct ParseColorError(String);

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Unpack a `0xRRGGBB` value.
    pub const fn from_packed(rgb: u32) -> Self {
        Self {
            r: ((rgb >> 16) & 0xFF) as u8,
            g: ((rgb >> 8) & 0xFF) as u8,
            b: (rgb & 0xFF) as u8,
        }
    }

    /// Component-wise linear blend; `t` is clamped to `[0, 1]`.
    pub fn lerp(self, other: Color, t: f64) -> Color {
        let t = t.clamp(0.0, 1.0);
        let mix = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * t).round() as u8;
        Color::rgb(mix(self.r, other.r), mix(self.g, other.g), mix(self.b, other.b))
    }

    pub const WHITE: Color = Color::rgb(255, 255, 255);
    pub const BLACK: Color = Color::rgb(0, 0, 0);
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl FromStr for Color {
    type Err = ParseColorError;

    /// Accepts `#rgb` and `#rrggbb`, with or without the leading `#`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s.trim().trim_start_matches('#');
        let err = || ParseColorError(s.to_string());
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(err());
        }
        match hex.len() {
            3 => {
                let v = u32::from_str_radix(hex, 16).map_err(|_| err())?;
                let expand = |n: u32| ((n & 0xF) * 17) as u8;
                Ok(Color::rgb(expand(v >> 8), expand(v >> 4), expand(v)))
            }
            6 => u32::from_str_radix(hex, 16)
                .map(Color::from_packed)
                .map_err(|_| err()),
            _ => Err(err()),
        }
    }
}

impl TryFrom<String> for Color {
    type Error = ParseColorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        color.to_string()
    }
}

const GREENS: &[u32] = &[
    0xf7fcf5, 0xe5f5e0, 0xc7e9c0, 0xa1d99b, 0x74c476, 0x41ab5d, 0x238b45, 0x006d2c, 0x00441b,
];

const BLUES: &[u32] = &[
    0xf7fbff, 0xdeebf7, 0xc6dbef, 0x9ecae1, 0x6baed6, 0x4292c6, 0x2171b5, 0x08519c, 0x08306b,
];

// Sampled every 0.1 along the cubehelix "warm" rainbow half.
const WARM: &[u32] = &[
    0x6e40aa, 0x963db3, 0xbf3caf, 0xe4419d, 0xfe4b83, 0xff5e63, 0xff7847, 0xfb9633, 0xe2b72f,
    0xc6d63c, 0xaff05b,
];

const SPECTRAL: &[u32] = &[
    0x9e0142, 0xd53e4f, 0xf46d43, 0xfdae61, 0xfee08b, 0xffffbf, 0xe6f598, 0xabdda4, 0x66c2a5,
    0x3288bd, 0x5e4fa2,
];

const VIRIDIS: &[u32] = &[
    0x440154, 0x482475, 0x414487, 0x355f8d, 0x2a788e, 0x21918c, 0x22a884, 0x44bf70, 0x7ad151,
    0xbddf26, 0xfde725,
];

/// Continuous colour ramps, each defined by evenly spaced stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ramp {
    #[default]
    Greens,
    Blues,
    Warm,
    Spectral,
    Viridis,
}

impl Ramp {
    fn stops(self) -> &'static [u32] {
        match self {
            Ramp::Greens => GREENS,
            Ramp::Blues => BLUES,
            Ramp::Warm => WARM,
            Ramp::Spectral => SPECTRAL,
            Ramp::Viridis => VIRIDIS,
        }
    }

    /// Colour at normalised position `t`. Out-of-range input is clamped and
    /// a non-finite `t` resolves to the ramp midpoint.
    pub fn at(self, t: f64) -> Color {
        let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.5 };
        let stops = self.stops();
        let last = stops.len() - 1;
        let scaled = t * last as f64;
        let i = (scaled.floor() as usize).min(last - 1);
        let lo = Color::from_packed(stops[i]);
        let hi = Color::from_packed(stops[i + 1]);
        lo.lerp(hi, scaled - i as f64)
    }
}

const TABLEAU10: &[u32] = &[
    0x4e79a7, 0xf28e2c, 0xe15759, 0x76b7b2, 0x59a14f, 0xedc949, 0xaf7aa1, 0xff9da7, 0x9c755f,
    0xbab0ab,
];

const CATEGORY10: &[u32] = &[
    0x1f77b4, 0xff7f0e, 0x2ca02c, 0xd62728, 0x9467bd, 0x8c564b, 0xe377c2, 0x7f7f7f, 0xbcbd22,
    0x17becf,
];

/// Fixed categorical palettes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Palette {
    #[default]
    Tableau10,
    Category10,
}

impl Palette {
    pub fn len(self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(self) -> bool {
        self.slots().is_empty()
    }

    /// Colour of palette slot `index`, wrapping around.
    pub fn slot(self, index: usize) -> Color {
        let slots = self.slots();
        Color::from_packed(slots[index % slots.len()])
    }

    fn slots(self) -> &'static [u32] {
        match self {
            Palette::Tableau10 => TABLEAU10,
            Palette::Category10 => CATEGORY10,
        }
    }
}
