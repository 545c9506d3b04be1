//! Colormaps sampled from linearly interpolated color anchors

use crate::errors::{DiagError, Result};
use serde::{Serialize, Serializer};

/// Default number of colors of a named colormap
pub const DEFAULT_COLOR_COUNT: usize = 256;

/// Name of the diverging colormap built by [`create_cmap`]
pub const RED_WHITE_BLUE: &str = "red_white_blue";

/// RGB color with components in `0.0..=1.0`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rgb {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Rgb {
    #[must_use]
    pub const fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    #[must_use]
    pub fn from_hex(hex: u32) -> Self {
        let channel = |shift: u32| ((hex >> shift) & 0xff) as f32 / 255.0;
        Self::new(channel(16), channel(8), channel(0))
    }

    /// Opaque 8-bit RGBA
    #[must_use]
    pub fn to_rgba8(self) -> [u8; 4] {
        let channel = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
        [channel(self.r), channel(self.g), channel(self.b), 255]
    }

    #[must_use]
    pub fn to_hex_string(self) -> String {
        let [r, g, b, _] = self.to_rgba8();
        format!("#{r:02x}{g:02x}{b:02x}")
    }

    fn lerp(self, other: Rgb, t: f32) -> Rgb {
        let t = t.clamp(0.0, 1.0);
        Rgb::new(
            self.r + (other.r - self.r) * t,
            self.g + (other.g - self.g) * t,
            self.b + (other.b - self.b) * t,
        )
    }
}

impl Serialize for Rgb {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex_string())
    }
}

/// `lightgray`, the background behind missing values of level-colored plots
pub const LIGHTGRAY: Rgb = Rgb::new(211.0 / 255.0, 211.0 / 255.0, 211.0 / 255.0);

const BLUE_WHITE_RED: [Rgb; 3] = [
    Rgb::new(0.0, 0.0, 1.0),
    Rgb::new(1.0, 1.0, 1.0),
    Rgb::new(1.0, 0.0, 0.0),
];

const MAGMA: [u32; 9] = [
    0x000004, 0x1c1044, 0x4f127b, 0x812581, 0xb5367a, 0xe55064, 0xfb8761, 0xfec287, 0xfcfdbf,
];

const RDBU_R: [u32; 11] = [
    0x053061, 0x2166ac, 0x4393c3, 0x92c5de, 0xd1e5f0, 0xf7f7f7, 0xfddbc7, 0xf4a582, 0xd6604d,
    0xb2182b, 0x67001f,
];

/// A discrete list of colors
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Colormap {
    pub name: String,
    colors: Vec<Rgb>,
}

impl Colormap {
    /// Sample `n` colors from anchors spread evenly over `0..=1`
    ///
    /// Color `i` is taken at `i / (n - 1)`.
    #[must_use]
    pub fn from_anchors(name: &str, anchors: &[Rgb], n: usize) -> Self {
        let colors = (0..n)
            .map(|i| {
                let x = if n > 1 { i as f32 / (n - 1) as f32 } else { 0.0 };
                interpolate_anchors(anchors, x)
            })
            .collect();
        Self {
            name: name.to_string(),
            colors,
        }
    }

    /// A named colormap: `magma`, `RdBu_r` or `red_white_blue`
    ///
    /// # Errors
    ///
    /// Returns [`DiagError::Plot`] for other names.
    pub fn named(name: &str) -> Result<Self> {
        let anchors: Vec<Rgb> = match name {
            "magma" => MAGMA.iter().copied().map(Rgb::from_hex).collect(),
            "RdBu_r" => RDBU_R.iter().copied().map(Rgb::from_hex).collect(),
            RED_WHITE_BLUE => BLUE_WHITE_RED.to_vec(),
            other => return Err(DiagError::Plot(format!("unknown colormap '{other}'"))),
        };
        Ok(Self::from_anchors(name, &anchors, DEFAULT_COLOR_COUNT))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.colors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    #[must_use]
    pub fn colors(&self) -> &[Rgb] {
        &self.colors
    }

    /// Color for a normalized value in `0..=1`; out-of-range values are clipped
    #[must_use]
    pub fn color_at(&self, t: f64) -> Option<Rgb> {
        let n = self.colors.len();
        if n == 0 || t.is_nan() {
            return None;
        }
        let index = ((t.clamp(0.0, 1.0) * n as f64) as usize).min(n - 1);
        Some(self.colors[index])
    }
}

fn interpolate_anchors(anchors: &[Rgb], x: f32) -> Rgb {
    match anchors {
        [] => Rgb::new(0.0, 0.0, 0.0),
        [only] => *only,
        _ => {
            let position = x.clamp(0.0, 1.0) * (anchors.len() - 1) as f32;
            let i = (position.floor() as usize).min(anchors.len() - 2);
            anchors[i].lerp(anchors[i + 1], position - i as f32)
        }
    }
}

/// Diverging blue-white-red colormap with one color per interval between `levels`
///
/// # Errors
///
/// Returns [`DiagError::OddLevelCount`] when the number of levels is odd.
pub fn create_cmap(levels: &[f64]) -> Result<Colormap> {
    if levels.len() % 2 != 0 {
        return Err(DiagError::OddLevelCount(levels.len()));
    }
    Ok(Colormap::from_anchors(
        RED_WHITE_BLUE,
        &BLUE_WHITE_RED,
        levels.len().saturating_sub(1),
    ))
}

/// `num` evenly spaced values from `start` to `stop` inclusive
#[must_use]
pub fn linspace(start: f64, stop: f64, num: usize) -> Vec<f64> {
    match num {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (num - 1) as f64;
            (0..num).map(|i| start + step * i as f64).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_even_levels_give_one_color_per_interval() {
        let cmap = create_cmap(&linspace(-2.0, 2.0, 4)).unwrap();
        assert_eq!(cmap.len(), 3);
        assert_eq!(cmap.name, RED_WHITE_BLUE);
        assert_eq!(cmap.colors()[0], Rgb::new(0.0, 0.0, 1.0));
        assert_eq!(cmap.colors()[1], Rgb::new(1.0, 1.0, 1.0));
        assert_eq!(cmap.colors()[2], Rgb::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn test_odd_levels_fail() {
        match create_cmap(&[0.0, 1.0, 2.0]) {
            Err(DiagError::OddLevelCount(3)) => {}
            other => panic!("expected OddLevelCount, got {other:?}"),
        }
    }

    #[test]
    fn test_twenty_levels_midpoints() {
        let cmap = create_cmap(&linspace(0.0, 1.0, 20)).unwrap();
        assert_eq!(cmap.len(), 19);
        // the middle of 19 samples is exactly white
        assert_eq!(cmap.colors()[9], Rgb::new(1.0, 1.0, 1.0));
    }

    #[test]
    fn test_named_colormaps() {
        let magma = Colormap::named("magma").unwrap();
        assert_eq!(magma.len(), DEFAULT_COLOR_COUNT);
        assert_eq!(magma.colors()[0].to_hex_string(), "#000004");
        assert_eq!(Colormap::named("RdBu_r").unwrap().colors()[255].to_hex_string(), "#67001f");
        assert!(matches!(Colormap::named("jet"), Err(DiagError::Plot(_))));
    }

    #[test]
    fn test_color_lookup_clips() {
        let cmap = create_cmap(&[0.0, 1.0, 2.0, 3.0]).unwrap();
        assert_eq!(cmap.color_at(-1.0), Some(cmap.colors()[0]));
        assert_eq!(cmap.color_at(2.0), Some(cmap.colors()[2]));
        assert_eq!(cmap.color_at(f64::NAN), None);
    }

    #[test]
    fn test_linspace() {
        assert_eq!(linspace(0.0, 1.0, 3), vec![0.0, 0.5, 1.0]);
        assert_eq!(linspace(5.0, 9.0, 1), vec![5.0]);
    }
}
