//! Colour maps used by the brain map and gene-set figures

use std::{fmt, str::FromStr};

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);
impl Rgb {
    pub const BLACK: Rgb = Rgb(0, 0, 0);
    pub const WHITE: Rgb = Rgb(255, 255, 255);
    pub const GREY: Rgb = Rgb(128, 128, 128);
    pub const RED: Rgb = Rgb(214, 39, 40);

    pub fn to_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.0, self.1, self.2)
    }

    fn lerp(a: Rgb, b: Rgb, t: f64) -> Rgb {
        let mix = |x: u8, y: u8| (f64::from(x) + (f64::from(y) - f64::from(x)) * t).round() as u8;
        Rgb(mix(a.0, b.0), mix(a.1, b.1), mix(a.2, b.2))
    }
}
impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Sequential and diverging colour maps, sampled on `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Colormap {
    /// Diverging red-yellow-blue
    #[default]
    Spectral,
    Reds,
    Blues,
    Greys,
    /// Diverging blue-white-red
    CoolWarm,
    Viridis,
    Jet,
}

const SPECTRAL: &[Rgb] = &[
    Rgb(158, 1, 66),
    Rgb(213, 62, 79),
    Rgb(244, 109, 67),
    Rgb(253, 174, 97),
    Rgb(254, 224, 139),
    Rgb(255, 255, 191),
    Rgb(230, 245, 152),
    Rgb(171, 221, 164),
    Rgb(102, 194, 165),
    Rgb(50, 136, 189),
    Rgb(94, 79, 162),
];
const REDS: &[Rgb] = &[
    Rgb(255, 245, 240),
    Rgb(254, 224, 210),
    Rgb(252, 187, 161),
    Rgb(252, 146, 114),
    Rgb(251, 106, 74),
    Rgb(239, 59, 44),
    Rgb(203, 24, 29),
    Rgb(165, 15, 21),
    Rgb(103, 0, 13),
];
const BLUES: &[Rgb] = &[
    Rgb(247, 251, 255),
    Rgb(222, 235, 247),
    Rgb(198, 219, 239),
    Rgb(158, 202, 225),
    Rgb(107, 174, 214),
    Rgb(66, 146, 198),
    Rgb(33, 113, 181),
    Rgb(8, 81, 156),
    Rgb(8, 48, 107),
];
const GREYS: &[Rgb] = &[
    Rgb(255, 255, 255),
    Rgb(240, 240, 240),
    Rgb(217, 217, 217),
    Rgb(189, 189, 189),
    Rgb(150, 150, 150),
    Rgb(115, 115, 115),
    Rgb(82, 82, 82),
    Rgb(37, 37, 37),
    Rgb(0, 0, 0),
];
const COOLWARM: &[Rgb] = &[
    Rgb(59, 76, 192),
    Rgb(141, 176, 254),
    Rgb(221, 221, 221),
    Rgb(244, 154, 123),
    Rgb(180, 4, 38),
];
const VIRIDIS: &[Rgb] = &[
    Rgb(68, 1, 84),
    Rgb(59, 82, 139),
    Rgb(33, 145, 140),
    Rgb(94, 201, 98),
    Rgb(253, 231, 37),
];
const JET: &[Rgb] = &[
    Rgb(0, 0, 128),
    Rgb(0, 0, 255),
    Rgb(0, 255, 255),
    Rgb(255, 255, 0),
    Rgb(255, 0, 0),
    Rgb(128, 0, 0),
];

impl Colormap {
    fn stops(&self) -> &'static [Rgb] {
        match self {
            Colormap::Spectral => SPECTRAL,
            Colormap::Reds => REDS,
            Colormap::Blues => BLUES,
            Colormap::Greys => GREYS,
            Colormap::CoolWarm => COOLWARM,
            Colormap::Viridis => VIRIDIS,
            Colormap::Jet => JET,
        }
    }

    /// Samples the map at `t`, clamped to `[0, 1]`
    pub fn sample(&self, t: f64) -> Rgb {
        let stops = self.stops();
        let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 };
        let position = t * (stops.len() - 1) as f64;
        let lower = position.floor() as usize;
        let upper = (lower + 1).min(stops.len() - 1);
        Rgb::lerp(stops[lower], stops[upper], position - lower as f64)
    }

    /// `n` colours spread evenly over the whole map
    pub fn evenly_spaced(&self, n: usize, reversed: bool) -> Vec<Rgb> {
        (0..n)
            .map(|i| {
                let t = if n > 1 { i as f64 / (n - 1) as f64 } else { 0.0 };
                self.sample(if reversed { 1.0 - t } else { t })
            })
            .collect()
    }
}
impl FromStr for Colormap {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "spectral" => Ok(Colormap::Spectral),
            "reds" => Ok(Colormap::Reds),
            "blues" => Ok(Colormap::Blues),
            "greys" | "grays" => Ok(Colormap::Greys),
            "coolwarm" => Ok(Colormap::CoolWarm),
            "viridis" => Ok(Colormap::Viridis),
            "jet" => Ok(Colormap::Jet),
            other => Err(Error::InvalidArgument(format!("unknown colour map {other}"))),
        }
    }
}

/// A colour map bound to a value range
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorScale {
    pub colormap: Colormap,
    pub reversed: bool,
    pub vmin: f64,
    pub vmax: f64,
}
impl ColorScale {
    pub fn new(colormap: Colormap, reversed: bool, vmin: f64, vmax: f64) -> Self {
        Self {
            colormap,
            reversed,
            vmin,
            vmax,
        }
    }

    /// Range spanning every finite value
    pub fn fitted<'a, I: IntoIterator<Item = &'a f64>>(colormap: Colormap, reversed: bool, values: I) -> Self {
        let (vmin, vmax) = values
            .into_iter()
            .filter(|v| v.is_finite())
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
        if vmin.is_finite() {
            Self::new(colormap, reversed, vmin, vmax)
        } else {
            Self::new(colormap, reversed, 0.0, 1.0)
        }
    }

    /// Position of a value on `[0, 1]`
    pub fn normalize(&self, value: f64) -> f64 {
        if self.vmax > self.vmin {
            (value - self.vmin) / (self.vmax - self.vmin)
        } else {
            0.5
        }
    }

    /// Colour of a value; NaN is transparent
    pub fn color(&self, value: f64) -> Option<Rgb> {
        if value.is_nan() {
            return None;
        }
        let t = self.normalize(value).clamp(0.0, 1.0);
        Some(self.colormap.sample(if self.reversed { 1.0 - t } else { t }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_endpoints() {
        assert_eq!(Colormap::Reds.sample(0.0), Rgb(255, 245, 240));
        assert_eq!(Colormap::Reds.sample(1.0), Rgb(103, 0, 13));
        assert_eq!(Colormap::Greys.sample(2.0), Rgb::BLACK);
        assert_eq!(Colormap::Spectral.sample(0.5), Rgb(255, 255, 191));
    }

    #[test]
    fn test_hex() {
        assert_eq!(Rgb(255, 0, 16).to_hex(), "#ff0010");
    }

    #[test]
    fn test_evenly_spaced() {
        let colours = Colormap::Blues.evenly_spaced(3, false);
        assert_eq!(colours[0], Rgb(247, 251, 255));
        assert_eq!(colours[2], Rgb(8, 48, 107));
        let reversed = Colormap::Blues.evenly_spaced(3, true);
        assert_eq!(reversed[0], colours[2]);
    }

    #[test]
    fn test_color_scale() {
        let scale = ColorScale::fitted(Colormap::Greys, false, &[2.0, f64::NAN, 4.0]);
        assert_eq!(scale.vmin, 2.0);
        assert_eq!(scale.color(4.0), Some(Rgb::BLACK));
        assert_eq!(scale.color(10.0), Some(Rgb::BLACK));
        assert_eq!(scale.color(f64::NAN), None);
    }

    #[test]
    fn test_from_str() {
        assert_eq!("Spectral".parse::<Colormap>().unwrap(), Colormap::Spectral);
        assert!("rainbow".parse::<Colormap>().is_err());
    }
}
