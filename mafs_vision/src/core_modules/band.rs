// THEORY:
// Sentinel-1 scenes are delivered as a three-channel raster with the co-polarized
// (VV) return in the first channel and the cross-polarized (VH) return in the
// second. The land masker works on a single channel, so the first step of every
// job is choosing which one. Grayscale mixes all three channels with the Rec. 601
// luma weights, which is also what a plain photo or an already single-band export
// collapses to.
//
// `Band` is a closed set. Loose request parameters are turned into a `Band` once at
// the edge of the system (`Band::from_param`), and nothing deeper in the pipeline
// ever sees an unrecognized value.

use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

const LUMA_RED: f64 = 0.299;
const LUMA_GREEN: f64 = 0.587;
const LUMA_BLUE: f64 = 0.114;

/// The analysis channel extracted from a three-channel input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Band {
    #[serde(rename = "VV")]
    Vv,
    #[serde(rename = "VH")]
    Vh,
    #[default]
    Grayscale,
}

impl Band {
    /// Lenient boundary conversion: anything unrecognized falls back to `Grayscale`.
    pub fn from_param(value: &str) -> Self {
        value.parse().unwrap_or_else(|_| {
            warn!(band = value, "unrecognized band, using Grayscale");
            Band::Grayscale
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Band::Vv => "VV",
            Band::Vh => "VH",
            Band::Grayscale => "Grayscale",
        }
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownBand(pub String);

impl fmt::Display for UnknownBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown band '{}' (expected VV, VH or Grayscale)", self.0)
    }
}

impl std::error::Error for UnknownBand {}

impl FromStr for Band {
    type Err = UnknownBand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vv" => Ok(Band::Vv),
            "vh" => Ok(Band::Vh),
            "grayscale" | "greyscale" | "gray" | "grey" => Ok(Band::Grayscale),
            _ => Err(UnknownBand(s.to_string())),
        }
    }
}

/// Extracts the analysis channel.
pub fn select_band(image: &RgbImage, band: Band) -> GrayImage {
    let (w, h) = image.dimensions();
    let mut out = GrayImage::new(w, h);
    for (dst, src) in out.pixels_mut().zip(image.pixels()) {
        let [r, g, b] = src.0;
        dst.0[0] = match band {
            Band::Vv => r,
            Band::Vh => g,
            Band::Grayscale => (LUMA_RED * r as f64 + LUMA_GREEN * g as f64 + LUMA_BLUE * b as f64)
                .round()
                .clamp(0.0, 255.0) as u8,
        };
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn sample() -> RgbImage {
        RgbImage::from_fn(4, 3, |x, y| Rgb([10 * x as u8, 100 + y as u8, 200]))
    }

    #[test]
    fn polarization_bands_pick_their_channel() {
        let image = sample();
        let vv = select_band(&image, Band::Vv);
        let vh = select_band(&image, Band::Vh);
        assert_eq!(vv.get_pixel(3, 0).0[0], 30);
        assert_eq!(vh.get_pixel(0, 2).0[0], 102);
        assert_eq!(vv.dimensions(), (4, 3));
    }

    #[test]
    fn grayscale_uses_luma_weights() {
        let image = RgbImage::from_pixel(1, 1, Rgb([255, 0, 0]));
        assert_eq!(select_band(&image, Band::Grayscale).get_pixel(0, 0).0[0], 76);
        let white = RgbImage::from_pixel(1, 1, Rgb([255, 255, 255]));
        assert_eq!(select_band(&white, Band::Grayscale).get_pixel(0, 0).0[0], 255);
    }

    #[test]
    fn parsing_is_strict_but_boundary_conversion_defaults() {
        assert_eq!("VV".parse::<Band>(), Ok(Band::Vv));
        assert_eq!(" vh ".parse::<Band>(), Ok(Band::Vh));
        assert!("HH".parse::<Band>().is_err());
        assert_eq!(Band::from_param("HH"), Band::Grayscale);
        assert_eq!(Band::from_param("VH"), Band::Vh);
        assert_eq!(Band::default(), Band::Grayscale);
    }
}
