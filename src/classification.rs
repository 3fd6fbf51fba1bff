//! Vehicle category from plate color
//!
//! Commercial plates are yellow; a crop dominated by yellow pixels is taken
//! as a taxi.

use std::fmt;
use std::str::FromStr;

use image::Rgb;
use serde::{Deserialize, Serialize};

use crate::vision::PlateCrop;

/// Hue band for yellow on the 0..180 hue scale
const YELLOW_HUE: (f32, f32) = (15.0, 35.0);
/// Minimum saturation and value for a yellow pixel (0..255)
const YELLOW_MIN_SV: f32 = 80.0;
/// Fraction of yellow pixels above which the plate is yellow
const YELLOW_RATIO: f32 = 0.3;

/// Vehicle category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum VehicleType {
    #[default]
    Private,
    Taxi,
}

impl VehicleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleType::Private => "Private",
            VehicleType::Taxi => "Taxi",
        }
    }
}

impl fmt::Display for VehicleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VehicleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Private" => Ok(VehicleType::Private),
            "Taxi" => Ok(VehicleType::Taxi),
            other => Err(format!("unknown vehicle type: {other}")),
        }
    }
}

/// Assigns a vehicle category to a plate crop
pub trait PlateClassifier: Send + Sync {
    fn classify(&self, crop: &PlateCrop) -> VehicleType;
}

/// Taxi when more than 30% of the crop is yellow
#[derive(Debug, Clone, Copy, Default)]
pub struct YellowPlateClassifier;

impl YellowPlateClassifier {
    /// Fraction of pixels inside the yellow HSV band
    pub fn yellow_ratio(crop: &PlateCrop) -> f32 {
        if crop.is_empty() {
            return 0.0;
        }
        let image = crop.image();
        let yellow = image.pixels().filter(|px| is_yellow(**px)).count();
        yellow as f32 / (image.width() * image.height()) as f32
    }
}

impl PlateClassifier for YellowPlateClassifier {
    fn classify(&self, crop: &PlateCrop) -> VehicleType {
        if Self::yellow_ratio(crop) > YELLOW_RATIO {
            VehicleType::Taxi
        } else {
            VehicleType::Private
        }
    }
}

fn is_yellow(px: Rgb<u8>) -> bool {
    let (h, s, v) = to_hsv(px);
    (YELLOW_HUE.0..=YELLOW_HUE.1).contains(&h) && s >= YELLOW_MIN_SV && v >= YELLOW_MIN_SV
}

/// RGB to HSV with hue on 0..180 and saturation/value on 0..255
fn to_hsv(Rgb([r, g, b]): Rgb<u8>) -> (f32, f32, f32) {
    let (r, g, b) = (r as f32, g as f32, b as f32);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let s = if max > 0.0 { delta / max * 255.0 } else { 0.0 };
    let h = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * (g - b) / delta
    } else if max == g {
        120.0 + 60.0 * (b - r) / delta
    } else {
        240.0 + 60.0 * (r - g) / delta
    };
    let h = if h < 0.0 { h + 360.0 } else { h };

    (h / 2.0, s, max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn crop_with(yellow_rows: u32, height: u32) -> PlateCrop {
        let image = RgbImage::from_fn(40, height, |_, y| {
            if y < yellow_rows {
                Rgb([230, 200, 20])
            } else {
                Rgb([240, 240, 240])
            }
        });
        PlateCrop::new(image)
    }

    #[test]
    fn test_hsv_conversion() {
        let (h, s, v) = to_hsv(Rgb([255, 255, 0]));
        assert!((h - 30.0).abs() < 1e-3);
        assert!((s - 255.0).abs() < 1e-3);
        assert!((v - 255.0).abs() < 1e-3);

        let (h, s, _) = to_hsv(Rgb([0, 0, 255]));
        assert!((h - 120.0).abs() < 1e-3);
        assert!((s - 255.0).abs() < 1e-3);

        assert_eq!(to_hsv(Rgb([0, 0, 0])), (0.0, 0.0, 0.0));
    }

    #[test]
    fn test_yellow_plate_is_taxi() {
        assert_eq!(YellowPlateClassifier.classify(&crop_with(20, 20)), VehicleType::Taxi);
        assert_eq!(YellowPlateClassifier.classify(&crop_with(8, 20)), VehicleType::Taxi);
    }

    #[test]
    fn test_white_plate_is_private() {
        assert_eq!(YellowPlateClassifier.classify(&crop_with(0, 20)), VehicleType::Private);
        assert_eq!(YellowPlateClassifier.classify(&crop_with(6, 20)), VehicleType::Private);
        assert_eq!(
            YellowPlateClassifier.classify(&PlateCrop::new(RgbImage::new(0, 0))),
            VehicleType::Private
        );
    }

    #[test]
    fn test_vehicle_type_round_trip_str() {
        assert_eq!("Taxi".parse::<VehicleType>(), Ok(VehicleType::Taxi));
        assert_eq!(VehicleType::Private.to_string(), "Private");
        assert!("Bus".parse::<VehicleType>().is_err());
    }
}
