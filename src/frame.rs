use crate::error::CameraError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Bayer colour filter layout of a raw sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BayerPattern {
    Rggb,
    Grbg,
    Gbrg,
    Bggr,
}

impl BayerPattern {
    fn parse(tag: &str) -> Option<Self> {
        match tag {
            "RGGB" => Some(Self::Rggb),
            "GRBG" => Some(Self::Grbg),
            "GBRG" => Some(Self::Gbrg),
            "BGGR" => Some(Self::Bggr),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rggb => "RGGB",
            Self::Grbg => "GRBG",
            Self::Gbrg => "GBRG",
            Self::Bggr => "BGGR",
        }
    }
}

/// Unpacked raw pixel encoding as reported by the sensor driver.
///
/// Only unpacked formats are supported: `R<bits>` for monochrome sensors and
/// `S<pattern><bits>` for Bayer sensors (e.g. `SRGGB10`). Packed CSI-2
/// formats (`..._CSI2P`) are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RawEncoding {
    Mono { bits: u8 },
    Bayer { pattern: BayerPattern, bits: u8 },
}

impl RawEncoding {
    pub fn bit_depth(&self) -> u8 {
        match self {
            Self::Mono { bits } | Self::Bayer { bits, .. } => *bits,
        }
    }

    /// Bytes per stored pixel (u8 up to 8 bits, little-endian u16 above)
    pub fn bytes_per_pixel(&self) -> usize {
        if self.bit_depth() > 8 {
            2
        } else {
            1
        }
    }

    /// Largest pixel value the encoding can hold
    pub fn full_scale(&self) -> u32 {
        (1u32 << self.bit_depth()) - 1
    }
}

impl FromStr for RawEncoding {
    type Err = CameraError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        let unsupported = || CameraError::UnsupportedEncoding {
            encoding: tag.to_string(),
        };

        if tag.contains('_') {
            return Err(unsupported());
        }

        let parse_bits = |digits: &str| -> Result<u8, CameraError> {
            match digits.parse::<u8>() {
                Ok(bits) if (1..=16).contains(&bits) => Ok(bits),
                _ => Err(unsupported()),
            }
        };

        if let Some(rest) = tag.strip_prefix('R') {
            return Ok(Self::Mono {
                bits: parse_bits(rest)?,
            });
        }

        if let Some(rest) = tag.strip_prefix('S') {
            if rest.len() > 4 && rest.is_char_boundary(4) {
                let (pattern, digits) = rest.split_at(4);
                if let Some(pattern) = BayerPattern::parse(pattern) {
                    return Ok(Self::Bayer {
                        pattern,
                        bits: parse_bits(digits)?,
                    });
                }
            }
        }

        Err(unsupported())
    }
}

impl fmt::Display for RawEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mono { bits } => write!(f, "R{}", bits),
            Self::Bayer { pattern, bits } => write!(f, "S{}{}", pattern.as_str(), bits),
        }
    }
}

/// Calibration role of a frame, carried into the persisted metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameType {
    #[default]
    Light,
    Dark,
    Flat,
    Bias,
}

/// Per-exposure metadata reported by the driver and the capture worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameMetadata {
    /// Monotonic frame number within the camera session
    pub sequence: u64,
    /// Exposure time actually used, in microseconds
    pub exposure_time_us: u64,
    pub analogue_gain: f64,
    /// Black levels per Bayer channel, scaled to 16 bit
    pub black_levels: Vec<u32>,
    pub binning: (u32, u32),
    /// Timestamp at the end of the exposure
    pub end_of_exposure: DateTime<Utc>,
    pub frame_type: FrameType,
    pub camera_model: String,
    /// Physical pixel pitch in nanometres
    pub pixel_size_nm: (f64, f64),
}

impl FrameMetadata {
    pub fn exposure_seconds(&self) -> f64 {
        self.exposure_time_us as f64 / 1e6
    }

    /// Start of the exposure derived from its end and duration
    pub fn start_of_exposure(&self) -> DateTime<Utc> {
        self.end_of_exposure - chrono::Duration::microseconds(self.exposure_time_us as i64)
    }
}

/// One exposure's raw pixels plus metadata. Never mutated after creation.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub width: u32,
    pub height: u32,
    pub encoding: RawEncoding,
    /// Raw pixel buffer, shared between recorder and preview
    pub data: Arc<Vec<u8>>,
    pub metadata: FrameMetadata,
}

impl CapturedFrame {
    pub fn new(
        width: u32,
        height: u32,
        encoding: RawEncoding,
        data: Vec<u8>,
        metadata: FrameMetadata,
    ) -> Self {
        Self {
            width,
            height,
            encoding,
            data: Arc::new(data),
            metadata,
        }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn expected_size(&self) -> usize {
        self.pixel_count() * self.encoding.bytes_per_pixel()
    }

    pub fn validate_size(&self) -> bool {
        self.data.len() == self.expected_size()
    }

    /// Decode the raw buffer into one value per pixel.
    ///
    /// A trailing odd byte of a 16 bit buffer is ignored.
    pub fn pixels(&self) -> Vec<u16> {
        if self.encoding.bytes_per_pixel() == 2 {
            self.data
                .chunks_exact(2)
                .map(|b| u16::from_le_bytes([b[0], b[1]]))
                .collect()
        } else {
            self.data.iter().map(|&b| b as u16).collect()
        }
    }
}

/// Encode pixel values into the raw buffer layout of `encoding`
pub fn encode_pixels(encoding: RawEncoding, pixels: &[u16]) -> Vec<u8> {
    if encoding.bytes_per_pixel() == 2 {
        pixels.iter().flat_map(|p| p.to_le_bytes()).collect()
    } else {
        pixels.iter().map(|&p| p.min(u8::MAX as u16) as u8).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> FrameMetadata {
        FrameMetadata {
            sequence: 0,
            exposure_time_us: 2_000_000,
            analogue_gain: 1.0,
            black_levels: vec![4096; 4],
            binning: (1, 1),
            end_of_exposure: Utc::now(),
            frame_type: FrameType::Light,
            camera_model: "imx477".to_string(),
            pixel_size_nm: (1550.0, 1550.0),
        }
    }

    #[test]
    fn test_parse_mono_and_bayer_encodings() {
        assert_eq!(
            "R8".parse::<RawEncoding>().unwrap(),
            RawEncoding::Mono { bits: 8 }
        );
        assert_eq!(
            "SRGGB12".parse::<RawEncoding>().unwrap(),
            RawEncoding::Bayer {
                pattern: BayerPattern::Rggb,
                bits: 12
            }
        );
        assert_eq!("SBGGR10".parse::<RawEncoding>().unwrap().to_string(), "SBGGR10");
    }

    #[test]
    fn test_packed_and_unknown_encodings_rejected() {
        for tag in ["SRGGB10_CSI2P", "YUYV", "SXXXX10", "R", "S", "R99"] {
            assert!(matches!(
                tag.parse::<RawEncoding>(),
                Err(CameraError::UnsupportedEncoding { .. })
            ), "{} should be rejected", tag);
        }
    }

    #[test]
    fn test_pixel_decoding() {
        let enc = RawEncoding::Mono { bits: 10 };
        let frame = CapturedFrame::new(2, 1, enc, encode_pixels(enc, &[1023, 7]), metadata());
        assert!(frame.validate_size());
        assert_eq!(frame.pixels(), vec![1023, 7]);
        assert_eq!(enc.full_scale(), 1023);

        let enc8 = RawEncoding::Mono { bits: 8 };
        let frame = CapturedFrame::new(2, 1, enc8, vec![3, 255], metadata());
        assert_eq!(frame.pixels(), vec![3, 255]);
    }

    #[test]
    fn test_start_of_exposure() {
        let meta = metadata();
        let delta = meta.end_of_exposure - meta.start_of_exposure();
        assert_eq!(delta.num_seconds(), 2);
        assert_eq!(meta.exposure_seconds(), 2.0);
    }
}
