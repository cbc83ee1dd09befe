use image::RgbImage;
use palette::{Hsv, IntoColor, Srgb};
use serde::{Serialize, Serializer};

use std::fmt;

/// Plate category, decided from the plate's background color and its
/// special characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlateType {
    Blue,
    Yellow,
    White,
    /// New energy vehicles
    Green,
    /// Hong Kong and Macau crossing plates
    Black,
    Unknown,
}

impl PlateType {
    pub fn label(self) -> &'static str {
        match self {
            PlateType::Blue => "blue",
            PlateType::Yellow => "yellow",
            PlateType::White => "white",
            PlateType::Green => "green",
            PlateType::Black => "black",
            PlateType::Unknown => "unknown",
        }
    }

    pub fn chinese_name(self) -> &'static str {
        match self {
            PlateType::Blue => "蓝牌",
            PlateType::Yellow => "黄牌",
            PlateType::White => "白牌",
            PlateType::Green => "绿牌",
            PlateType::Black => "黑牌",
            PlateType::Unknown => "未知",
        }
    }

    /// Characters decide first, the crop's color only when the code
    /// carries no marker.
    pub fn classify(code: &str, plate: &RgbImage) -> Self {
        Self::from_code(code).unwrap_or_else(|| Self::from_color(plate))
    }

    pub fn from_code(code: &str) -> Option<Self> {
        if code.chars().count() == 8 {
            Some(PlateType::Green)
        } else if code.contains('港') || code.contains('澳') {
            Some(PlateType::Black)
        } else if code.contains('警') || code.contains('军') {
            Some(PlateType::White)
        } else if code.contains('学') || code.contains('挂') {
            Some(PlateType::Yellow)
        } else {
            None
        }
    }

    /// Classify by the mean HSV of the plate crop.
    pub fn from_color(plate: &RgbImage) -> Self {
        let count = plate.width() as usize * plate.height() as usize;
        if count == 0 {
            return PlateType::Unknown;
        }
        let (mut hx, mut hy, mut sat, mut val) = (0.0f32, 0.0f32, 0.0f32, 0.0f32);
        for px in plate.pixels() {
            let hsv: Hsv = Srgb::new(px[0], px[1], px[2]).into_format::<f32>().into_color();
            // hue is circular, average it as a vector
            let rad = hsv.hue.into_radians();
            hx += rad.cos() * hsv.saturation;
            hy += rad.sin() * hsv.saturation;
            sat += hsv.saturation;
            val += hsv.value;
        }
        let n = count as f32;
        let (sat, val) = (sat / n, val / n);
        let hue = hy.atan2(hx).to_degrees().rem_euclid(360.0);

        if val < 0.25 {
            PlateType::Black
        } else if sat < 0.2 {
            if val > 0.6 { PlateType::White } else { PlateType::Unknown }
        } else if (190.0..=255.0).contains(&hue) {
            PlateType::Blue
        } else if (35.0..70.0).contains(&hue) {
            PlateType::Yellow
        } else if (70.0..170.0).contains(&hue) {
            PlateType::Green
        } else {
            PlateType::Unknown
        }
    }
}

impl fmt::Display for PlateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for PlateType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

/// One plate found by an engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlateCandidate {
    /// x, y, width, height in source image pixels
    pub bbox: [u32; 4],
    pub detection_score: f32,
    pub code: String,
    pub plate_type: PlateType,
    pub confidence: f32,
}

/// Outcome of one successful recognition call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognitionResult {
    pub code: String,
    #[serde(rename = "type")]
    pub plate_type: PlateType,
    pub confidence: f32,
}

impl RecognitionResult {
    /// The value returned when the engine ran but found no plate.
    pub fn empty() -> Self {
        Self { code: String::new(), plate_type: PlateType::Unknown, confidence: 0.0 }
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }
}

impl From<&PlateCandidate> for RecognitionResult {
    fn from(c: &PlateCandidate) -> Self {
        Self { code: c.code.clone(), plate_type: c.plate_type, confidence: c.confidence.clamp(0.0, 1.0) }
    }
}
