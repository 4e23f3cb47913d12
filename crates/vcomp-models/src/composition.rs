//! Composition definitions: ordered clip segments plus timed text overlays.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Default output canvas width (portrait 9:16)
pub const DEFAULT_CANVAS_WIDTH: u32 = 1080;
/// Default output canvas height (portrait 9:16)
pub const DEFAULT_CANVAS_HEIGHT: u32 = 1920;

/// Default overlay font size in pixels
pub const DEFAULT_FONT_SIZE: u32 = 64;
/// Default overlay font family
pub const DEFAULT_FONT_FAMILY: &str = "Inter";
/// Default overlay text color
pub const DEFAULT_TEXT_COLOR: &str = "white";

/// Fixed output canvas that overlay coordinates refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Canvas {
    pub width: u32,
    pub height: u32,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Clamp a position so the anchor point lies on the canvas.
    pub fn clamp(&self, position: Position) -> Position {
        let max_x = self.width.saturating_sub(1).min(i32::MAX as u32) as i32;
        let max_y = self.height.saturating_sub(1).min(i32::MAX as u32) as i32;
        Position {
            x: position.x.clamp(0, max_x),
            y: position.y.clamp(0, max_y),
        }
    }

    pub fn contains(&self, position: Position) -> bool {
        self.clamp(position) == position
    }
}

impl Default for Canvas {
    fn default() -> Self {
        Self::new(DEFAULT_CANVAS_WIDTH, DEFAULT_CANVAS_HEIGHT)
    }
}

impl fmt::Display for Canvas {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// One trimmed source clip placed on the output timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Segment {
    /// Source clip reference (URL or storage key)
    pub source_ref: String,
    /// Trimmed duration in seconds
    pub duration: f64,
    /// Timeline position; ties keep submission order
    #[serde(default)]
    pub order: i64,
}

/// Absolute pixel position of an overlay's top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Font weight for overlay text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum FontWeight {
    Light,
    #[default]
    Regular,
    Medium,
    Semibold,
    Bold,
    Black,
}

impl FontWeight {
    pub fn as_str(&self) -> &'static str {
        match self {
            FontWeight::Light => "light",
            FontWeight::Regular => "regular",
            FontWeight::Medium => "medium",
            FontWeight::Semibold => "semibold",
            FontWeight::Bold => "bold",
            FontWeight::Black => "black",
        }
    }

    /// Style name understood by fontconfig.
    pub fn fontconfig_style(&self) -> &'static str {
        match self {
            FontWeight::Light => "Light",
            FontWeight::Regular => "Regular",
            FontWeight::Medium => "Medium",
            FontWeight::Semibold => "SemiBold",
            FontWeight::Bold => "Bold",
            FontWeight::Black => "Black",
        }
    }
}

impl fmt::Display for FontWeight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FontWeight {
    type Err = FontWeightParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "light" | "300" => Ok(FontWeight::Light),
            "regular" | "normal" | "400" => Ok(FontWeight::Regular),
            "medium" | "500" => Ok(FontWeight::Medium),
            "semibold" | "600" => Ok(FontWeight::Semibold),
            "bold" | "700" => Ok(FontWeight::Bold),
            "black" | "900" => Ok(FontWeight::Black),
            _ => Err(FontWeightParseError(s.to_string())),
        }
    }
}

#[derive(Debug, Error)]
#[error("Unknown font weight: {0}")]
pub struct FontWeightParseError(String);

/// Text outline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Stroke {
    pub color: String,
    pub width: u32,
}

/// Drop shadow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Shadow {
    pub color: String,
    #[serde(default = "default_shadow_offset")]
    pub offset_x: i32,
    #[serde(default = "default_shadow_offset")]
    pub offset_y: i32,
}

fn default_shadow_offset() -> i32 {
    2
}

/// Visual style of a text overlay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TextStyle {
    #[serde(default = "default_text_color")]
    pub color: String,

    #[serde(default = "default_font_size")]
    pub font_size: u32,

    #[serde(default = "default_font_family")]
    pub font_family: String,

    #[serde(default)]
    pub font_weight: FontWeight,

    /// Box color drawn behind the text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke: Option<Stroke>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shadow: Option<Shadow>,
}

fn default_text_color() -> String {
    DEFAULT_TEXT_COLOR.to_string()
}
fn default_font_size() -> u32 {
    DEFAULT_FONT_SIZE
}
fn default_font_family() -> String {
    DEFAULT_FONT_FAMILY.to_string()
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            color: default_text_color(),
            font_size: DEFAULT_FONT_SIZE,
            font_family: default_font_family(),
            font_weight: FontWeight::default(),
            background: None,
            stroke: None,
            shadow: None,
        }
    }
}

/// A timed, positioned text element burned into the final video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TextOverlay {
    pub content: String,
    /// Window start in seconds on the output timeline
    pub start_time: f64,
    /// Window end in seconds (exclusive of anything after it)
    pub end_time: f64,
    pub position: Position,
    #[serde(default)]
    pub style: TextStyle,
}

impl TextOverlay {
    pub fn new(content: impl Into<String>, start_time: f64, end_time: f64, position: Position) -> Self {
        Self {
            content: content.into(),
            start_time,
            end_time,
            position,
            style: TextStyle::default(),
        }
    }

    pub fn with_style(mut self, style: TextStyle) -> Self {
        self.style = style;
        self
    }

    /// Whether the overlay is visible at time `t`.
    pub fn is_active_at(&self, t: f64) -> bool {
        t >= self.start_time && t <= self.end_time
    }

    /// Whether two overlays are on screen at the same time.
    pub fn overlaps_in_time(&self, other: &TextOverlay) -> bool {
        self.start_time < other.end_time && other.start_time < self.end_time
    }
}

/// User-authored timeline submitted for rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Composition {
    pub segments: Vec<Segment>,

    #[serde(default)]
    pub text_overlays: Vec<TextOverlay>,

    /// Output duration in seconds; derived from the segments when omitted
    #[serde(default)]
    pub total_duration: f64,
}

impl Composition {
    pub fn segment_duration_sum(&self) -> f64 {
        self.segments.iter().map(|s| s.duration).sum()
    }

    pub fn source_refs(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().map(|s| s.source_ref.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canvas_clamp() {
        let canvas = Canvas::default();
        assert_eq!(canvas.clamp(Position::new(-20, 50)), Position::new(0, 50));
        assert_eq!(canvas.clamp(Position::new(5000, 5000)), Position::new(1079, 1919));
        assert!(canvas.contains(Position::new(540, 960)));
        assert!(!canvas.contains(Position::new(1080, 0)));
    }

    #[test]
    fn test_overlay_defaults_from_json() {
        let overlay: TextOverlay = serde_json::from_str(
            r#"{"content":"Hi","start_time":0,"end_time":2,"position":{"x":10,"y":20}}"#,
        )
        .unwrap();
        assert_eq!(overlay.style.font_size, DEFAULT_FONT_SIZE);
        assert_eq!(overlay.style.font_family, "Inter");
        assert_eq!(overlay.style.font_weight, FontWeight::Regular);
        assert!(overlay.style.stroke.is_none());
    }

    #[test]
    fn test_font_weight_parse() {
        assert_eq!("bold".parse::<FontWeight>().unwrap(), FontWeight::Bold);
        assert_eq!("700".parse::<FontWeight>().unwrap(), FontWeight::Bold);
        assert!("heavy-ish".parse::<FontWeight>().is_err());
    }

    #[test]
    fn test_overlap_in_time() {
        let a = TextOverlay::new("a", 0.0, 5.0, Position::default());
        let b = TextOverlay::new("b", 4.0, 8.0, Position::default());
        let c = TextOverlay::new("c", 5.0, 8.0, Position::default());
        assert!(a.overlaps_in_time(&b));
        assert!(!a.overlaps_in_time(&c));
        assert!(a.is_active_at(5.0));
    }
}
