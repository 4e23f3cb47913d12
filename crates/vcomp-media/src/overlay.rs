//! Single-pass drawtext filter graph for timed text overlays.
//!
//! Every overlay becomes one `drawtext` filter with its own absolute `x`/`y`
//! and an `enable` window. All filters are chained into a single `-vf`
//! graph so one FFmpeg pass renders every overlay, including ones whose
//! windows overlap. Filters are applied in declaration order, so when two
//! overlays cover the same pixels at the same time the later one is drawn
//! on top.

use std::path::{Path, PathBuf};

use vcomp_models::TextOverlay;

use crate::error::{MediaError, MediaResult};

/// Largest font size accepted, in pixels.
pub const MAX_FONT_SIZE: u32 = 2000;
/// Largest outline width accepted, in pixels.
pub const MAX_STROKE_WIDTH: u32 = 100;
/// Padding around the background box, in pixels.
pub const BOX_BORDER: u32 = 12;

/// Escape a value for use inside a quoted filter option.
fn escape_filter_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'").replace(':', "\\:")
}

/// Convert a style color into FFmpeg color syntax.
///
/// Accepts `#RRGGBB`, `#RRGGBBAA`, `0xRRGGBB[AA]` or a color name, each
/// optionally followed by `@alpha` with alpha in `[0, 1]`.
pub fn ffmpeg_color(value: &str) -> Option<String> {
    let value = value.trim();
    let (base, alpha) = match value.split_once('@') {
        Some((base, alpha)) => {
            let parsed: f64 = alpha.parse().ok()?;
            if !(0.0..=1.0).contains(&parsed) {
                return None;
            }
            (base, Some(alpha))
        }
        None => (value, None),
    };

    let hex = base.strip_prefix('#').or_else(|| base.strip_prefix("0x"));
    let color = match hex {
        Some(hex) if matches!(hex.len(), 6 | 8) && hex.chars().all(|c| c.is_ascii_hexdigit()) => {
            format!("0x{}", hex.to_ascii_uppercase())
        }
        Some(_) => return None,
        None if (3..=24).contains(&base.len()) && base.chars().all(|c| c.is_ascii_alphabetic()) => {
            base.to_ascii_lowercase()
        }
        None => return None,
    };

    Some(match alpha {
        Some(alpha) => format!("{}@{}", color, alpha),
        None => color,
    })
}

/// Write each overlay's text to its own file in `dir`.
///
/// Text is passed to drawtext through `textfile` so user content never
/// needs filter-graph escaping.
pub async fn write_overlay_text_files(dir: &Path, overlays: &[TextOverlay]) -> MediaResult<Vec<PathBuf>> {
    let mut paths = Vec::with_capacity(overlays.len());
    for (index, overlay) in overlays.iter().enumerate() {
        let path = dir.join(format!("overlay_{}.txt", index));
        tokio::fs::write(&path, overlay.content.as_bytes()).await?;
        paths.push(path);
    }
    Ok(paths)
}

/// Build the `-vf` graph for all overlays, or `None` when there are none.
pub fn build_overlay_filter(overlays: &[TextOverlay], text_files: &[PathBuf]) -> MediaResult<Option<String>> {
    if overlays.is_empty() {
        return Ok(None);
    }
    if overlays.len() != text_files.len() {
        return Err(MediaError::internal(format!(
            "{} overlays but {} text files",
            overlays.len(),
            text_files.len()
        )));
    }

    let filters = overlays
        .iter()
        .zip(text_files)
        .enumerate()
        .map(|(index, (overlay, text_file))| drawtext(index, overlay, text_file))
        .collect::<MediaResult<Vec<_>>>()?;

    Ok(Some(filters.join(",")))
}

fn drawtext(index: usize, overlay: &TextOverlay, text_file: &Path) -> MediaResult<String> {
    let style = &overlay.style;

    if overlay.content.trim().is_empty() {
        return Err(MediaError::unrenderable(index, "text is empty"));
    }
    if overlay.content.chars().any(|c| c.is_control() && c != '\n') {
        return Err(MediaError::unrenderable(index, "text contains control characters"));
    }
    if style.font_size == 0 || style.font_size > MAX_FONT_SIZE {
        return Err(MediaError::unrenderable(
            index,
            format!("font size {} out of range", style.font_size),
        ));
    }
    if style.font_family.trim().is_empty() {
        return Err(MediaError::unrenderable(index, "font family is empty"));
    }

    let color = |value: &str| {
        ffmpeg_color(value).ok_or_else(|| MediaError::unrenderable(index, format!("invalid color '{}'", value)))
    };

    let font = format!("{}:style={}", style.font_family.trim(), style.font_weight.fontconfig_style());
    let mut options = vec![
        format!("textfile='{}'", escape_filter_value(&text_file.to_string_lossy())),
        "expansion=none".to_string(),
        format!("font='{}'", escape_filter_value(&font)),
        format!("fontsize={}", style.font_size),
        format!("fontcolor={}", color(&style.color)?),
        format!("x={}", overlay.position.x),
        format!("y={}", overlay.position.y),
    ];

    if let Some(background) = &style.background {
        options.push("box=1".to_string());
        options.push(format!("boxcolor={}", color(background)?));
        options.push(format!("boxborderw={}", BOX_BORDER));
    }
    if let Some(stroke) = &style.stroke {
        if stroke.width > MAX_STROKE_WIDTH {
            return Err(MediaError::unrenderable(
                index,
                format!("stroke width {} out of range", stroke.width),
            ));
        }
        options.push(format!("borderw={}", stroke.width));
        options.push(format!("bordercolor={}", color(&stroke.color)?));
    }
    if let Some(shadow) = &style.shadow {
        options.push(format!("shadowx={}", shadow.offset_x));
        options.push(format!("shadowy={}", shadow.offset_y));
        options.push(format!("shadowcolor={}", color(&shadow.color)?));
    }

    options.push(format!(
        "enable='between(t,{:.3},{:.3})'",
        overlay.start_time, overlay.end_time
    ));

    Ok(format!("drawtext={}", options.join(":")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use vcomp_models::{Position, Shadow, Stroke, TextStyle};

    fn files(n: usize) -> Vec<PathBuf> {
        (0..n).map(|i| PathBuf::from(format!("/work/overlay_{}.txt", i))).collect()
    }

    #[test]
    fn test_no_overlays_no_filter() {
        assert_eq!(build_overlay_filter(&[], &[]).unwrap(), None);
    }

    #[test]
    fn test_overlapping_overlays_keep_independent_positions() {
        let overlays = vec![
            TextOverlay::new("Top", 0.0, 6.0, Position::new(100, 200)),
            TextOverlay::new("Bottom", 2.0, 8.0, Position::new(640, 1500)),
        ];

        let filter = build_overlay_filter(&overlays, &files(2)).unwrap().unwrap();
        let parts: Vec<&str> = filter.split(",drawtext=").collect();

        assert_eq!(parts.len(), 2, "both overlays must be in one graph: {}", filter);
        assert!(parts[0].contains(":x=100:y=200:"));
        assert!(parts[0].contains("between(t,0.000,6.000)"));
        assert!(parts[1].contains(":x=640:y=1500:"));
        assert!(parts[1].contains("between(t,2.000,8.000)"));
        assert!(!parts[1].contains("x=100"));
    }

    #[test]
    fn test_declaration_order_is_draw_order() {
        let overlays = vec![
            TextOverlay::new("under", 0.0, 5.0, Position::new(10, 10)),
            TextOverlay::new("over", 0.0, 5.0, Position::new(10, 10)),
        ];
        let filter = build_overlay_filter(&overlays, &files(2)).unwrap().unwrap();
        let under = filter.find("overlay_0.txt").unwrap();
        let over = filter.find("overlay_1.txt").unwrap();
        assert!(under < over);
    }

    #[test]
    fn test_full_style_options() {
        let style = TextStyle {
            color: "#FFCC00".to_string(),
            font_size: 72,
            font_family: "Inter".to_string(),
            font_weight: vcomp_models::FontWeight::Bold,
            background: Some("black@0.5".to_string()),
            stroke: Some(Stroke {
                color: "black".to_string(),
                width: 3,
            }),
            shadow: Some(Shadow {
                color: "#00000080".to_string(),
                offset_x: 4,
                offset_y: 4,
            }),
        };
        let overlay = TextOverlay::new("Hi", 1.0, 2.5, Position::new(5, 6)).with_style(style);
        let filter = build_overlay_filter(&[overlay], &files(1)).unwrap().unwrap();

        assert!(filter.starts_with("drawtext=textfile='/work/overlay_0.txt'"));
        assert!(filter.contains("font='Inter\\:style=Bold'"));
        assert!(filter.contains("fontsize=72"));
        assert!(filter.contains("fontcolor=0xFFCC00"));
        assert!(filter.contains("box=1:boxcolor=black@0.5"));
        assert!(filter.contains("borderw=3:bordercolor=black"));
        assert!(filter.contains("shadowcolor=0x00000080"));
        assert!(filter.contains("expansion=none"));
    }

    #[test]
    fn test_unrenderable_overlays() {
        let mut bad_color = TextOverlay::new("x", 0.0, 1.0, Position::default());
        bad_color.style.color = "#12345".to_string();
        let mut zero_size = TextOverlay::new("x", 0.0, 1.0, Position::default());
        zero_size.style.font_size = 0;
        let blank = TextOverlay::new("  ", 0.0, 1.0, Position::default());

        for overlay in [bad_color, zero_size, blank] {
            let err = build_overlay_filter(&[overlay], &files(1)).unwrap_err();
            assert!(matches!(err, MediaError::UnrenderableOverlay { index: 0, .. }));
            assert!(err.is_deterministic());
        }
    }

    #[test]
    fn test_color_conversion() {
        assert_eq!(ffmpeg_color("#ff0000").as_deref(), Some("0xFF0000"));
        assert_eq!(ffmpeg_color("White").as_deref(), Some("white"));
        assert_eq!(ffmpeg_color("0x112233@0.25").as_deref(), Some("0x112233@0.25"));
        assert_eq!(ffmpeg_color("red@2"), None);
        assert_eq!(ffmpeg_color("rgb(1,2,3)"), None);
        assert_eq!(ffmpeg_color("#GGGGGG"), None);
    }

    #[tokio::test]
    async fn test_text_files_written() {
        let dir = tempfile::tempdir().unwrap();
        let overlays = vec![TextOverlay::new("it's 50% off: now", 0.0, 1.0, Position::default())];
        let paths = write_overlay_text_files(dir.path(), &overlays).await.unwrap();
        let written = tokio::fs::read_to_string(&paths[0]).await.unwrap();
        assert_eq!(written, "it's 50% off: now");
    }
}
