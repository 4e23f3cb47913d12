//! Composition validation and normalization.
//!
//! Runs synchronously on submission, before any job exists. The validator
//! has no side effects: it either rejects the composition or returns a
//! normalized copy (segments sorted by `order`, overlay positions clamped
//! to the canvas).

use thiserror::Error;
use url::Url;

use crate::composition::{Canvas, Composition};

/// Allowed difference between the segment duration sum and `total_duration`.
pub const DURATION_TOLERANCE_SECS: f64 = 0.05;

/// URL schemes accepted as segment sources.
const SOURCE_SCHEMES: &[&str] = &["http", "https", "s3", "r2", "gs"];

/// Reasons a submitted composition is rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvalidComposition {
    #[error("composition has no segments")]
    EmptySegments,

    #[error("segment {index} has no source reference")]
    MissingSource { index: usize },

    #[error("segment {index} source '{source_ref}' cannot be resolved")]
    UnresolvableSource { index: usize, source_ref: String },

    #[error("segment {index} has non-positive duration {duration}")]
    NonPositiveDuration { index: usize, duration: f64 },

    #[error("segment durations sum to {sum:.3}s but total_duration is {total:.3}s")]
    DurationMismatch { sum: f64, total: f64 },

    #[error("overlay {index} window [{start}, {end}] is invalid: {reason}")]
    InvalidOverlayWindow {
        index: usize,
        start: f64,
        end: f64,
        reason: &'static str,
    },
}

impl InvalidComposition {
    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            InvalidComposition::EmptySegments => "empty_segments",
            InvalidComposition::MissingSource { .. } => "missing_source",
            InvalidComposition::UnresolvableSource { .. } => "unresolvable_source",
            InvalidComposition::NonPositiveDuration { .. } => "non_positive_duration",
            InvalidComposition::DurationMismatch { .. } => "duration_mismatch",
            InvalidComposition::InvalidOverlayWindow { .. } => "invalid_overlay_window",
        }
    }
}

/// Validates and normalizes compositions against a fixed canvas.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompositionValidator {
    canvas: Canvas,
}

impl CompositionValidator {
    pub fn new(canvas: Canvas) -> Self {
        Self { canvas }
    }

    pub fn canvas(&self) -> Canvas {
        self.canvas
    }

    /// Validate a composition, returning its normalized form.
    pub fn validate(&self, mut composition: Composition) -> Result<Composition, InvalidComposition> {
        if composition.segments.is_empty() {
            return Err(InvalidComposition::EmptySegments);
        }

        for (index, segment) in composition.segments.iter().enumerate() {
            check_source(index, &segment.source_ref)?;
            if !segment.duration.is_finite() || segment.duration <= 0.0 {
                return Err(InvalidComposition::NonPositiveDuration {
                    index,
                    duration: segment.duration,
                });
            }
        }

        let sum = composition.segment_duration_sum();
        let total = composition.total_duration;
        if total == 0.0 {
            composition.total_duration = sum;
        } else if !total.is_finite() || (sum - total).abs() > DURATION_TOLERANCE_SECS {
            return Err(InvalidComposition::DurationMismatch { sum, total });
        }
        let total = composition.total_duration;

        for (index, overlay) in composition.text_overlays.iter_mut().enumerate() {
            let (start, end) = (overlay.start_time, overlay.end_time);
            let reason = if !start.is_finite() || !end.is_finite() {
                Some("times must be finite")
            } else if start < 0.0 {
                Some("start is negative")
            } else if end <= start {
                Some("end must be after start")
            } else if end > total {
                Some("end is past total_duration")
            } else {
                None
            };
            if let Some(reason) = reason {
                return Err(InvalidComposition::InvalidOverlayWindow {
                    index,
                    start,
                    end,
                    reason,
                });
            }

            overlay.position = self.canvas.clamp(overlay.position);
        }

        // Stable sort: equal `order` keeps submission index order.
        composition.segments.sort_by_key(|s| s.order);

        Ok(composition)
    }
}

fn check_source(index: usize, source_ref: &str) -> Result<(), InvalidComposition> {
    let source_ref = source_ref.trim();
    if source_ref.is_empty() {
        return Err(InvalidComposition::MissingSource { index });
    }

    let unresolvable = || InvalidComposition::UnresolvableSource {
        index,
        source_ref: source_ref.to_string(),
    };

    match Url::parse(source_ref) {
        Ok(url) => {
            if !SOURCE_SCHEMES.contains(&url.scheme()) {
                return Err(unresolvable());
            }
            if url.scheme().starts_with("http") && url.host_str().is_none() {
                return Err(unresolvable());
            }
            Ok(())
        }
        // Bare storage key
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let bad_key = source_ref.starts_with('/')
                || source_ref.split('/').any(|part| part == ".." || part.is_empty())
                || source_ref.chars().any(|c| c.is_whitespace() || c.is_control());
            if bad_key {
                Err(unresolvable())
            } else {
                Ok(())
            }
        }
        Err(_) => Err(unresolvable()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composition::{Position, Segment, TextOverlay};

    fn segment(source: &str, duration: f64, order: i64) -> Segment {
        Segment {
            source_ref: source.to_string(),
            duration,
            order,
        }
    }

    fn composition(segments: Vec<Segment>, overlays: Vec<TextOverlay>, total: f64) -> Composition {
        Composition {
            segments,
            text_overlays: overlays,
            total_duration: total,
        }
    }

    #[test]
    fn test_valid_composition_is_unchanged() {
        let input = composition(
            vec![
                segment("https://cdn.example.com/a.mp4", 5.0, 0),
                segment("library/clips/b.mp4", 8.0, 1),
                segment("s3://bucket/c.mp4", 7.0, 2),
            ],
            vec![TextOverlay::new("hello", 1.0, 4.0, Position::new(100, 200))],
            20.0,
        );

        let output = CompositionValidator::default().validate(input.clone()).unwrap();
        assert_eq!(output, input);
        assert!((output.segment_duration_sum() - output.total_duration).abs() < DURATION_TOLERANCE_SECS);
    }

    #[test]
    fn test_empty_segments_rejected() {
        let err = CompositionValidator::default()
            .validate(composition(vec![], vec![], 10.0))
            .unwrap_err();
        assert_eq!(err, InvalidComposition::EmptySegments);
        assert_eq!(err.code(), "empty_segments");
    }

    #[test]
    fn test_non_positive_duration_rejected() {
        for duration in [0.0, -1.5, f64::NAN] {
            let err = CompositionValidator::default()
                .validate(composition(vec![segment("a.mp4", duration, 0)], vec![], 0.0))
                .unwrap_err();
            assert!(matches!(err, InvalidComposition::NonPositiveDuration { index: 0, .. }));
        }
    }

    #[test]
    fn test_unresolvable_sources_rejected() {
        for source in ["", "   ", "ftp://host/a.mp4", "/etc/passwd", "clips/../secret", "https://"] {
            let result = CompositionValidator::default()
                .validate(composition(vec![segment(source, 1.0, 0)], vec![], 0.0));
            assert!(
                matches!(
                    result,
                    Err(InvalidComposition::MissingSource { .. })
                        | Err(InvalidComposition::UnresolvableSource { .. })
                ),
                "source {:?} should be rejected",
                source
            );
        }
    }

    #[test]
    fn test_total_duration_derived_when_omitted() {
        let output = CompositionValidator::default()
            .validate(composition(
                vec![segment("a.mp4", 5.0, 0), segment("b.mp4", 8.0, 1), segment("c.mp4", 7.0, 2)],
                vec![],
                0.0,
            ))
            .unwrap();
        assert_eq!(output.total_duration, 20.0);
    }

    #[test]
    fn test_duration_mismatch_rejected() {
        let err = CompositionValidator::default()
            .validate(composition(vec![segment("a.mp4", 5.0, 0)], vec![], 9.0))
            .unwrap_err();
        assert!(matches!(err, InvalidComposition::DurationMismatch { .. }));
    }

    #[test]
    fn test_overlay_windows_checked() {
        let cases = [(-1.0, 2.0), (3.0, 3.0), (4.0, 2.0), (1.0, 11.0)];
        for (start, end) in cases {
            let err = CompositionValidator::default()
                .validate(composition(
                    vec![segment("a.mp4", 10.0, 0)],
                    vec![TextOverlay::new("x", start, end, Position::default())],
                    10.0,
                ))
                .unwrap_err();
            assert!(matches!(err, InvalidComposition::InvalidOverlayWindow { index: 0, .. }));
        }
    }

    #[test]
    fn test_overlay_may_end_exactly_at_total() {
        let validator = CompositionValidator::default();
        let with_end = |end: f64| {
            composition(
                vec![segment("a.mp4", 10.0, 0)],
                vec![TextOverlay::new("x", 9.0, end, Position::default())],
                10.0,
            )
        };

        let output = validator.validate(with_end(10.0)).unwrap();
        assert_eq!(output.text_overlays[0].end_time, 10.0);

        let err = validator.validate(with_end(10.04)).unwrap_err();
        assert!(matches!(err, InvalidComposition::InvalidOverlayWindow { index: 0, .. }));
    }

    #[test]
    fn test_positions_clamped_not_rejected() {
        let validator = CompositionValidator::new(Canvas::new(1080, 1920));
        let output = validator
            .validate(composition(
                vec![segment("a.mp4", 10.0, 0)],
                vec![
                    TextOverlay::new("left", 0.0, 1.0, Position::new(-50, 100)),
                    TextOverlay::new("far", 0.0, 1.0, Position::new(4000, 4000)),
                ],
                10.0,
            ))
            .unwrap();
        assert_eq!(output.text_overlays[0].position, Position::new(0, 100));
        assert_eq!(output.text_overlays[1].position, Position::new(1079, 1919));
    }

    #[test]
    fn test_segment_order_is_deterministic() {
        let output = CompositionValidator::default()
            .validate(composition(
                vec![
                    segment("c.mp4", 1.0, 2),
                    segment("a.mp4", 1.0, 0),
                    segment("b1.mp4", 1.0, 1),
                    segment("b2.mp4", 1.0, 1),
                ],
                vec![],
                4.0,
            ))
            .unwrap();
        let order: Vec<_> = output.source_refs().collect();
        assert_eq!(order, vec!["a.mp4", "b1.mp4", "b2.mp4", "c.mp4"]);
    }
}
