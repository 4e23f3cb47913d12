//! Autoscaler configuration.
//!
//! Built once at process start and handed to the controller; nothing reads
//! pool sizes from the environment after that.

use std::time::Duration;

use crate::error::{AutoscalerError, AutoscalerResult};

/// Above `proportional_threshold`, depths from `min_depth` upward map to a
/// fixed fleet `size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepBand {
    pub min_depth: u64,
    pub size: u32,
}

impl StepBand {
    pub const fn new(min_depth: u64, size: u32) -> Self {
        Self { min_depth, size }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AutoscalerConfig {
    /// Warm pool: workers that always run
    pub min_workers: u32,
    pub max_workers: u32,
    /// Depths up to this get one worker per queued task
    pub proportional_threshold: u64,
    /// Ascending by `min_depth`
    pub step_bands: Vec<StepBand>,
    pub scale_out_cooldown: Duration,
    pub scale_in_cooldown: Duration,
    pub interval: Duration,
    pub jitter: Duration,
}

impl Default for AutoscalerConfig {
    fn default() -> Self {
        Self {
            min_workers: 2,
            max_workers: 50,
            proportional_threshold: 10,
            step_bands: vec![
                StepBand::new(11, 12),
                StepBand::new(26, 20),
                StepBand::new(51, 30),
                StepBand::new(101, 50),
            ],
            scale_out_cooldown: Duration::from_secs(30),
            scale_in_cooldown: Duration::from_secs(150),
            interval: Duration::from_secs(15),
            jitter: Duration::from_secs(2),
        }
    }
}

impl AutoscalerConfig {
    /// Read `AUTOSCALER_*` overrides on top of the defaults.
    ///
    /// `AUTOSCALER_STEP_BANDS` is a comma-separated list of
    /// `min_depth:size` pairs, e.g. `11:12,26:20,51:30`.
    pub fn from_env() -> AutoscalerResult<Self> {
        let defaults = Self::default();
        let secs = |name: &str, default: Duration| {
            std::env::var(name)
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default)
        };

        let step_bands = match std::env::var("AUTOSCALER_STEP_BANDS") {
            Ok(raw) => parse_step_bands(&raw)?,
            Err(_) => defaults.step_bands.clone(),
        };

        let config = Self {
            min_workers: env_number("AUTOSCALER_MIN_WORKERS", defaults.min_workers),
            max_workers: env_number("AUTOSCALER_MAX_WORKERS", defaults.max_workers),
            proportional_threshold: env_number("AUTOSCALER_PROPORTIONAL_THRESHOLD", defaults.proportional_threshold),
            step_bands,
            scale_out_cooldown: secs("AUTOSCALER_SCALE_OUT_COOLDOWN_SECS", defaults.scale_out_cooldown),
            scale_in_cooldown: secs("AUTOSCALER_SCALE_IN_COOLDOWN_SECS", defaults.scale_in_cooldown),
            interval: secs("AUTOSCALER_INTERVAL_SECS", defaults.interval),
            jitter: std::env::var("AUTOSCALER_JITTER_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.jitter),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AutoscalerResult<()> {
        if self.max_workers == 0 {
            return Err(AutoscalerError::config("max_workers must be positive"));
        }
        if self.min_workers > self.max_workers {
            return Err(AutoscalerError::config(format!(
                "min_workers {} exceeds max_workers {}",
                self.min_workers, self.max_workers
            )));
        }
        if self.interval.is_zero() {
            return Err(AutoscalerError::config("interval must be positive"));
        }
        if self.step_bands.windows(2).any(|w| w[0].min_depth >= w[1].min_depth) {
            return Err(AutoscalerError::config("step bands must be strictly ascending by min_depth"));
        }
        if let Some(first) = self.step_bands.first() {
            if first.min_depth <= self.proportional_threshold {
                return Err(AutoscalerError::config(format!(
                    "first step band starts at {} but proportional scaling covers depths up to {}",
                    first.min_depth, self.proportional_threshold
                )));
            }
        }
        Ok(())
    }
}

fn env_number<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn parse_step_bands(raw: &str) -> AutoscalerResult<Vec<StepBand>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|pair| {
            let (depth, size) = pair
                .split_once(':')
                .ok_or_else(|| AutoscalerError::config(format!("step band '{}' is not depth:size", pair)))?;
            let min_depth = depth
                .trim()
                .parse()
                .map_err(|_| AutoscalerError::config(format!("bad depth in step band '{}'", pair)))?;
            let size = size
                .trim()
                .parse()
                .map_err(|_| AutoscalerError::config(format!("bad size in step band '{}'", pair)))?;
            Ok(StepBand { min_depth, size })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AutoscalerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scale_in_cooldown, config.scale_out_cooldown * 5);
    }

    #[test]
    fn test_parse_step_bands() {
        let bands = parse_step_bands("11:12, 26:20,51:30").unwrap();
        assert_eq!(bands, vec![StepBand::new(11, 12), StepBand::new(26, 20), StepBand::new(51, 30)]);
        assert!(parse_step_bands("11-12").is_err());
        assert!(parse_step_bands("x:12").is_err());
    }

    #[test]
    fn test_validate_rejects_overlapping_policies() {
        let config = AutoscalerConfig {
            step_bands: vec![StepBand::new(5, 12)],
            ..AutoscalerConfig::default()
        };
        assert!(config.validate().is_err());

        let config = AutoscalerConfig {
            min_workers: 60,
            ..AutoscalerConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
