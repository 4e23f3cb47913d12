//! Target fleet size from queue depth.

use crate::config::AutoscalerConfig;

/// Desired worker count for `depth` outstanding tasks.
///
/// Up to the proportional threshold every task gets a worker. Above it the
/// highest matching step band decides, so small depth changes at high load
/// do not move the target. The result always lies within
/// `[min_workers, max_workers]`.
pub fn target_size(config: &AutoscalerConfig, depth: u64) -> u32 {
    let raw = if depth <= config.proportional_threshold {
        saturating_u32(depth)
    } else {
        config
            .step_bands
            .iter()
            .rev()
            .find(|band| band.min_depth <= depth)
            .map(|band| band.size)
            .unwrap_or_else(|| saturating_u32(depth))
    };

    raw.clamp(config.min_workers, config.max_workers)
}

fn saturating_u32(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StepBand;

    #[test]
    fn test_proportional_range_with_warm_pool_floor() {
        let config = AutoscalerConfig::default();
        let targets: Vec<u32> = (0..=10).map(|depth| target_size(&config, depth)).collect();
        assert_eq!(targets, vec![2, 2, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
    }

    #[test]
    fn test_step_bands_above_threshold() {
        let config = AutoscalerConfig::default();
        assert_eq!(target_size(&config, 11), 12);
        assert_eq!(target_size(&config, 25), 12);
        assert_eq!(target_size(&config, 26), 20);
        assert_eq!(target_size(&config, 60), 30);
        assert_eq!(target_size(&config, 61), 30);
        assert_eq!(target_size(&config, 5_000), 50);
    }

    #[test]
    fn test_clamped_to_max_workers() {
        let config = AutoscalerConfig {
            max_workers: 8,
            ..AutoscalerConfig::default()
        };
        assert_eq!(target_size(&config, 9), 8);
        assert_eq!(target_size(&config, 60), 8);
    }

    #[test]
    fn test_without_bands_stays_proportional() {
        let config = AutoscalerConfig {
            step_bands: Vec::<StepBand>::new(),
            ..AutoscalerConfig::default()
        };
        assert_eq!(target_size(&config, 17), 17);
    }
}
