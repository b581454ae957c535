//! Pure signal-to-parameter derivation.

use super::{EnvironmentSignals, NetworkClass, PolicyContext, PreloadMode, QualityBand};

/// Devices reporting less memory than this count as low-memory.
pub const LOW_MEMORY_GB: f64 = 4.0;

/// Viewports narrower than this count as small.
pub const NARROW_VIEWPORT_PX: u32 = 768;

/// Battery level (fraction) below which an unplugged device saves power.
pub const LOW_BATTERY: f64 = 0.20;

pub const POWER_SAVING_QUALITY_PENALTY: u8 = 10;
pub const MIN_QUALITY: u8 = 10;
pub const POWER_SAVING_MAX_CONCURRENCY: usize = 2;

fn quality_band(network: NetworkClass) -> QualityBand {
    match network {
        NetworkClass::Slow => QualityBand { min: 25, max: 40 },
        NetworkClass::Medium => QualityBand { min: 45, max: 55 },
        NetworkClass::Fast => QualityBand { min: 55, max: 90 },
    }
}

fn base_concurrency(network: NetworkClass) -> usize {
    match network {
        NetworkClass::Slow => 2,
        NetworkClass::Medium => 4,
        NetworkClass::Fast => 6,
    }
}

fn base_preload(network: NetworkClass) -> PreloadMode {
    match network {
        NetworkClass::Slow => PreloadMode::Minimal,
        NetworkClass::Medium => PreloadMode::Moderate,
        NetworkClass::Fast => PreloadMode::Aggressive,
    }
}

/// Derive the full parameter set from one signal snapshot.
///
/// Power saving is applied last and overrides the other signals.
pub fn select(signals: &EnvironmentSignals) -> PolicyContext {
    let low_memory = signals
        .device_memory_gb
        .is_some_and(|gb| gb < LOW_MEMORY_GB);
    let narrow_viewport = signals
        .viewport_width
        .is_some_and(|w| w < NARROW_VIEWPORT_PX);
    let power_saving = signals
        .battery_level
        .is_some_and(|level| level < LOW_BATTERY)
        && !signals.charging;

    let effective_network = if low_memory || narrow_viewport {
        signals.network.step_down()
    } else {
        signals.network
    };

    let image_scale = match (low_memory, narrow_viewport) {
        (true, true) => 0.5,
        (true, false) | (false, true) => 0.75,
        (false, false) => 1.0,
    };

    let mut quality = quality_band(effective_network);
    let mut max_concurrency = base_concurrency(signals.network);
    if low_memory {
        max_concurrency = max_concurrency.saturating_sub(1).max(1);
    }
    let mut preload = base_preload(signals.network);
    if signals.save_data {
        preload = preload.min(PreloadMode::Minimal);
    }
    let mut animation_scale = 1.0;

    if power_saving {
        quality = QualityBand {
            min: quality
                .min
                .saturating_sub(POWER_SAVING_QUALITY_PENALTY)
                .max(MIN_QUALITY),
            max: quality
                .max
                .saturating_sub(POWER_SAVING_QUALITY_PENALTY)
                .max(MIN_QUALITY),
        };
        max_concurrency = max_concurrency.min(POWER_SAVING_MAX_CONCURRENCY);
        preload = PreloadMode::Deferred;
        animation_scale = 0.0;
    }

    PolicyContext {
        signals: signals.clone(),
        effective_network,
        low_memory,
        narrow_viewport,
        power_saving,
        quality,
        image_scale,
        animation_scale,
        max_concurrency,
        preload,
    }
}
