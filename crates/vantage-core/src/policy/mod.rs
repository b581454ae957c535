//! Adaptive policy: environment signals in, delivery parameters out.
//!
//! [`select`] is a pure function. [`PolicySelector`] re-runs it on every
//! signal change and republishes the whole [`PolicyContext`] through a
//! `watch` channel, so subscribers always read a consistent snapshot rather
//! than applying deltas.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::info;

use crate::error::DeliveryError;

mod select;

pub use select::{select, LOW_BATTERY, LOW_MEMORY_GB, NARROW_VIEWPORT_PX};

/// Effective connection class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkClass {
    /// 2G and slower.
    Slow,
    /// 3G.
    Medium,
    /// 4G and faster.
    #[default]
    Fast,
}

impl NetworkClass {
    /// One class down; `Slow` stays `Slow`.
    pub fn step_down(self) -> Self {
        match self {
            Self::Fast => Self::Medium,
            Self::Medium | Self::Slow => Self::Slow,
        }
    }
}

impl fmt::Display for NetworkClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Slow => write!(f, "slow"),
            Self::Medium => write!(f, "medium"),
            Self::Fast => write!(f, "fast"),
        }
    }
}

impl FromStr for NetworkClass {
    type Err = DeliveryError;

    /// Accepts class names and effective-type labels (`slow-2g`, `2g`,
    /// `3g`, `4g`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "slow" | "slow-2g" | "2g" => Ok(Self::Slow),
            "medium" | "3g" => Ok(Self::Medium),
            "fast" | "4g" | "5g" => Ok(Self::Fast),
            other => Err(DeliveryError::Config {
                message: format!("unknown network class: {other}"),
            }),
        }
    }
}

/// How eagerly non-critical resources are fetched ahead of need.
///
/// Ordered from least to most eager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreloadMode {
    Deferred,
    Minimal,
    Moderate,
    Aggressive,
}

/// Raw environment observations. Unknown values stay `None` and never
/// trigger a modifier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentSignals {
    #[serde(default)]
    pub network: NetworkClass,

    #[serde(default)]
    pub device_memory_gb: Option<f64>,

    /// Battery charge as a fraction in `0.0..=1.0`.
    #[serde(default)]
    pub battery_level: Option<f64>,

    #[serde(default)]
    pub charging: bool,

    #[serde(default)]
    pub viewport_width: Option<u32>,

    /// The user asked for reduced data usage.
    #[serde(default)]
    pub save_data: bool,
}

/// Inclusive image quality range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityBand {
    pub min: u8,
    pub max: u8,
}

/// Quality and target width for one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageParams {
    pub quality: u8,
    pub width: u32,
}

/// Signals plus every parameter derived from them. Read-only for consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyContext {
    pub signals: EnvironmentSignals,

    /// Network class after device modifiers.
    pub effective_network: NetworkClass,

    pub low_memory: bool,
    pub narrow_viewport: bool,
    pub power_saving: bool,

    pub quality: QualityBand,

    /// Multiplier for requested image dimensions.
    pub image_scale: f64,

    /// Multiplier for animation durations; `0.0` disables animation.
    pub animation_scale: f64,

    pub max_concurrency: usize,
    pub preload: PreloadMode,
}

impl Default for PolicyContext {
    fn default() -> Self {
        select(&EnvironmentSignals::default())
    }
}

impl PolicyContext {
    /// Top of the band for priority resources, bottom otherwise.
    pub fn quality_for(&self, priority: bool) -> u8 {
        if priority {
            self.quality.max
        } else {
            self.quality.min
        }
    }

    pub fn image_params(&self, width: u32, priority: bool) -> ImageParams {
        let scaled = (f64::from(width) * self.image_scale).round() as u32;
        ImageParams {
            quality: self.quality_for(priority),
            width: scaled.max(1),
        }
    }

    /// Whether only critical loads should start right now.
    pub fn defer_non_critical_preloads(&self) -> bool {
        self.preload == PreloadMode::Deferred
    }
}

/// Publishes the current [`PolicyContext`]; shared by clones.
#[derive(Debug, Clone)]
pub struct PolicySelector {
    tx: Arc<watch::Sender<PolicyContext>>,
}

impl Default for PolicySelector {
    fn default() -> Self {
        Self::new(EnvironmentSignals::default())
    }
}

impl PolicySelector {
    pub fn new(signals: EnvironmentSignals) -> Self {
        let (tx, _rx) = watch::channel(select(&signals));
        Self { tx: Arc::new(tx) }
    }

    /// Latest snapshot.
    pub fn current(&self) -> PolicyContext {
        self.tx.borrow().clone()
    }

    pub fn signals(&self) -> EnvironmentSignals {
        self.tx.borrow().signals.clone()
    }

    /// Replace all signals. Subscribers are only woken when the derived
    /// snapshot actually changes.
    pub fn update(&self, signals: EnvironmentSignals) -> PolicyContext {
        let next = select(&signals);
        let changed = self.tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next.clone();
                true
            }
        });
        if changed {
            info!(
                network = %next.signals.network,
                effective = %next.effective_network,
                power_saving = next.power_saving,
                max_concurrency = next.max_concurrency,
                preload = ?next.preload,
                "policy updated"
            );
        }
        next
    }

    /// Apply one change event to the current signals.
    pub fn modify(&self, change: impl FnOnce(&mut EnvironmentSignals)) -> PolicyContext {
        let mut signals = self.signals();
        change(&mut signals);
        self.update(signals)
    }

    pub fn subscribe(&self) -> watch::Receiver<PolicyContext> {
        self.tx.subscribe()
    }
}
