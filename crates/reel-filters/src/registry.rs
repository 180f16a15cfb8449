//! Build a [`FilterChain`] from declarative settings.
//!
//! Only the filters present in [`FilterSettings`] are constructed; a run
//! that never dedups never pays for a deduplicator.

use serde::{Deserialize, Serialize};

use reel_core::error::{EngineError, Result};
use reel_core::filter::{FilterChain, Interpolator, SceneChangeDetector};

use crate::dedup::{DEFAULT_SAMPLE_SIZE, ThumbnailDeduplicator};
use crate::denoise::KernelDenoiser;
use crate::interpolate::BlendInterpolator;
use crate::methods::{
    DedupMethod, DenoiseMethod, InterpolateMethod, SceneChangeMethod, UpscaleMethod,
};
use crate::scene::HistogramSceneDetector;
use crate::upscale::PixelUpscaler;

/// MSE threshold used by the upscaler's skip detector.
const UPSCALE_SKIP_MSE: f64 = 1.0;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DedupSettings {
    pub method: DedupMethod,
    pub sensitivity: f64,
    pub sample_size: u32,
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self {
            method: DedupMethod::Ssim,
            sensitivity: 35.0,
            sample_size: DEFAULT_SAMPLE_SIZE,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SceneChangeSettings {
    pub method: SceneChangeMethod,
    pub sensitivity: f64,
}

impl Default for SceneChangeSettings {
    fn default() -> Self {
        Self {
            method: SceneChangeMethod::Differential,
            sensitivity: 50.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DenoiseSettings {
    pub method: DenoiseMethod,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpscaleSettings {
    pub method: UpscaleMethod,
    pub factor: u32,
    /// Reuse the previous output for duplicate inputs.
    pub skip: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InterpolateSettings {
    pub method: InterpolateMethod,
    pub factor: u32,
}

/// Which filters a run uses, and how each is configured.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSettings {
    pub dedup: Option<DedupSettings>,
    pub scene_change: Option<SceneChangeSettings>,
    pub denoise: Option<DenoiseSettings>,
    pub upscale: Option<UpscaleSettings>,
    pub interpolate: Option<InterpolateSettings>,
}

impl FilterSettings {
    pub fn interpolation_factor(&self) -> u32 {
        self.interpolate.as_ref().map_or(1, |i| i.factor)
    }

    pub fn upscale_factor(&self) -> u32 {
        self.upscale.as_ref().map_or(1, |u| u.factor)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(up) = &self.upscale
            && up.factor < 2
        {
            return Err(EngineError::InvalidConfig(format!(
                "upscale factor must be at least 2, got {}",
                up.factor
            )));
        }
        if let Some(interp) = &self.interpolate
            && interp.factor < 2
        {
            return Err(EngineError::InvalidConfig(format!(
                "interpolation factor must be at least 2, got {}",
                interp.factor
            )));
        }
        if let Some(dedup) = &self.dedup
            && !(dedup.sensitivity.is_finite() && dedup.sensitivity >= 0.0)
        {
            return Err(EngineError::InvalidConfig(format!(
                "dedup sensitivity must be a non-negative number, got {}",
                dedup.sensitivity
            )));
        }
        Ok(())
    }
}

/// Construct the requested filters.
pub fn build_filter_chain(settings: &FilterSettings) -> Result<FilterChain> {
    settings.validate()?;
    let mut chain = FilterChain::default();

    if let Some(s) = &settings.dedup {
        chain.dedup = Some(Box::new(ThumbnailDeduplicator::from_sensitivity(
            s.method,
            s.sensitivity,
            s.sample_size,
        )));
    }
    if let Some(s) = &settings.scene_change {
        let detector: Box<dyn SceneChangeDetector> = match s.method {
            SceneChangeMethod::Differential => {
                Box::new(HistogramSceneDetector::from_sensitivity(s.sensitivity))
            }
        };
        chain.scene_change = Some(detector);
    }
    if let Some(s) = &settings.denoise {
        chain.denoise = Some(Box::new(KernelDenoiser::new(s.method)));
    }
    if let Some(s) = &settings.upscale {
        let mut upscaler = PixelUpscaler::new(s.method, s.factor)?;
        if s.skip {
            upscaler = upscaler.with_skip_detector(ThumbnailDeduplicator::new(
                DedupMethod::Mse,
                UPSCALE_SKIP_MSE,
                DEFAULT_SAMPLE_SIZE,
            ));
        }
        chain.upscale = Some(Box::new(upscaler));
    }
    if let Some(s) = &settings.interpolate {
        let interpolator: Box<dyn Interpolator> = match s.method {
            InterpolateMethod::Blend => Box::new(BlendInterpolator::new(s.factor)?),
        };
        chain.interpolate = Some(interpolator);
    }

    tracing::info!(stages = ?chain.describe(), "Filter chain built");
    Ok(chain)
}
