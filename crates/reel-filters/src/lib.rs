#![doc = include_str!("../README.md")]

pub mod dedup;
pub mod denoise;
pub mod interpolate;
pub mod methods;
pub mod registry;
pub mod scene;
mod thumbnail;
pub mod upscale;

pub use methods::{DedupMethod, DenoiseMethod, InterpolateMethod, SceneChangeMethod, UpscaleMethod};
pub use registry::{
    DedupSettings, DenoiseSettings, FilterSettings, InterpolateSettings, SceneChangeSettings,
    UpscaleSettings, build_filter_chain,
};
