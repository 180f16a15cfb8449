//! Closed sets of filter method names.
//!
//! Every method enum parses with [`FromStr`](std::str::FromStr) and fails
//! with [`EngineError::UnknownMethod`] on anything it does not know.

use reel_core::error::EngineError;

macro_rules! method_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $kind:literal {
            $( $(#[$vmeta:meta])* $variant:ident => $text:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        pub enum $name {
            $( $(#[$vmeta])* #[serde(rename = $text)] $variant ),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub const fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = EngineError;

            fn from_str(s: &str) -> Result<Self, EngineError> {
                let lowered = s.trim().to_ascii_lowercase();
                Self::ALL
                    .iter()
                    .copied()
                    .find(|m| m.as_str() == lowered)
                    .ok_or_else(|| {
                        let names: Vec<&str> = Self::ALL.iter().map(|m| m.as_str()).collect();
                        EngineError::unknown_method($kind, s, &names)
                    })
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

method_enum! {
    /// Duplicate-frame metric.
    DedupMethod, "dedup method" {
        /// Mean squared error of luma thumbnails.
        Mse => "mse",
        /// Global structural similarity of luma thumbnails.
        Ssim => "ssim",
    }
}

method_enum! {
    /// Scene-cut detector.
    SceneChangeMethod, "scene change method" {
        /// Luma histogram distance between consecutive frames.
        Differential => "differential",
    }
}

method_enum! {
    DenoiseMethod, "denoise method" {
        Box => "box",
        Median => "median",
    }
}

method_enum! {
    UpscaleMethod, "upscale method" {
        Nearest => "nearest",
        Bilinear => "bilinear",
    }
}

method_enum! {
    InterpolateMethod, "interpolate method" {
        /// Linear cross-fade between neighbouring frames.
        Blend => "blend",
    }
}
