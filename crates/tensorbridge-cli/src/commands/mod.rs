//! Subcommands.

pub mod config;
pub mod inspect;
pub mod run;

use clap::ValueEnum;
use tensorbridge_inference::InterpreterOptions;
use tracing::debug;

/// Inference engine to load the model with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EngineKind {
    /// ONNX Runtime (native)
    Ort,
    /// Tract (pure Rust)
    Tract,
}

/// Evaluate `$body` with `$engine` naming the adapter type for `$kind`.
///
/// Engines left out of the build bail with an error instead.
macro_rules! with_engine {
    ($kind:expr, |$engine:ident| $body:expr) => {
        match $kind {
            #[cfg(feature = "native")]
            $crate::commands::EngineKind::Ort => {
                type $engine = tensorbridge_inference::OrtEngine;
                $body
            }
            #[cfg(not(feature = "native"))]
            $crate::commands::EngineKind::Ort => {
                anyhow::bail!("this build of tbridge does not include the ort engine")
            }
            #[cfg(feature = "portable")]
            $crate::commands::EngineKind::Tract => {
                type $engine = tensorbridge_inference::TractEngine;
                $body
            }
            #[cfg(not(feature = "portable"))]
            $crate::commands::EngineKind::Tract => {
                anyhow::bail!("this build of tbridge does not include the tract engine")
            }
        }
    };
}

pub(crate) use with_engine;

/// Options from `--config`, else the default options file, else defaults.
pub fn load_options(config_path: Option<&str>) -> anyhow::Result<InterpreterOptions> {
    if let Some(path) = config_path {
        return Ok(InterpreterOptions::from_file(std::path::Path::new(path))?);
    }
    let default_path = config::default_config_path();
    if default_path.exists() {
        debug!("Using options from {}", default_path.display());
        Ok(InterpreterOptions::from_file(&default_path)?)
    } else {
        Ok(InterpreterOptions::default())
    }
}
