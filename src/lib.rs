mod error;
mod types;

pub mod core {
    pub mod audio;
    pub mod dsp;
    pub mod engine;
    pub mod pipeline;
}

pub mod eval {
    pub mod bss;
}

pub mod io {
    pub mod progress;
}

// Public API
pub use crate::core::engine::{projection_back, AuxIva, DemixUpdate, SourceModel};
pub use crate::core::pipeline::{
    load_premix, mix_down, reference_channel, separate_to_dir, SeparatedSources, Separator,
};
pub use crate::error::{BssError, Result};
pub use crate::eval::bss::{evaluate, BssScores};
pub use crate::io::progress::{set_progress_callback, SeparationProgress};
pub use crate::types::{AudioData, ScoreTrace, SeparateOptions, SeparationResult};
