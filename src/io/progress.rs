//! Optional global progress reporting for the separation pipeline.

use once_cell::sync::Lazy;
use std::sync::Mutex;

#[derive(Clone, Debug)]
pub enum SeparationProgress {
    /// A pipeline stage has started.
    Stage(&'static str),
    /// An evaluation checkpoint completed; `si_sdr` is the mean across
    /// sources. Iteration 0 is the score of the unseparated mixture.
    Evaluated { iteration: usize, si_sdr: f64 },
    Finished,
}

type Callback = Box<dyn Fn(SeparationProgress) + Send + Sync>;

static CALLBACK: Lazy<Mutex<Option<Callback>>> = Lazy::new(|| Mutex::new(None));

pub fn set_progress_callback<F>(f: F)
where
    F: Fn(SeparationProgress) + Send + Sync + 'static,
{
    *CALLBACK.lock().expect("progress callback poisoned") = Some(Box::new(f));
}

pub(crate) fn emit_progress(p: SeparationProgress) {
    if let Some(cb) = CALLBACK.lock().expect("progress callback poisoned").as_ref() {
        cb(p);
    }
}
