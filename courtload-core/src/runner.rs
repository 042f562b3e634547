mod error;
mod gate;
mod progress;
mod run;
mod vu;

pub use error::{Error, Result};
pub use gate::IterationGate;
pub use progress::{LiveMetrics, ProgressFn, ProgressUpdate, ShapeProgress, StageProgress};
pub use run::{RunConfig, RunReport, run_profile};
pub use vu::{StartSignal, VuWork};
