//! Background grab tasks: per-user polling loops that power on the first
//! matching idle GPU instance.

mod grab_loop;
pub mod matcher;
pub mod metrics;
pub mod registry;

pub use grab_loop::LoopExit;
pub use matcher::{find_candidate, matches_gpu_type};
pub use registry::{GrabTaskRegistry, STOP_GRACE};
