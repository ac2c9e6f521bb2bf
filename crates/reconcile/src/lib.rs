//! Skala horizontal reconciler: compare-then-converge against the scale
//! subresource of the target workload.

#![forbid(unsafe_code)]

pub mod horizontal;
pub mod scaler;
pub mod worker;

pub use horizontal::{HorizontalReconciler, ProcessResult, SyncError};
pub use scaler::{KubeScaleClient, ScaleClient, ScaleHandle, ScaleTarget};
pub use worker::{ReconcileOutcome, Worker};
