pub mod check;
pub mod error;
pub mod manifest;
pub mod runtime;
pub mod test_utils;

pub use check::{CheckSettings, CheckState, CheckTarget, ConfigCheck};
pub use error::{CheckError, RuntimeError};
pub use runtime::{CheckObject, CheckRuntime, KubeCheckRuntime, PodPhase};
