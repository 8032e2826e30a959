//! License policies: local validation and grace-period fallback.

pub mod grace;
pub mod local;

pub use grace::GracePolicy;
pub use local::{local_check, LocalEnvironment};
