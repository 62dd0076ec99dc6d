pub mod common;
pub mod patroni;
pub mod rbac;

pub use patroni::synthesize_workload;
pub use rbac::{PermissionBootstrap, synthesize_permissions};
