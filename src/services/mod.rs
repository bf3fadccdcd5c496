pub mod file_service;
pub mod permission_service;
pub mod project_service;
pub mod run_service;
pub mod template_service;

pub use file_service::*;
pub use permission_service::*;
pub use project_service::*;
pub use run_service::*;
pub use template_service::*;

#[cfg(test)]
pub(crate) mod test_support;

#[cfg(test)]
mod permission_tests;
