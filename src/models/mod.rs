pub mod file;
pub mod ids;
pub mod project;
pub mod run;
pub mod template;

pub use file::*;
pub use project::*;
pub use run::*;
pub use template::*;
