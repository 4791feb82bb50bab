mod audit_log;
mod company;
mod course;
mod credential;
mod license;

pub use audit_log::*;
pub use company::*;
pub use course::*;
pub use credential::*;
pub use license::*;
