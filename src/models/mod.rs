mod competition;
mod payment;
mod project;
mod webhook_log;

pub use competition::*;
pub use payment::*;
pub use project::*;
pub use webhook_log::*;
