pub mod cron;
pub mod storage;

pub use cron::*;
pub use storage::*;
