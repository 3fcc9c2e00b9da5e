//! Burst harness for probing a click-tracking server's fraud rules.

pub mod config;
pub mod harness;
pub mod prober;
pub mod report;
pub mod request;
pub mod summary;

pub use config::*;
pub use harness::*;
pub use prober::*;
pub use request::*;
pub use summary::*;
