//! Wire-level specifications exchanged between the driver and its worker processes.

pub mod plan;
pub mod recon;
pub mod region;
pub mod run;
