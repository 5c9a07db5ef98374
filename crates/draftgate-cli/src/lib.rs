//! Draftgate CLI support
//!
//! Input loading and the draft-and-apply simulator behind the `draftgate`
//! binary.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod input;
pub mod simulator;

pub use input::{load_catalog, load_rules};
pub use simulator::{run_simulator, SimulatorConfig, SimulatorReport, TemplateProposer};
