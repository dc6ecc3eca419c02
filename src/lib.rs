//! arbiter: an autonomous reasoning kernel.
//!
//! Three coupled subsystems around a shared watchdog:
//!
//! - a hierarchical reasoner that arbitrates proposed actions through an
//!   adaptive 5-level pipeline anchored on an immutable ethics registry,
//! - a quality-filtered memory engine that ingests conversational traffic,
//!   extracts typed facts, and keeps high-value knowledge forever,
//! - an agent health monitor that isolates misbehaving agents and can halt
//!   the whole pipeline.
//!
//! `kernel::Kernel` is the caller surface; everything else is wiring.

pub mod action;
pub mod config;
pub mod ethics;
pub mod events;
pub mod kernel;
pub mod logging;
pub mod memory;
pub mod reasoner;
pub mod watchdog;

pub use action::Action;
pub use config::Config;
pub use kernel::{Collaborators, FeedbackKind, Kernel};
pub use reasoner::synthesis::Decision;
pub use reasoner::ReasoningTrace;
