//! Runtime DWARF introspection and function interception for a forked-process unit test harness.
//!
//! A process walks its own debug info to enumerate compile units, functions, and variables
//! ([`dwarf`], [`state`]), maps addresses back to source entities, and replaces arbitrary
//! functions with mocks at runtime ([`intercept`]). A syslog classifier facade ([`classify`],
//! [`syslog`]) and a test hierarchy with fixtures and parameter axes ([`testnode`]) sit on top,
//! the pieces a unit-test runner built on this crate would assemble into a harness.
//!
//! See `DESIGN.md` for the per-module grounding ledger and the ambient-stack rationale (errors,
//! logging, config, object reading).

pub mod classify;
pub mod config;
pub mod dwarf;
pub mod error;
pub mod intercept;
pub mod object;
pub mod platform;
pub mod plt;
pub mod state;
pub mod syslog;
pub mod testnode;

pub use config::Config;
pub use error::{Error, Event};
pub use platform::{LinuxPlatform, Platform};
pub use state::State;
