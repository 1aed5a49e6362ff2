//! Subcommands.

pub mod check;
pub mod demo;
pub mod exports;
