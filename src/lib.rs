#![allow(unused_assignments)] // thiserror/miette proc macros trigger false positives

pub mod banner;
pub mod cli;
pub mod command;
pub mod config;
pub mod error;
pub mod logging;
pub mod paths;
pub mod prereq;
pub mod progress;
pub mod provision;
pub mod qm;
