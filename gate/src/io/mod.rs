//! I/O adapters for the gate: manifests, processes, source trees and git.

pub mod config;
pub mod git;
pub mod manifest;
pub mod process;
pub mod source;
