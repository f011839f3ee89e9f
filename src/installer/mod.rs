//! Plugin installation core: everything below the terminal collaborator.

pub mod acquire;
pub mod git;
pub mod gitmodules;
pub mod http;
pub mod manifest;
pub mod orchestrator;
pub mod patcher;
