//! runtarget: declarative ML environments and compute targets.
//!
//! Resources are declared in `runtarget.yaml` and resolved get-or-create
//! against a workspace registry: reuse what is registered, create what is
//! missing, never create a name twice.

pub mod cli;
pub mod core;
pub mod logging;
pub mod provenance;
pub mod registry;
