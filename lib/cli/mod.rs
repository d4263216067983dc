//! Command-line argument parsing and subcommand dispatch (§6): `keppel
//! {api|janitor|health-monitor|test-driver storage}`.

mod args;
mod styles;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use args::*;
pub(crate) use styles::*;
