use clap::Parser;

use super::styles;

//-------------------------------------------------------------------------------------------------
// Types
//-------------------------------------------------------------------------------------------------

/// keppel CLI arguments.
#[derive(Debug, Parser)]
#[command(name = "keppel", author, about, version, styles=styles::styles())]
pub struct KeppelArgs {
    /// The subcommand to run.
    #[command(subcommand)]
    pub subcommand: KeppelSubcommand,
}

/// The subcommands of the keppel CLI (§6).
#[derive(Debug, Parser)]
pub enum KeppelSubcommand {
    /// Runs the registry v2 and `/keppel/v1/` HTTP API server.
    Api {},

    /// Runs the background reconciliation job scheduler.
    Janitor {},

    /// Runs a liveness probe: checks the metadata store and, if reachable, the local API server.
    HealthMonitor {},

    /// Exercises a pluggable driver standalone, without starting any server.
    TestDriver {
        /// Which driver to exercise.
        #[command(subcommand)]
        driver: TestDriverSubcommand,
    },
}

/// Which driver `test-driver` exercises.
#[derive(Debug, Parser)]
pub enum TestDriverSubcommand {
    /// Runs a put/read/delete smoke test against the configured Storage Driver.
    Storage {},
}
