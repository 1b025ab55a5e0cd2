//! The `aaviondb` binary surface.
//!
//! `run` executes one statement through the shared dispatch core with
//! the implicit full scope (the bootstrap path); `serve` starts the REST
//! gateway. All output is the JSON response envelope; errors never
//! escape as raw panics.

use std::net::SocketAddr;

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};

use aavion_dispatch::Status;
use aavion_utils::Scope;

use crate::runtime::{Runtime, SetupOptions};

#[derive(Parser)]
#[command(
    name = "aaviondb",
    version,
    about = "Content-addressed JSON datastore with versioned entities and preset exports"
)]
struct Cli {
    /// Root data directory (defaults to $AAVIONDB_HOME or ./.aaviondb).
    #[arg(long, global = true)]
    root: Option<Utf8PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute one statement, e.g. `run 'entity show demo hero'`.
    Run {
        /// The statement; quote it so the shell passes it whole.
        statement: Vec<String>,
    },
    /// Serve the REST gateway (requires `api enable` + a granted key).
    Serve {
        /// Listen address.
        #[arg(long, default_value = "127.0.0.1:8471")]
        addr: SocketAddr,
    },
    /// Print the runtime status envelope.
    Status,
}

/// Run the CLI; returns the process exit code.
pub fn run() -> i32 {
    let cli = Cli::parse();
    let runtime = match Runtime::setup(SetupOptions {
        root: cli.root.clone(),
        ..Default::default()
    }) {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("bootstrap failed: {err}");
            return 1;
        }
    };

    match cli.command {
        Command::Run { statement } => {
            let statement = statement.join(" ");
            let response = runtime.execute_statement(&statement, Scope::all());
            print_envelope(&response)
        }
        Command::Status => {
            let response = runtime.execute_statement("status", Scope::all());
            print_envelope(&response)
        }
        Command::Serve { addr } => {
            let result = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .map_err(std::io::Error::from)
                .and_then(|rt| rt.block_on(crate::rest::serve(runtime, addr)));
            match result {
                Ok(()) => 0,
                Err(err) => {
                    eprintln!("gateway failed: {err}");
                    1
                }
            }
        }
    }
}

fn print_envelope(response: &aavion_dispatch::Response) -> i32 {
    match serde_json::to_string_pretty(response) {
        Ok(rendered) => println!("{rendered}"),
        Err(err) => {
            eprintln!("failed to render response: {err}");
            return 1;
        }
    }
    match response.status {
        Status::Ok => 0,
        Status::Error => 1,
    }
}
