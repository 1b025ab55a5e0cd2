//! aaviondb binary entrypoint.
//!
//! All logic lives in the library; main only maps the CLI result onto
//! the process exit code.

fn main() {
    std::process::exit(aaviondb::cli::run());
}
