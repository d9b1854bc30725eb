use clap::Parser;
use fundledger::cli::{Cli, run};

fn main() -> std::process::ExitCode {
    run(Cli::parse())
}
