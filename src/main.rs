mod cli;

use clap::{Parser, Subcommand};

use cli::build::BuildArgs;
use cli::check::CheckArgs;
use cli::demo::DemoArgs;
use cli::hash::HashArgs;
use cli::simulate::SimulateArgs;

#[derive(Parser)]
#[command(
    name = "aiemesh",
    version,
    about = "Build, verify, simulate and emit object-fifo dataflow graphs"
)]
struct Cli {
    /// Log more (-v info, -vv debug, -vvv trace); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Verify a graph file and emit its module
    Build(BuildArgs),
    /// Verify a graph file without emitting
    Check(CheckArgs),
    /// Run a graph file on the concurrent simulator
    Simulate(SimulateArgs),
    /// Print content hashes of the emitted module and its declarations
    Hash(HashArgs),
    /// Build the three-way join scenario for a device
    Demo(DemoArgs),
}

fn main() {
    let cli = Cli::parse();
    aiemesh::logging::init(cli.verbose);
    match cli.command {
        Command::Build(args) => cli::build::cmd_build(args),
        Command::Check(args) => cli::check::cmd_check(args),
        Command::Simulate(args) => cli::simulate::cmd_simulate(args),
        Command::Hash(args) => cli::hash::cmd_hash(args),
        Command::Demo(args) => cli::demo::cmd_demo(args),
    }
}
