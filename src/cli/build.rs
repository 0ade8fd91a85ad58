use std::io::{self, Write};
use std::path::PathBuf;
use std::process;

use clap::Args;

use super::{check_graph, load_or_exit, GraphArgs, LoadedGraph};

#[derive(Args)]
pub struct BuildArgs {
    #[command(flatten)]
    pub graph: GraphArgs,
    /// Write the module here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Check and emit; diagnostics are written to `diagnostics`, never
/// mixed into the returned module text.
pub fn build_module(
    args: &GraphArgs,
    loaded: &LoadedGraph,
    diagnostics: &mut dyn Write,
) -> Option<String> {
    let verified = check_graph(args, loaded, diagnostics)?;
    Some(aiemesh::emit::emit(&verified))
}

pub fn cmd_build(args: BuildArgs) {
    let loaded = load_or_exit(&args.graph);
    let module = match build_module(&args.graph, &loaded, &mut io::stderr()) {
        Some(module) => module,
        None => process::exit(1),
    };

    match args.output {
        Some(path) => {
            if let Err(e) = std::fs::write(&path, &module) {
                eprintln!("error: cannot write '{}': {}", path.display(), e);
                process::exit(1);
            }
            eprintln!("Built -> {}", path.display());
        }
        None => print!("{}", module),
    }
}
