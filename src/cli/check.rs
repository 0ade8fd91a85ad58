use clap::Args;

use super::{check_or_exit, load_or_exit, GraphArgs};

#[derive(Args)]
pub struct CheckArgs {
    #[command(flatten)]
    pub graph: GraphArgs,
}

pub fn cmd_check(args: CheckArgs) {
    let loaded = load_or_exit(&args.graph);
    let verified = check_or_exit(&args.graph, &loaded);
    let warnings = verified.warnings().len();
    if warnings == 0 {
        eprintln!("OK: {}", args.graph.input.display());
    } else {
        eprintln!(
            "OK: {} ({} warning{})",
            args.graph.input.display(),
            warnings,
            if warnings == 1 { "" } else { "s" }
        );
    }
}
