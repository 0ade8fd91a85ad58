use clap::Args;

use aiemesh::emit::{declaration_fingerprints, emit, module_fingerprint, short_hex};

use super::{check_or_exit, load_or_exit, GraphArgs};

#[derive(Args)]
pub struct HashArgs {
    #[command(flatten)]
    pub graph: GraphArgs,
    /// Show full 256-bit hashes instead of short form
    #[arg(long)]
    pub full: bool,
}

pub fn cmd_hash(args: HashArgs) {
    let loaded = load_or_exit(&args.graph);
    let verified = check_or_exit(&args.graph, &loaded);
    let show = |hash: &blake3::Hash| {
        if args.full {
            hash.to_hex().to_string()
        } else {
            short_hex(hash)
        }
    };

    let module = module_fingerprint(&emit(&verified));
    eprintln!("Module: {} {}", show(&module), args.graph.input.display());
    for (name, hash) in declaration_fingerprints(&verified) {
        println!("  {} {}", show(&hash), name);
    }
}
