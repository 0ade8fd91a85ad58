use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use clap::Args;

use aiemesh::sim::{simulate_blocking, SimConfig, StallPolicy};

use super::{check_or_exit, load_or_exit, GraphArgs};

#[derive(Args)]
pub struct SimulateArgs {
    #[command(flatten)]
    pub graph: GraphArgs,
    /// Host data as a JSON object of channel name to flat value list
    #[arg(long)]
    pub inputs: Option<PathBuf>,
    /// Fail an acquire after waiting this long; 0 waits forever
    #[arg(long, default_value_t = 2000)]
    pub stall_ms: u64,
    /// Refuse programs running more iterations than this
    #[arg(long, default_value_t = 1 << 20)]
    pub max_iterations: u64,
}

pub fn read_inputs(path: &Path) -> Result<BTreeMap<String, Vec<i64>>, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read '{}': {}", path.display(), e))?;
    serde_json::from_str(&text).map_err(|e| format!("cannot parse '{}': {}", path.display(), e))
}

pub fn stall_policy(stall_ms: u64) -> StallPolicy {
    if stall_ms == 0 {
        StallPolicy::Block
    } else {
        StallPolicy::FailAfter(Duration::from_millis(stall_ms))
    }
}

pub fn cmd_simulate(args: SimulateArgs) {
    let loaded = load_or_exit(&args.graph);
    let verified = check_or_exit(&args.graph, &loaded);

    let inputs = match &args.inputs {
        Some(path) => match read_inputs(path) {
            Ok(inputs) => inputs,
            Err(msg) => {
                eprintln!("error: {}", msg);
                process::exit(1);
            }
        },
        None => BTreeMap::new(),
    };
    let config = SimConfig {
        stall: stall_policy(args.stall_ms),
        max_iterations: args.max_iterations,
        inputs,
    };

    match simulate_blocking(&verified, &config) {
        Ok(report) => {
            match serde_json::to_string_pretty(&report) {
                Ok(json) => println!("{}", json),
                Err(e) => {
                    eprintln!("error: cannot serialize report: {}", e);
                    process::exit(1);
                }
            }
            eprintln!("OK: {}", args.graph.input.display());
        }
        Err(err) => {
            eprintln!("error[{}]: {}", err.code(), err);
            process::exit(1);
        }
    }
}
