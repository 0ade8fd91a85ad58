use std::process;

use clap::Args;

use aiemesh::device::DeviceConfig;
use aiemesh::diagnostic::Diagnostic;
use aiemesh::graph::verify;
use aiemesh::sim::{simulate_blocking, SimConfig};
use aiemesh::CompileOptions;

#[derive(Args)]
pub struct DemoArgs {
    /// Device to build for
    #[arg(default_value = "npu1_1col")]
    pub device: String,
    /// Also run the simulator and summarize what the host drained
    #[arg(long)]
    pub simulate: bool,
}

fn fail(diagnostics: &[Diagnostic]) -> ! {
    // the demo has no graph file to point into
    for diag in diagnostics {
        eprintln!("error[{}]: {}", diag.code, diag.message);
        for note in &diag.notes {
            eprintln!("  note: {}", note);
        }
    }
    process::exit(1);
}

pub fn cmd_demo(args: DemoArgs) {
    let device = match DeviceConfig::resolve(&args.device) {
        Ok(device) => device,
        Err(diag) => fail(&[diag]),
    };
    let graph = match aiemesh::demo::join_l2(device, CompileOptions::default()) {
        Ok(graph) => graph,
        Err(diagnostics) => fail(&diagnostics),
    };
    let verified = match verify(graph) {
        Ok(verified) => verified,
        Err(diagnostics) => fail(&diagnostics),
    };
    print!("{}", aiemesh::emit::emit(&verified));

    if args.simulate {
        match simulate_blocking(&verified, &SimConfig::default()) {
            Ok(report) => {
                for (channel, values) in &report.outputs {
                    let sum: i64 = values.iter().sum();
                    eprintln!("{}: {} values, sum {}", channel, values.len(), sum);
                }
                eprintln!("{} join grants", report.grants.len());
            }
            Err(err) => {
                eprintln!("error[{}]: {}", err.code(), err);
                process::exit(1);
            }
        }
    }
}
