use crate::cli::GlobalArgs;
use crate::support::{fail, open_gateway_or_exit, print_json, read_json_file_or_exit};
use sluice_core::PipeDefinition;
use std::path::PathBuf;

pub fn run(global: &GlobalArgs, file: PathBuf, correlation_id: Option<String>, json_output: bool) {
    let definitions: Vec<PipeDefinition> = read_json_file_or_exit(&file, "pipe definitions");
    let gateway = open_gateway_or_exit(global);

    let receipt = gateway
        .register_structure(definitions, correlation_id.as_deref())
        .unwrap_or_else(|e| fail(format!("structure not registered: {e}")));

    if json_output {
        print_json(&receipt);
    } else {
        println!(
            "sluice register\n  Correlation: {}\n  Pipes: {} ({})\n  Known pipes: {}",
            receipt.correlation_id,
            receipt.pipe_count,
            receipt.pipe_ids.join(", "),
            gateway.pipe_ids().len()
        );
    }
}
