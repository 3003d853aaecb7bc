use crate::cli::GlobalArgs;
use crate::support::{open_gateway_or_exit, print_json};
use std::time::Duration;

pub fn run(global: &GlobalArgs, snapshot: String, gap_secs: Option<u64>) {
    let gateway = open_gateway_or_exit(global);
    let batches = gateway.snapshot_batches(&snapshot, gap_secs.map(Duration::from_secs));
    print_json(&batches);
}
