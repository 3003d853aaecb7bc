use crate::cli::GlobalArgs;
use crate::support::{open_gateway_or_exit, print_json};

pub fn run(global: &GlobalArgs, run: Option<String>, snapshot: Option<String>) {
    let gateway = open_gateway_or_exit(global);
    let receipts = match (run, snapshot) {
        (Some(run_id), _) => gateway.receipts_by_run(&run_id),
        (None, Some(snapshot_name)) => gateway.receipts_by_snapshot(&snapshot_name),
        (None, None) => gateway.receipts(),
    };
    print_json(&receipts);
}
