use crate::cli::GlobalArgs;
use crate::support::{fail, open_gateway_or_exit, print_json};
use serde_json::json;
use sluice_core::SignalOutcome;

pub fn run(global: &GlobalArgs, correlation_id: String, json_output: bool) {
    let gateway = open_gateway_or_exit(global);
    let outcome = gateway
        .signal_dispatch(&correlation_id)
        .unwrap_or_else(|e| fail(e));

    if json_output {
        print_json(&json!({
            "action": "dispatch.signal",
            "correlationId": correlation_id,
            "outcome": outcome,
        }));
    } else {
        let note = match outcome {
            SignalOutcome::Dispatched => "dispatched",
            SignalOutcome::AlreadyDispatched => "already dispatched (no change)",
        };
        println!("sluice signal\n  Dispatch: {correlation_id}\n  Outcome: {note}");
    }
}
