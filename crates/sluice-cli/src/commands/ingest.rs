use crate::cli::GlobalArgs;
use crate::support::{eprint_json, fail, open_gateway_or_exit, print_json, read_json_file_or_exit};
use serde_json::json;
use sluice_core::{ContentPush, GatewayError};
use std::path::PathBuf;

pub fn run(global: &GlobalArgs, file: PathBuf, json_output: bool) {
    let push: ContentPush = read_json_file_or_exit(&file, "content push");
    let gateway = open_gateway_or_exit(global);

    let outcome = match gateway.ingest_content(push) {
        Ok(outcome) => outcome,
        Err(GatewayError::AdmissionRefused(refusal)) => {
            let payload = json!({
                "error": "admission_refused",
                "message": refusal.to_string(),
                "pipeId": refusal.pipe_id,
                "availablePipes": refusal.available_pipes,
            });
            if json_output {
                print_json(&payload);
            } else {
                eprintln!("error: {refusal}");
                eprint_json(&payload);
            }
            std::process::exit(1);
        }
        Err(e) => fail(e),
    };

    if json_output {
        print_json(&outcome);
    } else {
        let receipt = &outcome.receipt;
        println!(
            "sluice ingest\n  Run: {}  Pipe: {}\n  Rows: {}\n  Dispatch: {}\n  Matched schema: {}\n  Drift: {}",
            receipt.run_id,
            receipt.pipe_id,
            receipt.row_count,
            receipt.dispatch_id,
            if outcome.matched_schema { "yes" } else { "no (bootstrap)" },
            if receipt.drift {
                receipt.drift_fields.join(", ")
            } else {
                "none".to_string()
            }
        );
    }
}
