use crate::cli::GlobalArgs;
use crate::support::{fail, open_gateway_or_exit, print_json};

pub fn run(global: &GlobalArgs, pipe: Option<String>) {
    let gateway = open_gateway_or_exit(global);
    match pipe {
        Some(pipe_id) => match gateway.schema_record(&pipe_id) {
            Some(record) => print_json(&record),
            None => fail(format!("no schema recorded for pipe: {pipe_id}")),
        },
        None => print_json(&gateway.schema_registry()),
    }
}
