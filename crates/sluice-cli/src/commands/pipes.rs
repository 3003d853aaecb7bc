use crate::cli::GlobalArgs;
use crate::support::{fail, open_gateway_or_exit, print_json};

pub fn run(global: &GlobalArgs, pipe: Option<String>, exports: bool) {
    let gateway = open_gateway_or_exit(global);
    if exports {
        print_json(&gateway.export_receipts());
        return;
    }
    match pipe {
        Some(pipe_id) => match gateway.pipe_definition(&pipe_id) {
            Some(definition) => print_json(&definition),
            None => fail(format!("pipe not registered: {pipe_id}")),
        },
        None => print_json(&gateway.pipe_definitions()),
    }
}
