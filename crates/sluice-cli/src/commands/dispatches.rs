use crate::cli::GlobalArgs;
use crate::support::{fail, open_gateway_or_exit, print_json};

pub fn run(global: &GlobalArgs, id: Option<String>) {
    let gateway = open_gateway_or_exit(global);
    match id {
        Some(dispatch_id) => match gateway.dispatch(&dispatch_id) {
            Some(record) => print_json(&record),
            None => fail(format!("dispatch not tracked: {dispatch_id}")),
        },
        None => print_json(&gateway.dispatches()),
    }
}
