use crate::cli::GlobalArgs;
use crate::support::{fail, open_gateway_or_exit, print_json};

pub fn run(global: &GlobalArgs, run: Option<String>, pipe: Option<String>, source: Option<String>) {
    let gateway = open_gateway_or_exit(global);
    match (run, pipe, source) {
        (Some(run_id), Some(pipe_id), _) => match gateway.rows(&run_id, &pipe_id) {
            Some(rows) => print_json(&rows),
            None => fail(format!("no buffered rows for {run_id}/{pipe_id}")),
        },
        (_, _, Some(source_id)) => print_json(&gateway.rows_by_source(&source_id)),
        _ => fail("pass --run and --pipe, or --source"),
    }
}
