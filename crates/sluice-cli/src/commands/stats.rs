use crate::cli::GlobalArgs;
use crate::support::{open_gateway_or_exit, print_json};

pub fn run(global: &GlobalArgs) {
    print_json(&open_gateway_or_exit(global).stats());
}
