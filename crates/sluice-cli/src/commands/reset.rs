use crate::cli::GlobalArgs;
use crate::support::{fail, open_gateway_or_exit};

pub fn run(global: &GlobalArgs, yes: bool) {
    if !yes {
        fail("reset drops all gateway state; pass --yes to confirm");
    }
    let gateway = open_gateway_or_exit(global);
    gateway.reset();
    println!("sluice reset\n  State: {}", global.state.display());
}
