use std::env;

use skill_basin::{cli, logging};

fn main() {
    logging::init_logging();
    let args: Vec<String> = env::args().collect();
    std::process::exit(cli::run_with_args(&args));
}
