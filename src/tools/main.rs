use clap::Parser;

use code_runner::error::NiceError;
use code_runner::tools::opt::{Opt, Tool};
use code_runner::tools::sandbox::main_sandbox;

fn main() {
    let base_opt = Opt::parse();
    base_opt.logger.enable_log();

    match base_opt.tool {
        Tool::Sandbox(opt) => main_sandbox(opt),
        Tool::InternalSandbox => code_runner::main_sandbox(),
    }
    .nice_unwrap()
}
