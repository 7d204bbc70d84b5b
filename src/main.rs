use clap::Parser;

use code_runner::error::NiceError;
use code_runner::run::{main_languages, main_run};
use code_runner::{main_serve, Command, Opt};

fn main() {
    let opt = Opt::parse();
    opt.logger.enable_log();

    match opt.command {
        Command::Run(opt) => {
            if !main_run(opt).nice_unwrap() {
                std::process::exit(1);
            }
        }
        Command::Serve(opt) => main_serve(opt).nice_expect("The server failed"),
        Command::Languages(opt) => main_languages(opt).nice_unwrap(),
    }
}
