use std::process::ExitCode;

use ixa_contagion::runner::run_with_args;

fn main() -> ExitCode {
    match run_with_args() {
        Ok((_, summary)) => {
            println!("{summary}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}
