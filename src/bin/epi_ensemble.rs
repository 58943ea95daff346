use std::process::ExitCode;

use ixa_ensemble::runner::run_with_args;

fn main() -> ExitCode {
    match run_with_args() {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("epi-ensemble: {e}");
            ExitCode::FAILURE
        }
    }
}
