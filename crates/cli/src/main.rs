use std::process::ExitCode;

fn main() -> ExitCode {
    foms_cli::run()
}
