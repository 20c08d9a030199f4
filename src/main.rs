use std::process::ExitCode;

fn main() -> ExitCode {
    titlecheck_lib::run()
}
