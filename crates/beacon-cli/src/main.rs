mod cli;
mod logging;

fn main() {
    if let Err(e) = cli::run() {
        let code = exit_code(&e);
        if code != 130 {
            eprintln!("{e:#}"); // pretty anyhow chain
        }
        std::process::exit(code);
    }
}

fn exit_code(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<cli::InterruptedError>().is_some() {
        130
    } else {
        1
    }
}
