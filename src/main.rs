use kestrel_stage::cli::CliOptions;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let options = match CliOptions::parse_from_env() {
        Ok(parsed) => parsed,
        Err(err) => {
            eprintln!("[cli] {err}");
            std::process::exit(2);
        }
    };
    if let Err(err) = kestrel_stage::run(&options) {
        eprintln!("Application error: {err:?}");
        std::process::exit(1);
    }
}
