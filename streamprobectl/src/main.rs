use clap::Parser;

fn main() {
    streamprobectl::init_logging();
    let cli = streamprobectl::Cli::parse();
    if let Err(err) = streamprobectl::run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
