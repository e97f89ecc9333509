use quarry::cli::QuarryCli;

fn main() {
    let cli = QuarryCli::parse();
    if let Err(e) = cli.run() {
        eprintln!("quarry error: {e:#}");
        std::process::exit(1);
    }
}
