fn main() {
    if let Err(err) = roster_analytics::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
