fn main() {
    if let Err(err) = mermaid_layout_engine::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
