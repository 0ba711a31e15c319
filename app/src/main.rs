fn main() {
    if let Err(err) = app::run() {
        eprintln!("gcm-send: {err:?}");
        std::process::exit(1);
    }
}
