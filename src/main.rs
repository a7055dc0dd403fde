fn main() {
    if let Err(e) = mediasense_lib::run() {
        eprintln!("MediaSense failed to start: {}", e);
        std::process::exit(1);
    }
}
