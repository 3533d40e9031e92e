fn main() {
    if let Err(err) = watchtrail_lib::run() {
        log::error!("watchtrail exited with error: {err:#}");
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
