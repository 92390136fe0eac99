fn main() {
    if let Err(err) = segscore_lib::run() {
        eprintln!("segscore: {err:?}");
        std::process::exit(1);
    }
}
