/// Route `log` output to stderr. The filter comes from `FIN_LOG`
/// (e.g. `FIN_LOG=debug`), defaulting to warnings only.
pub fn init() {
    let mut builder = env_logger::Builder::from_env(env_logger::Env::new().filter_or("FIN_LOG", "warn"));
    builder.target(env_logger::Target::Stderr);
    builder.format_timestamp_secs();
    let _ = builder.try_init();
}
