pub fn init() {
  pretty_env_logger::formatted_builder()
    .filter_level(log::LevelFilter::Info)
    .parse_default_env()
    .init();
}
