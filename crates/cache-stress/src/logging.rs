use tracing_subscriber::fmt::fmt;
use tracing_subscriber::fmt::time::UtcTime;

#[derive(Debug)]
pub struct Config {
    pub env_filter: String,
    pub json: bool,
}

/// Initializes logging to stderr, so the report on stdout stays readable.
pub fn init(config: Config) {
    let subscriber = fmt()
        .with_timer(UtcTime::rfc_3339())
        .with_target(true)
        .with_env_filter(config.env_filter.as_str())
        .with_writer(std::io::stderr);

    if config.json {
        subscriber
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(true)
            .with_file(true)
            .with_line_number(true)
            .init();
    } else {
        subscriber.init();
    }
}
