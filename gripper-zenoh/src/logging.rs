use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn default_directives(verbosity_level: u8) -> String {
    let level = match verbosity_level {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    // zenoh is very chatty below warn
    format!("{},zenoh=warn", level)
}

/// Install the global subscriber. `RUST_LOG` wins over the verbosity count.
pub fn setup_tracing(verbosity_level: u8, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbosity_level)));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
