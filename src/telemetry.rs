use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info";

pub fn init() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(DEFAULT_FILTER)
            .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .compact()
        .try_init()
}
