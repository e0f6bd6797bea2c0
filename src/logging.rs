use std::{
    fs::OpenOptions,
    path::PathBuf,
    sync::Mutex,
};

use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INITIALISED: OnceCell<()> = OnceCell::new();

#[derive(Debug, Clone)]
pub struct LogOptions {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    pub log_file: Option<PathBuf>,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            filter: "vendingbench=info".to_string(),
            log_file: None,
        }
    }
}

impl LogOptions {
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }
}

/// Installs the process-wide subscriber. Later calls are no-ops, and a
/// subscriber installed elsewhere is left in place.
pub fn init_logging(options: &LogOptions) -> std::io::Result<()> {
    INITIALISED.get_or_try_init(|| install(options)).map(|_| ())
}

fn install(options: &LogOptions) -> std::io::Result<()> {
    let file_layer = match &options.log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&options.filter));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .try_init();
    Ok(())
}
