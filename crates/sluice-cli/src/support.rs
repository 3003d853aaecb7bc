use crate::cli::GlobalArgs;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sluice_cache::{DurableCache, FileCache};
use sluice_core::{GatewayConfig, IngestGateway};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Load config, open the state file, and rehydrate a gateway from it.
pub fn open_gateway_or_exit(global: &GlobalArgs) -> IngestGateway {
    let config = match &global.config {
        Some(path) => GatewayConfig::load(path).unwrap_or_else(|e| {
            eprintln!("error: failed to load config {}: {e}", path.display());
            std::process::exit(1);
        }),
        None => GatewayConfig::default(),
    };

    let cache = FileCache::open(&global.state).unwrap_or_else(|e| {
        eprintln!(
            "error: failed to open state file {}: {e}",
            global.state.display()
        );
        std::process::exit(1);
    });
    debug!(state = %global.state.display(), "state file opened");
    let backend: Arc<dyn DurableCache> = Arc::new(cache);

    IngestGateway::open(config, Some(backend)).unwrap_or_else(|e| {
        eprintln!("error: invalid config: {e}");
        std::process::exit(1);
    })
}

pub fn read_json_file_or_exit<T>(path: &Path, label: &str) -> T
where
    T: DeserializeOwned,
{
    let bytes = fs::read(path).unwrap_or_else(|e| {
        eprintln!("error: failed to read {label} at {}: {e}", path.display());
        std::process::exit(1);
    });
    serde_json::from_slice(&bytes).unwrap_or_else(|e| {
        eprintln!(
            "error: failed to parse {label} JSON at {}: {e}",
            path.display()
        );
        std::process::exit(1);
    })
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).expect("json serialization")
    );
}

/// Pretty JSON on stderr, for payloads that accompany an error.
pub fn eprint_json<T: Serialize + ?Sized>(value: &T) {
    eprintln!(
        "{}",
        serde_json::to_string_pretty(value).expect("json serialization")
    );
}

pub fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("error: {message}");
    std::process::exit(1);
}
