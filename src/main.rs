use overload_guard::{config::GuardConfig, init_server, init_tracing};
use std::env;
use std::process;

const DEFAULT_CONFIG_PATH: &str = "config/overload.yaml";

#[tokio::main]
async fn main() {
    init_tracing();

    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    let config = match GuardConfig::from_file(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Cannot read limiter policy {}: {}", config_path, e);
            eprintln!(
                "Usage: overload-guard [policy.yaml|policy.json] (default: {})",
                DEFAULT_CONFIG_PATH
            );
            process::exit(1);
        }
    };

    // A policy that cannot be built must never serve unguarded traffic
    if let Err(e) = init_server(config).await {
        eprintln!("Refusing to start, admission policy unusable: {}", e);
        process::exit(1);
    }
}
