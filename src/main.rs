use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use tabq::{EngineConfig, OperationSpec, TabularEngine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    fmt().with_env_filter(filter).init();

    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    let config = EngineConfig::from_env();
    info!(
        target: "tabq",
        "tabq starting: RUST_LOG='{}', cache_dir='{}', api_base='{}'",
        rust_log,
        config.cache_dir.display(),
        config.api_base
    );

    let mut args = std::env::args().skip(1);
    let resource_id: u64 = match args.next().map(|a| a.parse()) {
        Some(Ok(id)) => id,
        _ => {
            eprintln!("usage: tabq <resource_id> [operation-spec-json]");
            std::process::exit(2);
        }
    };
    let spec: OperationSpec = match args.next() {
        Some(raw) => serde_json::from_str(&raw)?,
        None => OperationSpec::default(),
    };

    let engine = TabularEngine::new(config)?;
    let result = engine.resolve_tabular(resource_id, &spec).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
