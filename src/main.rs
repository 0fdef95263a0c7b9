use anyhow::{bail, Context, Result};
use attachment_interceptor::redaction::{RedactingMakeWriter, RedactionPatterns};
use attachment_interceptor::{Interceptor, Valves};
use dotenvy::dotenv;
use serde_json::Value;
use std::io::{self, Read};
use std::sync::Arc;
use tracing::{error, info, info_span};
use tracing_subscriber::{prelude::*, EnvFilter};

const USAGE: &str = "usage: attachment-interceptor <request.json | -> [user.json]";

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file
    dotenv().ok();

    let patterns = Arc::new(RedactionPatterns::new().map_err(|e| {
        eprintln!("Failed to compile regex patterns: {e}");
        e
    })?);
    init_logging(patterns);

    let mut args = std::env::args().skip(1);
    let Some(request_path) = args.next() else {
        bail!(USAGE);
    };
    let user_path = args.next();

    let valves = Valves::load().context("Failed to load valves")?;
    let interceptor = Interceptor::with_http(valves, info_span!("interceptor"));
    interceptor.on_startup().await;

    let body = read_json(&request_path)?;
    let user = user_path.as_deref().map(read_json).transpose()?;

    let body = interceptor.inlet(body, user.as_ref()).await;
    let body = interceptor.outlet(body, user.as_ref()).await;

    match serde_json::to_string_pretty(&body) {
        Ok(out) => println!("{out}"),
        Err(e) => error!(error = %e, "Failed to serialize body"),
    }

    interceptor.on_shutdown().await;
    info!("Done");
    Ok(())
}

fn read_json(path: &str) -> Result<Value> {
    let raw = if path == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read request from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {path}"))?
    };
    serde_json::from_str(&raw).with_context(|| format!("Invalid JSON in {path}"))
}

fn init_logging(patterns: Arc<RedactionPatterns>) {
    let make_writer = RedactingMakeWriter::new(io::stderr, patterns);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(make_writer))
        .init();
}
