//! Command-line front end.
//!
//! Routes a single task from the command line, printing the event stream as
//! SSE frames on stdout followed by the final outcome as pretty JSON.
//! Backend endpoints and credentials come from `ATELIER_*` environment
//! variables.

use std::io::Write;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use atelier::events::sse_encode;
use atelier::{channel, OrchestratorConfig, Task, TaskRouter};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let text = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if text.is_empty() {
        eprintln!("usage: atelier <task text>");
        std::process::exit(2);
    }

    let config = OrchestratorConfig::from_env();
    let router = TaskRouter::from_config(config);
    let task = Task::new(text);
    let (sink, mut stream) = channel();

    let printer = tokio::spawn(async move {
        let mut out = std::io::stdout();
        while let Some(event) = stream.next().await {
            let _ = out.write_all(sse_encode(&event).as_bytes());
            let _ = out.flush();
        }
    });

    let result = router.route(&task, &sink, &CancellationToken::new()).await;
    drop(sink);
    let _ = printer.await;

    let outcome = result.context("task failed")?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}
