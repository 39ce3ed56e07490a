mod access;
mod aggregate;
mod attendance;
mod error;
mod exams;
mod finance;
mod ipc;
mod logging;
mod model;
mod money;
mod persistence;
mod progress;
mod session;
mod store;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

fn main() -> anyhow::Result<()> {
    logging::init();
    // One request runs to completion before the next line is read.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve())
}

async fn serve() -> anyhow::Result<()> {
    let mut state = ipc::AppState::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "halaqad ready");

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => ipc::handle_request(&mut state, req).await,
            Err(e) => {
                tracing::warn!(error = %e, "unparseable request line");
                ipc::bad_json(e.to_string())
            }
        };

        let mut out = serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string());
        out.push('\n');
        stdout.write_all(out.as_bytes()).await?;
        stdout.flush().await?;
    }

    tracing::info!("stdin closed; shutting down");
    Ok(())
}
