//! Max credential capture.
//!
//! Without flags: starts a local Axum HTTP server on port 8080 and opens the
//! browser. The page submits to `/save?token=..&user_id=..`, which writes
//! `max_config.json` to the project root and then shuts the server down.
//!
//! With `--cli`: prompts for the same values in the terminal instead.

use anyhow::{Context, Result};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Html,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::sync::{oneshot, Mutex};

const CREDENTIALS_FILE: &str = "max_config.json";

const INDEX_HTML: &str = r#"<!doctype html>
<html>
  <head><meta charset="utf-8"><title>maxbridge: Max login</title></head>
  <body>
    <h1>Connect your Max account</h1>
    <form action="/save" method="get">
      <p><label>Access token <input name="token" size="60" required></label></p>
      <p><label>User id <input name="user_id" required></label></p>
      <p><button type="submit">Save</button></p>
    </form>
  </body>
</html>
"#;

const SAVED_HTML: &str = r#"<!doctype html>
<html>
  <head><meta charset="utf-8"><title>maxbridge: saved</title></head>
  <body>
    <h1>Saved</h1>
    <p>Credentials stored. You can close this page and start the relay.</p>
  </body>
</html>
"#;

// ── Shared state ───────────────────────────────────────────────────────────────

#[derive(Clone)]
struct AppState {
    credentials_path: PathBuf,
    /// Consumed once when the browser submits valid credentials.
    shutdown_tx: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

// ── Request / file types ───────────────────────────────────────────────────────

#[derive(Deserialize, Default)]
struct SaveParams {
    token: Option<String>,
    user_id: Option<String>,
}

#[derive(Serialize)]
struct SavedCredentials<'a> {
    token: &'a str,
    user_id: &'a str,
}

/// Produces the credentials file body, or `None` if either value is blank.
/// Extracted so it can be unit-tested.
fn credentials_json(token: &str, user_id: &str) -> Option<String> {
    let token = token.trim();
    let user_id = user_id.trim();
    if token.is_empty() || user_id.is_empty() {
        return None;
    }
    serde_json::to_string_pretty(&SavedCredentials { token, user_id }).ok()
}

// ── Handlers ───────────────────────────────────────────────────────────────────

async fn serve_index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn save_credentials(
    State(state): State<AppState>,
    Query(params): Query<SaveParams>,
) -> Result<Html<&'static str>, (StatusCode, &'static str)> {
    let body = credentials_json(
        params.token.as_deref().unwrap_or_default(),
        params.user_id.as_deref().unwrap_or_default(),
    )
    .ok_or((StatusCode::BAD_REQUEST, "token or user_id missing"))?;

    tokio::fs::write(&state.credentials_path, body)
        .await
        .map_err(|_| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "could not write credentials file",
            )
        })?;

    println!(
        "\n✓  Max credentials saved to {}",
        state.credentials_path.display()
    );
    println!("   Start the relay with:  cargo run\n");

    // Signal main to shut down after the response has been sent.
    let tx = state.shutdown_tx.lock().await.take();
    if let Some(tx) = tx {
        tokio::spawn(async move {
            tokio::time::sleep(tokio::time::Duration::from_millis(300)).await;
            let _ = tx.send(());
        });
    }

    Ok(Html(SAVED_HTML))
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(serve_index))
        .route("/save", get(save_credentials))
        .with_state(state)
}

// ── CLI mode ───────────────────────────────────────────────────────────────────

fn run_cli(credentials_path: &Path) -> Result<()> {
    use std::io::{self, Write};

    println!("=== maxbridge: Max credentials ===\n");

    let read_line = |prompt: &str| -> Result<String> {
        print!("{prompt}");
        io::stdout().flush()?;
        let mut buf = String::new();
        io::stdin().read_line(&mut buf)?;
        Ok(buf.trim().to_owned())
    };

    let token = read_line("Max access token: ")?;
    let user_id = read_line("Max user id: ")?;

    let body = credentials_json(&token, &user_id)
        .context("Both the token and the user id are required")?;
    std::fs::write(credentials_path, body)
        .with_context(|| format!("Could not write {}", credentials_path.display()))?;

    println!(
        "\n✓  Max credentials saved to {}",
        credentials_path.display()
    );
    println!("   Start the relay with:  cargo run");
    Ok(())
}

// ── Entry point ────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    // Resolve project root: prefer MAXBRIDGE_ROOT env, fall back to cwd.
    let project_root =
        PathBuf::from(std::env::var("MAXBRIDGE_ROOT").unwrap_or_else(|_| ".".to_string()));
    let credentials_path = project_root.join(CREDENTIALS_FILE);

    if args.iter().any(|a| a == "--cli") {
        return run_cli(&credentials_path);
    }

    // ── Web mode ──────────────────────────────────────────────────────────────
    let port: u16 = 8080;

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let state = AppState {
        credentials_path,
        shutdown_tx: Arc::new(Mutex::new(Some(shutdown_tx))),
    };

    let addr = format!("127.0.0.1:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    println!("Max login page → http://localhost:{port}");
    println!("Press Ctrl-C to exit without saving.\n");

    // Open the browser after a short delay.
    tokio::spawn(async move {
        tokio::time::sleep(tokio::time::Duration::from_millis(400)).await;
        let url = format!("http://localhost:{port}");
        // Try xdg-open (Linux), then open (macOS), ignoring errors.
        let _ = std::process::Command::new("xdg-open").arg(&url).status();
        let _ = std::process::Command::new("open").arg(&url).status();
    });

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .await
        .context("Server error")?;

    Ok(())
}

// ── Tests ──────────────────────────────────────────────────────────────────────
