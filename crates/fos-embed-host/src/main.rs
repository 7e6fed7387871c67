//! fOS Embed Host - headless demo
//!
//! Drives one view through the embedding runtime with the headless
//! backend and logs every event it receives.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, bail};
use fos_embed::{Config, HeadlessBackend, HistoryQuery, LoadResult, Runtime};
use tracing_subscriber::EnvFilter;
use url::Url;

const DEMO_PAGE: &str = r#"<html>
  <head><title>fOS Embed Demo</title></head>
  <body>Hello from the engine thread.</body>
</html>"#;

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Parse command line for initial URL
    let initial_url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "https://demo.fos.invalid/".to_string());
    let url = Url::parse(&initial_url).with_context(|| format!("invalid URL: {initial_url}"))?;

    let backend_url = url.clone();
    let runtime = Runtime::init(Config::default(), move || {
        Ok(HeadlessBackend::new().with_document(&backend_url, DEMO_PAGE))
    })
    .context("failed to start the embedding runtime")?;
    tracing::info!("fOS Embed v{} initialized", fos_embed::VERSION);

    let view = runtime.create_view();
    let finished = Arc::new(AtomicBool::new(false));

    runtime.on_title_changed(view, |view, title| tracing::info!(%view, title, "title changed"));
    runtime.on_navigation(view, |view, kind, url| tracing::info!(%view, ?kind, url, "navigation"));
    runtime.on_console(view, |view, msg| {
        tracing::info!(%view, level = ?msg.level, source = %msg.source, "console: {}", msg.message)
    });
    let done = Arc::clone(&finished);
    runtime.on_load_end(view, move |view, url, result| {
        match result {
            LoadResult::Succeeded => tracing::info!(%view, url, "load finished"),
            other => tracing::warn!(%view, url, ?other, "load did not succeed"),
        }
        done.store(true, Ordering::SeqCst);
    });

    runtime.load_url(view, url.as_str())?;

    let deadline = Instant::now() + Duration::from_secs(5);
    while !finished.load(Ordering::SeqCst) {
        if Instant::now() > deadline {
            bail!("timed out waiting for the page to load");
        }
        runtime.pump_ui();
        std::thread::sleep(runtime.config().idle_interval);
    }

    if let Some(title) = runtime.run_js(view, "document.title") {
        tracing::info!(%view, "document.title = {title}");
    }
    runtime.run_js(view, "console.log('hello from script')");
    runtime.can_go_back(view, |answer| {
        tracing::info!(can_go_back = matches!(answer, HistoryQuery::Yes), "history query answered")
    });

    // Let the console event and the history answer arrive
    for _ in 0..10 {
        runtime.pump_ui();
        std::thread::sleep(runtime.config().idle_interval);
    }

    runtime.destroy_view(view);
    runtime.shutdown();

    let stats = runtime.stats(fos_embed::Role::Ui);
    tracing::info!(executed = stats.executed, iterations = stats.iterations, "done");
    Ok(())
}
