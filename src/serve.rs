use std::{net::SocketAddr, thread};

use axum::Router;
use camino::Utf8PathBuf;
use console::style;
use tower_http::services::ServeDir;
use tracing::info;

use crate::config::Paths;

/// Start the development HTTP server on its own thread. Requests are served
/// from the markup root first, falling back to the project base, which
/// mirrors serving two base directories at once.
pub fn start(paths: &Paths) -> thread::JoinHandle<Result<(), anyhow::Error>> {
    let port = paths.port;
    let html = paths.html.clone();
    let base = paths.base.clone();

    info!(url = %style(format!("http://localhost:{port}/")).yellow(), "starting the dev server");

    thread::spawn(move || {
        let result = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(anyhow::Error::from)
            .and_then(|rt| rt.block_on(serve(port, html, base)));

        // Nobody joins this thread, the watch loop outlives it. Without the
        // log line a failed bind would die silently.
        if let Err(e) = &result {
            tracing::error!("dev server stopped: {e}");
        }
        result
    })
}

async fn serve(port: u16, html: Utf8PathBuf, base: Utf8PathBuf) -> Result<(), anyhow::Error> {
    let address = SocketAddr::from(([127, 0, 0, 1], port));
    let address = tokio::net::TcpListener::bind(address).await?;

    let service = ServeDir::new(html.as_std_path()) //
        .fallback(ServeDir::new(base.as_std_path()));

    let router = Router::new().fallback_service(service);

    axum::serve(address, router).await?;

    Ok(())
}
