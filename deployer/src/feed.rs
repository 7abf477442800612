//! A price feed serving a constant USD quote.

use crate::Error;
use axum::{routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;

/// Quote returned by every request.
pub const PRICE: f64 = 1675.58;

/// Body of a price response.
#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct Quote {
    #[serde(rename = "USD")]
    pub usd: f64,
}

async fn price() -> Json<Quote> {
    Json(Quote { usd: PRICE })
}

/// Routes of the feed.
pub fn router() -> Router {
    Router::new().route("/", get(price))
}

/// Serve the feed on `port` (on all interfaces) until the process exits.
pub async fn serve(port: u16) -> Result<(), Error> {
    let address = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(address).await?;
    info!(%address, "serving price feed");
    axum::serve(listener, router()).await?;
    Ok(())
}
