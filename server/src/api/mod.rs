use std::sync::Arc;

use axum::{routing::get, Router};

use crate::Server;

mod ws;

/// HTTP surface: a health probe and the three websocket upgrade
/// endpoints. Everything interesting happens after the upgrade.
pub struct Api {
    server: Arc<Server>,
}

impl Api {
    pub fn new(server: Arc<Server>) -> Self {
        Self { server }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/healthz", get(healthz))
            .route("/ws/solo", get(ws::solo_ws))
            .route("/ws/match", get(ws::match_ws))
            .route("/ws/puzzle", get(ws::puzzle_ws))
            .with_state(self.server.clone())
    }
}

async fn healthz() -> &'static str {
    "ok"
}
