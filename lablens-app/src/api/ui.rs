//! UI serving routes

use axum::{response::Html, routing::get, Router};

use crate::AppState;

const INDEX_HTML: &str = include_str!("../ui/index.html");

/// GET /
pub async fn serve_index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

pub fn ui_routes() -> Router<AppState> {
    Router::new().route("/", get(serve_index))
}
