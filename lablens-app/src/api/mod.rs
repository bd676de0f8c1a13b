//! HTTP API handlers for lablens-app

pub mod buildinfo;
pub mod health;
pub mod labels;
pub mod sessions;
pub mod ui;

pub use buildinfo::get_build_info;
pub use health::health_routes;
pub use labels::label_routes;
pub use sessions::session_routes;
pub use ui::ui_routes;
