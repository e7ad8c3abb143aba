use axum::Router;

mod errors;
mod health;
mod resources;

pub use errors::{ErrorBody, HavenAPIError, api_error};
pub use resources::AppState;

pub fn router(state: AppState) -> Router {
    let health = health::router();
    let api = resources::router(state);

    health.merge(api)
}
