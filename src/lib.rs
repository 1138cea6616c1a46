pub mod app_state;
pub mod circulation;
pub mod config;
pub mod errors;
pub mod extract;
pub mod handlers;
pub mod middleware_auth;
pub mod models;
pub mod routes;
pub mod store;
pub mod utils;

pub use app_state::AppState;
pub use circulation::CirculationService;
pub use config::Config;
pub use errors::*;
pub use models::*;
pub use routes::build_router;
pub use utils::*;
