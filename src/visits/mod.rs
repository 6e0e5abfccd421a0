//! The visit log page: resolve and mask the client address, record the
//! visit, then render the most recent visits.

pub mod client_ip;
pub mod handlers;
pub mod render;
pub mod routes;

pub use handlers::RECENT_VISITS_LIMIT;
pub use routes::create_visit_router;
