pub mod actions;
pub mod agents;
pub mod campaigns;
pub mod error;
pub mod governor;
pub mod handlers;
pub mod leads;
pub mod middleware;
pub mod routes;

pub use error::{ApiError, ErrorResponse};
pub use routes::create_router;
