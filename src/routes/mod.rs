pub mod api_routes;
pub mod events;
pub mod extract;
