pub mod error;
pub mod generation;
pub mod models;
pub mod routes;
pub mod store;
pub mod wizard;
