//! API Module
//!
//! HTTP handlers and routing for the cache node REST API.
//!
//! # Endpoints
//! - `PUT /set` - Store a key-value pair
//! - `GET /get/:key` - Retrieve a value by key
//! - `DELETE /del/:key` - Delete a key
//! - `GET /stats` - Cache and persistence statistics
//! - `GET /health` - Health check endpoint
//! - `POST /tx` - Begin a transaction
//! - `PUT /tx/:id/set`, `DELETE /tx/:id/del/:key` - Record modifications
//! - `POST /tx/:id/prepare`, `/commit`, `/rollback` - Finish a transaction

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
