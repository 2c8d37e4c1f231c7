//! A blob node: service logic, HTTP surface and server wiring

pub mod http;
pub mod server;
pub mod service;

pub use http::create_router;
pub use server::BlobNode;
pub use service::BlobService;
