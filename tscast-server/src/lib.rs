//! # tscast-server
//!
//! REST control surface for the tscast engine (service mode).
//!
//! Endpoints:
//!
//! - `POST /streams` with `{"source": path, "endpoint": {"ip": addr,
//!   "port": n}}` creates and starts a stream; replies with the stream
//!   record including the assigned id.
//! - `GET /streams` lists the active streams.
//! - `DELETE /streams/{id}` stops and removes a stream.
//!
//! Errors are reported as `{"error": {"code": status, "message": text}}`.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tscast::Caster;
//!
//! #[tokio::main]
//! async fn main() {
//!     let caster = Arc::new(Caster::new(Default::default()).unwrap());
//!     tscast_server::serve(caster, 8080).await.unwrap();
//! }
//! ```

mod routes;

pub use routes::{router, serve};
