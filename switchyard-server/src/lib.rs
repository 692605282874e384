//! Switchyard scheduler service: wiring, the outbox consumer task and the
//! health endpoints.

pub mod app;
pub mod wiring;

pub use app::{AppState, create_app};
pub use wiring::{Services, Stores, build_services};
