//! REST surface for staysearch: named query endpoints, ingestion and
//! index inspection over actix-web.

pub mod rest;

pub use rest::{configure, ApiError, AppState, RestApi};
