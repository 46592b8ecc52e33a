//! HTTP controllers
//!
//! `callback` is the endpoint hubs talk to, `subscriptions` the operator
//! API under `/api`.

pub mod callback;
pub mod subscriptions;
