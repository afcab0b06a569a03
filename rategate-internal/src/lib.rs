//! Rategate: a distributed API rate limiter in front of a notification
//! gateway. Stateless instances share one view of usage through counters in
//! Redis; plans, clients, and global rules live in Postgres behind a short-
//! lived cache in the same Redis instance.

pub mod config;
pub mod counter_store; // shared counter store (Redis / in-memory)
pub mod domain; // plans, clients, rules
pub mod endpoints; // HTTP surface
pub mod error; // error handling
pub mod gateway_util; // shared application state
pub mod rate_limit; // the admission decision pipeline
pub mod subscription_store; // durable relational store
pub mod util;
