//! Example commands built on the `patience` retry engine
//!
//! - [`http`]: HTTP requests with base-URL failover and long polling
//! - [`queue`]: recorded jobs that are deleted once the engine is done with them

#![forbid(unsafe_code)]
#![warn(missing_docs)]
// These are examples, so we don't need to be as pedantic
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::use_self)]

pub mod http;
pub mod queue;
