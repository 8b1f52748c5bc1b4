//! Market estimation and fee resolution core.
//!
//! - [`market`] synthesizes a canonical page one and keyword market anchors.
//! - [`fees`] resolves marketplace fees through cache, live quote and
//!   category heuristics.
//! - [`margin`] turns a price, sourcing model and fee into margin ranges.
//! - [`spapi`] signs and sends the live fee and token requests.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod fees;
pub mod http;
pub mod margin;
pub mod market;
pub mod measurements;
pub mod metrics;
pub mod models;
pub mod spapi;
