//! Weft, a declarative backend platform.
//!
//! The core is a pair of tightly coupled interpreters over JSON values:
//!
//! - **Transformations** (`transform`): pure value-to-value operator
//!   chains with null bailing and nested sub-chains.
//! - **Scripts** (`script`): labeled step lists composing storage
//!   queries, HTTP requests, transformations, counters and jumps, with
//!   cron/startup activation, a step budget and mutual exclusion.
//!
//! Around them sits a GraphQL-like query layer (`query`) dispatching to
//! pluggable models (`model`, `storage`) with row- and field-level
//! access control (`context`), and an authentication facade (`auth`)
//! issuing bearer tokens.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod model;
pub mod pointer;
pub mod query;
pub mod script;
pub mod server;
pub mod storage;
pub mod transform;

pub use error::{Error, Result};

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
