//! Core search client for Microsoft Active Directory.
//!
//! Three pieces fit together here: a structured filter expression that
//! compiles to an escaped RFC 2254 string (with virtual attributes for
//! in-chain group membership), a paged search driver that streams
//! normalized entries with bounded buffering and reassembles
//! range-limited attributes, and a schema bootstrap that teaches the
//! client each attribute's cardinality and value decoder.
//!
//! ```no_run
//! use adstream_core::{AdHandler, FilterExpr, HandlerConfig, SearchQuery};
//!
//! # async fn demo() -> Result<(), adstream_core::AdError> {
//! let handler = AdHandler::new(HandlerConfig::new(
//!     "ldaps://dc01.example.com",
//!     "svc-search@example.com",
//!     "secret",
//!     "DC=example,DC=com",
//!     "CN=Schema,CN=Configuration,DC=example,DC=com",
//! ))?;
//!
//! let query = SearchQuery::new(FilterExpr::equals("sAMAccountName", "jdoe"))
//!     .select(["cn", "member", "accountExpires"]);
//! let mut results = handler.get_objects(query).await?;
//! while let Some(object) = results.next().await {
//!     println!("{:?}", object?);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod dn;
pub mod error;
pub mod filter;
pub mod handler;
pub mod schema;
pub mod search;
mod transitive;
pub mod value;

pub use config::HandlerConfig;
pub use connection::AdConnection;
pub use error::AdError;
pub use filter::FilterExpr;
pub use handler::AdHandler;
pub use ldap3::Scope;
pub use search::{ObjectStream, SearchQuery, Select};
pub use value::{AdObject, AttributeValue, Decoder, RawValue, Value};
