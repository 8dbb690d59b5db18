//! Client-side data access for a schemaless JSON/HTTP object store.
//!
//! # Overview
//! `Entity` is a document-like attribute bag with dirty tracking and
//! save/fetch/destroy; `Query` compiles declarative constraints into the
//! store's `where` dialect. Both talk to the server through the `Transport`
//! trait, whose `RestClient` implementation builds `HttpRequest` values and
//! parses `HttpResponse` values while the host executes the round-trip.
//!
//! # Design
//! - Outcomes are reported through return values (`bool`, `Option`, empty
//!   results) plus the transport's last `Outcome`; nothing in the entity or
//!   query surface returns `Err`.
//! - Users share the entity core by composition, and login state is an
//!   explicit `Session` value owned by the caller.
//! - Single-threaded: instances hold no locks and expect one caller at a time.

pub mod config;
pub mod entity;
pub mod error;
pub mod functions;
pub mod http;
pub mod query;
pub mod rest;
pub mod transport;
pub mod user;
pub mod value;

pub use config::ClientConfig;
pub use entity::{Attributes, Entity, Kind};
pub use error::StoreError;
pub use functions::run_function;
pub use http::{HttpExecutor, HttpMethod, HttpRequest, HttpResponse};
pub use query::{Constraint, Operand, Operator, Query, QueryResults, ResultKey};
pub use rest::RestClient;
pub use transport::{Outcome, Transport};
pub use user::{Session, User};
pub use value::Value;
