//! # Collaborators
//!
//! Sibling services that handlers call: the typed error they share, a JSON
//! HTTP client and the REST implementation of every table backend.

pub mod errors;
pub mod http;
pub mod rest;

pub use errors::{CollaboratorError, CollaboratorResult};
pub use http::HttpServiceClient;
pub use rest::RestCollaborators;
