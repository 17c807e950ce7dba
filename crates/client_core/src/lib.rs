//! Admin-side client for the content collections: a generic
//! [`CollectionController`] over any [`CollectionBackend`], plus the HTTP
//! backend that speaks the server's envelope API.

pub mod backend;
pub mod controller;
pub mod error;

pub use backend::{CollectionBackend, HttpBackend};
pub use controller::{
    CollectionController, ConfirmAction, ConfirmPrompt, Direction, DraftId, EditState, Entry,
    FilterCriteria, LoadState, Notification, RecordKey, SaveTarget,
};
pub use error::{ControllerError, FieldError};

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod controller_tests;

#[cfg(test)]
#[path = "tests/http_backend_tests.rs"]
mod http_backend_tests;
