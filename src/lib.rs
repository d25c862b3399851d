pub mod convert;
pub mod error;
pub mod markup;
pub mod query;
pub mod settings;
pub mod subtypes;

#[cfg(feature = "web")]
pub mod karp;
#[cfg(feature = "web")]
pub mod web;

pub use error::{Result, ServiceError};
pub use query::{KarpQuery, OutputFormat, build_query};
pub use settings::{ModeProfile, Settings};
pub use subtypes::SubtypeStore;

#[cfg(feature = "web")]
pub use karp::KarpClient;
