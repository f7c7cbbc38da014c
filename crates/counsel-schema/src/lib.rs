//! # counsel-schema
//!
//! Declarative schema descriptors compiled into reusable validators.
//!
//! - [`SchemaDescriptor`]: immutable, composable shape description
//! - [`CompiledValidator`]: `check(value) -> Vec<FieldError>`
//! - [`ValidatorCache`]: memoizes compilation by schema id; [`compile`] goes
//!   through the process-wide instance
//!
//! Compilation failures are configuration errors and are meant to surface at
//! startup, when endpoint and event maps are built.

#![deny(unsafe_code)]

pub mod cache;
pub mod descriptor;
pub mod validator;

pub use cache::{ValidatorCache, compile, global_cache};
pub use descriptor::{NumberRules, Property, SchemaDescriptor, SchemaKind, StringRules};
pub use validator::CompiledValidator;
