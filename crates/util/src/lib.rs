//! Helpers shared by the roundtable crates: dotted-path JSON access, atomic
//! file persistence, configuration interpolation, secret redaction, and the
//! HTTP plumbing steps use to talk to workers.

pub mod atomic_write;
pub mod http;
pub mod interpolation;
pub mod json_path;
pub mod path_processing;
pub mod text_processing;

pub use atomic_write::write_atomic;
pub use interpolation::{InterpolationError, interpolate_env, interpolate_json};
pub use json_path::{PathError, insert_path, lookup_path, split_path};
pub use path_processing::{expand_tilde, expand_tilde_path};
pub use text_processing::redact_sensitive;
