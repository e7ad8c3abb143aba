//! Schema inference engine.
//!
//! Maps (schema, payload) pairs to expanded schemas: synthesizes an initial
//! draft 2020-12 schema from a payload, and minimally relaxes an existing
//! schema that rejects a payload so that the payload is accepted without
//! losing any unrelated constraint.

mod apply;
mod classify;
mod errors;
mod expand;
mod synth;
mod validate;

pub use apply::apply_payload;
pub use classify::ValueKind;
pub use errors::{InferenceError, InferenceResult};
pub use expand::expand_schema;
pub use synth::{array_schema, create_schema, object_schema, synth_value};
pub use validate::{Validation, Violation, ViolationKind, check_schema, validate};

/// Draft the engine emits and validates against.
pub const SCHEMA_URI: &str = "https://json-schema.org/draft/2020-12/schema";

/// `$id` stamped onto every synthesized top-level schema.
pub const SCHEMA_ID: &str = "https://movinglake.com/haven.schema.json";
