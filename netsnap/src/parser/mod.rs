pub mod kicad;
pub mod schema;
pub mod sexp;

// Re-export for convenience
pub use kicad::{LoadedDocument, ParseError, SchematicLoader};
pub use schema::*;
pub use sexp::{SExp, SExpError, SExpParser};
