//! 能力层：能力 trait、注册表、内置能力与输出 schema

pub mod builtin;
pub mod registry;
pub mod schema;

pub use builtin::{builtin_registry, filetree, summarize, SchemaCapability};
pub use registry::{Capability, CapabilityRegistry, CatalogEntry};
pub use schema::{schema_value, FileTreeOutput, SummaryOutput};
