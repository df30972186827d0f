//! Tree ↔ table mapping engine
//!
//! Leaves first: [`path`] and [`coerce`] are shared by both directions,
//! [`schema`] derives a [`sheet::SheetTopology`], [`flatten`] writes rows
//! across it, and [`unflatten`] rebuilds records while [`source_map`]
//! records where every value came from.

pub mod coerce;
pub mod collection;
pub mod flatten;
pub mod path;
pub mod schema;
pub mod sheet;
pub mod source_map;
pub mod unflatten;

pub use coerce::{convert_type, Conversion, FieldType};
pub use flatten::{FlattenSummary, Flattener, IdentifierChain, ROLL_UP_WARNING};
pub use path::ColumnPath;
pub use schema::{topology_from_schema, SchemaNode, SchemaParser};
pub use sheet::{Sheet, SheetTopology};
pub use source_map::SourceMap;
pub use unflatten::{unflatten, UnflattenOutput, Unflattener};
