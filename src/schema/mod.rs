//! Packet schema registry
//!
//! Static binary layouts per telemetry source. A source is selected by name;
//! there is no auto-detection.

pub mod f1_23;
pub mod layout;
pub mod packet;

pub use layout::{ByteOrder, FieldDef, FieldType, Layout, Value};
pub use packet::{
    CatalogEntry, DecodedPacket, EntityBlock, Extraction, FieldLocator, HeaderSchema,
    PacketSchema, TelemetrySource,
};

use crate::error::SchemaError;

/// Names of the sources that can be selected
pub fn available_sources() -> &'static [&'static str] {
    &[f1_23::NAME]
}

/// Build a source by name
pub fn load_source(name: &str) -> Result<TelemetrySource, SchemaError> {
    match name {
        f1_23::NAME => f1_23::source(),
        _ => Err(SchemaError::UnknownSource(name.to_string())),
    }
}
