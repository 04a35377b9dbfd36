//! Packet schemas, field locators and telemetry sources

use std::collections::HashMap;
use std::time::Instant;

use serde::Serialize;
use tracing::debug;

use super::layout::{FieldType, Layout, Value};
use crate::error::SchemaError;

/// A run of identical per-entity records inside a payload, e.g. one record per car.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityBlock {
    /// Index of the first field of record 0
    pub first_field: usize,
    /// Fields per record
    pub stride: usize,
    /// Number of records
    pub count: usize,
    /// Field (in the same packet) holding the entity of interest
    pub index_field: usize,
}

/// How a scalar is pulled out of a decoded packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extraction {
    /// Value at a fixed field index
    Direct { index: usize },
    /// Field `field` of the record selected by the block's index field
    IndexedByEntity { field: usize, block: EntityBlock },
}

impl Extraction {
    /// Resolve to a scalar against decoded values
    pub fn extract(&self, values: &[Value]) -> Result<f64, SchemaError> {
        match *self {
            Extraction::Direct { index } => values
                .get(index)
                .map(Value::as_f64)
                .ok_or(SchemaError::MissingValue(index)),
            Extraction::IndexedByEntity { field, block } => {
                let entity = values
                    .get(block.index_field)
                    .and_then(Value::as_index)
                    .ok_or(SchemaError::MissingValue(block.index_field))?;
                if entity >= block.count {
                    return Err(SchemaError::EntityIndexOutOfRange {
                        index: entity,
                        count: block.count,
                    });
                }
                let index = block.first_field + entity * block.stride + field;
                values
                    .get(index)
                    .map(Value::as_f64)
                    .ok_or(SchemaError::MissingValue(index))
            }
        }
    }
}

/// Payload schema for one packet id
#[derive(Debug, Clone)]
pub struct PacketSchema {
    id: u8,
    name: String,
    layout: Layout,
    entities: Option<EntityBlock>,
}

impl PacketSchema {
    pub fn new(id: u8, name: &str, layout: Layout) -> Self {
        Self {
            id,
            name: name.to_string(),
            layout,
            entities: None,
        }
    }

    /// Declare a per-entity record block with entity-indexed extraction
    pub fn with_entities(mut self, block: EntityBlock) -> Self {
        self.entities = Some(block);
        self
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Declared total size in bytes
    pub fn size(&self) -> usize {
        self.layout.size()
    }

    pub fn entities(&self) -> Option<&EntityBlock> {
        self.entities.as_ref()
    }

    pub fn decode(&self, data: &[u8]) -> Result<Vec<Value>, SchemaError> {
        self.layout.decode(data)
    }

    /// Extraction rule for a field name. Names inside the entity block resolve
    /// relative to the selected entity's record.
    pub fn locate(&self, name: &str) -> Option<Extraction> {
        let position = self.layout.position(name)?;

        if let Some(block) = self.entities {
            let end = block.first_field + block.stride;
            if (block.first_field..end).contains(&position) {
                return Some(Extraction::IndexedByEntity {
                    field: position - block.first_field,
                    block,
                });
            }
        }

        Some(Extraction::Direct { index: position })
    }

    fn validate(&self) -> Result<(), SchemaError> {
        if self.layout.is_empty() {
            return Err(SchemaError::InvalidLayout(format!(
                "packet {} has no fields",
                self.id
            )));
        }

        if let Some(block) = self.entities {
            let end = block.first_field + block.stride * block.count;
            if block.stride == 0 || block.count == 0 || end > self.layout.len() {
                return Err(SchemaError::InvalidLayout(format!(
                    "entity block of packet {} exceeds its layout",
                    self.id
                )));
            }
            if block.index_field >= self.layout.len() {
                return Err(SchemaError::InvalidLayout(format!(
                    "entity index field {} of packet {} is out of bounds",
                    block.index_field, self.id
                )));
            }
        }

        Ok(())
    }
}

/// Leading fields shared by every datagram of a source
#[derive(Debug, Clone)]
pub struct HeaderSchema {
    layout: Layout,
    packet_id_field: usize,
}

impl HeaderSchema {
    /// `packet_id_field` names the header field carrying the packet id
    pub fn new(layout: Layout, packet_id_field: &str) -> Result<Self, SchemaError> {
        let packet_id_field = layout.position(packet_id_field).ok_or_else(|| {
            SchemaError::InvalidLayout(format!("header has no field '{}'", packet_id_field))
        })?;
        Ok(Self {
            layout,
            packet_id_field,
        })
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn size(&self) -> usize {
        self.layout.size()
    }

    /// Packet id of a datagram, `None` when it cannot hold a header
    pub fn packet_id(&self, data: &[u8]) -> Option<u8> {
        let values = self.layout.decode(data).ok()?;
        values
            .get(self.packet_id_field)
            .and_then(Value::as_index)
            .and_then(|id| u8::try_from(id).ok())
    }
}

/// Field name resolved once against a source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldLocator {
    pub packet_id: u8,
    pub extraction: Extraction,
    pub field_type: FieldType,
    /// Byte offset of the field (record 0 for entity blocks)
    pub offset: usize,
}

impl FieldLocator {
    pub fn extract(&self, packet: &DecodedPacket) -> Result<f64, SchemaError> {
        self.extraction.extract(&packet.values)
    }
}

/// Catalog entry offered to selection inputs
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    pub field: String,
    pub packet_id: u8,
}

/// Most recent decode of one packet id
#[derive(Debug, Clone)]
pub struct DecodedPacket {
    pub packet_id: u8,
    pub values: Vec<Value>,
    pub received_at: Instant,
}

impl DecodedPacket {
    pub fn new(packet_id: u8, values: Vec<Value>) -> Self {
        Self {
            packet_id,
            values,
            received_at: Instant::now(),
        }
    }
}

/// A telemetry source: header schema plus the payload schemas it emits
#[derive(Debug, Clone)]
pub struct TelemetrySource {
    name: String,
    default_port: u16,
    header: HeaderSchema,
    packets: Vec<PacketSchema>,
    locators: HashMap<String, FieldLocator>,
    catalog: Vec<CatalogEntry>,
}

impl TelemetrySource {
    /// Validate the schemas and precompute every field locator
    pub fn new(
        name: &str,
        default_port: u16,
        header: HeaderSchema,
        packets: Vec<PacketSchema>,
    ) -> Result<Self, SchemaError> {
        let mut locators = HashMap::new();
        let mut catalog = Vec::new();

        for (i, packet) in packets.iter().enumerate() {
            packet.validate()?;
            if packets[..i].iter().any(|p| p.id == packet.id) {
                return Err(SchemaError::DuplicatePacketId(packet.id));
            }

            for field in packet.layout.fields() {
                // First declaration of a name wins
                if locators.contains_key(&field.name) {
                    continue;
                }
                let Some(extraction) = packet.locate(&field.name) else {
                    continue;
                };
                locators.insert(
                    field.name.clone(),
                    FieldLocator {
                        packet_id: packet.id,
                        extraction,
                        field_type: field.ty,
                        offset: field.offset,
                    },
                );
                catalog.push(CatalogEntry {
                    field: field.name.clone(),
                    packet_id: packet.id,
                });
            }
        }

        debug!(
            source = name,
            packets = packets.len(),
            fields = catalog.len(),
            "Telemetry source registered"
        );

        Ok(Self {
            name: name.to_string(),
            default_port,
            header,
            packets,
            locators,
            catalog,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn default_port(&self) -> u16 {
        self.default_port
    }

    pub fn header(&self) -> &HeaderSchema {
        &self.header
    }

    pub fn packets(&self) -> &[PacketSchema] {
        &self.packets
    }

    pub fn packet(&self, id: u8) -> Option<&PacketSchema> {
        self.packets.iter().find(|p| p.id == id)
    }

    pub fn locate(&self, field: &str) -> Option<&FieldLocator> {
        self.locators.get(field)
    }

    /// Field name → packet id, in declaration order
    pub fn catalog(&self) -> &[CatalogEntry] {
        &self.catalog
    }
}
