//! F1 23 UDP telemetry
//!
//! Little-endian, packed. Every datagram starts with the 29-byte packet header;
//! payload ids used here are 6 (car telemetry, 22 cars) and 13 (player motion).

use super::layout::{ByteOrder, FieldType, Layout};
use super::packet::{EntityBlock, HeaderSchema, PacketSchema, TelemetrySource};
use crate::error::SchemaError;

pub const NAME: &str = "f1_23";

/// UDP port the game broadcasts on by default
pub const UDP_PORT: u16 = 20777;

pub const CAR_TELEMETRY_ID: u8 = 6;
pub const MOTION_EX_ID: u8 = 13;

/// Cars in a session's telemetry arrays
pub const NUM_CARS: usize = 22;

const WHEELS: [&str; 4] = ["RL", "RR", "FL", "FR"];

fn wheels(prefix: &str) -> Vec<String> {
    WHEELS.iter().map(|w| format!("{prefix}{w}")).collect()
}

fn with_wheels(layout: Layout, prefix: &str, ty: FieldType) -> Layout {
    let names = wheels(prefix);
    let names: Vec<&str> = names.iter().map(String::as_str).collect();
    layout.with_fields(&names, ty)
}

/// `PacketHeader`, 29 bytes
pub fn header_layout() -> Layout {
    Layout::new(ByteOrder::Little)
        .with_field("packetFormat", FieldType::U16)
        .with_field("gameYear", FieldType::U8)
        .with_field("gameMajorVersion", FieldType::U8)
        .with_field("gameMinorVersion", FieldType::U8)
        .with_field("packetVersion", FieldType::U8)
        .with_field("packetId", FieldType::U8)
        .with_field("sessionUID", FieldType::U64)
        .with_field("sessionTime", FieldType::F32)
        .with_field("frameIdentifier", FieldType::U32)
        .with_field("overallFrameIdentifier", FieldType::U32)
        .with_field("playerCarIndex", FieldType::U8)
        .with_field("secondaryPlayerCarIndex", FieldType::U8)
}

/// `CarTelemetryData`, 60 bytes per car
pub fn car_telemetry_layout() -> Layout {
    let layout = Layout::new(ByteOrder::Little)
        .with_field("speed", FieldType::U16)
        .with_field("throttle", FieldType::F32)
        .with_field("steer", FieldType::F32)
        .with_field("brake", FieldType::F32)
        .with_field("clutch", FieldType::U8)
        .with_field("gear", FieldType::I8)
        .with_field("engineRPM", FieldType::U16)
        .with_field("drs", FieldType::U8)
        .with_field("revLightsPercent", FieldType::U8)
        .with_field("revLightsBitValue", FieldType::U16);
    let layout = with_wheels(layout, "brakesTemperature", FieldType::U16);
    let layout = with_wheels(layout, "tyresSurfaceTemperature", FieldType::U8);
    let layout = with_wheels(layout, "tyresInnerTemperature", FieldType::U8);
    let layout = layout.with_field("engineTemperature", FieldType::U16);
    let layout = with_wheels(layout, "tyresPressure", FieldType::F32);
    with_wheels(layout, "surfaceType", FieldType::U8)
}

/// `PacketCarTelemetryData`: header, 22 car records, MFD and gear hints (1352 bytes)
pub fn car_telemetry_packet() -> PacketSchema {
    let header = header_layout();
    let record = car_telemetry_layout();
    let layout = Layout::new(ByteOrder::Little)
        .with_layout(&header)
        .with_repeated(&record, NUM_CARS)
        .with_field("mfdPanelIndex", FieldType::U8)
        .with_field("mfdPanelIndexSecondaryPlayer", FieldType::U8)
        .with_field("suggestedGear", FieldType::I8);

    let index_field = header.position("playerCarIndex").unwrap_or_default();
    PacketSchema::new(CAR_TELEMETRY_ID, "PacketCarTelemetryData", layout).with_entities(
        EntityBlock {
            first_field: header.len(),
            stride: record.len(),
            count: NUM_CARS,
            index_field,
        },
    )
}

/// `PacketMotionExData`: header and 47 floats for the player car (217 bytes)
pub fn motion_ex_packet() -> PacketSchema {
    let mut layout = Layout::new(ByteOrder::Little).with_layout(&header_layout());
    for prefix in [
        "suspensionPosition",
        "suspensionVelocity",
        "suspensionAcceleration",
        "wheelSpeed",
        "wheelSlipRatio",
        "wheelSlipAngle",
        "wheelLatForce",
        "wheelLongForce",
    ] {
        layout = with_wheels(layout, prefix, FieldType::F32);
    }
    let layout = layout.with_fields(
        &[
            "heightOfCOGAboveGround",
            "localVelocityX",
            "localVelocityY",
            "localVelocityZ",
            "angularVelocityX",
            "angularVelocityY",
            "angularVelocityZ",
            "angularAccelerationX",
            "angularAccelerationY",
            "angularAccelerationZ",
            "frontWheelsAngle",
        ],
        FieldType::F32,
    );
    let layout = with_wheels(layout, "wheelVertForce", FieldType::F32);

    PacketSchema::new(MOTION_EX_ID, "PacketMotionExData", layout)
}

pub fn source() -> Result<TelemetrySource, SchemaError> {
    let header = HeaderSchema::new(header_layout(), "packetId")?;
    TelemetrySource::new(
        NAME,
        UDP_PORT,
        header,
        vec![car_telemetry_packet(), motion_ex_packet()],
    )
}
