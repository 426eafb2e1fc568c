//! Telemetry datagrams and their CSV row format.
//!
//! Rows follow the fleet export layout:
//! `eventType,registerDate,stopId,odometer,latitude,longitude,taskId,lineId,tripId,unknown1,datagramDate,busId`

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Timestamp layout used both in CSV rows and on the wire.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const TIMESTAMP_FORMAT_NO_SECONDS: &str = "%Y-%m-%d %H:%M";

/// Header row written at the top of a fresh datagram file.
pub const CSV_HEADER: [&str; 12] = [
    "eventType",
    "registerDate",
    "stopId",
    "odometer",
    "latitude",
    "longitude",
    "taskId",
    "lineId",
    "tripId",
    "unknown1",
    "datagramDate",
    "busId",
];

/// Errors raised while decoding a single CSV row.
#[derive(Error, Debug)]
pub enum DatagramParseError {
    #[error("blank record")]
    Blank,

    #[error("expected 12 fields, found {found}")]
    MissingFields { found: usize },

    #[error("field {field}: invalid number {value:?}")]
    InvalidNumber { field: &'static str, value: String },

    #[error("malformed csv: {0}")]
    Csv(#[from] csv::Error),
}

/// A single telemetry sample reported by a bus. Never mutated once parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Datagram {
    pub event_type: String,
    #[serde(default, with = "timestamp")]
    pub register_time: Option<NaiveDateTime>,
    pub stop_id: i64,
    pub odometer_meters: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub task_id: i64,
    pub line_id: i64,
    pub trip_id: i64,
    #[serde(default)]
    pub aux_field: String,
    #[serde(default, with = "timestamp")]
    pub sample_time: Option<NaiveDateTime>,
    pub bus_id: i64,
}

/// Identity of one vehicle's traversal of a route: `(bus_id, trip_id, line_id)`.
pub type TripKey = (i64, i64, i64);

impl Datagram {
    /// Decodes one CSV row.
    ///
    /// Unparseable timestamps are kept as `None` instead of failing the row;
    /// numeric fields are strict.
    pub fn from_csv_line(line: &str) -> Result<Self, DatagramParseError> {
        if line.trim().is_empty() {
            return Err(DatagramParseError::Blank);
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(line.as_bytes());

        let record = match reader.records().next() {
            Some(record) => record?,
            None => return Err(DatagramParseError::Blank),
        };

        if record.len() < CSV_HEADER.len() {
            return Err(DatagramParseError::MissingFields {
                found: record.len(),
            });
        }

        Ok(Datagram {
            event_type: record[0].to_string(),
            register_time: parse_timestamp(&record[1]),
            stop_id: parse_number("stopId", &record[2])?,
            odometer_meters: parse_number("odometer", &record[3])?,
            latitude: parse_number("latitude", &record[4])?,
            longitude: parse_number("longitude", &record[5])?,
            task_id: parse_number("taskId", &record[6])?,
            line_id: parse_number("lineId", &record[7])?,
            trip_id: parse_number("tripId", &record[8])?,
            aux_field: record[9].to_string(),
            sample_time: parse_timestamp(&record[10]),
            bus_id: parse_number("busId", &record[11])?,
        })
    }

    /// Encodes the datagram as a CSV row in header order.
    pub fn to_csv_record(&self) -> [String; 12] {
        [
            self.event_type.clone(),
            format_timestamp(self.register_time),
            self.stop_id.to_string(),
            format!("{:.2}", self.odometer_meters),
            format!("{:.6}", self.latitude),
            format!("{:.6}", self.longitude),
            self.task_id.to_string(),
            self.line_id.to_string(),
            self.trip_id.to_string(),
            self.aux_field.clone(),
            format_timestamp(self.sample_time),
            self.bus_id.to_string(),
        ]
    }

    pub fn trip_key(&self) -> TripKey {
        (self.bus_id, self.trip_id, self.line_id)
    }

    /// True when trip, line and stop ids are all present (positive).
    pub fn has_route_identity(&self) -> bool {
        self.trip_id > 0 && self.line_id > 0 && self.stop_id > 0
    }
}

/// Returns `true` for the header row of a datagram export.
pub fn is_header_line(line: &str) -> bool {
    let lower = line.to_ascii_lowercase();
    lower.contains("eventtype") || lower.contains("registerdate")
}

pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT_NO_SECONDS))
        .ok()
}

fn format_timestamp(ts: Option<NaiveDateTime>) -> String {
    ts.map(|t| t.format(TIMESTAMP_FORMAT).to_string())
        .unwrap_or_default()
}

fn parse_number<T: std::str::FromStr>(
    field: &'static str,
    raw: &str,
) -> Result<T, DatagramParseError> {
    raw.parse().map_err(|_| DatagramParseError::InvalidNumber {
        field,
        value: raw.to_string(),
    })
}

/// Serde adapter: optional timestamps travel as `"YYYY-MM-DD HH:MM:SS"` or `""`.
mod timestamp {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<NaiveDateTime>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_timestamp(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<NaiveDateTime>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.as_deref().and_then(super::parse_timestamp))
    }
}
