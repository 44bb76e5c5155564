//! Core data models shared by the fetcher, normalizer, snapshot store and
//! query service.
//!
//! [`RawRow`] is what a [`SourceFetcher`](crate::source::SourceFetcher)
//! produces; [`Material`] is what the normalizer accepts into a snapshot.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single scalar cell value as delivered by the source, before coercion.
///
/// Serialized untagged so that extra fields round-trip as plain JSON
/// scalars (`null`, `true`, `1.5`, `"text"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Empty,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl RawValue {
    /// Returns `true` for [`RawValue::Empty`] and for whitespace-only text.
    pub fn is_blank(&self) -> bool {
        match self {
            RawValue::Empty => true,
            RawValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawValue::Empty => Ok(()),
            RawValue::Bool(b) => write!(f, "{}", b),
            RawValue::Number(n) => write!(f, "{}", n),
            RawValue::Text(s) => f.write_str(s),
        }
    }
}

/// One raw source record before normalization.
///
/// `position` is the record's place in the source (spreadsheet row number
/// or array index) and is what "source order" refers to. Fields keep the
/// order in which the source delivered them.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub position: usize,
    pub fields: Vec<(String, RawValue)>,
}

impl RawRow {
    pub fn new(position: usize) -> Self {
        Self {
            position,
            fields: Vec::new(),
        }
    }

    /// Builder-style field append, mostly used by tests and the JSON reader.
    pub fn with(mut self, name: impl Into<String>, value: RawValue) -> Self {
        self.fields.push((name.into(), value));
        self
    }

    pub fn push(&mut self, name: impl Into<String>, value: RawValue) {
        self.fields.push((name.into(), value));
    }

    /// Looks up a field by its exact source name.
    pub fn get(&self, name: &str) -> Option<&RawValue> {
        self.fields.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }
}

/// One environmental-impact record for a construction material.
///
/// `uuid` is the primary key inside a snapshot; `id` is the KBOB short
/// code and is not required to be unique. Source columns that do not map
/// to a canonical field are kept verbatim in `extra` and flattened back
/// into the JSON object on output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Material {
    pub id: String,
    pub uuid: String,
    pub group: String,
    pub name: String,
    pub name_fr: String,
    pub disposal: String,
    pub density: f64,
    pub unit: String,
    pub ubp_total: f64,
    pub ubp_production: f64,
    pub ubp_disposal: f64,
    pub ghg_total: f64,
    pub ghg_production: f64,
    pub ghg_disposal: f64,
    #[serde(flatten)]
    pub extra: BTreeMap<String, RawValue>,
}

/// The canonical Material fields a source column can map onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Id,
    Uuid,
    Group,
    Name,
    NameFr,
    Disposal,
    Density,
    Unit,
    UbpTotal,
    UbpProduction,
    UbpDisposal,
    GhgTotal,
    GhgProduction,
    GhgDisposal,
}

impl Field {
    pub const ALL: [Field; 14] = [
        Field::Id,
        Field::Uuid,
        Field::Group,
        Field::Name,
        Field::NameFr,
        Field::Disposal,
        Field::Density,
        Field::Unit,
        Field::UbpTotal,
        Field::UbpProduction,
        Field::UbpDisposal,
        Field::GhgTotal,
        Field::GhgProduction,
        Field::GhgDisposal,
    ];

    /// The camelCase key used in JSON output and configuration.
    pub fn key(self) -> &'static str {
        match self {
            Field::Id => "id",
            Field::Uuid => "uuid",
            Field::Group => "group",
            Field::Name => "name",
            Field::NameFr => "nameFr",
            Field::Disposal => "disposal",
            Field::Density => "density",
            Field::Unit => "unit",
            Field::UbpTotal => "ubpTotal",
            Field::UbpProduction => "ubpProduction",
            Field::UbpDisposal => "ubpDisposal",
            Field::GhgTotal => "ghgTotal",
            Field::GhgProduction => "ghgProduction",
            Field::GhgDisposal => "ghgDisposal",
        }
    }

    /// Resolves a canonical key, ignoring ASCII case.
    pub fn from_key(key: &str) -> Option<Field> {
        Field::ALL
            .iter()
            .copied()
            .find(|f| f.key().eq_ignore_ascii_case(key.trim()))
    }

    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            Field::Density
                | Field::UbpTotal
                | Field::UbpProduction
                | Field::UbpDisposal
                | Field::GhgTotal
                | Field::GhgProduction
                | Field::GhgDisposal
        )
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}
