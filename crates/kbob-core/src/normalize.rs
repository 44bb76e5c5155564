//! Material normalization: raw source rows → validated [`Material`]s.
//!
//! Each row is validated on its own; a bad row is set aside with a
//! [`RejectReason`] and never aborts the run. Accepted materials keep
//! source order.
//!
//! # Rules
//!
//! 1. Source headers map onto canonical fields by camelCase key (ignoring
//!    case) or through configured aliases. Unmapped columns go to `extra`.
//! 2. `uuid` must be non-empty, `group` must be non-empty.
//! 3. `density` must be finite and `>= 0`; every metric must be finite.
//! 4. When two valid rows share a `uuid`, the later one wins and the
//!    earlier one is rejected with [`RejectReason::DuplicateUuid`].

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::models::{Field, Material, RawRow, RawValue};

/// Why a row was kept out of the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum RejectReason {
    #[serde(rename = "MissingUUID")]
    MissingUuid,
    EmptyGroup,
    InvalidNumber,
    #[serde(rename = "DuplicateUUID")]
    DuplicateUuid,
}

impl RejectReason {
    pub fn code(self) -> &'static str {
        match self {
            RejectReason::MissingUuid => "MissingUUID",
            RejectReason::EmptyGroup => "EmptyGroup",
            RejectReason::InvalidNumber => "InvalidNumber",
            RejectReason::DuplicateUuid => "DuplicateUUID",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A row that failed validation, with the offending field when known.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejected {
    pub row: RawRow,
    pub reason: RejectReason,
    pub field: Option<Field>,
}

/// Result of one normalization pass.
#[derive(Debug, Clone, Default)]
pub struct Normalized {
    pub accepted: Vec<Material>,
    pub rejected: Vec<Rejected>,
}

impl Normalized {
    /// Rejected row counts keyed by reason code.
    pub fn rejected_by_reason(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for r in &self.rejected {
            *counts.entry(r.reason.code().to_string()).or_insert(0) += 1;
        }
        counts
    }
}

/// Maps source headers onto canonical fields and validates rows.
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    /// Lower-cased source header → canonical field.
    aliases: HashMap<String, Field>,
}

impl Normalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a header alias (`"UUID-Nummer" → Field::Uuid`).
    pub fn with_alias(mut self, header: &str, field: Field) -> Self {
        self.aliases.insert(header.trim().to_lowercase(), field);
        self
    }

    fn resolve(&self, header: &str) -> Option<Field> {
        self.aliases
            .get(&header.trim().to_lowercase())
            .copied()
            .or_else(|| Field::from_key(header))
    }

    /// Normalize `rows` in source order.
    ///
    /// Deterministic: the same input always yields the same accepted and
    /// rejected sequences.
    pub fn normalize(&self, rows: &[RawRow]) -> Normalized {
        // Slot per input row so a duplicate can be evicted in place.
        let mut slots: Vec<Option<Material>> = Vec::with_capacity(rows.len());
        let mut rejected: Vec<(usize, Rejected)> = Vec::new();
        let mut seen: HashMap<String, usize> = HashMap::new();

        for (idx, row) in rows.iter().enumerate() {
            match self.normalize_row(row) {
                Ok(material) => {
                    if let Some(prev) = seen.insert(material.uuid.clone(), idx) {
                        slots[prev] = None;
                        rejected.push((
                            prev,
                            Rejected {
                                row: rows[prev].clone(),
                                reason: RejectReason::DuplicateUuid,
                                field: Some(Field::Uuid),
                            },
                        ));
                    }
                    slots.push(Some(material));
                }
                Err((reason, field)) => {
                    slots.push(None);
                    rejected.push((
                        idx,
                        Rejected {
                            row: row.clone(),
                            reason,
                            field,
                        },
                    ));
                }
            }
        }

        rejected.sort_by_key(|(idx, _)| *idx);

        Normalized {
            accepted: slots.into_iter().flatten().collect(),
            rejected: rejected.into_iter().map(|(_, r)| r).collect(),
        }
    }

    fn normalize_row(&self, row: &RawRow) -> Result<Material, (RejectReason, Option<Field>)> {
        let mut canonical: HashMap<Field, &RawValue> = HashMap::new();
        let mut extra = BTreeMap::new();

        for (header, value) in &row.fields {
            match self.resolve(header) {
                // First occurrence wins if a sheet repeats a column.
                Some(field) => {
                    canonical.entry(field).or_insert(value);
                }
                None => {
                    if !header.trim().is_empty() {
                        extra.insert(header.clone(), value.clone());
                    }
                }
            }
        }

        let text = |f: Field| -> String {
            canonical
                .get(&f)
                .map(|v| v.to_string().trim().to_string())
                .unwrap_or_default()
        };
        let number = |f: Field| -> Result<f64, (RejectReason, Option<Field>)> {
            canonical
                .get(&f)
                .and_then(|v| coerce_number(v))
                .filter(|n| n.is_finite())
                .ok_or((RejectReason::InvalidNumber, Some(f)))
        };

        let uuid = text(Field::Uuid);
        if uuid.is_empty() {
            return Err((RejectReason::MissingUuid, Some(Field::Uuid)));
        }
        let group = text(Field::Group);
        if group.is_empty() {
            return Err((RejectReason::EmptyGroup, Some(Field::Group)));
        }

        let density = number(Field::Density)?;
        if density < 0.0 {
            return Err((RejectReason::InvalidNumber, Some(Field::Density)));
        }

        Ok(Material {
            id: text(Field::Id),
            uuid,
            group,
            name: text(Field::Name),
            name_fr: text(Field::NameFr),
            disposal: text(Field::Disposal),
            density,
            unit: text(Field::Unit),
            ubp_total: number(Field::UbpTotal)?,
            ubp_production: number(Field::UbpProduction)?,
            ubp_disposal: number(Field::UbpDisposal)?,
            ghg_total: number(Field::GhgTotal)?,
            ghg_production: number(Field::GhgProduction)?,
            ghg_disposal: number(Field::GhgDisposal)?,
            extra,
        })
    }
}

/// Coerce a raw cell into a number.
///
/// Text is trimmed and stripped of Swiss thousands separators (`'`, `’`,
/// spaces). A decimal comma is accepted when no point is present.
/// Returns `None` for blanks, booleans and unparsable text. Non-finite
/// results are returned as-is; the caller decides.
pub fn coerce_number(value: &RawValue) -> Option<f64> {
    match value {
        RawValue::Number(n) => Some(*n),
        RawValue::Text(s) => {
            let cleaned: String = s
                .trim()
                .chars()
                .filter(|c| !matches!(c, '\'' | '’' | ' ' | '\u{a0}' | '\u{202f}'))
                .collect();
            if cleaned.is_empty() {
                return None;
            }
            let cleaned = if cleaned.contains(',') && !cleaned.contains('.') {
                cleaned.replacen(',', ".", 1)
            } else {
                cleaned
            };
            cleaned.parse::<f64>().ok()
        }
        RawValue::Empty | RawValue::Bool(_) => None,
    }
}
