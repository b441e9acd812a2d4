use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use serde::Serialize;

use crate::error::Store;
use crate::timezone::strip_zone_suffix;

/// One row of a validation query: the join key parts followed by rendered timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedRow {
    pub key: Vec<Option<String>>,
    pub stamps: Vec<Option<String>>,
}

impl RenderedRow {
    pub fn new(key: Vec<Option<String>>, stamps: Vec<Option<String>>) -> Self {
        Self { key, stamps }
    }

    /// A row paired by position only.
    pub fn unkeyed(stamps: Vec<Option<String>>) -> Self {
        Self { key: Vec::new(), stamps }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pairing {
    Positional,
    Keyed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldMismatch {
    /// Index of the source row in its ordered result set.
    pub position: usize,
    pub key: Vec<Option<String>>,
    pub column: String,
    pub source_raw: Option<String>,
    pub source_normalized: Option<String>,
    pub warehouse: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Mismatch {
    Field(FieldMismatch),
    /// A keyed row with no partner on the other side.
    Unpaired {
        #[serde(serialize_with = "store_name")]
        side: Store,
        position: usize,
        key: Vec<Option<String>>,
    },
}

fn store_name<S: serde::Serializer>(store: &Store, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&store.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ValidationOutcome {
    /// Result sets differ in length; nothing was compared.
    CountMismatch {
        source_rows: usize,
        warehouse_rows: usize,
    },
    Compared {
        pairs: usize,
        comparisons: usize,
        mismatches: Vec<Mismatch>,
    },
}

impl ValidationOutcome {
    /// `None` when the counts differed and no per-row result exists.
    pub fn mismatch_count(&self) -> Option<usize> {
        match self {
            ValidationOutcome::CountMismatch { .. } => None,
            ValidationOutcome::Compared { mismatches, .. } => Some(mismatches.len()),
        }
    }

    pub fn comparisons(&self) -> usize {
        match self {
            ValidationOutcome::CountMismatch { .. } => 0,
            ValidationOutcome::Compared { comparisons, .. } => *comparisons,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.mismatch_count() == Some(0)
    }
}

impl fmt::Display for ValidationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationOutcome::CountMismatch {
                source_rows,
                warehouse_rows,
            } => write!(
                f,
                "count differs: source {source_rows} rows, warehouse {warehouse_rows} rows"
            ),
            ValidationOutcome::Compared {
                pairs, mismatches, ..
            } => write!(f, "{} mismatches across {pairs} row pairs", mismatches.len()),
        }
    }
}

/// Compare source renderings (zone suffix still attached) with warehouse renderings.
///
/// `columns` names the timestamp fields in the order they appear in `stamps`.
pub fn compare_rendered(
    source: &[RenderedRow],
    warehouse: &[RenderedRow],
    columns: &[String],
    pairing: Pairing,
) -> ValidationOutcome {
    if source.len() != warehouse.len() {
        return ValidationOutcome::CountMismatch {
            source_rows: source.len(),
            warehouse_rows: warehouse.len(),
        };
    }

    let mut mismatches = Vec::new();
    let mut comparisons = 0;
    let mut pairs = 0;

    match pairing {
        Pairing::Positional => {
            for (position, (s, w)) in source.iter().zip(warehouse).enumerate() {
                pairs += 1;
                comparisons += compare_pair(position, s, w, columns, &mut mismatches);
            }
        }
        Pairing::Keyed => {
            let mut by_key: BTreeMap<&[Option<String>], VecDeque<&RenderedRow>> = BTreeMap::new();
            for w in warehouse {
                by_key.entry(w.key.as_slice()).or_default().push_back(w);
            }

            for (position, s) in source.iter().enumerate() {
                match by_key.get_mut(s.key.as_slice()).and_then(VecDeque::pop_front) {
                    Some(w) => {
                        pairs += 1;
                        comparisons += compare_pair(position, s, w, columns, &mut mismatches);
                    }
                    None => mismatches.push(Mismatch::Unpaired {
                        side: Store::Source,
                        position,
                        key: s.key.clone(),
                    }),
                }
            }

            for (position, w) in warehouse.iter().enumerate() {
                let leftover = by_key
                    .get(w.key.as_slice())
                    .map(|q| q.iter().any(|r| std::ptr::eq(*r, w)))
                    .unwrap_or(false);
                if leftover {
                    mismatches.push(Mismatch::Unpaired {
                        side: Store::Warehouse,
                        position,
                        key: w.key.clone(),
                    });
                }
            }
        }
    }

    ValidationOutcome::Compared {
        pairs,
        comparisons,
        mismatches,
    }
}

fn compare_pair(
    position: usize,
    source: &RenderedRow,
    warehouse: &RenderedRow,
    columns: &[String],
    mismatches: &mut Vec<Mismatch>,
) -> usize {
    let mut compared = 0;
    for (idx, column) in columns.iter().enumerate() {
        let source_raw = source.stamps.get(idx).cloned().flatten();
        let source_normalized = source_raw.as_deref().map(|s| strip_zone_suffix(s).to_string());
        let warehouse_value = warehouse.stamps.get(idx).cloned().flatten();
        compared += 1;

        if source_normalized != warehouse_value {
            mismatches.push(Mismatch::Field(FieldMismatch {
                position,
                key: source.key.clone(),
                column: column.clone(),
                source_raw,
                source_normalized,
                warehouse: warehouse_value,
            }));
        }
    }
    compared
}
