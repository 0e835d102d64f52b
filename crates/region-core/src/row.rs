//! Rows returned by scans and META lookups

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// One column value of a row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    pub family: Bytes,
    pub qualifier: Bytes,
    pub value: Bytes,
}

/// A row key and its cells
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    pub key: Bytes,
    pub cells: Vec<Cell>,
}

impl Row {
    pub fn new(key: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            cells: Vec::new(),
        }
    }

    /// Append a cell
    pub fn with_cell(
        mut self,
        family: impl Into<Bytes>,
        qualifier: impl Into<Bytes>,
        value: impl Into<Bytes>,
    ) -> Self {
        self.cells.push(Cell {
            family: family.into(),
            qualifier: qualifier.into(),
            value: value.into(),
        });
        self
    }

    /// Value of the first cell matching family and qualifier
    pub fn value(&self, family: &[u8], qualifier: &[u8]) -> Option<&Bytes> {
        self.cells
            .iter()
            .find(|c| c.family.as_ref() == family && c.qualifier.as_ref() == qualifier)
            .map(|c| &c.value)
    }
}
