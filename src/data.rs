//! Column-oriented raw tables and validation utilities used by the tree builder.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{RdsError, Result};

/// A single named column: either free text or numeric cells, any of which may be missing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Column {
    /// Text cells such as identifiers or coupon codes.
    Text(Vec<Option<String>>),
    /// Numeric cells such as degrees or coordinates.
    Numeric(Vec<Option<f64>>),
}

impl Column {
    /// Number of cells in the column.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(values) => values.len(),
            Self::Numeric(values) => values.len(),
        }
    }

    /// Returns `true` when the column holds no cells.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads a cell as text. Integral numbers render without a fractional part so that
    /// numeric coupon columns match text ones (`101.0` reads as `"101"`). Empty strings
    /// and NaN are treated as missing.
    pub fn text(&self, row: usize) -> Option<String> {
        match self {
            Self::Text(values) => values[row]
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_owned),
            Self::Numeric(values) => values[row].filter(|v| v.is_finite()).map(|value| {
                if value.fract() == 0.0 && value.abs() < 1e15 {
                    format!("{}", value as i64)
                } else {
                    value.to_string()
                }
            }),
        }
    }

    /// Reads a numeric cell; NaN is reported as missing. Returns `None` for text columns.
    pub fn number(&self, row: usize) -> Option<f64> {
        match self {
            Self::Numeric(values) => values[row].filter(|v| !v.is_nan()),
            Self::Text(_) => None,
        }
    }

    /// Returns `true` for numeric columns.
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Numeric(_))
    }

    /// Copies the cells at `rows` (in that order) into a new column.
    pub(crate) fn select(&self, rows: &[usize]) -> Self {
        match self {
            Self::Text(values) => Self::Text(rows.iter().map(|&r| values[r].clone()).collect()),
            Self::Numeric(values) => Self::Numeric(rows.iter().map(|&r| values[r]).collect()),
        }
    }
}

/// Raw recruitment records: one row per participant, columns named by the survey.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawTable {
    names: Vec<String>,
    columns: Vec<Column>,
    rows: usize,
}

impl RawTable {
    /// Start assembling a table column by column.
    pub fn builder() -> RawTableBuilder {
        RawTableBuilder::default()
    }

    /// Number of participant rows.
    pub fn row_count(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Column names in insertion order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Returns `true` when a column called `name` exists.
    pub fn has_column(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Looks up a column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.position(name).map(|index| &self.columns[index])
    }

    /// Looks up a column by name, failing with [`RdsError::MissingColumn`].
    pub fn require(&self, name: &str) -> Result<&Column> {
        self.column(name).ok_or_else(|| RdsError::missing_column(name))
    }

    /// Looks up a numeric column by name.
    pub fn require_numeric(&self, name: &str) -> Result<&Column> {
        let column = self.require(name)?;
        if !column.is_numeric() {
            return Err(RdsError::ColumnType {
                column: name.to_owned(),
                expected: "numeric",
            });
        }
        Ok(column)
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|candidate| candidate == name)
    }

    /// Keeps only `rows`, preserving every column.
    pub(crate) fn select_rows(&self, rows: &[usize]) -> Self {
        Self {
            names: self.names.clone(),
            columns: self.columns.iter().map(|c| c.select(rows)).collect(),
            rows: rows.len(),
        }
    }

    /// Appends a derived column whose length has already been checked by the caller.
    pub(crate) fn push_column(&mut self, name: &str, column: Column) {
        debug_assert_eq!(column.len(), self.rows);
        self.names.push(name.to_owned());
        self.columns.push(column);
    }
}

/// Builder that validates column lengths and names before constructing a [`RawTable`].
#[derive(Debug, Default)]
pub struct RawTableBuilder {
    columns: Vec<(String, Column)>,
}

impl RawTableBuilder {
    /// Adds a text column.
    pub fn text<N, I, S>(mut self, name: N, values: I) -> Self
    where
        N: Into<String>,
        I: IntoIterator<Item = Option<S>>,
        S: Into<String>,
    {
        let cells = values.into_iter().map(|v| v.map(Into::into)).collect();
        self.columns.push((name.into(), Column::Text(cells)));
        self
    }

    /// Adds a numeric column.
    pub fn numeric<N, I>(mut self, name: N, values: I) -> Self
    where
        N: Into<String>,
        I: IntoIterator<Item = Option<f64>>,
    {
        self.columns
            .push((name.into(), Column::Numeric(values.into_iter().collect())));
        self
    }

    /// Adds an already constructed column.
    pub fn column(mut self, name: impl Into<String>, column: Column) -> Self {
        self.columns.push((name.into(), column));
        self
    }

    /// Finalizes construction after validating lengths and uniqueness of names.
    pub fn build(self) -> Result<RawTable> {
        let rows = self.columns.first().map_or(0, |(_, column)| column.len());
        let mut seen = HashSet::new();
        let mut names = Vec::with_capacity(self.columns.len());
        let mut columns = Vec::with_capacity(self.columns.len());

        for (name, column) in self.columns {
            if !seen.insert(name.clone()) {
                return Err(RdsError::DuplicateColumn { column: name });
            }
            if column.len() != rows {
                return Err(RdsError::dimension_mismatch(
                    "column length",
                    rows,
                    column.len(),
                ));
            }
            names.push(name);
            columns.push(column);
        }

        Ok(RawTable {
            names,
            columns,
            rows,
        })
    }
}
