//! Delimited subject tables (phenotypes, covariates) keyed by family id

use std::{collections::HashMap, path::Path};

use csv::{ReaderBuilder, Trim};
use tracing::{debug, info};

use crate::{
    error::{Error, Result},
    utils::{parse_value, select_cloned},
};

pub const FID: &str = "FID";

/// Field separator of a subject table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Delimiter {
    /// Separate phenotype and covariate files
    #[default]
    Tab,
    /// Combined phenotype + covariate files
    Space,
}
impl Delimiter {
    fn byte(&self) -> u8 {
        match self {
            Delimiter::Tab => b'\t',
            Delimiter::Space => b' ',
        }
    }
}

/// A rectangular table of string cells with a header
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}
impl Table {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<String>>) -> Result<Self> {
        if let Some((idx, _)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != columns.len())
        {
            return Err(Error::InvalidTable {
                line: idx + 2,
                details: format!("expected {} fields", columns.len()),
            });
        }
        Ok(Self { columns, rows })
    }

    pub fn read<P: AsRef<Path>>(path: P, delimiter: Delimiter) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .delimiter(delimiter.byte())
            .has_headers(true)
            .trim(Trim::All)
            .from_path(path.as_ref())?;
        let columns = reader
            .headers()?
            .iter()
            .map(str::to_string)
            .collect::<Vec<_>>();
        let rows = reader
            .records()
            .map(|record| Ok(record?.iter().map(str::to_string).collect()))
            .collect::<Result<Vec<Vec<String>>>>()?;
        debug!(
            "Read {} rows and {} columns from {}",
            rows.len(),
            columns.len(),
            path.as_ref().display()
        );
        Self::new(columns, rows)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| Error::MissingColumn(name.to_string()))
    }

    pub fn text(&self, name: &str) -> Result<Vec<String>> {
        let idx = self.column_index(name)?;
        Ok(self.rows.iter().map(|row| row[idx].clone()).collect())
    }

    /// Numeric values of a column; missing tokens become NaN
    pub fn numeric(&self, name: &str) -> Result<Vec<f64>> {
        let idx = self.column_index(name)?;
        self.rows
            .iter()
            .enumerate()
            .map(|(line, row)| {
                parse_value(&row[idx]).ok_or_else(|| Error::InvalidTable {
                    line: line + 2,
                    details: format!(
                        "column {name} holds non-numeric value {:?}; convert categorical data to dummy variables",
                        row[idx]
                    ),
                })
            })
            .collect()
    }

    pub fn fids(&self) -> Result<Vec<String>> {
        self.text(FID)
    }

    /// Columns after the first two (FID, IID), as used for covariates by default
    pub fn default_covariates(&self) -> Vec<String> {
        self.columns.iter().skip(2).cloned().collect()
    }

    pub fn retain_rows<F: Fn(&[String]) -> bool>(&self, keep: F) -> Self {
        Self {
            columns: self.columns.clone(),
            rows: self.rows.iter().filter(|row| keep(row)).cloned().collect(),
        }
    }

    pub fn select_rows(&self, indices: &[usize]) -> Self {
        Self {
            columns: self.columns.clone(),
            rows: select_cloned(indices, &self.rows),
        }
    }

    /// Rows whose FID is in the given set
    pub fn filter_fids(&self, fids: &std::collections::HashSet<&str>) -> Result<Self> {
        let idx = self.column_index(FID)?;
        Ok(self.retain_rows(|row| fids.contains(row[idx].as_str())))
    }

    /// Drops every row that has a missing cell in any column
    pub fn drop_missing(&self) -> Self {
        let kept = self.retain_rows(|row| row.iter().all(|cell| !is_missing(cell)));
        if kept.len() < self.len() {
            debug!("Dropped {} rows with missing values", self.len() - kept.len());
        }
        kept
    }

    /// Left join on FID followed by removal of incomplete rows
    ///
    /// Columns present in both tables (other than FID) are suffixed `_x` and `_y`.
    pub fn merge_on_fid(&self, other: &Table) -> Result<Self> {
        let left_key = self.column_index(FID)?;
        let right_key = other.column_index(FID)?;

        let mut index: HashMap<&str, Vec<usize>> = HashMap::new();
        for (i, row) in other.rows.iter().enumerate() {
            index.entry(row[right_key].as_str()).or_default().push(i);
        }

        let right_columns = (0..other.columns.len())
            .filter(|c| *c != right_key)
            .collect::<Vec<_>>();
        let mut columns = self
            .columns
            .iter()
            .map(|c| {
                if c != FID && other.columns.contains(c) {
                    format!("{c}_x")
                } else {
                    c.clone()
                }
            })
            .collect::<Vec<_>>();
        columns.extend(right_columns.iter().map(|c| {
            let name = &other.columns[*c];
            if self.columns.contains(name) {
                format!("{name}_y")
            } else {
                name.clone()
            }
        }));

        let mut rows = Vec::with_capacity(self.rows.len());
        for row in &self.rows {
            match index.get(row[left_key].as_str()) {
                Some(matches) => {
                    for m in matches {
                        let mut merged = row.clone();
                        merged.extend(right_columns.iter().map(|c| other.rows[*m][*c].clone()));
                        rows.push(merged);
                    }
                }
                None => {
                    let mut merged = row.clone();
                    merged.extend(right_columns.iter().map(|_| String::new()));
                    rows.push(merged);
                }
            }
        }
        let merged = Self::new(columns, rows)?.drop_missing();
        info!(
            "Merged {} phenotype rows with {} covariate rows into {} complete rows",
            self.len(),
            other.len(),
            merged.len()
        );
        Ok(merged)
    }
}

fn is_missing(cell: &str) -> bool {
    parse_value(cell).is_some_and(f64::is_nan)
}
