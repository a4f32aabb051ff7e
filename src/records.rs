//! Core dates, proxy measurements and dated proxy records.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use itertools::{izip, Itertools};
use thiserror::Error;
use tracing::warn;

use crate::math::ols_slope;

#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordError {
    #[error("column {column} has {found} values, expected {expected}")]
    Length {
        column: String,
        expected: usize,
        found: usize,
    },
    #[error("proxy records may not carry a column named '{0}'")]
    ReservedColumn(String),
    #[error("dated record mixes ensemble sizes {0} and {1}")]
    MixedMembers(usize, usize),
    #[error("at least two distinct depths are needed")]
    TooFewDepths,
}

/// One radiocarbon date from a core.
#[derive(Debug, Clone, PartialEq)]
pub struct DatedSample {
    pub labid: String,
    pub age: f64,
    pub error: f64,
    pub depth: f64,
}

/// The dated samples of one core, stored by column and ordered by depth.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChronRecord {
    labid: Vec<String>,
    age: Vec<f64>,
    error: Vec<f64>,
    depth: Vec<f64>,
}

fn check_len(column: &str, expected: usize, found: usize) -> Result<(), RecordError> {
    if expected != found {
        return Err(RecordError::Length {
            column: column.to_string(),
            expected,
            found,
        });
    }
    Ok(())
}

impl ChronRecord {
    pub fn new(
        labid: Vec<String>,
        age: Vec<f64>,
        error: Vec<f64>,
        depth: Vec<f64>,
    ) -> Result<Self, RecordError> {
        let n = depth.len();
        check_len("labid", n, labid.len())?;
        check_len("age", n, age.len())?;
        check_len("error", n, error.len())?;
        let record = Self {
            labid,
            age,
            error,
            depth,
        };
        record.warn_if_unsorted();
        Ok(record)
    }

    pub fn from_samples<I: IntoIterator<Item = DatedSample>>(samples: I) -> Self {
        let mut record = Self::default();
        for sample in samples {
            record.labid.push(sample.labid);
            record.age.push(sample.age);
            record.error.push(sample.error);
            record.depth.push(sample.depth);
        }
        record.warn_if_unsorted();
        record
    }

    /// Whether the dates are in strictly increasing depth order.
    pub fn is_depth_sorted(&self) -> bool {
        self.depth.windows(2).all(|w| w[0] < w[1])
    }

    fn warn_if_unsorted(&self) {
        if !self.is_depth_sorted() {
            warn!(dates = self.len(), "core dates are not in strictly increasing depth order");
        }
    }

    pub fn labid(&self) -> &[String] {
        &self.labid
    }

    pub fn age(&self) -> &[f64] {
        &self.age
    }

    pub fn error(&self) -> &[f64] {
        &self.error
    }

    pub fn depth(&self) -> &[f64] {
        &self.depth
    }

    pub fn len(&self) -> usize {
        self.depth.len()
    }

    pub fn is_empty(&self) -> bool {
        self.depth.is_empty()
    }

    pub fn samples(&self) -> impl Iterator<Item = DatedSample> + '_ {
        izip!(&self.labid, &self.age, &self.error, &self.depth).map(
            |(labid, &age, &error, &depth)| DatedSample {
                labid: labid.clone(),
                age,
                error,
                depth,
            },
        )
    }

    /// Ballpark mean accumulation rate (yr/cm) from the uncalibrated dates.
    ///
    /// Fits a line to `1.1 * age` against depth and returns the closest of
    /// the round values 0.1, 0.2, 0.5, 1, 2, 5, ... 500.
    pub fn suggest_accumulation_rate(&self) -> Result<f64, RecordError> {
        let scaled = self.age.iter().map(|age| age * 1.1).collect_vec();
        let slope = ols_slope(&self.depth, &scaled).ok_or(RecordError::TooFewDepths)?;
        let mut best = f64::NAN;
        let mut best_diff = f64::INFINITY;
        for scale in [0.1, 1., 10., 100.] {
            for base in [1., 2., 5.] {
                let candidate = base * scale;
                let diff = (candidate - slope).abs();
                if diff < best_diff {
                    best = candidate;
                    best_diff = diff;
                }
            }
        }
        Ok(best)
    }
}

/// Proxy measurements sampled at depths down a core.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyRecord {
    depth: Vec<f64>,
    columns: Vec<(String, Vec<f64>)>,
}

const RESERVED_COLUMNS: [&str; 3] = ["depth", "age", "mciter"];

impl ProxyRecord {
    pub fn new(depth: Vec<f64>, columns: Vec<(String, Vec<f64>)>) -> Result<Self, RecordError> {
        for (name, values) in columns.iter() {
            if RESERVED_COLUMNS.contains(&name.as_str()) {
                return Err(RecordError::ReservedColumn(name.clone()));
            }
            check_len(name, depth.len(), values.len())?;
        }
        Ok(Self { depth, columns })
    }

    pub fn depth(&self) -> &[f64] {
        &self.depth
    }

    pub fn columns(&self) -> &[(String, Vec<f64>)] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.depth.len()
    }

    pub fn is_empty(&self) -> bool {
        self.depth.is_empty()
    }
}

/// Calendar age assigned to one proxy sample.
#[derive(Debug, Clone, PartialEq)]
pub enum DatedAge {
    Median(f64),
    Ensemble(Vec<f64>),
}

impl DatedAge {
    pub fn n_members(&self) -> usize {
        match self {
            DatedAge::Median(_) => 1,
            DatedAge::Ensemble(ages) => ages.len(),
        }
    }

    pub fn as_slice(&self) -> &[f64] {
        match self {
            DatedAge::Median(age) => std::slice::from_ref(age),
            DatedAge::Ensemble(ages) => ages,
        }
    }
}

/// One row of a dated record in long form.
#[derive(Debug, Clone, PartialEq)]
pub struct LongRow {
    pub depth: f64,
    /// Ensemble member, absent for median dating.
    pub mciter: Option<usize>,
    pub age: f64,
    /// Proxy values in the order of [`ProxyRecord::columns`].
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DatedProxyRecord {
    proxy: ProxyRecord,
    age: Vec<DatedAge>,
}

impl DatedProxyRecord {
    pub fn new(proxy: ProxyRecord, age: Vec<DatedAge>) -> Result<Self, RecordError> {
        check_len("age", proxy.len(), age.len())?;
        if let Some((a, b)) = age
            .iter()
            .map(DatedAge::n_members)
            .tuple_windows()
            .find(|(a, b)| a != b)
        {
            return Err(RecordError::MixedMembers(a, b));
        }
        Ok(Self { proxy, age })
    }

    pub fn proxy(&self) -> &ProxyRecord {
        &self.proxy
    }

    pub fn age(&self) -> &[DatedAge] {
        &self.age
    }

    /// Number of ensemble members per sample, 1 for median dating.
    pub fn n_members(&self) -> usize {
        self.age.first().map(DatedAge::n_members).unwrap_or(1)
    }

    /// Long ("tidy") form: one row per sample per ensemble member,
    /// all samples of member 0 first.
    pub fn to_long(&self) -> Vec<LongRow> {
        let is_ensemble = matches!(self.age.first(), Some(DatedAge::Ensemble(_)));
        (0..self.n_members())
            .flat_map(|member| {
                self.age.iter().enumerate().map(move |(row, age)| LongRow {
                    depth: self.proxy.depth[row],
                    mciter: is_ensemble.then_some(member),
                    age: age.as_slice()[member],
                    values: self
                        .proxy
                        .columns
                        .iter()
                        .map(|(_, values)| values[row])
                        .collect(),
                })
            })
            .collect()
    }
}

fn csv_reader(path: &Path) -> Result<csv::Reader<std::fs::File>> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Could not open {}", path.display()))
}

fn parse_field(field: &str, row: usize, column: &str) -> Result<f64> {
    field
        .parse()
        .with_context(|| format!("Could not parse {} '{}' on row {}", column, field, row + 2))
}

/// Read core dates from a CSV file with `labID, age, error, depth` columns.
pub fn read_chron<P: AsRef<Path>>(path: P) -> Result<ChronRecord> {
    let path = path.as_ref();
    let mut reader = csv_reader(path)?;
    let headers = reader.headers()?.clone();
    let position = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| anyhow!("{} has no '{}' column", path.display(), name))
    };
    let (labid_col, age_col, error_col, depth_col) = (
        position("labID")?,
        position("age")?,
        position("error")?,
        position("depth")?,
    );

    let mut samples = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        let field = |col: usize| record.get(col).unwrap_or_default();
        samples.push(DatedSample {
            labid: field(labid_col).to_string(),
            age: parse_field(field(age_col), row, "age")?,
            error: parse_field(field(error_col), row, "error")?,
            depth: parse_field(field(depth_col), row, "depth")?,
        });
    }
    Ok(ChronRecord::from_samples(samples))
}

/// Read proxy measurements from a CSV file with a `depth` column.
pub fn read_proxy<P: AsRef<Path>>(path: P) -> Result<ProxyRecord> {
    let path = path.as_ref();
    let mut reader = csv_reader(path)?;
    let headers = reader.headers()?.clone();
    let depth_col = headers
        .iter()
        .position(|h| h == "depth")
        .ok_or_else(|| anyhow!("{} has no 'depth' column", path.display()))?;

    let mut depth = Vec::new();
    let mut columns: Vec<(String, Vec<f64>)> = headers
        .iter()
        .enumerate()
        .filter(|&(col, _)| col != depth_col)
        .map(|(_, name)| (name.to_string(), Vec::new()))
        .collect();

    for (row, record) in reader.records().enumerate() {
        let record = record?;
        let mut values = Vec::with_capacity(columns.len());
        for (col, field) in record.iter().enumerate() {
            let name = headers.get(col).unwrap_or_default();
            let value = parse_field(field, row, name)?;
            if col == depth_col {
                depth.push(value);
            } else {
                values.push(value);
            }
        }
        for ((_, column), value) in columns.iter_mut().zip(values) {
            column.push(value);
        }
    }
    Ok(ProxyRecord::new(depth, columns)?)
}
