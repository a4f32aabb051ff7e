//! Named calibration curves and the registry that loads them.

use std::{
    collections::HashMap,
    fmt,
    path::Path,
    str::FromStr,
    sync::Arc,
};

use anyhow::{anyhow, bail, Context, Result};
use tracing::debug;

use crate::calib_curve::CalibCurve;

/// Number of header lines in Bacon-style `.14C` curve files.
const CURVE_HEADER_LINES: usize = 11;

/// Calibration curves known to the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CurveName {
    /// Northern hemisphere terrestrial.
    IntCal13,
    Marine13,
    /// Southern hemisphere terrestrial.
    SHCal13,
    /// No calibration: calendar age equals radiocarbon age.
    ConstCal,
}

impl CurveName {
    pub const ALL: [CurveName; 4] = [
        CurveName::IntCal13,
        CurveName::Marine13,
        CurveName::SHCal13,
        CurveName::ConstCal,
    ];

    /// File name of the curve table, if the curve is read from disk.
    pub fn file_name(&self) -> Option<&'static str> {
        match self {
            CurveName::IntCal13 => Some("intcal13.14C"),
            CurveName::Marine13 => Some("marine13.14C"),
            CurveName::SHCal13 => Some("shcal13.14C"),
            CurveName::ConstCal => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CurveName::IntCal13 => "IntCal13",
            CurveName::Marine13 => "Marine13",
            CurveName::SHCal13 => "SHCal13",
            CurveName::ConstCal => "ConstCal",
        }
    }
}

impl fmt::Display for CurveName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CurveName {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        CurveName::ALL
            .into_iter()
            .find(|name| name.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| anyhow!("Unknown calibration curve '{}'", s))
    }
}

pub type CurveLoader = Box<dyn Fn() -> Result<CalibCurve> + Send + Sync>;

/// Explicit table of curve loaders.
///
/// Built once by the caller and passed to whatever needs curves. Loaded
/// curves are not cached; fetch a curve once and share the `Arc`.
#[derive(Default)]
pub struct CurveRegistry {
    loaders: HashMap<CurveName, CurveLoader>,
}

impl fmt::Debug for CurveRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.loaders.keys().map(CurveName::as_str).collect();
        names.sort_unstable();
        f.debug_struct("CurveRegistry")
            .field("curves", &names)
            .finish()
    }
}

impl CurveRegistry {
    /// A registry with no curves.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the file-backed curves found in `dir` and the identity curve.
    pub fn with_curve_dir<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref().to_path_buf();
        let mut registry = Self::new();
        for name in CurveName::ALL {
            match name.file_name() {
                Some(file) => {
                    let path = dir.join(file);
                    registry.register(name, move || read_14c(&path));
                }
                None => {
                    registry.register(name, constcal);
                }
            }
        }
        registry
    }

    /// Add or replace the loader for `name`.
    pub fn register<F>(&mut self, name: CurveName, loader: F) -> &mut Self
    where
        F: Fn() -> Result<CalibCurve> + Send + Sync + 'static,
    {
        self.loaders.insert(name, Box::new(loader));
        self
    }

    pub fn contains(&self, name: CurveName) -> bool {
        self.loaders.contains_key(&name)
    }

    pub fn fetch(&self, name: CurveName) -> Result<Arc<CalibCurve>> {
        let loader = self
            .loaders
            .get(&name)
            .ok_or_else(|| anyhow!("Calibration curve {} is not registered", name))?;
        debug!(curve = %name, "loading calibration curve");
        let curve = loader().with_context(|| format!("Failed to load calibration curve {}", name))?;
        Ok(Arc::new(curve))
    }
}

/// Identity curve spanning the calendar range Bacon accepts by default.
fn constcal() -> Result<CalibCurve> {
    Ok(CalibCurve::identity(-1000., 50_000., 1.)?)
}

/// Read a five-column Bacon `.14C` curve file
/// (cal BP, 14C age, error, Δ14C, sigma) after its 11 header lines.
pub fn read_14c<P: AsRef<Path>>(path: P) -> Result<CalibCurve> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Could not read curve file {}", path.display()))?;
    parse_14c(&text).with_context(|| format!("Invalid curve file {}", path.display()))
}

pub(crate) fn parse_14c(text: &str) -> Result<CalibCurve> {
    let body: String = text
        .lines()
        .skip(CURVE_HEADER_LINES)
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(body.as_bytes());

    let mut columns: [Vec<f64>; 5] = Default::default();
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        if record.len() < 5 {
            bail!(
                "Row {} has {} columns, expected 5",
                row + CURVE_HEADER_LINES + 1,
                record.len()
            );
        }
        for (col, field) in columns.iter_mut().zip(record.iter()) {
            let value: f64 = field.parse().with_context(|| {
                format!(
                    "Could not parse '{}' on row {}",
                    field,
                    row + CURVE_HEADER_LINES + 1
                )
            })?;
            col.push(value);
        }
    }

    let [calbp, c14age, error, delta14c, sigma] = columns;
    Ok(CalibCurve::new(
        calbp,
        c14age,
        error,
        Some(delta14c),
        Some(sigma),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn curve_text() -> String {
        let mut text = String::new();
        for i in 0..CURVE_HEADER_LINES {
            text.push_str(&format!("# header line {}\n", i));
        }
        text.push_str("0, 10, 5, 0.5, 1.0\n");
        text.push_str("5, 20, 6, 0.4, 1.1\n");
        text.push_str("10, 30, 7, 0.3, 1.2\n");
        text
    }

    #[test]
    fn parse_skips_header() {
        let curve = parse_14c(&curve_text()).unwrap();
        assert_eq!(curve.calbp(), &[0., 5., 10.]);
        assert_eq!(curve.c14age(), &[10., 20., 30.]);
        assert_eq!(curve.error(), &[5., 6., 7.]);
        assert_eq!(curve.delta14c(), &[0.5, 0.4, 0.3]);
        assert_eq!(curve.sigma(), &[1.0, 1.1, 1.2]);
    }

    #[test]
    fn parse_reports_bad_rows() {
        let mut text = curve_text();
        text.push_str("15, 40\n");
        assert!(parse_14c(&text).is_err());
    }

    #[test]
    fn registry_reads_from_directory() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut file = std::fs::File::create(dir.path().join("marine13.14C"))?;
        file.write_all(curve_text().as_bytes())?;

        let registry = CurveRegistry::with_curve_dir(dir.path());
        let marine = registry.fetch(CurveName::Marine13)?;
        assert_eq!(marine.len(), 3);
        assert!(registry.fetch(CurveName::IntCal13).is_err());

        let identity = registry.fetch(CurveName::ConstCal)?;
        assert_eq!(identity.range(), (-1000., 50_000.));
        Ok(())
    }

    #[test]
    fn registration_replaces_loader() -> Result<()> {
        let mut registry = CurveRegistry::new();
        assert!(!registry.contains(CurveName::IntCal13));
        assert!(registry.fetch(CurveName::IntCal13).is_err());
        registry.register(CurveName::IntCal13, || Ok(CalibCurve::identity(0., 4., 1.)?));
        assert_eq!(registry.fetch(CurveName::IntCal13)?.len(), 5);
        Ok(())
    }

    #[test]
    fn names_round_trip_through_strings() {
        for name in CurveName::ALL {
            assert_eq!(name.to_string().parse::<CurveName>().unwrap(), name);
        }
        assert_eq!("intcal13".parse::<CurveName>().unwrap(), CurveName::IntCal13);
        assert!("IntCal20".parse::<CurveName>().is_err());
    }
}
