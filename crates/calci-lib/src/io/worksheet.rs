use anyhow::{bail, Context, Result};
use csv::ReaderBuilder;
use serde::{Deserialize, Serialize};
use std::{
    io::Read,
    path::{Path, PathBuf},
};

use crate::signal::mean;

/// Column holding the acquisition time of each row.
pub const TIME_COLUMN: usize = 1;
/// First cell-line column; everything before it is bookkeeping.
pub const FIRST_DATA_COLUMN: usize = 5;
/// Columns past this count hold notes and are ignored.
pub const MAX_COLUMNS: usize = 16;
/// Narrower sheets have no cell line next to the background column.
pub const MIN_COLUMNS: usize = 7;

/// How the background channel is removed from the cell-line columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackgroundMode {
    /// Subtract the background's even-row mean from even rows and its odd-row
    /// mean from odd rows.
    #[default]
    Average,
    /// Subtract the background row by row.
    Point,
    None,
}

/// One exported worksheet: a header row, then one row per acquired frame.
/// The channels of a cell line alternate between even and odd rows.
#[derive(Debug, Clone)]
pub struct Worksheet {
    pub name: String,
    /// Columns considered, capped at [`MAX_COLUMNS`].
    pub width: usize,
    /// Headers of the data columns, background last.
    pub headers: Vec<String>,
    pub time: Vec<f64>,
    /// Data columns, background last.
    pub columns: Vec<Vec<f64>>,
}

/// A background-corrected cell-line column trimmed to an even row count.
#[derive(Debug, Clone)]
pub struct CellLine {
    pub index: usize,
    pub name: String,
    pub raw: Vec<f64>,
}

impl Worksheet {
    pub fn is_analyzable(&self) -> bool {
        self.width >= MIN_COLUMNS
    }

    /// Number of cell-line columns (the background excluded).
    pub fn cell_line_count(&self) -> usize {
        self.columns.len().saturating_sub(1)
    }

    /// Cell lines to analyze: just `column` when it names one, otherwise all.
    pub fn column_selection(&self, column: Option<usize>) -> Vec<usize> {
        match column {
            Some(c) if c < self.cell_line_count() => vec![c],
            _ => (0..self.cell_line_count()).collect(),
        }
    }

    /// Background-corrected cell line `index`.
    pub fn cell_line(&self, index: usize, mode: BackgroundMode) -> Option<CellLine> {
        if index >= self.cell_line_count() {
            return None;
        }
        let background = self.columns.last()?;
        let column = &self.columns[index];
        let mut raw: Vec<f64> = match mode {
            BackgroundMode::Average => {
                let even: Vec<f64> = background.iter().step_by(2).copied().collect();
                let odd: Vec<f64> = background.iter().skip(1).step_by(2).copied().collect();
                let (even, odd) = (mean(&even), mean(&odd));
                column
                    .iter()
                    .enumerate()
                    .map(|(row, v)| if row % 2 == 0 { v - even } else { v - odd })
                    .collect()
            }
            BackgroundMode::Point => column.iter().zip(background).map(|(v, b)| v - b).collect(),
            BackgroundMode::None => column.clone(),
        };
        raw.truncate(even_rows(raw.len()));
        Some(CellLine {
            index,
            name: self.headers[index].clone(),
            raw,
        })
    }

    /// Time stamps aligned with the ratio series.
    pub fn ratio_time(&self) -> Vec<f64> {
        pair_time(&self.time)
    }
}

/// Largest even row count not above `rows`.
pub fn even_rows(rows: usize) -> usize {
    rows - rows % 2
}

/// Keep the time of every first row of a channel pair, dropping an unpaired last row.
pub fn pair_time(time: &[f64]) -> Vec<f64> {
    time[..even_rows(time.len())]
        .iter()
        .step_by(2)
        .copied()
        .collect()
}

/// A set of worksheets: either a single CSV export or a directory of them.
#[derive(Debug, Clone)]
pub struct Workbook {
    pub name: String,
    /// Sheet files in name order.
    pub sheets: Vec<PathBuf>,
}

impl Workbook {
    pub fn open(path: &Path) -> Result<Self> {
        let name = file_stem(path)?;
        let sheets = if path.is_dir() {
            let mut sheets = Vec::new();
            for entry in
                std::fs::read_dir(path).with_context(|| format!("listing {}", path.display()))?
            {
                let sheet = entry?.path();
                let is_csv = sheet
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
                if sheet.is_file() && is_csv {
                    sheets.push(sheet);
                }
            }
            sheets.sort();
            sheets
        } else if path.is_file() {
            vec![path.to_path_buf()]
        } else {
            bail!("{} does not exist", path.display());
        };
        Ok(Self { name, sheets })
    }

    pub fn sheet_names(&self) -> Vec<String> {
        self.sheets
            .iter()
            .filter_map(|p| file_stem(p).ok())
            .collect()
    }
}

fn file_stem(path: &Path) -> Result<String> {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .with_context(|| format!("no file name in {}", path.display()))
}

/// Load a worksheet exported as CSV. The sheet is named after the file stem.
pub fn read_worksheet(path: &Path) -> Result<Worksheet> {
    let name = file_stem(path)?;
    let file =
        std::fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
    parse_worksheet(&name, file).with_context(|| format!("reading {}", path.display()))
}

pub fn parse_worksheet<R: Read>(name: &str, input: R) -> Result<Worksheet> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(input);
    let headers = reader.headers().context("reading header row")?.clone();
    let width = headers.len().min(MAX_COLUMNS);
    let mut sheet = Worksheet {
        name: name.to_string(),
        width,
        headers: Vec::new(),
        time: Vec::new(),
        columns: Vec::new(),
    };
    if !sheet.is_analyzable() {
        return Ok(sheet);
    }

    sheet.headers = (FIRST_DATA_COLUMN..width)
        .map(|i| headers.get(i).unwrap_or_default().to_string())
        .collect();
    sheet.columns = vec![Vec::new(); width - FIRST_DATA_COLUMN];
    for (row, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("reading row {}", row + 2))?;
        if record.iter().all(str::is_empty) {
            continue;
        }
        sheet.time.push(parse_cell(record.get(TIME_COLUMN), row)?);
        for (column, values) in (FIRST_DATA_COLUMN..width).zip(sheet.columns.iter_mut()) {
            values.push(parse_cell(record.get(column), row)?);
        }
    }
    Ok(sheet)
}

/// Empty or missing cells read as NaN.
fn parse_cell(cell: Option<&str>, row: usize) -> Result<f64> {
    match cell {
        None | Some("") => Ok(f64::NAN),
        Some(text) => text
            .parse()
            .with_context(|| format!("row {} has a non-numeric cell: {}", row + 2, text)),
    }
}
