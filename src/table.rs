use std::{
    fs::File,
    path::{Path, PathBuf},
    time::Instant,
};

#[derive(thiserror::Error, Debug)]
pub enum TableError {
    #[error("Failed to open the kinematics file")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse the CSV file")]
    Csv(#[from] csv::Error),
    #[error("Column {column:?}, row {row}: cannot parse {cell:?} as a number")]
    Parse {
        column: String,
        row: usize,
        cell: String,
    },
    #[error("Column {0:?} not found")]
    MissingColumn(String),
}

/// Table of per-galaxy kinematic measurements
///
/// Original columns are carried verbatim, so non-numeric columns such as
/// galaxy identifiers pass through untouched. Derived columns are appended
/// after the original ones, in insertion order; no column is ever removed.
#[derive(Default, Debug)]
pub struct KinematicsTable {
    headers: Vec<String>,
    columns: Vec<Vec<String>>,
    derived: Vec<(String, Vec<f64>)>,
}
impl KinematicsTable {
    /// Builds a table from named numeric columns
    pub fn from_columns<S: Into<String>>(columns: Vec<(S, Vec<f64>)>) -> Self {
        let mut table = Self::default();
        for (name, values) in columns {
            table.headers.push(name.into());
            table
                .columns
                .push(values.iter().map(|value| format!("{}", value)).collect());
        }
        table
    }
    /// Number of rows (galaxies)
    pub fn len(&self) -> usize {
        self.columns
            .first()
            .map(Vec::len)
            .or_else(|| self.derived.first().map(|(_, column)| column.len()))
            .unwrap_or(0)
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    pub fn has_column(&self, name: &str) -> bool {
        self.headers.iter().any(|header| header == name)
            || self.derived.iter().any(|(key, _)| key == name)
    }
    /// Column names, original first then derived
    pub fn headers(&self) -> impl Iterator<Item = &str> {
        self.headers
            .iter()
            .map(String::as_str)
            .chain(self.derived.iter().map(|(name, _)| name.as_str()))
    }
    /// Named column as reals
    pub fn column(&self, name: &str) -> Result<Vec<f64>, TableError> {
        if let Some(j) = self.headers.iter().position(|header| header == name) {
            self.columns[j]
                .iter()
                .enumerate()
                .map(|(row, cell)| {
                    cell.parse::<f64>().map_err(|_| TableError::Parse {
                        column: name.to_string(),
                        row,
                        cell: cell.clone(),
                    })
                })
                .collect()
        } else if let Some((_, values)) = self.derived.iter().find(|(key, _)| key == name) {
            Ok(values.clone())
        } else {
            Err(TableError::MissingColumn(name.to_string()))
        }
    }
    /// Appends a derived column
    pub fn assign<S: Into<String>>(&mut self, name: S, values: Vec<f64>) {
        assert_eq!(
            values.len(),
            self.len(),
            "derived column length must match the table row count"
        );
        self.derived.push((name.into(), values));
    }
    /// Writes the table back to a CSV file, original columns first and in
    /// their original order, derived columns appended
    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> Result<(), TableError> {
        let mut wtr = csv::Writer::from_path(&path)?;
        wtr.write_record(self.headers())?;
        for row in 0..self.len() {
            let mut record: Vec<String> = self
                .columns
                .iter()
                .map(|column| column[row].clone())
                .collect();
            record.extend(
                self.derived
                    .iter()
                    .map(|(_, column)| format!("{}", column[row])),
            );
            wtr.write_record(&record)?;
        }
        Ok(())
    }
}

pub struct KinematicsLoader {
    path: PathBuf,
    delimiter: u8,
}
impl Default for KinematicsLoader {
    fn default() -> Self {
        Self {
            path: PathBuf::from("kinematics.csv"),
            delimiter: b',',
        }
    }
}
impl KinematicsLoader {
    pub fn data_path<S: AsRef<Path>>(self, path: S) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            ..self
        }
    }
    pub fn delimiter(self, delimiter: u8) -> Self {
        Self { delimiter, ..self }
    }
    pub fn load(self) -> Result<KinematicsTable, TableError> {
        log::info!("Loading {:?}...", self.path);
        let now = Instant::now();
        let file = File::open(&self.path)?;
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .from_reader(file);
        let headers: Vec<String> = rdr.headers()?.iter().map(|h| h.trim().to_string()).collect();
        let mut columns: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
        for result in rdr.records() {
            let record = result?;
            for (column, cell) in columns.iter_mut().zip(record.iter()) {
                column.push(cell.trim().to_string());
            }
        }
        log::info!(
            "... {} galaxies loaded in {}ms",
            columns.first().map(Vec::len).unwrap_or(0),
            now.elapsed().as_millis()
        );
        Ok(KinematicsTable {
            headers,
            columns,
            derived: Vec::new(),
        })
    }
}
