//! Persisted case streams. Only CSV with a typed header is provided; the
//! header cell of each column is `name`, `name:F<w>.<d>` or `name:A<w>`.

pub mod csv;

pub use self::csv::{open_csv, CsvCaseReader, CsvCaseWriter, CsvOpener};
