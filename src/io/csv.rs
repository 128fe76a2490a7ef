use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, StringRecord, Writer};

use crate::case::{Case, Value};
use crate::combine::DatasetOpener;
use crate::dictionary::{Dictionary, Format, VarWidth, Variable};
use crate::error::ExecError;
use crate::executor::{CaseReader, CaseWriter, Dataset};

/// Builds a dictionary from a typed header row.
pub fn parse_header(header: &StringRecord) -> Result<Dictionary, ExecError> {
    let mut dict = Dictionary::default();
    for cell in header {
        let (name, format) = match cell.split_once(':') {
            Some((name, format)) => (name.trim(), Some(format.parse::<Format>()?)),
            None => (cell.trim(), None),
        };
        let var = match format {
            Some(format) => {
                let mut var = Variable::new(name, format.var_width())?;
                var.set_formats(format)?;
                var
            }
            None => Variable::numeric(name)?,
        };
        if var.is_scratch() {
            return Err(ExecError::InvalidName(var.name().to_string()));
        }
        dict.add_var(var)?;
    }
    Ok(dict)
}

fn header_cell(var: &Variable) -> String {
    format!("{}:{}", var.name(), var.print_format())
}

pub struct CsvCaseReader<R: Read> {
    reader: csv::Reader<R>,
    widths: Vec<VarWidth>,
    record: StringRecord,
    line: u64,
}

impl<R: Read> CsvCaseReader<R> {
    /// Reads the header from `input` and returns its dictionary together
    /// with a reader positioned at the first case.
    pub fn new(input: R) -> Result<(Dictionary, Self), ExecError> {
        let mut reader = ReaderBuilder::new().has_headers(true).from_reader(input);
        let dict = parse_header(reader.headers()?)?;
        let widths = dict.widths();
        Ok((
            dict,
            Self {
                reader,
                widths,
                record: StringRecord::new(),
                line: 1,
            },
        ))
    }

    fn parse_cell(&self, col: usize, cell: &str) -> Result<Value, ExecError> {
        match self.widths[col] {
            VarWidth::String(w) => Ok(Value::string(cell, w)),
            VarWidth::Numeric => {
                let cell = cell.trim();
                if cell.is_empty() || cell == "." {
                    return Ok(Value::SYSMIS);
                }
                cell.parse::<f64>().map(Value::number).map_err(|_| {
                    ExecError::Malformed(format!(
                        "line {}, column {}: {cell:?} is not a number",
                        self.line,
                        col + 1
                    ))
                })
            }
        }
    }
}

impl<R: Read> CaseReader for CsvCaseReader<R> {
    fn next(&mut self) -> Result<Option<Case>, ExecError> {
        if !self.reader.read_record(&mut self.record)? {
            return Ok(None);
        }
        self.line += 1;
        if self.record.len() != self.widths.len() {
            return Err(ExecError::Malformed(format!(
                "line {} has {} fields but the header names {}",
                self.line,
                self.record.len(),
                self.widths.len()
            )));
        }
        let values = self
            .record
            .iter()
            .enumerate()
            .map(|(col, cell)| self.parse_cell(col, cell))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(Case::from_fields(values)))
    }
}

/// Opens a CSV file as a dataset.
pub fn open_csv(path: &Path) -> Result<Dataset, ExecError> {
    let file = File::open(path)?;
    let (dict, reader) = CsvCaseReader::new(file)?;
    log_debug!("opened {} with {} variables", path.display(), dict.len());
    Ok(Dataset::new(dict, Box::new(reader)))
}

/// Resolves file handles relative to a base directory.
pub struct CsvOpener {
    base: PathBuf,
}

impl CsvOpener {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }
}

impl DatasetOpener for CsvOpener {
    fn open(&mut self, name: &str) -> Result<Dataset, ExecError> {
        open_csv(&self.base.join(name))
    }
}

pub struct CsvCaseWriter<W: Write> {
    writer: Writer<W>,
    width: usize,
}

impl<W: Write> CsvCaseWriter<W> {
    /// Writes the typed header for `dict`.
    pub fn new(output: W, dict: &Dictionary) -> Result<Self, ExecError> {
        let mut writer = Writer::from_writer(output);
        writer.write_record(dict.vars().iter().map(header_cell))?;
        Ok(Self {
            writer,
            width: dict.len(),
        })
    }

    pub fn finish(mut self) -> Result<(), ExecError> {
        self.writer.flush()?;
        Ok(())
    }
}

impl<W: Write> CaseWriter for CsvCaseWriter<W> {
    fn write(&mut self, case: Case) -> Result<(), ExecError> {
        if case.len() != self.width {
            return Err(ExecError::Malformed(format!(
                "case has {} values, expected {}",
                case.len(),
                self.width
            )));
        }
        for value in case.values() {
            match value {
                Value::Number(None) => self.writer.write_field("")?,
                Value::Number(Some(x)) => self.writer.write_field(x.to_string())?,
                Value::String(s) => {
                    let end = s.iter().rposition(|&b| b != b' ').map_or(0, |i| i + 1);
                    self.writer.write_field(&s[..end])?;
                }
            }
        }
        self.writer.write_record(None::<&[u8]>)?;
        Ok(())
    }
}
