pub mod sort;

use crate::case::Case;
use crate::dictionary::Dictionary;
use crate::error::ExecError;

/// Pull side of a case stream. Each call hands out the next case by value,
/// or `None` once the stream is exhausted.
pub trait CaseReader {
    fn next(&mut self) -> Result<Option<Case>, ExecError>;
}

impl<R: CaseReader + ?Sized> CaseReader for Box<R> {
    fn next(&mut self) -> Result<Option<Case>, ExecError> {
        (**self).next()
    }
}

/// Push side of a case stream.
pub trait CaseWriter {
    fn write(&mut self, case: Case) -> Result<(), ExecError>;
}

impl<W: CaseWriter + ?Sized> CaseWriter for Box<W> {
    fn write(&mut self, case: Case) -> Result<(), ExecError> {
        (**self).write(case)
    }
}

pub struct MemCaseReader {
    cases: std::vec::IntoIter<Case>,
}

impl MemCaseReader {
    pub fn new(cases: Vec<Case>) -> Self {
        Self {
            cases: cases.into_iter(),
        }
    }
}

impl CaseReader for MemCaseReader {
    fn next(&mut self) -> Result<Option<Case>, ExecError> {
        Ok(self.cases.next())
    }
}

#[derive(Debug, Default)]
pub struct MemCaseWriter {
    cases: Vec<Case>,
}

impl MemCaseWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_cases(self) -> Vec<Case> {
        self.cases
    }
}

impl CaseWriter for MemCaseWriter {
    fn write(&mut self, case: Case) -> Result<(), ExecError> {
        self.cases.push(case);
        Ok(())
    }
}

/// Drains `reader` into a vector.
pub fn read_all(reader: &mut dyn CaseReader) -> Result<Vec<Case>, ExecError> {
    let mut cases = Vec::new();
    while let Some(case) = reader.next()? {
        cases.push(case);
    }
    Ok(cases)
}

/// A dictionary together with the stream of cases it describes.
pub struct Dataset {
    pub dict: Dictionary,
    pub reader: Box<dyn CaseReader>,
}

impl Dataset {
    pub fn new(dict: Dictionary, reader: Box<dyn CaseReader>) -> Self {
        Self { dict, reader }
    }

    pub fn from_cases(dict: Dictionary, cases: Vec<Case>) -> Self {
        Self::new(dict, Box::new(MemCaseReader::new(cases)))
    }
}

impl std::fmt::Debug for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dataset")
            .field("dict", &self.dict)
            .finish_non_exhaustive()
    }
}
