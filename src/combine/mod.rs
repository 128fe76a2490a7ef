//! Key-ordered combining of several case streams into one.
//!
//! A [`Combine`] is configured with its [`CombineMode`], an ordered list of
//! [`SourceSpec`]s and an optional BY key, then executed into a
//! [`CombinedReader`]. Execution checks the configuration and merges the
//! source dictionaries before any case is read.

mod align;
mod emit;
mod interleave;
mod schema;
mod source;
mod update;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::case::Case;
use crate::config::SortConfig;
use crate::dictionary::Dictionary;
use crate::error::ExecError;
use crate::executor::{read_all, CaseReader, CaseWriter, Dataset, MemCaseReader};
use crate::key::SortDirection;

use align::MatchFiles;
use emit::CaseEmitter;
use interleave::{AddFiles, ConcatFiles};
use schema::SchemaMerger;
use source::SourceAdapter;
use update::UpdateFiles;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceRole {
    /// Rows are consumed positionally (join) or kept distinct (union).
    #[default]
    Record,
    /// The matching row is broadcast to every row of a join group.
    Lookup,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceHandle {
    /// The caller's active dataset, written `*`.
    Active,
    File(String),
}

impl SourceHandle {
    pub fn parse(s: &str) -> Self {
        if s == "*" {
            SourceHandle::Active
        } else {
            SourceHandle::File(s.to_string())
        }
    }
}

impl fmt::Display for SourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceHandle::Active => write!(f, "active dataset"),
            SourceHandle::File(name) => write!(f, "{name}"),
        }
    }
}

/// One input of a combine.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSpec {
    pub handle: SourceHandle,
    pub role: SourceRole,
    pub rename: Vec<(String, String)>,
    pub drop: Vec<String>,
    pub keep: Vec<String>,
    pub in_var: Option<String>,
    /// Sort the source by the BY key before combining it.
    pub sort: bool,
}

impl SourceSpec {
    pub fn new(handle: SourceHandle) -> Self {
        Self {
            handle,
            role: SourceRole::Record,
            rename: Vec::new(),
            drop: Vec::new(),
            keep: Vec::new(),
            in_var: None,
            sort: false,
        }
    }

    pub fn active() -> Self {
        Self::new(SourceHandle::Active)
    }

    pub fn file(name: &str) -> Self {
        Self::new(SourceHandle::File(name.to_string()))
    }

    pub fn lookup(mut self) -> Self {
        self.role = SourceRole::Lookup;
        self
    }

    pub fn rename(mut self, from: &str, to: &str) -> Self {
        self.rename.push((from.to_string(), to.to_string()));
        self
    }

    pub fn drop<S: AsRef<str>>(mut self, names: &[S]) -> Self {
        self.drop.extend(names.iter().map(|n| n.as_ref().to_string()));
        self
    }

    pub fn keep<S: AsRef<str>>(mut self, names: &[S]) -> Self {
        self.keep.extend(names.iter().map(|n| n.as_ref().to_string()));
        self
    }

    pub fn in_var(mut self, name: &str) -> Self {
        self.in_var = Some(name.to_string());
        self
    }

    pub fn sorted(mut self) -> Self {
        self.sort = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CombineMode {
    /// Record join: rows sharing a key are aligned side by side.
    Match,
    /// Record union: every input row becomes its own output row.
    Add,
    /// Master/transaction update keyed on BY.
    Update,
}

impl CombineMode {
    pub fn name(&self) -> &'static str {
        match self {
            CombineMode::Match => "MATCH FILES",
            CombineMode::Add => "ADD FILES",
            CombineMode::Update => "UPDATE",
        }
    }
}

/// Opens named datasets referenced by [`SourceHandle::File`].
pub trait DatasetOpener {
    fn open(&mut self, name: &str) -> Result<Dataset, ExecError>;
}

/// A non-fatal diagnostic.
#[derive(Debug, Clone, PartialEq)]
pub enum Warning {
    /// Sources disagree on text encoding. Holds `(source, encoding)` for
    /// every source and the encoding the output uses.
    EncodingMismatch {
        sources: Vec<(String, String)>,
        chosen: String,
    },
    /// IN, FIRST and LAST are not computed when concatenating.
    FlagsNotComputed,
    /// Number of key values with more than one master row.
    DuplicateMasterKeys(u64),
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::EncodingMismatch { sources, chosen } => {
                write!(f, "combining files with incompatible encodings (")?;
                for (i, (name, encoding)) in sources.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}: {encoding}")?;
                }
                write!(f, "); strings will be treated as {chosen}")
            }
            Warning::FlagsNotComputed => write!(
                f,
                "IN, FIRST and LAST variables are left system-missing when no BY is given"
            ),
            Warning::DuplicateMasterKeys(n) => write!(
                f,
                "encountered {n} sets of duplicate cases in the master file"
            ),
        }
    }
}

/// Configuration of one combine invocation.
#[derive(Debug, Clone)]
pub struct Combine {
    mode: CombineMode,
    sources: Vec<SourceSpec>,
    by: Vec<(String, SortDirection)>,
    first: Option<String>,
    last: Option<String>,
    drop: Vec<String>,
    keep: Vec<String>,
    sort_config: SortConfig,
}

impl Combine {
    pub fn new(mode: CombineMode) -> Self {
        Self {
            mode,
            sources: Vec::new(),
            by: Vec::new(),
            first: None,
            last: None,
            drop: Vec::new(),
            keep: Vec::new(),
            sort_config: SortConfig::default(),
        }
    }

    pub fn source(mut self, spec: SourceSpec) -> Self {
        self.sources.push(spec);
        self
    }

    pub fn by<S: AsRef<str>>(mut self, names: &[(S, SortDirection)]) -> Self {
        self.by = names
            .iter()
            .map(|(n, d)| (n.as_ref().to_string(), *d))
            .collect();
        self
    }

    pub fn first(mut self, name: &str) -> Self {
        self.first = Some(name.to_string());
        self
    }

    pub fn last(mut self, name: &str) -> Self {
        self.last = Some(name.to_string());
        self
    }

    pub fn drop<S: AsRef<str>>(mut self, names: &[S]) -> Self {
        self.drop.extend(names.iter().map(|n| n.as_ref().to_string()));
        self
    }

    pub fn keep<S: AsRef<str>>(mut self, names: &[S]) -> Self {
        self.keep.extend(names.iter().map(|n| n.as_ref().to_string()));
        self
    }

    pub fn sort_config(mut self, config: SortConfig) -> Self {
        self.sort_config = config;
        self
    }

    pub fn mode(&self) -> CombineMode {
        self.mode
    }

    fn check(&self) -> Result<(), ExecError> {
        if !self.sources.iter().any(|s| s.role == SourceRole::Record) {
            return Err(ExecError::Config(format!(
                "{} needs at least one non-lookup input",
                self.mode.name()
            )));
        }
        let has_lookup = self.sources.iter().any(|s| s.role == SourceRole::Lookup);
        if has_lookup && self.mode != CombineMode::Match {
            return Err(ExecError::Config(format!(
                "lookup sources are not allowed in {}",
                self.mode.name()
            )));
        }
        if self.by.is_empty() {
            if has_lookup {
                return Err(ExecError::KeyRequired("a lookup source"));
            }
            if self.sources.iter().any(|s| s.sort) {
                return Err(ExecError::KeyRequired("per-source sorting"));
            }
            if self.mode == CombineMode::Update {
                return Err(ExecError::KeyRequired("UPDATE"));
            }
        }
        if self.mode == CombineMode::Update && (self.first.is_some() || self.last.is_some()) {
            return Err(ExecError::Config(
                "FIRST and LAST are not allowed in UPDATE".to_string(),
            ));
        }
        Ok(())
    }

    /// Validates the configuration, merges the source dictionaries and
    /// opens every source. `active` backs any [`SourceHandle::Active`]
    /// source; files are opened through `opener`.
    pub fn execute(
        self,
        mut active: Option<Dataset>,
        opener: &mut dyn DatasetOpener,
    ) -> Result<CombinedReader, ExecError> {
        self.check()?;

        let active_refs = self
            .sources
            .iter()
            .filter(|s| s.handle == SourceHandle::Active)
            .count();
        if active_refs > 0 && active.is_none() {
            return Err(ExecError::Config(
                "a source names the active dataset but there is none".to_string(),
            ));
        }

        let mut dicts = Vec::with_capacity(self.sources.len());
        let mut readers: Vec<Option<Box<dyn CaseReader>>> = Vec::with_capacity(self.sources.len());
        for spec in &self.sources {
            match &spec.handle {
                SourceHandle::Active => {
                    if let Some(dataset) = &active {
                        dicts.push(dataset.dict.clone());
                    }
                    readers.push(None);
                }
                SourceHandle::File(name) => {
                    let dataset = opener.open(name)?;
                    dicts.push(dataset.dict);
                    readers.push(Some(dataset.reader));
                }
            }
        }

        let merger = SchemaMerger {
            specs: &self.sources,
            dicts: &dicts,
            by: &self.by,
            first: self.first.as_deref(),
            last: self.last.as_deref(),
            drop: &self.drop,
            keep: &self.keep,
        };
        let schema = merger.merge()?;
        let mut warnings = schema.warnings;

        // The active dataset can only be read once. A second reference
        // gets its own copy of the cases.
        if let Some(dataset) = active.take() {
            let mut reader = dataset.reader;
            if active_refs > 1 {
                let cases = read_all(&mut reader)?;
                for (spec, slot) in self.sources.iter().zip(readers.iter_mut()) {
                    if spec.handle == SourceHandle::Active {
                        *slot = Some(Box::new(MemCaseReader::new(cases.clone())));
                    }
                }
            } else if let Some(pos) = self
                .sources
                .iter()
                .position(|s| s.handle == SourceHandle::Active)
            {
                readers[pos] = Some(reader);
            }
        }

        let concatenate = self.mode == CombineMode::Add && self.by.is_empty();
        if concatenate
            && (schema.first.is_some()
                || schema.last.is_some()
                || schema.sources.iter().any(|l| l.in_col.is_some()))
        {
            let warning = Warning::FlagsNotComputed;
            log_warn!("{}", warning);
            warnings.push(warning);
        }

        let mut adapters = Vec::with_capacity(self.sources.len());
        for (((spec, layout), reader), dict) in self
            .sources
            .iter()
            .zip(schema.sources)
            .zip(readers)
            .zip(&dicts)
        {
            let reader = reader.ok_or_else(|| {
                ExecError::Other(format!("no case stream for {}", spec.handle))
            })?;
            let adapter = SourceAdapter::open(
                spec,
                dict,
                layout,
                reader,
                &self.by,
                &self.sort_config,
                concatenate,
            )?;
            adapters.push(adapter);
        }
        if adapters
            .iter()
            .filter(|a| a.role() == SourceRole::Record)
            .all(SourceAdapter::is_exhausted)
        {
            return Err(ExecError::EmptyInput(format!(
                "the {} input",
                self.mode.name()
            )));
        }

        let emitter = CaseEmitter::new(
            &schema.dict,
            schema.in_cols,
            schema.first,
            schema.last,
            !concatenate,
        );
        let executor = match self.mode {
            CombineMode::Match => Executor::Match(MatchFiles::new(adapters, schema.key)),
            CombineMode::Add if concatenate => Executor::Concat(ConcatFiles::new(adapters)),
            CombineMode::Add => Executor::Add(AddFiles::new(adapters, schema.key)),
            CombineMode::Update => Executor::Update(UpdateFiles::new(adapters, schema.key)),
        };
        log_info!(
            "{}: {} sources into {} variables",
            self.mode.name(),
            self.sources.len(),
            schema.dict.len()
        );

        Ok(CombinedReader {
            dict: schema.dict,
            executor,
            emitter,
            warnings,
            state: ReaderState::Running,
        })
    }
}

enum Executor {
    Match(MatchFiles),
    Add(AddFiles),
    Concat(ConcatFiles),
    Update(UpdateFiles),
}

impl Executor {
    fn next(&mut self, emitter: &mut CaseEmitter) -> Result<Option<Case>, ExecError> {
        match self {
            Executor::Match(e) => e.next(emitter),
            Executor::Add(e) => e.next(emitter),
            Executor::Concat(e) => e.next(emitter),
            Executor::Update(e) => e.next(emitter),
        }
    }

    fn end_of_input(&mut self) -> Vec<Warning> {
        match self {
            Executor::Match(e) => e.end_of_input(),
            Executor::Add(e) => e.end_of_input(),
            Executor::Concat(e) => e.end_of_input(),
            Executor::Update(e) => e.end_of_input(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderState {
    Running,
    Done,
    Failed,
}

/// The combined output, pulled one case at a time.
pub struct CombinedReader {
    dict: Dictionary,
    executor: Executor,
    emitter: CaseEmitter,
    warnings: Vec<Warning>,
    state: ReaderState,
}

impl CombinedReader {
    /// The output dictionary.
    pub fn dictionary(&self) -> &Dictionary {
        &self.dict
    }

    /// Warnings so far. End-of-input warnings appear once the reader is
    /// exhausted.
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// Pushes every output case into `writer`. Returns the output
    /// dictionary and every warning issued.
    pub fn execute_into(
        mut self,
        writer: &mut dyn CaseWriter,
    ) -> Result<(Dictionary, Vec<Warning>), ExecError> {
        while let Some(case) = self.next()? {
            writer.write(case)?;
        }
        Ok((self.dict, self.warnings))
    }

    /// Turns the output into a dataset. Warnings issued at end of input are
    /// only logged.
    pub fn into_dataset(self) -> Dataset {
        Dataset::new(self.dict.clone(), Box::new(self))
    }
}

impl CaseReader for CombinedReader {
    fn next(&mut self) -> Result<Option<Case>, ExecError> {
        if self.state != ReaderState::Running {
            return Ok(None);
        }
        match self.executor.next(&mut self.emitter) {
            Ok(Some(case)) => Ok(Some(case)),
            Ok(None) => {
                self.state = ReaderState::Done;
                for warning in self.executor.end_of_input() {
                    log_warn!("{}", warning);
                    self.warnings.push(warning);
                }
                log_debug!("combine: emitted {} cases", self.emitter.emitted());
                Ok(None)
            }
            Err(e) => {
                self.state = ReaderState::Failed;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::Value;
    use crate::dictionary::{VarWidth, Variable};
    use crate::error::ErrorKind;
    use crate::executor::MemCaseWriter;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::HashMap;

    const ASC: SortDirection = SortDirection::Ascending;

    #[derive(Default)]
    struct MemOpener {
        datasets: HashMap<String, (Dictionary, Vec<Case>)>,
    }

    impl MemOpener {
        fn add(&mut self, name: &str, vars: &[(&str, VarWidth)], rows: Vec<Vec<Value>>) {
            self.datasets.insert(name.to_string(), dataset(vars, rows));
        }
    }

    impl DatasetOpener for MemOpener {
        fn open(&mut self, name: &str) -> Result<Dataset, ExecError> {
            self.datasets
                .get(name)
                .cloned()
                .map(|(dict, cases)| Dataset::from_cases(dict, cases))
                .ok_or_else(|| ExecError::Other(format!("no dataset named {name}")))
        }
    }

    fn dataset(vars: &[(&str, VarWidth)], rows: Vec<Vec<Value>>) -> (Dictionary, Vec<Case>) {
        let mut dict = Dictionary::new("UTF-8");
        for (name, width) in vars {
            dict.add_var(Variable::new(name, *width).unwrap()).unwrap();
        }
        (dict, rows.into_iter().map(Case::from_fields).collect())
    }

    fn s(text: &str) -> Value {
        Value::string(text, 1)
    }

    fn n(x: i32) -> Value {
        Value::from(x)
    }

    fn run(
        combine: Combine,
        opener: &mut MemOpener,
    ) -> Result<(Dictionary, Vec<Case>, Vec<Warning>), ExecError> {
        let reader = combine.execute(None, opener)?;
        let mut writer = MemCaseWriter::new();
        let (dict, warnings) = reader.execute_into(&mut writer)?;
        Ok((dict, writer.into_cases(), warnings))
    }

    fn names(dict: &Dictionary) -> Vec<&str> {
        dict.vars().iter().map(|v| v.name()).collect()
    }

    // Two RECORD-style inputs sharing key 1: A has "B" and "C", B has "N".
    fn join_opener() -> MemOpener {
        let mut opener = MemOpener::default();
        opener.add(
            "a",
            &[("id", VarWidth::Numeric), ("x", VarWidth::String(1))],
            vec![vec![n(1), s("B")], vec![n(1), s("C")]],
        );
        opener.add(
            "b",
            &[("id", VarWidth::Numeric), ("y", VarWidth::String(1))],
            vec![vec![n(1), s("N")]],
        );
        opener
    }

    mod match_files {
        use super::*;

        #[test]
        fn test_record_sources_exhaust() {
            let combine = Combine::new(CombineMode::Match)
                .source(SourceSpec::file("a").in_var("ina"))
                .source(SourceSpec::file("b").in_var("inb"))
                .by(&[("id", ASC)])
                .first("first")
                .last("last");
            let (dict, cases, warnings) = run(combine, &mut join_opener()).unwrap();
            assert!(warnings.is_empty());
            assert_eq!(
                names(&dict),
                vec!["id", "x", "y", "ina", "inb", "first", "last"]
            );
            assert_eq!(
                cases,
                vec![
                    Case::from_fields(vec![n(1), s("B"), s("N"), n(1), n(1), n(1), n(0)]),
                    Case::from_fields(vec![n(1), s("C"), s(" "), n(1), n(0), n(0), n(1)]),
                ]
            );
        }

        #[test]
        fn test_lookup_broadcasts() {
            let combine = Combine::new(CombineMode::Match)
                .source(SourceSpec::file("a").in_var("ina"))
                .source(SourceSpec::file("b").lookup().in_var("inb"))
                .by(&[("id", ASC)])
                .first("first")
                .last("last");
            let (_, cases, _) = run(combine, &mut join_opener()).unwrap();
            assert_eq!(
                cases,
                vec![
                    Case::from_fields(vec![n(1), s("B"), s("N"), n(1), n(1), n(1), n(0)]),
                    Case::from_fields(vec![n(1), s("C"), s("N"), n(1), n(1), n(0), n(1)]),
                ]
            );
        }

        #[test]
        fn test_lookup_only_keys_produce_nothing() {
            let mut opener = MemOpener::default();
            opener.add(
                "main",
                &[("id", VarWidth::Numeric)],
                vec![vec![n(2)], vec![n(4)]],
            );
            opener.add(
                "table",
                &[("id", VarWidth::Numeric), ("t", VarWidth::String(1))],
                vec![
                    vec![n(1), s("p")],
                    vec![n(2), s("q")],
                    vec![n(2), s("r")],
                    vec![n(3), s("s")],
                ],
            );
            let combine = Combine::new(CombineMode::Match)
                .source(SourceSpec::file("main"))
                .source(SourceSpec::file("table").lookup().in_var("intable"))
                .by(&[("id", ASC)]);
            let (_, cases, _) = run(combine, &mut opener).unwrap();
            assert_eq!(
                cases,
                vec![
                    Case::from_fields(vec![n(2), s("q"), n(1)]),
                    Case::from_fields(vec![n(4), s(" "), n(0)]),
                ]
            );
        }

        #[test]
        fn test_join_row_counts_and_flags() {
            let mut rng = StdRng::seed_from_u64(7);
            let num_sources = 3;
            let num_keys = 20;
            let counts: Vec<Vec<usize>> = (0..num_sources)
                .map(|_| (0..num_keys).map(|_| rng.gen_range(0..4)).collect())
                .collect();

            let mut opener = MemOpener::default();
            let mut combine = Combine::new(CombineMode::Match)
                .by(&[("id", ASC)])
                .first("first")
                .last("last");
            for (i, per_key) in counts.iter().enumerate() {
                let name = format!("s{i}");
                let var = format!("v{i}");
                let mut rows = Vec::new();
                for (k, &c) in per_key.iter().enumerate() {
                    for j in 0..c {
                        rows.push(vec![n(k as i32), n(j as i32)]);
                    }
                }
                opener.add(
                    &name,
                    &[("id", VarWidth::Numeric), (var.as_str(), VarWidth::Numeric)],
                    rows,
                );
                combine = combine.source(SourceSpec::file(&name).in_var(&format!("in{i}")));
            }

            let (dict, cases, _) = run(combine, &mut opener).unwrap();
            let first = dict.lookup("first").unwrap();
            let last = dict.lookup("last").unwrap();
            let mut pos = 0;
            for k in 0..num_keys {
                let m = counts.iter().map(|c| c[k]).max().unwrap();
                for j in 0..m {
                    let case = &cases[pos];
                    pos += 1;
                    assert_eq!(case.num(0), Some(k as f64));
                    for (i, per_key) in counts.iter().enumerate() {
                        let present = j < per_key[k];
                        let v = dict.lookup(&format!("v{i}")).unwrap();
                        let flag = dict.lookup(&format!("in{i}")).unwrap();
                        assert_eq!(case.num(flag), Some(if present { 1.0 } else { 0.0 }));
                        if present {
                            assert_eq!(case.num(v), Some(j as f64));
                        } else {
                            assert!(case.get(v).is_sysmis());
                        }
                    }
                    assert_eq!(case.num(first), Some(if j == 0 { 1.0 } else { 0.0 }));
                    assert_eq!(case.num(last), Some(if j + 1 == m { 1.0 } else { 0.0 }));
                }
            }
            assert_eq!(pos, cases.len());
        }

        #[test]
        fn test_earlier_source_wins_shared_variable() {
            let mut opener = MemOpener::default();
            opener.add(
                "a",
                &[("id", VarWidth::Numeric), ("v", VarWidth::Numeric)],
                vec![vec![n(1), n(10)]],
            );
            opener.add(
                "b",
                &[("id", VarWidth::Numeric), ("v", VarWidth::Numeric)],
                vec![vec![n(1), n(20)], vec![n(1), n(21)]],
            );
            let combine = Combine::new(CombineMode::Match)
                .source(SourceSpec::file("a"))
                .source(SourceSpec::file("b"))
                .by(&[("id", ASC)]);
            let (_, cases, _) = run(combine, &mut opener).unwrap();
            assert_eq!(
                cases,
                vec![
                    Case::from_fields(vec![n(1), n(10)]),
                    Case::from_fields(vec![n(1), n(21)]),
                ]
            );
        }

        #[test]
        fn test_without_key_aligns_by_position() {
            let (dict, cases) = dataset(
                &[("id", VarWidth::Numeric), ("v", VarWidth::Numeric)],
                vec![vec![n(3), n(30)], vec![n(1), n(10)]],
            );
            let combine = Combine::new(CombineMode::Match)
                .source(SourceSpec::active())
                .source(SourceSpec::active().rename("v", "w").drop(&["id"]));
            let reader = combine
                .execute(
                    Some(Dataset::from_cases(dict, cases)),
                    &mut MemOpener::default(),
                )
                .unwrap();
            assert_eq!(names(reader.dictionary()), vec!["id", "v", "w"]);
            let mut dataset = reader.into_dataset();
            let cases = crate::executor::read_all(&mut dataset.reader).unwrap();
            assert_eq!(
                cases,
                vec![
                    Case::from_fields(vec![n(3), n(30), n(30)]),
                    Case::from_fields(vec![n(1), n(10), n(10)]),
                ]
            );
        }

        #[test]
        fn test_sort_requested_per_source() {
            let mut opener = MemOpener::default();
            opener.add(
                "a",
                &[("id", VarWidth::Numeric)],
                vec![vec![n(3)], vec![n(1)], vec![n(2)]],
            );
            opener.add(
                "b",
                &[("id", VarWidth::Numeric), ("v", VarWidth::Numeric)],
                vec![vec![n(1), n(100)], vec![n(3), n(300)]],
            );
            let combine = Combine::new(CombineMode::Match)
                .source(SourceSpec::file("a").sorted())
                .source(SourceSpec::file("b"))
                .by(&[("id", ASC)])
                .sort_config(SortConfig::with_buffers(1));
            let (_, cases, _) = run(combine, &mut opener).unwrap();
            assert_eq!(
                cases,
                vec![
                    Case::from_fields(vec![n(1), n(100)]),
                    Case::from_fields(vec![n(2), Value::SYSMIS]),
                    Case::from_fields(vec![n(3), n(300)]),
                ]
            );
        }

        #[test]
        fn test_unsorted_source_fails() {
            let mut opener = MemOpener::default();
            opener.add(
                "a",
                &[("id", VarWidth::Numeric)],
                vec![vec![n(1)], vec![n(3)], vec![n(2)]],
            );
            let combine = Combine::new(CombineMode::Match)
                .source(SourceSpec::file("a"))
                .by(&[("id", ASC)]);
            let mut reader = combine.execute(None, &mut opener).unwrap();
            assert!(reader.next().unwrap().is_some());
            let err = reader.next().err().unwrap();
            assert_eq!(err.kind(), ErrorKind::Data);
            assert!(reader.next().unwrap().is_none());
        }

        #[test]
        fn test_descending_key() {
            let mut opener = MemOpener::default();
            opener.add(
                "a",
                &[("id", VarWidth::Numeric)],
                vec![vec![n(3)], vec![n(1)]],
            );
            opener.add(
                "b",
                &[("id", VarWidth::Numeric), ("v", VarWidth::Numeric)],
                vec![vec![n(2), n(2)], vec![n(1), n(1)]],
            );
            let combine = Combine::new(CombineMode::Match)
                .source(SourceSpec::file("a"))
                .source(SourceSpec::file("b"))
                .by(&[("id", SortDirection::Descending)]);
            let (_, cases, _) = run(combine, &mut opener).unwrap();
            let ids: Vec<f64> = cases.iter().map(|c| c.num(0).unwrap()).collect();
            assert_eq!(ids, vec![3.0, 2.0, 1.0]);
        }
    }

    mod add_files {
        use super::*;

        fn union_opener() -> MemOpener {
            let mut opener = MemOpener::default();
            opener.add(
                "a",
                &[("k", VarWidth::Numeric), ("x", VarWidth::String(1))],
                vec![vec![n(1), s("X")], vec![n(2), s("Z")]],
            );
            opener.add(
                "b",
                &[("k", VarWidth::Numeric), ("y", VarWidth::String(1))],
                vec![vec![n(1), s("Y")]],
            );
            opener
        }

        #[test]
        fn test_keyed_union_keeps_rows_distinct() {
            let combine = Combine::new(CombineMode::Add)
                .source(SourceSpec::file("a").in_var("ina"))
                .source(SourceSpec::file("b").in_var("inb"))
                .by(&[("k", ASC)])
                .first("first")
                .last("last");
            let (dict, cases, _) = run(combine, &mut union_opener()).unwrap();
            assert_eq!(
                names(&dict),
                vec!["k", "x", "y", "ina", "inb", "first", "last"]
            );
            assert_eq!(
                cases,
                vec![
                    Case::from_fields(vec![n(1), s("X"), s(" "), n(1), n(0), n(1), n(0)]),
                    Case::from_fields(vec![n(1), s(" "), s("Y"), n(0), n(1), n(0), n(1)]),
                    Case::from_fields(vec![n(2), s("Z"), s(" "), n(1), n(0), n(1), n(1)]),
                ]
            );
        }

        #[test]
        fn test_union_widens_strings() {
            let mut opener = MemOpener::default();
            opener.add(
                "a",
                &[("k", VarWidth::Numeric), ("name", VarWidth::String(2))],
                vec![vec![n(1), Value::string("ab", 2)]],
            );
            opener.add(
                "b",
                &[("k", VarWidth::Numeric), ("name", VarWidth::String(4))],
                vec![vec![n(0), Value::string("wxyz", 4)]],
            );
            let combine = Combine::new(CombineMode::Add)
                .source(SourceSpec::file("a"))
                .source(SourceSpec::file("b"))
                .by(&[("k", ASC)]);
            let (dict, cases, _) = run(combine, &mut opener).unwrap();
            assert_eq!(dict.var(1).width(), VarWidth::String(4));
            assert_eq!(
                cases,
                vec![
                    Case::from_fields(vec![n(0), Value::string("wxyz", 4)]),
                    Case::from_fields(vec![n(1), Value::string("ab", 4)]),
                ]
            );
        }

        #[test]
        fn test_concatenation_without_key() {
            let combine = Combine::new(CombineMode::Add)
                .source(SourceSpec::file("b").in_var("inb"))
                .source(SourceSpec::file("a"));
            let (_, cases, warnings) = run(combine, &mut union_opener()).unwrap();
            assert_eq!(warnings, vec![Warning::FlagsNotComputed]);
            // k, y, x, inb
            assert_eq!(
                cases,
                vec![
                    Case::from_fields(vec![n(1), s("Y"), s(" "), Value::SYSMIS]),
                    Case::from_fields(vec![n(1), s(" "), s("X"), Value::SYSMIS]),
                    Case::from_fields(vec![n(2), s(" "), s("Z"), Value::SYSMIS]),
                ]
            );
        }
    }

    mod update {
        use super::*;
        use crate::dictionary::MissingValues;

        fn a4(text: &str) -> Value {
            Value::string(text, 4)
        }

        #[test]
        fn test_master_updated_by_transactions() {
            let mut opener = MemOpener::default();
            opener.add(
                "master",
                &[
                    ("id", VarWidth::Numeric),
                    ("name", VarWidth::String(4)),
                    ("score", VarWidth::Numeric),
                ],
                vec![
                    vec![n(1), a4("ann"), n(10)],
                    vec![n(2), a4("bob"), n(20)],
                    vec![n(2), a4("bob2"), n(21)],
                    vec![n(4), a4("dan"), n(40)],
                ],
            );
            opener.add(
                "trans",
                &[
                    ("id", VarWidth::Numeric),
                    ("score", VarWidth::Numeric),
                    ("name", VarWidth::String(4)),
                ],
                vec![
                    vec![n(2), Value::SYSMIS, a4("bea")],
                    vec![n(3), n(30), a4("cy")],
                    vec![n(4), n(44), a4("")],
                ],
            );
            let combine = Combine::new(CombineMode::Update)
                .source(SourceSpec::file("master"))
                .source(SourceSpec::file("trans"))
                .by(&[("id", ASC)]);
            let (dict, cases, warnings) = run(combine, &mut opener).unwrap();
            assert_eq!(names(&dict), vec!["id", "name", "score"]);
            assert_eq!(
                cases,
                vec![
                    Case::from_fields(vec![n(1), a4("ann"), n(10)]),
                    Case::from_fields(vec![n(2), a4("bea"), n(20)]),
                    Case::from_fields(vec![n(2), a4("bob2"), n(21)]),
                    Case::from_fields(vec![n(3), a4("cy"), n(30)]),
                    Case::from_fields(vec![n(4), a4("dan"), n(44)]),
                ]
            );
            assert_eq!(warnings, vec![Warning::DuplicateMasterKeys(1)]);
        }

        #[test]
        fn test_transactions_apply_in_order() {
            let mut opener = MemOpener::default();
            opener.add(
                "master",
                &[("id", VarWidth::Numeric), ("v", VarWidth::Numeric)],
                vec![vec![n(1), n(0)]],
            );
            opener.add(
                "t1",
                &[("id", VarWidth::Numeric), ("v", VarWidth::Numeric)],
                vec![vec![n(1), n(5)], vec![n(1), n(6)]],
            );
            opener.add(
                "t2",
                &[("id", VarWidth::Numeric), ("v", VarWidth::Numeric)],
                vec![vec![n(1), n(7)]],
            );
            let combine = Combine::new(CombineMode::Update)
                .source(SourceSpec::file("master"))
                .source(SourceSpec::file("t1").in_var("in1"))
                .source(SourceSpec::file("t2"))
                .by(&[("id", ASC)]);
            let (_, cases, warnings) = run(combine, &mut opener).unwrap();
            assert_eq!(cases, vec![Case::from_fields(vec![n(1), n(7), n(1)])]);
            assert!(warnings.is_empty());
        }

        #[test]
        fn test_transaction_missing_values_are_its_own() {
            let vars = [("id", VarWidth::Numeric), ("v", VarWidth::Numeric)];
            let mut opener = MemOpener::default();
            for (name, missing, rows) in [
                ("master", 9, vec![vec![n(1), n(10)], vec![n(2), n(20)]]),
                ("trans", -1, vec![vec![n(1), n(9)], vec![n(2), n(-1)]]),
            ] {
                let (mut dict, cases) = dataset(&vars, rows);
                dict.var_mut(1)
                    .set_missing_values(MissingValues::new(vec![n(missing)], None).unwrap());
                opener.datasets.insert(name.to_string(), (dict, cases));
            }
            let combine = Combine::new(CombineMode::Update)
                .source(SourceSpec::file("master"))
                .source(SourceSpec::file("trans"))
                .by(&[("id", ASC)]);
            let (_, cases, _) = run(combine, &mut opener).unwrap();
            assert_eq!(
                cases,
                vec![
                    Case::from_fields(vec![n(1), n(9)]),
                    Case::from_fields(vec![n(2), n(20)]),
                ]
            );
        }
    }

    mod configuration {
        use super::*;

        fn expect_err(combine: Combine) -> ExecError {
            combine.execute(None, &mut join_opener()).err().unwrap()
        }

        #[test]
        fn test_lookup_needs_key() {
            let err = expect_err(
                Combine::new(CombineMode::Match)
                    .source(SourceSpec::file("a"))
                    .source(SourceSpec::file("b").lookup()),
            );
            assert!(matches!(err, ExecError::KeyRequired(_)));
        }

        #[test]
        fn test_lookup_only_in_match() {
            let err = expect_err(
                Combine::new(CombineMode::Add)
                    .source(SourceSpec::file("a"))
                    .source(SourceSpec::file("b").lookup())
                    .by(&[("id", ASC)]),
            );
            assert_eq!(err.kind(), ErrorKind::Configuration);
        }

        #[test]
        fn test_sort_needs_key() {
            let err = expect_err(
                Combine::new(CombineMode::Match).source(SourceSpec::file("a").sorted()),
            );
            assert!(matches!(err, ExecError::KeyRequired(_)));
        }

        #[test]
        fn test_update_rules() {
            let err = expect_err(Combine::new(CombineMode::Update).source(SourceSpec::file("a")));
            assert!(matches!(err, ExecError::KeyRequired("UPDATE")));
            let err = expect_err(
                Combine::new(CombineMode::Update)
                    .source(SourceSpec::file("a"))
                    .by(&[("id", ASC)])
                    .first("f"),
            );
            assert_eq!(err.kind(), ErrorKind::Configuration);
        }

        #[test]
        fn test_needs_a_record_source() {
            let err = expect_err(
                Combine::new(CombineMode::Match)
                    .source(SourceSpec::file("a").lookup())
                    .by(&[("id", ASC)]),
            );
            assert_eq!(err.kind(), ErrorKind::Configuration);
        }

        #[test]
        fn test_active_dataset_required() {
            let err = expect_err(Combine::new(CombineMode::Add).source(SourceSpec::active()));
            assert_eq!(err.kind(), ErrorKind::Configuration);
        }

        #[test]
        fn test_missing_by_variable_reported_before_reading() {
            let err = expect_err(
                Combine::new(CombineMode::Match)
                    .source(SourceSpec::file("a"))
                    .source(SourceSpec::file("b"))
                    .by(&[("x", ASC)]),
            );
            assert!(matches!(err, ExecError::MissingByVariable { .. }));
        }

        #[test]
        fn test_empty_inputs() {
            let mut opener = join_opener();
            opener.add("empty", &[("id", VarWidth::Numeric)], Vec::new());

            let err = Combine::new(CombineMode::Add)
                .source(SourceSpec::file("empty"))
                .execute(None, &mut opener)
                .err()
                .unwrap();
            assert_eq!(err.kind(), ErrorKind::EmptyInput);

            let combine = Combine::new(CombineMode::Add)
                .source(SourceSpec::file("empty"))
                .source(SourceSpec::file("a"))
                .by(&[("id", ASC)]);
            let (_, cases, _) = run(combine, &mut opener).unwrap();
            assert_eq!(cases.len(), 2);
        }

        #[test]
        fn test_lookup_rows_alone_are_empty_input() {
            let mut opener = join_opener();
            opener.add("empty", &[("id", VarWidth::Numeric)], Vec::new());
            let err = Combine::new(CombineMode::Match)
                .source(SourceSpec::file("empty"))
                .source(SourceSpec::file("b").lookup())
                .by(&[("id", ASC)])
                .execute(None, &mut opener)
                .err()
                .unwrap();
            assert_eq!(err.kind(), ErrorKind::EmptyInput);
            assert!(err.to_string().contains("all data missing"));
        }

        #[test]
        fn test_by_variable_may_be_dropped() {
            let combine = Combine::new(CombineMode::Match)
                .source(SourceSpec::file("a"))
                .source(SourceSpec::file("b"))
                .by(&[("id", ASC)])
                .drop(&["id"]);
            let (dict, cases, _) = run(combine, &mut join_opener()).unwrap();
            assert_eq!(names(&dict), vec!["x", "y"]);
            assert_eq!(
                cases,
                vec![
                    Case::from_fields(vec![s("B"), s("N")]),
                    Case::from_fields(vec![s("C"), s(" ")]),
                ]
            );
        }
    }
}
