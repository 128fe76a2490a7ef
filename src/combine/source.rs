use std::cmp::Ordering;

use crate::case::{Case, Value};
use crate::config::SortConfig;
use crate::dictionary::{Dictionary, VarWidth};
use crate::error::ExecError;
use crate::executor::sort::ExternalSort;
use crate::executor::CaseReader;
use crate::key::{SortDirection, SortField, SortKey};

use super::schema::{ColumnMap, SourceLayout};
use super::{SourceRole, SourceSpec};

/// Pulls one source's cases in BY order and writes them into the output
/// column space.
///
/// The adapter holds one case of lookahead (`head`). A lookup source never
/// exposes two heads with the same key: later rows for a key already seen
/// are discarded as they are read.
pub(crate) struct SourceAdapter {
    name: String,
    role: SourceRole,
    reader: Box<dyn CaseReader>,
    widths: Vec<VarWidth>,
    map: Vec<ColumnMap>,
    in_col: Option<usize>,
    /// BY key over the source's own columns.
    key: SortKey,
    head: Option<Case>,
    head_key: Vec<Value>,
    rows_read: u64,
    discarded: u64,
}

impl SourceAdapter {
    /// Wraps `reader`, sorting it first if `spec` asks for that, and reads
    /// the first case.
    pub fn open(
        spec: &SourceSpec,
        dict: &Dictionary,
        layout: SourceLayout,
        reader: Box<dyn CaseReader>,
        by: &[(String, SortDirection)],
        sort_config: &SortConfig,
        concatenate: bool,
    ) -> Result<Self, ExecError> {
        let fields = layout
            .by_cols
            .iter()
            .zip(by)
            .map(|(&column, (_, direction))| SortField {
                column,
                width: dict.var(column).width(),
                direction: *direction,
            })
            .collect();
        let key = SortKey::new(fields);

        let reader: Box<dyn CaseReader> = if spec.sort {
            let mut reader = reader;
            log_debug!("combine: sorting {}", spec.handle);
            let sorted = ExternalSort::new(key.clone(), sort_config.clone())
                .execute_allow_empty(&mut reader)?;
            Box::new(sorted)
        } else {
            reader
        };

        let mut adapter = Self {
            name: spec.handle.to_string(),
            role: spec.role,
            reader,
            widths: dict.widths(),
            map: layout.map,
            in_col: if concatenate { None } else { layout.in_col },
            key,
            head: None,
            head_key: Vec::new(),
            rows_read: 0,
            discarded: 0,
        };
        adapter.advance()?;
        Ok(adapter)
    }

    pub fn role(&self) -> SourceRole {
        self.role
    }

    pub fn is_exhausted(&self) -> bool {
        self.head.is_none()
    }

    /// Key values of the current head, if any.
    pub fn head_key(&self) -> Option<&[Value]> {
        self.head.as_ref().map(|_| self.head_key.as_slice())
    }

    /// Compares the head's key with `by` using the key's directions.
    /// An exhausted source compares greater than everything.
    pub fn compare_head(&self, by: &[Value]) -> Ordering {
        match self.head_key() {
            Some(k) => self.key.compare_values(k, by),
            None => Ordering::Greater,
        }
    }

    pub fn head_matches(&self, by: &[Value]) -> bool {
        self.compare_head(by).is_eq()
    }

    /// Moves to the next case, checking that the key does not go backwards.
    pub fn advance(&mut self) -> Result<(), ExecError> {
        loop {
            let Some(case) = self.reader.next()? else {
                if self.head.take().is_some() {
                    log_debug!(
                        "combine: {} exhausted after {} cases ({} duplicate lookup rows discarded)",
                        self.name,
                        self.rows_read,
                        self.discarded
                    );
                }
                return Ok(());
            };
            self.rows_read += 1;
            if !case.conforms(&self.widths) {
                return Err(ExecError::Malformed(format!(
                    "case {} of {} does not match its dictionary",
                    self.rows_read, self.name
                )));
            }
            let key = self.key.extract(&case);

            if self.head.is_some() {
                match self.key.compare_values(&key, &self.head_key) {
                    Ordering::Less => {
                        return Err(ExecError::UnsortedSource {
                            source_name: self.name.clone(),
                            case_number: self.rows_read,
                        });
                    }
                    Ordering::Equal if self.role == SourceRole::Lookup => {
                        self.discarded += 1;
                        continue;
                    }
                    _ => {}
                }
            }
            self.head = Some(case);
            self.head_key = key;
            return Ok(());
        }
    }

    /// Lookup access: skips every case whose key is below `by` and reports
    /// whether the head now matches. The matching case is not consumed.
    pub fn scan_to(&mut self, by: &[Value]) -> Result<bool, ExecError> {
        while self.compare_head(by).is_lt() {
            self.advance()?;
        }
        Ok(self.head_matches(by))
    }

    /// Copies the head's values into `out` and sets the source's IN flag.
    pub fn apply_head(&self, out: &mut Case) {
        if let Some(case) = &self.head {
            for m in &self.map {
                let mut value = case.get(m.src).clone();
                value.resize(m.width);
                out.set(m.dst, value);
            }
            self.set_in_flag(out);
        }
    }

    /// Like [`apply_head`](Self::apply_head) but leaves `out` alone wherever
    /// the head's value is missing by this source's own declaration, or an
    /// all-blank string.
    pub fn apply_head_present(&self, out: &mut Case) {
        if let Some(case) = &self.head {
            for m in &self.map {
                let value = case.get(m.src);
                if value.is_spaces() || m.missing.is_missing(value) {
                    continue;
                }
                let mut value = value.clone();
                value.resize(m.width);
                out.set(m.dst, value);
            }
            self.set_in_flag(out);
        }
    }

    fn set_in_flag(&self, out: &mut Case) {
        if let Some(col) = self.in_col {
            out.set(col, Value::from(1));
        }
    }
}
