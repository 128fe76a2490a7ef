use crate::case::{Case, Value};
use crate::error::ExecError;
use crate::key::SortKey;

use super::emit::CaseEmitter;
use super::source::SourceAdapter;
use super::{SourceRole, Warning};

/// Record join.
///
/// A group is the current key value; it lasts while any RECORD source still
/// has a head with that key. Each output row consumes one case from every
/// RECORD source that still matches, so row `j` lines up the `j`-th case
/// of each source. LOOKUP sources are scanned forward to the key and their
/// matching row is applied to every row without being consumed.
///
/// Sources are applied from last to first, so when several sources share a
/// variable the earliest-listed one wins.
pub(crate) struct MatchFiles {
    sources: Vec<SourceAdapter>,
    key: SortKey,
    group: Option<Vec<Value>>,
    row: u64,
    groups: u64,
}

impl MatchFiles {
    pub fn new(sources: Vec<SourceAdapter>, key: SortKey) -> Self {
        Self {
            sources,
            key,
            group: None,
            row: 0,
            groups: 0,
        }
    }

    fn record_sources(&self) -> impl Iterator<Item = &SourceAdapter> {
        self.sources.iter().filter(|s| s.role() == SourceRole::Record)
    }

    /// Smallest head key over the RECORD sources.
    fn min_record_key(&self) -> Option<Vec<Value>> {
        self.record_sources()
            .filter_map(SourceAdapter::head_key)
            .min_by(|a, b| self.key.compare_values(a, b))
            .map(<[Value]>::to_vec)
    }

    fn group_continues(&self, by: &[Value]) -> bool {
        self.record_sources().any(|s| s.head_matches(by))
    }

    pub fn next(&mut self, emitter: &mut CaseEmitter) -> Result<Option<Case>, ExecError> {
        let by = match self.group.take() {
            Some(by) if self.group_continues(&by) => by,
            _ => {
                let Some(by) = self.min_record_key() else {
                    return Ok(None);
                };
                self.row = 0;
                self.groups += 1;
                by
            }
        };

        let mut out = emitter.create_output_case();
        for source in self.sources.iter_mut().rev() {
            match source.role() {
                SourceRole::Record => {
                    if source.head_matches(&by) {
                        source.apply_head(&mut out);
                        source.advance()?;
                    }
                }
                SourceRole::Lookup => {
                    if source.scan_to(&by)? {
                        source.apply_head(&mut out);
                    }
                }
            }
        }

        let first = self.row == 0;
        self.row += 1;
        let last = !self.group_continues(&by);
        self.group = Some(by);
        Ok(Some(emitter.emit(out, first, last)))
    }

    pub fn end_of_input(&mut self) -> Vec<Warning> {
        log_debug!("match: {} key groups", self.groups);
        Vec::new()
    }
}
