use crate::case::{Case, Value};
use crate::error::ExecError;
use crate::key::SortKey;

use super::emit::CaseEmitter;
use super::source::SourceAdapter;
use super::Warning;

/// Master/transaction update. The first source is the master.
///
/// For each key value the row starts from the first source holding that
/// key. Every later case with the key, from the same transaction source or
/// any later one, overwrites the row with the values its own dictionary
/// does not declare missing. Extra master cases at the key are passed
/// through untouched after the updated row.
pub(crate) struct UpdateFiles {
    sources: Vec<SourceAdapter>,
    key: SortKey,
    /// Set while surplus master cases at this key are being passed through.
    master_dup: Option<Vec<Value>>,
    duplicate_keys: u64,
}

impl UpdateFiles {
    pub fn new(sources: Vec<SourceAdapter>, key: SortKey) -> Self {
        Self {
            sources,
            key,
            master_dup: None,
            duplicate_keys: 0,
        }
    }

    fn min_key(&self) -> Option<Vec<Value>> {
        self.sources
            .iter()
            .filter_map(SourceAdapter::head_key)
            .min_by(|a, b| self.key.compare_values(a, b))
            .map(<[Value]>::to_vec)
    }

    pub fn next(&mut self, emitter: &mut CaseEmitter) -> Result<Option<Case>, ExecError> {
        if let Some(by) = &self.master_dup {
            let master = &mut self.sources[0];
            if master.head_matches(by) {
                let mut out = emitter.create_output_case();
                master.apply_head(&mut out);
                master.advance()?;
                return Ok(Some(emitter.emit(out, false, false)));
            }
            self.master_dup = None;
        }

        let Some(by) = self.min_key() else {
            return Ok(None);
        };
        let mut out = emitter.create_output_case();
        let mut base_from = None;
        for (idx, source) in self.sources.iter_mut().enumerate() {
            while source.head_matches(&by) {
                if base_from.is_none() {
                    source.apply_head(&mut out);
                    base_from = Some(idx);
                } else {
                    source.apply_head_present(&mut out);
                }
                source.advance()?;
                if idx == 0 {
                    break;
                }
            }
        }

        if base_from == Some(0) && self.sources[0].head_matches(&by) {
            self.duplicate_keys += 1;
            self.master_dup = Some(by);
        }
        Ok(Some(emitter.emit(out, false, false)))
    }

    pub fn end_of_input(&mut self) -> Vec<Warning> {
        if self.duplicate_keys > 0 {
            vec![Warning::DuplicateMasterKeys(self.duplicate_keys)]
        } else {
            Vec::new()
        }
    }
}
