use crate::case::{Case, Value};
use crate::error::ExecError;
use crate::key::SortKey;

use super::emit::CaseEmitter;
use super::source::SourceAdapter;
use super::Warning;

/// Key-ordered union. Each step takes the source with the smallest head
/// key, the lowest-listed source on ties, and turns that one case into an
/// output row.
pub(crate) struct AddFiles {
    sources: Vec<SourceAdapter>,
    key: SortKey,
    prev: Option<Vec<Value>>,
}

impl AddFiles {
    pub fn new(sources: Vec<SourceAdapter>, key: SortKey) -> Self {
        Self {
            sources,
            key,
            prev: None,
        }
    }

    fn min_source(&self) -> Option<usize> {
        let mut best: Option<(usize, &[Value])> = None;
        for (idx, source) in self.sources.iter().enumerate() {
            let Some(k) = source.head_key() else {
                continue;
            };
            let smaller = match best {
                Some((_, b)) => self.key.compare_values(k, b).is_lt(),
                None => true,
            };
            if smaller {
                best = Some((idx, k));
            }
        }
        best.map(|(idx, _)| idx)
    }

    pub fn next(&mut self, emitter: &mut CaseEmitter) -> Result<Option<Case>, ExecError> {
        let Some(idx) = self.min_source() else {
            return Ok(None);
        };
        let source = &mut self.sources[idx];
        let by = source.head_key().map(<[Value]>::to_vec).unwrap_or_default();
        let mut out = emitter.create_output_case();
        source.apply_head(&mut out);
        source.advance()?;

        let first = self
            .prev
            .as_ref()
            .map_or(true, |p| self.key.compare_values(p, &by).is_ne());
        let last = !self.sources.iter().any(|s| s.head_matches(&by));
        self.prev = Some(by);
        Ok(Some(emitter.emit(out, first, last)))
    }

    pub fn end_of_input(&mut self) -> Vec<Warning> {
        Vec::new()
    }
}

/// Sources one after another, in listing order.
pub(crate) struct ConcatFiles {
    sources: Vec<SourceAdapter>,
    current: usize,
}

impl ConcatFiles {
    pub fn new(sources: Vec<SourceAdapter>) -> Self {
        Self {
            sources,
            current: 0,
        }
    }

    pub fn next(&mut self, emitter: &mut CaseEmitter) -> Result<Option<Case>, ExecError> {
        while let Some(source) = self.sources.get_mut(self.current) {
            if source.is_exhausted() {
                self.current += 1;
                continue;
            }
            let mut out = emitter.create_output_case();
            source.apply_head(&mut out);
            source.advance()?;
            return Ok(Some(emitter.emit(out, false, false)));
        }
        Ok(None)
    }

    pub fn end_of_input(&mut self) -> Vec<Warning> {
        Vec::new()
    }
}
