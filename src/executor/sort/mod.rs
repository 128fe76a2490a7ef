//! Memory-bounded, stable external sort of a case stream.
//!
//! The partition phase fills a [`SortBuffer`] with encoded cases until the
//! [`MemoryPolicy`](crate::config::MemoryPolicy) bound is reached, sorts it
//! and spills it as a run. The merge phase combines the runs through a
//! heap of run indexes and hands cases out one at a time.
//!
//! Every record key is the case's normalized sort key followed by its input
//! sequence number, so keys are unique: the output order is stable and does
//! not depend on how the input was split into runs.

pub mod merge;
pub mod page;
pub mod run;

use std::collections::VecDeque;
use std::time::Instant;

use crate::case::Case;
use crate::config::SortConfig;
use crate::error::ExecError;
use crate::executor::{CaseReader, Dataset};
use crate::key::{SortDirection, SortKey};

use merge::MergeIter;
use page::{slot::SLOT_SIZE, SortBuffer};
use run::{RunCursor, RunFile, RunWriter, SortedRun};

pub struct ExternalSort {
    key: SortKey,
    config: SortConfig,
}

impl ExternalSort {
    pub fn new(key: SortKey, config: SortConfig) -> Self {
        Self { key, config }
    }

    pub fn key(&self) -> &SortKey {
        &self.key
    }

    /// Sorts everything `input` yields. Fails with an empty-input error if
    /// there is nothing to sort.
    pub fn execute(&self, input: &mut dyn CaseReader) -> Result<SortedCaseReader, ExecError> {
        let sorted = self.execute_allow_empty(input)?;
        if sorted.total == 0 {
            return Err(ExecError::EmptyInput("the sort input".to_string()));
        }
        Ok(sorted)
    }

    pub(crate) fn execute_allow_empty(
        &self,
        input: &mut dyn CaseReader,
    ) -> Result<SortedCaseReader, ExecError> {
        let start_generation = Instant::now();
        let (runs, total) = self.run_generation(input)?;
        log_debug!(
            "sort: {} cases in {} runs, generation took {:?}",
            total,
            runs.len(),
            start_generation.elapsed()
        );

        let start_merge = Instant::now();
        let merge = self.run_merge(runs)?;
        log_debug!(
            "sort: final merge fan-in {}, intermediate merging took {:?}",
            merge.fan_in(),
            start_merge.elapsed()
        );
        Ok(SortedCaseReader { merge, total })
    }

    fn run_generation(
        &self,
        input: &mut dyn CaseReader,
    ) -> Result<(Vec<SortedRun>, u64), ExecError> {
        let temp_dir = self.config.temp_dir.as_deref();
        let mut sort_buffer: Option<SortBuffer> = None;
        let mut runs = Vec::new();
        let mut seq: u64 = 0;

        while let Some(case) = input.next()? {
            if !self.key.fits(&case) {
                return Err(ExecError::Malformed(format!(
                    "case {} does not have the columns of the sort key",
                    seq + 1
                )));
            }
            let mut key = case.to_normalized_key_bytes(&self.key);
            key.extend_from_slice(&seq.to_be_bytes());
            seq += 1;
            let val = case.to_bytes()?;

            let sbuf = sort_buffer.get_or_insert_with(|| {
                let case_size = key.len() + val.len() + SLOT_SIZE;
                let max_cases = self.config.policy.max_cases(case_size);
                log_trace!("sort: {} bytes per case, {} cases per run", case_size, max_cases);
                SortBuffer::new(max_cases)
            });
            if !sbuf.append(&key, &val) {
                sbuf.sort();
                runs.push(SortedRun::Spilled(RunFile::from_sort_buffer(temp_dir, sbuf)?));
                log_trace!("sort: spilled run {} of {} cases", runs.len(), sbuf.len());
                sbuf.reset();
                sbuf.append(&key, &val);
            }
        }

        if let Some(mut sbuf) = sort_buffer {
            if !sbuf.is_empty() {
                sbuf.sort();
                if runs.is_empty() {
                    runs.push(SortedRun::Memory(sbuf));
                } else {
                    runs.push(SortedRun::Spilled(RunFile::from_sort_buffer(temp_dir, &sbuf)?));
                }
            }
        }
        Ok((runs, seq))
    }

    // Merges runs in groups of `max_merge_order` into new spilled runs until
    // few enough remain, then returns the lazy final merge.
    fn run_merge(&self, runs: Vec<SortedRun>) -> Result<MergeIter<RunCursor>, ExecError> {
        let order = self.config.merge_order();
        let mut runs: VecDeque<SortedRun> = runs.into();
        let mut passes = 0;

        while runs.len() > order {
            let step_inputs: Vec<RunCursor> =
                runs.drain(..order).map(SortedRun::into_cursor).collect();
            let mut writer = RunWriter::new(self.config.temp_dir.as_deref())?;
            let mut merge = MergeIter::new(step_inputs)?;
            while let Some((key, val)) = merge.next_record()? {
                writer.append(key, val)?;
            }
            runs.push_back(SortedRun::Spilled(writer.finish()?));
            passes += 1;
        }
        if passes > 0 {
            log_debug!("sort: {} intermediate merges", passes);
        }

        MergeIter::new(runs.into_iter().map(SortedRun::into_cursor).collect())
    }
}

/// Lazily yields the sorted cases.
pub struct SortedCaseReader {
    merge: MergeIter<RunCursor>,
    total: u64,
}

impl SortedCaseReader {
    /// Number of cases the sort consumed.
    pub fn total(&self) -> u64 {
        self.total
    }
}

impl CaseReader for SortedCaseReader {
    fn next(&mut self) -> Result<Option<Case>, ExecError> {
        match self.merge.next_record()? {
            Some((_, val)) => Ok(Some(Case::from_bytes(val)?)),
            None => Ok(None),
        }
    }
}

/// Sorts `input` by `key` within the bounds of `config`.
pub fn sort(
    input: &mut dyn CaseReader,
    key: &SortKey,
    config: &SortConfig,
) -> Result<SortedCaseReader, ExecError> {
    ExternalSort::new(key.clone(), config.clone()).execute(input)
}

/// Sorts a whole dataset by the named variables. The dictionary is unchanged.
pub fn sort_dataset<S: AsRef<str>>(
    mut dataset: Dataset,
    by: &[(S, SortDirection)],
    config: &SortConfig,
) -> Result<Dataset, ExecError> {
    let key = SortKey::from_names(&dataset.dict, by)?;
    let sorted = sort(&mut dataset.reader, &key, config)?;
    Ok(Dataset::new(dataset.dict, Box::new(sorted)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::Value;
    use crate::config::MemoryPolicy;
    use crate::dictionary::{Dictionary, Variable};
    use crate::error::ErrorKind;
    use crate::executor::{read_all, MemCaseReader};
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};
    use rstest::rstest;

    fn dict() -> Dictionary {
        let mut dict = Dictionary::new("UTF-8");
        dict.add_var(Variable::numeric("k").unwrap()).unwrap();
        dict.add_var(Variable::string("s", 4).unwrap()).unwrap();
        dict.add_var(Variable::numeric("seq").unwrap()).unwrap();
        dict
    }

    // 100 cases over 30 distinct keys (so plenty of duplicates), with a
    // sequence column recording input order.
    fn keyed_cases(seed: u64) -> Vec<Case> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..100i32)
            .map(|i| {
                let k: i32 = rng.gen_range(0..30);
                let k = if k == 0 { Value::SYSMIS } else { Value::from(k) };
                let s = ["ab", "b", "abc", "z"][rng.gen_range(0..4)];
                Case::from_fields(vec![k, Value::string(s, 4), Value::from(i)])
            })
            .collect()
    }

    fn sort_cases(cases: Vec<Case>, key: &SortKey, config: SortConfig) -> Vec<Case> {
        let mut input = MemCaseReader::new(cases);
        let mut sorted = sort(&mut input, key, &config).unwrap();
        read_all(&mut sorted).unwrap()
    }

    fn reference_sort(mut cases: Vec<Case>, key: &SortKey) -> Vec<Case> {
        // Vec::sort_by is stable.
        cases.sort_by(|a, b| key.compare(a, b));
        cases
    }

    #[rstest]
    #[case(1)]
    #[case(2)]
    #[case(5)]
    #[case(10)]
    #[case(100)]
    #[case(1000)]
    fn test_output_independent_of_buffer_count(#[case] buffers: usize) {
        let d = dict();
        let key = SortKey::from_names(
            &d,
            &[("k", SortDirection::Ascending), ("s", SortDirection::Descending)],
        )
        .unwrap();
        let cases = keyed_cases(1);
        let expected = reference_sort(cases.clone(), &key);
        let result = sort_cases(cases, &key, SortConfig::with_buffers(buffers));
        assert_eq!(result, expected);
    }

    #[rstest]
    #[case(2, 2)]
    #[case(3, 3)]
    #[case(7, 2)]
    fn test_multi_pass_merge(#[case] buffers: usize, #[case] order: usize) {
        let d = dict();
        let key = SortKey::from_names(&d, &[("k", SortDirection::Descending)]).unwrap();
        let cases = keyed_cases(2);
        let config = SortConfig {
            policy: MemoryPolicy::FixedSizeLimit(buffers),
            max_merge_order: order,
            temp_dir: None,
        };
        let expected = reference_sort(cases.clone(), &key);
        assert_eq!(sort_cases(cases, &key, config), expected);
    }

    #[test]
    fn test_stable_for_equal_keys() {
        let d = dict();
        let key = SortKey::from_names(&d, &[("k", SortDirection::Ascending)]).unwrap();
        let result = sort_cases(keyed_cases(3), &key, SortConfig::with_buffers(3));
        for pair in result.windows(2) {
            if key.compare(&pair[0], &pair[1]).is_eq() {
                assert!(pair[0].num(2) < pair[1].num(2), "{pair:?}");
            }
        }
    }

    #[test]
    fn test_sort_is_idempotent() {
        let d = dict();
        let key = SortKey::from_names(&d, &[("s", SortDirection::Ascending)]).unwrap();
        let once = sort_cases(keyed_cases(4), &key, SortConfig::with_buffers(7));
        let twice = sort_cases(once.clone(), &key, SortConfig::with_buffers(13));
        assert_eq!(once, twice);
    }

    #[test]
    fn test_permutation_of_input() {
        let d = dict();
        let key = SortKey::from_names(&d, &[("k", SortDirection::Ascending)]).unwrap();
        let mut cases = keyed_cases(5);
        cases.shuffle(&mut StdRng::seed_from_u64(9));
        let result = sort_cases(cases.clone(), &key, SortConfig::with_buffers(4));
        assert_eq!(result.len(), cases.len());
        let mut seqs: Vec<i64> = result.iter().map(|c| c.num(2).unwrap() as i64).collect();
        seqs.sort();
        assert_eq!(seqs, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_empty_input_is_an_error() {
        let d = dict();
        let key = SortKey::from_names(&d, &[("k", SortDirection::Ascending)]).unwrap();
        let mut input = MemCaseReader::new(Vec::new());
        let err = sort(&mut input, &key, &SortConfig::with_buffers(4)).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::EmptyInput);

        let mut input = MemCaseReader::new(Vec::new());
        let mut sorted = ExternalSort::new(key, SortConfig::with_buffers(4))
            .execute_allow_empty(&mut input)
            .unwrap();
        assert!(sorted.next().unwrap().is_none());
    }

    #[test]
    fn test_unusable_temp_dir_fails_only_when_spilling() {
        let d = dict();
        let key = SortKey::from_names(&d, &[("k", SortDirection::Ascending)]).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone");

        // Fits in one run: no temporary storage needed.
        let config = SortConfig::with_buffers(1000).with_temp_dir(&missing);
        assert_eq!(sort_cases(keyed_cases(6), &key, config).len(), 100);

        let config = SortConfig::with_buffers(10).with_temp_dir(&missing);
        let mut input = MemCaseReader::new(keyed_cases(6));
        let err = sort(&mut input, &key, &config).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Resource);
    }

    #[test]
    fn test_input_error_propagates() {
        struct Failing(u32);
        impl CaseReader for Failing {
            fn next(&mut self) -> Result<Option<Case>, ExecError> {
                self.0 += 1;
                if self.0 > 5 {
                    Err(ExecError::Other("read failed".into()))
                } else {
                    Ok(Some(Case::from_fields(vec![
                        Value::from(self.0 as i32),
                        Value::string("x", 4),
                        Value::from(0i32),
                    ])))
                }
            }
        }
        let d = dict();
        let key = SortKey::from_names(&d, &[("k", SortDirection::Ascending)]).unwrap();
        let err = sort(&mut Failing(0), &key, &SortConfig::with_buffers(2)).err().unwrap();
        assert!(matches!(err, ExecError::Other(_)));
    }

    #[test]
    fn test_case_without_key_column_is_malformed() {
        let d = dict();
        let key = SortKey::from_names(&d, &[("seq", SortDirection::Ascending)]).unwrap();
        let mut input = MemCaseReader::new(vec![
            Case::from_fields(vec![Value::from(1i32), Value::string("a", 4), Value::from(0i32)]),
            Case::from_fields(vec![Value::from(2i32)]),
        ]);
        let err = sort(&mut input, &key, &SortConfig::with_buffers(4)).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Data);
        assert!(err.to_string().contains("case 2"));

        let key = SortKey::from_names(&d, &[("s", SortDirection::Ascending)]).unwrap();
        let mut input = MemCaseReader::new(vec![Case::from_fields(vec![
            Value::from(1i32),
            Value::from(5i32),
            Value::from(0i32),
        ])]);
        let err = sort(&mut input, &key, &SortConfig::with_buffers(4)).err().unwrap();
        assert!(matches!(err, ExecError::Malformed(_)));
    }

    #[test]
    fn test_sort_dataset_keeps_dictionary() {
        let d = dict();
        let dataset = Dataset::from_cases(d.clone(), keyed_cases(8));
        let mut sorted =
            sort_dataset(dataset, &[("K", SortDirection::Descending)], &SortConfig::with_buffers(9))
                .unwrap();
        assert_eq!(sorted.dict, d);
        let cases = read_all(&mut sorted.reader).unwrap();
        assert_eq!(cases.len(), 100);
        assert!(cases[0].get(0).is_sysmis());
    }
}
