use std::cmp::Ordering;

use crate::error::ExecError;

use super::run::RecordCursor;

/// K-way merge of sorted record cursors.
///
/// The priority queue is a binary min-heap of cursor indexes ordered by
/// each cursor's current key, ties broken by index, so records with equal
/// keys come out in run order. Records are lent straight out of the
/// cursors' own buffers.
pub struct MergeIter<C: RecordCursor> {
    cursors: Vec<C>,
    heap: Vec<usize>,
    /// Cursor whose record was handed out last; it moves on at the next call.
    pending: Option<usize>,
    failed: bool,
}

impl<C: RecordCursor> MergeIter<C> {
    pub fn new(mut cursors: Vec<C>) -> Result<Self, ExecError> {
        let mut heap = Vec::with_capacity(cursors.len());
        for (i, cursor) in cursors.iter_mut().enumerate() {
            if cursor.advance()? {
                heap.push(i);
            }
        }
        for pos in (0..heap.len() / 2).rev() {
            sift_down(&mut heap, &cursors, pos);
        }

        Ok(Self {
            cursors,
            heap,
            pending: None,
            failed: false,
        })
    }

    pub fn fan_in(&self) -> usize {
        self.cursors.len()
    }

    /// The next record in key order, borrowed until the following call.
    pub fn next_record(&mut self) -> Result<Option<(&[u8], &[u8])>, ExecError> {
        if self.failed {
            return Ok(None);
        }
        // The pending cursor is always the heap root.
        if let Some(top) = self.pending.take() {
            match self.cursors[top].advance() {
                Ok(true) => sift_down(&mut self.heap, &self.cursors, 0),
                Ok(false) => {
                    self.heap.swap_remove(0);
                    sift_down(&mut self.heap, &self.cursors, 0);
                }
                Err(e) => {
                    self.failed = true;
                    return Err(e);
                }
            }
        }

        let Some(&top) = self.heap.first() else {
            return Ok(None);
        };
        self.pending = Some(top);
        let cursor = &self.cursors[top];
        Ok(Some((cursor.key(), cursor.val())))
    }
}

fn less<C: RecordCursor>(cursors: &[C], a: usize, b: usize) -> bool {
    match cursors[a].key().cmp(cursors[b].key()) {
        Ordering::Equal => a < b,
        ord => ord.is_lt(),
    }
}

fn sift_down<C: RecordCursor>(heap: &mut [usize], cursors: &[C], mut pos: usize) {
    loop {
        let left = 2 * pos + 1;
        if left >= heap.len() {
            return;
        }
        let right = left + 1;
        let child = if right < heap.len() && less(cursors, heap[right], heap[left]) {
            right
        } else {
            left
        };
        if !less(cursors, heap[child], heap[pos]) {
            return;
        }
        heap.swap(child, pos);
        pos = child;
    }
}
