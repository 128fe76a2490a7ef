use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::dictionary::VarWidth;
use crate::error::ExecError;
use crate::key::SortKey;

/// One datum of a case.
///
/// Numbers use `None` as the system-missing sentinel; NaN never appears.
/// Strings are always exactly as long as their variable's width, padded on
/// the right with spaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Number(Option<f64>),
    String(Vec<u8>),
}

impl Value {
    pub const SYSMIS: Value = Value::Number(None);

    pub fn number(x: f64) -> Self {
        if x.is_nan() {
            Value::Number(None)
        } else {
            Value::Number(Some(x))
        }
    }

    /// A string value of exactly `width` bytes.
    pub fn string(s: impl AsRef<[u8]>, width: u16) -> Self {
        let mut bytes = s.as_ref().to_vec();
        bytes.resize(width as usize, b' ');
        Value::String(bytes)
    }

    /// System-missing for numeric variables, all spaces for strings.
    pub fn missing(width: VarWidth) -> Self {
        match width {
            VarWidth::Numeric => Value::SYSMIS,
            VarWidth::String(w) => Value::String(vec![b' '; w as usize]),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(x) => *x,
            Value::String(_) => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Number(_) => None,
            Value::String(s) => Some(s),
        }
    }

    pub fn is_sysmis(&self) -> bool {
        matches!(self, Value::Number(None))
    }

    pub fn is_spaces(&self) -> bool {
        match self {
            Value::String(s) => s.iter().all(|&b| b == b' '),
            Value::Number(_) => false,
        }
    }

    pub fn conforms(&self, width: VarWidth) -> bool {
        match (self, width) {
            (Value::Number(_), VarWidth::Numeric) => true,
            (Value::String(s), VarWidth::String(w)) => s.len() == w as usize,
            _ => false,
        }
    }

    /// Pads or truncates a string value to `width`. Numbers are unaffected.
    pub fn resize(&mut self, width: VarWidth) {
        if let (Value::String(s), VarWidth::String(w)) = (self, width) {
            s.resize(w as usize, b' ');
        }
    }

    /// Natural ordering: numbers in IEEE order with system-missing above
    /// every other number, strings byte-wise with the shorter one treated
    /// as space-padded.
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => match (a, b) {
                (Some(a), Some(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            },
            (Value::String(a), Value::String(b)) => compare_padded(a, b),
            (Value::Number(_), Value::String(_)) => Ordering::Less,
            (Value::String(_), Value::Number(_)) => Ordering::Greater,
        }
    }
}

fn compare_padded(a: &[u8], b: &[u8]) -> Ordering {
    let common = a.len().min(b.len());
    match a[..common].cmp(&b[..common]) {
        Ordering::Equal => {
            let pad = |rest: &[u8]| rest.iter().map(|&c| c.cmp(&b' ')).find(|o| o.is_ne());
            if a.len() > common {
                pad(&a[common..]).unwrap_or(Ordering::Equal)
            } else {
                pad(&b[common..]).map_or(Ordering::Equal, Ordering::reverse)
            }
        }
        ord => ord,
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::number(x)
    }
}

impl From<i32> for Value {
    fn from(x: i32) -> Self {
        Value::Number(Some(x as f64))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.as_bytes().to_vec())
    }
}

/// A fixed-size tuple of values laid out by a dictionary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Case {
    values: Vec<Value>,
}

impl Case {
    pub fn from_fields(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, idx: usize) -> &Value {
        &self.values[idx]
    }

    pub fn set(&mut self, idx: usize, value: Value) {
        self.values[idx] = value;
    }

    pub fn num(&self, idx: usize) -> Option<f64> {
        self.values[idx].as_number()
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub fn conforms(&self, widths: &[VarWidth]) -> bool {
        self.values.len() == widths.len()
            && self.values.iter().zip(widths).all(|(v, &w)| v.conforms(w))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ExecError> {
        Ok(bincode::serialize(&self.values)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ExecError> {
        Ok(Self {
            values: bincode::deserialize(bytes)?,
        })
    }

    /// Byte string whose lexicographic order matches `key.compare`.
    pub fn to_normalized_key_bytes(&self, key: &SortKey) -> Vec<u8> {
        let mut out = Vec::with_capacity(key.normalized_len());
        key.normalize_into(self, &mut out);
        out
    }
}
