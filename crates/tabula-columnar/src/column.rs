#![forbid(unsafe_code)]

use crate::bitmap::BitSet;
use crate::types::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Result of looking a literal up in a dictionary-encoded column.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DictionaryLookup {
    /// The literal is stored under this dictionary key.
    Present(u32),
    /// The column is dictionary encoded but never contains the literal.
    Absent,
}

/// Storage abstraction for a single column.
///
/// Views never mutate a column; every implementation is shared behind an [`Arc`] by any number
/// of views at once. Row indices outside `0..len()` are programmer errors and panic.
pub trait Column: fmt::Debug + Send + Sync {
    fn len(&self) -> usize;

    fn get(&self, row: usize) -> Value;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dictionary key stored at `row`, for dictionary-encoded columns. Null rows have no key.
    fn key_at(&self, _row: usize) -> Option<u32> {
        None
    }

    /// Resolve a literal against the column dictionary. `None` means the column is not
    /// dictionary encoded.
    fn dictionary_lookup(&self, _value: &Value) -> Option<DictionaryLookup> {
        None
    }

    /// Copy the given rows (in order) into a new column.
    ///
    /// Implementations should preserve their physical encoding where possible.
    fn take(&self, rows: &[usize]) -> ColumnRef {
        Arc::new(ValueColumn::new(rows.iter().map(|&r| self.get(r)).collect()))
    }
}

pub type ColumnRef = Arc<dyn Column>;

/// A column backed by a plain vector of values.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ValueColumn {
    values: Vec<Value>,
}

impl ValueColumn {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

impl<T: Into<Value>> FromIterator<T> for ValueColumn {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(Into::into).collect())
    }
}

impl Column for ValueColumn {
    fn len(&self) -> usize {
        self.values.len()
    }

    fn get(&self, row: usize) -> Value {
        self.values[row].clone()
    }
}

/// A typed `f64` buffer with an optional validity mask (absent mask means "all valid").
#[derive(Clone, Debug, PartialEq)]
pub struct NumberColumn {
    values: Vec<f64>,
    validity: Option<BitSet>,
}

impl NumberColumn {
    pub fn new(values: Vec<f64>) -> Self {
        Self {
            values,
            validity: None,
        }
    }

    pub fn from_options(values: impl IntoIterator<Item = Option<f64>>) -> Self {
        let mut out = Vec::new();
        let mut nulls = Vec::new();
        for (idx, v) in values.into_iter().enumerate() {
            match v {
                Some(v) => out.push(v),
                None => {
                    out.push(0.0);
                    nulls.push(idx);
                }
            }
        }
        let validity = if nulls.is_empty() {
            None
        } else {
            let mut bits = BitSet::all(out.len());
            for idx in nulls {
                bits.clear(idx);
            }
            Some(bits)
        };
        Self {
            values: out,
            validity,
        }
    }

    fn is_valid_row(&self, row: usize) -> bool {
        self.validity.as_ref().map_or(true, |v| v.get(row))
    }
}

impl Column for NumberColumn {
    fn len(&self) -> usize {
        self.values.len()
    }

    fn get(&self, row: usize) -> Value {
        let v = self.values[row];
        if self.is_valid_row(row) {
            Value::Number(v)
        } else {
            Value::Null
        }
    }

    fn take(&self, rows: &[usize]) -> ColumnRef {
        Arc::new(NumberColumn::from_options(
            rows.iter()
                .map(|&r| self.is_valid_row(r).then(|| self.values[r])),
        ))
    }
}

/// A dictionary-encoded string column.
///
/// Distinct strings live once in a shared dictionary; rows store `u32` keys. Equality against a
/// literal can therefore be answered by comparing keys (see [`Column::dictionary_lookup`]).
#[derive(Clone, Debug)]
pub struct DictionaryColumn {
    dictionary: Arc<Vec<Arc<str>>>,
    lookup: Arc<HashMap<Arc<str>, u32>>,
    keys: Vec<u32>,
    validity: Option<BitSet>,
}

impl DictionaryColumn {
    /// Encode a sequence of optional strings.
    pub fn encode<S: AsRef<str>>(values: impl IntoIterator<Item = Option<S>>) -> Self {
        let mut dictionary: Vec<Arc<str>> = Vec::new();
        let mut lookup: HashMap<Arc<str>, u32> = HashMap::new();
        let mut keys = Vec::new();
        let mut nulls = Vec::new();

        for (row, value) in values.into_iter().enumerate() {
            let Some(s) = value else {
                keys.push(0);
                nulls.push(row);
                continue;
            };
            let s = s.as_ref();
            let key = match lookup.get(s) {
                Some(key) => *key,
                None => {
                    let key = dictionary.len() as u32;
                    let interned: Arc<str> = Arc::from(s);
                    dictionary.push(interned.clone());
                    lookup.insert(interned, key);
                    key
                }
            };
            keys.push(key);
        }

        let validity = if nulls.is_empty() {
            None
        } else {
            let mut bits = BitSet::all(keys.len());
            for row in nulls {
                bits.clear(row);
            }
            Some(bits)
        };

        Self {
            dictionary: Arc::new(dictionary),
            lookup: Arc::new(lookup),
            keys,
            validity,
        }
    }

    pub fn dictionary(&self) -> &[Arc<str>] {
        &self.dictionary
    }

    fn is_valid_row(&self, row: usize) -> bool {
        self.validity.as_ref().map_or(true, |v| v.get(row))
    }
}

impl Column for DictionaryColumn {
    fn len(&self) -> usize {
        self.keys.len()
    }

    fn get(&self, row: usize) -> Value {
        match self.key_at(row) {
            Some(key) => Value::String(self.dictionary[key as usize].clone()),
            None => Value::Null,
        }
    }

    fn key_at(&self, row: usize) -> Option<u32> {
        let key = self.keys[row];
        self.is_valid_row(row).then_some(key)
    }

    fn dictionary_lookup(&self, value: &Value) -> Option<DictionaryLookup> {
        let found = match value {
            Value::String(s) => self.lookup.get(s.as_ref()).copied(),
            _ => None,
        };
        Some(match found {
            Some(key) => DictionaryLookup::Present(key),
            None => DictionaryLookup::Absent,
        })
    }

    fn take(&self, rows: &[usize]) -> ColumnRef {
        let keys: Vec<u32> = rows.iter().map(|&r| self.keys[r]).collect();
        let validity = self.validity.as_ref().map(|validity| {
            let mut bits = BitSet::new(rows.len());
            for (out, &r) in rows.iter().enumerate() {
                if validity.get(r) {
                    bits.set(out);
                }
            }
            bits
        });
        Arc::new(DictionaryColumn {
            dictionary: self.dictionary.clone(),
            lookup: self.lookup.clone(),
            keys,
            validity: validity.filter(|v| !v.all_set()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dictionary_roundtrip_and_lookup() {
        let col = DictionaryColumn::encode([Some("A"), Some("B"), None, Some("A")]);
        assert_eq!(col.dictionary().len(), 2);
        assert_eq!(col.get(0), Value::from("A"));
        assert_eq!(col.get(2), Value::Null);
        assert_eq!(col.key_at(3), Some(0));
        assert_eq!(col.key_at(2), None);
        assert_eq!(
            col.dictionary_lookup(&Value::from("B")),
            Some(DictionaryLookup::Present(1))
        );
        assert_eq!(
            col.dictionary_lookup(&Value::from("Z")),
            Some(DictionaryLookup::Absent)
        );
    }

    #[test]
    fn take_preserves_dictionary() {
        let col = DictionaryColumn::encode([Some("x"), None, Some("y")]);
        let taken = col.take(&[2, 1, 0, 0]);
        assert_eq!(taken.len(), 4);
        assert_eq!(taken.get(0), Value::from("y"));
        assert_eq!(taken.get(1), Value::Null);
        assert!(taken.dictionary_lookup(&Value::from("x")).is_some());
    }

    #[test]
    fn number_column_validity() {
        let col = NumberColumn::from_options([Some(1.0), None, Some(3.0)]);
        assert_eq!(col.get(1), Value::Null);
        let taken = col.take(&[2, 0]);
        assert_eq!(taken.get(0), Value::Number(3.0));
        assert!(taken.dictionary_lookup(&Value::Null).is_none());
    }
}
