use super::Placement;
use crate::error::{QueryError, QueryResult};
use crate::view::{View, ViewOptions};
use ahash::AHashSet;
use smallvec::SmallVec;
use tabula_columnar::{BitSet, Value};

impl View {
    /// Keep only the named columns, in the given order. Rows, groups and order are untouched.
    pub fn select(&self, names: &[&str]) -> QueryResult<View> {
        let pairs: Vec<(String, String)> = names
            .iter()
            .map(|n| (n.to_string(), n.to_string()))
            .collect();
        let data = self.data.project(&pairs)?;
        Ok(self.create(ViewOptions::new().with_data(data)))
    }

    /// Rename columns in place; unlisted columns keep their names.
    pub fn rename(&self, renames: &[(&str, &str)]) -> QueryResult<View> {
        for (old, _) in renames {
            if self.data.column(old).is_none() {
                return Err(QueryError::UnknownColumn(old.to_string()));
            }
        }
        let pairs: Vec<(String, String)> = self
            .data
            .names()
            .iter()
            .map(|name| {
                let output = renames
                    .iter()
                    .find(|(old, _)| old == name)
                    .map_or(name.as_str(), |(_, new)| *new);
                (name.clone(), output.to_string())
            })
            .collect();
        let data = self.data.project(&pairs)?;
        Ok(self.create(ViewOptions::new().with_data(data)))
    }

    /// Move columns before or after an anchor column.
    pub fn relocate(&self, names: &[&str], placement: Placement) -> QueryResult<View> {
        let moved: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        if let Some(missing) = moved.iter().find(|n| self.data.column(n).is_none()) {
            return Err(QueryError::UnknownColumn(missing.clone()));
        }
        let order = placement.apply(self.data.names(), &moved)?;
        let pairs: Vec<(String, String)> = order.iter().map(|n| (n.clone(), n.clone())).collect();
        let data = self.data.project(&pairs)?;
        Ok(self.create(ViewOptions::new().with_data(data)))
    }

    /// Keep rows `[start, end)` of every partition in sort order. Negative bounds count from
    /// the partition end; `end = None` runs to the end.
    pub fn slice(&self, start: i64, end: Option<i64>) -> View {
        let mut mask = BitSet::new(self.total_rows());
        for rows in self.partitions(true).iter() {
            let len = rows.len() as i64;
            let resolve = |i: i64| if i < 0 { (len + i).max(0) } else { i.min(len) };
            let (s, e) = (resolve(start), end.map_or(len, resolve));
            for &row in rows.iter().take(e.max(s) as usize).skip(s as usize) {
                mask.set(row);
            }
        }
        self.create(ViewOptions::new().with_filter(mask))
    }

    /// Keep the first row (in sort order) for each distinct combination of `keys`; all
    /// columns when `keys` is empty.
    pub fn dedupe(&self, keys: &[&str]) -> QueryResult<View> {
        let columns = if keys.is_empty() {
            self.data.iter().map(|(_, c)| c.clone()).collect::<Vec<_>>()
        } else {
            keys.iter()
                .map(|k| {
                    self.data
                        .column(k)
                        .cloned()
                        .ok_or_else(|| QueryError::UnknownColumn(k.to_string()))
                })
                .collect::<QueryResult<Vec<_>>>()?
        };
        let mut seen: AHashSet<SmallVec<[Value; 4]>> = AHashSet::new();
        let mut mask = BitSet::new(self.total_rows());
        for &row in self.indices(true).iter() {
            if seen.insert(columns.iter().map(|c| c.get(row)).collect()) {
                mask.set(row);
            }
        }
        Ok(self.create(ViewOptions::new().with_filter(mask)))
    }
}
