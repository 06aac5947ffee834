use crate::expr::{Compiled, Env, NoOps};
use ahash::AHashMap;
use smallvec::SmallVec;
use std::sync::Arc;
use tabula_columnar::{BitSet, Value};

/// Group id stored for rows outside the filter.
pub const NO_GROUP: usize = usize::MAX;

type GroupKey = SmallVec<[Value; 4]>;

/// Grouping overlay: a dense group id per row plus each group's key values.
///
/// Key values are captured when the groups are built, so the grouping stays valid when the
/// columns they were computed from are later dropped or renamed.
#[derive(Clone, Debug, PartialEq)]
pub struct GroupSpec {
    /// Output names of the grouping keys.
    pub names: Vec<String>,
    pub size: usize,
    /// Key values per group, `values[group][key]`.
    pub values: Vec<Vec<Value>>,
    /// One exemplar row per group (its first row in table order).
    pub rows: Vec<usize>,
    /// Group id per data row; [`NO_GROUP`] for rows outside the filter.
    pub keys: Vec<usize>,
    /// The grouping over every data row that this one was narrowed from by a filter.
    base: Option<Arc<GroupSpec>>,
}

impl GroupSpec {
    /// Assign group ids to `rows` (ascending table order) by evaluating `exprs`. Groups are
    /// numbered in order of first appearance.
    pub fn build(
        names: Vec<String>,
        exprs: &[Compiled],
        rows: impl IntoIterator<Item = usize>,
        total: usize,
    ) -> Self {
        let mut index: AHashMap<GroupKey, usize> = AHashMap::new();
        let mut spec = GroupSpec {
            names,
            size: 0,
            values: Vec::new(),
            rows: Vec::new(),
            keys: vec![NO_GROUP; total],
            base: None,
        };
        let mut env = Env::new(&NoOps);
        for row in rows {
            let key: GroupKey = exprs.iter().map(|e| e.eval(env.at(row))).collect();
            let next = spec.size;
            let group = *index.entry(key).or_insert_with_key(|key| {
                spec.values.push(key.to_vec());
                spec.rows.push(row);
                next
            });
            if group == next {
                spec.size += 1;
            }
            spec.keys[row] = group;
        }
        log::debug!("built {} group(s) over {} key(s)", spec.size, spec.names.len());
        spec
    }

    pub fn group_of(&self, row: usize) -> Option<usize> {
        self.keys.get(row).copied().filter(|&g| g != NO_GROUP)
    }

    /// Key values of `group`, in key order.
    pub fn key_values(&self, group: usize) -> &[Value] {
        &self.values[group]
    }

    /// The grouping that covers every data row: the one this was regrouped from, or itself.
    fn source(&self) -> &GroupSpec {
        self.base.as_deref().unwrap_or(self)
    }

    /// Regroup for a new `filter`: drop groups left empty and renumber the survivors densely,
    /// keeping their relative order.
    ///
    /// Regrouping always starts from the unfiltered grouping, so a filter wider than the
    /// current one brings back the groups of the rows it exposes.
    pub fn regroup(&self, filter: &BitSet) -> Self {
        let base = self.base.clone().unwrap_or_else(|| Arc::new(self.clone()));
        let mut spec = base.compact(filter);
        spec.base = Some(base);
        spec
    }

    fn compact(&self, filter: &BitSet) -> Self {
        let mut present = vec![false; self.size];
        for row in filter.iter() {
            if let Some(g) = self.group_of(row) {
                present[g] = true;
            }
        }
        let mut remap = vec![NO_GROUP; self.size];
        let mut next = 0;
        for (g, keep) in present.iter().enumerate() {
            if *keep {
                remap[g] = next;
                next += 1;
            }
        }

        let mut keys = vec![NO_GROUP; self.keys.len()];
        let mut rows = vec![NO_GROUP; next];
        for row in filter.iter() {
            if let Some(g) = self.group_of(row) {
                let new = remap[g];
                keys[row] = new;
                if rows[new] == NO_GROUP {
                    rows[new] = row;
                }
            }
        }
        let values = self
            .values
            .iter()
            .zip(&present)
            .filter(|(_, keep)| **keep)
            .map(|(v, _)| v.clone())
            .collect();
        log::debug!("regrouped {} group(s) into {}", self.size, next);
        GroupSpec {
            names: self.names.clone(),
            size: next,
            values,
            rows,
            keys,
            base: None,
        }
    }

    /// Groups for a materialized table whose row `i` was row `rows[i]` of this one.
    pub fn reindex(&self, rows: &[usize]) -> Self {
        let source = self.source();
        let old: Vec<usize> = rows.iter().map(|&r| source.keys[r]).collect();
        let mut present = vec![false; source.size];
        for &g in old.iter().filter(|&&g| g != NO_GROUP) {
            present[g] = true;
        }
        let mut remap = vec![NO_GROUP; source.size];
        let mut next = 0;
        for (g, keep) in present.iter().enumerate() {
            if *keep {
                remap[g] = next;
                next += 1;
            }
        }

        let mut exemplars = vec![NO_GROUP; next];
        let keys: Vec<usize> = old
            .iter()
            .enumerate()
            .map(|(i, &g)| {
                if g == NO_GROUP {
                    return NO_GROUP;
                }
                let new = remap[g];
                if exemplars[new] == NO_GROUP {
                    exemplars[new] = i;
                }
                new
            })
            .collect();
        GroupSpec {
            names: source.names.clone(),
            size: next,
            values: source
                .values
                .iter()
                .zip(&present)
                .filter(|(_, keep)| **keep)
                .map(|(v, _)| v.clone())
                .collect(),
            rows: exemplars,
            keys,
            base: None,
        }
    }
}
