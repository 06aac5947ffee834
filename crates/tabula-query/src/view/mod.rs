//! The lazy relational view: immutable column storage plus filter, group and order overlays.
//!
//! A view never copies column data. Verbs that change only row visibility, grouping or
//! ordering return a new view over the same [`ColumnTable`]; verbs that add columns share every
//! untouched column by reference. Only the `reify` family copies rows.

mod group;
mod order;

pub use group::{GroupSpec, NO_GROUP};
pub use order::{asc, desc, OrderKey, RowOrder};

use crate::error::{QueryError, QueryResult};
use crate::expr::Params;
use std::fmt;
use std::ops::ControlFlow;
use std::sync::{Arc, OnceLock};
use tabula_columnar::{BitSet, ColumnRef, ColumnTable, Value};

/// Overrides for [`View::create`]. Absent fields are inherited from the source view; the
/// `Option<Option<_>>` fields can also be cleared explicitly.
#[derive(Clone, Debug, Default)]
pub struct ViewOptions {
    pub data: Option<Arc<ColumnTable>>,
    pub filter: Option<Option<Arc<BitSet>>>,
    pub groups: Option<Option<Arc<GroupSpec>>>,
    pub order: Option<Option<Arc<RowOrder>>>,
    pub params: Option<Arc<Params>>,
}

impl ViewOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data(mut self, data: impl Into<Arc<ColumnTable>>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn with_filter(mut self, filter: impl Into<Arc<BitSet>>) -> Self {
        self.filter = Some(Some(filter.into()));
        self
    }

    pub fn without_filter(mut self) -> Self {
        self.filter = Some(None);
        self
    }

    pub fn with_groups(mut self, groups: impl Into<Arc<GroupSpec>>) -> Self {
        self.groups = Some(Some(groups.into()));
        self
    }

    pub fn without_groups(mut self) -> Self {
        self.groups = Some(None);
        self
    }

    pub fn with_order(mut self, order: impl Into<Arc<RowOrder>>) -> Self {
        self.order = Some(Some(order.into()));
        self
    }

    pub fn without_order(mut self) -> Self {
        self.order = Some(None);
        self
    }

    pub fn with_params(mut self, params: impl Into<Arc<Params>>) -> Self {
        self.params = Some(params.into());
        self
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScanOptions {
    /// Visit rows in sort order (when the view is ordered).
    pub ordered: bool,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl ScanOptions {
    pub fn ordered() -> Self {
        Self {
            ordered: true,
            ..Self::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }
}

#[derive(Clone)]
pub struct View {
    pub(crate) data: Arc<ColumnTable>,
    pub(crate) filter: Option<Arc<BitSet>>,
    pub(crate) groups: Option<Arc<GroupSpec>>,
    pub(crate) order: Option<Arc<RowOrder>>,
    pub(crate) params: Arc<Params>,
    indices: OnceLock<Arc<[usize]>>,
    partitions: OnceLock<Arc<[Vec<usize>]>>,
}

impl fmt::Debug for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("View")
            .field("columns", &self.data.names())
            .field("rows", &self.num_rows())
            .field("total_rows", &self.total_rows())
            .field("grouped", &self.is_grouped())
            .field("ordered", &self.is_ordered())
            .finish()
    }
}

impl From<ColumnTable> for View {
    fn from(table: ColumnTable) -> Self {
        View::new(table)
    }
}

impl View {
    pub fn new(data: impl Into<Arc<ColumnTable>>) -> Self {
        Self::from_parts(data.into(), None, None, None, Arc::default())
    }

    fn from_parts(
        data: Arc<ColumnTable>,
        filter: Option<Arc<BitSet>>,
        groups: Option<Arc<GroupSpec>>,
        order: Option<Arc<RowOrder>>,
        params: Arc<Params>,
    ) -> Self {
        Self {
            data,
            filter,
            groups,
            order,
            params,
            indices: OnceLock::new(),
            partitions: OnceLock::new(),
        }
    }

    /// Derive a new view, inheriting every overlay the options leave unset.
    ///
    /// A new filter (or clearing the filter) over inherited groups regroups them, so every
    /// visible row has a group and no group is left empty.
    pub fn create(&self, options: ViewOptions) -> View {
        let data = options.data.unwrap_or_else(|| self.data.clone());
        let new_filter = options.filter.is_some();
        let filter = options.filter.unwrap_or_else(|| self.filter.clone());
        let groups = match options.groups {
            Some(groups) => groups,
            None => match &self.groups {
                Some(groups) if new_filter => {
                    let regrouped = match &filter {
                        Some(filter) => groups.regroup(filter),
                        None => groups.regroup(&BitSet::all(data.row_count())),
                    };
                    Some(Arc::new(regrouped))
                }
                _ => self.groups.clone(),
            },
        };
        let order = options.order.unwrap_or_else(|| self.order.clone());
        let params = options.params.unwrap_or_else(|| self.params.clone());
        Self::from_parts(data, filter, groups, order, params)
    }

    pub fn data(&self) -> &Arc<ColumnTable> {
        &self.data
    }

    pub fn parameters(&self) -> &Arc<Params> {
        &self.params
    }

    pub fn groups(&self) -> Option<&GroupSpec> {
        self.groups.as_deref()
    }

    pub fn order(&self) -> Option<&RowOrder> {
        self.order.as_deref()
    }

    pub fn filter_mask(&self) -> Option<&BitSet> {
        self.filter.as_deref()
    }

    pub fn is_filtered(&self) -> bool {
        self.filter.is_some()
    }

    pub fn is_grouped(&self) -> bool {
        self.groups.is_some()
    }

    pub fn is_ordered(&self) -> bool {
        self.order.is_some()
    }

    /// Rows visible through the filter.
    pub fn num_rows(&self) -> usize {
        self.filter
            .as_ref()
            .map_or(self.total_rows(), |f| f.count())
    }

    /// Rows in the underlying storage.
    pub fn total_rows(&self) -> usize {
        self.data.row_count()
    }

    pub fn num_cols(&self) -> usize {
        self.data.column_count()
    }

    pub fn column_names(&self) -> &[String] {
        self.data.names()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnRef> {
        self.data.column(name)
    }

    /// Value of `name` at data row `row`.
    pub fn get(&self, name: &str, row: usize) -> Option<Value> {
        self.column(name).map(|c| c.get(row))
    }

    /// Values of `name` for the visible rows, in sort order.
    pub fn column_values(&self, name: &str) -> Option<Vec<Value>> {
        let column = self.column(name)?;
        Some(self.indices(true).iter().map(|&r| column.get(r)).collect())
    }

    /// Visible rows in sort order, one vector of cells (in column order) per row.
    pub fn rows(&self) -> Vec<Vec<Value>> {
        let columns: Vec<&ColumnRef> = self.data.iter().map(|(_, c)| c).collect();
        self.indices(true)
            .iter()
            .map(|&r| columns.iter().map(|c| c.get(r)).collect())
            .collect()
    }

    fn visible_rows(&self) -> Vec<usize> {
        match &self.filter {
            Some(filter) => filter.iter().collect(),
            None => (0..self.total_rows()).collect(),
        }
    }

    /// Visible data row indices. `ordered` requests sort order; an unordered request on an
    /// ordered view returns table order and is not cached.
    pub fn indices(&self, ordered: bool) -> Arc<[usize]> {
        if self.order.is_some() && !ordered {
            return self.visible_rows().into();
        }
        self.indices
            .get_or_init(|| {
                let mut rows = self.visible_rows();
                if let Some(order) = &self.order {
                    order.sort(&mut rows);
                }
                rows.into()
            })
            .clone()
    }

    /// Visible rows bucketed by group (a single partition when ungrouped).
    pub fn partitions(&self, ordered: bool) -> Arc<[Vec<usize>]> {
        let build = || -> Arc<[Vec<usize>]> {
            let rows = self.indices(ordered);
            match &self.groups {
                None => vec![rows.to_vec()].into(),
                Some(groups) => {
                    let mut parts = vec![Vec::new(); groups.size];
                    for &row in rows.iter() {
                        if let Some(g) = groups.group_of(row) {
                            parts[g].push(row);
                        }
                    }
                    parts.into()
                }
            }
        };
        if self.order.is_some() && !ordered {
            return build();
        }
        self.partitions.get_or_init(build).clone()
    }

    /// Visit visible rows, stopping early when the visitor breaks.
    pub fn scan(&self, options: ScanOptions, mut visit: impl FnMut(usize) -> ControlFlow<()>) {
        let rows = self.indices(options.ordered);
        let limit = options.limit.unwrap_or(usize::MAX);
        for &row in rows.iter().skip(options.offset).take(limit) {
            if visit(row).is_break() {
                break;
            }
        }
    }

    /// Materialize the filter and order into fresh storage. Groups are re-indexed and the
    /// order is kept for the new rows.
    pub fn reify(&self) -> View {
        if !self.is_filtered() && !self.is_ordered() {
            return self.clone();
        }
        let rows = self.indices(true);
        let data = self.data.take(&rows);
        log::debug!("reified {} of {} row(s)", rows.len(), self.total_rows());
        Self::from_parts(
            Arc::new(data),
            None,
            self.groups.as_ref().map(|g| Arc::new(g.reindex(&rows))),
            self.order.as_ref().map(|o| Arc::new(o.take(&rows))),
            self.params.clone(),
        )
    }

    /// Materialize an explicit list of backing rows, in the order given. The result is
    /// unfiltered and unordered; groups are re-indexed, dropping any left empty.
    pub fn reify_rows(&self, rows: &[usize]) -> QueryResult<View> {
        let total = self.total_rows();
        if let Some(&row) = rows.iter().find(|&&r| r >= total) {
            return Err(QueryError::RowOutOfRange { row, rows: total });
        }
        let data = self.data.take(rows);
        Ok(Self::from_parts(
            Arc::new(data),
            None,
            self.groups.as_ref().map(|g| Arc::new(g.reindex(rows))),
            None,
            self.params.clone(),
        ))
    }
}
