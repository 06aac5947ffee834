//! Lazy relational queries over [`tabula_columnar`] tables.
//!
//! A [`View`] overlays a filter, a grouping and a sort order on shared, immutable column
//! storage. Verbs compile their expressions with the embedded expression compiler, run the
//! aggregate, window and join engines, and hand back a new view.

pub mod agg;
mod error;
pub mod expr;
mod join;
mod verbs;
mod view;
pub mod window;

pub use crate::agg::{iter_aggregates, lookup_aggregate, AggState, AggregateDef, AggregateOp};
pub use crate::error::{QueryError, QueryResult};
pub use crate::expr::{column, escape, parse, rolling, ExprSpec, Node, Params};
pub use crate::join::{JoinOn, JoinOptions, JoinValues};
pub use crate::verbs::Placement;
pub use crate::view::{
    asc, desc, GroupSpec, OrderKey, RowOrder, ScanOptions, View, ViewOptions, NO_GROUP,
};
pub use crate::window::{Frame, WindowSpec};

pub use tabula_columnar::{BitSet, ColumnRef, ColumnTable, Value};
