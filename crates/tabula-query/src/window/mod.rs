//! Window evaluation over ordered partitions.
//!
//! Each partition (group) is walked in sort order. For every row the frame `[i0, i1)` is
//! recomputed from the op's offsets and, with `peers`, widened to whole peer groups. Aggregate
//! windows slide one streaming reducer across the partition, removing rows that leave the frame
//! and adding rows that enter it. Window-only ops read partition values directly.

mod ops;

use crate::agg::{AggState, FieldReducer};
use crate::expr::{Env, NoOps, WindowCall, WindowKind};
use crate::view::{RowOrder, View};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::OnceLock;
use tabula_columnar::Value;

/// Frame offsets relative to the current row. `None` is unbounded in that direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Frame {
    pub start: Option<i64>,
    pub end: Option<i64>,
}

impl Frame {
    pub const UNBOUNDED: Frame = Frame {
        start: None,
        end: None,
    };

    pub const fn new(start: Option<i64>, end: Option<i64>) -> Self {
        Self { start, end }
    }
}

impl Default for Frame {
    /// Cumulative: everything up to and including the current row.
    fn default() -> Self {
        Self::new(None, Some(0))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowSpec {
    pub frame: Frame,
    /// Widen the frame to include all peers of its boundary rows.
    pub peers: bool,
}

/// A window-only operator. One instance runs a whole partition at a time; `init` is called at
/// the start of every partition.
pub trait WindowOp {
    fn init(&mut self) {}
    /// `fields[f][i]` is field `f` evaluated at partition position `i`.
    fn value(&mut self, window: &WindowState<'_>, fields: &[Vec<Value>]) -> Value;
}

#[derive(Debug)]
pub struct WindowDef {
    pub name: &'static str,
    pub fields: usize,
    pub params: usize,
    pub create: fn(&[Value]) -> Box<dyn WindowOp>,
}

inventory::collect!(WindowDef);

fn registry() -> &'static HashMap<&'static str, &'static WindowDef> {
    static REGISTRY: OnceLock<HashMap<&'static str, &'static WindowDef>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        inventory::iter::<WindowDef>
            .into_iter()
            .map(|def| (def.name, def))
            .collect()
    })
}

pub fn lookup_window(name: &str) -> Option<&'static WindowDef> {
    registry().get(name).copied()
}

/// Peer-group boundaries of one partition, as sorted start positions.
#[derive(Clone, Debug)]
pub struct Peers {
    starts: Vec<usize>,
    size: usize,
}

impl Peers {
    /// Without an order every row is its own peer.
    pub fn new(order: Option<&RowOrder>, rows: &[usize]) -> Self {
        let starts = match order {
            None => (0..rows.len()).collect(),
            Some(order) => (0..rows.len())
                .filter(|&i| i == 0 || order.compare(rows[i - 1], rows[i]) != Ordering::Equal)
                .collect(),
        };
        Self {
            starts,
            size: rows.len(),
        }
    }

    /// Zero-based peer group containing `index`.
    pub fn group(&self, index: usize) -> usize {
        self.starts.partition_point(|&s| s <= index).saturating_sub(1)
    }

    pub fn start(&self, index: usize) -> usize {
        self.starts.get(self.group(index)).copied().unwrap_or(0)
    }

    /// Exclusive end of the peer group containing `index`.
    pub fn end(&self, index: usize) -> usize {
        self.starts
            .get(self.group(index) + 1)
            .copied()
            .unwrap_or(self.size)
    }
}

/// Position of the current row within its partition and its frame.
#[derive(Debug)]
pub struct WindowState<'a> {
    pub index: usize,
    pub i0: usize,
    pub i1: usize,
    pub size: usize,
    peers: &'a Peers,
}

impl WindowState<'_> {
    pub fn peer_start(&self) -> usize {
        self.peers.start(self.index)
    }

    pub fn peer_end(&self) -> usize {
        self.peers.end(self.index)
    }

    pub fn peer_group(&self) -> usize {
        self.peers.group(self.index)
    }
}

fn offset(index: usize, delta: i64, size: usize) -> usize {
    (index as i64).saturating_add(delta).clamp(0, size as i64) as usize
}

/// Frame bounds `[i0, i1)` for `index`, never inverted.
pub fn frame_bounds(spec: &WindowSpec, index: usize, size: usize, peers: &Peers) -> (usize, usize) {
    let mut i0 = spec.frame.start.map_or(0, |d| offset(index, d, size));
    let mut i1 = spec
        .frame
        .end
        .map_or(size, |d| offset(index, d.saturating_add(1), size));
    if spec.peers && i0 < i1 {
        i0 = peers.start(i0);
        i1 = peers.end(i1 - 1);
    }
    (i0, i1.max(i0))
}

/// Evaluate window calls. Returns one value per data row for every call, indexed
/// `[call][row]`; rows outside the view stay null.
pub fn evaluate(view: &View, calls: &[WindowCall]) -> Vec<Vec<Value>> {
    let mut out = vec![vec![Value::Null; view.total_rows()]; calls.len()];
    if calls.is_empty() {
        return out;
    }

    let mut by_frame: Vec<(WindowSpec, Vec<usize>)> = Vec::new();
    let mut functions: Vec<(usize, Box<dyn WindowOp>)> = Vec::new();
    for (idx, call) in calls.iter().enumerate() {
        match call.kind {
            WindowKind::Aggregate(_) => match by_frame.iter_mut().find(|(w, _)| *w == call.window) {
                Some((_, members)) => members.push(idx),
                None => by_frame.push((call.window, vec![idx])),
            },
            WindowKind::Function(def) => functions.push((idx, (def.create)(&call.params))),
        }
    }
    let streams: Vec<(WindowSpec, &[usize], Vec<FieldReducer>)> = by_frame
        .iter()
        .map(|(window, members)| {
            let reducers = FieldReducer::build(
                members.iter().filter_map(|&i| {
                    let call = &calls[i];
                    match call.kind {
                        WindowKind::Aggregate(def) => Some((
                            def,
                            call.fields.as_slice(),
                            call.field_key.as_slice(),
                            call.params.as_slice(),
                        )),
                        WindowKind::Function(_) => None,
                    }
                }),
                true,
            );
            (*window, members.as_slice(), reducers)
        })
        .collect();

    let partitions = view.partitions(true);
    log::debug!(
        "evaluating {} window op(s) ({} streaming frame(s)) over {} partition(s)",
        calls.len(),
        streams.len(),
        partitions.len()
    );

    let mut env = Env::new(&NoOps);
    for rows in partitions.iter() {
        let size = rows.len();
        if size == 0 {
            continue;
        }
        let peers = Peers::new(view.order(), rows);

        for (window, members, reducers) in &streams {
            for reducer in reducers {
                let values: Vec<_> = rows.iter().map(|&r| reducer.values(env.at(r))).collect();
                let mut state: AggState = reducer.init();
                let (mut r0, mut r1) = (0, 0);
                for index in 0..size {
                    let (i0, i1) = frame_bounds(window, index, size, &peers);
                    for v in &values[r0..i0.min(r1)] {
                        reducer.rem(&mut state, v);
                    }
                    for v in &values[r1.max(i0)..i1.max(r1.max(i0))] {
                        reducer.add(&mut state, v);
                    }
                    (r0, r1) = (i0, i1);
                    reducer.write(&state, |local, value| out[members[local]][rows[index]] = value);
                }
            }
        }

        for (idx, op) in functions.iter_mut() {
            let call = &calls[*idx];
            let fields: Vec<Vec<Value>> = call
                .fields
                .iter()
                .map(|f| rows.iter().map(|&r| f.eval(env.at(r))).collect())
                .collect();
            op.init();
            for index in 0..size {
                let (i0, i1) = frame_bounds(&call.window, index, size, &peers);
                let state = WindowState {
                    index,
                    i0,
                    i1,
                    size,
                    peers: &peers,
                };
                out[*idx][rows[index]] = op.value(&state, &fields);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_clamp_to_partition() {
        let peers = Peers {
            starts: vec![0, 1, 2, 3, 4],
            size: 5,
        };
        let spec = |start, end| WindowSpec {
            frame: Frame::new(start, end),
            peers: false,
        };
        assert_eq!(frame_bounds(&spec(None, Some(0)), 2, 5, &peers), (0, 3));
        assert_eq!(frame_bounds(&spec(Some(-1), Some(1)), 0, 5, &peers), (0, 2));
        assert_eq!(frame_bounds(&spec(Some(-1), Some(1)), 4, 5, &peers), (3, 5));
        assert_eq!(frame_bounds(&spec(None, None), 3, 5, &peers), (0, 5));
        assert_eq!(frame_bounds(&spec(Some(1), Some(2)), 4, 5, &peers), (5, 5));
        assert_eq!(frame_bounds(&spec(Some(-2), Some(-1)), 0, 5, &peers), (0, 0));
    }

    #[test]
    fn peer_frames_widen() {
        // values [10, 20, 20, 30]
        let peers = Peers {
            starts: vec![0, 1, 3],
            size: 4,
        };
        let spec = WindowSpec {
            frame: Frame::default(),
            peers: true,
        };
        assert_eq!(frame_bounds(&spec, 1, 4, &peers), (0, 3));
        assert_eq!(peers.group(2), 1);
        assert_eq!(peers.start(2), 1);
        assert_eq!(peers.end(1), 3);
        assert_eq!(peers.end(3), 4);
    }
}
