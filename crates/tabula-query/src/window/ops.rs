//! Built-in window-only operators: ranking, offsets, frame values and fills.

use super::{WindowDef, WindowOp, WindowState};
use tabula_columnar::Value;

macro_rules! window {
    ($name:literal, $fields:expr, $params:expr, $create:expr) => {
        inventory::submit! {
            WindowDef {
                name: $name,
                fields: $fields,
                params: $params,
                create: $create,
            }
        }
    };
}

fn field(fields: &[Vec<Value>], idx: usize) -> Option<&Vec<Value>> {
    fields.get(idx)
}

fn at(fields: &[Vec<Value>], pos: usize) -> Value {
    field(fields, 0)
        .and_then(|f| f.get(pos))
        .cloned()
        .unwrap_or_default()
}

fn param_usize(params: &[Value], idx: usize, default: usize) -> usize {
    match params.get(idx).and_then(Value::as_f64) {
        Some(n) if n.is_finite() && n >= 0.0 => n as usize,
        _ => default,
    }
}

fn param(params: &[Value], idx: usize) -> Value {
    params.get(idx).cloned().unwrap_or_default()
}

struct RowNumber;

impl WindowOp for RowNumber {
    fn value(&mut self, w: &WindowState<'_>, _: &[Vec<Value>]) -> Value {
        Value::from(w.index + 1)
    }
}

window!("row_number", 0, 0, |_| Box::new(RowNumber));

struct Rank;

impl WindowOp for Rank {
    fn value(&mut self, w: &WindowState<'_>, _: &[Vec<Value>]) -> Value {
        Value::from(w.peer_start() + 1)
    }
}

window!("rank", 0, 0, |_| Box::new(Rank));

struct AvgRank;

impl WindowOp for AvgRank {
    fn value(&mut self, w: &WindowState<'_>, _: &[Vec<Value>]) -> Value {
        Value::Number((w.peer_start() + 1 + w.peer_end()) as f64 / 2.0)
    }
}

window!("avg_rank", 0, 0, |_| Box::new(AvgRank));

struct DenseRank;

impl WindowOp for DenseRank {
    fn value(&mut self, w: &WindowState<'_>, _: &[Vec<Value>]) -> Value {
        Value::from(w.peer_group() + 1)
    }
}

window!("dense_rank", 0, 0, |_| Box::new(DenseRank));

struct PercentRank;

impl WindowOp for PercentRank {
    fn value(&mut self, w: &WindowState<'_>, _: &[Vec<Value>]) -> Value {
        if w.size <= 1 {
            return Value::Number(0.0);
        }
        Value::Number(w.peer_start() as f64 / (w.size - 1) as f64)
    }
}

window!("percent_rank", 0, 0, |_| Box::new(PercentRank));

fn cume_dist(w: &WindowState<'_>) -> f64 {
    w.peer_end() as f64 / w.size as f64
}

struct CumeDist;

impl WindowOp for CumeDist {
    fn value(&mut self, w: &WindowState<'_>, _: &[Vec<Value>]) -> Value {
        Value::Number(cume_dist(w))
    }
}

window!("cume_dist", 0, 0, |_| Box::new(CumeDist));

struct Ntile(f64);

impl WindowOp for Ntile {
    fn value(&mut self, w: &WindowState<'_>, _: &[Vec<Value>]) -> Value {
        if self.0.is_nan() || self.0 <= 0.0 {
            return Value::Null;
        }
        Value::Number((self.0 * cume_dist(w)).ceil())
    }
}

window!("ntile", 0, 1, |params| {
    Box::new(Ntile(params.first().map_or(f64::NAN, Value::to_f64)))
});

/// `lag` (negative direction) and `lead`.
struct Shift {
    offset: usize,
    default: Value,
    forward: bool,
}

impl WindowOp for Shift {
    fn value(&mut self, w: &WindowState<'_>, fields: &[Vec<Value>]) -> Value {
        let pos = if self.forward {
            w.index.checked_add(self.offset).filter(|&p| p < w.size)
        } else {
            w.index.checked_sub(self.offset)
        };
        match pos {
            Some(p) => at(fields, p),
            None => self.default.clone(),
        }
    }
}

window!("lag", 1, 2, |params| Box::new(Shift {
    offset: param_usize(params, 0, 1),
    default: param(params, 1),
    forward: false,
}));
window!("lead", 1, 2, |params| Box::new(Shift {
    offset: param_usize(params, 0, 1),
    default: param(params, 1),
    forward: true,
}));

struct FirstValue;

impl WindowOp for FirstValue {
    fn value(&mut self, w: &WindowState<'_>, fields: &[Vec<Value>]) -> Value {
        if w.i0 < w.i1 {
            at(fields, w.i0)
        } else {
            Value::Null
        }
    }
}

window!("first_value", 1, 0, |_| Box::new(FirstValue));

struct LastValue;

impl WindowOp for LastValue {
    fn value(&mut self, w: &WindowState<'_>, fields: &[Vec<Value>]) -> Value {
        if w.i0 < w.i1 {
            at(fields, w.i1 - 1)
        } else {
            Value::Null
        }
    }
}

window!("last_value", 1, 0, |_| Box::new(LastValue));

/// One-based position within the frame.
struct NthValue(usize);

impl WindowOp for NthValue {
    fn value(&mut self, w: &WindowState<'_>, fields: &[Vec<Value>]) -> Value {
        if self.0 == 0 {
            return Value::Null;
        }
        let pos = w.i0 + self.0 - 1;
        if pos < w.i1 {
            at(fields, pos)
        } else {
            Value::Null
        }
    }
}

window!("nth_value", 1, 1, |params| Box::new(NthValue(param_usize(params, 0, 0))));

struct FillDown {
    default: Value,
    last: Option<Value>,
}

impl WindowOp for FillDown {
    fn init(&mut self) {
        self.last = None;
    }

    fn value(&mut self, w: &WindowState<'_>, fields: &[Vec<Value>]) -> Value {
        let v = at(fields, w.index);
        if v.is_valid() {
            self.last = Some(v.clone());
            return v;
        }
        self.last.clone().unwrap_or_else(|| self.default.clone())
    }
}

window!("fill_down", 1, 1, |params| Box::new(FillDown {
    default: param(params, 0),
    last: None,
}));

struct FillUp {
    default: Value,
    /// Position of the next valid value at or after the current row.
    next: Option<usize>,
    scanned: usize,
}

impl WindowOp for FillUp {
    fn init(&mut self) {
        self.next = None;
        self.scanned = 0;
    }

    fn value(&mut self, w: &WindowState<'_>, fields: &[Vec<Value>]) -> Value {
        if self.next.map_or(true, |n| n < w.index) && self.scanned <= w.index {
            let values = field(fields, 0).map_or(&[][..], Vec::as_slice);
            self.next = (w.index..w.size).find(|&i| values.get(i).is_some_and(Value::is_valid));
            self.scanned = self.next.unwrap_or(w.size);
        }
        match self.next {
            Some(n) if n >= w.index => at(fields, n),
            _ => self.default.clone(),
        }
    }
}

window!("fill_up", 1, 1, |params| Box::new(FillUp {
    default: param(params, 0),
    next: None,
    scanned: 0,
}));

#[cfg(test)]
mod tests {
    use crate::window::{frame_bounds, lookup_window, Frame, Peers, WindowSpec, WindowState};
    use tabula_columnar::Value;

    fn run(
        name: &str,
        params: &[Value],
        fields: &[Vec<Value>],
        starts: Vec<usize>,
        frame: Frame,
    ) -> Vec<Value> {
        let size = fields.first().map_or(starts.len(), Vec::len);
        let peers = Peers { starts, size };
        let mut op = (lookup_window(name).unwrap().create)(params);
        op.init();
        let spec = WindowSpec { frame, peers: false };
        (0..size)
            .map(|index| {
                let (i0, i1) = frame_bounds(&spec, index, size, &peers);
                let state = WindowState {
                    index,
                    i0,
                    i1,
                    size,
                    peers: &peers,
                };
                op.value(&state, fields)
            })
            .collect()
    }

    fn nums(values: &[f64]) -> Vec<Value> {
        values.iter().map(|v| Value::Number(*v)).collect()
    }

    #[test]
    fn ranking_with_ties() {
        // [10, 20, 20, 30]
        let peers = || vec![0, 1, 3];
        let rank = |name| run(name, &[], &[vec![Value::Null; 4]], peers(), Frame::UNBOUNDED);
        assert_eq!(rank("rank"), nums(&[1.0, 2.0, 2.0, 4.0]));
        assert_eq!(rank("dense_rank"), nums(&[1.0, 2.0, 2.0, 3.0]));
        assert_eq!(rank("avg_rank"), nums(&[1.0, 2.5, 2.5, 4.0]));
        assert_eq!(rank("row_number"), nums(&[1.0, 2.0, 3.0, 4.0]));
        assert_eq!(rank("percent_rank"), nums(&[0.0, 1.0 / 3.0, 1.0 / 3.0, 1.0]));
        assert_eq!(rank("cume_dist"), nums(&[0.25, 0.75, 0.75, 1.0]));
        assert_eq!(
            run("ntile", &[Value::from(2)], &[vec![Value::Null; 4]], peers(), Frame::UNBOUNDED),
            nums(&[1.0, 2.0, 2.0, 2.0])
        );
    }

    #[test]
    fn offsets_and_frame_values() {
        let values = vec![nums(&[1.0, 2.0, 3.0])];
        let starts = || vec![0, 1, 2];
        assert_eq!(
            run("lag", &[], &values, starts(), Frame::UNBOUNDED),
            vec![Value::Null, Value::from(1), Value::from(2)]
        );
        assert_eq!(
            run("lead", &[Value::from(2), Value::from(0)], &values, starts(), Frame::UNBOUNDED),
            vec![Value::from(3), Value::from(0), Value::from(0)]
        );
        assert_eq!(
            run("first_value", &[], &values, starts(), Frame::new(Some(-1), Some(0))),
            nums(&[1.0, 1.0, 2.0])
        );
        assert_eq!(
            run("last_value", &[], &values, starts(), Frame::default()),
            nums(&[1.0, 2.0, 3.0])
        );
        assert_eq!(
            run("nth_value", &[Value::from(2)], &values, starts(), Frame::UNBOUNDED),
            nums(&[2.0, 2.0, 2.0])
        );
    }

    #[test]
    fn fills() {
        let values = vec![vec![
            Value::Null,
            Value::from(1),
            Value::Null,
            Value::Null,
            Value::from(4),
            Value::Null,
        ]];
        let starts = || (0..6).collect::<Vec<_>>();
        assert_eq!(
            run("fill_down", &[Value::from(0)], &values, starts(), Frame::UNBOUNDED),
            vec![Value::from(0), Value::from(1), Value::from(1), Value::from(1), Value::from(4), Value::from(4)]
        );
        assert_eq!(
            run("fill_up", &[Value::from(9)], &values, starts(), Frame::UNBOUNDED),
            vec![Value::from(1), Value::from(1), Value::from(4), Value::from(4), Value::from(4), Value::from(9)]
        );
    }
}
