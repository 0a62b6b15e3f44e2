//! External merge sort (spec §4.1.5 / §6). Run generation is bounded by
//! `EngineConfig::work_mem_bytes`: tuples are buffered and budgeted via
//! `ExecutionContext::allocate_memory` exactly as `HashJoin`'s build
//! side is, and a run that would exceed the budget is sorted in place
//! and spilled to `spill_dir` under the naming convention
//! `sort_<opid>_<runid>` (spec §6), with the spill files removed on
//! close. A single run that never exceeds budget is kept resident and
//! never touches disk.

use super::{ExecutionContext, OperatorKind, PhysicalOperator};
use crate::error::ExecError;
use crate::plan::SortKey;
use crate::tuple::{Tuple, TupleSchema};
use crate::value::Value;
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

static NEXT_RUN_ID: AtomicU64 = AtomicU64::new(0);

fn write_value<W: Write>(w: &mut W, v: &Value) -> io::Result<()> {
    match v {
        Value::Null => w.write_all(&[0]),
        Value::I32(n) => {
            w.write_all(&[1])?;
            w.write_all(&n.to_le_bytes())
        }
        Value::I64(n) => {
            w.write_all(&[2])?;
            w.write_all(&n.to_le_bytes())
        }
        Value::F32(n) => {
            w.write_all(&[3])?;
            w.write_all(&n.to_le_bytes())
        }
        Value::F64(n) => {
            w.write_all(&[4])?;
            w.write_all(&n.to_le_bytes())
        }
        Value::Str(s) => {
            w.write_all(&[5])?;
            let bytes = s.as_bytes();
            w.write_all(&(bytes.len() as u32).to_le_bytes())?;
            w.write_all(bytes)
        }
        Value::Bool(b) => w.write_all(&[6, *b as u8]),
        Value::Date(d) => {
            w.write_all(&[7])?;
            w.write_all(&d.to_le_bytes())
        }
        Value::Timestamp(t) => {
            w.write_all(&[8])?;
            w.write_all(&t.to_le_bytes())
        }
    }
}

fn read_value<R: Read>(r: &mut R) -> io::Result<Value> {
    let mut tag = [0u8; 1];
    r.read_exact(&mut tag)?;
    Ok(match tag[0] {
        0 => Value::Null,
        1 => {
            let mut b = [0u8; 4];
            r.read_exact(&mut b)?;
            Value::I32(i32::from_le_bytes(b))
        }
        2 => {
            let mut b = [0u8; 8];
            r.read_exact(&mut b)?;
            Value::I64(i64::from_le_bytes(b))
        }
        3 => {
            let mut b = [0u8; 4];
            r.read_exact(&mut b)?;
            Value::F32(f32::from_le_bytes(b))
        }
        4 => {
            let mut b = [0u8; 8];
            r.read_exact(&mut b)?;
            Value::F64(f64::from_le_bytes(b))
        }
        5 => {
            let mut len_b = [0u8; 4];
            r.read_exact(&mut len_b)?;
            let len = u32::from_le_bytes(len_b) as usize;
            let mut buf = vec![0u8; len];
            r.read_exact(&mut buf)?;
            Value::Str(String::from_utf8_lossy(&buf).into_owned())
        }
        6 => {
            let mut b = [0u8; 1];
            r.read_exact(&mut b)?;
            Value::Bool(b[0] != 0)
        }
        7 => {
            let mut b = [0u8; 4];
            r.read_exact(&mut b)?;
            Value::Date(i32::from_le_bytes(b))
        }
        8 => {
            let mut b = [0u8; 8];
            r.read_exact(&mut b)?;
            Value::Timestamp(i64::from_le_bytes(b))
        }
        other => return Err(io::Error::new(io::ErrorKind::InvalidData, format!("bad value tag {other}"))),
    })
}

fn write_tuple<W: Write>(w: &mut W, t: &Tuple) -> io::Result<()> {
    w.write_all(&(t.values.len() as u32).to_le_bytes())?;
    for v in &t.values {
        write_value(w, v)?;
    }
    Ok(())
}

/// Returns `Ok(None)` cleanly at EOF; any other I/O failure, including
/// a length header with no following bytes, propagates.
fn read_tuple<R: Read>(r: &mut R) -> io::Result<Option<Tuple>> {
    let mut len_b = [0u8; 4];
    match r.read_exact(&mut len_b) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u32::from_le_bytes(len_b) as usize;
    let mut values = Vec::with_capacity(len);
    for _ in 0..len {
        values.push(read_value(r)?);
    }
    Ok(Some(Tuple { values: values.into() }))
}

fn compare_tuples(keys: &[SortKey], schema: &TupleSchema, a: &Tuple, b: &Tuple) -> Result<Ordering, ExecError> {
    for key in keys {
        let va = key.expr.eval(schema, a)?;
        let vb = key.expr.eval(schema, b)?;
        let ord = match (va.is_null(), vb.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => {
                if key.nulls_first {
                    Ordering::Less
                } else {
                    Ordering::Greater
                }
            }
            (false, true) => {
                if key.nulls_first {
                    Ordering::Greater
                } else {
                    Ordering::Less
                }
            }
            (false, false) => {
                let raw = va.partial_cmp_sql(&vb).unwrap_or(Ordering::Equal);
                match key.direction {
                    crate::plan::SortDirection::Asc => raw,
                    crate::plan::SortDirection::Desc => raw.reverse(),
                }
            }
        };
        if ord != Ordering::Equal {
            return Ok(ord);
        }
    }
    Ok(Ordering::Equal)
}

enum Run {
    Memory(VecDeque<Tuple>),
    Disk { reader: BufReader<File>, path: PathBuf },
}

impl Run {
    fn pull(&mut self) -> io::Result<Option<Tuple>> {
        match self {
            Run::Memory(rows) => Ok(rows.pop_front()),
            Run::Disk { reader, .. } => read_tuple(reader),
        }
    }

    fn cleanup(&self) {
        if let Run::Disk { path, .. } = self {
            log::debug!("removing spill file {}", path.display());
            let _ = std::fs::remove_file(path);
        }
    }
}

pub struct Sort {
    child: Box<dyn PhysicalOperator>,
    keys: Vec<SortKey>,
    schema: TupleSchema,
    op_id: u64,

    runs: Vec<Run>,
    heads: Vec<Option<Tuple>>,
    bytes_reserved: usize,
    built: bool,
    spill_dir: PathBuf,
    failed: bool,
}

impl Sort {
    pub fn new(child: Box<dyn PhysicalOperator>, keys: Vec<SortKey>, op_id: u64) -> Self {
        let schema = child.schema().clone();
        Self {
            child,
            keys,
            schema,
            op_id,
            runs: Vec::new(),
            heads: Vec::new(),
            bytes_reserved: 0,
            built: false,
            spill_dir: PathBuf::new(),
            failed: false,
        }
    }

    fn entry_size(t: &Tuple) -> usize {
        std::mem::size_of::<Tuple>() + t.values.iter().map(|v| v.canonical_bytes().len()).sum::<usize>()
    }

    fn spill_run(&mut self, mut rows: Vec<Tuple>) -> Result<(), ExecError> {
        rows.sort_by(|a, b| compare_tuples(&self.keys, &self.schema, a, b).unwrap_or(Ordering::Equal));
        let run_id = NEXT_RUN_ID.fetch_add(1, AtomicOrdering::SeqCst);
        let path = self.child_spill_dir().join(format!("sort_{}_{}", self.op_id, run_id));
        log::debug!("sort op {} spilling run {} ({} rows) to {}", self.op_id, run_id, rows.len(), path.display());
        let file = File::create(&path).map_err(|e| io_to_exec(&path, e))?;
        let mut writer = BufWriter::new(file);
        for t in &rows {
            write_tuple(&mut writer, t).map_err(|e| io_to_exec(&path, e))?;
        }
        writer.flush().map_err(|e| io_to_exec(&path, e))?;
        drop(writer);
        let reader = BufReader::new(File::open(&path).map_err(|e| io_to_exec(&path, e))?);
        self.runs.push(Run::Disk { reader, path });
        Ok(())
    }

    fn child_spill_dir(&self) -> PathBuf {
        // `ExecutionContext` is not threaded into `spill_run`; the
        // directory is stamped onto `self` at `open` time instead.
        self.spill_dir.clone()
    }
}

fn io_to_exec(path: &std::path::Path, e: io::Error) -> ExecError {
    ExecError::UnsupportedExpression(format!("sort spill I/O error at {}: {e}", path.display()))
}

impl Sort {
    fn build(&mut self, ctx: &ExecutionContext) -> Result<(), ExecError> {
        if self.built {
            return Ok(());
        }
        self.spill_dir = ctx.config().spill_dir.clone();
        let budget = ctx.config().work_mem_bytes;

        self.child.open(ctx)?;
        let mut current_run = Vec::new();
        let mut current_bytes = 0usize;
        while let Some(t) = self.child.next(ctx)? {
            ctx.check_cancellation()?;
            let size = Self::entry_size(&t);
            if current_bytes + size > budget && !current_run.is_empty() {
                ctx.release_memory(current_bytes);
                self.bytes_reserved = self.bytes_reserved.saturating_sub(current_bytes);
                let run = std::mem::take(&mut current_run);
                self.spill_run(run)?;
                current_bytes = 0;
            }
            ctx.allocate_memory(size)?;
            self.bytes_reserved += size;
            current_bytes += size;
            current_run.push(t);
        }
        self.child.close(ctx);

        if !current_run.is_empty() {
            current_run.sort_by(|a, b| compare_tuples(&self.keys, &self.schema, a, b).unwrap_or(Ordering::Equal));
            if self.runs.is_empty() {
                // Sole run fits entirely in budget: keep it resident.
                self.runs.push(Run::Memory(current_run.into()));
            } else {
                ctx.release_memory(current_bytes);
                self.bytes_reserved = self.bytes_reserved.saturating_sub(current_bytes);
                self.spill_run(current_run)?;
            }
        }

        self.heads = Vec::with_capacity(self.runs.len());
        for run in &mut self.runs {
            self.heads.push(run.pull().map_err(|e| io_to_exec(std::path::Path::new("<run>"), e))?);
        }
        self.built = true;
        Ok(())
    }
}

impl PhysicalOperator for Sort {
    fn kind(&self) -> OperatorKind {
        OperatorKind::Sort
    }

    fn estimated_cost(&self) -> f64 {
        let n = self.child.estimated_cost().max(1.0);
        n * (n.log2().max(1.0))
    }

    fn schema(&self) -> &TupleSchema {
        &self.schema
    }

    fn open(&mut self, ctx: &ExecutionContext) -> Result<(), ExecError> {
        self.failed = false;
        self.build(ctx)
    }

    fn next(&mut self, ctx: &ExecutionContext) -> Result<Option<Tuple>, ExecError> {
        if self.failed {
            return Err(ExecError::OperatorClosed("Sort"));
        }
        let result = self.next_inner(ctx);
        if result.is_err() {
            self.failed = true;
        }
        result
    }

    fn close(&mut self, ctx: &ExecutionContext) {
        if self.built {
            ctx.release_memory(self.bytes_reserved);
        }
        for run in &self.runs {
            run.cleanup();
        }
        self.runs.clear();
        self.heads.clear();
    }
}

impl Sort {
    fn next_inner(&mut self, ctx: &ExecutionContext) -> Result<Option<Tuple>, ExecError> {
        ctx.check_cancellation()?;
        // Linear scan over open runs to find the minimum head; the
        // typical fan-in here (work_mem-bounded runs) is small enough
        // that a heap buys little over a direct scan.
        let mut best: Option<usize> = None;
        for (i, head) in self.heads.iter().enumerate() {
            if head.is_none() {
                continue;
            }
            best = match best {
                None => Some(i),
                Some(b) => {
                    let ord = compare_tuples(&self.keys, &self.schema, head.as_ref().unwrap(), self.heads[b].as_ref().unwrap())?;
                    if ord == Ordering::Less {
                        Some(i)
                    } else {
                        Some(b)
                    }
                }
            };
        }
        let Some(idx) = best else { return Ok(None) };
        let out = self.heads[idx].take();
        self.heads[idx] = self.runs[idx].pull().map_err(|e| io_to_exec(std::path::Path::new("<run>"), e))?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expr;
    use crate::operator::scan::SeqScan;
    use crate::operator::test_support::{test_ctx, MemStorage};
    use crate::plan::SortDirection;
    use crate::tuple::ColumnInfo;
    use crate::value::ValueType;

    fn schema() -> TupleSchema {
        TupleSchema::new(vec![ColumnInfo::new("n", ValueType::Int32)])
    }

    fn key(nulls_first: bool) -> SortKey {
        SortKey {
            expr: Expr::ColumnRef("n".into()),
            direction: SortDirection::Asc,
            nulls_first,
        }
    }

    /// Spec §8 Scenario 6: `{3, NULL, 1, 2, NULL}` sorted ascending with
    /// `NullsFirst` yields `{NULL, NULL, 1, 2, 3}`.
    #[test]
    fn sort_nulls_first_scenario_6() {
        let rows = vec![
            Tuple::new([Value::I32(3)]),
            Tuple::new([Value::Null]),
            Tuple::new([Value::I32(1)]),
            Tuple::new([Value::I32(2)]),
            Tuple::new([Value::Null]),
        ];
        let storage = MemStorage::new().with_table("t", rows);
        let ctx = test_ctx(storage);
        let scan = SeqScan::new("t", schema(), None);
        let mut sort = Sort::new(Box::new(scan), vec![key(true)], 1);
        let result = super::super::run_to_result_set(&mut sort, &ctx).unwrap();
        let got: Vec<Value> = result.rows.iter().map(|t| t.values[0].clone()).collect();
        assert_eq!(
            got,
            vec![Value::Null, Value::Null, Value::I32(1), Value::I32(2), Value::I32(3)]
        );
    }

    #[test]
    fn sort_nulls_last_when_not_first() {
        let rows = vec![Tuple::new([Value::Null]), Tuple::new([Value::I32(1)])];
        let storage = MemStorage::new().with_table("t", rows);
        let ctx = test_ctx(storage);
        let scan = SeqScan::new("t", schema(), None);
        let mut sort = Sort::new(Box::new(scan), vec![key(false)], 2);
        let result = super::super::run_to_result_set(&mut sort, &ctx).unwrap();
        assert_eq!(result.rows[0].values[0], Value::I32(1));
        assert_eq!(result.rows[1].values[0], Value::Null);
    }

    /// Forces at least one spill by setting `work_mem_bytes` far below
    /// what the rows need, exercising the disk-backed merge path.
    #[test]
    fn sort_spills_and_merges_across_runs() {
        let rows: Vec<Tuple> = (0..50).rev().map(|i| Tuple::new([Value::I32(i)])).collect();
        let storage = MemStorage::new().with_table("t", rows);
        let mut config = crate::EngineConfig::default();
        config.work_mem_bytes = 64;
        let ctx = ExecutionContext::new(std::sync::Arc::new(storage), config, 64 * 1024 * 1024);
        let scan = SeqScan::new("t", schema(), None);
        let mut sort = Sort::new(Box::new(scan), vec![key(false)], 3);
        let result = super::super::run_to_result_set(&mut sort, &ctx).unwrap();
        let got: Vec<i32> = result
            .rows
            .iter()
            .map(|t| match t.values[0] {
                Value::I32(n) => n,
                _ => unreachable!(),
            })
            .collect();
        let expected: Vec<i32> = (0..50).collect();
        assert_eq!(got, expected);
    }
}
