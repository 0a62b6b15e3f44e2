//! The physical plan tree consumed from the (external, out-of-scope)
//! optimizer, and the expression-tree node kinds it embeds (spec §6).

use crate::expr::Expr;
use crate::operator::aggregate::{HashAggregate, SortAggregate};
use crate::operator::join::{HashJoin, MergeJoin, NestedLoopJoin};
use crate::operator::pipeline::{Filter, Limit, Project};
use crate::operator::scan::{IndexScan, SeqScan};
use crate::operator::sort::Sort;
use crate::operator::PhysicalOperator;
use crate::tuple::TupleSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    LeftOuter,
    RightOuter,
    FullOuter,
    Cross,
    Semi,
    Anti,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone)]
pub struct SortKey {
    pub expr: Expr,
    pub direction: SortDirection,
    pub nulls_first: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeBound {
    pub inclusive: bool,
}

/// A node in the physical operator tree. Each variant carries its
/// type-specific parameters and an ordered children list (spec §6).
#[derive(Debug, Clone)]
pub enum PlanNode {
    SeqScan {
        table: String,
        schema: TupleSchema,
        filter: Option<Expr>,
    },
    IndexScan {
        table: String,
        index: String,
        schema: TupleSchema,
        key_col: usize,
        lo: Option<crate::value::Value>,
        lo_bound: RangeBound,
        hi: Option<crate::value::Value>,
        hi_bound: RangeBound,
        residual_filter: Option<Expr>,
    },
    Filter {
        child: Box<PlanNode>,
        predicate: Expr,
    },
    Project {
        child: Box<PlanNode>,
        exprs: Vec<Expr>,
        out_schema: TupleSchema,
    },
    Limit {
        child: Box<PlanNode>,
        limit: i64,
        offset: i64,
    },
    NestedLoopJoin {
        left: Box<PlanNode>,
        right: Box<PlanNode>,
        condition: Expr,
        join_type: JoinType,
    },
    HashJoin {
        left: Box<PlanNode>,
        right: Box<PlanNode>,
        left_keys: Vec<Expr>,
        right_keys: Vec<Expr>,
        residual: Option<Expr>,
        join_type: JoinType,
        /// true when the planner's cardinality hints indicate `left`
        /// is the smaller side and should be the build side.
        build_left: bool,
    },
    MergeJoin {
        left: Box<PlanNode>,
        right: Box<PlanNode>,
        left_keys: Vec<Expr>,
        right_keys: Vec<Expr>,
        residual: Option<Expr>,
    },
    HashAggregate {
        child: Box<PlanNode>,
        group_keys: Vec<Expr>,
        aggs: Vec<crate::operator::aggregate::AggSpec>,
        out_schema: TupleSchema,
    },
    SortAggregate {
        child: Box<PlanNode>,
        group_keys: Vec<Expr>,
        aggs: Vec<crate::operator::aggregate::AggSpec>,
        out_schema: TupleSchema,
    },
    Sort {
        child: Box<PlanNode>,
        keys: Vec<SortKey>,
    },
}

impl PlanNode {
    /// Base table names read by this plan subtree, used by the
    /// transaction coordinator to acquire isolation-level locks
    /// (spec §4.3) in lexicographic order (spec §5).
    pub fn referenced_tables(&self) -> Vec<String> {
        let mut tables = Vec::new();
        self.collect_tables(&mut tables);
        tables.sort();
        tables.dedup();
        tables
    }

    /// Builds the corresponding operator subtree bottom-up (spec §4.1:
    /// "the driver builds the operator tree bottom-up from the plan").
    /// `next_op_id` hands out stable per-operator ids for spill-file
    /// naming (spec §6's `sort_<opid>_<runid>` convention).
    pub fn build_operator(&self, next_op_id: &mut u64) -> Box<dyn PhysicalOperator> {
        match self {
            PlanNode::SeqScan { table, schema, filter } => Box::new(SeqScan::new(table.clone(), schema.clone(), filter.clone())),
            PlanNode::IndexScan {
                table,
                index,
                schema,
                key_col,
                lo,
                lo_bound,
                hi,
                hi_bound,
                residual_filter,
            } => Box::new(IndexScan::new(
                table.clone(),
                index.clone(),
                schema.clone(),
                *key_col,
                lo.clone(),
                *lo_bound,
                hi.clone(),
                *hi_bound,
                residual_filter.clone(),
            )),
            PlanNode::Filter { child, predicate } => Box::new(Filter::new(child.build_operator(next_op_id), predicate.clone())),
            PlanNode::Project { child, exprs, out_schema } => {
                Box::new(Project::new(child.build_operator(next_op_id), exprs.clone(), out_schema.clone()))
            }
            PlanNode::Limit { child, limit, offset } => Box::new(Limit::new(child.build_operator(next_op_id), *limit, *offset)),
            PlanNode::NestedLoopJoin { left, right, condition, join_type } => Box::new(NestedLoopJoin::new(
                left.build_operator(next_op_id),
                right.build_operator(next_op_id),
                condition.clone(),
                *join_type,
            )),
            PlanNode::HashJoin {
                left,
                right,
                left_keys,
                right_keys,
                residual,
                join_type,
                build_left,
            } => Box::new(HashJoin::new(
                left.build_operator(next_op_id),
                right.build_operator(next_op_id),
                left_keys.clone(),
                right_keys.clone(),
                residual.clone(),
                *join_type,
                *build_left,
            )),
            PlanNode::MergeJoin { left, right, left_keys, right_keys, residual } => Box::new(MergeJoin::new(
                left.build_operator(next_op_id),
                right.build_operator(next_op_id),
                left_keys.clone(),
                right_keys.clone(),
                residual.clone(),
            )),
            PlanNode::HashAggregate { child, group_keys, aggs, .. } => {
                Box::new(HashAggregate::new(child.build_operator(next_op_id), group_keys.clone(), aggs.clone()))
            }
            PlanNode::SortAggregate { child, group_keys, aggs, .. } => {
                Box::new(SortAggregate::new(child.build_operator(next_op_id), group_keys.clone(), aggs.clone()))
            }
            PlanNode::Sort { child, keys } => {
                let id = *next_op_id;
                *next_op_id += 1;
                Box::new(Sort::new(child.build_operator(next_op_id), keys.clone(), id))
            }
        }
    }

    fn collect_tables(&self, out: &mut Vec<String>) {
        match self {
            PlanNode::SeqScan { table, .. } | PlanNode::IndexScan { table, .. } => out.push(table.clone()),
            PlanNode::Filter { child, .. }
            | PlanNode::Project { child, .. }
            | PlanNode::Limit { child, .. }
            | PlanNode::HashAggregate { child, .. }
            | PlanNode::SortAggregate { child, .. }
            | PlanNode::Sort { child, .. } => child.collect_tables(out),
            PlanNode::NestedLoopJoin { left, right, .. } | PlanNode::MergeJoin { left, right, .. } => {
                left.collect_tables(out);
                right.collect_tables(out);
            }
            PlanNode::HashJoin { left, right, .. } => {
                left.collect_tables(out);
                right.collect_tables(out);
            }
        }
    }
}
