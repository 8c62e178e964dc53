//! Model utilities: literal evaluation, fresh-name generation and
//! projections over literal assets.

use std::collections::HashMap;

use num_bigint::BigInt;
use num_traits::Zero;

use crate::model::Model;
use crate::term::{Mterm, MtermNode};
use crate::walk::{fold_term_rec, map_term};
use crate::Ident;

/// Deterministic fresh-name source.
///
/// Generated identifiers always start with one of the reserved prefixes
/// (`_tmp`, `_ibm`, `_idx`, `_accu`, `_q_opt`, `_kid`, `_vid`, `_state`,
/// `_s`, `_a`, `_v`), which the surface grammar rejects, so clashes with
/// source identifiers cannot occur.
#[derive(Debug, Default)]
pub struct NameGen {
    counters: HashMap<String, u32>,
}

impl NameGen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh(&mut self, prefix: &str) -> Ident {
        let n = self.counters.entry(prefix.to_string()).or_insert(0);
        let id = format!("{prefix}_{n}");
        *n += 1;
        id
    }
}

/// Partial evaluator over literal terms.
///
/// Substitutes variables from `env`, then folds arithmetic, boolean,
/// comparison and concatenation nodes whose operands reduced to literals.
/// Anything else is returned unchanged, so evaluation is best-effort and
/// never fails.
pub fn eval(env: &HashMap<Ident, Mterm>, mt: &Mterm) -> Mterm {
    use MtermNode::*;

    // Bottom-up: reduce children first.
    let mt = map_term(mt, &mut |c| eval(env, c));

    match &mt.node {
        Var { id, .. } => match env.get(id) {
            Some(v) => v.clone().retyped(mt.ty.clone()),
            None => mt.clone(),
        },

        Plus(l, r) => fold_arith(&mt, l, r, |a, b| a + b),
        Minus(l, r) => fold_arith(&mt, l, r, |a, b| a - b),
        Mult(l, r) => fold_arith(&mt, l, r, |a, b| a * b),
        DivEuc(l, r) => match (numeric(l), numeric(r)) {
            (Some(a), Some(b)) if !b.is_zero() => relit(&mt, a / b),
            _ => mt.clone(),
        },
        Modulo(l, r) => match (numeric(l), numeric(r)) {
            (Some(a), Some(b)) if !b.is_zero() => relit(&mt, a % b),
            _ => mt.clone(),
        },
        Uminus(x) => match numeric(x) {
            Some(a) => relit(&mt, -a),
            None => mt.clone(),
        },

        Concat(l, r) => match (&l.node, &r.node) {
            (String(a), String(b)) => mt.with_node(String(format!("{a}{b}"))),
            _ => mt.clone(),
        },

        And(l, r) => match (boolean(l), boolean(r)) {
            (Some(a), Some(b)) => mt.with_node(Bool(a && b)),
            _ => mt.clone(),
        },
        Or(l, r) => match (boolean(l), boolean(r)) {
            (Some(a), Some(b)) => mt.with_node(Bool(a || b)),
            _ => mt.clone(),
        },
        Not(x) => match boolean(x) {
            Some(a) => mt.with_node(Bool(!a)),
            None => mt.clone(),
        },

        Equal(_, l, r) if l.is_literal() && r.is_literal() => mt.with_node(Bool(l == r)),
        Nequal(_, l, r) if l.is_literal() && r.is_literal() => mt.with_node(Bool(l != r)),
        Gt(l, r) => fold_cmp(&mt, l, r, |o| o == std::cmp::Ordering::Greater),
        Ge(l, r) => fold_cmp(&mt, l, r, |o| o != std::cmp::Ordering::Less),
        Lt(l, r) => fold_cmp(&mt, l, r, |o| o == std::cmp::Ordering::Less),
        Le(l, r) => fold_cmp(&mt, l, r, |o| o != std::cmp::Ordering::Greater),

        Ternarybool { cond, then, els } => match boolean(cond) {
            Some(true) => (**then).clone(),
            Some(false) => (**els).clone(),
            None => mt.clone(),
        },

        _ => mt.clone(),
    }
}

fn numeric(mt: &Mterm) -> Option<BigInt> {
    match &mt.node {
        MtermNode::Int(v) | MtermNode::Nat(v) | MtermNode::Currency(v, _) => Some(v.clone()),
        MtermNode::Timestamp(v) | MtermNode::Duration(v) | MtermNode::Date(v) => {
            Some(BigInt::from(*v))
        }
        _ => None,
    }
}

fn boolean(mt: &Mterm) -> Option<bool> {
    match &mt.node {
        MtermNode::Bool(v) => Some(*v),
        _ => None,
    }
}

/// Rebuild a numeric literal in the node flavour of the original term.
fn relit(original: &Mterm, v: BigInt) -> Mterm {
    use MtermNode::*;
    let node = match &original.node {
        Plus(l, _) | Minus(l, _) | Mult(l, _) | DivEuc(l, _) | Modulo(l, _) => {
            relit_node(&l.node, v)
        }
        Uminus(x) => relit_node(&x.node, v),
        _ => Int(v),
    };
    original.with_node(node)
}

fn relit_node(template: &MtermNode, v: BigInt) -> MtermNode {
    use MtermNode::*;
    match template {
        Nat(_) => Nat(v),
        Currency(_, u) => Currency(v, *u),
        Timestamp(_) => Timestamp(i64::try_from(v).unwrap_or_default()),
        Duration(_) => Duration(i64::try_from(v).unwrap_or_default()),
        Date(_) => Date(i64::try_from(v).unwrap_or_default()),
        _ => Int(v),
    }
}

fn fold_arith<F>(mt: &Mterm, l: &Mterm, r: &Mterm, f: F) -> Mterm
where
    F: Fn(BigInt, BigInt) -> BigInt,
{
    match (numeric(l), numeric(r)) {
        (Some(a), Some(b)) => relit(mt, f(a, b)),
        _ => mt.clone(),
    }
}

fn fold_cmp<F>(mt: &Mterm, l: &Mterm, r: &Mterm, f: F) -> Mterm
where
    F: Fn(std::cmp::Ordering) -> bool,
{
    match (numeric(l), numeric(r)) {
        (Some(a), Some(b)) => mt.with_node(MtermNode::Bool(f(a.cmp(&b)))),
        _ => match (&l.node, &r.node) {
            (MtermNode::String(a), MtermNode::String(b)) => {
                mt.with_node(MtermNode::Bool(f(a.cmp(b))))
            }
            _ => mt.clone(),
        },
    }
}

/// True when the term writes to the pending operations list.
pub fn with_operations(body: &Mterm) -> bool {
    use crate::term::AssignKind;
    fold_term_rec(body, false, &mut |acc, mt| {
        acc || matches!(
            &mt.node,
            MtermNode::Transfer(_)
                | MtermNode::Emit { .. }
                | MtermNode::Makeoperation { .. }
                | MtermNode::Assign {
                    kind: AssignKind::Operations,
                    ..
                }
        )
    })
}

/// Project the primary-key value out of a literal asset expression.
///
/// Panics when the literal's arity does not cover the key position; the
/// type checker guarantees literal assets are complete.
pub fn extract_key_value_from_masset(model: &Model, asset: &str, lit: &Mterm) -> Mterm {
    let decl = model.get_asset(asset);
    match &lit.node {
        MtermNode::Asset(values) => match decl.keys.as_slice() {
            [key] => {
                let pos = decl
                    .field_position(key)
                    .unwrap_or_else(|| panic!("key field {key} missing in asset {asset}"));
                values
                    .get(pos)
                    .unwrap_or_else(|| {
                        panic!("literal asset {asset} has no value at key position {pos}")
                    })
                    .clone()
            }
            keys => {
                let parts: Vec<Mterm> = keys
                    .iter()
                    .map(|k| {
                        let pos = decl
                            .field_position(k)
                            .unwrap_or_else(|| panic!("key field {k} missing in asset {asset}"));
                        values[pos].clone()
                    })
                    .collect();
                let ty = crate::types::Type::tuple(parts.iter().map(|p| p.ty.clone()).collect());
                Mterm::new(MtermNode::Tuple(parts), ty, lit.span)
            }
        },
        _ => panic!("expected a literal asset for {asset}"),
    }
}
