//! Rational lowering.
//!
//! Rationals become `(int, nat)` pairs; their arithmetic and comparisons
//! become the dedicated `rat*` primitives. Literal arithmetic is folded
//! by [`update_nat_int_rat`], which runs again after the date lowering.

use num_bigint::BigInt;
use num_traits::{Signed, Zero};

use archetype_model::decl::Decl;
use archetype_model::model::Model;
use archetype_model::term::{Mterm, MtermNode, RatArithOp, RatCmpOp};
use archetype_model::types::TypeNode;
use archetype_model::walk::{map_mterm_model, map_term, map_term_ft};
use archetype_model::Type;

fn rat_pair_type() -> Type {
    Type::tuple(vec![Type::int(), Type::nat()])
}

fn lower_rational_type(ty: &Type) -> Type {
    map_type(ty, &|node| match node {
        TypeNode::Rational => rat_pair_type().node,
        other => other.clone(),
    })
}

/// Structural type map used by the scalar lowering passes.
pub(crate) fn map_type(ty: &Type, f: &dyn Fn(&TypeNode) -> TypeNode) -> Type {
    let node = match f(&ty.node) {
        TypeNode::Option(t) => TypeNode::Option(Box::new(map_type(&t, f))),
        TypeNode::List(t) => TypeNode::List(Box::new(map_type(&t, f))),
        TypeNode::Set(t) => TypeNode::Set(Box::new(map_type(&t, f))),
        TypeNode::Map(k, v) => {
            TypeNode::Map(Box::new(map_type(&k, f)), Box::new(map_type(&v, f)))
        }
        TypeNode::BigMap(k, v) => {
            TypeNode::BigMap(Box::new(map_type(&k, f)), Box::new(map_type(&v, f)))
        }
        TypeNode::IterableBigMap(k, v) => {
            TypeNode::IterableBigMap(Box::new(map_type(&k, f)), Box::new(map_type(&v, f)))
        }
        TypeNode::Or(l, r) => {
            TypeNode::Or(Box::new(map_type(&l, f)), Box::new(map_type(&r, f)))
        }
        TypeNode::Contract(t) => TypeNode::Contract(Box::new(map_type(&t, f))),
        TypeNode::Ticket(t) => TypeNode::Ticket(Box::new(map_type(&t, f))),
        TypeNode::Lambda(a, r) => {
            TypeNode::Lambda(Box::new(map_type(&a, f)), Box::new(map_type(&r, f)))
        }
        TypeNode::Tuple(ts) => TypeNode::Tuple(ts.iter().map(|t| map_type(t, f)).collect()),
        TypeNode::Container(t, intent) => {
            TypeNode::Container(Box::new(map_type(&t, f)), intent)
        }
        other => other,
    };
    Type {
        node,
        annotation: ty.annotation.clone(),
    }
}

/// Rewrite declared and stored types with `f` applied to every type.
pub(crate) fn retype_model(model: &mut Model, f: &dyn Fn(&Type) -> Type) {
    for decl in &mut model.decls {
        match decl {
            Decl::Var(v) => v.typ = f(&v.typ),
            Decl::Asset(a) => {
                for field in &mut a.fields {
                    field.typ = f(&field.typ);
                }
            }
            Decl::Record(r) | Decl::Event(r) => {
                for field in &mut r.fields {
                    field.typ = f(&field.typ);
                }
            }
            Decl::Enum(e) => {
                for item in &mut e.values {
                    for arg in &mut item.args {
                        *arg = f(arg);
                    }
                }
            }
        }
    }
    for item in &mut model.storage {
        item.typ = f(&item.typ);
    }
    for param in &mut model.parameters {
        param.typ = f(&param.typ);
    }
    for function in &mut model.functions {
        for arg in &mut function.fs.args {
            arg.typ = f(&arg.typ);
        }
        use archetype_model::function::FunctionKind;
        function.kind = match function.kind.clone() {
            FunctionKind::Entry => FunctionKind::Entry,
            FunctionKind::Getter(t) => FunctionKind::Getter(f(&t)),
            FunctionKind::View(t, v) => FunctionKind::View(f(&t), v),
            FunctionKind::Function(t) => FunctionKind::Function(f(&t)),
        };
    }
}

fn is_rat(ty: &Type) -> bool {
    matches!(ty.node, TypeNode::Rational)
}

fn is_int_like(ty: &Type) -> bool {
    matches!(ty.node, TypeNode::Int | TypeNode::Nat)
}

/// Coerce an integer operand into the pair representation.
fn to_rat(mt: Mterm) -> Mterm {
    let span = mt.span;
    let node = match &mt.ty.node {
        TypeNode::Rational => return mt,
        TypeNode::Nat => MtermNode::NatToRat(Box::new(mt)),
        _ => MtermNode::IntToRat(Box::new(mt)),
    };
    Mterm::new(node, rat_pair_type(), span)
}

/// Rewrite rational arithmetic and comparisons into `rat*` primitives and
/// every `rational` type into `(int, nat)`.
pub fn remove_rational(model: Model) -> Model {
    let model = map_mterm_model(model, &mut |_ctx, top| lower_rat(top));

    // Types follow once every operation is rewritten, including the
    // types carried inside container primitives.
    fn deep_retype(mt: &Mterm) -> Mterm {
        map_term_ft(mt, &mut deep_retype, &mut lower_rational_type)
    }
    let mut model = map_mterm_model(model, &mut |_ctx, top| deep_retype(top));
    retype_model(&mut model, &lower_rational_type);
    model
}

fn lower_rat(mt: &Mterm) -> Mterm {
    use MtermNode::*;

    // Operand types drive the rewrite, so the node is inspected before
    // its types are rewritten.
    let involves_rat = |l: &Mterm, r: &Mterm| is_rat(&l.ty) || is_rat(&r.ty);

    let span = mt.span;
    let out = match &mt.node {
        Rational(n, d) => Mterm::new(
            Tuple(vec![
                Mterm::int(n.clone(), span),
                Mterm::nat(d.clone(), span),
            ]),
            rat_pair_type(),
            span,
        ),

        Equal(_, l, r) if involves_rat(l, r) => Mterm::new(
            Rateq(
                Box::new(to_rat(lower_rat(l))),
                Box::new(to_rat(lower_rat(r))),
            ),
            Type::bool(),
            span,
        ),
        Nequal(_, l, r) if involves_rat(l, r) => {
            let eq = Mterm::new(
                Rateq(
                    Box::new(to_rat(lower_rat(l))),
                    Box::new(to_rat(lower_rat(r))),
                ),
                Type::bool(),
                span,
            );
            Mterm::new(Not(Box::new(eq)), Type::bool(), span)
        }
        Lt(l, r) if involves_rat(l, r) => rat_cmp(RatCmpOp::Lt, l, r, span),
        Le(l, r) if involves_rat(l, r) => rat_cmp(RatCmpOp::Le, l, r, span),
        Gt(l, r) if involves_rat(l, r) => rat_cmp(RatCmpOp::Gt, l, r, span),
        Ge(l, r) if involves_rat(l, r) => rat_cmp(RatCmpOp::Ge, l, r, span),

        Plus(l, r) if involves_rat(l, r) => rat_arith(RatArithOp::Plus, l, r, span),
        Minus(l, r) if involves_rat(l, r) => rat_arith(RatArithOp::Minus, l, r, span),
        Mult(l, r) if involves_rat(l, r) => {
            // rational * tez is the dedicated currency primitive.
            if matches!(r.ty.node, TypeNode::Currency) {
                Mterm::new(
                    Rattez(Box::new(to_rat(lower_rat(l))), Box::new(lower_rat(r))),
                    Type::currency(),
                    span,
                )
            } else if matches!(l.ty.node, TypeNode::Currency) {
                Mterm::new(
                    Rattez(Box::new(to_rat(lower_rat(r))), Box::new(lower_rat(l))),
                    Type::currency(),
                    span,
                )
            } else if matches!(r.ty.node, TypeNode::Duration) {
                Mterm::new(
                    Ratdur(Box::new(to_rat(lower_rat(l))), Box::new(lower_rat(r))),
                    Type::duration(),
                    span,
                )
            } else if matches!(l.ty.node, TypeNode::Duration) {
                Mterm::new(
                    Ratdur(Box::new(to_rat(lower_rat(r))), Box::new(lower_rat(l))),
                    Type::duration(),
                    span,
                )
            } else {
                rat_arith(RatArithOp::Mult, l, r, span)
            }
        }
        DivEuc(l, r)
            if involves_rat(l, r)
                || (is_int_like(&l.ty) && is_rat(&mt.ty))
                || (is_int_like(&r.ty) && is_rat(&mt.ty)) =>
        {
            rat_arith(RatArithOp::Div, l, r, span)
        }
        Uminus(x) if is_rat(&x.ty) => Mterm::new(
            Ratuminus(Box::new(lower_rat(x))),
            rat_pair_type(),
            span,
        ),

        Min(l, r) if involves_rat(l, r) => {
            let cond = rat_cmp(RatCmpOp::Le, l, r, span);
            let l = to_rat(lower_rat(l));
            let r = to_rat(lower_rat(r));
            Mterm::if_(cond, l, Some(r), span)
        }
        Max(l, r) if involves_rat(l, r) => {
            let cond = rat_cmp(RatCmpOp::Ge, l, r, span);
            let l = to_rat(lower_rat(l));
            let r = to_rat(lower_rat(r));
            Mterm::if_(cond, l, Some(r), span)
        }
        Abs(x) if is_rat(&x.ty) => {
            let x = to_rat(lower_rat(x));
            let zero = Mterm::new(
                Tuple(vec![Mterm::int(0, span), Mterm::nat(1, span)]),
                rat_pair_type(),
                span,
            );
            let cond = Mterm::new(
                Ratcmp(RatCmpOp::Ge, Box::new(x.clone()), Box::new(zero)),
                Type::bool(),
                span,
            );
            let neg = Mterm::new(Ratuminus(Box::new(x.clone())), rat_pair_type(), span);
            Mterm::if_(cond, x, Some(neg), span)
        }

        _ => map_term(mt, &mut lower_rat),
    };
    let lowered_ty = lower_rational_type(&out.ty);
    out.retyped(lowered_ty)
}

fn rat_cmp(op: RatCmpOp, l: &Mterm, r: &Mterm, span: archetype_model::Span) -> Mterm {
    Mterm::new(
        MtermNode::Ratcmp(
            op,
            Box::new(to_rat(lower_rat(l))),
            Box::new(to_rat(lower_rat(r))),
        ),
        Type::bool(),
        span,
    )
}

fn rat_arith(op: RatArithOp, l: &Mterm, r: &Mterm, span: archetype_model::Span) -> Mterm {
    Mterm::new(
        MtermNode::Ratarith(
            op,
            Box::new(to_rat(lower_rat(l))),
            Box::new(to_rat(lower_rat(r))),
        ),
        rat_pair_type(),
        span,
    )
}

/// Literal view of a lowered rational pair.
fn as_rat_literal(mt: &Mterm) -> Option<(BigInt, BigInt)> {
    match &mt.node {
        MtermNode::Tuple(xs) => match (xs.first(), xs.get(1), xs.len()) {
            (Some(n), Some(d), 2) => match (&n.node, &d.node) {
                (MtermNode::Int(n), MtermNode::Nat(d)) => Some((n.clone(), d.clone())),
                _ => None,
            },
            _ => None,
        },
        MtermNode::NatToRat(x) | MtermNode::IntToRat(x) => match &x.node {
            MtermNode::Int(v) | MtermNode::Nat(v) => Some((v.clone(), BigInt::from(1))),
            _ => None,
        },
        _ => None,
    }
}

fn rat_literal(n: BigInt, d: BigInt, span: archetype_model::Span) -> Mterm {
    // Negative denominators fold into the numerator; lowest terms are
    // not computed.
    let (n, d) = if d.is_negative() { (-n, -d) } else { (n, d) };
    Mterm::new(
        MtermNode::Tuple(vec![Mterm::int(n, span), Mterm::nat(d, span)]),
        Type::tuple(vec![Type::int(), Type::nat()]),
        span,
    )
}

/// Constant folding over lowered numerics: rational pair arithmetic with
/// cross multiplication, plus plain int/nat folding.
pub fn update_nat_int_rat(model: Model) -> Model {
    map_mterm_model(model, &mut |_ctx, top| fold_literals(top))
}

fn fold_literals(mt: &Mterm) -> Mterm {
    use MtermNode::*;
    let mt = map_term(mt, &mut fold_literals);
    let span = mt.span;

    match &mt.node {
        Ratarith(op, l, r) => match (as_rat_literal(l), as_rat_literal(r)) {
            (Some((a, b)), Some((c, d))) => match op {
                RatArithOp::Plus => rat_literal(&a * &d + &c * &b, b * d, span),
                RatArithOp::Minus => rat_literal(&a * &d - &c * &b, b * d, span),
                RatArithOp::Mult => rat_literal(a * c, b * d, span),
                RatArithOp::Div if !c.is_zero() => rat_literal(a * d, b * c, span),
                RatArithOp::Div => mt.clone(),
            },
            _ => mt.clone(),
        },
        Ratuminus(x) => match as_rat_literal(x) {
            Some((n, d)) => rat_literal(-n, d, span),
            None => mt.clone(),
        },
        Rateq(l, r) => match (as_rat_literal(l), as_rat_literal(r)) {
            (Some((a, b)), Some((c, d))) => mt.with_node(Bool(a * d == c * b)),
            _ => mt.clone(),
        },
        Ratcmp(op, l, r) => match (as_rat_literal(l), as_rat_literal(r)) {
            (Some((a, b)), Some((c, d))) => {
                let lhs = a * &d;
                let rhs = c * &b;
                let holds = match op {
                    RatCmpOp::Lt => lhs < rhs,
                    RatCmpOp::Le => lhs <= rhs,
                    RatCmpOp::Gt => lhs > rhs,
                    RatCmpOp::Ge => lhs >= rhs,
                };
                mt.with_node(Bool(holds))
            }
            _ => mt.clone(),
        },
        NatToRat(x) | IntToRat(x) => match &x.node {
            Int(v) | Nat(v) => rat_literal(v.clone(), BigInt::from(1), span),
            _ => mt.clone(),
        },
        NatToInt(x) => match &x.node {
            Nat(v) => mt.with_node(Int(v.clone())),
            _ => mt.clone(),
        },

        Plus(l, r) => fold_int(&mt, l, r, |a, b| a + b),
        Minus(l, r) => fold_int(&mt, l, r, |a, b| a - b),
        Mult(l, r) => fold_int(&mt, l, r, |a, b| a * b),

        _ => mt.clone(),
    }
}

fn fold_int(
    mt: &Mterm,
    l: &Mterm,
    r: &Mterm,
    f: impl Fn(BigInt, BigInt) -> BigInt,
) -> Mterm {
    use MtermNode::*;
    match (&l.node, &r.node) {
        (Int(a), Int(b)) => mt.with_node(Int(f(a.clone(), b.clone()))),
        (Nat(a), Nat(b)) if !matches!(mt.ty.node, TypeNode::Int) => {
            let v = f(a.clone(), b.clone());
            if v.is_negative() {
                mt.clone()
            } else {
                mt.with_node(Nat(v))
            }
        }
        _ => mt.clone(),
    }
}
