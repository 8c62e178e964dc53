//! Control-flow lowerings.
//!
//! Loops over lists become indexed `iter`s, optional declarations and
//! ternaries become matches, boolean connectives regain short-circuit
//! semantics, and the last high-level conveniences (`list_concat`,
//! bounded `iter`, failing `map_get`, `fail_some`) become primitive
//! control flow.

use archetype_model::model::Model;
use archetype_model::term::{
    AssignKind, AssignOp, FailType, ForIdent, IterKind, Mterm, MtermNode, VarKind,
};
use archetype_model::types::TypeNode;
use archetype_model::utils::NameGen;
use archetype_model::walk::{map_mterm_model, map_term};
use archetype_model::Type;

/// `for x in <list>` becomes `iter _idx from 0 to count - 1` with
/// `let x = nth(coll, _idx)`. Set and map loops stay `for`: the target
/// VM iterates those natively in key order.
pub fn replace_for_to_iter(model: Model) -> Model {
    let mut names = NameGen::new();
    map_mterm_model(model, &mut |_ctx, top| for_to_iter(top, &mut names))
}

fn for_to_iter(mt: &Mterm, names: &mut NameGen) -> Mterm {
    let mt = map_term(mt, &mut |c| for_to_iter(c, names));
    let span = mt.span;
    let MtermNode::For {
        ids: ForIdent::Single(id),
        coll: IterKind::List(coll),
        body,
        label,
    } = &mt.node
    else {
        return mt;
    };
    let elem_ty = coll.ty.as_list().cloned().unwrap_or_else(Type::unit);

    let list_id = names.fresh("_tmp");
    let idx = names.fresh("_idx");
    let list_var = Mterm::var(list_id.clone(), coll.ty.clone(), span);
    let idx_var = Mterm::var(idx.clone(), Type::nat(), span);

    let count = Mterm::new(
        MtermNode::Listlength(elem_ty.clone(), Box::new(list_var.clone())),
        Type::nat(),
        span,
    );
    let upper = Mterm::new(
        MtermNode::Minus(Box::new(count), Box::new(Mterm::nat(1, span))),
        Type::int(),
        span,
    );
    let nth = Mterm::new(
        MtermNode::Listnth(elem_ty.clone(), Box::new(list_var), Box::new(idx_var)),
        elem_ty,
        span,
    );
    let inner = Mterm::new(
        MtermNode::Letin {
            ids: vec![id.clone()],
            value: Box::new(nth),
            body: body.clone(),
        },
        Type::unit(),
        span,
    );
    let iter = Mterm::new(
        MtermNode::Iter {
            id: idx,
            from: Box::new(Mterm::nat(0, span)),
            to: Box::new(upper),
            body: Box::new(inner),
            label: label.clone(),
            nat: true,
        },
        Type::unit(),
        span,
    );
    Mterm::new(
        MtermNode::Letin {
            ids: vec![list_id],
            value: Box::new((**coll).clone()),
            body: Box::new(iter),
        },
        Type::unit(),
        span,
    )
}

/// `declvar_opt id ?= e : fallback` becomes a `let` over an option
/// match, failing on `none`; `assign_opt` likewise.
pub fn remove_decl_var_opt(model: Model) -> Model {
    let mut names = NameGen::new();
    map_mterm_model(model, &mut |_ctx, top| decl_var_opt(top, &mut names))
}

fn option_extract(
    value: &Mterm,
    fail_with: Option<&Mterm>,
    names: &mut NameGen,
    span: archetype_model::Span,
) -> Mterm {
    let inner_ty = value
        .ty
        .as_option()
        .cloned()
        .unwrap_or_else(Type::unit);
    let some_id = names.fresh("_q_opt");
    let some = Mterm::var(some_id.clone(), inner_ty.clone(), span);
    let fail = match fail_with {
        Some(err) => Mterm::fail(FailType::Invalid(Box::new(err.clone())), span),
        None => Mterm::fail(FailType::NotFound, span),
    };
    Mterm::new(
        MtermNode::Matchoption {
            x: Box::new(value.clone()),
            some_id,
            some: Box::new(some),
            none: Box::new(fail.retyped(inner_ty.clone())),
        },
        inner_ty,
        span,
    )
}

fn decl_var_opt(mt: &Mterm, names: &mut NameGen) -> Mterm {
    let mt = map_term(mt, &mut |c| decl_var_opt(c, names));
    let span = mt.span;
    match &mt.node {
        MtermNode::Seq(instrs) => {
            let mut out: Vec<Mterm> = Vec::with_capacity(instrs.len());
            let mut iter = instrs.iter().cloned();
            while let Some(instr) = iter.next() {
                if let MtermNode::Declvaropt {
                    ids, value, fail, ..
                } = &instr.node
                {
                    let rest: Vec<Mterm> = iter.collect();
                    let body = decl_var_opt(&Mterm::seq(rest, span), names);
                    let extracted =
                        option_extract(value, fail.as_deref(), names, instr.span);
                    out.push(Mterm::new(
                        MtermNode::Letin {
                            ids: ids.clone(),
                            value: Box::new(extracted),
                            body: Box::new(body),
                        },
                        Type::unit(),
                        instr.span,
                    ));
                    return Mterm::new(MtermNode::Seq(out), mt.ty.clone(), span);
                }
                out.push(instr);
            }
            Mterm::new(MtermNode::Seq(out), mt.ty.clone(), span)
        }
        MtermNode::Declvaropt {
            ids, value, fail, ..
        } => {
            let extracted = option_extract(value, fail.as_deref(), names, span);
            Mterm::new(
                MtermNode::Letin {
                    ids: ids.clone(),
                    value: Box::new(extracted),
                    body: Box::new(Mterm::skip(span)),
                },
                Type::unit(),
                span,
            )
        }
        MtermNode::Assignopt {
            kind,
            typ,
            value,
            fail,
        } => {
            let extracted = option_extract(value, Some(fail.as_ref()), names, span);
            Mterm::new(
                MtermNode::Assign {
                    op: AssignOp::Assign,
                    typ: typ.clone(),
                    kind: kind.clone(),
                    value: Box::new(extracted),
                },
                Type::unit(),
                span,
            )
        }
        _ => mt,
    }
}

/// `a and b` / `a or b` become nested conditionals so evaluation
/// short-circuits on a VM with eager boolean operations.
pub fn lazy_eval_condition(model: Model) -> Model {
    fn aux(mt: &Mterm) -> Mterm {
        let mt = map_term(mt, &mut aux);
        let span = mt.span;
        match &mt.node {
            MtermNode::And(l, r) if matches!(l.ty.node, TypeNode::Bool) => {
                let inner = Mterm::if_(
                    (**r).clone(),
                    Mterm::bool_(true, span),
                    Some(Mterm::bool_(false, span)),
                    span,
                );
                Mterm::if_(
                    (**l).clone(),
                    inner,
                    Some(Mterm::bool_(false, span)),
                    span,
                )
            }
            MtermNode::Or(l, r) if matches!(l.ty.node, TypeNode::Bool) => {
                let inner = Mterm::if_(
                    (**r).clone(),
                    Mterm::bool_(true, span),
                    Some(Mterm::bool_(false, span)),
                    span,
                );
                Mterm::if_(
                    (**l).clone(),
                    Mterm::bool_(true, span),
                    Some(inner),
                    span,
                )
            }
            _ => mt,
        }
    }
    map_mterm_model(model, &mut |_ctx, mt| aux(mt))
}

/// `c ? a : b` becomes a conditional; the option ternary becomes a
/// match.
pub fn remove_ternary_operator(model: Model) -> Model {
    let mut names = NameGen::new();
    map_mterm_model(model, &mut |_ctx, top| ternary(top, &mut names))
}

fn ternary(mt: &Mterm, names: &mut NameGen) -> Mterm {
    let mt = map_term(mt, &mut |c| ternary(c, names));
    let span = mt.span;
    match &mt.node {
        MtermNode::Ternarybool { cond, then, els } => Mterm::new(
            MtermNode::If {
                cond: cond.clone(),
                then: then.clone(),
                els: Some(els.clone()),
            },
            mt.ty.clone(),
            span,
        ),
        MtermNode::Ternaryoption { opt, some, none } => Mterm::new(
            MtermNode::Matchoption {
                x: opt.clone(),
                some_id: names.fresh("_q_opt"),
                some: some.clone(),
                none: none.clone(),
            },
            mt.ty.clone(),
            span,
        ),
        _ => mt,
    }
}

/// `x = true` is `x`; `x = false` is `not x`; `<>` dually. Both operand
/// orders are simplified.
pub fn remove_cmp_bool(model: Model) -> Model {
    fn aux(mt: &Mterm) -> Mterm {
        let mt = map_term(mt, &mut aux);
        let not = |x: &Mterm| {
            Mterm::new(
                MtermNode::Not(Box::new(x.clone())),
                Type::bool(),
                x.span,
            )
        };
        match &mt.node {
            MtermNode::Equal(_, l, r) => match (&l.node, &r.node) {
                (_, MtermNode::Bool(true)) => (**l).clone(),
                (_, MtermNode::Bool(false)) => not(l),
                (MtermNode::Bool(true), _) => (**r).clone(),
                (MtermNode::Bool(false), _) => not(r),
                _ => mt.clone(),
            },
            MtermNode::Nequal(_, l, r) => match (&l.node, &r.node) {
                (_, MtermNode::Bool(true)) => not(l),
                (_, MtermNode::Bool(false)) => (**l).clone(),
                (MtermNode::Bool(true), _) => not(r),
                (MtermNode::Bool(false), _) => (**r).clone(),
                _ => mt.clone(),
            },
            _ => mt,
        }
    }
    map_mterm_model(model, &mut |_ctx, mt| aux(mt))
}

/// The final conveniences: `list_concat` as a fold-prepend, bounded
/// `iter` as a `while`, failing `map_get` as a match on `map_get_opt`,
/// and `fail_some` as a match.
pub fn remove_high_level_model(model: Model) -> Model {
    let mut names = NameGen::new();
    map_mterm_model(model, &mut |_ctx, top| high_level(top, &mut names))
}

fn high_level(mt: &Mterm, names: &mut NameGen) -> Mterm {
    let mt = map_term(mt, &mut |c| high_level(c, names));
    let span = mt.span;
    match &mt.node {
        MtermNode::Listconcat(t, l, r) => {
            // Prepending each element of the reversed left list onto the
            // right one preserves order.
            let elem = names.fresh("_tmp");
            let accu = names.fresh("_accu");
            let rev = Mterm::new(
                MtermNode::Listreverse(t.clone(), l.clone()),
                l.ty.clone(),
                span,
            );
            let body = Mterm::new(
                MtermNode::Listprepend(
                    t.clone(),
                    Box::new(Mterm::var(accu.clone(), mt.ty.clone(), span)),
                    Box::new(Mterm::var(elem.clone(), t.clone(), span)),
                ),
                mt.ty.clone(),
                span,
            );
            Mterm::new(
                MtermNode::Listfold {
                    elem_type: t.clone(),
                    elem_id: elem,
                    acc_id: accu,
                    coll: Box::new(rev),
                    init: r.clone(),
                    body: Box::new(body),
                },
                mt.ty.clone(),
                span,
            )
        }

        MtermNode::Iter {
            id,
            from,
            to,
            body,
            label,
            nat,
        } => {
            let counter_ty = if *nat { Type::nat() } else { Type::int() };
            let bound = names.fresh("_tmp");
            let i_var = Mterm::var(id.clone(), counter_ty.clone(), span);
            let bound_var = Mterm::var(bound.clone(), to.ty.clone(), span);
            let cond = Mterm::new(
                MtermNode::Le(Box::new(i_var.clone()), Box::new(bound_var)),
                Type::bool(),
                span,
            );
            let bump = Mterm::new(
                MtermNode::Assign {
                    op: AssignOp::Assign,
                    typ: counter_ty.clone(),
                    kind: AssignKind::Var(id.clone(), VarKind::Local),
                    value: Box::new(Mterm::new(
                        MtermNode::Plus(Box::new(i_var), Box::new(Mterm::nat(1, span))),
                        counter_ty,
                        span,
                    )),
                },
                Type::unit(),
                span,
            );
            let while_ = Mterm::new(
                MtermNode::While {
                    cond: Box::new(cond),
                    body: Box::new(Mterm::seq(vec![(**body).clone(), bump], span)),
                    label: label.clone(),
                },
                Type::unit(),
                span,
            );
            let inner = Mterm::new(
                MtermNode::Letin {
                    ids: vec![bound],
                    value: to.clone(),
                    body: Box::new(while_),
                },
                Type::unit(),
                span,
            );
            Mterm::new(
                MtermNode::Letin {
                    ids: vec![id.clone()],
                    value: from.clone(),
                    body: Box::new(inner),
                },
                Type::unit(),
                span,
            )
        }

        MtermNode::Mapget {
            mk,
            key_type,
            value_type,
            map,
            key,
            asset,
        } => {
            let getopt = Mterm::new(
                MtermNode::Mapgetopt {
                    mk: *mk,
                    key_type: key_type.clone(),
                    value_type: value_type.clone(),
                    map: map.clone(),
                    key: key.clone(),
                },
                Type::option(value_type.clone()),
                span,
            );
            let some_id = names.fresh("_q_opt");
            let some = Mterm::var(some_id.clone(), value_type.clone(), span);
            let fail = match asset {
                Some(an) => Mterm::fail(FailType::AssetNotFound(an.clone()), span),
                None => Mterm::fail(FailType::NotFound, span),
            };
            Mterm::new(
                MtermNode::Matchoption {
                    x: Box::new(getopt),
                    some_id,
                    some: Box::new(some),
                    none: Box::new(fail.retyped(value_type.clone())),
                },
                value_type.clone(),
                span,
            )
        }

        MtermNode::Failsome(e) => {
            let inner_ty = e.ty.as_option().cloned().unwrap_or_else(Type::unit);
            let some_id = names.fresh("_q_opt");
            let err = Mterm::var(some_id.clone(), inner_ty, span);
            let fail = Mterm::fail(FailType::Invalid(Box::new(err)), span);
            Mterm::new(
                MtermNode::Matchoption {
                    x: e.clone(),
                    some_id,
                    some: Box::new(fail),
                    none: Box::new(Mterm::skip(span)),
                },
                Type::unit(),
                span,
            )
        }

        _ => mt,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use archetype_model::function::{Function, FunctionKind, FunctionStruct};
    use archetype_model::types::MapKind;
    use archetype_model::Span;

    fn sp() -> Span {
        Span::zero(0)
    }

    fn model_with_body(body: Mterm) -> Model {
        let mut m = Model::new("m", sp());
        m.functions.push(Function {
            kind: FunctionKind::Entry,
            fs: FunctionStruct {
                name: "go".into(),
                args: vec![],
                eargs: vec![],
                body,
                stovars: vec![],
                spec: None,
                loc: sp(),
            },
        });
        m
    }

    fn body_of(model: &Model) -> &Mterm {
        &model.functions[0].fs.body
    }

    #[test]
    fn test_for_over_list_becomes_indexed_iter() {
        let list_ty = Type::list(Type::nat());
        let body = Mterm::new(
            MtermNode::For {
                ids: ForIdent::Single("x".into()),
                coll: IterKind::List(Box::new(Mterm::storage_var("l", list_ty, sp()))),
                body: Box::new(Mterm::skip(sp())),
                label: Some("loop_go_0".into()),
            },
            Type::unit(),
            sp(),
        );
        let model = replace_for_to_iter(model_with_body(body));
        match &body_of(&model).node {
            MtermNode::Letin { body, .. } => match &body.node {
                MtermNode::Iter {
                    from, body, label, ..
                } => {
                    assert_eq!(from.node, MtermNode::Nat(0.into()));
                    assert_eq!(label.as_deref(), Some("loop_go_0"));
                    match &body.node {
                        MtermNode::Letin { ids, value, .. } => {
                            assert_eq!(ids[0], "x");
                            assert!(matches!(value.node, MtermNode::Listnth(..)));
                        }
                        other => panic!("expected binder, got {other:?}"),
                    }
                }
                other => panic!("expected Iter, got {other:?}"),
            },
            other => panic!("expected Letin, got {other:?}"),
        }
    }

    #[test]
    fn test_for_over_set_is_left_alone() {
        let set_ty = Type::set(Type::nat());
        let body = Mterm::new(
            MtermNode::For {
                ids: ForIdent::Single("x".into()),
                coll: IterKind::Set(Box::new(Mterm::storage_var("s", set_ty, sp()))),
                body: Box::new(Mterm::skip(sp())),
                label: None,
            },
            Type::unit(),
            sp(),
        );
        let model = replace_for_to_iter(model_with_body(body.clone()));
        assert_eq!(body_of(&model), &body);
    }

    #[test]
    fn test_declvaropt_becomes_match() {
        let body = Mterm::new(
            MtermNode::Seq(vec![
                Mterm::new(
                    MtermNode::Declvaropt {
                        ids: vec!["x".into()],
                        typ: None,
                        value: Box::new(Mterm::none(Type::nat(), sp())),
                        fail: None,
                        constant: false,
                    },
                    Type::unit(),
                    sp(),
                ),
                Mterm::var("x", Type::nat(), sp()),
            ]),
            Type::unit(),
            sp(),
        );
        let model = remove_decl_var_opt(model_with_body(body));
        match &body_of(&model).node {
            MtermNode::Seq(instrs) => match &instrs[0].node {
                MtermNode::Letin { value, .. } => match &value.node {
                    MtermNode::Matchoption { none, .. } => {
                        assert!(matches!(none.node, MtermNode::Fail(FailType::NotFound)));
                    }
                    other => panic!("expected Matchoption, got {other:?}"),
                },
                other => panic!("expected Letin, got {other:?}"),
            },
            other => panic!("expected Seq, got {other:?}"),
        }
    }

    #[test]
    fn test_and_short_circuits() {
        let body = Mterm::new(
            MtermNode::And(
                Box::new(Mterm::var("a", Type::bool(), sp())),
                Box::new(Mterm::var("b", Type::bool(), sp())),
            ),
            Type::bool(),
            sp(),
        );
        let model = lazy_eval_condition(model_with_body(body));
        match &body_of(&model).node {
            MtermNode::If { els, then, .. } => {
                assert!(matches!(then.node, MtermNode::If { .. }));
                assert_eq!(els.as_ref().unwrap().node, MtermNode::Bool(false));
            }
            other => panic!("expected If, got {other:?}"),
        }
    }

    #[test]
    fn test_ternary_becomes_if() {
        let body = Mterm::new(
            MtermNode::Ternarybool {
                cond: Box::new(Mterm::var("c", Type::bool(), sp())),
                then: Box::new(Mterm::nat(1, sp())),
                els: Box::new(Mterm::nat(2, sp())),
            },
            Type::nat(),
            sp(),
        );
        let model = remove_ternary_operator(model_with_body(body));
        assert!(matches!(body_of(&model).node, MtermNode::If { .. }));
    }

    #[test]
    fn test_cmp_bool_simplifies() {
        let x = Mterm::var("x", Type::bool(), sp());
        let body = Mterm::new(
            MtermNode::Equal(
                Type::bool(),
                Box::new(x.clone()),
                Box::new(Mterm::bool_(false, sp())),
            ),
            Type::bool(),
            sp(),
        );
        let model = remove_cmp_bool(model_with_body(body));
        match &body_of(&model).node {
            MtermNode::Not(inner) => assert_eq!(**inner, x),
            other => panic!("expected Not, got {other:?}"),
        }
    }

    #[test]
    fn test_map_get_becomes_match_on_getopt() {
        let map_ty = Type::big_map(Type::address(), Type::nat());
        let body = Mterm::new(
            MtermNode::Mapget {
                mk: MapKind::BigMap,
                key_type: Type::address(),
                value_type: Type::nat(),
                map: Box::new(Mterm::storage_var("ledger", map_ty, sp())),
                key: Box::new(Mterm::new(MtermNode::Caller, Type::address(), sp())),
                asset: Some("ledger".into()),
            },
            Type::nat(),
            sp(),
        );
        let model = remove_high_level_model(model_with_body(body));
        match &body_of(&model).node {
            MtermNode::Matchoption { x, none, .. } => {
                assert!(matches!(x.node, MtermNode::Mapgetopt { .. }));
                assert!(matches!(
                    &none.node,
                    MtermNode::Fail(FailType::AssetNotFound(an)) if an == "ledger"
                ));
            }
            other => panic!("expected Matchoption, got {other:?}"),
        }
    }

    #[test]
    fn test_iter_becomes_while_with_counter() {
        let body = Mterm::new(
            MtermNode::Iter {
                id: "i".into(),
                from: Box::new(Mterm::nat(0, sp())),
                to: Box::new(Mterm::nat(9, sp())),
                body: Box::new(Mterm::skip(sp())),
                label: None,
                nat: true,
            },
            Type::unit(),
            sp(),
        );
        let model = remove_high_level_model(model_with_body(body));
        // let i = 0 in let _tmp = 9 in while i <= _tmp …
        match &body_of(&model).node {
            MtermNode::Letin { ids, body, .. } => {
                assert_eq!(ids[0], "i");
                match &body.node {
                    MtermNode::Letin { body, .. } => {
                        assert!(matches!(body.node, MtermNode::While { .. }))
                    }
                    other => panic!("expected bound limit, got {other:?}"),
                }
            }
            other => panic!("expected Letin, got {other:?}"),
        }
    }

    #[test]
    fn test_fail_some_becomes_match() {
        let body = Mterm::new(
            MtermNode::Failsome(Box::new(Mterm::none(Type::string(), sp()))),
            Type::unit(),
            sp(),
        );
        let model = remove_high_level_model(model_with_body(body));
        match &body_of(&model).node {
            MtermNode::Matchoption { some, none, .. } => {
                assert!(matches!(some.node, MtermNode::Fail(FailType::Invalid(_))));
                assert!(matches!(&none.node, MtermNode::Seq(s) if s.is_empty()));
            }
            other => panic!("expected Matchoption, got {other:?}"),
        }
    }
}
