//! Housekeeping extractions.
//!
//! The back-end cannot evaluate arbitrary subterms in every position:
//! `let`-bindings nested inside expressions and function calls nested
//! inside other calls are hoisted into bindings preceding the
//! instruction. A single generic driver,
//! [`extract_term_from_instruction`], walks each instruction's immediate
//! expressions with an extraction function yielding the rewritten term
//! plus the bindings to wrap.

use archetype_model::model::Model;
use archetype_model::term::{Mterm, MtermNode};
use archetype_model::types::TypeNode;
use archetype_model::utils::NameGen;
use archetype_model::walk::{map_mterm_model, map_term};
use archetype_model::Ident;

/// Bindings accumulated while extracting, outermost first.
pub type Extracted = Vec<(Vec<Ident>, Mterm)>;

/// Control forms in statement position scope their own extractions:
/// nothing may be hoisted across a branch boundary.
fn instruction_like(mt: &Mterm) -> bool {
    mt.is_instruction()
        || (matches!(mt.ty.node, TypeNode::Unit)
            && matches!(
                mt.node,
                MtermNode::If { .. }
                    | MtermNode::Matchoption { .. }
                    | MtermNode::Matchor { .. }
                    | MtermNode::Matchlist { .. }
                    | MtermNode::Matchwith { .. }
                    | MtermNode::Letin { .. }
            ))
}

/// Process every immediate expression of each instruction in `mt` with
/// `f`; the returned bindings wrap the rebuilt instruction as outer
/// `let`s.
pub fn extract_term_from_instruction(
    mt: &Mterm,
    f: &mut impl FnMut(&Mterm, &mut Extracted) -> Mterm,
) -> Mterm {
    // Instructions containing instructions recurse structurally; only
    // expression operands are offered to `f`.
    let mut bindings: Extracted = Vec::new();
    let rebuilt = map_term(mt, &mut |child| {
        if instruction_like(child) {
            extract_term_from_instruction(child, f)
        } else {
            f(child, &mut bindings)
        }
    });
    wrap_bindings(rebuilt, bindings)
}

fn wrap_bindings(instr: Mterm, bindings: Extracted) -> Mterm {
    bindings.into_iter().rev().fold(instr, |body, (ids, value)| {
        let span = value.span;
        let ty = body.ty.clone();
        Mterm::new(
            MtermNode::Letin {
                ids,
                value: Box::new(value),
                body: Box::new(body),
            },
            ty,
            span,
        )
    })
}

/// Hoist `let`-bindings out of expression positions: the binding moves
/// in front of the enclosing instruction and the expression keeps the
/// body.
pub fn remove_letin_from_expr(model: Model) -> Model {
    map_mterm_model(model, &mut |_ctx, top| {
        if !instruction_like(top) {
            return top.clone();
        }
        extract_term_from_instruction(top, &mut hoist_letin)
    })
}

fn hoist_letin(expr: &Mterm, bindings: &mut Extracted) -> Mterm {
    // Children first so inner bindings surface before outer ones.
    let expr = map_term(expr, &mut |c| hoist_letin(c, bindings));
    match expr.node {
        MtermNode::Letin { ids, value, body } => {
            bindings.push((ids, *value));
            *body
        }
        _ => expr,
    }
}

/// Hoist function calls nested inside other expressions into preceding
/// bindings, so call results reach the back-end as plain variables.
pub fn remove_fun_dotasset(model: Model) -> Model {
    let mut names = NameGen::new();
    map_mterm_model(model, &mut |_ctx, top| {
        if !instruction_like(top) {
            return top.clone();
        }
        extract_term_from_instruction(top, &mut |expr, bindings| {
            hoist_nested_calls(expr, bindings, &mut names, true)
        })
    })
}

fn hoist_nested_calls(
    expr: &Mterm,
    bindings: &mut Extracted,
    names: &mut NameGen,
    top_level: bool,
) -> Mterm {
    let rebuilt = map_term(expr, &mut |c| {
        hoist_nested_calls(c, bindings, names, false)
    });
    match &rebuilt.node {
        MtermNode::App { .. } if !top_level => {
            let id = names.fresh("_tmp");
            let var = Mterm::var(id.clone(), rebuilt.ty.clone(), rebuilt.span);
            bindings.push((vec![id], rebuilt));
            var
        }
        _ => rebuilt,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use archetype_model::function::{Function, FunctionKind, FunctionStruct};
    use archetype_model::term::{AssignKind, AssignOp, VarKind};
    use archetype_model::{Span, Type};

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

    fn assign_x(value: Mterm) -> Mterm {
        Mterm::new(
            MtermNode::Assign {
                op: AssignOp::Assign,
                typ: Type::nat(),
                kind: AssignKind::Var("x".into(), VarKind::Local),
                value: Box::new(value),
            },
            Type::unit(),
            sp(),
        )
    }

    #[test]
    fn test_letin_is_hoisted_out_of_condition() {
        // if (let y = 1 in y > 0) then skip
        let letin = Mterm::new(
            MtermNode::Letin {
                ids: vec!["y".into()],
                value: Box::new(Mterm::nat(1, sp())),
                body: Box::new(Mterm::new(
                    MtermNode::Gt(
                        Box::new(Mterm::var("y", Type::nat(), sp())),
                        Box::new(Mterm::nat(0, sp())),
                    ),
                    Type::bool(),
                    sp(),
                )),
            },
            Type::bool(),
            sp(),
        );
        let body = Mterm::if_(letin, Mterm::skip(sp()), None, sp());
        let model = remove_letin_from_expr(model_with_body(body));
        match &body_of(&model).node {
            MtermNode::Letin { ids, body, .. } => {
                assert_eq!(ids[0], "y");
                match &body.node {
                    MtermNode::If { cond, .. } => {
                        assert!(matches!(cond.node, MtermNode::Gt(..)))
                    }
                    other => panic!("expected If, got {other:?}"),
                }
            }
            other => panic!("expected hoisted Letin, got {other:?}"),
        }
    }

    #[test]
    fn test_nested_call_is_hoisted() {
        // x := 1 + f(2)  →  let _tmp = f(2) in x := 1 + _tmp
        let call = Mterm::new(
            MtermNode::App {
                id: "f".into(),
                args: vec![Mterm::nat(2, sp())],
            },
            Type::nat(),
            sp(),
        );
        let body = assign_x(Mterm::new(
            MtermNode::Plus(Box::new(Mterm::nat(1, sp())), Box::new(call)),
            Type::nat(),
            sp(),
        ));
        let model = remove_fun_dotasset(model_with_body(body));
        match &body_of(&model).node {
            MtermNode::Letin { ids, value, body } => {
                assert!(ids[0].starts_with("_tmp"));
                assert!(matches!(value.node, MtermNode::App { .. }));
                match &body.node {
                    MtermNode::Assign { value, .. } => match &value.node {
                        MtermNode::Plus(_, r) => {
                            assert!(matches!(r.node, MtermNode::Var { .. }))
                        }
                        other => panic!("expected Plus, got {other:?}"),
                    },
                    other => panic!("expected Assign, got {other:?}"),
                }
            }
            other => panic!("expected Letin, got {other:?}"),
        }
    }

    #[test]
    fn test_top_level_call_is_left_alone() {
        let call = Mterm::new(
            MtermNode::App {
                id: "f".into(),
                args: vec![],
            },
            Type::nat(),
            sp(),
        );
        let body = assign_x(call);
        let model = remove_fun_dotasset(model_with_body(body.clone()));
        assert_eq!(body_of(&model), &body);
    }
}
