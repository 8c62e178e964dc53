//! Entry-point surface passes.

use archetype_model::decl::{StorageItem, StorageModelType};
use archetype_model::function::{Argument, FunctionKind};
use archetype_model::model::{ApiCk, ApiItem, Model};
use archetype_model::term::{
    AssignKind, AssignOp, CurrencyUnit, FailType, Mterm, MtermNode, TransferKind, VarKind,
};
use archetype_model::utils::with_operations;
use archetype_model::walk::{fold_term_rec, map_mterm_model, map_term};
use archetype_model::{Ident, Type};

/// A getter returning `T` is an entry taking a callback `contract<T>`;
/// `return x` becomes a transfer to the callback.
pub fn getter_to_entry(model: Model) -> Model {
    let mut model = model;
    for function in &mut model.functions {
        let FunctionKind::Getter(ret) = function.kind.clone() else {
            continue;
        };
        let cb_ty = Type::contract(ret.clone());
        function.fs.eargs.push(Argument {
            name: "_cb".into(),
            typ: cb_ty.clone(),
            default: None,
            loc: function.fs.loc,
        });

        fn replace_return(mt: &Mterm, cb_ty: &Type) -> Mterm {
            match &mt.node {
                MtermNode::Return(x) => {
                    let span = mt.span;
                    let zero = Mterm::new(
                        MtermNode::Currency(0.into(), CurrencyUnit::Utz),
                        Type::currency(),
                        span,
                    );
                    let cb = Mterm::new(
                        MtermNode::Var {
                            id: "_cb".into(),
                            kind: VarKind::Param,
                        },
                        cb_ty.clone(),
                        span,
                    );
                    Mterm::new(
                        MtermNode::Transfer(TransferKind::Entry {
                            value: Box::new(zero),
                            entry: Box::new(cb),
                            arg: x.clone(),
                        }),
                        Type::unit(),
                        span,
                    )
                }
                _ => map_term(mt, &mut |c| replace_return(c, cb_ty)),
            }
        }
        function.fs.body = replace_return(&function.fs.body, &cb_ty);
        function.kind = FunctionKind::Entry;
    }
    model
}

/// Operations accumulate by prepending; reverse the list at the end of
/// every body that wrote to it so they are emitted in call order.
pub fn reverse_operations(model: Model) -> Model {
    let mut model = model;
    for function in &mut model.functions {
        if !with_operations(&function.fs.body) {
            continue;
        }
        let span = function.fs.body.span;
        let ops_ty = Type::list(Type::operation());
        let reverse = Mterm::new(
            MtermNode::Assign {
                op: AssignOp::Assign,
                typ: ops_ty.clone(),
                kind: AssignKind::Operations,
                value: Box::new(Mterm::new(
                    MtermNode::Listreverse(
                        Type::operation(),
                        Box::new(Mterm::new(MtermNode::Operations, ops_ty, span)),
                    ),
                    Type::list(Type::operation()),
                    span,
                )),
            },
            Type::unit(),
            span,
        );
        function.fs.body =
            Mterm::seq(vec![function.fs.body.clone(), reverse], span);
    }
    model
}

/// Test instrumentation: a `_now` storage variable, a `_set_now` entry
/// writing it, and every `now` redirected to it.
pub fn test_mode(model: Model) -> Model {
    let mut model = model;
    let loc = model.loc;

    model.storage.push(StorageItem {
        id: "_now".into(),
        model_type: StorageModelType::Var,
        typ: Type::date(),
        default: Mterm::new(MtermNode::Date(0), Type::date(), loc),
        ghost: false,
        loc,
    });

    let mut model = map_mterm_model(model, &mut |_ctx, top| redirect_now(top));

    use archetype_model::function::{Function, FunctionStruct};
    model.functions.push(Function {
        kind: FunctionKind::Entry,
        fs: FunctionStruct {
            name: "_set_now".into(),
            args: vec![Argument {
                name: "v".into(),
                typ: Type::date(),
                default: None,
                loc,
            }],
            eargs: vec![],
            body: Mterm::new(
                MtermNode::Assign {
                    op: AssignOp::Assign,
                    typ: Type::date(),
                    kind: AssignKind::Var("_now".into(), VarKind::StoreVar),
                    value: Box::new(Mterm::new(
                        MtermNode::Var {
                            id: "v".into(),
                            kind: VarKind::Param,
                        },
                        Type::date(),
                        loc,
                    )),
                },
                Type::unit(),
                loc,
            ),
            stovars: vec!["_now".into()],
            spec: None,
            loc,
        },
    });
    model
}

fn redirect_now(mt: &Mterm) -> Mterm {
    match &mt.node {
        MtermNode::Now => mt.with_node(MtermNode::Var {
            id: "_now".into(),
            kind: VarKind::StoreVar,
        }),
        _ => map_term(mt, &mut redirect_now),
    }
}

/// Annotate the token-standard entries so the emitted arm names match
/// the FA2 ABI.
pub fn patch_fa2(model: Model) -> Model {
    let mut model = model;
    for function in &mut model.functions {
        if !function.kind.is_entry() {
            continue;
        }
        let annotations: &[(&str, &str)] = match function.fs.name.as_str() {
            "transfer" => &[("txs", "%txs"), ("from_", "%from_")],
            "balance_of" => &[("requests", "%requests"), ("callback", "%callback")],
            "update_operators" => &[("upl", "%update_operators")],
            _ => continue,
        };
        for arg in &mut function.fs.args {
            if let Some((_, ann)) = annotations.iter().find(|(n, _)| *n == arg.name) {
                arg.typ = arg.typ.clone().with_annotation(*ann);
            }
        }
    }
    model
}

/// Record, per function, the storage slots it actually touches; the
/// back-end uses the list to emit precise effect annotations.
pub fn fill_stovars(model: Model) -> Model {
    let mut model = model;
    let storage_ids: Vec<Ident> = model.storage.iter().map(|s| s.id.clone()).collect();
    for function in &mut model.functions {
        let mut used: Vec<Ident> = Vec::new();
        fold_term_rec(&function.fs.body, (), &mut |(), mt| {
            let id = match &mt.node {
                MtermNode::Var { id, kind }
                    if matches!(kind, VarKind::StoreVar | VarKind::StoreCol) =>
                {
                    Some(id)
                }
                MtermNode::Assign {
                    kind: AssignKind::Var(id, vk),
                    ..
                } if matches!(vk, VarKind::StoreVar | VarKind::StoreCol) => Some(id),
                _ => None,
            };
            if let Some(id) = id {
                if storage_ids.contains(id) && !used.contains(id) {
                    used.push(id.clone());
                }
            }
        });
        function.fs.stovars = used;
    }
    model
}

/// Canonicalise the generated helper list: duplicates collapse, and a
/// view-specialised helper folds into its collection form when both
/// exist.
pub fn filter_api_storage(model: Model) -> Model {
    use archetype_model::model::ApiAsset::*;
    let mut model = model;

    let with_ck = |node: &archetype_model::model::ApiAsset, ck: ApiCk| {
        match node {
            Clear(a, _) => Clear(a.clone(), ck),
            RemoveIf(a, _) => RemoveIf(a.clone(), ck),
            Contains(a, _) => Contains(a.clone(), ck),
            Nth(a, _) => Nth(a.clone(), ck),
            Select(a, _) => Select(a.clone(), ck),
            Sort(a, _) => Sort(a.clone(), ck),
            Count(a, _) => Count(a.clone(), ck),
            Sum(a, _) => Sum(a.clone(), ck),
            Head(a, _) => Head(a.clone(), ck),
            Tail(a, _) => Tail(a.clone(), ck),
            other => other.clone(),
        }
    };
    let ck_of = |node: &archetype_model::model::ApiAsset| match node {
        Clear(_, ck) | RemoveIf(_, ck) | Contains(_, ck) | Nth(_, ck) | Select(_, ck)
        | Sort(_, ck) | Count(_, ck) | Sum(_, ck) | Head(_, ck) | Tail(_, ck) => Some(*ck),
        _ => None,
    };

    let items = std::mem::take(&mut model.api_items);
    let mut out: Vec<ApiItem> = Vec::new();
    for item in items {
        let folded = match ck_of(&item.node) {
            Some(ApiCk::View)
                if items_contains(&out, &with_ck(&item.node, ApiCk::Coll)) =>
            {
                continue;
            }
            _ => item,
        };
        if !items_contains(&out, &folded.node) {
            out.push(folded);
        }
    }
    // A later collection form subsumes earlier view forms too.
    let colls: Vec<_> = out
        .iter()
        .filter(|i| ck_of(&i.node) == Some(ApiCk::Coll))
        .map(|i| i.node.clone())
        .collect();
    out.retain(|i| match ck_of(&i.node) {
        Some(ApiCk::View) => !colls.contains(&with_ck(&i.node, ApiCk::Coll)),
        _ => true,
    });
    out.sort_by(|a, b| a.node.cmp(&b.node));
    model.api_items = out;
    model
}

fn items_contains(items: &[ApiItem], node: &archetype_model::model::ApiAsset) -> bool {
    items.iter().any(|i| i.node == *node)
}

/// Condition labels are gone: `InvalidCondition` collapses to `Invalid`.
pub fn process_fail(model: Model) -> Model {
    fn aux(mt: &Mterm) -> Mterm {
        let mt = map_term(mt, &mut aux);
        let MtermNode::Fail(FailType::InvalidCondition(label, value)) = &mt.node else {
            return mt;
        };
        let payload = match (value, label) {
            (Some(v), _) => (**v).clone(),
            (None, Some(label)) => Mterm::string(label.clone(), mt.span),
            (None, None) => Mterm::string("invalid condition", mt.span),
        };
        mt.with_node(MtermNode::Fail(FailType::Invalid(Box::new(payload))))
    }
    map_mterm_model(model, &mut |_ctx, mt| aux(mt))
}

#[cfg(test)]
mod tests {
    use super::*;
    use archetype_model::function::{Function, FunctionStruct};
    use archetype_model::model::ApiAsset;
    use archetype_model::model::ApiLoc;
    use archetype_model::Span;

    fn sp() -> Span {
        Span::zero(0)
    }

    fn function(name: &str, kind: FunctionKind, body: Mterm) -> Function {
        Function {
            kind,
            fs: FunctionStruct {
                name: name.into(),
                args: vec![],
                eargs: vec![],
                body,
                stovars: vec![],
                spec: None,
                loc: sp(),
            },
        }
    }

    #[test]
    fn test_getter_becomes_entry_with_callback() {
        let mut model = Model::new("m", sp());
        model.functions.push(function(
            "get_total",
            FunctionKind::Getter(Type::nat()),
            Mterm::new(
                MtermNode::Return(Box::new(Mterm::nat(5, sp()))),
                Type::unit(),
                sp(),
            ),
        ));
        let model = getter_to_entry(model);
        let f = &model.functions[0];
        assert!(f.kind.is_entry());
        assert_eq!(f.fs.eargs[0].name, "_cb");
        assert_eq!(f.fs.eargs[0].typ, Type::contract(Type::nat()));
        match &f.fs.body.node {
            MtermNode::Transfer(TransferKind::Entry { arg, .. }) => {
                assert_eq!(arg.node, MtermNode::Nat(5.into()));
            }
            other => panic!("expected Transfer, got {other:?}"),
        }
    }

    #[test]
    fn test_reverse_appended_only_when_operations_written() {
        let transfer = Mterm::new(
            MtermNode::Transfer(TransferKind::Simple {
                value: Box::new(Mterm::new(
                    MtermNode::Currency(1.into(), CurrencyUnit::Utz),
                    Type::currency(),
                    sp(),
                )),
                dest: Box::new(Mterm::new(MtermNode::Caller, Type::address(), sp())),
            }),
            Type::unit(),
            sp(),
        );
        let mut model = Model::new("m", sp());
        model
            .functions
            .push(function("pay", FunctionKind::Entry, transfer));
        model
            .functions
            .push(function("idle", FunctionKind::Entry, Mterm::skip(sp())));

        let model = reverse_operations(model);
        match &model.functions[0].fs.body.node {
            MtermNode::Seq(instrs) => {
                assert_eq!(instrs.len(), 2);
                assert!(matches!(
                    instrs[1].node,
                    MtermNode::Assign {
                        kind: AssignKind::Operations,
                        ..
                    }
                ));
            }
            other => panic!("expected Seq, got {other:?}"),
        }
        assert!(matches!(&model.functions[1].fs.body.node, MtermNode::Seq(s) if s.is_empty()));
    }

    #[test]
    fn test_test_mode_redirects_now() {
        let mut model = Model::new("m", sp());
        model.functions.push(function(
            "check",
            FunctionKind::Entry,
            Mterm::new(MtermNode::Now, Type::date(), sp()),
        ));
        let model = test_mode(model);
        match &model.functions[0].fs.body.node {
            MtermNode::Var { id, kind } => {
                assert_eq!(id, "_now");
                assert_eq!(*kind, VarKind::StoreVar);
            }
            other => panic!("expected _now read, got {other:?}"),
        }
        assert!(model.storage.iter().any(|s| s.id == "_now"));
        assert!(model.find_function("_set_now").is_some());
    }

    #[test]
    fn test_fill_stovars_lists_touched_slots() {
        let mut model = Model::new("m", sp());
        model.storage.push(StorageItem {
            id: "total".into(),
            model_type: StorageModelType::Var,
            typ: Type::nat(),
            default: Mterm::nat(0, sp()),
            ghost: false,
            loc: sp(),
        });
        model.functions.push(function(
            "read",
            FunctionKind::Entry,
            Mterm::storage_var("total", Type::nat(), sp()),
        ));
        let model = fill_stovars(model);
        assert_eq!(model.functions[0].fs.stovars, vec!["total".to_string()]);
    }

    #[test]
    fn test_filter_api_collapses_view_into_coll() {
        let mut model = Model::new("m", sp());
        model.api_items = vec![
            ApiItem {
                node: ApiAsset::Count("mile".into(), ApiCk::View),
                loc: ApiLoc::OnlyExec,
            },
            ApiItem {
                node: ApiAsset::Count("mile".into(), ApiCk::Coll),
                loc: ApiLoc::OnlyExec,
            },
            ApiItem {
                node: ApiAsset::Count("mile".into(), ApiCk::Coll),
                loc: ApiLoc::OnlyExec,
            },
        ];
        let model = filter_api_storage(model);
        assert_eq!(model.api_items.len(), 1);
        assert_eq!(
            model.api_items[0].node,
            ApiAsset::Count("mile".into(), ApiCk::Coll)
        );
    }

    #[test]
    fn test_invalid_condition_collapses() {
        let mut model = Model::new("m", sp());
        model.functions.push(function(
            "go",
            FunctionKind::Entry,
            Mterm::new(
                MtermNode::Fail(FailType::InvalidCondition(
                    Some("r1".into()),
                    Some(Box::new(Mterm::string("too low", sp()))),
                )),
                Type::unit(),
                sp(),
            ),
        ));
        let model = process_fail(model);
        match &model.functions[0].fs.body.node {
            MtermNode::Fail(FailType::Invalid(v)) => {
                assert_eq!(v.node, MtermNode::String("too low".into()));
            }
            other => panic!("expected Invalid, got {other:?}"),
        }
    }
}
