//! Storage and whole-program environment passes.

use std::collections::HashMap;

use archetype_model::decl::{
    Decl, StorageItem, StorageModelType, VariableKind,
};
use archetype_model::function::{Argument, FunctionKind};
use archetype_model::model::Model;
use archetype_model::term::{AssignKind, Mterm, MtermNode, VarKind};
use archetype_model::types::MapKind;
use archetype_model::utils::eval;
use archetype_model::walk::{fold_term_rec, map_mterm_model, map_term};
use archetype_model::{Ident, Type};

use crate::error::{DiagnosticBag, ErrorKind};
use crate::options::Options;

/// With a single storage slot there is no record to project from: the
/// slot is threaded as the local parameter `_s`.
pub fn process_single_field_storage(model: Model) -> Model {
    let single = match model.storage.as_slice() {
        [item] => item.id.clone(),
        _ => return model,
    };

    fn rename(mt: &Mterm, from: &str) -> Mterm {
        match &mt.node {
            MtermNode::Var { id, kind }
                if id == from && matches!(kind, VarKind::StoreVar | VarKind::StoreCol) =>
            {
                mt.with_node(MtermNode::Var {
                    id: "_s".into(),
                    kind: VarKind::Local,
                })
            }
            MtermNode::Assign {
                op,
                typ,
                kind: AssignKind::Var(id, vk),
                value,
            } if id == from && matches!(vk, VarKind::StoreVar | VarKind::StoreCol) => {
                mt.with_node(MtermNode::Assign {
                    op: *op,
                    typ: typ.clone(),
                    kind: AssignKind::Var("_s".into(), VarKind::Local),
                    value: Box::new(rename(value, from)),
                })
            }
            _ => map_term(mt, &mut |c| rename(c, from)),
        }
    }

    map_mterm_model(model, &mut |_ctx, top| rename(top, &single))
}

fn storage_reads(body: &Mterm, storage_ids: &[Ident]) -> Vec<Ident> {
    let mut out: Vec<Ident> = Vec::new();
    fold_term_rec(body, (), &mut |(), mt| {
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
            if storage_ids.contains(id) && !out.contains(id) {
                out.push(id.clone());
            }
        }
    });
    out
}

/// Local functions and views take the storage slots they touch as
/// explicit parameters; call sites pass them through. Iterated to a
/// fixpoint because callees surface transitive uses.
pub fn remove_storage_field_in_function(model: Model) -> Model {
    let mut model = model;
    let storage_ids: Vec<Ident> = model.storage.iter().map(|s| s.id.clone()).collect();
    let storage_types: HashMap<Ident, Type> = model
        .storage
        .iter()
        .map(|s| (s.id.clone(), s.typ.clone()))
        .collect();

    // Function name → storage parameters already threaded.
    let mut threaded: HashMap<Ident, Vec<Ident>> = HashMap::new();

    loop {
        let mut changed = false;

        for idx in 0..model.functions.len() {
            if !matches!(
                model.functions[idx].kind,
                FunctionKind::Function(_) | FunctionKind::View(..)
            ) {
                continue;
            }
            let name = model.functions[idx].fs.name.clone();
            let uses = storage_reads(&model.functions[idx].fs.body, &storage_ids);
            let already = threaded.entry(name.clone()).or_default();
            let fresh: Vec<Ident> = uses
                .into_iter()
                .filter(|u| !already.contains(u))
                .collect();
            if fresh.is_empty() {
                continue;
            }
            changed = true;
            already.extend(fresh.iter().cloned());

            // Storage references become parameters inside the body.
            let function = &mut model.functions[idx];
            for id in &fresh {
                function.fs.args.push(Argument {
                    name: id.clone(),
                    typ: storage_types[id].clone(),
                    default: None,
                    loc: function.fs.loc,
                });
            }
            let fresh_set = fresh.clone();
            function.fs.body = demote_storage_refs(&function.fs.body, &fresh_set);

            // Every call site supplies the slots from its own scope.
            for caller in 0..model.functions.len() {
                let body = model.functions[caller].fs.body.clone();
                model.functions[caller].fs.body =
                    extend_call_sites(&body, &name, &fresh_set, &storage_types);
            }
        }

        if !changed {
            break;
        }
    }
    model
}

fn demote_storage_refs(mt: &Mterm, ids: &[Ident]) -> Mterm {
    match &mt.node {
        MtermNode::Var { id, kind }
            if ids.contains(id) && matches!(kind, VarKind::StoreVar | VarKind::StoreCol) =>
        {
            mt.with_node(MtermNode::Var {
                id: id.clone(),
                kind: VarKind::Param,
            })
        }
        _ => map_term(mt, &mut |c| demote_storage_refs(c, ids)),
    }
}

fn extend_call_sites(
    mt: &Mterm,
    callee: &str,
    extra: &[Ident],
    storage_types: &HashMap<Ident, Type>,
) -> Mterm {
    let mt = map_term(mt, &mut |c| {
        extend_call_sites(c, callee, extra, storage_types)
    });
    match &mt.node {
        MtermNode::App { id, args } if id == callee => {
            let mut args = args.clone();
            for slot in extra {
                args.push(Mterm::new(
                    MtermNode::Var {
                        id: slot.clone(),
                        kind: VarKind::StoreVar,
                    },
                    storage_types[slot].clone(),
                    mt.span,
                ));
            }
            mt.with_node(MtermNode::App {
                id: id.clone(),
                args,
            })
        }
        _ => mt,
    }
}

/// Inline every constant declaration at its references and drop both the
/// declaration and its storage slot.
pub fn remove_constant(model: Model) -> Model {
    let mut model = model;
    let constants: HashMap<Ident, Mterm> = model
        .decls
        .iter()
        .filter_map(|d| match d {
            Decl::Var(v) if v.kind == VariableKind::Constant => {
                let default = v
                    .default
                    .clone()
                    .unwrap_or_else(|| panic!("constant {} has no value", v.name));
                Some((v.name.clone(), default))
            }
            _ => None,
        })
        .collect();
    if constants.is_empty() {
        return model;
    }

    fn inline(mt: &Mterm, constants: &HashMap<Ident, Mterm>) -> Mterm {
        match &mt.node {
            MtermNode::Var { id, kind }
                if matches!(kind, VarKind::StoreVar | VarKind::Local)
                    && constants.contains_key(id) =>
            {
                constants[id].clone().retyped(mt.ty.clone())
            }
            _ => map_term(mt, &mut |c| inline(c, constants)),
        }
    }

    let names: Vec<Ident> = constants.keys().cloned().collect();
    let mut model = map_mterm_model(model, &mut |_ctx, top| inline(top, &constants));
    model
        .decls
        .retain(|d| !matches!(d, Decl::Var(v) if names.contains(&v.name)));
    model
        .storage
        .retain(|s| !names.contains(&s.id));
    model
}

/// Fold literal storage defaults in declaration order, each item's value
/// feeding the environment of the items after it.
pub fn eval_storage(model: Model) -> Model {
    let mut model = model;
    let mut env: HashMap<Ident, Mterm> = HashMap::new();
    for item in &mut model.storage {
        let value = eval(&env, &item.default);
        env.insert(item.id.clone(), value.clone());
        item.default = value;
    }
    model
}

/// Constant-fold variable defaults, threading previously evaluated
/// declarations.
pub fn eval_variable_initial_value(model: Model) -> Model {
    let mut model = model;
    let mut env: HashMap<Ident, Mterm> = HashMap::new();
    for decl in &mut model.decls {
        let Decl::Var(v) = decl else { continue };
        if let Some(default) = &v.default {
            let value = eval(&env, default);
            env.insert(v.name.clone(), value.clone());
            v.default = Some(value);
        }
    }
    for param in &mut model.parameters {
        if let Some(default) = &param.default {
            param.default = Some(eval(&env, default));
        }
    }
    model
}

/// Canonicalise literal containers in storage: sets and maps sorted by
/// key, and internal variable references replaced by their own defaults.
pub fn normalize_storage(model: Model) -> Model {
    let mut model = model;

    let defaults: HashMap<Ident, Mterm> = model
        .storage
        .iter()
        .map(|s| (s.id.clone(), s.default.clone()))
        .collect();

    fn subst_and_sort(mt: &Mterm, defaults: &HashMap<Ident, Mterm>) -> Mterm {
        let mt = match &mt.node {
            MtermNode::Var { id, kind }
                if matches!(kind, VarKind::StoreVar) && defaults.contains_key(id) =>
            {
                defaults[id].clone().retyped(mt.ty.clone())
            }
            _ => map_term(mt, &mut |c| subst_and_sort(c, defaults)),
        };
        sort_container(&mt)
    }

    for item in &mut model.storage {
        item.default = subst_and_sort(&item.default, &defaults);
    }
    model
}

/// Order literal set elements and map entries by key.
pub fn sort_container(mt: &Mterm) -> Mterm {
    match &mt.node {
        MtermNode::Litset(xs) => {
            let mut xs = xs.clone();
            xs.sort();
            mt.with_node(MtermNode::Litset(xs))
        }
        MtermNode::Litmap(mk, kvs) => {
            let mut kvs = kvs.clone();
            kvs.sort_by(|(a, _), (b, _)| a.cmp(b));
            mt.with_node(MtermNode::Litmap(*mk, kvs))
        }
        _ => mt.clone(),
    }
}

/// Contract parameters become storage slots with their deployment value.
pub fn process_parameter(model: Model, bag: &mut DiagnosticBag) -> Model {
    let mut model = model;
    let mut items = Vec::new();
    for param in &model.parameters {
        let default = param.value.clone().or_else(|| param.default.clone());
        let Some(default) = default else {
            let kind = if param.constant {
                ErrorKind::NoInitValueForConstParam(param.name.clone())
            } else {
                ErrorKind::NoInitValueForParameter(param.name.clone())
            };
            bag.error(param.loc, kind);
            continue;
        };
        items.push(StorageItem {
            id: param.name.clone(),
            model_type: if param.constant {
                StorageModelType::Const
            } else {
                StorageModelType::Var
            },
            typ: param.typ.clone(),
            default,
            ghost: false,
            loc: param.loc,
        });
    }
    // Parameters precede declared storage on chain.
    items.append(&mut model.storage);
    model.storage = items;
    model
}

fn hex_of_utf8(s: &str) -> String {
    s.bytes().map(|b| format!("{b:02x}")).collect()
}

/// Choose the `%metadata` slot: an off-chain URI, embedded JSON under
/// the `here` pointer, or a parameter-driven value.
pub fn process_metadata(model: Model, options: &Options, bag: &mut DiagnosticBag) -> Model {
    let mut model = model;

    let content: Option<Mterm> = if let Some(json) = &options.metadata_storage {
        // Embedded metadata must at least parse.
        if serde_json::from_str::<serde_json::Value>(json).is_err() {
            bag.error(model.loc, ErrorKind::InvalidInitValue);
            None
        } else {
            let kvs = vec![
                (
                    Mterm::string("", model.loc),
                    Mterm::new(
                        MtermNode::Bytes(hex_of_utf8("tezos-storage:here")),
                        Type::bytes(),
                        model.loc,
                    ),
                ),
                (
                    Mterm::string("here", model.loc),
                    Mterm::new(
                        MtermNode::Bytes(hex_of_utf8(json)),
                        Type::bytes(),
                        model.loc,
                    ),
                ),
            ];
            model.metadata = Some(archetype_model::decl::Metadata::Json(json.clone()));
            Some(Mterm::new(
                MtermNode::Litmap(MapKind::BigMap, kvs),
                Type::big_map(Type::string(), Type::bytes()),
                model.loc,
            ))
        }
    } else if let Some(uri) = &options.metadata_uri {
        model.metadata = Some(archetype_model::decl::Metadata::Uri(uri.clone()));
        Some(Mterm::new(
            MtermNode::Litmap(
                MapKind::BigMap,
                vec![(
                    Mterm::string("", model.loc),
                    Mterm::new(
                        MtermNode::Bytes(hex_of_utf8(uri)),
                        Type::bytes(),
                        model.loc,
                    ),
                )],
            ),
            Type::big_map(Type::string(), Type::bytes()),
            model.loc,
        ))
    } else if options.with_metadata {
        // Parameter-driven: an empty slot filled at deployment.
        Some(Mterm::new(
            MtermNode::Litmap(MapKind::BigMap, vec![]),
            Type::big_map(Type::string(), Type::bytes()),
            model.loc,
        ))
    } else {
        None
    };

    if let Some(default) = content {
        model.storage.push(StorageItem {
            id: "metadata".into(),
            model_type: StorageModelType::Var,
            typ: Type::big_map(Type::string(), Type::bytes())
                .with_annotation("%metadata"),
            default,
            ghost: false,
            loc: model.loc,
        });
    }
    model
}

#[cfg(test)]
mod tests {
    use super::*;
    use archetype_model::decl::VarDecl;
    use archetype_model::function::{Function, FunctionStruct};
    use archetype_model::Span;

    fn sp() -> Span {
        Span::zero(0)
    }

    fn item(id: &str, typ: Type, default: Mterm) -> StorageItem {
        StorageItem {
            id: id.into(),
            model_type: StorageModelType::Var,
            typ,
            default,
            ghost: false,
            loc: sp(),
        }
    }

    fn entry(name: &str, body: Mterm) -> Function {
        Function {
            kind: FunctionKind::Entry,
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
    fn test_single_slot_reads_become_local() {
        let mut model = Model::new("m", sp());
        model
            .storage
            .push(item("counter", Type::nat(), Mterm::nat(0, sp())));
        model.functions.push(entry(
            "bump",
            Mterm::storage_var("counter", Type::nat(), sp()),
        ));
        let model = process_single_field_storage(model);
        match &model.functions[0].fs.body.node {
            MtermNode::Var { id, kind } => {
                assert_eq!(id, "_s");
                assert_eq!(*kind, VarKind::Local);
            }
            other => panic!("expected renamed var, got {other:?}"),
        }
    }

    #[test]
    fn test_view_gets_storage_parameter() {
        let mut model = Model::new("m", sp());
        model
            .storage
            .push(item("total", Type::nat(), Mterm::nat(0, sp())));
        model.functions.push(Function {
            kind: FunctionKind::View(
                Type::nat(),
                archetype_model::function::ViewVisibility::OnChain,
            ),
            fs: FunctionStruct {
                name: "read_total".into(),
                args: vec![],
                eargs: vec![],
                body: Mterm::new(
                    MtermNode::Return(Box::new(Mterm::storage_var(
                        "total",
                        Type::nat(),
                        sp(),
                    ))),
                    Type::unit(),
                    sp(),
                ),
                stovars: vec![],
                spec: None,
                loc: sp(),
            },
        });
        model.functions.push(entry(
            "caller_fn",
            Mterm::new(
                MtermNode::App {
                    id: "read_total".into(),
                    args: vec![],
                },
                Type::nat(),
                sp(),
            ),
        ));

        let model = remove_storage_field_in_function(model);
        let view = model.find_function("read_total").unwrap();
        assert_eq!(view.fs.args.len(), 1);
        assert_eq!(view.fs.args[0].name, "total");
        // The body reads the parameter, not storage.
        fold_term_rec(&view.fs.body, (), &mut |(), mt| {
            if let MtermNode::Var { id, kind } = &mt.node {
                if id == "total" {
                    assert_eq!(*kind, VarKind::Param);
                }
            }
        });
        // The call site passes the slot.
        let caller = model.find_function("caller_fn").unwrap();
        match &caller.fs.body.node {
            MtermNode::App { args, .. } => assert_eq!(args.len(), 1),
            other => panic!("expected App, got {other:?}"),
        }
    }

    #[test]
    fn test_constants_are_inlined_and_dropped() {
        let mut model = Model::new("m", sp());
        model.decls.push(Decl::Var(VarDecl {
            name: "fee".into(),
            typ: Type::nat(),
            default: Some(Mterm::nat(25, sp())),
            kind: VariableKind::Constant,
            invariants: vec![],
            loc: sp(),
        }));
        model
            .storage
            .push(item("fee", Type::nat(), Mterm::nat(25, sp())));
        model.functions.push(entry(
            "pay",
            Mterm::storage_var("fee", Type::nat(), sp()),
        ));

        let model = remove_constant(model);
        assert!(model.decls.is_empty());
        assert!(model.storage.is_empty());
        assert_eq!(
            model.functions[0].fs.body.node,
            MtermNode::Nat(25.into())
        );
    }

    #[test]
    fn test_eval_storage_threads_environment() {
        let mut model = Model::new("m", sp());
        model
            .storage
            .push(item("base", Type::nat(), Mterm::nat(10, sp())));
        let double = Mterm::new(
            MtermNode::Mult(
                Box::new(Mterm::var("base", Type::nat(), sp())),
                Box::new(Mterm::nat(2, sp())),
            ),
            Type::nat(),
            sp(),
        );
        model.storage.push(item("cap", Type::nat(), double));

        let model = eval_storage(model);
        assert_eq!(model.storage[1].default.node, MtermNode::Nat(20.into()));
    }

    #[test]
    fn test_normalize_storage_sorts_literals() {
        let mut model = Model::new("m", sp());
        let set = Mterm::new(
            MtermNode::Litset(vec![
                Mterm::nat(3, sp()),
                Mterm::nat(1, sp()),
                Mterm::nat(2, sp()),
            ]),
            Type::set(Type::nat()),
            sp(),
        );
        model.storage.push(item("s", Type::set(Type::nat()), set));

        let model = normalize_storage(model);
        match &model.storage[0].default.node {
            MtermNode::Litset(xs) => {
                let got: Vec<_> = xs.iter().map(|x| x.node.clone()).collect();
                assert_eq!(
                    got,
                    vec![
                        MtermNode::Nat(1.into()),
                        MtermNode::Nat(2.into()),
                        MtermNode::Nat(3.into())
                    ]
                );
            }
            other => panic!("expected Litset, got {other:?}"),
        }
    }

    #[test]
    fn test_parameter_without_value_is_rejected() {
        use archetype_model::decl::Parameter;
        let mut model = Model::new("m", sp());
        model.parameters.push(Parameter {
            name: "owner".into(),
            typ: Type::address(),
            default: None,
            value: None,
            constant: true,
            loc: sp(),
        });
        let mut bag = DiagnosticBag::new();
        let _ = process_parameter(model, &mut bag);
        assert!(matches!(
            bag.diagnostics()[0].kind,
            ErrorKind::NoInitValueForConstParam(_)
        ));
    }

    #[test]
    fn test_metadata_uri_fills_the_slot() {
        let model = Model::new("m", sp());
        let options = Options {
            metadata_uri: Some("ipfs://QmHash".into()),
            ..Default::default()
        };
        let mut bag = DiagnosticBag::new();
        let model = process_metadata(model, &options, &mut bag);
        let slot = model.storage.iter().find(|s| s.id == "metadata").unwrap();
        assert_eq!(slot.typ.annotation.as_deref(), Some("%metadata"));
        match &slot.default.node {
            MtermNode::Litmap(MapKind::BigMap, kvs) => {
                assert_eq!(kvs.len(), 1);
                assert_eq!(kvs[0].0.node, MtermNode::String("".into()));
            }
            other => panic!("expected Litmap, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_metadata_json_is_rejected() {
        let model = Model::new("m", sp());
        let options = Options {
            metadata_storage: Some("{not json".into()),
            ..Default::default()
        };
        let mut bag = DiagnosticBag::new();
        let _ = process_metadata(model, &options, &mut bag);
        assert!(bag.has_errors());
    }
}
