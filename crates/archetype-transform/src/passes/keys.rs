//! Key handling: multi-key flattening, literal key/value
//! splitting, deterministic ordering for positional reads and explicit
//! containment guards.

use archetype_model::decl::{AssetField, Decl, RecordDecl, RecordField, StorageModelType};
use archetype_model::model::Model;
use archetype_model::term::{CollectionKind, FailType, Mterm, MtermNode, SortDirection};
use archetype_model::utils::extract_key_value_from_masset;
use archetype_model::walk::{fold_term_rec, map_mterm_model, map_term};
use archetype_model::{Ident, Type};

/// One flattened multi-key asset.
struct FlatKey {
    asset: Ident,
    synthetic: Ident,
    /// Original key fields, in key order
    members: Vec<Ident>,
    tuple_ty: Type,
}

/// Flatten assets with two or more primary keys to a synthetic tuple
/// key; member-key reads become tuple accesses.
pub fn process_multi_keys(model: Model) -> Model {
    let mut model = model;
    let mut flats: Vec<FlatKey> = Vec::new();

    for decl in &model.decls {
        let Decl::Asset(a) = decl else { continue };
        if a.keys.len() < 2 {
            continue;
        }
        let tuple_ty = Type::tuple(
            a.keys
                .iter()
                .map(|k| a.field(k).expect("key field").typ.clone())
                .collect(),
        );
        flats.push(FlatKey {
            asset: a.name.clone(),
            synthetic: format!("_{}_key", a.name),
            members: a.keys.clone(),
            tuple_ty,
        });
    }
    if flats.is_empty() {
        return model;
    }

    for decl in &mut model.decls {
        let Decl::Asset(a) = decl else { continue };
        let Some(flat) = flats.iter().find(|f| f.asset == a.name) else {
            continue;
        };
        let mut fields = vec![AssetField {
            name: flat.synthetic.clone(),
            original_type: flat.tuple_ty.clone(),
            typ: flat.tuple_ty.clone(),
            default: None,
            shadow: false,
            loc: a.loc,
        }];
        fields.extend(
            a.fields
                .iter()
                .filter(|f| !a.keys.contains(&f.name))
                .cloned(),
        );
        // Initial values follow the new field order.
        let members = flat.members.clone();
        let old_fields: Vec<Ident> = a.fields.iter().map(|f| f.name.clone()).collect();
        for init in &mut a.init {
            if let MtermNode::Asset(values) = &mut init.node {
                let key_parts: Vec<Mterm> = members
                    .iter()
                    .map(|m| {
                        let pos = old_fields.iter().position(|f| f == m).expect("key field");
                        values[pos].clone()
                    })
                    .collect();
                let mut reordered = vec![Mterm::new(
                    MtermNode::Tuple(key_parts.clone()),
                    flat.tuple_ty.clone(),
                    init.span,
                )];
                for (name, value) in old_fields.iter().zip(values.iter()) {
                    if !members.contains(name) {
                        reordered.push(value.clone());
                    }
                }
                *values = reordered;
            }
        }
        a.fields = fields;
        a.keys = vec![flat.synthetic.clone()];
    }

    map_mterm_model(model, &mut |_ctx, top| flatten_key_reads(top, &flats))
}

fn flatten_key_reads(mt: &Mterm, flats: &[FlatKey]) -> Mterm {
    let mt = map_term(mt, &mut |c| flatten_key_reads(c, flats));
    match &mt.node {
        // `a.owner` where `owner` is a member key reads a slot of the
        // flattened key.
        MtermNode::Dot { expr, field } => {
            let Some(flat) = expr
                .ty
                .asset_name()
                .and_then(|an| flats.iter().find(|f| f.asset == *an))
            else {
                return mt;
            };
            let Some(idx) = flat.members.iter().position(|m| m == field) else {
                return mt;
            };
            let key_read = Mterm::new(
                MtermNode::Dot {
                    expr: expr.clone(),
                    field: flat.synthetic.clone(),
                },
                flat.tuple_ty.clone(),
                mt.span,
            );
            mt.with_node(MtermNode::Tupleaccess {
                x: Box::new(key_read),
                index: idx as u32,
            })
        }
        // `A[k].owner` is a component of `k` itself.
        MtermNode::Dotassetfield { asset, key, field } => {
            let Some(flat) = flats.iter().find(|f| f.asset == *asset) else {
                return mt;
            };
            let Some(idx) = flat.members.iter().position(|m| m == field) else {
                return mt;
            };
            mt.with_node(MtermNode::Tupleaccess {
                x: key.clone(),
                index: idx as u32,
            })
        }
        _ => mt,
    }
}

/// Replace literal asset collections in storage by key-indexed literal
/// maps (or key sets), and turn multi-field asset declarations into the
/// value records the back-end will emit.
pub fn split_key_values(model: Model) -> Model {
    let mut model = model;
    let symbols = model.clone();

    for item in &mut model.storage {
        let StorageModelType::Asset(an) = &item.model_type else {
            continue;
        };
        let an = an.clone();
        let decl = symbols.get_asset(&an);
        let MtermNode::Assets(inits) = &item.default.node else {
            continue;
        };
        let span = item.default.span;
        let value_fields: Vec<&AssetField> = decl.value_fields().collect();

        if value_fields.is_empty() {
            let keys = inits
                .iter()
                .map(|lit| extract_key_value_from_masset(&symbols, &an, lit))
                .collect();
            item.default = Mterm::new(MtermNode::Litset(keys), item.typ.clone(), span);
            continue;
        }

        let mk = decl.map_kind;
        let kvs = inits
            .iter()
            .map(|lit| {
                let key = extract_key_value_from_masset(&symbols, &an, lit);
                let value = literal_value(decl, &value_fields, lit);
                (key, value)
            })
            .collect();
        item.default = Mterm::new(MtermNode::Litmap(mk, kvs), item.typ.clone(), span);
    }

    // Multi-field assets leave a record declaration behind; the rest
    // disappear entirely.
    let mut decls = Vec::with_capacity(model.decls.len());
    for decl in model.decls {
        match decl {
            Decl::Asset(a) => {
                let value_fields: Vec<&AssetField> = a.value_fields().collect();
                if value_fields.len() >= 2 {
                    decls.push(Decl::Record(RecordDecl {
                        name: a.name.clone(),
                        fields: value_fields
                            .iter()
                            .map(|f| RecordField {
                                name: f.name.clone(),
                                typ: f.typ.clone(),
                                loc: f.loc,
                            })
                            .collect(),
                        loc: a.loc,
                    }));
                }
            }
            other => decls.push(other),
        }
    }
    model.decls = decls;
    model
}

fn literal_value(
    decl: &archetype_model::decl::AssetDecl,
    value_fields: &[&AssetField],
    lit: &Mterm,
) -> Mterm {
    let MtermNode::Asset(values) = &lit.node else {
        panic!("expected a literal asset for {}", decl.name)
    };
    let field_value = |name: &str| {
        let pos = decl.field_position(name).expect("field position");
        values[pos].clone()
    };
    match value_fields {
        [single] => field_value(&single.name),
        several => {
            let fields: Vec<(Ident, Mterm)> = several
                .iter()
                .map(|f| (f.name.clone(), field_value(&f.name)))
                .collect();
            Mterm::new(
                MtermNode::Litrecord(fields),
                Type::record(decl.name.clone()),
                lit.span,
            )
        }
    }
}

/// `nth` yields a key; where the caller expected the record, fetch it.
pub fn change_type_of_nth(model: Model) -> Model {
    let symbols = model.clone();
    map_mterm_model(model, &mut |_ctx, top| retype_nth(&symbols, top))
}

fn retype_nth(model: &Model, mt: &Mterm) -> Mterm {
    let mt = map_term(mt, &mut |c| retype_nth(model, c));
    let MtermNode::Nth {
        asset,
        container,
        index,
    } = &mt.node
    else {
        return mt;
    };
    if !mt.ty.is_asset() {
        return mt;
    }
    let (_, key_ty) = model.get_asset_key(asset);
    let nth = Mterm::new(
        MtermNode::Nth {
            asset: asset.clone(),
            container: container.clone(),
            index: index.clone(),
        },
        key_ty,
        mt.span,
    );
    Mterm::new(
        MtermNode::Get {
            asset: asset.clone(),
            container: CollectionKind::Coll,
            key: Box::new(nth),
        },
        mt.ty.clone(),
        mt.span,
    )
}

/// Positional reads on an implicit collection go through an explicit
/// ascending sort on the primary key, so traversal order is fixed.
pub fn add_explicit_sort(model: Model) -> Model {
    let symbols = model.clone();
    map_mterm_model(model, &mut |_ctx, top| explicit_sort(&symbols, top))
}

fn explicit_sort(model: &Model, mt: &Mterm) -> Mterm {
    let mt = map_term(mt, &mut |c| explicit_sort(model, c));
    let (asset, container) = match &mt.node {
        MtermNode::Nth {
            asset, container, ..
        }
        | MtermNode::Head {
            asset, container, ..
        }
        | MtermNode::Tail {
            asset, container, ..
        } => (asset.clone(), container.clone()),
        _ => return mt,
    };
    if matches!(container, CollectionKind::View(_)) {
        return mt;
    }
    let (key_id, _) = model.get_asset_key(&asset);
    let sorted = Mterm::new(
        MtermNode::Sort {
            asset: asset.clone(),
            container,
            criteria: vec![(key_id, SortDirection::Asc)],
        },
        Type::container(
            Type::asset(asset),
            archetype_model::types::ContainerIntent::View,
        ),
        mt.span,
    );
    let view = CollectionKind::View(Box::new(sorted));
    let node = match mt.node.clone() {
        MtermNode::Nth { asset, index, .. } => MtermNode::Nth {
            asset,
            container: view,
            index,
        },
        MtermNode::Head { asset, count, .. } => MtermNode::Head {
            asset,
            container: view,
            count,
        },
        MtermNode::Tail { asset, count, .. } => MtermNode::Tail {
            asset,
            container: view,
            count,
        },
        _ => unreachable!(),
    };
    mt.with_node(node)
}

/// Guard every unguarded `get` with an explicit containment check,
/// tracking the facts gained along `if contains(…)` true branches.
pub fn add_contain_on_get(model: Model) -> Model {
    map_mterm_model(model, &mut |ctx, top| {
        if ctx.function.is_none() {
            return top.clone();
        }
        let mut facts: Vec<(Ident, Mterm)> = Vec::new();
        guard_instr(top, &mut facts)
    })
}

fn collect_unguarded_gets(mt: &Mterm, facts: &[(Ident, Mterm)], out: &mut Vec<(Ident, Mterm)>) {
    fold_term_rec(mt, (), &mut |(), t| {
        if let MtermNode::Get {
            asset,
            container: CollectionKind::Coll,
            key,
        } = &t.node
        {
            let known = facts
                .iter()
                .chain(out.iter())
                .any(|(a, k)| a == asset && k == key.as_ref());
            if !known {
                out.push((asset.clone(), (**key).clone()));
            }
        }
    });
}

fn guards_for(gets: &[(Ident, Mterm)], span: archetype_model::Span) -> Vec<Mterm> {
    gets.iter()
        .map(|(asset, key)| {
            let contains = Mterm::new(
                MtermNode::Contains {
                    asset: asset.clone(),
                    container: CollectionKind::Coll,
                    key: Box::new(key.clone()),
                },
                Type::bool(),
                span,
            );
            let not = Mterm::new(MtermNode::Not(Box::new(contains)), Type::bool(), span);
            Mterm::if_(
                not,
                Mterm::fail(FailType::NotFound, span),
                None,
                span,
            )
        })
        .collect()
}

fn guard_instr(mt: &Mterm, facts: &mut Vec<(Ident, Mterm)>) -> Mterm {
    match &mt.node {
        MtermNode::Seq(instrs) => {
            let out: Vec<Mterm> = instrs.iter().map(|i| guard_instr(i, facts)).collect();
            Mterm::new(MtermNode::Seq(out), mt.ty.clone(), mt.span)
        }
        MtermNode::If { cond, then, els } => {
            let mut gets = Vec::new();
            collect_unguarded_gets(cond, facts, &mut gets);
            let mut guards = guards_for(&gets, mt.span);
            facts.extend(gets);

            // A proven containment holds along the true branch.
            let mut then_facts = facts.clone();
            if let MtermNode::Contains {
                asset,
                container: CollectionKind::Coll,
                key,
            } = &cond.node
            {
                then_facts.push((asset.clone(), (**key).clone()));
            }
            let then = guard_instr(then, &mut then_facts);
            let els = els.as_ref().map(|e| guard_instr(e, &mut facts.clone()));
            let guarded_if = Mterm::new(
                MtermNode::If {
                    cond: cond.clone(),
                    then: Box::new(then),
                    els: els.map(Box::new),
                },
                mt.ty.clone(),
                mt.span,
            );
            if guards.is_empty() {
                guarded_if
            } else {
                guards.push(guarded_if);
                Mterm::seq(guards, mt.span)
            }
        }
        MtermNode::For { .. } | MtermNode::While { .. } | MtermNode::Iter { .. } => {
            // Loop bodies re-establish their own facts each iteration.
            map_term(mt, &mut |c| guard_instr(c, &mut facts.clone()))
        }
        MtermNode::Letin { ids, value, body } => {
            let mut gets = Vec::new();
            collect_unguarded_gets(value, facts, &mut gets);
            let mut guards = guards_for(&gets, mt.span);
            facts.extend(gets);
            let body = guard_instr(body, facts);
            let bound = Mterm::new(
                MtermNode::Letin {
                    ids: ids.clone(),
                    value: value.clone(),
                    body: Box::new(body),
                },
                mt.ty.clone(),
                mt.span,
            );
            if guards.is_empty() {
                bound
            } else {
                guards.push(bound);
                Mterm::seq(guards, mt.span)
            }
        }
        _ if mt.is_instruction() => {
            let mut gets = Vec::new();
            collect_unguarded_gets(mt, facts, &mut gets);
            let mut guards = guards_for(&gets, mt.span);
            facts.extend(gets);
            if guards.is_empty() {
                mt.clone()
            } else {
                guards.push(mt.clone());
                Mterm::seq(guards, mt.span)
            }
        }
        _ => mt.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use archetype_model::decl::{AssetDecl, StorageItem};
    use archetype_model::types::{MapKind, TypeNode};
    use archetype_model::function::{Function, FunctionKind, FunctionStruct};
    use archetype_model::Span;

    fn sp() -> Span {
        Span::zero(0)
    }

    fn field(name: &str, typ: Type) -> AssetField {
        AssetField {
            name: name.into(),
            original_type: typ.clone(),
            typ,
            default: None,
            shadow: false,
            loc: sp(),
        }
    }

    fn allowance_model() -> Model {
        let mut m = Model::new("fa12", sp());
        m.decls.push(Decl::Asset(AssetDecl {
            name: "allowance".into(),
            keys: vec!["owner".into(), "spender".into()],
            sort: vec![],
            fields: vec![
                field("owner", Type::address()),
                field("spender", Type::address()),
                field("amount", Type::nat()),
            ],
            init: vec![],
            invariants: vec![],
            state: None,
            map_kind: MapKind::BigMap,
            loc: sp(),
        }));
        m
    }

    fn with_body(mut model: Model, body: Mterm) -> Model {
        model.functions.push(Function {
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
        model
    }

    fn body_of(model: &Model) -> &Mterm {
        &model.functions[0].fs.body
    }

    #[test]
    fn test_multi_key_asset_is_flattened() {
        let model = process_multi_keys(allowance_model());
        let asset = model.get_asset("allowance");
        assert_eq!(asset.keys, vec!["_allowance_key".to_string()]);
        assert_eq!(asset.fields[0].name, "_allowance_key");
        assert_eq!(
            asset.fields[0].typ,
            Type::tuple(vec![Type::address(), Type::address()])
        );
        // Member key fields are folded away.
        assert!(asset.field("owner").is_none());
        assert!(asset.field("amount").is_some());
    }

    #[test]
    fn test_member_key_read_becomes_tuple_access() {
        let the = Mterm::var("the", Type::asset("allowance"), sp());
        let body = Mterm::new(
            MtermNode::Dot {
                expr: Box::new(the),
                field: "spender".into(),
            },
            Type::address(),
            sp(),
        );
        let model = process_multi_keys(with_body(allowance_model(), body));
        match &body_of(&model).node {
            MtermNode::Tupleaccess { x, index } => {
                assert_eq!(*index, 1);
                assert!(matches!(x.node, MtermNode::Dot { .. }));
            }
            other => panic!("expected Tupleaccess, got {other:?}"),
        }
    }

    #[test]
    fn test_split_key_values_builds_literal_map() {
        let mut model = allowance_model();
        let lit = |o: &str, s: &str, v: i32| {
            Mterm::new(
                MtermNode::Asset(vec![
                    Mterm::new(MtermNode::Address(o.into()), Type::address(), sp()),
                    Mterm::new(MtermNode::Address(s.into()), Type::address(), sp()),
                    Mterm::nat(v, sp()),
                ]),
                Type::asset("allowance"),
                sp(),
            )
        };
        model.storage.push(StorageItem {
            id: "allowance".into(),
            model_type: StorageModelType::Asset("allowance".into()),
            typ: Type::big_map(
                Type::tuple(vec![Type::address(), Type::address()]),
                Type::nat(),
            ),
            default: Mterm::new(
                MtermNode::Assets(vec![lit("tz1a", "tz1b", 5)]),
                Type::container(
                    Type::asset("allowance"),
                    archetype_model::types::ContainerIntent::Collection,
                ),
                sp(),
            ),
            ghost: false,
            loc: sp(),
        });

        let model = split_key_values(model);
        let item = &model.storage[0];
        match &item.default.node {
            MtermNode::Litmap(MapKind::BigMap, kvs) => {
                assert_eq!(kvs.len(), 1);
                // single value field: the value is the bare nat
                assert_eq!(kvs[0].1.node, MtermNode::Nat(5.into()));
            }
            other => panic!("expected Litmap, got {other:?}"),
        }
        // The single-value asset leaves no record decl behind.
        assert!(model.decls.is_empty());
    }

    #[test]
    fn test_nth_expecting_record_gets_wrapped() {
        let body = Mterm::new(
            MtermNode::Nth {
                asset: "allowance".into(),
                container: CollectionKind::Coll,
                index: Box::new(Mterm::nat(0, sp())),
            },
            Type::asset("allowance"),
            sp(),
        );
        let model = change_type_of_nth(with_body(allowance_model(), body));
        match &body_of(&model).node {
            MtermNode::Get { key, .. } => match &key.node {
                MtermNode::Nth { .. } => {}
                other => panic!("expected Nth key, got {other:?}"),
            },
            other => panic!("expected Get, got {other:?}"),
        }
    }

    #[test]
    fn test_nth_on_collection_gets_explicit_sort() {
        let body = Mterm::new(
            MtermNode::Nth {
                asset: "allowance".into(),
                container: CollectionKind::Coll,
                index: Box::new(Mterm::nat(0, sp())),
            },
            Type::tuple(vec![Type::address(), Type::address()]),
            sp(),
        );
        let model = add_explicit_sort(with_body(allowance_model(), body));
        match &body_of(&model).node {
            MtermNode::Nth { container, .. } => match container {
                CollectionKind::View(v) => match &v.node {
                    MtermNode::Sort { criteria, .. } => {
                        assert_eq!(criteria[0].1, SortDirection::Asc);
                    }
                    other => panic!("expected Sort, got {other:?}"),
                },
                other => panic!("expected View, got {other:?}"),
            },
            other => panic!("expected Nth, got {other:?}"),
        }
    }

    #[test]
    fn test_unguarded_get_is_guarded_once() {
        let get = Mterm::new(
            MtermNode::Get {
                asset: "allowance".into(),
                container: CollectionKind::Coll,
                key: Box::new(Mterm::var(
                    "k",
                    Type::tuple(vec![Type::address(), Type::address()]),
                    sp(),
                )),
            },
            Type::asset("allowance"),
            sp(),
        );
        let assign = Mterm::new(
            MtermNode::Assign {
                op: archetype_model::term::AssignOp::Assign,
                typ: Type::asset("allowance"),
                kind: archetype_model::term::AssignKind::Var(
                    "x".into(),
                    archetype_model::term::VarKind::Local,
                ),
                value: Box::new(get),
            },
            Type::unit(),
            sp(),
        );
        let model = add_contain_on_get(with_body(allowance_model(), assign));
        match &body_of(&model).node {
            MtermNode::Seq(instrs) => {
                assert_eq!(instrs.len(), 2);
                match &instrs[0].node {
                    MtermNode::If { cond, then, .. } => {
                        assert!(matches!(cond.node, MtermNode::Not(_)));
                        assert!(matches!(then.node, MtermNode::Fail(FailType::NotFound)));
                    }
                    other => panic!("expected guard, got {other:?}"),
                }
            }
            other => panic!("expected Seq, got {other:?}"),
        }
    }

    #[test]
    fn test_guarded_get_is_not_reguarded() {
        let key = Mterm::var(
            "k",
            Type::tuple(vec![Type::address(), Type::address()]),
            sp(),
        );
        let get = Mterm::new(
            MtermNode::Get {
                asset: "allowance".into(),
                container: CollectionKind::Coll,
                key: Box::new(key.clone()),
            },
            Type::asset("allowance"),
            sp(),
        );
        let contains = Mterm::new(
            MtermNode::Contains {
                asset: "allowance".into(),
                container: CollectionKind::Coll,
                key: Box::new(key),
            },
            Type::bool(),
            sp(),
        );
        let assign = Mterm::new(
            MtermNode::Assign {
                op: archetype_model::term::AssignOp::Assign,
                typ: Type::asset("allowance"),
                kind: archetype_model::term::AssignKind::Var(
                    "x".into(),
                    archetype_model::term::VarKind::Local,
                ),
                value: Box::new(get),
            },
            Type::unit(),
            sp(),
        );
        let body = Mterm::if_(contains, assign, None, sp());
        let model = add_contain_on_get(with_body(allowance_model(), body));
        // No guard sequence appears: the containment fact covers the get.
        assert!(matches!(body_of(&model).node, MtermNode::If { .. }));
    }
}
