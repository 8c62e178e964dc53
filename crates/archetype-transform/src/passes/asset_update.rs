//! High-level asset method lowering.
//!
//! `add_update`, container-field updates, field assignments and the
//! `update` instruction itself are rewritten into the smaller surface
//! asset lowering consumes: `add`, `add_field`, `remove_field`, `get`,
//! `set` and record updates.

use archetype_model::decl::AssetDecl;
use archetype_model::model::Model;
use archetype_model::term::{
    AssignKind, AssignOp, CollectionKind, FieldUpdate, ForIdent, IterKind, Mterm, MtermNode,
};
use archetype_model::types::TypeNode;
use archetype_model::utils::NameGen;
use archetype_model::walk::{map_mterm_model, map_term, Context};
use archetype_model::Type;

use crate::error::{DiagnosticBag, ErrorKind};

/// Component of the (possibly flattened) primary key for a given field.
fn key_component(model: &Model, decl: &AssetDecl, key: &Mterm, field: &str) -> Mterm {
    if decl.keys.len() == 1 {
        return key.clone();
    }
    let pos = decl
        .keys
        .iter()
        .position(|k| k == field)
        .expect("key_component on a non-key field");
    let (_, key_ty) = model.get_asset_key(&decl.name);
    let slot_ty = key_ty
        .as_tuple()
        .map(|ts| ts[pos].clone())
        .unwrap_or_else(Type::unit);
    Mterm::new(
        MtermNode::Tupleaccess {
            x: Box::new(key.clone()),
            index: pos as u32,
        },
        slot_ty,
        key.span,
    )
}

/// Build the literal asset record an `add` branch inserts: keys from the
/// key term, updated fields from the update list, everything else from
/// its declared default.
fn build_asset_record(
    model: &Model,
    decl: &AssetDecl,
    key: &Mterm,
    updates: &[FieldUpdate],
    bag: &mut DiagnosticBag,
) -> Mterm {
    let mut values = Vec::with_capacity(decl.fields.len());
    for field in decl.fields.iter().filter(|f| !f.shadow) {
        if decl.is_key(&field.name) {
            values.push(key_component(model, decl, key, &field.name));
            continue;
        }
        let update = updates.iter().find(|(f, _, _)| *f == field.name);
        let value = match (update, &field.default) {
            (Some((_, AssignOp::Assign, v)), _) => v.clone(),
            (Some((_, op, v)), Some(default)) => {
                apply_op(*op, default.clone(), v.clone(), field.typ.clone())
            }
            (Some((_, _, v)), None) => {
                bag.error(
                    v.span,
                    ErrorKind::CannotBuildAsset(decl.name.clone(), field.name.clone()),
                );
                v.clone()
            }
            (None, Some(default)) => default.clone(),
            (None, None) => {
                bag.error(
                    key.span,
                    ErrorKind::CannotBuildAsset(decl.name.clone(), field.name.clone()),
                );
                Mterm::unit(key.span)
            }
        };
        values.push(value);
    }
    Mterm::new(
        MtermNode::Asset(values),
        Type::asset(decl.name.clone()),
        key.span,
    )
}

pub(crate) fn apply_op(op: AssignOp, current: Mterm, value: Mterm, ty: Type) -> Mterm {
    let span = value.span;
    let node = match op {
        AssignOp::Assign => return value,
        AssignOp::Plus => MtermNode::Plus(Box::new(current), Box::new(value)),
        AssignOp::Minus => MtermNode::Minus(Box::new(current), Box::new(value)),
        AssignOp::Mult => MtermNode::Mult(Box::new(current), Box::new(value)),
        AssignOp::Div => MtermNode::DivEuc(Box::new(current), Box::new(value)),
        AssignOp::And => MtermNode::And(Box::new(current), Box::new(value)),
        AssignOp::Or => MtermNode::Or(Box::new(current), Box::new(value)),
    };
    Mterm::new(node, ty, span)
}

/// Rewrite every `add_update` into a `put`, or a contains-guarded
/// `update`/`add` choice.
pub fn remove_add_update(model: Model, bag: &mut DiagnosticBag) -> Model {
    let symbols = model.clone();
    map_mterm_model(model, &mut |_ctx, top| {
        rewrite_add_update(&symbols, top, bag)
    })
}

fn rewrite_add_update(model: &Model, mt: &Mterm, bag: &mut DiagnosticBag) -> Mterm {
    let mt = map_term(mt, &mut |c| rewrite_add_update(model, c, bag));
    let MtermNode::Addupdate {
        asset,
        container,
        key,
        updates,
    } = &mt.node
    else {
        return mt;
    };
    let decl = model.get_asset(asset);
    let span = mt.span;

    // Full replacement: every stored field assigned with `:=` lets the
    // whole record be written in one `put`.
    let full_assign = matches!(container, CollectionKind::Coll)
        && updates.iter().all(|(_, op, _)| *op == AssignOp::Assign)
        && decl
            .value_fields()
            .all(|f| updates.iter().any(|(uf, _, _)| *uf == f.name));
    if full_assign {
        let record = build_asset_record(model, decl, key, updates, bag);
        return Mterm::new(
            MtermNode::Putsingleasset {
                asset: asset.clone(),
                inst: Box::new(record),
            },
            Type::unit(),
            span,
        );
    }

    let contains = Mterm::new(
        MtermNode::Contains {
            asset: asset.clone(),
            container: container.clone(),
            key: key.clone(),
        },
        Type::bool(),
        span,
    );
    let then = Mterm::new(
        MtermNode::Update {
            asset: asset.clone(),
            key: key.clone(),
            updates: updates.clone(),
        },
        Type::unit(),
        span,
    );
    let record = build_asset_record(model, decl, key, updates, bag);
    let els = match container {
        CollectionKind::Field(parent, field, pkey) => Mterm::new(
            MtermNode::Addfield {
                asset: parent.clone(),
                field: field.clone(),
                key: pkey.clone(),
                value: Box::new(record),
            },
            Type::unit(),
            span,
        ),
        _ => Mterm::new(
            MtermNode::Addasset {
                asset: asset.clone(),
                inst: Box::new(record),
            },
            Type::unit(),
            span,
        ),
    };
    let choice = Mterm::if_(contains, then, Some(els), span);

    // Through a partitioned parent the choice only makes sense for an
    // existing parent record.
    match container {
        CollectionKind::Field(parent, _, pkey) => {
            let parent_contains = Mterm::new(
                MtermNode::Contains {
                    asset: parent.clone(),
                    container: CollectionKind::Coll,
                    key: pkey.clone(),
                },
                Type::bool(),
                span,
            );
            let fail = Mterm::fail(
                archetype_model::term::FailType::AssetNotFound(parent.clone()),
                span,
            );
            Mterm::if_(parent_contains, choice, Some(fail), span)
        }
        _ => choice,
    }
}

fn is_asset_container_field(model: &Model, asset: &str, field: &str) -> bool {
    model
        .get_asset(asset)
        .field(field)
        .map(|f| matches!(f.typ.node, TypeNode::Container(..)))
        .unwrap_or(false)
}

fn is_primitive_container_field(model: &Model, asset: &str, field: &str) -> bool {
    model
        .get_asset(asset)
        .field(field)
        .map(|f| {
            matches!(
                f.typ.node,
                TypeNode::Set(_)
                    | TypeNode::List(_)
                    | TypeNode::Map(..)
                    | TypeNode::BigMap(..)
                    | TypeNode::IterableBigMap(..)
            )
        })
        .unwrap_or(false)
}

fn literal_elements(v: &Mterm) -> Vec<Mterm> {
    match &v.node {
        MtermNode::Assets(xs) | MtermNode::Litlist(xs) | MtermNode::Litset(xs) => xs.clone(),
        _ => vec![v.clone()],
    }
}

fn lower_container_update(model: &Model, mt: &Mterm) -> Mterm {
    let MtermNode::Update {
        asset,
        key,
        updates,
    } = &mt.node
    else {
        return mt.clone();
    };
    let has_container = updates
        .iter()
        .any(|(f, _, _)| is_asset_container_field(model, asset, f));
    let has_primitive = updates.iter().any(|(f, op, _)| {
        is_primitive_container_field(model, asset, f) && *op != AssignOp::Assign
    });
    if !has_container && !has_primitive {
        return mt.clone();
    }

    let span = mt.span;
    let mut scalar: Vec<FieldUpdate> = Vec::new();
    let mut instrs: Vec<Mterm> = Vec::new();

    for (field, op, value) in updates {
        if is_asset_container_field(model, asset, field) {
            match op {
                AssignOp::Assign => {
                    instrs.push(Mterm::new(
                        MtermNode::Removeall {
                            asset: asset.clone(),
                            container: CollectionKind::Field(
                                asset.clone(),
                                field.clone(),
                                key.clone(),
                            ),
                        },
                        Type::unit(),
                        span,
                    ));
                    for item in literal_elements(value) {
                        instrs.push(add_field(asset, field, key, item, span));
                    }
                }
                AssignOp::Plus => {
                    for item in literal_elements(value) {
                        instrs.push(add_field(asset, field, key, item, span));
                    }
                }
                AssignOp::Minus => {
                    for item in literal_elements(value) {
                        instrs.push(Mterm::new(
                            MtermNode::Removefield {
                                asset: asset.clone(),
                                field: field.clone(),
                                key: key.clone(),
                                value: Box::new(item),
                            },
                            Type::unit(),
                            span,
                        ));
                    }
                }
                _ => panic!("container field {asset}.{field} updated with {op:?}"),
            }
        } else if is_primitive_container_field(model, asset, field) && *op != AssignOp::Assign {
            // Fold the elements into an explicit chain over the current
            // field value; the update itself becomes a plain `:=`.
            let field_ty = model.get_asset(asset).field(field).unwrap().typ.clone();
            let current = Mterm::new(
                MtermNode::Dotassetfield {
                    asset: asset.clone(),
                    key: key.clone(),
                    field: field.clone(),
                },
                field_ty.clone(),
                span,
            );
            let chain = literal_elements(value).into_iter().fold(
                current,
                |acc, item| primitive_chain(&field_ty, *op, acc, item, span),
            );
            scalar.push((field.clone(), AssignOp::Assign, chain));
        } else {
            scalar.push((field.clone(), *op, value.clone()));
        }
    }

    let mut out = Vec::new();
    if !scalar.is_empty() {
        out.push(Mterm::new(
            MtermNode::Update {
                asset: asset.clone(),
                key: key.clone(),
                updates: scalar,
            },
            Type::unit(),
            span,
        ));
    }
    out.extend(instrs);
    Mterm::seq(out, span)
}

fn add_field(
    asset: &str,
    field: &str,
    key: &Mterm,
    item: Mterm,
    span: archetype_model::Span,
) -> Mterm {
    Mterm::new(
        MtermNode::Addfield {
            asset: asset.to_string(),
            field: field.to_string(),
            key: Box::new(key.clone()),
            value: Box::new(item),
        },
        Type::unit(),
        span,
    )
}

fn primitive_chain(
    field_ty: &Type,
    op: AssignOp,
    acc: Mterm,
    item: Mterm,
    span: archetype_model::Span,
) -> Mterm {
    let node = match (&field_ty.node, op) {
        (TypeNode::Set(elem), AssignOp::Plus) => {
            MtermNode::Setadd((**elem).clone(), Box::new(acc), Box::new(item))
        }
        (TypeNode::Set(elem), AssignOp::Minus) => {
            MtermNode::Setremove((**elem).clone(), Box::new(acc), Box::new(item))
        }
        (TypeNode::List(elem), AssignOp::Plus) => {
            MtermNode::Listprepend((**elem).clone(), Box::new(acc), Box::new(item))
        }
        (TypeNode::Map(k, v) | TypeNode::BigMap(k, v) | TypeNode::IterableBigMap(k, v), op) => {
            let mk = field_ty.as_map().map(|(mk, _, _)| mk).unwrap();
            match (op, &item.node) {
                (AssignOp::Plus, MtermNode::Tuple(kv)) if kv.len() == 2 => MtermNode::Mapput {
                    mk,
                    key_type: (**k).clone(),
                    value_type: (**v).clone(),
                    map: Box::new(acc),
                    key: Box::new(kv[0].clone()),
                    value: Box::new(kv[1].clone()),
                },
                (AssignOp::Minus, _) => MtermNode::Mapremove {
                    mk,
                    key_type: (**k).clone(),
                    value_type: (**v).clone(),
                    map: Box::new(acc),
                    key: Box::new(item),
                },
                _ => panic!("unsupported map element update"),
            }
        }
        _ => panic!("unsupported container update operator {op:?}"),
    };
    Mterm::new(node, field_ty.clone(), span)
}

/// Decompose container-field updates in executable code.
pub fn remove_container_op_in_update_exec(model: Model) -> Model {
    let symbols = model.clone();
    map_mterm_model(model, &mut |ctx: &Context, top| {
        if ctx.function.is_none() {
            return top.clone();
        }
        rewrite_container_update(&symbols, top)
    })
}

/// Decompose container-field updates in formulas and defaults.
pub fn remove_container_op_in_update(model: Model) -> Model {
    let symbols = model.clone();
    map_mterm_model(model, &mut |ctx: &Context, top| {
        if ctx.function.is_some() {
            return top.clone();
        }
        rewrite_container_update(&symbols, top)
    })
}

fn rewrite_container_update(model: &Model, mt: &Mterm) -> Mterm {
    let mt = map_term(mt, &mut |c| rewrite_container_update(model, c));
    match &mt.node {
        MtermNode::Update { .. } => lower_container_update(model, &mt),
        _ => mt,
    }
}

/// `update(…, [])` and `update_all(…, [])` are skips.
pub fn remove_empty_update(model: Model) -> Model {
    fn aux(mt: &Mterm) -> Mterm {
        let mt = map_term(mt, &mut aux);
        match &mt.node {
            MtermNode::Update { updates, .. } | MtermNode::Updateall { updates, .. }
                if updates.is_empty() =>
            {
                Mterm::skip(mt.span)
            }
            _ => mt,
        }
    }
    map_mterm_model(model, &mut |_ctx, mt| aux(mt))
}

/// Merge consecutive `update` instructions on the same asset and key.
pub fn merge_update(model: Model) -> Model {
    fn aux(mt: &Mterm) -> Mterm {
        let Mterm { node, ty, span } = map_term(mt, &mut aux);
        let MtermNode::Seq(instrs) = node else {
            return Mterm::new(node, ty, span);
        };
        let mut out: Vec<Mterm> = Vec::with_capacity(instrs.len());
        for instr in instrs {
            let merged = match (out.last_mut(), &instr.node) {
                (
                    Some(prev),
                    MtermNode::Update {
                        asset,
                        key,
                        updates,
                    },
                ) => match &mut prev.node {
                    MtermNode::Update {
                        asset: pa,
                        key: pk,
                        updates: pu,
                    } if pa == asset && (**pk) == (**key) => {
                        merge_field_updates(pu, updates);
                        true
                    }
                    _ => false,
                },
                _ => false,
            };
            if !merged {
                out.push(instr);
            }
        }
        Mterm::new(MtermNode::Seq(out), ty, span)
    }
    map_mterm_model(model, &mut |_ctx, mt| aux(mt))
}

fn merge_field_updates(first: &mut Vec<FieldUpdate>, second: &[FieldUpdate]) {
    for (field, op, value) in second {
        if *op == AssignOp::Assign {
            if let Some(slot) = first.iter_mut().find(|(f, _, _)| f == field) {
                *slot = (field.clone(), AssignOp::Assign, value.clone());
                continue;
            }
        }
        first.push((field.clone(), *op, value.clone()));
    }
}

/// `A[k].f ⊕= v` becomes `update(A, k, [(f, ⊕, v)])`.
pub fn replace_assignfield_by_update(model: Model) -> Model {
    fn aux(mt: &Mterm) -> Mterm {
        let mt = map_term(mt, &mut aux);
        match &mt.node {
            MtermNode::Assign {
                op,
                kind: AssignKind::AssetField { asset, field, key },
                value,
                ..
            } => Mterm::new(
                MtermNode::Update {
                    asset: asset.clone(),
                    key: key.clone(),
                    updates: vec![(field.clone(), *op, (**value).clone())],
                },
                Type::unit(),
                mt.span,
            ),
            _ => mt,
        }
    }
    map_mterm_model(model, &mut |_ctx, mt| aux(mt))
}

/// `update_all(A, c, l)` becomes a loop updating each key of `c`.
pub fn remove_update_all(model: Model) -> Model {
    let symbols = model.clone();
    let mut names = NameGen::new();
    map_mterm_model(model, &mut |_ctx, top| {
        rewrite_update_all(&symbols, top, &mut names)
    })
}

fn rewrite_update_all(model: &Model, mt: &Mterm, names: &mut NameGen) -> Mterm {
    let mt = map_term(mt, &mut |c| rewrite_update_all(model, c, names));
    let MtermNode::Updateall {
        asset,
        container,
        updates,
    } = &mt.node
    else {
        return mt;
    };
    let span = mt.span;
    let (_, key_ty) = model.get_asset_key(asset);
    let kid = names.fresh("_kid");
    let coll = match container {
        CollectionKind::Coll => IterKind::Coll(asset.clone()),
        CollectionKind::View(v) => IterKind::View(asset.clone(), v.clone()),
        CollectionKind::Field(an, f, k) => IterKind::Field(an.clone(), f.clone(), k.clone()),
    };
    let body = Mterm::new(
        MtermNode::Update {
            asset: asset.clone(),
            key: Box::new(Mterm::var(kid.clone(), key_ty, span)),
            updates: updates.clone(),
        },
        Type::unit(),
        span,
    );
    Mterm::new(
        MtermNode::For {
            ids: ForIdent::Single(kid),
            coll,
            body: Box::new(body),
            label: None,
        },
        Type::unit(),
        span,
    )
}

/// In formulas, guard every `remove` with its containment check so the
/// logical semantics match the runtime's silent no-op.
pub fn replace_instr_verif(model: Model) -> Model {
    map_mterm_model(model, &mut |ctx: &Context, top| {
        if ctx.function.is_some() && ctx.spec_id.is_none() && ctx.invariant_id.is_none() {
            return top.clone();
        }
        guard_removes(top)
    })
}

fn guard_removes(mt: &Mterm) -> Mterm {
    let mt = map_term(mt, &mut guard_removes);
    match &mt.node {
        MtermNode::Removeasset { asset, key } => {
            let contains = Mterm::new(
                MtermNode::Contains {
                    asset: asset.clone(),
                    container: CollectionKind::Coll,
                    key: key.clone(),
                },
                Type::bool(),
                mt.span,
            );
            Mterm::if_(contains, mt.clone(), None, mt.span)
        }
        _ => mt,
    }
}

/// Every `update` becomes `let _a = get(A, k) in set(A, k, _a with …)`.
pub fn replace_update_by_set(model: Model) -> Model {
    let symbols = model.clone();
    let mut names = NameGen::new();
    map_mterm_model(model, &mut |_ctx, top| {
        rewrite_update_by_set(&symbols, top, &mut names)
    })
}

fn rewrite_update_by_set(model: &Model, mt: &Mterm, names: &mut NameGen) -> Mterm {
    let mt = map_term(mt, &mut |c| rewrite_update_by_set(model, c, names));
    let MtermNode::Update {
        asset,
        key,
        updates,
    } = &mt.node
    else {
        return mt;
    };
    let span = mt.span;
    let decl = model.get_asset(asset);
    let var = names.fresh("_a");
    let asset_ty = Type::asset(asset.clone());
    let var_ref = Mterm::var(var.clone(), asset_ty.clone(), span);

    let fields = updates
        .iter()
        .map(|(field, op, value)| {
            let field_ty = decl
                .field(field)
                .map(|f| f.typ.clone())
                .unwrap_or_else(Type::unit);
            let current = Mterm::new(
                MtermNode::Dot {
                    expr: Box::new(var_ref.clone()),
                    field: field.clone(),
                },
                field_ty.clone(),
                span,
            );
            (field.clone(), apply_op(*op, current, value.clone(), field_ty))
        })
        .collect();

    let get = Mterm::new(
        MtermNode::Get {
            asset: asset.clone(),
            container: CollectionKind::Coll,
            key: key.clone(),
        },
        asset_ty.clone(),
        span,
    );
    let updated = Mterm::new(
        MtermNode::Recupdate {
            x: Box::new(var_ref),
            fields,
        },
        asset_ty,
        span,
    );
    let set = Mterm::new(
        MtermNode::Set {
            asset: asset.clone(),
            key: key.clone(),
            value: Box::new(updated),
        },
        Type::unit(),
        span,
    );
    Mterm::new(
        MtermNode::Letin {
            ids: vec![var],
            value: Box::new(get),
            body: Box::new(set),
        },
        Type::unit(),
        span,
    )
}

/// `A[k].f` becomes `get(A, k).f` once `get` is primitive.
pub fn replace_dotassetfield_by_dot(model: Model) -> Model {
    let symbols = model.clone();
    map_mterm_model(model, &mut |_ctx, top| dot_of_get(&symbols, top))
}

fn dot_of_get(model: &Model, mt: &Mterm) -> Mterm {
    let mt = map_term(mt, &mut |c| dot_of_get(model, c));
    match &mt.node {
        MtermNode::Dotassetfield { asset, key, field } => {
            let get = Mterm::new(
                MtermNode::Get {
                    asset: asset.clone(),
                    container: CollectionKind::Coll,
                    key: key.clone(),
                },
                Type::asset(asset.clone()),
                mt.span,
            );
            mt.with_node(MtermNode::Dot {
                expr: Box::new(get),
                field: field.clone(),
            })
        }
        _ => mt,
    }
}

/// Key-only assets store just their keys: literal records of such assets
/// reduce to the key value itself.
pub fn remove_duplicate_key(model: Model) -> Model {
    let symbols = model.clone();
    map_mterm_model(model, &mut |_ctx, top| strip_key_records(&symbols, top))
}

fn strip_key_records(model: &Model, mt: &Mterm) -> Mterm {
    let mt = map_term(mt, &mut |c| strip_key_records(model, c));
    let MtermNode::Asset(values) = &mt.node else {
        return mt;
    };
    let Some(an) = mt.ty.asset_name().cloned() else {
        return mt;
    };
    if !model.is_asset_single_field(&an) {
        return mt;
    }
    match values.as_slice() {
        [single] => single.clone(),
        several => {
            let ty = Type::tuple(several.iter().map(|v| v.ty.clone()).collect());
            Mterm::new(MtermNode::Tuple(several.to_vec()), ty, mt.span)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use archetype_model::decl::{AssetField, Decl};
    use archetype_model::function::{Function, FunctionKind, FunctionStruct};
    use archetype_model::types::MapKind;
    use archetype_model::Span;

    fn sp() -> Span {
        Span::zero(0)
    }

    fn field(name: &str, typ: Type, default: Option<Mterm>) -> AssetField {
        AssetField {
            name: name.into(),
            original_type: typ.clone(),
            typ,
            default,
            shadow: false,
            loc: sp(),
        }
    }

    fn ledger_model(body: Mterm) -> Model {
        let mut m = Model::new("fa12", sp());
        m.decls.push(Decl::Asset(AssetDecl {
            name: "ledger".into(),
            keys: vec!["holder".into()],
            sort: vec![],
            fields: vec![
                field("holder", Type::address(), None),
                field("tokens", Type::nat(), Some(Mterm::nat(0, sp()))),
            ],
            init: vec![],
            invariants: vec![],
            state: None,
            map_kind: MapKind::BigMap,
            loc: sp(),
        }));
        m.functions.push(Function {
            kind: FunctionKind::Entry,
            fs: FunctionStruct {
                name: "transfer".into(),
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

    fn caller() -> Mterm {
        Mterm::new(MtermNode::Caller, Type::address(), sp())
    }

    #[test]
    fn test_add_update_becomes_guarded_choice() {
        // ledger.add_update(%to, { tokens += value })
        let body = Mterm::new(
            MtermNode::Addupdate {
                asset: "ledger".into(),
                container: CollectionKind::Coll,
                key: Box::new(caller()),
                updates: vec![("tokens".into(), AssignOp::Plus, Mterm::nat(10, sp()))],
            },
            Type::unit(),
            sp(),
        );
        let mut bag = DiagnosticBag::new();
        let model = remove_add_update(ledger_model(body), &mut bag);
        assert!(!bag.has_errors());

        match &body_of(&model).node {
            MtermNode::If { cond, then, els } => {
                assert!(matches!(cond.node, MtermNode::Contains { .. }));
                assert!(matches!(then.node, MtermNode::Update { .. }));
                match &els.as_ref().unwrap().node {
                    MtermNode::Addasset { inst, .. } => match &inst.node {
                        // holder = %to; tokens = default + value
                        MtermNode::Asset(values) => {
                            assert_eq!(values.len(), 2);
                            assert!(matches!(values[1].node, MtermNode::Plus(..)));
                        }
                        other => panic!("expected Asset literal, got {other:?}"),
                    },
                    other => panic!("expected Addasset, got {other:?}"),
                }
            }
            other => panic!("expected If, got {other:?}"),
        }
    }

    #[test]
    fn test_full_assign_add_update_becomes_put() {
        let body = Mterm::new(
            MtermNode::Addupdate {
                asset: "ledger".into(),
                container: CollectionKind::Coll,
                key: Box::new(caller()),
                updates: vec![("tokens".into(), AssignOp::Assign, Mterm::nat(5, sp()))],
            },
            Type::unit(),
            sp(),
        );
        let mut bag = DiagnosticBag::new();
        let model = remove_add_update(ledger_model(body), &mut bag);
        assert!(matches!(
            body_of(&model).node,
            MtermNode::Putsingleasset { .. }
        ));
    }

    #[test]
    fn test_merge_update_overrides_assigns() {
        let upd = |updates: Vec<FieldUpdate>| {
            Mterm::new(
                MtermNode::Update {
                    asset: "ledger".into(),
                    key: Box::new(caller()),
                    updates,
                },
                Type::unit(),
                sp(),
            )
        };
        let body = Mterm::new(
            MtermNode::Seq(vec![
                upd(vec![("tokens".into(), AssignOp::Assign, Mterm::nat(1, sp()))]),
                upd(vec![("tokens".into(), AssignOp::Assign, Mterm::nat(2, sp()))]),
            ]),
            Type::unit(),
            sp(),
        );
        let model = merge_update(ledger_model(body));
        match &body_of(&model).node {
            MtermNode::Seq(instrs) => {
                assert_eq!(instrs.len(), 1);
                match &instrs[0].node {
                    MtermNode::Update { updates, .. } => {
                        assert_eq!(updates.len(), 1);
                        assert_eq!(updates[0].2.node, MtermNode::Nat(2.into()));
                    }
                    other => panic!("expected Update, got {other:?}"),
                }
            }
            other => panic!("expected Seq, got {other:?}"),
        }
    }

    #[test]
    fn test_assignfield_becomes_update() {
        let body = Mterm::new(
            MtermNode::Assign {
                op: AssignOp::Plus,
                typ: Type::nat(),
                kind: AssignKind::AssetField {
                    asset: "ledger".into(),
                    field: "tokens".into(),
                    key: Box::new(caller()),
                },
                value: Box::new(Mterm::nat(3, sp())),
            },
            Type::unit(),
            sp(),
        );
        let model = replace_assignfield_by_update(ledger_model(body));
        match &body_of(&model).node {
            MtermNode::Update { updates, .. } => {
                assert_eq!(updates[0].0, "tokens");
                assert_eq!(updates[0].1, AssignOp::Plus);
            }
            other => panic!("expected Update, got {other:?}"),
        }
    }

    #[test]
    fn test_update_becomes_get_then_set() {
        let body = Mterm::new(
            MtermNode::Update {
                asset: "ledger".into(),
                key: Box::new(caller()),
                updates: vec![("tokens".into(), AssignOp::Plus, Mterm::nat(1, sp()))],
            },
            Type::unit(),
            sp(),
        );
        let model = replace_update_by_set(ledger_model(body));
        match &body_of(&model).node {
            MtermNode::Letin { value, body, .. } => {
                assert!(matches!(value.node, MtermNode::Get { .. }));
                match &body.node {
                    MtermNode::Set { value, .. } => {
                        assert!(matches!(value.node, MtermNode::Recupdate { .. }))
                    }
                    other => panic!("expected Set, got {other:?}"),
                }
            }
            other => panic!("expected Letin, got {other:?}"),
        }
    }

    #[test]
    fn test_update_all_becomes_for_loop() {
        let body = Mterm::new(
            MtermNode::Updateall {
                asset: "ledger".into(),
                container: CollectionKind::Coll,
                updates: vec![("tokens".into(), AssignOp::Assign, Mterm::nat(0, sp()))],
            },
            Type::unit(),
            sp(),
        );
        let model = remove_update_all(ledger_model(body));
        match &body_of(&model).node {
            MtermNode::For { ids, coll, body, .. } => {
                assert!(matches!(ids, ForIdent::Single(id) if id.starts_with("_kid")));
                assert!(matches!(coll, IterKind::Coll(an) if an == "ledger"));
                assert!(matches!(body.node, MtermNode::Update { .. }));
            }
            other => panic!("expected For, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_update_is_skip() {
        let body = Mterm::new(
            MtermNode::Update {
                asset: "ledger".into(),
                key: Box::new(caller()),
                updates: vec![],
            },
            Type::unit(),
            sp(),
        );
        let model = remove_empty_update(ledger_model(body));
        assert!(matches!(&body_of(&model).node, MtermNode::Seq(s) if s.is_empty()));
    }

    #[test]
    fn test_dotassetfield_becomes_dot_on_get() {
        let body = Mterm::new(
            MtermNode::Dotassetfield {
                asset: "ledger".into(),
                key: Box::new(caller()),
                field: "tokens".into(),
            },
            Type::nat(),
            sp(),
        );
        let model = replace_dotassetfield_by_dot(ledger_model(body));
        match &body_of(&model).node {
            MtermNode::Dot { expr, field } => {
                assert_eq!(field, "tokens");
                assert!(matches!(expr.node, MtermNode::Get { .. }));
            }
            other => panic!("expected Dot, got {other:?}"),
        }
    }
}
