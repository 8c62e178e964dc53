//! Container lowerings.
//!
//! The iterable big map becomes a `(values, positions, size)` triple
//! preserving insertion order; container arithmetic becomes explicit
//! folds; functional and in-place container operations convert into each
//! other where the assignment target matches the operand.

use archetype_model::model::Model;
use archetype_model::term::{
    AssignKind, AssignOp, ForIdent, IterKind, Mterm, MtermNode,
};
use archetype_model::types::{ContainerIntent, MapKind, TypeNode};
use archetype_model::utils::{extract_key_value_from_masset, NameGen};
use archetype_model::walk::{map_mterm_model, map_term, map_term_ft};
use archetype_model::{Ident, Type};

use super::rational::{map_type, retype_model};

/// An asset constructor whose container field holds a plain list literal
/// is coerced to the container's literal form: owned children become
/// `massets`, referenced keys become a set.
pub fn fix_container(model: Model) -> Model {
    let symbols = model.clone();
    map_mterm_model(model, &mut |_ctx, top| coerce_containers(&symbols, top))
}

fn coerce_containers(model: &Model, mt: &Mterm) -> Mterm {
    let mt = map_term(mt, &mut |c| coerce_containers(model, c));
    let MtermNode::Addasset { asset, inst } = &mt.node else {
        return mt;
    };
    let decl = model.get_asset(asset);
    let MtermNode::Asset(values) = &inst.node else {
        return mt;
    };
    let mut changed = false;
    let coerced: Vec<Mterm> = decl
        .fields
        .iter()
        .zip(values.iter())
        .map(|(field, value)| match (&field.typ.node, &value.node) {
            (
                TypeNode::Container(_, ContainerIntent::Partition),
                MtermNode::Litlist(items),
            ) => {
                changed = true;
                value.with_node(MtermNode::Assets(items.clone()))
            }
            (
                TypeNode::Container(_, ContainerIntent::Aggregate),
                MtermNode::Litlist(items),
            ) => {
                changed = true;
                value.with_node(MtermNode::Litset(items.clone()))
            }
            _ => value.clone(),
        })
        .collect();
    if !changed {
        return mt;
    }
    mt.with_node(MtermNode::Addasset {
        asset: asset.clone(),
        inst: Box::new(inst.with_node(MtermNode::Asset(coerced))),
    })
}

/// `add(A, {…; f = [c₁, c₂]})` becomes an add with an emptied container
/// followed by one `add_field` per element.
pub fn extract_item_collection_from_add_asset(model: Model) -> Model {
    let symbols = model.clone();
    map_mterm_model(model, &mut |_ctx, top| extract_items(&symbols, top))
}

fn extract_items(model: &Model, mt: &Mterm) -> Mterm {
    let mt = map_term(mt, &mut |c| extract_items(model, c));
    let MtermNode::Addasset { asset, inst } = &mt.node else {
        return mt;
    };
    let decl = model.get_asset(asset);
    let MtermNode::Asset(values) = &inst.node else {
        return mt;
    };

    let mut adds: Vec<(Ident, Vec<Mterm>)> = Vec::new();
    let emptied: Vec<Mterm> = decl
        .fields
        .iter()
        .zip(values.iter())
        .map(|(field, value)| match (&field.typ.node, &value.node) {
            (TypeNode::Container(..), MtermNode::Assets(items)) if !items.is_empty() => {
                adds.push((field.name.clone(), items.clone()));
                value.with_node(MtermNode::Assets(vec![]))
            }
            (TypeNode::Container(..), MtermNode::Litset(items)) if !items.is_empty() => {
                adds.push((field.name.clone(), items.clone()));
                value.with_node(MtermNode::Litset(vec![]))
            }
            _ => value.clone(),
        })
        .collect();
    if adds.is_empty() {
        return mt;
    }

    let key = extract_key_value_from_masset(model, asset, inst);
    let mut instrs = vec![mt.with_node(MtermNode::Addasset {
        asset: asset.clone(),
        inst: Box::new(inst.with_node(MtermNode::Asset(emptied))),
    })];
    for (field, items) in adds {
        for item in items {
            instrs.push(Mterm::new(
                MtermNode::Addfield {
                    asset: asset.clone(),
                    field: field.clone(),
                    key: Box::new(key.clone()),
                    value: Box::new(item),
                },
                Type::unit(),
                mt.span,
            ));
        }
    }
    Mterm::seq(instrs, mt.span)
}

fn triple_type(k: &Type, v: &Type) -> Type {
    Type::tuple(vec![
        Type::big_map(k.clone(), Type::tuple(vec![Type::nat(), v.clone()])),
        Type::big_map(Type::nat(), k.clone()),
        Type::nat(),
    ])
}

fn lower_ibm_type(ty: &Type) -> Type {
    map_type(ty, &|node| match node {
        TypeNode::IterableBigMap(k, v) => triple_type(k, v).node,
        other => other.clone(),
    })
}

/// Replace every `iterable_big_map<K, V>` by the triple
/// `(big_map<K, (nat, V)>, big_map<nat, K>, nat)`: values indexed by
/// insertion order, the position index, and the current size.
///
/// No `map_update`/`map_instr_update` arm exists for this kind:
/// `put_remove` on an iterable-big-map asset is rejected upstream
/// before it can lower to one.
pub fn remove_iterable_big_map(model: Model) -> Model {
    let mut names = NameGen::new();
    let model = map_mterm_model(model, &mut |_ctx, top| lower_ibm(top, &mut names));

    // Types follow once every operation is rewritten.
    fn deep_retype(mt: &Mterm) -> Mterm {
        map_term_ft(mt, &mut deep_retype, &mut lower_ibm_type)
    }
    let mut model = map_mterm_model(model, &mut |_ctx, top| deep_retype(top));
    retype_model(&mut model, &lower_ibm_type);
    model
}

fn tupleaccess(x: Mterm, index: u32, ty: Type) -> Mterm {
    let span = x.span;
    Mterm::new(
        MtermNode::Tupleaccess {
            x: Box::new(x),
            index,
        },
        ty,
        span,
    )
}

struct IbmParts {
    key_ty: Type,
    value_ty: Type,
    vals_ty: Type,
    pos_ty: Type,
}

impl IbmParts {
    fn new(key_ty: &Type, value_ty: &Type) -> Self {
        Self {
            key_ty: key_ty.clone(),
            value_ty: value_ty.clone(),
            vals_ty: Type::big_map(
                key_ty.clone(),
                Type::tuple(vec![Type::nat(), value_ty.clone()]),
            ),
            pos_ty: Type::big_map(Type::nat(), key_ty.clone()),
        }
    }

    fn vals(&self, m: Mterm) -> Mterm {
        tupleaccess(m, 0, self.vals_ty.clone())
    }

    fn positions(&self, m: Mterm) -> Mterm {
        tupleaccess(m, 1, self.pos_ty.clone())
    }

    fn size(&self, m: Mterm) -> Mterm {
        tupleaccess(m, 2, Type::nat())
    }

    fn entry_ty(&self) -> Type {
        Type::tuple(vec![Type::nat(), self.value_ty.clone()])
    }
}

fn var_of_lvalue(lv: &AssignKind, ty: Type, span: archetype_model::Span) -> Mterm {
    match lv {
        AssignKind::Var(id, kind) => Mterm::new(
            MtermNode::Var {
                id: id.clone(),
                kind: *kind,
            },
            ty,
            span,
        ),
        other => panic!("iterable big map held in a non-variable lvalue: {other:?}"),
    }
}

fn assign_slot(
    lv: &AssignKind,
    triple_ty: &Type,
    index: u32,
    value: Mterm,
    span: archetype_model::Span,
) -> Mterm {
    let lvalue = var_of_lvalue(lv, triple_ty.clone(), span);
    Mterm::new(
        MtermNode::Assign {
            op: AssignOp::Assign,
            typ: value.ty.clone(),
            kind: AssignKind::Tuple {
                lvalue: Box::new(lvalue),
                index,
                arity: 3,
            },
            value: Box::new(value),
        },
        Type::unit(),
        span,
    )
}

fn lower_ibm(mt: &Mterm, names: &mut NameGen) -> Mterm {
    use MtermNode::*;
    let mt = map_term(mt, &mut |c| lower_ibm(c, names));
    let span = mt.span;

    match &mt.node {
        Litmap(MapKind::IterableBigMap, kvs) => {
            let (key_ty, value_ty) = match mt.ty.as_map() {
                Some((_, k, v)) => (k.clone(), v.clone()),
                None => (Type::unit(), Type::unit()),
            };
            let parts = IbmParts::new(&key_ty, &value_ty);
            let vals: Vec<(Mterm, Mterm)> = kvs
                .iter()
                .enumerate()
                .map(|(i, (k, v))| {
                    (
                        k.clone(),
                        Mterm::new(
                            Tuple(vec![Mterm::nat(i as u32 + 1, span), v.clone()]),
                            parts.entry_ty(),
                            span,
                        ),
                    )
                })
                .collect();
            let positions: Vec<(Mterm, Mterm)> = kvs
                .iter()
                .enumerate()
                .map(|(i, (k, _))| (Mterm::nat(i as u32 + 1, span), k.clone()))
                .collect();
            Mterm::new(
                Tuple(vec![
                    Mterm::new(Litmap(MapKind::BigMap, vals), parts.vals_ty.clone(), span),
                    Mterm::new(
                        Litmap(MapKind::BigMap, positions),
                        parts.pos_ty.clone(),
                        span,
                    ),
                    Mterm::nat(kvs.len() as u32, span),
                ]),
                triple_type(&key_ty, &value_ty),
                span,
            )
        }

        Mapgetopt {
            mk: MapKind::IterableBigMap,
            key_type,
            value_type,
            map,
            key,
        } => {
            let parts = IbmParts::new(key_type, value_type);
            let inner = Mterm::new(
                Mapgetopt {
                    mk: MapKind::BigMap,
                    key_type: parts.key_ty.clone(),
                    value_type: parts.entry_ty(),
                    map: Box::new(parts.vals((**map).clone())),
                    key: key.clone(),
                },
                Type::option(parts.entry_ty()),
                span,
            );
            let q = names.fresh("_q_opt");
            let entry = Mterm::var(q.clone(), parts.entry_ty(), span);
            let some = Mterm::some(tupleaccess(entry, 1, parts.value_ty.clone()));
            let none = Mterm::none(parts.value_ty.clone(), span);
            Mterm::new(
                Matchoption {
                    x: Box::new(inner),
                    some_id: q,
                    some: Box::new(some),
                    none: Box::new(none),
                },
                Type::option(parts.value_ty.clone()),
                span,
            )
        }

        Mapget {
            mk: MapKind::IterableBigMap,
            key_type,
            value_type,
            map,
            key,
            asset,
        } => {
            let parts = IbmParts::new(key_type, value_type);
            let inner = Mterm::new(
                Mapget {
                    mk: MapKind::BigMap,
                    key_type: parts.key_ty.clone(),
                    value_type: parts.entry_ty(),
                    map: Box::new(parts.vals((**map).clone())),
                    key: key.clone(),
                    asset: asset.clone(),
                },
                parts.entry_ty(),
                span,
            );
            tupleaccess(inner, 1, parts.value_ty.clone())
        }

        Mapcontains {
            mk: MapKind::IterableBigMap,
            key_type,
            value_type,
            map,
            key,
        } => {
            let parts = IbmParts::new(key_type, value_type);
            Mterm::new(
                Mapcontains {
                    mk: MapKind::BigMap,
                    key_type: parts.key_ty.clone(),
                    value_type: parts.entry_ty(),
                    map: Box::new(parts.vals((**map).clone())),
                    key: key.clone(),
                },
                Type::bool(),
                span,
            )
        }

        Maplength {
            mk: MapKind::IterableBigMap,
            key_type,
            value_type,
            map,
        } => {
            let parts = IbmParts::new(key_type, value_type);
            parts.size((**map).clone())
        }

        Mapinstrput {
            mk: MapKind::IterableBigMap,
            key_type,
            value_type,
            lvalue,
            key,
            value,
        } => lower_ibm_put(key_type, value_type, lvalue, key, value, names, span),

        Mapinstrremove {
            mk: MapKind::IterableBigMap,
            key_type,
            value_type,
            lvalue,
            key,
        } => lower_ibm_remove(key_type, value_type, lvalue, key, names, span),

        Mapfold {
            mk: MapKind::IterableBigMap,
            key_type,
            key_id,
            value_id,
            acc_id,
            map,
            init,
            body,
        } => {
            // The position index is iterated in ascending big-map key
            // order, which is exactly insertion order.
            let value_ty = ibm_value_type_of(map).unwrap_or_else(Type::unit);
            let parts = IbmParts::new(key_type, &value_ty);
            let idx = names.fresh("_idx");
            let bound_value = Mterm::new(
                Letin {
                    ids: vec![value_id.clone()],
                    value: Box::new(tupleaccess(
                        Mterm::new(
                            Mapget {
                                mk: MapKind::BigMap,
                                key_type: parts.key_ty.clone(),
                                value_type: parts.entry_ty(),
                                map: Box::new(parts.vals((**map).clone())),
                                key: Box::new(Mterm::var(
                                    key_id.clone(),
                                    parts.key_ty.clone(),
                                    span,
                                )),
                                asset: None,
                            },
                            parts.entry_ty(),
                            span,
                        ),
                        1,
                        parts.value_ty.clone(),
                    )),
                    body: body.clone(),
                },
                body.ty.clone(),
                span,
            );
            Mterm::new(
                Mapfold {
                    mk: MapKind::BigMap,
                    key_type: Type::nat(),
                    key_id: idx,
                    value_id: key_id.clone(),
                    acc_id: acc_id.clone(),
                    map: Box::new(parts.positions((**map).clone())),
                    init: init.clone(),
                    body: Box::new(bound_value),
                },
                mt.ty.clone(),
                span,
            )
        }

        For {
            ids,
            coll: IterKind::Map(MapKind::IterableBigMap, m),
            body,
            label,
        } => {
            let Some((_, key_ty, value_ty)) = m.ty.as_map().map(|(mk, k, v)| (mk, k.clone(), v.clone()))
            else {
                return mt.clone();
            };
            let parts = IbmParts::new(&key_ty, &value_ty);
            let idx = names.fresh("_idx");
            let (kid, vid) = match ids {
                ForIdent::Pair(k, v) => (k.clone(), Some(v.clone())),
                ForIdent::Single(k) => (k.clone(), None),
            };
            let inner_body = match vid {
                Some(vid) => Mterm::new(
                    Letin {
                        ids: vec![vid],
                        value: Box::new(tupleaccess(
                            Mterm::new(
                                Mapget {
                                    mk: MapKind::BigMap,
                                    key_type: parts.key_ty.clone(),
                                    value_type: parts.entry_ty(),
                                    map: Box::new(parts.vals((**m).clone())),
                                    key: Box::new(Mterm::var(
                                        kid.clone(),
                                        parts.key_ty.clone(),
                                        span,
                                    )),
                                    asset: None,
                                },
                                parts.entry_ty(),
                                span,
                            ),
                            1,
                            parts.value_ty.clone(),
                        )),
                        body: body.clone(),
                    },
                    Type::unit(),
                    span,
                ),
                None => (**body).clone(),
            };
            Mterm::new(
                For {
                    ids: ForIdent::Pair(idx, kid),
                    coll: IterKind::Map(
                        MapKind::BigMap,
                        Box::new(parts.positions((**m).clone())),
                    ),
                    body: Box::new(inner_body),
                    label: label.clone(),
                },
                Type::unit(),
                span,
            )
        }

        _ => mt,
    }
}

fn ibm_value_type_of(map: &Mterm) -> Option<Type> {
    map.ty.as_map().map(|(_, _, v)| v.clone())
}

fn lower_ibm_put(
    key_ty: &Type,
    value_ty: &Type,
    lvalue: &AssignKind,
    key: &Mterm,
    value: &Mterm,
    names: &mut NameGen,
    span: archetype_model::Span,
) -> Mterm {
    use MtermNode::*;
    let parts = IbmParts::new(key_ty, value_ty);
    let triple = triple_type(key_ty, value_ty);
    let var = var_of_lvalue(lvalue, triple.clone(), span);

    let put_vals = |entry: Mterm| {
        Mterm::new(
            Mapput {
                mk: MapKind::BigMap,
                key_type: parts.key_ty.clone(),
                value_type: parts.entry_ty(),
                map: Box::new(parts.vals(var.clone())),
                key: Box::new(key.clone()),
                value: Box::new(entry),
            },
            parts.vals_ty.clone(),
            span,
        )
    };

    let q = names.fresh("_q_opt");
    let existing = Mterm::var(q.clone(), parts.entry_ty(), span);

    // Existing key: overwrite in place, index and size unchanged.
    let keep_idx = tupleaccess(existing, 0, Type::nat());
    let overwrite = assign_slot(
        lvalue,
        &triple,
        0,
        put_vals(Mterm::new(
            Tuple(vec![keep_idx, value.clone()]),
            parts.entry_ty(),
            span,
        )),
        span,
    );

    // New key: append at size + 1 and grow.
    let next = Mterm::new(
        Plus(
            Box::new(parts.size(var.clone())),
            Box::new(Mterm::nat(1, span)),
        ),
        Type::nat(),
        span,
    );
    let append = Mterm::seq(
        vec![
            assign_slot(
                lvalue,
                &triple,
                0,
                put_vals(Mterm::new(
                    Tuple(vec![next.clone(), value.clone()]),
                    parts.entry_ty(),
                    span,
                )),
                span,
            ),
            assign_slot(
                lvalue,
                &triple,
                1,
                Mterm::new(
                    Mapput {
                        mk: MapKind::BigMap,
                        key_type: Type::nat(),
                        value_type: parts.key_ty.clone(),
                        map: Box::new(parts.positions(var.clone())),
                        key: Box::new(next.clone()),
                        value: Box::new(key.clone()),
                    },
                    parts.pos_ty.clone(),
                    span,
                ),
                span,
            ),
            assign_slot(lvalue, &triple, 2, next, span),
        ],
        span,
    );

    let getopt = Mterm::new(
        Mapgetopt {
            mk: MapKind::BigMap,
            key_type: parts.key_ty.clone(),
            value_type: parts.entry_ty(),
            map: Box::new(parts.vals(var)),
            key: Box::new(key.clone()),
        },
        Type::option(parts.entry_ty()),
        span,
    );
    Mterm::new(
        Matchoption {
            x: Box::new(getopt),
            some_id: q,
            some: Box::new(overwrite),
            none: Box::new(append),
        },
        Type::unit(),
        span,
    )
}

fn lower_ibm_remove(
    key_ty: &Type,
    value_ty: &Type,
    lvalue: &AssignKind,
    key: &Mterm,
    names: &mut NameGen,
    span: archetype_model::Span,
) -> Mterm {
    use MtermNode::*;
    let parts = IbmParts::new(key_ty, value_ty);
    let triple = triple_type(key_ty, value_ty);
    let var = var_of_lvalue(lvalue, triple.clone(), span);

    let q = names.fresh("_q_opt");
    let idx_id = names.fresh("_idx");
    let i_id = names.fresh("_idx");
    let kid = names.fresh("_kid");

    let existing = Mterm::var(q.clone(), parts.entry_ty(), span);
    let idx_var = Mterm::var(idx_id.clone(), Type::nat(), span);
    let i_var = Mterm::var(i_id.clone(), Type::nat(), span);
    let k_var = Mterm::var(kid.clone(), parts.key_ty.clone(), span);

    // Shift every entry above the removed index down by one so positions
    // stay dense and ordered.
    let moved_entry = Mterm::new(
        Mapget {
            mk: MapKind::BigMap,
            key_type: parts.key_ty.clone(),
            value_type: parts.entry_ty(),
            map: Box::new(parts.vals(var.clone())),
            key: Box::new(k_var.clone()),
            asset: None,
        },
        parts.entry_ty(),
        span,
    );
    let prev_pos = Mterm::new(
        Abs(Box::new(Mterm::new(
            Minus(Box::new(i_var.clone()), Box::new(Mterm::nat(1, span))),
            Type::int(),
            span,
        ))),
        Type::nat(),
        span,
    );
    let shift_body = Mterm::new(
        Letin {
            ids: vec![kid.clone()],
            value: Box::new(Mterm::new(
                Mapget {
                    mk: MapKind::BigMap,
                    key_type: Type::nat(),
                    value_type: parts.key_ty.clone(),
                    map: Box::new(parts.positions(var.clone())),
                    key: Box::new(i_var.clone()),
                    asset: None,
                },
                parts.key_ty.clone(),
                span,
            )),
            body: Box::new(Mterm::seq(
                vec![
                    assign_slot(
                        lvalue,
                        &triple,
                        0,
                        Mterm::new(
                            Mapput {
                                mk: MapKind::BigMap,
                                key_type: parts.key_ty.clone(),
                                value_type: parts.entry_ty(),
                                map: Box::new(parts.vals(var.clone())),
                                key: Box::new(k_var.clone()),
                                value: Box::new(Mterm::new(
                                    Tuple(vec![
                                        prev_pos.clone(),
                                        tupleaccess(moved_entry, 1, parts.value_ty.clone()),
                                    ]),
                                    parts.entry_ty(),
                                    span,
                                )),
                            },
                            parts.vals_ty.clone(),
                            span,
                        ),
                        span,
                    ),
                    assign_slot(
                        lvalue,
                        &triple,
                        1,
                        Mterm::new(
                            Mapput {
                                mk: MapKind::BigMap,
                                key_type: Type::nat(),
                                value_type: parts.key_ty.clone(),
                                map: Box::new(parts.positions(var.clone())),
                                key: Box::new(prev_pos.clone()),
                                value: Box::new(k_var.clone()),
                            },
                            parts.pos_ty.clone(),
                            span,
                        ),
                        span,
                    ),
                ],
                span,
            )),
        },
        Type::unit(),
        span,
    );

    let shift_loop = Mterm::new(
        Iter {
            id: i_id,
            from: Box::new(Mterm::new(
                Plus(Box::new(idx_var.clone()), Box::new(Mterm::nat(1, span))),
                Type::nat(),
                span,
            )),
            to: Box::new(parts.size(var.clone())),
            body: Box::new(shift_body),
            label: None,
            nat: true,
        },
        Type::unit(),
        span,
    );

    let drop_value = assign_slot(
        lvalue,
        &triple,
        0,
        Mterm::new(
            Mapremove {
                mk: MapKind::BigMap,
                key_type: parts.key_ty.clone(),
                value_type: parts.entry_ty(),
                map: Box::new(parts.vals(var.clone())),
                key: Box::new(key.clone()),
            },
            parts.vals_ty.clone(),
            span,
        ),
        span,
    );
    let drop_last_pos = assign_slot(
        lvalue,
        &triple,
        1,
        Mterm::new(
            Mapremove {
                mk: MapKind::BigMap,
                key_type: Type::nat(),
                value_type: parts.key_ty.clone(),
                map: Box::new(parts.positions(var.clone())),
                key: Box::new(parts.size(var.clone())),
            },
            parts.pos_ty.clone(),
            span,
        ),
        span,
    );
    let shrink = assign_slot(
        lvalue,
        &triple,
        2,
        Mterm::new(
            Abs(Box::new(Mterm::new(
                Minus(
                    Box::new(parts.size(var.clone())),
                    Box::new(Mterm::nat(1, span)),
                ),
                Type::int(),
                span,
            ))),
            Type::nat(),
            span,
        ),
        span,
    );

    let some_branch = Mterm::new(
        Letin {
            ids: vec![idx_id],
            value: Box::new(tupleaccess(existing, 0, Type::nat())),
            body: Box::new(Mterm::seq(
                vec![drop_value, shift_loop, drop_last_pos, shrink],
                span,
            )),
        },
        Type::unit(),
        span,
    );

    let getopt = Mterm::new(
        Mapgetopt {
            mk: MapKind::BigMap,
            key_type: parts.key_ty.clone(),
            value_type: parts.entry_ty(),
            map: Box::new(parts.vals(var)),
            key: Box::new(key.clone()),
        },
        Type::option(parts.entry_ty()),
        span,
    );
    Mterm::new(
        Matchoption {
            x: Box::new(getopt),
            some_id: q,
            some: Box::new(some_branch),
            none: Box::new(Mterm::skip(span)),
        },
        Type::unit(),
        span,
    )
}

/// `set + list`, `map + list of pairs` and their `−` analogues become
/// explicit folds adding or removing each element in turn.
pub fn process_arith_container(model: Model) -> Model {
    let mut names = NameGen::new();
    map_mterm_model(model, &mut |_ctx, top| arith_container(top, &mut names))
}

fn arith_container(mt: &Mterm, names: &mut NameGen) -> Mterm {
    use MtermNode::*;
    let mt = map_term(mt, &mut |c| arith_container(c, names));
    let span = mt.span;

    let (l, r, add) = match &mt.node {
        Plus(l, r) => (l, r, true),
        Minus(l, r) => (l, r, false),
        _ => return mt,
    };
    let Some(elem_ty) = r.ty.as_list().cloned() else {
        return mt;
    };

    let elem = names.fresh("_tmp");
    let accu = names.fresh("_accu");
    let elem_var = Mterm::var(elem.clone(), elem_ty.clone(), span);
    let acc_var = Mterm::var(accu.clone(), l.ty.clone(), span);

    let body = match (&l.ty.node, add) {
        (TypeNode::Set(t), true) => Mterm::new(
            Setadd((**t).clone(), Box::new(acc_var), Box::new(elem_var)),
            l.ty.clone(),
            span,
        ),
        (TypeNode::Set(t), false) => Mterm::new(
            Setremove((**t).clone(), Box::new(acc_var), Box::new(elem_var)),
            l.ty.clone(),
            span,
        ),
        (TypeNode::Map(..) | TypeNode::BigMap(..), true) => {
            let (mk, kt, vt) = l.ty.as_map().expect("map type");
            Mterm::new(
                Mapput {
                    mk,
                    key_type: kt.clone(),
                    value_type: vt.clone(),
                    map: Box::new(acc_var),
                    key: Box::new(tupleaccess(elem_var.clone(), 0, kt.clone())),
                    value: Box::new(tupleaccess(elem_var, 1, vt.clone())),
                },
                l.ty.clone(),
                span,
            )
        }
        (TypeNode::Map(..) | TypeNode::BigMap(..), false) => {
            let (mk, kt, vt) = l.ty.as_map().expect("map type");
            Mterm::new(
                Mapremove {
                    mk,
                    key_type: kt.clone(),
                    value_type: vt.clone(),
                    map: Box::new(acc_var),
                    key: Box::new(elem_var),
                },
                l.ty.clone(),
                span,
            )
        }
        _ => return mt,
    };

    Mterm::new(
        Listfold {
            elem_type: elem_ty,
            elem_id: elem,
            acc_id: accu,
            coll: Box::new((**r).clone()),
            init: Box::new((**l).clone()),
            body: Box::new(body),
        },
        mt.ty.clone(),
        span,
    )
}

fn lvalue_matches(lv: &AssignKind, operand: &Mterm) -> bool {
    match (lv, &operand.node) {
        (AssignKind::Var(id, _), MtermNode::Var { id: oid, .. }) => id == oid,
        _ => false,
    }
}

/// Functional container writes whose target matches the operand become
/// dedicated in-place instructions.
pub fn expr_to_instr(model: Model) -> Model {
    fn aux(mt: &Mterm) -> Mterm {
        use MtermNode::*;
        let mt = map_term(mt, &mut aux);
        let span = mt.span;
        let Assign {
            op: AssignOp::Assign,
            kind,
            value,
            ..
        } = &mt.node
        else {
            return mt;
        };
        let node = match &value.node {
            Setadd(t, coll, e) if lvalue_matches(kind, coll) => {
                Setinstradd(t.clone(), kind.clone(), e.clone())
            }
            Setremove(t, coll, e) if lvalue_matches(kind, coll) => {
                Setinstrremove(t.clone(), kind.clone(), e.clone())
            }
            Listprepend(t, coll, e) if lvalue_matches(kind, coll) => {
                Listinstrprepend(t.clone(), kind.clone(), e.clone())
            }
            Listconcat(t, coll, e) if lvalue_matches(kind, coll) => {
                Listinstrconcat(t.clone(), kind.clone(), e.clone())
            }
            Mapput {
                mk,
                key_type,
                value_type,
                map,
                key,
                value,
            } if lvalue_matches(kind, map) => Mapinstrput {
                mk: *mk,
                key_type: key_type.clone(),
                value_type: value_type.clone(),
                lvalue: kind.clone(),
                key: key.clone(),
                value: value.clone(),
            },
            Mapremove {
                mk,
                key_type,
                value_type,
                map,
                key,
            } if lvalue_matches(kind, map) => Mapinstrremove {
                mk: *mk,
                key_type: key_type.clone(),
                value_type: value_type.clone(),
                lvalue: kind.clone(),
                key: key.clone(),
            },
            Mapupdate {
                mk,
                key_type,
                value_type,
                map,
                key,
                value,
            } if lvalue_matches(kind, map) => Mapinstrupdate {
                mk: *mk,
                key_type: key_type.clone(),
                value_type: value_type.clone(),
                lvalue: kind.clone(),
                key: key.clone(),
                value: value.clone(),
            },
            _ => return mt,
        };
        Mterm::new(node, Type::unit(), span)
    }
    map_mterm_model(model, &mut |_ctx, mt| aux(mt))
}

/// The reverse conversion: in-place instructions back to functional
/// assignment form, used while intermediate passes reason over values.
pub fn instr_to_expr_exec(model: Model) -> Model {
    fn aux(mt: &Mterm) -> Mterm {
        use MtermNode::*;
        let mt = map_term(mt, &mut aux);
        let span = mt.span;

        fn operand(lv: &AssignKind, container_ty: Type, span: archetype_model::Span) -> Mterm {
            match lv {
                AssignKind::Var(id, kind) => Mterm::new(
                    Var {
                        id: id.clone(),
                        kind: *kind,
                    },
                    container_ty,
                    span,
                ),
                other => panic!("container instruction on non-variable lvalue: {other:?}"),
            }
        }

        let (kind, typ, value) = match &mt.node {
            Setinstradd(t, lv, e) => {
                let ty = Type::set(t.clone());
                let coll = operand(lv, ty.clone(), span);
                (
                    lv.clone(),
                    ty.clone(),
                    Mterm::new(Setadd(t.clone(), Box::new(coll), e.clone()), ty, span),
                )
            }
            Setinstrremove(t, lv, e) => {
                let ty = Type::set(t.clone());
                let coll = operand(lv, ty.clone(), span);
                (
                    lv.clone(),
                    ty.clone(),
                    Mterm::new(Setremove(t.clone(), Box::new(coll), e.clone()), ty, span),
                )
            }
            Listinstrprepend(t, lv, e) => {
                let ty = Type::list(t.clone());
                let coll = operand(lv, ty.clone(), span);
                (
                    lv.clone(),
                    ty.clone(),
                    Mterm::new(Listprepend(t.clone(), Box::new(coll), e.clone()), ty, span),
                )
            }
            Listinstrconcat(t, lv, e) => {
                let ty = Type::list(t.clone());
                let coll = operand(lv, ty.clone(), span);
                (
                    lv.clone(),
                    ty.clone(),
                    Mterm::new(Listconcat(t.clone(), Box::new(coll), e.clone()), ty, span),
                )
            }
            Mapinstrput {
                mk,
                key_type,
                value_type,
                lvalue,
                key,
                value,
            } => {
                let ty = Type::map_of_kind(*mk, key_type.clone(), value_type.clone());
                let coll = operand(lvalue, ty.clone(), span);
                (
                    lvalue.clone(),
                    ty.clone(),
                    Mterm::new(
                        Mapput {
                            mk: *mk,
                            key_type: key_type.clone(),
                            value_type: value_type.clone(),
                            map: Box::new(coll),
                            key: key.clone(),
                            value: value.clone(),
                        },
                        ty,
                        span,
                    ),
                )
            }
            Mapinstrremove {
                mk,
                key_type,
                value_type,
                lvalue,
                key,
            } => {
                let ty = Type::map_of_kind(*mk, key_type.clone(), value_type.clone());
                let coll = operand(lvalue, ty.clone(), span);
                (
                    lvalue.clone(),
                    ty.clone(),
                    Mterm::new(
                        Mapremove {
                            mk: *mk,
                            key_type: key_type.clone(),
                            value_type: value_type.clone(),
                            map: Box::new(coll),
                            key: key.clone(),
                        },
                        ty,
                        span,
                    ),
                )
            }
            Mapinstrupdate {
                mk,
                key_type,
                value_type,
                lvalue,
                key,
                value,
            } => {
                let ty = Type::map_of_kind(*mk, key_type.clone(), value_type.clone());
                let coll = operand(lvalue, ty.clone(), span);
                (
                    lvalue.clone(),
                    ty.clone(),
                    Mterm::new(
                        Mapupdate {
                            mk: *mk,
                            key_type: key_type.clone(),
                            value_type: value_type.clone(),
                            map: Box::new(coll),
                            key: key.clone(),
                            value: value.clone(),
                        },
                        ty,
                        span,
                    ),
                )
            }
            _ => return mt,
        };
        Mterm::new(
            Assign {
                op: AssignOp::Assign,
                typ,
                kind,
                value: Box::new(value),
            },
            Type::unit(),
            span,
        )
    }
    map_mterm_model(model, &mut |_ctx, mt| aux(mt))
}

#[cfg(test)]
mod tests {
    use super::*;
    use archetype_model::decl::{StorageItem, StorageModelType};
    use archetype_model::term::VarKind;
    use archetype_model::function::{Function, FunctionKind, FunctionStruct};
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

    fn str_lit(s: &str) -> Mterm {
        Mterm::string(s, sp())
    }

    #[test]
    fn test_ibm_literal_becomes_ordered_triple() {
        let ibm_ty = Type::iterable_big_map(Type::string(), Type::nat());
        let lit = Mterm::new(
            MtermNode::Litmap(
                MapKind::IterableBigMap,
                vec![
                    (str_lit("a"), Mterm::nat(1, sp())),
                    (str_lit("b"), Mterm::nat(2, sp())),
                    (str_lit("c"), Mterm::nat(3, sp())),
                ],
            ),
            ibm_ty.clone(),
            sp(),
        );
        let mut model = model_with_body(Mterm::skip(sp()));
        model.storage.push(StorageItem {
            id: "m".into(),
            model_type: StorageModelType::Var,
            typ: ibm_ty,
            default: lit,
            ghost: false,
            loc: sp(),
        });

        let model = remove_iterable_big_map(model);
        let item = &model.storage[0];
        // Type became the triple.
        match &item.typ.node {
            TypeNode::Tuple(ts) => {
                assert_eq!(ts.len(), 3);
                assert_eq!(ts[2], Type::nat());
            }
            other => panic!("expected triple type, got {other:?}"),
        }
        // Values carry 1-based insertion indices, size is 3.
        match &item.default.node {
            MtermNode::Tuple(parts) => {
                match &parts[0].node {
                    MtermNode::Litmap(MapKind::BigMap, kvs) => {
                        assert_eq!(kvs.len(), 3);
                        match &kvs[0].1.node {
                            MtermNode::Tuple(iv) => {
                                assert_eq!(iv[0].node, MtermNode::Nat(1.into()))
                            }
                            other => panic!("expected (index, value), got {other:?}"),
                        }
                    }
                    other => panic!("expected values big_map, got {other:?}"),
                }
                match &parts[1].node {
                    MtermNode::Litmap(MapKind::BigMap, kvs) => {
                        assert_eq!(kvs[1].0.node, MtermNode::Nat(2.into()));
                        assert_eq!(kvs[1].1.node, MtermNode::String("b".into()));
                    }
                    other => panic!("expected position big_map, got {other:?}"),
                }
                assert_eq!(parts[2].node, MtermNode::Nat(3.into()));
            }
            other => panic!("expected triple literal, got {other:?}"),
        }
    }

    #[test]
    fn test_ibm_length_reads_the_counter() {
        let ibm_ty = Type::iterable_big_map(Type::string(), Type::nat());
        let body = Mterm::new(
            MtermNode::Maplength {
                mk: MapKind::IterableBigMap,
                key_type: Type::string(),
                value_type: Type::nat(),
                map: Box::new(Mterm::storage_var("m", ibm_ty, sp())),
            },
            Type::nat(),
            sp(),
        );
        let model = remove_iterable_big_map(model_with_body(body));
        match &body_of(&model).node {
            MtermNode::Tupleaccess { index, .. } => assert_eq!(*index, 2),
            other => panic!("expected size access, got {other:?}"),
        }
    }

    #[test]
    fn test_ibm_remove_shifts_and_shrinks() {
        let ibm_ty = Type::iterable_big_map(Type::string(), Type::nat());
        let body = Mterm::new(
            MtermNode::Mapinstrremove {
                mk: MapKind::IterableBigMap,
                key_type: Type::string(),
                value_type: Type::nat(),
                lvalue: AssignKind::Var("m".into(), VarKind::StoreVar),
                key: Box::new(str_lit("b")),
            },
            Type::unit(),
            sp(),
        );
        let _ = ibm_ty;
        let model = remove_iterable_big_map(model_with_body(body));
        let b = body_of(&model);
        // Absent key is a silent no-op; present key shifts then shrinks.
        match &b.node {
            MtermNode::Matchoption { none, some, .. } => {
                assert!(matches!(&none.node, MtermNode::Seq(s) if s.is_empty()));
                let shifts = archetype_model::walk::fold_term_rec(some, 0usize, &mut |n, t| {
                    n + usize::from(matches!(t.node, MtermNode::Iter { .. }))
                });
                assert_eq!(shifts, 1);
            }
            other => panic!("expected Matchoption, got {other:?}"),
        }
    }

    #[test]
    fn test_set_plus_list_becomes_fold() {
        let set_ty = Type::set(Type::nat());
        let list_ty = Type::list(Type::nat());
        let body = Mterm::new(
            MtermNode::Plus(
                Box::new(Mterm::storage_var("s", set_ty.clone(), sp())),
                Box::new(Mterm::new(
                    MtermNode::Litlist(vec![Mterm::nat(1, sp())]),
                    list_ty,
                    sp(),
                )),
            ),
            set_ty,
            sp(),
        );
        let model = process_arith_container(model_with_body(body));
        match &body_of(&model).node {
            MtermNode::Listfold { body, .. } => {
                assert!(matches!(body.node, MtermNode::Setadd(..)))
            }
            other => panic!("expected Listfold, got {other:?}"),
        }
    }

    #[test]
    fn test_expr_to_instr_round_trip() {
        let set_ty = Type::set(Type::nat());
        let coll = Mterm::storage_var("s", set_ty.clone(), sp());
        let assign = Mterm::new(
            MtermNode::Assign {
                op: AssignOp::Assign,
                typ: set_ty,
                kind: AssignKind::Var("s".into(), VarKind::StoreVar),
                value: Box::new(Mterm::new(
                    MtermNode::Setadd(
                        Type::nat(),
                        Box::new(coll),
                        Box::new(Mterm::nat(7, sp())),
                    ),
                    Type::set(Type::nat()),
                    sp(),
                )),
            },
            Type::unit(),
            sp(),
        );

        let model = expr_to_instr(model_with_body(assign.clone()));
        assert!(matches!(
            body_of(&model).node,
            MtermNode::Setinstradd(..)
        ));

        let model = instr_to_expr_exec(model);
        assert_eq!(body_of(&model), &assign);
    }
}
