//! Asset lowering to primitive collections.
//!
//! `remove_asset` eliminates every runtime `asset<A>` value by choosing a
//! storage shape per asset, then translating each high-level asset
//! operation into concrete set/map/list primitives. The traversal helper
//! [`Lowerer::fold_ck`] dispatches folds on the collection kind: the
//! stored collection itself, a derived view, or one parent's container
//! field.

use indexmap::IndexMap;

use archetype_model::decl::Decl;
use archetype_model::model::{ApiAsset, ApiCk, ApiItem, ApiLoc, Model};
use archetype_model::term::{
    AssignKind, AssignOp, CollectionKind, FailType, ForIdent, IterKind, Mterm, MtermNode,
    SortDirection, VarKind,
};
use archetype_model::types::{ContainerIntent, MapKind, TypeNode};
use archetype_model::utils::{extract_key_value_from_masset, NameGen};
use archetype_model::walk::{map_mterm_model, map_term, map_term_ft};
use archetype_model::{Ident, Type};

use crate::error::{DiagnosticBag, ErrorKind};

/// Chosen storage shape of one asset.
#[derive(Debug, Clone)]
struct AssetShape {
    key_ty: Type,
    kind: ShapeKind,
}

#[derive(Debug, Clone)]
enum ShapeKind {
    /// Key-only record: the collection is a set of keys
    Set,
    /// Map from key to value; `single` names the sole value field when
    /// the record collapses to it
    Map {
        mk: MapKind,
        value_ty: Type,
        single: Option<Ident>,
    },
}

impl AssetShape {
    fn of(model: &Model, an: &str) -> Self {
        let decl = model.get_asset(an);
        let (_, key_ty) = model.get_asset_key(an);
        let value_fields: Vec<_> = decl.value_fields().collect();
        let kind = if value_fields.is_empty() {
            ShapeKind::Set
        } else {
            let (value_ty, single) = match value_fields.as_slice() {
                [one] => (lower_field_type(&one.typ), Some(one.name.clone())),
                _ => (Type::record(an.to_string()), None),
            };
            ShapeKind::Map {
                mk: decl.map_kind,
                value_ty,
                single,
            }
        };
        Self { key_ty, kind }
    }

    fn storage_type(&self) -> Type {
        match &self.kind {
            ShapeKind::Set => Type::set(self.key_ty.clone()),
            ShapeKind::Map { mk, value_ty, .. } => {
                Type::map_of_kind(*mk, self.key_ty.clone(), value_ty.clone())
            }
        }
    }

    fn value_ty(&self) -> Type {
        match &self.kind {
            ShapeKind::Set => self.key_ty.clone(),
            ShapeKind::Map { value_ty, .. } => value_ty.clone(),
        }
    }

    fn map_kind(&self) -> Option<MapKind> {
        match &self.kind {
            ShapeKind::Set => None,
            ShapeKind::Map { mk, .. } => Some(*mk),
        }
    }
}

/// A container field inside an asset record lowers to the child's key
/// set; everything else keeps its (recursively lowered) type.
fn lower_field_type(ty: &Type) -> Type {
    match &ty.node {
        TypeNode::Container(inner, _) => {
            // The child key type is resolved later against the shapes;
            // at declaration time containers always hold the child key.
            Type::set(
                inner
                    .asset_name()
                    .map(|_| Type::unit())
                    .unwrap_or_else(Type::unit),
            )
        }
        _ => ty.clone(),
    }
}

struct Lowerer<'a> {
    symbols: Model,
    shapes: IndexMap<Ident, AssetShape>,
    names: NameGen,
    api: Vec<ApiItem>,
    bag: &'a mut DiagnosticBag,
}

pub fn remove_asset(model: Model, bag: &mut DiagnosticBag) -> Model {
    let mut shapes = IndexMap::new();
    for decl in &model.decls {
        if let Decl::Asset(a) = decl {
            shapes.insert(a.name.clone(), AssetShape::of(&model, &a.name));
        }
    }
    if shapes.is_empty() {
        return model;
    }
    // Container fields hold the child's key type; resolve now that every
    // shape exists.
    let resolved: Vec<(Ident, Ident, Type)> = model
        .decls
        .iter()
        .filter_map(|d| match d {
            Decl::Asset(a) => Some(a),
            _ => None,
        })
        .flat_map(|a| {
            a.fields.iter().filter_map(|f| {
                if let TypeNode::Container(inner, _) = &f.typ.node {
                    let child = inner.asset_name()?;
                    Some((
                        a.name.clone(),
                        f.name.clone(),
                        shapes.get(child)?.key_ty.clone(),
                    ))
                } else {
                    None
                }
            })
        })
        .collect();
    for (an, field, key_ty) in resolved {
        if let Some(AssetShape {
            kind: ShapeKind::Map { value_ty, single, .. },
            ..
        }) = shapes.get_mut(&an)
        {
            let set_ty = Type::set(key_ty);
            match single {
                Some(f) if *f == field => *value_ty = set_ty,
                _ => { /* record field types are rewritten below */ }
            }
        }
    }

    let mut lowerer = Lowerer {
        symbols: model.clone(),
        shapes,
        names: NameGen::new(),
        api: Vec::new(),
        bag,
    };

    let model = map_mterm_model(model, &mut |_ctx, top| lowerer.term(top));

    // Terms are lowered; carried types follow in a second sweep.
    let type_shapes = lowerer.shapes.clone();
    let mut model = map_mterm_model(model, &mut |_ctx, top| {
        retype_term(&type_shapes, top)
    });

    // Storage shapes.
    for item in &mut model.storage {
        if let archetype_model::decl::StorageModelType::Asset(an) = &item.model_type {
            let shape = &lowerer.shapes[an];
            item.typ = shape.storage_type();
        }
    }
    // Declared types follow.
    for decl in &mut model.decls {
        match decl {
            Decl::Var(v) => v.typ = lowerer.lower_type(&v.typ),
            Decl::Asset(a) => {
                for f in &mut a.fields {
                    f.typ = lowerer.lower_type(&f.typ);
                }
            }
            Decl::Record(r) | Decl::Event(r) => {
                for f in &mut r.fields {
                    f.typ = lowerer.lower_type(&f.typ);
                }
            }
            Decl::Enum(_) => {}
        }
    }
    for function in &mut model.functions {
        for arg in &mut function.fs.args {
            arg.typ = lowerer.lower_type(&arg.typ);
        }
    }

    let mut api = std::mem::take(&mut lowerer.api);
    model.api_items.append(&mut api);
    model
}

impl Lowerer<'_> {
    fn shape(&self, an: &str) -> &AssetShape {
        self.shapes
            .get(an)
            .unwrap_or_else(|| panic!("no storage shape for asset {an}"))
    }

    fn record_api(&mut self, node: ApiAsset) {
        self.api.push(ApiItem {
            node,
            loc: ApiLoc::OnlyExec,
        });
    }

    fn lower_type(&self, ty: &Type) -> Type {
        lower_type_with(&self.shapes, ty)
    }

    /// The stored collection as an expression.
    fn storage_var(&self, an: &str, span: archetype_model::Span) -> Mterm {
        Mterm::new(
            MtermNode::Var {
                id: an.to_string(),
                kind: VarKind::StoreCol,
            },
            self.shape(an).storage_type(),
            span,
        )
    }

    fn storage_lvalue(&self, an: &str) -> AssignKind {
        AssignKind::Var(an.to_string(), VarKind::StoreCol)
    }

    /// `map_get(va, k)`, failing with the asset's not-found error.
    fn map_get(&self, an: &str, key: Mterm) -> Mterm {
        let shape = self.shape(an);
        let mk = shape.map_kind().expect("map_get on a set-shaped asset");
        let span = key.span;
        Mterm::new(
            MtermNode::Mapget {
                mk,
                key_type: shape.key_ty.clone(),
                value_type: shape.value_ty(),
                map: Box::new(self.storage_var(an, span)),
                key: Box::new(key),
                asset: Some(an.to_string()),
            },
            shape.value_ty(),
            span,
        )
    }

    /// Containment test against the stored collection.
    fn coll_contains(&self, an: &str, key: Mterm) -> Mterm {
        let shape = self.shape(an);
        let span = key.span;
        let node = match &shape.kind {
            ShapeKind::Set => MtermNode::Setcontains(
                shape.key_ty.clone(),
                Box::new(self.storage_var(an, span)),
                Box::new(key),
            ),
            ShapeKind::Map { mk, value_ty, .. } => MtermNode::Mapcontains {
                mk: *mk,
                key_type: shape.key_ty.clone(),
                value_type: value_ty.clone(),
                map: Box::new(self.storage_var(an, span)),
                key: Box::new(key),
            },
        };
        Mterm::new(node, Type::bool(), span)
    }

    /// One parent record's container field as a key-set expression.
    fn field_set(&mut self, parent: &str, field: &str, pkey: &Mterm) -> Mterm {
        let shape = self.shape(parent).clone();
        let span = pkey.span;
        let (child, _) = self.symbols.get_field_container(parent, field);
        let set_ty = Type::set(self.shape(&child).key_ty.clone());
        let parent_value = self.map_get(parent, pkey.clone());
        match &shape.kind {
            ShapeKind::Map { single: Some(f), .. } if f == field => parent_value,
            _ => Mterm::new(
                MtermNode::Dot {
                    expr: Box::new(parent_value),
                    field: field.to_string(),
                },
                set_ty,
                span,
            ),
        }
    }

    /// Write one parent record back with a rebuilt container field.
    fn put_parent_field(
        &mut self,
        parent: &str,
        field: &str,
        pkey: &Mterm,
        new_set: impl FnOnce(&mut Self, Mterm) -> Mterm,
    ) -> Mterm {
        let shape = self.shape(parent).clone();
        let span = pkey.span;
        let ShapeKind::Map {
            mk,
            value_ty,
            single,
        } = &shape.kind
        else {
            panic!("container field on a set-shaped asset {parent}")
        };
        let var = self.names.fresh("_v");
        let var_ref = Mterm::var(var.clone(), value_ty.clone(), span);
        let (child, _) = self.symbols.get_field_container(parent, field);
        let set_ty = Type::set(self.shape(&child).key_ty.clone());

        let current_set = match single {
            Some(f) if f == field => var_ref.clone(),
            _ => Mterm::new(
                MtermNode::Dot {
                    expr: Box::new(var_ref.clone()),
                    field: field.to_string(),
                },
                set_ty,
                span,
            ),
        };
        let rebuilt_set = new_set(self, current_set);
        let new_value = match single {
            Some(f) if f == field => rebuilt_set,
            _ => Mterm::new(
                MtermNode::Recupdate {
                    x: Box::new(var_ref),
                    fields: vec![(field.to_string(), rebuilt_set)],
                },
                value_ty.clone(),
                span,
            ),
        };
        let put = Mterm::new(
            MtermNode::Mapinstrput {
                mk: *mk,
                key_type: shape.key_ty.clone(),
                value_type: value_ty.clone(),
                lvalue: self.storage_lvalue(parent),
                key: Box::new(pkey.clone()),
                value: Box::new(new_value),
            },
            Type::unit(),
            span,
        );
        Mterm::new(
            MtermNode::Letin {
                ids: vec![var],
                value: Box::new(self.map_get(parent, pkey.clone())),
                body: Box::new(put),
            },
            Type::unit(),
            span,
        )
    }

    /// Fold over a collection operand, dispatching on its kind.
    ///
    /// `body` receives the key variable, the asset value for that key and
    /// the accumulator variable, and returns the next accumulator.
    fn fold_ck(
        &mut self,
        an: &str,
        ck: &CollectionKind,
        init: Mterm,
        acc_ty: Type,
        body: impl FnOnce(&mut Self, &Mterm, &Mterm, &Mterm) -> Mterm,
    ) -> Mterm {
        let shape = self.shape(an).clone();
        let span = init.span;
        let kid = self.names.fresh("_kid");
        let accu = self.names.fresh("_accu");
        let key_var = Mterm::var(kid.clone(), shape.key_ty.clone(), span);
        let acc_var = Mterm::var(accu.clone(), acc_ty.clone(), span);

        match (ck, &shape.kind) {
            (CollectionKind::Coll, ShapeKind::Set) => {
                let value = key_var.clone();
                let fold_body = body(self, &key_var, &value, &acc_var);
                Mterm::new(
                    MtermNode::Setfold {
                        elem_type: shape.key_ty.clone(),
                        elem_id: kid,
                        acc_id: accu,
                        coll: Box::new(self.storage_var(an, span)),
                        init: Box::new(init),
                        body: Box::new(fold_body),
                    },
                    acc_ty,
                    span,
                )
            }
            (CollectionKind::Coll, ShapeKind::Map { mk, value_ty, .. }) => {
                let vid = self.names.fresh("_vid");
                let value = Mterm::var(vid.clone(), value_ty.clone(), span);
                let fold_body = body(self, &key_var, &value, &acc_var);
                Mterm::new(
                    MtermNode::Mapfold {
                        mk: *mk,
                        key_type: shape.key_ty.clone(),
                        key_id: kid,
                        value_id: vid,
                        acc_id: accu,
                        map: Box::new(self.storage_var(an, span)),
                        init: Box::new(init),
                        body: Box::new(fold_body),
                    },
                    acc_ty,
                    span,
                )
            }
            (CollectionKind::View(v), _) => {
                let value = match shape.kind {
                    ShapeKind::Set => key_var.clone(),
                    ShapeKind::Map { .. } => self.map_get(an, key_var.clone()),
                };
                let fold_body = body(self, &key_var, &value, &acc_var);
                Mterm::new(
                    MtermNode::Listfold {
                        elem_type: shape.key_ty.clone(),
                        elem_id: kid,
                        acc_id: accu,
                        coll: v.clone(),
                        init: Box::new(init),
                        body: Box::new(fold_body),
                    },
                    acc_ty,
                    span,
                )
            }
            (CollectionKind::Field(parent, field, pkey), _) => {
                let parent = parent.clone();
                let field = field.clone();
                let pkey = (**pkey).clone();
                let value = match shape.kind {
                    ShapeKind::Set => key_var.clone(),
                    ShapeKind::Map { .. } => self.map_get(an, key_var.clone()),
                };
                let fold_body = body(self, &key_var, &value, &acc_var);
                let coll = self.field_set(&parent, &field, &pkey);
                Mterm::new(
                    MtermNode::Setfold {
                        elem_type: shape.key_ty.clone(),
                        elem_id: kid,
                        acc_id: accu,
                        coll: Box::new(coll),
                        init: Box::new(init),
                        body: Box::new(fold_body),
                    },
                    acc_ty,
                    span,
                )
            }
        }
    }

    /// The ordered key list of a collection operand.
    fn keys_list(&mut self, an: &str, ck: &CollectionKind, span: archetype_model::Span) -> Mterm {
        if let CollectionKind::View(v) = ck {
            return (**v).clone();
        }
        let key_ty = self.shape(an).key_ty.clone();
        let list_ty = Type::list(key_ty.clone());
        let init = Mterm::new(MtermNode::Litlist(vec![]), list_ty.clone(), span);
        let folded = self.fold_ck(an, ck, init, list_ty.clone(), |_, k, _, acc| {
            Mterm::new(
                MtermNode::Listprepend(
                    key_ty.clone(),
                    Box::new(acc.clone()),
                    Box::new(k.clone()),
                ),
                acc.ty.clone(),
                span,
            )
        });
        Mterm::new(
            MtermNode::Listreverse(
                self.shape(an).key_ty.clone(),
                Box::new(folded),
            ),
            list_ty,
            span,
        )
    }

    /// Lower the terms embedded in a collection operand.
    fn lower_ck(&mut self, ck: &CollectionKind) -> CollectionKind {
        match ck {
            CollectionKind::Coll => CollectionKind::Coll,
            CollectionKind::View(v) => CollectionKind::View(Box::new(self.term(v))),
            CollectionKind::Field(an, f, k) => {
                CollectionKind::Field(an.clone(), f.clone(), Box::new(self.term(k)))
            }
        }
    }

    /// Substitute the bound asset variable of a predicate body: key-field
    /// accesses become the key variable, value fields read the value.
    fn subst_bound(
        &self,
        body: &Mterm,
        bound: &str,
        an: &str,
        key_var: &Mterm,
        value: &Mterm,
    ) -> Mterm {
        let decl = self.symbols.get_asset(an);
        let shape = self.shape(an);
        match &body.node {
            MtermNode::Dot { expr, field } => {
                if let MtermNode::Var { id, .. } = &expr.node {
                    if id == bound {
                        if decl.is_key(field) {
                            return match decl.keys.len() {
                                1 => key_var.clone(),
                                _ => {
                                    let pos = decl
                                        .keys
                                        .iter()
                                        .position(|k| k == field)
                                        .expect("key position");
                                    Mterm::new(
                                        MtermNode::Tupleaccess {
                                            x: Box::new(key_var.clone()),
                                            index: pos as u32,
                                        },
                                        body.ty.clone(),
                                        body.span,
                                    )
                                }
                            };
                        }
                        return match &shape.kind {
                            ShapeKind::Map { single: Some(f), .. } if f == field => {
                                value.clone()
                            }
                            _ => Mterm::new(
                                MtermNode::Dot {
                                    expr: Box::new(value.clone()),
                                    field: field.clone(),
                                },
                                self.lower_type(&body.ty),
                                body.span,
                            ),
                        };
                    }
                }
            }
            MtermNode::Var { id, .. } if id == bound => {
                let pair_ty = Type::tuple(vec![key_var.ty.clone(), value.ty.clone()]);
                return Mterm::new(
                    MtermNode::Tuple(vec![key_var.clone(), value.clone()]),
                    pair_ty,
                    body.span,
                );
            }
            _ => {}
        }
        map_term(body, &mut |c| {
            self.subst_bound(c, bound, an, key_var, value)
        })
    }

    fn api_ck(ck: &CollectionKind) -> ApiCk {
        match ck {
            CollectionKind::Coll => ApiCk::Coll,
            CollectionKind::View(_) => ApiCk::View,
            CollectionKind::Field(..) => ApiCk::Field,
        }
    }

    /// Main rewrite. Binder-carrying forms are handled before their
    /// children so predicates are substituted against the original
    /// access shapes; everything else lowers children first.
    fn term(&mut self, mt: &Mterm) -> Mterm {
        let span = mt.span;
        match &mt.node {
            // Key-field projection must see the unlowered access.
            MtermNode::Dot { expr, field } => {
                if let Some(an) = expr.ty.asset_name().cloned() {
                    let decl = self.symbols.get_asset(&an).clone();
                    if decl.is_key(field) {
                        if let MtermNode::Get {
                            asset,
                            container,
                            key,
                        } = &expr.node
                        {
                            // `get(A, k).key` is `k`, guarded by the get.
                            let contains = self.term(&Mterm::new(
                                MtermNode::Contains {
                                    asset: asset.clone(),
                                    container: container.clone(),
                                    key: key.clone(),
                                },
                                Type::bool(),
                                span,
                            ));
                            let key = self.term(key);
                            let fail = Mterm::new(
                                MtermNode::Fail(FailType::AssetNotFound(asset.clone())),
                                key.ty.clone(),
                                span,
                            );
                            return Mterm::if_(contains, key, Some(fail), span);
                        }
                    }
                    let single = match &self.shape(&an).kind {
                        ShapeKind::Map { single, .. } => single.clone(),
                        ShapeKind::Set => None,
                    };
                    if single.as_deref() == Some(field.as_str()) {
                        // The record collapsed to its only field.
                        return self.term(expr);
                    }
                }
            }

            MtermNode::Select {
                asset,
                container,
                args,
                body,
            } => {
                let an = asset.clone();
                self.record_api(ApiAsset::Select(an.clone(), Self::api_ck(container)));
                let bound = args
                    .first()
                    .map(|(id, _)| id.clone())
                    .unwrap_or_else(|| "the".to_string());
                let container = self.lower_ck(container);
                let key_ty = self.shape(&an).key_ty.clone();
                let list_ty = Type::list(key_ty.clone());
                let init = Mterm::new(MtermNode::Litlist(vec![]), list_ty.clone(), span);
                let body = (**body).clone();
                let folded =
                    self.fold_ck(&an, &container, init, list_ty.clone(), |this, k, v, acc| {
                        let pred = this.subst_bound(&body, &bound, &an, k, v);
                        let pred = this.term(&pred);
                        let kept = Mterm::new(
                            MtermNode::Listprepend(
                                key_ty.clone(),
                                Box::new(acc.clone()),
                                Box::new(k.clone()),
                            ),
                            acc.ty.clone(),
                            span,
                        );
                        Mterm::if_(pred, kept, Some(acc.clone()), span)
                    });
                return Mterm::new(
                    MtermNode::Listreverse(key_ty, Box::new(folded)),
                    list_ty,
                    span,
                );
            }

            MtermNode::Sum {
                asset,
                container,
                body,
            } => {
                let an = asset.clone();
                self.record_api(ApiAsset::Sum(an.clone(), Self::api_ck(container)));
                let container = self.lower_ck(container);
                let body = (**body).clone();
                let acc_ty = self.lower_type(&mt.ty);
                let zero = zero_of(&acc_ty, span);
                return self.fold_ck(&an, &container, zero, acc_ty.clone(), |this, k, v, acc| {
                    let value = this.subst_bound(&body, "the", &an, k, v);
                    let value = this.term(&value);
                    Mterm::new(
                        MtermNode::Plus(Box::new(acc.clone()), Box::new(value)),
                        acc_ty.clone(),
                        span,
                    )
                });
            }

            MtermNode::Removeif {
                asset,
                container,
                args,
                body,
            } => {
                let an = asset.clone();
                self.record_api(ApiAsset::RemoveIf(an.clone(), Self::api_ck(container)));
                let bound = args
                    .first()
                    .map(|(id, _)| id.clone())
                    .unwrap_or_else(|| "the".to_string());
                let container = self.lower_ck(container);
                return self.lower_remove_if(&an, &container, &bound, body, span);
            }

            _ => {}
        }

        let rebuilt = map_term(mt, &mut |c| self.term(c));
        let span = rebuilt.span;

        match &rebuilt.node {
            MtermNode::Get {
                asset,
                container,
                key,
            } => {
                let an = asset.clone();
                self.record_api(ApiAsset::Get(an.clone()));
                let shape = self.shape(&an).clone();
                match (&shape.kind, container) {
                    (ShapeKind::Set, _) => {
                        let contains = self.coll_contains(&an, (**key).clone());
                        let fail = Mterm::new(
                            MtermNode::Fail(FailType::AssetNotFound(an)),
                            shape.key_ty.clone(),
                            span,
                        );
                        Mterm::if_(contains, (**key).clone(), Some(fail), span)
                    }
                    (_, CollectionKind::Coll) => self.map_get(&an, (**key).clone()),
                    (_, CollectionKind::View(v)) => {
                        let contains = Mterm::new(
                            MtermNode::Listcontains(
                                shape.key_ty.clone(),
                                v.clone(),
                                key.clone(),
                            ),
                            Type::bool(),
                            span,
                        );
                        let get = self.map_get(&an, (**key).clone());
                        let fail = Mterm::new(
                            MtermNode::Fail(FailType::AssetNotFound(an)),
                            get.ty.clone(),
                            span,
                        );
                        Mterm::if_(contains, get, Some(fail), span)
                    }
                    (_, CollectionKind::Field(parent, field, pkey)) => {
                        let (parent, field, pkey) =
                            (parent.clone(), field.clone(), (**pkey).clone());
                        let set = self.field_set(&parent, &field, &pkey);
                        let contains = Mterm::new(
                            MtermNode::Setcontains(
                                shape.key_ty.clone(),
                                Box::new(set),
                                key.clone(),
                            ),
                            Type::bool(),
                            span,
                        );
                        let get = self.map_get(&an, (**key).clone());
                        let fail = Mterm::new(
                            MtermNode::Fail(FailType::AssetNotFound(an)),
                            get.ty.clone(),
                            span,
                        );
                        Mterm::if_(contains, get, Some(fail), span)
                    }
                }
            }

            MtermNode::Getsome {
                asset,
                container,
                key,
            } => {
                let an = asset.clone();
                self.record_api(ApiAsset::Get(an.clone()));
                let shape = self.shape(&an).clone();
                match &shape.kind {
                    ShapeKind::Set => {
                        let contains = self.coll_contains(&an, (**key).clone());
                        let some = Mterm::some((**key).clone());
                        let none = Mterm::none(shape.key_ty.clone(), span);
                        Mterm::if_(contains, some, Some(none), span)
                    }
                    ShapeKind::Map { mk, value_ty, .. } => {
                        let getopt = Mterm::new(
                            MtermNode::Mapgetopt {
                                mk: *mk,
                                key_type: shape.key_ty.clone(),
                                value_type: value_ty.clone(),
                                map: Box::new(self.storage_var(&an, span)),
                                key: key.clone(),
                            },
                            Type::option(value_ty.clone()),
                            span,
                        );
                        match container {
                            CollectionKind::Coll => getopt,
                            _ => {
                                let contains =
                                    self.contains_of(&an, container, (**key).clone(), span);
                                let none = Mterm::none(value_ty.clone(), span);
                                Mterm::if_(contains, getopt, Some(none), span)
                            }
                        }
                    }
                }
            }

            MtermNode::Contains {
                asset,
                container,
                key,
            } => {
                let an = asset.clone();
                self.record_api(ApiAsset::Contains(an.clone(), Self::api_ck(container)));
                self.contains_of(&an, container, (**key).clone(), span)
            }

            MtermNode::Count { asset, container } => {
                let an = asset.clone();
                self.record_api(ApiAsset::Count(an.clone(), Self::api_ck(container)));
                let shape = self.shape(&an).clone();
                match container {
                    CollectionKind::Coll => {
                        let node = match &shape.kind {
                            ShapeKind::Set => MtermNode::Setlength(
                                shape.key_ty.clone(),
                                Box::new(self.storage_var(&an, span)),
                            ),
                            ShapeKind::Map { mk, value_ty, .. } => MtermNode::Maplength {
                                mk: *mk,
                                key_type: shape.key_ty.clone(),
                                value_type: value_ty.clone(),
                                map: Box::new(self.storage_var(&an, span)),
                            },
                        };
                        Mterm::new(node, Type::nat(), span)
                    }
                    CollectionKind::View(v) => Mterm::new(
                        MtermNode::Listlength(shape.key_ty.clone(), v.clone()),
                        Type::nat(),
                        span,
                    ),
                    CollectionKind::Field(parent, field, pkey) => {
                        let (parent, field, pkey) =
                            (parent.clone(), field.clone(), (**pkey).clone());
                        let set = self.field_set(&parent, &field, &pkey);
                        Mterm::new(
                            MtermNode::Setlength(shape.key_ty.clone(), Box::new(set)),
                            Type::nat(),
                            span,
                        )
                    }
                }
            }

            MtermNode::Addasset { asset, inst } => {
                let an = asset.clone();
                self.record_api(ApiAsset::Add(an.clone()));
                self.lower_add(&an, inst, span)
            }

            MtermNode::Putsingleasset { asset, inst } => {
                let an = asset.clone();
                self.record_api(ApiAsset::Set(an.clone()));
                let key = extract_key_value_from_masset(&self.symbols, &an, inst);
                let key = self.term(&key);
                let value = self.asset_value(&an, inst);
                self.put_instr(&an, key, value, span)
            }

            MtermNode::Putremove { asset, key, value } => {
                let an = asset.clone();
                let shape = self.shape(&an).clone();
                let ShapeKind::Map { mk, value_ty, .. } = &shape.kind else {
                    panic!("put_remove on set-shaped asset {an}")
                };
                if *mk == MapKind::IterableBigMap {
                    // The ordered key index cannot survive a blind
                    // put-or-remove.
                    self.bag
                        .error(span, ErrorKind::NoPutRemoveForIterableBigMapAsset);
                    return Mterm::skip(span);
                }
                self.record_api(ApiAsset::Set(an.clone()));
                Mterm::new(
                    MtermNode::Mapinstrupdate {
                        mk: *mk,
                        key_type: shape.key_ty.clone(),
                        value_type: value_ty.clone(),
                        lvalue: self.storage_lvalue(&an),
                        key: key.clone(),
                        value: value.clone(),
                    },
                    Type::unit(),
                    span,
                )
            }

            MtermNode::Set { asset, key, value } => {
                let an = asset.clone();
                self.record_api(ApiAsset::Set(an.clone()));
                self.put_instr(&an, (**key).clone(), (**value).clone(), span)
            }

            // Updates synthesised after the update-to-set rewrite (state
            // transitions) decompose directly to a get/put pair.
            MtermNode::Update {
                asset,
                key,
                updates,
            } => {
                let an = asset.clone();
                self.record_api(ApiAsset::Update(an.clone()));
                self.lower_update(&an, key, updates, span)
            }

            MtermNode::Removeasset { asset, key } => {
                let an = asset.clone();
                self.record_api(ApiAsset::Remove(an.clone()));
                self.lower_remove(&an, (**key).clone(), span)
            }

            MtermNode::Addfield {
                asset,
                field,
                key,
                value,
            } => {
                let (an, field) = (asset.clone(), field.clone());
                self.record_api(ApiAsset::FieldAdd(an.clone(), field.clone()));
                self.lower_add_field(&an, &field, key, value, span)
            }

            MtermNode::Removefield {
                asset,
                field,
                key,
                value,
            } => {
                let (an, field) = (asset.clone(), field.clone());
                self.record_api(ApiAsset::FieldRemove(an.clone(), field.clone()));
                self.lower_remove_field(&an, &field, key, value, span)
            }

            MtermNode::Removeall { asset, container } => {
                let an = asset.clone();
                match container {
                    CollectionKind::Field(parent, field, pkey) => {
                        let (parent, field, pkey) =
                            (parent.clone(), field.clone(), (**pkey).clone());
                        self.record_api(ApiAsset::RemoveAll(parent.clone(), field.clone()));
                        self.lower_remove_all_field(&parent, &field, &pkey, span)
                    }
                    _ => {
                        self.record_api(ApiAsset::Clear(an.clone(), Self::api_ck(container)));
                        self.lower_clear(&an, container, span)
                    }
                }
            }

            MtermNode::Clear { asset, container } => {
                let an = asset.clone();
                self.record_api(ApiAsset::Clear(an.clone(), Self::api_ck(container)));
                match container {
                    CollectionKind::Field(parent, field, pkey) => {
                        let (parent, field, pkey) =
                            (parent.clone(), field.clone(), (**pkey).clone());
                        self.lower_remove_all_field(&parent, &field, &pkey, span)
                    }
                    _ => self.lower_clear(&an, container, span),
                }
            }

            MtermNode::Sort {
                asset,
                container,
                criteria,
            } => {
                let an = asset.clone();
                self.record_api(ApiAsset::Sort(an.clone(), Self::api_ck(container)));
                self.lower_sort(&an, container, criteria, span)
            }

            MtermNode::Nth {
                asset,
                container,
                index,
            } => {
                let an = asset.clone();
                self.record_api(ApiAsset::Nth(an.clone(), Self::api_ck(container)));
                let keys = self.keys_list(&an, container, span);
                let key_ty = self.shape(&an).key_ty.clone();
                Mterm::new(
                    MtermNode::Listnth(key_ty.clone(), Box::new(keys), index.clone()),
                    key_ty,
                    span,
                )
            }

            MtermNode::Head {
                asset,
                container,
                count,
            } => {
                let an = asset.clone();
                self.record_api(ApiAsset::Head(an.clone(), Self::api_ck(container)));
                self.lower_head_tail(&an, container, count, true, span)
            }

            MtermNode::Tail {
                asset,
                container,
                count,
            } => {
                let an = asset.clone();
                self.record_api(ApiAsset::Tail(an.clone(), Self::api_ck(container)));
                self.lower_head_tail(&an, container, count, false, span)
            }

            MtermNode::For {
                ids,
                coll,
                body,
                label,
            } => {
                let lowered = match coll {
                    IterKind::Coll(an) => {
                        let shape = self.shape(an).clone();
                        match &shape.kind {
                            ShapeKind::Set => Some(IterKind::Set(Box::new(
                                self.storage_var(an, span),
                            ))),
                            ShapeKind::Map { mk, .. } => Some(IterKind::Map(
                                *mk,
                                Box::new(self.storage_var(an, span)),
                            )),
                        }
                    }
                    IterKind::View(an, v) => {
                        let _ = an;
                        Some(IterKind::List(v.clone()))
                    }
                    IterKind::Field(parent, field, pkey) => {
                        let (parent, field, pkey) =
                            (parent.clone(), field.clone(), (**pkey).clone());
                        Some(IterKind::Set(Box::new(
                            self.field_set(&parent, &field, &pkey),
                        )))
                    }
                    _ => None,
                };
                match lowered {
                    Some(coll_lowered) => {
                        // Iterating a key/value map with a single binder
                        // binds the key; add a throwaway value binder.
                        let ids = match (&coll_lowered, ids) {
                            (IterKind::Map(..), ForIdent::Single(id)) => {
                                ForIdent::Pair(id.clone(), self.names.fresh("_vid"))
                            }
                            _ => ids.clone(),
                        };
                        Mterm::new(
                            MtermNode::For {
                                ids,
                                coll: coll_lowered,
                                body: body.clone(),
                                label: label.clone(),
                            },
                            Type::unit(),
                            span,
                        )
                    }
                    None => rebuilt.clone(),
                }
            }

            MtermNode::Tocontainer(an) => self.storage_var(an, span),

            // Field reads synthesised after the dot rewrite (state
            // reads) go straight through the stored map.
            MtermNode::Dotassetfield { asset, key, field } => {
                let an = asset.clone();
                self.record_api(ApiAsset::Get(an.clone()));
                let decl = self.symbols.get_asset(&an).clone();
                if decl.is_key(field) {
                    (**key).clone()
                } else {
                    let single = match &self.shape(&an).kind {
                        ShapeKind::Map { single, .. } => single.clone(),
                        ShapeKind::Set => None,
                    };
                    let value = self.map_get(&an, (**key).clone());
                    if single.as_deref() == Some(field.as_str()) {
                        value
                    } else {
                        let field_ty = decl
                            .field(field)
                            .map(|f| self.lower_type(&f.typ))
                            .unwrap_or_else(Type::unit);
                        Mterm::new(
                            MtermNode::Dot {
                                expr: Box::new(value),
                                field: field.clone(),
                            },
                            field_ty,
                            span,
                        )
                    }
                }
            }

            MtermNode::Recupdate { x, fields } => {
                // A record that collapsed to its single field updates by
                // replacing the value outright.
                match x.ty.asset_name() {
                    Some(an)
                        if matches!(
                            self.shape(an).kind,
                            ShapeKind::Map { single: Some(_), .. }
                        ) && fields.len() == 1 =>
                    {
                        fields[0].1.clone()
                    }
                    _ => rebuilt.clone(),
                }
            }

            _ => rebuilt,
        }
    }

    fn contains_of(
        &mut self,
        an: &str,
        ck: &CollectionKind,
        key: Mterm,
        span: archetype_model::Span,
    ) -> Mterm {
        let shape = self.shape(an).clone();
        match ck {
            CollectionKind::Coll => self.coll_contains(an, key),
            CollectionKind::View(v) => Mterm::new(
                MtermNode::Listcontains(shape.key_ty.clone(), v.clone(), Box::new(key)),
                Type::bool(),
                span,
            ),
            CollectionKind::Field(parent, field, pkey) => {
                let (parent, field, pkey) = (parent.clone(), field.clone(), (**pkey).clone());
                let set = self.field_set(&parent, &field, &pkey);
                Mterm::new(
                    MtermNode::Setcontains(
                        shape.key_ty.clone(),
                        Box::new(set),
                        Box::new(key),
                    ),
                    Type::bool(),
                    span,
                )
            }
        }
    }

    /// The stored value of a literal asset record.
    fn asset_value(&mut self, an: &str, inst: &Mterm) -> Mterm {
        let decl = self.symbols.get_asset(an).clone();
        let shape = self.shape(an).clone();
        let span = inst.span;
        let MtermNode::Asset(values) = &inst.node else {
            // Already lowered (e.g. a rebuilt record expression).
            return inst.clone();
        };
        let mut fields: Vec<(Ident, Mterm)> = Vec::new();
        for (field, value) in decl.fields.iter().zip(values.iter()) {
            if decl.is_key(&field.name) || field.shadow {
                continue;
            }
            let value = match &field.typ.node {
                TypeNode::Container(inner, _) => {
                    // Container fields store the children's keys.
                    let child = inner.asset_name().expect("container of non-asset");
                    let child_decl = self.symbols.get_asset(child).clone();
                    let keys: Vec<Mterm> = match &value.node {
                        MtermNode::Assets(children) => children
                            .iter()
                            .map(|c| {
                                let k = extract_key_value_from_masset(
                                    &self.symbols,
                                    &child_decl.name,
                                    c,
                                );
                                self.term(&k)
                            })
                            .collect(),
                        MtermNode::Litset(keys) | MtermNode::Litlist(keys) => {
                            keys.iter().map(|k| self.term(k)).collect()
                        }
                        _ => vec![self.term(value)],
                    };
                    let key_ty = self.shape(child).key_ty.clone();
                    Mterm::new(MtermNode::Litset(keys), Type::set(key_ty), span)
                }
                _ => self.term(value),
            };
            fields.push((field.name.clone(), value));
        }
        match &shape.kind {
            ShapeKind::Set => {
                let key = extract_key_value_from_masset(&self.symbols, an, inst);
                self.term(&key)
            }
            ShapeKind::Map { single: Some(f), .. } => fields
                .into_iter()
                .find(|(name, _)| name == f)
                .map(|(_, v)| v)
                .expect("single-field value missing"),
            ShapeKind::Map { value_ty, .. } => {
                Mterm::new(MtermNode::Litrecord(fields), value_ty.clone(), span)
            }
        }
    }

    fn put_instr(
        &mut self,
        an: &str,
        key: Mterm,
        value: Mterm,
        span: archetype_model::Span,
    ) -> Mterm {
        let shape = self.shape(an).clone();
        let node = match &shape.kind {
            ShapeKind::Set => MtermNode::Setinstradd(
                shape.key_ty.clone(),
                self.storage_lvalue(an),
                Box::new(key),
            ),
            ShapeKind::Map { mk, value_ty, .. } => MtermNode::Mapinstrput {
                mk: *mk,
                key_type: shape.key_ty.clone(),
                value_type: value_ty.clone(),
                lvalue: self.storage_lvalue(an),
                key: Box::new(key),
                value: Box::new(value),
            },
        };
        Mterm::new(node, Type::unit(), span)
    }

    /// `update(A, k, l)` on a lowered asset: read the value record,
    /// rebuild the assigned fields, write it back.
    fn lower_update(
        &mut self,
        an: &str,
        key: &Mterm,
        updates: &[archetype_model::term::FieldUpdate],
        span: archetype_model::Span,
    ) -> Mterm {
        let shape = self.shape(an).clone();
        let decl = self.symbols.get_asset(an).clone();
        let ShapeKind::Map {
            mk,
            value_ty,
            single,
        } = &shape.kind
        else {
            panic!("update on key-only asset {an}")
        };
        let var = self.names.fresh("_a");
        let var_ref = Mterm::var(var.clone(), value_ty.clone(), span);

        let new_value = match single {
            Some(f) => {
                let (_, op, value) = updates
                    .iter()
                    .find(|(uf, _, _)| uf == f)
                    .unwrap_or_else(|| panic!("update on {an} misses its only field {f}"));
                super::asset_update::apply_op(
                    *op,
                    var_ref.clone(),
                    value.clone(),
                    value_ty.clone(),
                )
            }
            None => {
                let fields = updates
                    .iter()
                    .map(|(field, op, value)| {
                        let field_ty = decl
                            .field(field)
                            .map(|fd| self.lower_type(&fd.typ))
                            .unwrap_or_else(Type::unit);
                        let current = Mterm::new(
                            MtermNode::Dot {
                                expr: Box::new(var_ref.clone()),
                                field: field.clone(),
                            },
                            field_ty.clone(),
                            span,
                        );
                        (
                            field.clone(),
                            super::asset_update::apply_op(
                                *op,
                                current,
                                value.clone(),
                                field_ty,
                            ),
                        )
                    })
                    .collect();
                Mterm::new(
                    MtermNode::Recupdate {
                        x: Box::new(var_ref.clone()),
                        fields,
                    },
                    value_ty.clone(),
                    span,
                )
            }
        };

        let put = Mterm::new(
            MtermNode::Mapinstrput {
                mk: *mk,
                key_type: shape.key_ty.clone(),
                value_type: value_ty.clone(),
                lvalue: self.storage_lvalue(an),
                key: Box::new(key.clone()),
                value: Box::new(new_value),
            },
            Type::unit(),
            span,
        );
        Mterm::new(
            MtermNode::Letin {
                ids: vec![var],
                value: Box::new(self.map_get(an, key.clone())),
                body: Box::new(put),
            },
            Type::unit(),
            span,
        )
    }

    fn remove_instr(&mut self, an: &str, key: Mterm, span: archetype_model::Span) -> Mterm {
        let shape = self.shape(an).clone();
        let node = match &shape.kind {
            ShapeKind::Set => MtermNode::Setinstrremove(
                shape.key_ty.clone(),
                self.storage_lvalue(an),
                Box::new(key),
            ),
            ShapeKind::Map { mk, value_ty, .. } => MtermNode::Mapinstrremove {
                mk: *mk,
                key_type: shape.key_ty.clone(),
                value_type: value_ty.clone(),
                lvalue: self.storage_lvalue(an),
                key: Box::new(key),
            },
        };
        Mterm::new(node, Type::unit(), span)
    }

    /// `add(A, v)`: duplicate guard, aggregate pre-checks, recursive
    /// partition-child adds, then the parent put.
    fn lower_add(&mut self, an: &str, inst: &Mterm, span: archetype_model::Span) -> Mterm {
        let decl = self.symbols.get_asset(an).clone();
        let key = extract_key_value_from_masset(&self.symbols, an, inst);
        let key = self.term(&key);

        let mut instrs = Vec::new();

        // Duplicate key guard.
        let contains = self.coll_contains(an, key.clone());
        instrs.push(Mterm::if_(
            contains,
            Mterm::fail(FailType::KeyExists(an.to_string()), span),
            None,
            span,
        ));

        if let MtermNode::Asset(values) = &inst.node {
            for (field, value) in decl.fields.iter().zip(values.iter()) {
                let TypeNode::Container(inner, intent) = &field.typ.node else {
                    continue;
                };
                let child = inner.asset_name().expect("container of non-asset").clone();
                match intent {
                    ContainerIntent::Aggregate => {
                        // Referenced children must exist.
                        for child_key in container_elements(value) {
                            let child_key = self.term(&child_key);
                            let exists = self.coll_contains(&child, child_key);
                            let not = Mterm::new(
                                MtermNode::Not(Box::new(exists)),
                                Type::bool(),
                                span,
                            );
                            instrs.push(Mterm::if_(
                                not,
                                Mterm::fail(FailType::AssetNotFound(child.clone()), span),
                                None,
                                span,
                            ));
                        }
                    }
                    ContainerIntent::Partition => {
                        // Owned children are inserted alongside; their own
                        // duplicate guards reject existing keys.
                        if let MtermNode::Assets(children) = &value.node {
                            for c in children {
                                instrs.push(self.lower_add(&child, c, span));
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        let value = self.asset_value(an, inst);
        instrs.push(self.put_instr(an, key, value, span));
        Mterm::seq(instrs, span)
    }

    /// `remove(A, k)`: cascade over partition fields, then drop the key.
    fn lower_remove(&mut self, an: &str, key: Mterm, span: archetype_model::Span) -> Mterm {
        let decl = self.symbols.get_asset(an).clone();
        let partitions: Vec<(Ident, Ident)> = decl
            .fields
            .iter()
            .filter_map(|f| match &f.typ.node {
                TypeNode::Container(inner, ContainerIntent::Partition) => {
                    inner.asset_name().map(|c| (f.name.clone(), c.clone()))
                }
                _ => None,
            })
            .collect();

        if partitions.is_empty() {
            return self.remove_instr(an, key, span);
        }

        let mut instrs = Vec::new();
        for (field, child) in &partitions {
            let kid = self.names.fresh("_kid");
            let child_key_ty = self.shape(child).key_ty.clone();
            let set = self.field_set(an, field, &key);
            let child_remove =
                self.lower_remove(child, Mterm::var(kid.clone(), child_key_ty, span), span);
            instrs.push(Mterm::new(
                MtermNode::For {
                    ids: ForIdent::Single(kid),
                    coll: IterKind::Set(Box::new(set)),
                    body: Box::new(child_remove),
                    label: None,
                },
                Type::unit(),
                span,
            ));
        }
        instrs.push(self.remove_instr(an, key.clone(), span));

        // Children never outlive their parent, but a missing parent must
        // stay a silent no-op.
        let contains = self.coll_contains(an, key);
        Mterm::if_(contains, Mterm::seq(instrs, span), None, span)
    }

    fn lower_add_field(
        &mut self,
        parent: &str,
        field: &str,
        pkey: &Mterm,
        value: &Mterm,
        span: archetype_model::Span,
    ) -> Mterm {
        let (child, intent) = self.symbols.get_field_container(parent, field);
        let mut instrs = Vec::new();
        let child_key = match intent {
            ContainerIntent::Partition => {
                // The value is the new child record.
                let k = extract_key_value_from_masset(&self.symbols, &child, value);
                let k = self.term(&k);
                instrs.push(self.lower_add(&child, value, span));
                k
            }
            _ => {
                // Aggregates reference an existing child by key.
                let k = value.clone();
                let exists = self.coll_contains(&child, k.clone());
                let not = Mterm::new(MtermNode::Not(Box::new(exists)), Type::bool(), span);
                instrs.push(Mterm::if_(
                    not,
                    Mterm::fail(FailType::AssetNotFound(child.clone()), span),
                    None,
                    span,
                ));
                k
            }
        };
        let key_ty = self.shape(&child).key_ty.clone();
        instrs.push(self.put_parent_field(parent, field, pkey, |_, set| {
            Mterm::new(
                MtermNode::Setadd(key_ty, Box::new(set), Box::new(child_key)),
                Type::set(Type::unit()),
                span,
            )
        }));
        Mterm::seq(instrs, span)
    }

    fn lower_remove_field(
        &mut self,
        parent: &str,
        field: &str,
        pkey: &Mterm,
        value: &Mterm,
        span: archetype_model::Span,
    ) -> Mterm {
        let (child, intent) = self.symbols.get_field_container(parent, field);
        let key_ty = self.shape(&child).key_ty.clone();
        let child_key = value.clone();

        let mut instrs = Vec::new();
        let ck = child_key.clone();
        instrs.push(self.put_parent_field(parent, field, pkey, |_, set| {
            Mterm::new(
                MtermNode::Setremove(key_ty, Box::new(set), Box::new(ck)),
                Type::set(Type::unit()),
                span,
            )
        }));
        if intent == ContainerIntent::Partition {
            instrs.push(self.lower_remove(&child, child_key, span));
        }
        Mterm::seq(instrs, span)
    }

    fn lower_remove_all_field(
        &mut self,
        parent: &str,
        field: &str,
        pkey: &Mterm,
        span: archetype_model::Span,
    ) -> Mterm {
        let (child, intent) = self.symbols.get_field_container(parent, field);
        let key_ty = self.shape(&child).key_ty.clone();

        let mut instrs = Vec::new();
        if intent == ContainerIntent::Partition {
            let kid = self.names.fresh("_kid");
            let set = self.field_set(parent, field, pkey);
            let child_remove =
                self.lower_remove(&child, Mterm::var(kid.clone(), key_ty.clone(), span), span);
            instrs.push(Mterm::new(
                MtermNode::For {
                    ids: ForIdent::Single(kid),
                    coll: IterKind::Set(Box::new(set)),
                    body: Box::new(child_remove),
                    label: None,
                },
                Type::unit(),
                span,
            ));
        }
        instrs.push(self.put_parent_field(parent, field, pkey, |_, set| {
            Mterm::new(MtermNode::Litset(vec![]), set.ty.clone(), span)
        }));
        Mterm::seq(instrs, span)
    }

    fn lower_clear(
        &mut self,
        an: &str,
        ck: &CollectionKind,
        span: archetype_model::Span,
    ) -> Mterm {
        let shape = self.shape(an).clone();
        match ck {
            CollectionKind::Coll => {
                let decl = self.symbols.get_asset(an).clone();
                let has_partition = decl.fields.iter().any(|f| {
                    matches!(
                        f.typ.node,
                        TypeNode::Container(_, ContainerIntent::Partition)
                    )
                });
                let mut instrs = Vec::new();
                if has_partition {
                    // Cascade before wiping the collection.
                    let kid = self.names.fresh("_kid");
                    let remove = self.lower_remove(
                        an,
                        Mterm::var(kid.clone(), shape.key_ty.clone(), span),
                        span,
                    );
                    let coll = match &shape.kind {
                        ShapeKind::Set => {
                            IterKind::Set(Box::new(self.storage_var(an, span)))
                        }
                        ShapeKind::Map { mk, .. } => {
                            IterKind::Map(*mk, Box::new(self.storage_var(an, span)))
                        }
                    };
                    let ids = match coll {
                        IterKind::Map(..) => {
                            ForIdent::Pair(kid.clone(), self.names.fresh("_vid"))
                        }
                        _ => ForIdent::Single(kid.clone()),
                    };
                    instrs.push(Mterm::new(
                        MtermNode::For {
                            ids,
                            coll,
                            body: Box::new(remove),
                            label: None,
                        },
                        Type::unit(),
                        span,
                    ));
                }
                let empty = match &shape.kind {
                    ShapeKind::Set => Mterm::new(
                        MtermNode::Litset(vec![]),
                        shape.storage_type(),
                        span,
                    ),
                    ShapeKind::Map { mk, .. } => Mterm::new(
                        MtermNode::Litmap(*mk, vec![]),
                        shape.storage_type(),
                        span,
                    ),
                };
                instrs.push(Mterm::new(
                    MtermNode::Assign {
                        op: AssignOp::Assign,
                        typ: shape.storage_type(),
                        kind: self.storage_lvalue(an),
                        value: Box::new(empty),
                    },
                    Type::unit(),
                    span,
                ));
                Mterm::seq(instrs, span)
            }
            CollectionKind::View(v) => {
                let kid = self.names.fresh("_kid");
                let remove = self.lower_remove(
                    an,
                    Mterm::var(kid.clone(), shape.key_ty.clone(), span),
                    span,
                );
                Mterm::new(
                    MtermNode::For {
                        ids: ForIdent::Single(kid),
                        coll: IterKind::List(v.clone()),
                        body: Box::new(remove),
                        label: None,
                    },
                    Type::unit(),
                    span,
                )
            }
            CollectionKind::Field(parent, field, pkey) => {
                let (parent, field, pkey) = (parent.clone(), field.clone(), (**pkey).clone());
                self.lower_remove_all_field(&parent, &field, &pkey, span)
            }
        }
    }

    fn lower_remove_if(
        &mut self,
        an: &str,
        ck: &CollectionKind,
        bound: &str,
        body: &Mterm,
        span: archetype_model::Span,
    ) -> Mterm {
        let shape = self.shape(an).clone();
        let kid = self.names.fresh("_kid");
        let key_var = Mterm::var(kid.clone(), shape.key_ty.clone(), span);

        let (coll, ids, value) = match (ck, &shape.kind) {
            (CollectionKind::Coll, ShapeKind::Set) => (
                IterKind::Set(Box::new(self.storage_var(an, span))),
                ForIdent::Single(kid.clone()),
                key_var.clone(),
            ),
            (CollectionKind::Coll, ShapeKind::Map { mk, value_ty, .. }) => {
                let vid = self.names.fresh("_vid");
                let value = Mterm::var(vid.clone(), value_ty.clone(), span);
                (
                    IterKind::Map(*mk, Box::new(self.storage_var(an, span))),
                    ForIdent::Pair(kid.clone(), vid),
                    value,
                )
            }
            (CollectionKind::View(v), _) => (
                IterKind::List(v.clone()),
                ForIdent::Single(kid.clone()),
                match shape.kind {
                    ShapeKind::Set => key_var.clone(),
                    ShapeKind::Map { .. } => self.map_get(an, key_var.clone()),
                },
            ),
            (CollectionKind::Field(parent, field, pkey), _) => {
                let (parent, field, pkey) = (parent.clone(), field.clone(), (**pkey).clone());
                (
                    IterKind::Set(Box::new(self.field_set(&parent, &field, &pkey))),
                    ForIdent::Single(kid.clone()),
                    match shape.kind {
                        ShapeKind::Set => key_var.clone(),
                        ShapeKind::Map { .. } => self.map_get(an, key_var.clone()),
                    },
                )
            }
        };

        let pred = self.subst_bound(body, bound, an, &key_var, &value);
        let pred = self.term(&pred);
        let remove = self.lower_remove(an, key_var, span);
        let loop_body = Mterm::if_(pred, remove, None, span);
        Mterm::new(
            MtermNode::For {
                ids,
                coll,
                body: Box::new(loop_body),
                label: None,
            },
            Type::unit(),
            span,
        )
    }

    /// `sort` builds an ordered key list by insertion: an outer fold over
    /// the collection and an inner fold inserting each key into the
    /// accumulated list at its position.
    fn lower_sort(
        &mut self,
        an: &str,
        ck: &CollectionKind,
        criteria: &[(Ident, SortDirection)],
        span: archetype_model::Span,
    ) -> Mterm {
        let shape = self.shape(an).clone();
        let key_ty = shape.key_ty.clone();
        let list_ty = Type::list(key_ty.clone());
        let init = Mterm::new(MtermNode::Litlist(vec![]), list_ty.clone(), span);
        let criteria = criteria.to_vec();
        let an_owned = an.to_string();

        let folded = self.fold_ck(an, ck, init, list_ty.clone(), |this, k, _v, acc| {
            this.insert_sorted(&an_owned, k, acc, &criteria, span)
        });
        Mterm::new(
            MtermNode::Listreverse(key_ty, Box::new(folded)),
            list_ty,
            span,
        )
    }

    /// Insert `k` into the (reversed) accumulator list, descending-first
    /// so the final reverse yields ascending criteria order.
    fn insert_sorted(
        &mut self,
        an: &str,
        k: &Mterm,
        acc: &Mterm,
        criteria: &[(Ident, SortDirection)],
        span: archetype_model::Span,
    ) -> Mterm {
        let shape = self.shape(an).clone();
        let key_ty = shape.key_ty.clone();
        let list_ty = Type::list(key_ty.clone());
        let pair_ty = Type::tuple(vec![Type::bool(), list_ty.clone()]);

        let elem = self.names.fresh("_kid");
        let accu = self.names.fresh("_accu");
        let elem_var = Mterm::var(elem.clone(), key_ty.clone(), span);
        let acc_var = Mterm::var(accu.clone(), pair_ty.clone(), span);

        let inserted = Mterm::new(
            MtermNode::Tupleaccess {
                x: Box::new(acc_var.clone()),
                index: 0,
            },
            Type::bool(),
            span,
        );
        let rev_list = Mterm::new(
            MtermNode::Tupleaccess {
                x: Box::new(acc_var.clone()),
                index: 1,
            },
            list_ty.clone(),
            span,
        );

        // The accumulator is built in reverse, so `k` goes in *after*
        // every element that should follow it: insert on the first
        // element that sorts before `k`.
        let elem_before_k = self.criteria_lt(an, &elem_var, k, criteria, span);
        let prepend = |list: Mterm, item: Mterm| {
            Mterm::new(
                MtermNode::Listprepend(key_ty.clone(), Box::new(list), Box::new(item)),
                list_ty.clone(),
                span,
            )
        };

        let take = Mterm::new(
            MtermNode::Tuple(vec![
                Mterm::bool_(true, span),
                prepend(prepend(rev_list.clone(), k.clone()), elem_var.clone()),
            ]),
            pair_ty.clone(),
            span,
        );
        let skip = Mterm::new(
            MtermNode::Tuple(vec![inserted.clone(), prepend(rev_list.clone(), elem_var.clone())]),
            pair_ty.clone(),
            span,
        );
        let not_yet = Mterm::new(
            MtermNode::Not(Box::new(inserted.clone())),
            Type::bool(),
            span,
        );
        let cond = Mterm::new(
            MtermNode::And(Box::new(not_yet), Box::new(elem_before_k)),
            Type::bool(),
            span,
        );
        let fold_body = Mterm::if_(cond, take, Some(skip), span);

        let init = Mterm::new(
            MtermNode::Tuple(vec![
                Mterm::bool_(false, span),
                Mterm::new(MtermNode::Litlist(vec![]), list_ty.clone(), span),
            ]),
            pair_ty.clone(),
            span,
        );
        let folded = Mterm::new(
            MtermNode::Listfold {
                elem_type: key_ty.clone(),
                elem_id: elem,
                acc_id: accu,
                coll: Box::new(acc.clone()),
                init: Box::new(init),
                body: Box::new(fold_body),
            },
            pair_ty.clone(),
            span,
        );

        // If nothing sorted before `k`, it belongs at the (reversed) head.
        let res = self.names.fresh("_tmp");
        let res_var = Mterm::var(res.clone(), pair_ty, span);
        let res_inserted = Mterm::new(
            MtermNode::Tupleaccess {
                x: Box::new(res_var.clone()),
                index: 0,
            },
            Type::bool(),
            span,
        );
        let res_list = Mterm::new(
            MtermNode::Tupleaccess {
                x: Box::new(res_var),
                index: 1,
            },
            list_ty.clone(),
            span,
        );
        let with_k = prepend(res_list.clone(), k.clone());
        let pick = Mterm::if_(res_inserted, res_list, Some(with_k), span);
        Mterm::new(
            MtermNode::Letin {
                ids: vec![res],
                value: Box::new(folded),
                body: Box::new(pick),
            },
            list_ty,
            span,
        )
    }

    /// Lexicographic strict comparison of two keys under the criteria.
    fn criteria_lt(
        &mut self,
        an: &str,
        a: &Mterm,
        b: &Mterm,
        criteria: &[(Ident, SortDirection)],
        span: archetype_model::Span,
    ) -> Mterm {
        let decl = self.symbols.get_asset(an).clone();
        let field_of = |this: &mut Self, key: &Mterm, field: &str| -> Mterm {
            if decl.is_key(field) {
                return key.clone();
            }
            let fty = decl
                .field(field)
                .map(|f| this.lower_type(&f.typ))
                .unwrap_or_else(Type::unit);
            let value = this.map_get(an, key.clone());
            match &this.shape(an).kind {
                ShapeKind::Map { single: Some(f), .. } if f == field => value,
                _ => Mterm::new(
                    MtermNode::Dot {
                        expr: Box::new(value),
                        field: field.to_string(),
                    },
                    fty,
                    span,
                ),
            }
        };

        let mut out: Option<Mterm> = None;
        for (field, dir) in criteria.iter().rev() {
            let fa = field_of(self, a, field);
            let fb = field_of(self, b, field);
            let (lhs, rhs) = match dir {
                SortDirection::Asc => (fa.clone(), fb.clone()),
                SortDirection::Desc => (fb.clone(), fa.clone()),
            };
            let lt = Mterm::new(
                MtermNode::Lt(Box::new(lhs), Box::new(rhs)),
                Type::bool(),
                span,
            );
            out = Some(match out {
                None => lt,
                Some(rest) => {
                    let eq = Mterm::new(
                        MtermNode::Equal(fa.ty.clone(), Box::new(fa), Box::new(fb)),
                        Type::bool(),
                        span,
                    );
                    let tie = Mterm::new(
                        MtermNode::And(Box::new(eq), Box::new(rest)),
                        Type::bool(),
                        span,
                    );
                    Mterm::new(MtermNode::Or(Box::new(lt), Box::new(tie)), Type::bool(), span)
                }
            });
        }
        out.unwrap_or_else(|| Mterm::bool_(false, span))
    }

    /// `head`/`tail` keep a count-bounded prefix or suffix of the key
    /// list, via an indexed fold.
    fn lower_head_tail(
        &mut self,
        an: &str,
        ck: &CollectionKind,
        count: &Mterm,
        head: bool,
        span: archetype_model::Span,
    ) -> Mterm {
        let shape = self.shape(an).clone();
        let key_ty = shape.key_ty.clone();
        let list_ty = Type::list(key_ty.clone());
        let keys = self.keys_list(an, ck, span);

        let pair_ty = Type::tuple(vec![Type::nat(), list_ty.clone()]);
        let elem = self.names.fresh("_kid");
        let accu = self.names.fresh("_accu");
        let idx_var = |accu_var: &Mterm| {
            Mterm::new(
                MtermNode::Tupleaccess {
                    x: Box::new(accu_var.clone()),
                    index: 0,
                },
                Type::nat(),
                span,
            )
        };
        let accu_var = Mterm::var(accu.clone(), pair_ty.clone(), span);
        let elem_var = Mterm::var(elem.clone(), key_ty.clone(), span);
        let rev = Mterm::new(
            MtermNode::Tupleaccess {
                x: Box::new(accu_var.clone()),
                index: 1,
            },
            list_ty.clone(),
            span,
        );

        let keep = if head {
            // index < n
            Mterm::new(
                MtermNode::Lt(Box::new(idx_var(&accu_var)), Box::new(count.clone())),
                Type::bool(),
                span,
            )
        } else {
            // index >= len - n
            let len = Mterm::new(
                MtermNode::Listlength(key_ty.clone(), Box::new(keys.clone())),
                Type::nat(),
                span,
            );
            let threshold = Mterm::new(
                MtermNode::Minus(Box::new(len), Box::new(count.clone())),
                Type::int(),
                span,
            );
            Mterm::new(
                MtermNode::Ge(Box::new(idx_var(&accu_var)), Box::new(threshold)),
                Type::bool(),
                span,
            )
        };

        let next_idx = Mterm::new(
            MtermNode::Plus(Box::new(idx_var(&accu_var)), Box::new(Mterm::nat(1, span))),
            Type::nat(),
            span,
        );
        let kept = Mterm::new(
            MtermNode::Tuple(vec![
                next_idx.clone(),
                Mterm::new(
                    MtermNode::Listprepend(
                        key_ty.clone(),
                        Box::new(rev.clone()),
                        Box::new(elem_var),
                    ),
                    list_ty.clone(),
                    span,
                ),
            ]),
            pair_ty.clone(),
            span,
        );
        let skipped = Mterm::new(
            MtermNode::Tuple(vec![next_idx, rev]),
            pair_ty.clone(),
            span,
        );
        let body = Mterm::if_(keep, kept, Some(skipped), span);

        let init = Mterm::new(
            MtermNode::Tuple(vec![
                Mterm::nat(0, span),
                Mterm::new(MtermNode::Litlist(vec![]), list_ty.clone(), span),
            ]),
            pair_ty.clone(),
            span,
        );
        let folded = Mterm::new(
            MtermNode::Listfold {
                elem_type: key_ty.clone(),
                elem_id: elem,
                acc_id: accu,
                coll: Box::new(keys),
                init: Box::new(init),
                body: Box::new(body),
            },
            pair_ty,
            span,
        );
        let picked = Mterm::new(
            MtermNode::Tupleaccess {
                x: Box::new(folded),
                index: 1,
            },
            list_ty.clone(),
            span,
        );
        Mterm::new(
            MtermNode::Listreverse(key_ty, Box::new(picked)),
            list_ty,
            span,
        )
    }
}

fn lower_type_with(shapes: &IndexMap<Ident, AssetShape>, ty: &Type) -> Type {
    let shape = |an: &str| {
        shapes
            .get(an)
            .unwrap_or_else(|| panic!("no storage shape for asset {an}"))
    };
    let node = match &ty.node {
        TypeNode::Asset(an) => return shape(an).value_ty(),
        TypeNode::Container(inner, intent) => {
            let Some(an) = inner.asset_name() else {
                return ty.clone();
            };
            let key_ty = shape(an).key_ty.clone();
            return match intent {
                ContainerIntent::View => Type::list(key_ty),
                ContainerIntent::AssetKey => key_ty,
                ContainerIntent::AssetValue => shape(an).value_ty(),
                _ => Type::set(key_ty),
            };
        }
        TypeNode::Option(t) => TypeNode::Option(Box::new(lower_type_with(shapes, t))),
        TypeNode::List(t) => TypeNode::List(Box::new(lower_type_with(shapes, t))),
        TypeNode::Set(t) => TypeNode::Set(Box::new(lower_type_with(shapes, t))),
        TypeNode::Map(k, v) => TypeNode::Map(
            Box::new(lower_type_with(shapes, k)),
            Box::new(lower_type_with(shapes, v)),
        ),
        TypeNode::BigMap(k, v) => TypeNode::BigMap(
            Box::new(lower_type_with(shapes, k)),
            Box::new(lower_type_with(shapes, v)),
        ),
        TypeNode::IterableBigMap(k, v) => TypeNode::IterableBigMap(
            Box::new(lower_type_with(shapes, k)),
            Box::new(lower_type_with(shapes, v)),
        ),
        TypeNode::Or(l, r) => TypeNode::Or(
            Box::new(lower_type_with(shapes, l)),
            Box::new(lower_type_with(shapes, r)),
        ),
        TypeNode::Contract(t) => TypeNode::Contract(Box::new(lower_type_with(shapes, t))),
        TypeNode::Ticket(t) => TypeNode::Ticket(Box::new(lower_type_with(shapes, t))),
        TypeNode::Lambda(a, r) => TypeNode::Lambda(
            Box::new(lower_type_with(shapes, a)),
            Box::new(lower_type_with(shapes, r)),
        ),
        TypeNode::Tuple(ts) => {
            TypeNode::Tuple(ts.iter().map(|t| lower_type_with(shapes, t)).collect())
        }
        other => other.clone(),
    };
    Type {
        node,
        annotation: ty.annotation.clone(),
    }
}

fn retype_term(shapes: &IndexMap<Ident, AssetShape>, mt: &Mterm) -> Mterm {
    map_term_ft(
        mt,
        &mut |c| retype_term(shapes, c),
        &mut |t| lower_type_with(shapes, t),
    )
}

fn container_elements(value: &Mterm) -> Vec<Mterm> {
    match &value.node {
        MtermNode::Litset(xs) | MtermNode::Litlist(xs) | MtermNode::Assets(xs) => xs.clone(),
        _ => vec![value.clone()],
    }
}

fn zero_of(ty: &Type, span: archetype_model::Span) -> Mterm {
    use num_bigint::BigInt;
    let node = match &ty.node {
        TypeNode::Nat => MtermNode::Nat(BigInt::from(0)),
        TypeNode::Currency => {
            MtermNode::Currency(BigInt::from(0), archetype_model::term::CurrencyUnit::Utz)
        }
        TypeNode::Rational => MtermNode::Rational(BigInt::from(0), BigInt::from(1)),
        TypeNode::Duration => MtermNode::Duration(0),
        _ => MtermNode::Int(BigInt::from(0)),
    };
    Mterm::new(node, ty.clone(), span)
}

#[cfg(test)]
mod tests {
    use super::*;
    use archetype_model::decl::{AssetDecl, AssetField, StorageItem, StorageModelType};
    use archetype_model::function::{Function, FunctionKind, FunctionStruct};
    use archetype_model::walk::fold_term_rec;
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

    fn my_asset_model(body: Mterm) -> Model {
        let mut m = Model::new("m", sp());
        m.decls.push(Decl::Asset(AssetDecl {
            name: "my_asset".into(),
            keys: vec!["id".into()],
            sort: vec![],
            fields: vec![
                field("id", Type::nat()),
                field("s", Type::string()),
                field("b", Type::bool()),
            ],
            init: vec![],
            invariants: vec![],
            state: None,
            map_kind: MapKind::Map,
            loc: sp(),
        }));
        m.storage.push(StorageItem {
            id: "my_asset".into(),
            model_type: StorageModelType::Asset("my_asset".into()),
            typ: Type::container(
                Type::asset("my_asset"),
                ContainerIntent::Collection,
            ),
            default: Mterm::new(
                MtermNode::Assets(vec![]),
                Type::container(Type::asset("my_asset"), ContainerIntent::Collection),
                sp(),
            ),
            ghost: false,
            loc: sp(),
        });
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

    fn count_nodes(mt: &Mterm, pred: impl Fn(&MtermNode) -> bool + Copy) -> usize {
        fold_term_rec(mt, 0usize, &mut |acc, t| {
            if pred(&t.node) {
                acc + 1
            } else {
                acc
            }
        })
    }

    #[test]
    fn test_storage_shape_is_map_of_record() {
        let mut bag = DiagnosticBag::new();
        let model = remove_asset(my_asset_model(Mterm::skip(sp())), &mut bag);
        let item = model.storage.iter().find(|s| s.id == "my_asset").unwrap();
        match &item.typ.node {
            TypeNode::Map(k, v) => {
                assert_eq!(**k, Type::nat());
                assert_eq!(**v, Type::record("my_asset"));
            }
            other => panic!("expected map storage, got {other:?}"),
        }
    }

    #[test]
    fn test_get_becomes_map_get() {
        let body = Mterm::new(
            MtermNode::Get {
                asset: "my_asset".into(),
                container: CollectionKind::Coll,
                key: Box::new(Mterm::nat(1, sp())),
            },
            Type::asset("my_asset"),
            sp(),
        );
        let mut bag = DiagnosticBag::new();
        let model = remove_asset(my_asset_model(body), &mut bag);
        match &body_of(&model).node {
            MtermNode::Mapget { asset, .. } => {
                assert_eq!(asset.as_deref(), Some("my_asset"))
            }
            other => panic!("expected Mapget, got {other:?}"),
        }
    }

    #[test]
    fn test_remove_if_becomes_loop_with_predicate() {
        // remove_if(the.id >= 2)
        let the = Mterm::var("the", Type::asset("my_asset"), sp());
        let pred = Mterm::new(
            MtermNode::Ge(
                Box::new(Mterm::new(
                    MtermNode::Dot {
                        expr: Box::new(the),
                        field: "id".into(),
                    },
                    Type::nat(),
                    sp(),
                )),
                Box::new(Mterm::nat(2, sp())),
            ),
            Type::bool(),
            sp(),
        );
        let body = Mterm::new(
            MtermNode::Removeif {
                asset: "my_asset".into(),
                container: CollectionKind::Coll,
                args: vec![("the".into(), Type::asset("my_asset"))],
                body: Box::new(pred),
            },
            Type::unit(),
            sp(),
        );
        let mut bag = DiagnosticBag::new();
        let model = remove_asset(my_asset_model(body), &mut bag);

        match &body_of(&model).node {
            MtermNode::For { coll, body, .. } => {
                assert!(matches!(coll, IterKind::Map(MapKind::Map, _)));
                match &body.node {
                    MtermNode::If { cond, then, .. } => {
                        // the.id became the loop key variable
                        assert!(matches!(cond.node, MtermNode::Ge(..)));
                        let removes = count_nodes(then, |n| {
                            matches!(n, MtermNode::Mapinstrremove { .. })
                        });
                        assert_eq!(removes, 1);
                    }
                    other => panic!("expected If, got {other:?}"),
                }
            }
            other => panic!("expected For, got {other:?}"),
        }
    }

    #[test]
    fn test_add_guards_duplicate_key() {
        let inst = Mterm::new(
            MtermNode::Asset(vec![
                Mterm::nat(1, sp()),
                Mterm::string("x", sp()),
                Mterm::bool_(true, sp()),
            ]),
            Type::asset("my_asset"),
            sp(),
        );
        let body = Mterm::new(
            MtermNode::Addasset {
                asset: "my_asset".into(),
                inst: Box::new(inst),
            },
            Type::unit(),
            sp(),
        );
        let mut bag = DiagnosticBag::new();
        let model = remove_asset(my_asset_model(body), &mut bag);
        let b = body_of(&model);
        assert_eq!(
            count_nodes(b, |n| matches!(
                n,
                MtermNode::Fail(FailType::KeyExists(_))
            )),
            1
        );
        assert_eq!(
            count_nodes(b, |n| matches!(n, MtermNode::Mapinstrput { .. })),
            1
        );
        // The stored value record does not repeat the key.
        fold_term_rec(b, (), &mut |(), t| {
            if let MtermNode::Litrecord(fields) = &t.node {
                assert_eq!(fields.len(), 2);
                assert!(fields.iter().all(|(n, _)| n != "id"));
            }
        });
    }

    #[test]
    fn test_sum_becomes_fold() {
        let the = Mterm::var("the", Type::asset("my_asset"), sp());
        let body = Mterm::new(
            MtermNode::Sum {
                asset: "my_asset".into(),
                container: CollectionKind::Coll,
                body: Box::new(Mterm::new(
                    MtermNode::Dot {
                        expr: Box::new(the),
                        field: "id".into(),
                    },
                    Type::nat(),
                    sp(),
                )),
            },
            Type::nat(),
            sp(),
        );
        let mut bag = DiagnosticBag::new();
        let model = remove_asset(my_asset_model(body), &mut bag);
        match &body_of(&model).node {
            MtermNode::Mapfold { init, .. } => {
                assert_eq!(init.node, MtermNode::Nat(0.into()));
            }
            other => panic!("expected Mapfold, got {other:?}"),
        }
    }

    #[test]
    fn test_no_asset_types_survive_in_code() {
        let body = Mterm::new(
            MtermNode::Get {
                asset: "my_asset".into(),
                container: CollectionKind::Coll,
                key: Box::new(Mterm::nat(1, sp())),
            },
            Type::asset("my_asset"),
            sp(),
        );
        let mut bag = DiagnosticBag::new();
        let model = remove_asset(my_asset_model(body), &mut bag);
        fold_term_rec(body_of(&model), (), &mut |(), t| {
            assert!(
                !matches!(t.ty.node, TypeNode::Asset(_)),
                "asset type survived on {:?}",
                t.node
            );
        });
    }

    #[test]
    fn test_put_remove_on_iterable_big_map_is_rejected() {
        let mut model = my_asset_model(Mterm::new(
            MtermNode::Putremove {
                asset: "my_asset".into(),
                key: Box::new(Mterm::nat(1, sp())),
                value: Box::new(Mterm::none(Type::record("my_asset"), sp())),
            },
            Type::unit(),
            sp(),
        ));
        if let Decl::Asset(a) = &mut model.decls[0] {
            a.map_kind = MapKind::IterableBigMap;
        }
        let mut bag = DiagnosticBag::new();
        let _ = remove_asset(model, &mut bag);
        assert!(bag.has_errors());
        assert!(matches!(
            bag.diagnostics()[0].kind,
            ErrorKind::NoPutRemoveForIterableBigMapAsset
        ));
    }

    #[test]
    fn test_partition_remove_cascades() {
        let mut m = Model::new("m", sp());
        m.decls.push(Decl::Asset(AssetDecl {
            name: "mile".into(),
            keys: vec!["id".into()],
            sort: vec![],
            fields: vec![field("id", Type::string()), field("amount", Type::int())],
            init: vec![],
            invariants: vec![],
            state: None,
            map_kind: MapKind::BigMap,
            loc: sp(),
        }));
        m.decls.push(Decl::Asset(AssetDecl {
            name: "owner".into(),
            keys: vec!["addr".into()],
            sort: vec![],
            fields: vec![
                field("addr", Type::address()),
                field(
                    "miles",
                    Type::container(Type::asset("mile"), ContainerIntent::Partition),
                ),
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
                name: "drop".into(),
                args: vec![],
                eargs: vec![],
                body: Mterm::new(
                    MtermNode::Removeasset {
                        asset: "owner".into(),
                        key: Box::new(Mterm::new(
                            MtermNode::Caller,
                            Type::address(),
                            sp(),
                        )),
                    },
                    Type::unit(),
                    sp(),
                ),
                stovars: vec![],
                spec: None,
                loc: sp(),
            },
        });

        let mut bag = DiagnosticBag::new();
        let model = remove_asset(m, &mut bag);
        let b = &model.functions[0].fs.body;
        // A loop over the partition key-set removing children, then the
        // parent removal itself.
        assert_eq!(count_nodes(b, |n| matches!(n, MtermNode::For { .. })), 1);
        assert_eq!(
            count_nodes(b, |n| matches!(n, MtermNode::Mapinstrremove { .. })),
            2
        );
    }
}
