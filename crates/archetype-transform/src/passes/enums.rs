//! Enum and state lowering.
//!
//! Asset states become a stored enum field; every enum then becomes
//! either an integer encoding (all constructors argument-less) or a
//! balanced `or<…>` tree of argument payloads, and `match` collapses to
//! chained equality tests or a `match_or` tree.

use archetype_model::decl::{AssetField, Decl, EnumDecl};
use archetype_model::model::Model;
use archetype_model::term::{Mterm, MtermNode, Pattern, PatternNode};
use archetype_model::types::TypeNode;
use archetype_model::utils::NameGen;
use archetype_model::walk::{map_mterm_model, map_term, map_term_ft};
use archetype_model::{Ident, Type};

/// Materialise `with states` as a stored enum field.
///
/// A synthetic field `state_<asset>` is appended, initialised with the
/// enum's initial constructor; state reads become field reads and state
/// transitions become field updates.
pub fn process_asset_state(model: Model) -> Model {
    let mut model = model;

    // Asset → (state field name, initial constructor value).
    let mut stateful: Vec<(Ident, Ident, Mterm)> = Vec::new();
    for decl in &model.decls {
        let Decl::Asset(asset) = decl else { continue };
        let Some(enum_name) = &asset.state else {
            continue;
        };
        let enum_decl = model.get_enum(enum_name);
        let field = format!("state_{}", asset.name);
        let initial = Mterm::new(
            MtermNode::Enumval {
                id: enum_decl.initial.clone(),
                args: vec![],
                enum_: enum_name.clone(),
            },
            Type::enum_(enum_name.clone()),
            asset.loc,
        );
        stateful.push((asset.name.clone(), field, initial));
    }
    if stateful.is_empty() {
        return model;
    }

    for decl in &mut model.decls {
        let Decl::Asset(asset) = decl else { continue };
        let Some((_, field, initial)) = stateful.iter().find(|(an, _, _)| *an == asset.name)
        else {
            continue;
        };
        let enum_name = asset.state.take().expect("stateful asset lost its enum");
        asset.fields.push(AssetField {
            name: field.clone(),
            original_type: Type::enum_(enum_name.clone()),
            typ: Type::enum_(enum_name),
            default: Some(initial.clone()),
            shadow: false,
            loc: asset.loc,
        });
        // Initial values predate the synthetic field; extend them.
        for init in &mut asset.init {
            if let MtermNode::Asset(values) = &mut init.node {
                values.push(initial.clone());
            }
        }
    }

    let states = stateful;
    map_mterm_model(model, &mut |_ctx, top| {
        rewrite_asset_state(top, &states)
    })
}

fn rewrite_asset_state(mt: &Mterm, states: &[(Ident, Ident, Mterm)]) -> Mterm {
    let mt = map_term(mt, &mut |c| rewrite_asset_state(c, states));
    match &mt.node {
        MtermNode::Assetstate { asset, key } => {
            let Some((_, field, _)) = states.iter().find(|(an, _, _)| an == asset) else {
                return mt;
            };
            mt.with_node(MtermNode::Dotassetfield {
                asset: asset.clone(),
                key: key.clone(),
                field: field.clone(),
            })
        }
        MtermNode::Assign {
            kind: archetype_model::term::AssignKind::AssetState { asset, key },
            value,
            ..
        } => {
            let Some((_, field, _)) = states.iter().find(|(an, _, _)| an == asset) else {
                return mt;
            };
            Mterm::new(
                MtermNode::Update {
                    asset: asset.clone(),
                    key: key.clone(),
                    updates: vec![(
                        field.clone(),
                        archetype_model::term::AssignOp::Assign,
                        (**value).clone(),
                    )],
                },
                Type::unit(),
                mt.span,
            )
        }
        _ => mt,
    }
}

/// How one enum lowers.
struct EnumInfo {
    name: Ident,
    /// Argument types per constructor, in declaration order
    variants: Vec<(Ident, Vec<Type>)>,
    simple: bool,
    target: Type,
}

impl EnumInfo {
    fn new(decl: &EnumDecl) -> Self {
        let variants: Vec<(Ident, Vec<Type>)> = decl
            .values
            .iter()
            .map(|v| (v.name.clone(), v.args.clone()))
            .collect();
        let simple = decl.is_simple();
        let target = if simple {
            Type::int()
        } else {
            or_tree_type(&variants, 0, variants.len())
        };
        Self {
            name: decl.name.clone(),
            variants,
            simple,
            target,
        }
    }

    fn position(&self, ctor: &str) -> usize {
        self.variants
            .iter()
            .position(|(n, _)| n == ctor)
            .unwrap_or_else(|| panic!("unknown constructor {}::{ctor}", self.name))
    }
}

fn payload_type(args: &[Type]) -> Type {
    match args {
        [] => Type::unit(),
        [one] => one.clone(),
        many => Type::tuple(many.to_vec()),
    }
}

fn or_tree_type(variants: &[(Ident, Vec<Type>)], lo: usize, hi: usize) -> Type {
    if hi - lo == 1 {
        let ty = payload_type(&variants[lo].1);
        ty.with_annotation(format!("%{}", variants[lo].0.to_lowercase()))
    } else {
        let mid = lo + (hi - lo) / 2;
        Type::or(
            or_tree_type(variants, lo, mid),
            or_tree_type(variants, mid, hi),
        )
    }
}

/// Build the injection of `payload` for the constructor at `pos`.
fn inject(
    info: &EnumInfo,
    lo: usize,
    hi: usize,
    pos: usize,
    payload: Mterm,
    span: archetype_model::Span,
) -> Mterm {
    if hi - lo == 1 {
        return payload;
    }
    let mid = lo + (hi - lo) / 2;
    let left_ty = or_tree_type(&info.variants, lo, mid);
    let right_ty = or_tree_type(&info.variants, mid, hi);
    let whole = Type::or(left_ty.clone(), right_ty.clone());
    if pos < mid {
        let inner = inject(info, lo, mid, pos, payload, span);
        Mterm::new(MtermNode::Left(right_ty, Box::new(inner)), whole, span)
    } else {
        let inner = inject(info, mid, hi, pos, payload, span);
        Mterm::new(MtermNode::Right(left_ty, Box::new(inner)), whole, span)
    }
}

/// Lower every enum to its target encoding.
pub fn remove_enum(model: Model) -> Model {
    let infos: Vec<EnumInfo> = model
        .decls
        .iter()
        .filter_map(|d| match d {
            Decl::Enum(e) => Some(EnumInfo::new(e)),
            _ => None,
        })
        .collect();
    if infos.is_empty() {
        return model;
    }

    let mut names = NameGen::new();
    let mut model = map_mterm_model(model, &mut |_ctx, top| {
        lower_enum_terms(top, &infos, &mut names)
    });

    // Declaration and storage types follow the terms.
    let retype = |t: &Type| rewrite_enum_type(t, &infos);
    for decl in &mut model.decls {
        match decl {
            Decl::Var(v) => v.typ = retype(&v.typ),
            Decl::Asset(a) => {
                for f in &mut a.fields {
                    f.typ = retype(&f.typ);
                }
            }
            Decl::Record(r) | Decl::Event(r) => {
                for f in &mut r.fields {
                    f.typ = retype(&f.typ);
                }
            }
            Decl::Enum(_) => {}
        }
    }
    for item in &mut model.storage {
        item.typ = retype(&item.typ);
    }
    for function in &mut model.functions {
        for arg in &mut function.fs.args {
            arg.typ = retype(&arg.typ);
        }
        use archetype_model::function::FunctionKind;
        function.kind = match function.kind.clone() {
            FunctionKind::Entry => FunctionKind::Entry,
            FunctionKind::Getter(t) => FunctionKind::Getter(retype(&t)),
            FunctionKind::View(t, v) => FunctionKind::View(retype(&t), v),
            FunctionKind::Function(t) => FunctionKind::Function(retype(&t)),
        };
    }
    model.decls.retain(|d| !matches!(d, Decl::Enum(_)));
    model
}

fn rewrite_enum_type(ty: &Type, infos: &[EnumInfo]) -> Type {
    let mapped = match &ty.node {
        TypeNode::Enum(name) => {
            let Some(info) = infos.iter().find(|i| i.name == *name) else {
                return ty.clone();
            };
            let mut target = info.target.clone();
            target.annotation = ty.annotation.clone();
            return target;
        }
        TypeNode::State => return Type::int(),
        node => node.clone(),
    };
    // Recurse into parameterised types through the generic map on a
    // throwaway term: cheaper to write the recursion by hand.
    let mut out = Type {
        node: mapped,
        annotation: ty.annotation.clone(),
    };
    out.node = match out.node {
        TypeNode::Option(t) => TypeNode::Option(Box::new(rewrite_enum_type(&t, infos))),
        TypeNode::List(t) => TypeNode::List(Box::new(rewrite_enum_type(&t, infos))),
        TypeNode::Set(t) => TypeNode::Set(Box::new(rewrite_enum_type(&t, infos))),
        TypeNode::Map(k, v) => TypeNode::Map(
            Box::new(rewrite_enum_type(&k, infos)),
            Box::new(rewrite_enum_type(&v, infos)),
        ),
        TypeNode::BigMap(k, v) => TypeNode::BigMap(
            Box::new(rewrite_enum_type(&k, infos)),
            Box::new(rewrite_enum_type(&v, infos)),
        ),
        TypeNode::IterableBigMap(k, v) => TypeNode::IterableBigMap(
            Box::new(rewrite_enum_type(&k, infos)),
            Box::new(rewrite_enum_type(&v, infos)),
        ),
        TypeNode::Or(l, r) => TypeNode::Or(
            Box::new(rewrite_enum_type(&l, infos)),
            Box::new(rewrite_enum_type(&r, infos)),
        ),
        TypeNode::Contract(t) => TypeNode::Contract(Box::new(rewrite_enum_type(&t, infos))),
        TypeNode::Ticket(t) => TypeNode::Ticket(Box::new(rewrite_enum_type(&t, infos))),
        TypeNode::Lambda(a, r) => TypeNode::Lambda(
            Box::new(rewrite_enum_type(&a, infos)),
            Box::new(rewrite_enum_type(&r, infos)),
        ),
        TypeNode::Tuple(ts) => {
            TypeNode::Tuple(ts.iter().map(|t| rewrite_enum_type(t, infos)).collect())
        }
        TypeNode::Container(t, intent) => {
            TypeNode::Container(Box::new(rewrite_enum_type(&t, infos)), intent)
        }
        other => other,
    };
    out
}

fn lower_enum_terms(mt: &Mterm, infos: &[EnumInfo], names: &mut NameGen) -> Mterm {
    // Match elaboration inspects the scrutinee's original enum type, so
    // the node is handled before its children are rewritten.
    if let MtermNode::Matchwith { expr, branches } = &mt.node {
        if let Some(info) = enum_of(&expr.ty, infos) {
            let expr = lower_enum_terms(expr, infos, names);
            let branches: Vec<(Pattern, Mterm)> = branches
                .iter()
                .map(|(p, b)| (p.clone(), lower_enum_terms(b, infos, names)))
                .collect();
            let result_ty = rewrite_enum_type(&mt.ty, infos);
            return if info.simple {
                elaborate_simple_match(info, &expr, &branches, result_ty, mt.span, names)
            } else {
                elaborate_or_match(info, &expr, &branches, result_ty, mt.span, names)
            };
        }
    }

    let rebuilt = map_term_ft(
        mt,
        &mut |c| lower_enum_terms(c, infos, names),
        &mut |t| rewrite_enum_type(t, infos),
    );
    match &rebuilt.node {
        MtermNode::Enumval { id, args, enum_ } => {
            let Some(info) = infos.iter().find(|i| i.name == *enum_) else {
                return rebuilt;
            };
            let pos = info.position(id);
            if info.simple {
                Mterm::new(MtermNode::Int(pos.into()), Type::int(), rebuilt.span)
            } else {
                let payload = match args.as_slice() {
                    [] => Mterm::unit(rebuilt.span),
                    [one] => one.clone(),
                    many => Mterm::new(
                        MtermNode::Tuple(many.to_vec()),
                        Type::tuple(many.iter().map(|a| a.ty.clone()).collect()),
                        rebuilt.span,
                    ),
                };
                inject(info, 0, info.variants.len(), pos, payload, rebuilt.span)
            }
        }
        _ => rebuilt,
    }
}

fn enum_of<'a>(ty: &Type, infos: &'a [EnumInfo]) -> Option<&'a EnumInfo> {
    match &ty.node {
        TypeNode::Enum(name) => infos.iter().find(|i| i.name == *name),
        TypeNode::State => infos.iter().find(|i| i.name == "state"),
        _ => None,
    }
}

/// `match` over an integer-encoded enum: bind the scrutinee, then chain
/// `if id == <pos>` tests, wildcard last.
fn elaborate_simple_match(
    info: &EnumInfo,
    expr: &Mterm,
    branches: &[(Pattern, Mterm)],
    result_ty: Type,
    span: archetype_model::Span,
    names: &mut NameGen,
) -> Mterm {
    let tmp = names.fresh("_tmp");
    let var = Mterm::var(tmp.clone(), Type::int(), span);

    let mut tests: Vec<(usize, Mterm)> = branches
        .iter()
        .filter_map(|(p, b)| match &p.node {
            PatternNode::Const(ctor, _) => Some((info.position(ctor), b.clone())),
            PatternNode::Wild => None,
        })
        .collect();

    // The wildcard arm, or failing that the last arm, is the fallback.
    let fallback = branches
        .iter()
        .find(|(p, _)| matches!(p.node, PatternNode::Wild))
        .map(|(_, b)| b.clone())
        .unwrap_or_else(|| tests.pop().map(|(_, b)| b).expect("match with no arms"));

    let chained = tests.into_iter().rev().fold(fallback, |els, (pos, body)| {
        let cond = Mterm::new(
            MtermNode::Equal(
                Type::int(),
                Box::new(var.clone()),
                Box::new(Mterm::int(pos as i64, span)),
            ),
            Type::bool(),
            span,
        );
        Mterm::new(
            MtermNode::If {
                cond: Box::new(cond),
                then: Box::new(body),
                els: Some(Box::new(els)),
            },
            result_ty.clone(),
            span,
        )
    });

    Mterm::new(
        MtermNode::Letin {
            ids: vec![tmp],
            value: Box::new(expr.clone()),
            body: Box::new(chained),
        },
        result_ty,
        span,
    )
}

/// `match` over a sum-encoded enum: a balanced `match_or` tree mirroring
/// the type's structure.
fn elaborate_or_match(
    info: &EnumInfo,
    expr: &Mterm,
    branches: &[(Pattern, Mterm)],
    result_ty: Type,
    span: archetype_model::Span,
    names: &mut NameGen,
) -> Mterm {
    fn arm_for<'a>(
        branches: &'a [(Pattern, Mterm)],
        ctor: &str,
    ) -> (&'a [Ident], &'a Mterm) {
        for (p, b) in branches {
            match &p.node {
                PatternNode::Const(c, ids) if c == ctor => return (ids, b),
                PatternNode::Wild => return (&[], b),
                _ => {}
            }
        }
        panic!("no match arm covers constructor {ctor}")
    }

    fn build(
        info: &EnumInfo,
        lo: usize,
        hi: usize,
        scrutinee: Mterm,
        branches: &[(Pattern, Mterm)],
        result_ty: &Type,
        span: archetype_model::Span,
        names: &mut NameGen,
    ) -> Mterm {
        if hi - lo == 1 {
            let (ctor, args) = &info.variants[lo];
            let (bound, body) = arm_for(branches, ctor);
            if bound.is_empty() || args.is_empty() {
                return body.clone();
            }
            return Mterm::new(
                MtermNode::Letin {
                    ids: bound.to_vec(),
                    value: Box::new(scrutinee),
                    body: Box::new(body.clone()),
                },
                result_ty.clone(),
                span,
            );
        }
        let mid = lo + (hi - lo) / 2;
        let left_id = names.fresh("_l");
        let right_id = names.fresh("_r");
        let left_var = Mterm::var(
            left_id.clone(),
            or_tree_type(&info.variants, lo, mid),
            span,
        );
        let right_var = Mterm::var(
            right_id.clone(),
            or_tree_type(&info.variants, mid, hi),
            span,
        );
        let left = build(info, lo, mid, left_var, branches, result_ty, span, names);
        let right = build(info, mid, hi, right_var, branches, result_ty, span, names);
        Mterm::new(
            MtermNode::Matchor {
                x: Box::new(scrutinee),
                left_id,
                left: Box::new(left),
                right_id,
                right: Box::new(right),
            },
            result_ty.clone(),
            span,
        )
    }

    build(
        info,
        0,
        info.variants.len(),
        expr.clone(),
        branches,
        &result_ty,
        span,
        names,
    )
}
