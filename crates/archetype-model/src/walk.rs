//! Generic traversal combinators over terms and models.
//!
//! Every pass is built on the four operators here:
//!
//! - [`map_term`] / [`map_term_ft`] — rebuild a node applying a function
//!   to each immediate subterm (and optionally to each carried type)
//! - [`fold_term`] — fold over immediate subterms, left to right
//! - [`fold_map_term`] — rebuild while threading an accumulator
//! - [`map_mterm_model`] — visit every term position of a model under a
//!   [`Context`]
//!
//! The matches here are the single place that knows the full shape of
//! [`MtermNode`]; adding a variant breaks the build here first, which is
//! what keeps every pass exhaustive.

use crate::decl::Decl;
use crate::model::Model;
use crate::term::{
    AssignKind, CollectionKind, FailType, IterKind, Mterm, MtermNode, TransferKind,
};
use crate::types::Type;
use crate::Ident;

fn bx(m: Mterm) -> Box<Mterm> {
    Box::new(m)
}

/// Map `f` over the terms and `ft` over the types carried by a collection
/// operand.
pub fn map_ck<F, G>(ck: &CollectionKind, f: &mut F, _ft: &mut G) -> CollectionKind
where
    F: FnMut(&Mterm) -> Mterm,
    G: FnMut(&Type) -> Type,
{
    match ck {
        CollectionKind::Coll => CollectionKind::Coll,
        CollectionKind::View(v) => CollectionKind::View(bx(f(v))),
        CollectionKind::Field(an, fnm, k) => {
            CollectionKind::Field(an.clone(), fnm.clone(), bx(f(k)))
        }
    }
}

pub fn map_iter_kind<F, G>(ik: &IterKind, f: &mut F, _ft: &mut G) -> IterKind
where
    F: FnMut(&Mterm) -> Mterm,
    G: FnMut(&Type) -> Type,
{
    match ik {
        IterKind::Coll(an) => IterKind::Coll(an.clone()),
        IterKind::View(an, v) => IterKind::View(an.clone(), bx(f(v))),
        IterKind::Field(an, fnm, k) => IterKind::Field(an.clone(), fnm.clone(), bx(f(k))),
        IterKind::Set(x) => IterKind::Set(bx(f(x))),
        IterKind::List(x) => IterKind::List(bx(f(x))),
        IterKind::Map(mk, x) => IterKind::Map(*mk, bx(f(x))),
    }
}

pub fn map_assign_kind<F, G>(ak: &AssignKind, f: &mut F, _ft: &mut G) -> AssignKind
where
    F: FnMut(&Mterm) -> Mterm,
    G: FnMut(&Type) -> Type,
{
    match ak {
        AssignKind::Var(id, vk) => AssignKind::Var(id.clone(), *vk),
        AssignKind::AssetField { asset, field, key } => AssignKind::AssetField {
            asset: asset.clone(),
            field: field.clone(),
            key: bx(f(key)),
        },
        AssignKind::Record {
            lvalue,
            record,
            field,
        } => AssignKind::Record {
            lvalue: bx(f(lvalue)),
            record: record.clone(),
            field: field.clone(),
        },
        AssignKind::Tuple {
            lvalue,
            index,
            arity,
        } => AssignKind::Tuple {
            lvalue: bx(f(lvalue)),
            index: *index,
            arity: *arity,
        },
        AssignKind::State => AssignKind::State,
        AssignKind::AssetState { asset, key } => AssignKind::AssetState {
            asset: asset.clone(),
            key: bx(f(key)),
        },
        AssignKind::Operations => AssignKind::Operations,
    }
}

pub fn map_fail_type<F, G>(fail: &FailType, f: &mut F, _ft: &mut G) -> FailType
where
    F: FnMut(&Mterm) -> Mterm,
    G: FnMut(&Type) -> Type,
{
    match fail {
        FailType::Invalid(x) => FailType::Invalid(bx(f(x))),
        FailType::InvalidCondition(lbl, x) => {
            FailType::InvalidCondition(lbl.clone(), x.as_ref().map(|x| bx(f(x))))
        }
        FailType::NotFound => FailType::NotFound,
        FailType::AssetNotFound(an) => FailType::AssetNotFound(an.clone()),
        FailType::KeyExists(an) => FailType::KeyExists(an.clone()),
        FailType::KeyExistsOrNotFound(an) => FailType::KeyExistsOrNotFound(an.clone()),
        FailType::DivByZero => FailType::DivByZero,
        FailType::NatNegAssign => FailType::NatNegAssign,
        FailType::NoTransfer => FailType::NoTransfer,
        FailType::InvalidState => FailType::InvalidState,
    }
}

pub fn map_transfer_kind<F, G>(tk: &TransferKind, f: &mut F, ft: &mut G) -> TransferKind
where
    F: FnMut(&Mterm) -> Mterm,
    G: FnMut(&Type) -> Type,
{
    match tk {
        TransferKind::Simple { value, dest } => TransferKind::Simple {
            value: bx(f(value)),
            dest: bx(f(dest)),
        },
        TransferKind::Call {
            value,
            dest,
            entry_id,
            arg_type,
            arg,
        } => TransferKind::Call {
            value: bx(f(value)),
            dest: bx(f(dest)),
            entry_id: entry_id.clone(),
            arg_type: ft(arg_type),
            arg: bx(f(arg)),
        },
        TransferKind::Entry { value, entry, arg } => TransferKind::Entry {
            value: bx(f(value)),
            entry: bx(f(entry)),
            arg: bx(f(arg)),
        },
        TransferKind::Self_ {
            value,
            entry_id,
            args,
        } => TransferKind::Self_ {
            value: bx(f(value)),
            entry_id: entry_id.clone(),
            args: args.iter().map(&mut *f).collect(),
        },
        TransferKind::Operation(op) => TransferKind::Operation(bx(f(op))),
    }
}

/// Rebuild `mt` applying `f` to every immediate subterm and `ft` to every
/// carried type (including the node's own type).
pub fn map_term_ft<F, G>(mt: &Mterm, f: &mut F, ft: &mut G) -> Mterm
where
    F: FnMut(&Mterm) -> Mterm,
    G: FnMut(&Type) -> Type,
{
    use MtermNode::*;
    let node = match &mt.node {
        // === Bindings ===
        Letin { ids, value, body } => Letin {
            ids: ids.clone(),
            value: bx(f(value)),
            body: bx(f(body)),
        },
        Declvar {
            ids,
            typ,
            value,
            constant,
        } => Declvar {
            ids: ids.clone(),
            typ: typ.as_ref().map(&mut *ft),
            value: bx(f(value)),
            constant: *constant,
        },
        Declvaropt {
            ids,
            typ,
            value,
            fail,
            constant,
        } => Declvaropt {
            ids: ids.clone(),
            typ: typ.as_ref().map(&mut *ft),
            value: bx(f(value)),
            fail: fail.as_ref().map(|x| bx(f(x))),
            constant: *constant,
        },
        App { id, args } => App {
            id: id.clone(),
            args: args.iter().map(&mut *f).collect(),
        },
        Lambda {
            arg_id,
            arg_type,
            ret_type,
            body,
        } => Lambda {
            arg_id: arg_id.clone(),
            arg_type: ft(arg_type),
            ret_type: ft(ret_type),
            body: bx(f(body)),
        },

        // === Assignments ===
        Assign {
            op,
            typ,
            kind,
            value,
        } => Assign {
            op: *op,
            typ: ft(typ),
            kind: map_assign_kind(kind, f, ft),
            value: bx(f(value)),
        },
        Assignopt {
            kind,
            typ,
            value,
            fail,
        } => Assignopt {
            kind: map_assign_kind(kind, f, ft),
            typ: ft(typ),
            value: bx(f(value)),
            fail: bx(f(fail)),
        },

        // === Control flow ===
        If { cond, then, els } => If {
            cond: bx(f(cond)),
            then: bx(f(then)),
            els: els.as_ref().map(|x| bx(f(x))),
        },
        Matchwith { expr, branches } => Matchwith {
            expr: bx(f(expr)),
            branches: branches
                .iter()
                .map(|(p, b)| (p.clone(), f(b)))
                .collect(),
        },
        Matchoption {
            x,
            some_id,
            some,
            none,
        } => Matchoption {
            x: bx(f(x)),
            some_id: some_id.clone(),
            some: bx(f(some)),
            none: bx(f(none)),
        },
        Matchor {
            x,
            left_id,
            left,
            right_id,
            right,
        } => Matchor {
            x: bx(f(x)),
            left_id: left_id.clone(),
            left: bx(f(left)),
            right_id: right_id.clone(),
            right: bx(f(right)),
        },
        Matchlist {
            x,
            head_id,
            tail_id,
            cons,
            nil,
        } => Matchlist {
            x: bx(f(x)),
            head_id: head_id.clone(),
            tail_id: tail_id.clone(),
            cons: bx(f(cons)),
            nil: bx(f(nil)),
        },
        For {
            ids,
            coll,
            body,
            label,
        } => For {
            ids: ids.clone(),
            coll: map_iter_kind(coll, f, ft),
            body: bx(f(body)),
            label: label.clone(),
        },
        Iter {
            id,
            from,
            to,
            body,
            label,
            nat,
        } => Iter {
            id: id.clone(),
            from: bx(f(from)),
            to: bx(f(to)),
            body: bx(f(body)),
            label: label.clone(),
            nat: *nat,
        },
        While { cond, body, label } => While {
            cond: bx(f(cond)),
            body: bx(f(body)),
            label: label.clone(),
        },
        Seq(instrs) => Seq(instrs.iter().map(&mut *f).collect()),
        Return(x) => Return(bx(f(x))),
        Label(id) => Label(id.clone()),
        Mark(id, x) => Mark(id.clone(), bx(f(x))),

        // === Effects ===
        Fail(ftype) => Fail(map_fail_type(ftype, f, ft)),
        Failsome(x) => Failsome(bx(f(x))),
        Transfer(tk) => Transfer(map_transfer_kind(tk, f, ft)),
        Emit { event, value } => Emit {
            event: event.clone(),
            value: bx(f(value)),
        },
        Makeoperation { value, entry, arg } => Makeoperation {
            value: bx(f(value)),
            entry: bx(f(entry)),
            arg: bx(f(arg)),
        },

        // === Entry-point interop ===
        Entrypoint {
            arg_type,
            id,
            addr,
            err,
        } => Entrypoint {
            arg_type: ft(arg_type),
            id: id.clone(),
            addr: bx(f(addr)),
            err: err.as_ref().map(|x| bx(f(x))),
        },
        Callview {
            ret_type,
            addr,
            view,
            arg,
        } => Callview {
            ret_type: ft(ret_type),
            addr: bx(f(addr)),
            view: view.clone(),
            arg: bx(f(arg)),
        },

        // === Literals ===
        Unit => Unit,
        Bool(v) => Bool(*v),
        Int(v) => Int(v.clone()),
        Nat(v) => Nat(v.clone()),
        Rational(n, d) => Rational(n.clone(), d.clone()),
        String(v) => String(v.clone()),
        Currency(v, u) => Currency(v.clone(), *u),
        Address(v) => Address(v.clone()),
        Date(v) => Date(*v),
        Duration(v) => Duration(*v),
        Timestamp(v) => Timestamp(*v),
        Bytes(v) => Bytes(v.clone()),
        None_ => None_,
        Some_(x) => Some_(bx(f(x))),
        Tuple(xs) => Tuple(xs.iter().map(&mut *f).collect()),
        Asset(xs) => Asset(xs.iter().map(&mut *f).collect()),
        Assets(xs) => Assets(xs.iter().map(&mut *f).collect()),
        Litset(xs) => Litset(xs.iter().map(&mut *f).collect()),
        Litlist(xs) => Litlist(xs.iter().map(&mut *f).collect()),
        Litmap(mk, kvs) => Litmap(*mk, kvs.iter().map(|(k, v)| (f(k), f(v))).collect()),
        Litrecord(fs) => Litrecord(fs.iter().map(|(n, v)| (n.clone(), f(v))).collect()),
        Litevent(fs) => Litevent(fs.iter().map(|(n, v)| (n.clone(), f(v))).collect()),
        Enumval { id, args, enum_ } => Enumval {
            id: id.clone(),
            args: args.iter().map(&mut *f).collect(),
            enum_: enum_.clone(),
        },

        // === Access ===
        Var { id, kind } => Var {
            id: id.clone(),
            kind: *kind,
        },
        Assetstate { asset, key } => Assetstate {
            asset: asset.clone(),
            key: bx(f(key)),
        },
        Dot { expr, field } => Dot {
            expr: bx(f(expr)),
            field: field.clone(),
        },
        Dotassetfield { asset, key, field } => Dotassetfield {
            asset: asset.clone(),
            key: bx(f(key)),
            field: field.clone(),
        },
        Questionoption { x, field } => Questionoption {
            x: bx(f(x)),
            field: field.clone(),
        },
        Tupleaccess { x, index } => Tupleaccess {
            x: bx(f(x)),
            index: *index,
        },
        Recupdate { x, fields } => Recupdate {
            x: bx(f(x)),
            fields: fields.iter().map(|(n, v)| (n.clone(), f(v))).collect(),
        },
        Makeasset { asset, key, value } => Makeasset {
            asset: asset.clone(),
            key: bx(f(key)),
            value: bx(f(value)),
        },
        Tocontainer(an) => Tocontainer(an.clone()),

        // === Comparison ===
        Equal(t, l, r) => Equal(ft(t), bx(f(l)), bx(f(r))),
        Nequal(t, l, r) => Nequal(ft(t), bx(f(l)), bx(f(r))),
        Gt(l, r) => Gt(bx(f(l)), bx(f(r))),
        Ge(l, r) => Ge(bx(f(l)), bx(f(r))),
        Lt(l, r) => Lt(bx(f(l)), bx(f(r))),
        Le(l, r) => Le(bx(f(l)), bx(f(r))),
        ThreeWayCmp(l, r) => ThreeWayCmp(bx(f(l)), bx(f(r))),

        // === Booleans ===
        And(l, r) => And(bx(f(l)), bx(f(r))),
        Or(l, r) => Or(bx(f(l)), bx(f(r))),
        Xor(l, r) => Xor(bx(f(l)), bx(f(r))),
        Not(x) => Not(bx(f(x))),

        // === Arithmetic ===
        Plus(l, r) => Plus(bx(f(l)), bx(f(r))),
        Minus(l, r) => Minus(bx(f(l)), bx(f(r))),
        Mult(l, r) => Mult(bx(f(l)), bx(f(r))),
        DivEuc(l, r) => DivEuc(bx(f(l)), bx(f(r))),
        Modulo(l, r) => Modulo(bx(f(l)), bx(f(r))),
        DivMod(l, r) => DivMod(bx(f(l)), bx(f(r))),
        Uminus(x) => Uminus(bx(f(x))),
        ShiftLeft(l, r) => ShiftLeft(bx(f(l)), bx(f(r))),
        ShiftRight(l, r) => ShiftRight(bx(f(l)), bx(f(r))),
        Ternarybool { cond, then, els } => Ternarybool {
            cond: bx(f(cond)),
            then: bx(f(then)),
            els: bx(f(els)),
        },
        Ternaryoption { opt, some, none } => Ternaryoption {
            opt: bx(f(opt)),
            some: bx(f(some)),
            none: bx(f(none)),
        },

        // === Asset API: effects ===
        Addasset { asset, inst } => Addasset {
            asset: asset.clone(),
            inst: bx(f(inst)),
        },
        Putsingleasset { asset, inst } => Putsingleasset {
            asset: asset.clone(),
            inst: bx(f(inst)),
        },
        Putremove { asset, key, value } => Putremove {
            asset: asset.clone(),
            key: bx(f(key)),
            value: bx(f(value)),
        },
        Addfield {
            asset,
            field,
            key,
            value,
        } => Addfield {
            asset: asset.clone(),
            field: field.clone(),
            key: bx(f(key)),
            value: bx(f(value)),
        },
        Removeasset { asset, key } => Removeasset {
            asset: asset.clone(),
            key: bx(f(key)),
        },
        Removefield {
            asset,
            field,
            key,
            value,
        } => Removefield {
            asset: asset.clone(),
            field: field.clone(),
            key: bx(f(key)),
            value: bx(f(value)),
        },
        Removeall { asset, container } => Removeall {
            asset: asset.clone(),
            container: map_ck(container, f, ft),
        },
        Removeif {
            asset,
            container,
            args,
            body,
        } => Removeif {
            asset: asset.clone(),
            container: map_ck(container, f, ft),
            args: args.iter().map(|(n, t)| (n.clone(), ft(t))).collect(),
            body: bx(f(body)),
        },
        Clear { asset, container } => Clear {
            asset: asset.clone(),
            container: map_ck(container, f, ft),
        },
        Update {
            asset,
            key,
            updates,
        } => Update {
            asset: asset.clone(),
            key: bx(f(key)),
            updates: updates
                .iter()
                .map(|(n, op, v)| (n.clone(), *op, f(v)))
                .collect(),
        },
        Updateall {
            asset,
            container,
            updates,
        } => Updateall {
            asset: asset.clone(),
            container: map_ck(container, f, ft),
            updates: updates
                .iter()
                .map(|(n, op, v)| (n.clone(), *op, f(v)))
                .collect(),
        },
        Addupdate {
            asset,
            container,
            key,
            updates,
        } => Addupdate {
            asset: asset.clone(),
            container: map_ck(container, f, ft),
            key: bx(f(key)),
            updates: updates
                .iter()
                .map(|(n, op, v)| (n.clone(), *op, f(v)))
                .collect(),
        },
        Set { asset, key, value } => Set {
            asset: asset.clone(),
            key: bx(f(key)),
            value: bx(f(value)),
        },

        // === Asset API: expressions ===
        Get {
            asset,
            container,
            key,
        } => Get {
            asset: asset.clone(),
            container: map_ck(container, f, ft),
            key: bx(f(key)),
        },
        Getsome {
            asset,
            container,
            key,
        } => Getsome {
            asset: asset.clone(),
            container: map_ck(container, f, ft),
            key: bx(f(key)),
        },
        Select {
            asset,
            container,
            args,
            body,
        } => Select {
            asset: asset.clone(),
            container: map_ck(container, f, ft),
            args: args.iter().map(|(n, t)| (n.clone(), ft(t))).collect(),
            body: bx(f(body)),
        },
        Sort {
            asset,
            container,
            criteria,
        } => Sort {
            asset: asset.clone(),
            container: map_ck(container, f, ft),
            criteria: criteria.clone(),
        },
        Contains {
            asset,
            container,
            key,
        } => Contains {
            asset: asset.clone(),
            container: map_ck(container, f, ft),
            key: bx(f(key)),
        },
        Nth {
            asset,
            container,
            index,
        } => Nth {
            asset: asset.clone(),
            container: map_ck(container, f, ft),
            index: bx(f(index)),
        },
        Count { asset, container } => Count {
            asset: asset.clone(),
            container: map_ck(container, f, ft),
        },
        Sum {
            asset,
            container,
            body,
        } => Sum {
            asset: asset.clone(),
            container: map_ck(container, f, ft),
            body: bx(f(body)),
        },
        Head {
            asset,
            container,
            count,
        } => Head {
            asset: asset.clone(),
            container: map_ck(container, f, ft),
            count: bx(f(count)),
        },
        Tail {
            asset,
            container,
            count,
        } => Tail {
            asset: asset.clone(),
            container: map_ck(container, f, ft),
            count: bx(f(count)),
        },

        // === Primitive sets ===
        Setadd(t, s, e) => Setadd(ft(t), bx(f(s)), bx(f(e))),
        Setremove(t, s, e) => Setremove(ft(t), bx(f(s)), bx(f(e))),
        Setcontains(t, s, e) => Setcontains(ft(t), bx(f(s)), bx(f(e))),
        Setlength(t, s) => Setlength(ft(t), bx(f(s))),
        Setfold {
            elem_type,
            elem_id,
            acc_id,
            coll,
            init,
            body,
        } => Setfold {
            elem_type: ft(elem_type),
            elem_id: elem_id.clone(),
            acc_id: acc_id.clone(),
            coll: bx(f(coll)),
            init: bx(f(init)),
            body: bx(f(body)),
        },
        Setinstradd(t, ak, e) => Setinstradd(ft(t), map_assign_kind(ak, f, ft), bx(f(e))),
        Setinstrremove(t, ak, e) => Setinstrremove(ft(t), map_assign_kind(ak, f, ft), bx(f(e))),

        // === Primitive lists ===
        Listprepend(t, l, e) => Listprepend(ft(t), bx(f(l)), bx(f(e))),
        Listlength(t, l) => Listlength(ft(t), bx(f(l))),
        Listcontains(t, l, e) => Listcontains(ft(t), bx(f(l)), bx(f(e))),
        Listnth(t, l, n) => Listnth(ft(t), bx(f(l)), bx(f(n))),
        Listreverse(t, l) => Listreverse(ft(t), bx(f(l))),
        Listconcat(t, l, r) => Listconcat(ft(t), bx(f(l)), bx(f(r))),
        Listfold {
            elem_type,
            elem_id,
            acc_id,
            coll,
            init,
            body,
        } => Listfold {
            elem_type: ft(elem_type),
            elem_id: elem_id.clone(),
            acc_id: acc_id.clone(),
            coll: bx(f(coll)),
            init: bx(f(init)),
            body: bx(f(body)),
        },
        Listinstrprepend(t, ak, e) => Listinstrprepend(ft(t), map_assign_kind(ak, f, ft), bx(f(e))),
        Listinstrconcat(t, ak, e) => Listinstrconcat(ft(t), map_assign_kind(ak, f, ft), bx(f(e))),

        // === Primitive maps ===
        Mapput {
            mk,
            key_type,
            value_type,
            map,
            key,
            value,
        } => Mapput {
            mk: *mk,
            key_type: ft(key_type),
            value_type: ft(value_type),
            map: bx(f(map)),
            key: bx(f(key)),
            value: bx(f(value)),
        },
        Mapremove {
            mk,
            key_type,
            value_type,
            map,
            key,
        } => Mapremove {
            mk: *mk,
            key_type: ft(key_type),
            value_type: ft(value_type),
            map: bx(f(map)),
            key: bx(f(key)),
        },
        Mapupdate {
            mk,
            key_type,
            value_type,
            map,
            key,
            value,
        } => Mapupdate {
            mk: *mk,
            key_type: ft(key_type),
            value_type: ft(value_type),
            map: bx(f(map)),
            key: bx(f(key)),
            value: bx(f(value)),
        },
        Mapget {
            mk,
            key_type,
            value_type,
            map,
            key,
            asset,
        } => Mapget {
            mk: *mk,
            key_type: ft(key_type),
            value_type: ft(value_type),
            map: bx(f(map)),
            key: bx(f(key)),
            asset: asset.clone(),
        },
        Mapgetopt {
            mk,
            key_type,
            value_type,
            map,
            key,
        } => Mapgetopt {
            mk: *mk,
            key_type: ft(key_type),
            value_type: ft(value_type),
            map: bx(f(map)),
            key: bx(f(key)),
        },
        Mapcontains {
            mk,
            key_type,
            value_type,
            map,
            key,
        } => Mapcontains {
            mk: *mk,
            key_type: ft(key_type),
            value_type: ft(value_type),
            map: bx(f(map)),
            key: bx(f(key)),
        },
        Maplength {
            mk,
            key_type,
            value_type,
            map,
        } => Maplength {
            mk: *mk,
            key_type: ft(key_type),
            value_type: ft(value_type),
            map: bx(f(map)),
        },
        Mapfold {
            mk,
            key_type,
            key_id,
            value_id,
            acc_id,
            map,
            init,
            body,
        } => Mapfold {
            mk: *mk,
            key_type: ft(key_type),
            key_id: key_id.clone(),
            value_id: value_id.clone(),
            acc_id: acc_id.clone(),
            map: bx(f(map)),
            init: bx(f(init)),
            body: bx(f(body)),
        },
        Mapinstrput {
            mk,
            key_type,
            value_type,
            lvalue,
            key,
            value,
        } => Mapinstrput {
            mk: *mk,
            key_type: ft(key_type),
            value_type: ft(value_type),
            lvalue: map_assign_kind(lvalue, f, ft),
            key: bx(f(key)),
            value: bx(f(value)),
        },
        Mapinstrremove {
            mk,
            key_type,
            value_type,
            lvalue,
            key,
        } => Mapinstrremove {
            mk: *mk,
            key_type: ft(key_type),
            value_type: ft(value_type),
            lvalue: map_assign_kind(lvalue, f, ft),
            key: bx(f(key)),
        },
        Mapinstrupdate {
            mk,
            key_type,
            value_type,
            lvalue,
            key,
            value,
        } => Mapinstrupdate {
            mk: *mk,
            key_type: ft(key_type),
            value_type: ft(value_type),
            lvalue: map_assign_kind(lvalue, f, ft),
            key: bx(f(key)),
            value: bx(f(value)),
        },

        // === Builtins ===
        Min(l, r) => Min(bx(f(l)), bx(f(r))),
        Max(l, r) => Max(bx(f(l)), bx(f(r))),
        Abs(x) => Abs(bx(f(x))),
        Concat(l, r) => Concat(bx(f(l)), bx(f(r))),
        Concatlist(x) => Concatlist(bx(f(x))),
        Slice(x, s, e) => Slice(bx(f(x)), bx(f(s)), bx(f(e))),
        Length(x) => Length(bx(f(x))),
        Issome(x) => Issome(bx(f(x))),
        Isnone(x) => Isnone(bx(f(x))),
        Optget(x) => Optget(bx(f(x))),
        IntToNat(x) => IntToNat(bx(f(x))),
        Floor(x) => Floor(bx(f(x))),
        Ceil(x) => Ceil(bx(f(x))),
        NatToString(x) => NatToString(bx(f(x))),
        Pack(x) => Pack(bx(f(x))),
        Unpack(t, x) => Unpack(ft(t), bx(f(x))),
        Setdelegate(x) => Setdelegate(bx(f(x))),
        Execlambda(l, a) => Execlambda(bx(f(l)), bx(f(a))),
        Applylambda(l, a) => Applylambda(bx(f(l)), bx(f(a))),

        // === Crypto ===
        Blake2b(x) => Blake2b(bx(f(x))),
        Sha256(x) => Sha256(bx(f(x))),
        Sha512(x) => Sha512(bx(f(x))),
        Sha3(x) => Sha3(bx(f(x))),
        Keccak(x) => Keccak(bx(f(x))),
        KeyToKeyHash(x) => KeyToKeyHash(bx(f(x))),
        CheckSignature {
            key,
            signature,
            data,
        } => CheckSignature {
            key: bx(f(key)),
            signature: bx(f(signature)),
            data: bx(f(data)),
        },

        // === Voting ===
        TotalVotingPower => TotalVotingPower,
        VotingPower(x) => VotingPower(bx(f(x))),

        // === Tickets ===
        CreateTicket { value, amount } => CreateTicket {
            value: bx(f(value)),
            amount: bx(f(amount)),
        },
        ReadTicket(x) => ReadTicket(bx(f(x))),
        SplitTicket { ticket, amounts } => SplitTicket {
            ticket: bx(f(ticket)),
            amounts: bx(f(amounts)),
        },
        JoinTickets(x) => JoinTickets(bx(f(x))),

        // === Sapling ===
        SaplingEmptyState(n) => SaplingEmptyState(*n),
        SaplingVerifyUpdate { state, tx } => SaplingVerifyUpdate {
            state: bx(f(state)),
            tx: bx(f(tx)),
        },

        // === BLS ===
        PairingCheck(x) => PairingCheck(bx(f(x))),

        // === Timelock ===
        OpenChest {
            chest_key,
            chest,
            time,
        } => OpenChest {
            chest_key: bx(f(chest_key)),
            chest: bx(f(chest)),
            time: bx(f(time)),
        },

        // === Context constants ===
        Now => Now,
        Transferred => Transferred,
        Caller => Caller,
        Balance => Balance,
        Source => Source,
        SelfAddress => SelfAddress,
        SelfChainId => SelfChainId,
        Metadata => Metadata,
        Level => Level,
        MinBlockTime => MinBlockTime,
        Operations => Operations,

        // === Rationals ===
        Rateq(l, r) => Rateq(bx(f(l)), bx(f(r))),
        Ratcmp(op, l, r) => Ratcmp(*op, bx(f(l)), bx(f(r))),
        Ratarith(op, l, r) => Ratarith(*op, bx(f(l)), bx(f(r))),
        Ratuminus(x) => Ratuminus(bx(f(x))),
        Rattez(r, t) => Rattez(bx(f(r)), bx(f(t))),
        Ratdur(r, d) => Ratdur(bx(f(r)), bx(f(d))),
        NatToInt(x) => NatToInt(bx(f(x))),
        NatToRat(x) => NatToRat(bx(f(x))),
        IntToRat(x) => IntToRat(bx(f(x))),
        IntToDate(x) => IntToDate(bx(f(x))),
        MutezToNat(x) => MutezToNat(bx(f(x))),

        // === Utilities ===
        Cast(src, dst, x) => Cast(ft(src), ft(dst), bx(f(x))),
        Left(t, x) => Left(ft(t), bx(f(x))),
        Right(t, x) => Right(ft(t), bx(f(x))),

        // === Formulas ===
        Forall {
            id,
            typ,
            coll,
            body,
        } => Forall {
            id: id.clone(),
            typ: ft(typ),
            coll: coll.as_ref().map(|x| bx(f(x))),
            body: bx(f(body)),
        },
        Exists {
            id,
            typ,
            coll,
            body,
        } => Exists {
            id: id.clone(),
            typ: ft(typ),
            coll: coll.as_ref().map(|x| bx(f(x))),
            body: bx(f(body)),
        },
        Imply(l, r) => Imply(bx(f(l)), bx(f(r))),
        Equiv(l, r) => Equiv(bx(f(l)), bx(f(r))),
        Setiterated(ck) => Setiterated(map_ck(ck, f, ft)),
        Settoiterate(ck) => Settoiterate(map_ck(ck, f, ft)),
        Empty(t) => Empty(ft(t)),
        Singleton(t, x) => Singleton(ft(t), bx(f(x))),
        SubsetOf(t, l, r) => SubsetOf(ft(t), bx(f(l)), bx(f(r))),
        IsEmpty(t, x) => IsEmpty(ft(t), bx(f(x))),
        Union(t, l, r) => Union(ft(t), bx(f(l)), bx(f(r))),
        Inter(t, l, r) => Inter(ft(t), bx(f(l)), bx(f(r))),
        Diff(t, l, r) => Diff(ft(t), bx(f(l)), bx(f(r))),
    };

    Mterm {
        node,
        ty: ft(&mt.ty),
        span: mt.span,
    }
}

/// Rebuild `mt` applying `f` to every immediate subterm.
pub fn map_term<F>(mt: &Mterm, f: &mut F) -> Mterm
where
    F: FnMut(&Mterm) -> Mterm,
{
    map_term_ft(mt, f, &mut |t: &Type| t.clone())
}

/// Collect references to the immediate subterms of `mt`, left to right.
pub fn subterms<'a>(mt: &'a Mterm, out: &mut Vec<&'a Mterm>) {
    collect_subterms(mt, out);
}

fn collect_subterms<'a>(mt: &'a Mterm, out: &mut Vec<&'a Mterm>) {
    use MtermNode::*;

    fn ck<'a>(c: &'a CollectionKind, out: &mut Vec<&'a Mterm>) {
        match c {
            CollectionKind::Coll => {}
            CollectionKind::View(v) => out.push(v),
            CollectionKind::Field(_, _, k) => out.push(k),
        }
    }

    fn ak<'a>(a: &'a AssignKind, out: &mut Vec<&'a Mterm>) {
        match a {
            AssignKind::Var(..) | AssignKind::State | AssignKind::Operations => {}
            AssignKind::AssetField { key, .. } | AssignKind::AssetState { key, .. } => {
                out.push(key)
            }
            AssignKind::Record { lvalue, .. } | AssignKind::Tuple { lvalue, .. } => {
                out.push(lvalue)
            }
        }
    }

    match &mt.node {
        Letin { value, body, .. } => out.extend([value.as_ref(), body.as_ref()]),
        Declvar { value, .. } => out.push(value),
        Declvaropt { value, fail, .. } => {
            out.push(value);
            out.extend(fail.iter().map(|x| x.as_ref()));
        }
        App { args, .. } => out.extend(args.iter()),
        Lambda { body, .. } => out.push(body),
        Assign { kind, value, .. } => {
            ak(kind, out);
            out.push(value);
        }
        Assignopt {
            kind, value, fail, ..
        } => {
            ak(kind, out);
            out.extend([value.as_ref(), fail.as_ref()]);
        }
        If { cond, then, els } => {
            out.extend([cond.as_ref(), then.as_ref()]);
            out.extend(els.iter().map(|x| x.as_ref()));
        }
        Matchwith { expr, branches } => {
            out.push(expr);
            out.extend(branches.iter().map(|(_, b)| b));
        }
        Matchoption { x, some, none, .. } => {
            out.extend([x.as_ref(), some.as_ref(), none.as_ref()])
        }
        Matchor {
            x, left, right, ..
        } => out.extend([x.as_ref(), left.as_ref(), right.as_ref()]),
        Matchlist { x, cons, nil, .. } => out.extend([x.as_ref(), cons.as_ref(), nil.as_ref()]),
        For { coll, body, .. } => {
            match coll {
                IterKind::Coll(_) => {}
                IterKind::View(_, v) => out.push(v),
                IterKind::Field(_, _, k) => out.push(k),
                IterKind::Set(x) | IterKind::List(x) | IterKind::Map(_, x) => out.push(x),
            }
            out.push(body);
        }
        Iter { from, to, body, .. } => out.extend([from.as_ref(), to.as_ref(), body.as_ref()]),
        While { cond, body, .. } => out.extend([cond.as_ref(), body.as_ref()]),
        Seq(instrs) => out.extend(instrs.iter()),
        Return(x) => out.push(x),
        Label(_) => {}
        Mark(_, x) => out.push(x),
        Fail(ftype) => match ftype {
            FailType::Invalid(x) => out.push(x),
            FailType::InvalidCondition(_, x) => out.extend(x.iter().map(|x| x.as_ref())),
            _ => {}
        },
        Failsome(x) => out.push(x),
        Transfer(tk) => match tk {
            TransferKind::Simple { value, dest } => out.extend([value.as_ref(), dest.as_ref()]),
            TransferKind::Call {
                value, dest, arg, ..
            } => out.extend([value.as_ref(), dest.as_ref(), arg.as_ref()]),
            TransferKind::Entry { value, entry, arg } => {
                out.extend([value.as_ref(), entry.as_ref(), arg.as_ref()])
            }
            TransferKind::Self_ { value, args, .. } => {
                out.push(value);
                out.extend(args.iter());
            }
            TransferKind::Operation(op) => out.push(op),
        },
        Emit { value, .. } => out.push(value),
        Makeoperation { value, entry, arg } => {
            out.extend([value.as_ref(), entry.as_ref(), arg.as_ref()])
        }
        Entrypoint { addr, err, .. } => {
            out.push(addr);
            out.extend(err.iter().map(|x| x.as_ref()));
        }
        Callview { addr, arg, .. } => out.extend([addr.as_ref(), arg.as_ref()]),
        Unit | Bool(_) | Int(_) | Nat(_) | Rational(..) | String(_) | Currency(..)
        | Address(_) | Date(_) | Duration(_) | Timestamp(_) | Bytes(_) | None_ => {}
        Some_(x) => out.push(x),
        Tuple(xs) | Asset(xs) | Assets(xs) | Litset(xs) | Litlist(xs) => out.extend(xs.iter()),
        Litmap(_, kvs) => {
            for (k, v) in kvs {
                out.push(k);
                out.push(v);
            }
        }
        Litrecord(fs) | Litevent(fs) => out.extend(fs.iter().map(|(_, v)| v)),
        Enumval { args, .. } => out.extend(args.iter()),
        Var { .. } => {}
        Assetstate { key, .. } => out.push(key),
        Dot { expr, .. } => out.push(expr),
        Dotassetfield { key, .. } => out.push(key),
        Questionoption { x, .. } => out.push(x),
        Tupleaccess { x, .. } => out.push(x),
        Recupdate { x, fields } => {
            out.push(x);
            out.extend(fields.iter().map(|(_, v)| v));
        }
        Makeasset { key, value, .. } => out.extend([key.as_ref(), value.as_ref()]),
        Tocontainer(_) => {}
        Equal(_, l, r) | Nequal(_, l, r) => out.extend([l.as_ref(), r.as_ref()]),
        Gt(l, r) | Ge(l, r) | Lt(l, r) | Le(l, r) | ThreeWayCmp(l, r) => {
            out.extend([l.as_ref(), r.as_ref()])
        }
        And(l, r) | Or(l, r) | Xor(l, r) => out.extend([l.as_ref(), r.as_ref()]),
        Not(x) => out.push(x),
        Plus(l, r) | Minus(l, r) | Mult(l, r) | DivEuc(l, r) | Modulo(l, r) | DivMod(l, r)
        | ShiftLeft(l, r) | ShiftRight(l, r) => out.extend([l.as_ref(), r.as_ref()]),
        Uminus(x) => out.push(x),
        Ternarybool { cond, then, els } => {
            out.extend([cond.as_ref(), then.as_ref(), els.as_ref()])
        }
        Ternaryoption { opt, some, none } => {
            out.extend([opt.as_ref(), some.as_ref(), none.as_ref()])
        }
        Addasset { inst, .. } | Putsingleasset { inst, .. } => out.push(inst),
        Putremove { key, value, .. } => out.extend([key.as_ref(), value.as_ref()]),
        Addfield { key, value, .. } | Removefield { key, value, .. } => {
            out.extend([key.as_ref(), value.as_ref()])
        }
        Removeasset { key, .. } => out.push(key),
        Removeall { container, .. } | Clear { container, .. } => ck(container, out),
        Removeif {
            container, body, ..
        } => {
            ck(container, out);
            out.push(body);
        }
        Update { key, updates, .. } => {
            out.push(key);
            out.extend(updates.iter().map(|(_, _, v)| v));
        }
        Updateall {
            container, updates, ..
        } => {
            ck(container, out);
            out.extend(updates.iter().map(|(_, _, v)| v));
        }
        Addupdate {
            container,
            key,
            updates,
            ..
        } => {
            ck(container, out);
            out.push(key);
            out.extend(updates.iter().map(|(_, _, v)| v));
        }
        Set { key, value, .. } => out.extend([key.as_ref(), value.as_ref()]),
        Get { container, key, .. }
        | Getsome { container, key, .. }
        | Contains { container, key, .. } => {
            ck(container, out);
            out.push(key);
        }
        Select {
            container, body, ..
        } => {
            ck(container, out);
            out.push(body);
        }
        Sort { container, .. } => ck(container, out),
        Nth {
            container, index, ..
        } => {
            ck(container, out);
            out.push(index);
        }
        Count { container, .. } => ck(container, out),
        Sum {
            container, body, ..
        } => {
            ck(container, out);
            out.push(body);
        }
        Head {
            container, count, ..
        }
        | Tail {
            container, count, ..
        } => {
            ck(container, out);
            out.push(count);
        }
        Setadd(_, s, e) | Setremove(_, s, e) | Setcontains(_, s, e) => {
            out.extend([s.as_ref(), e.as_ref()])
        }
        Setlength(_, s) => out.push(s),
        Setfold {
            coll, init, body, ..
        }
        | Listfold {
            coll, init, body, ..
        } => out.extend([coll.as_ref(), init.as_ref(), body.as_ref()]),
        Setinstradd(_, a, e) | Setinstrremove(_, a, e) => {
            ak(a, out);
            out.push(e);
        }
        Listprepend(_, l, e) | Listcontains(_, l, e) | Listnth(_, l, e)
        | Listconcat(_, l, e) => out.extend([l.as_ref(), e.as_ref()]),
        Listlength(_, l) | Listreverse(_, l) => out.push(l),
        Listinstrprepend(_, a, e) | Listinstrconcat(_, a, e) => {
            ak(a, out);
            out.push(e);
        }
        Mapput {
            map, key, value, ..
        }
        | Mapupdate {
            map, key, value, ..
        } => out.extend([map.as_ref(), key.as_ref(), value.as_ref()]),
        Mapremove { map, key, .. }
        | Mapget { map, key, .. }
        | Mapgetopt { map, key, .. }
        | Mapcontains { map, key, .. } => out.extend([map.as_ref(), key.as_ref()]),
        Maplength { map, .. } => out.push(map),
        Mapfold {
            map, init, body, ..
        } => out.extend([map.as_ref(), init.as_ref(), body.as_ref()]),
        Mapinstrput {
            lvalue, key, value, ..
        }
        | Mapinstrupdate {
            lvalue, key, value, ..
        } => {
            ak(lvalue, out);
            out.extend([key.as_ref(), value.as_ref()]);
        }
        Mapinstrremove { lvalue, key, .. } => {
            ak(lvalue, out);
            out.push(key);
        }
        Min(l, r) | Max(l, r) | Concat(l, r) => out.extend([l.as_ref(), r.as_ref()]),
        Abs(x) | Concatlist(x) | Length(x) | Issome(x) | Isnone(x) | Optget(x)
        | IntToNat(x) | Floor(x) | Ceil(x) | NatToString(x) | Pack(x) | Setdelegate(x) => {
            out.push(x)
        }
        Slice(x, s, e) => out.extend([x.as_ref(), s.as_ref(), e.as_ref()]),
        Unpack(_, x) => out.push(x),
        Execlambda(l, a) | Applylambda(l, a) => out.extend([l.as_ref(), a.as_ref()]),
        Blake2b(x) | Sha256(x) | Sha512(x) | Sha3(x) | Keccak(x) | KeyToKeyHash(x) => {
            out.push(x)
        }
        CheckSignature {
            key,
            signature,
            data,
        } => out.extend([key.as_ref(), signature.as_ref(), data.as_ref()]),
        TotalVotingPower => {}
        VotingPower(x) => out.push(x),
        CreateTicket { value, amount } => out.extend([value.as_ref(), amount.as_ref()]),
        ReadTicket(x) | JoinTickets(x) => out.push(x),
        SplitTicket { ticket, amounts } => out.extend([ticket.as_ref(), amounts.as_ref()]),
        SaplingEmptyState(_) => {}
        SaplingVerifyUpdate { state, tx } => out.extend([state.as_ref(), tx.as_ref()]),
        PairingCheck(x) => out.push(x),
        OpenChest {
            chest_key,
            chest,
            time,
        } => out.extend([chest_key.as_ref(), chest.as_ref(), time.as_ref()]),
        Now | Transferred | Caller | Balance | Source | SelfAddress | SelfChainId | Metadata
        | Level | MinBlockTime | Operations => {}
        Rateq(l, r) | Ratcmp(_, l, r) | Ratarith(_, l, r) | Rattez(l, r) | Ratdur(l, r) => {
            out.extend([l.as_ref(), r.as_ref()])
        }
        Ratuminus(x) | NatToInt(x) | NatToRat(x) | IntToRat(x) | IntToDate(x)
        | MutezToNat(x) => out.push(x),
        Cast(_, _, x) | Left(_, x) | Right(_, x) => out.push(x),
        Forall { coll, body, .. } | Exists { coll, body, .. } => {
            out.extend(coll.iter().map(|x| x.as_ref()));
            out.push(body);
        }
        Imply(l, r) | Equiv(l, r) => out.extend([l.as_ref(), r.as_ref()]),
        Setiterated(c) | Settoiterate(c) => ck(c, out),
        Empty(_) => {}
        Singleton(_, x) | IsEmpty(_, x) => out.push(x),
        SubsetOf(_, l, r) | Union(_, l, r) | Inter(_, l, r) | Diff(_, l, r) => {
            out.extend([l.as_ref(), r.as_ref()])
        }
    }
}

/// Fold `f` over the immediate subterms of `mt`, left to right.
pub fn fold_term<A, F>(mt: &Mterm, acc: A, f: &mut F) -> A
where
    F: FnMut(A, &Mterm) -> A,
{
    let mut children = Vec::new();
    collect_subterms(mt, &mut children);
    children.into_iter().fold(acc, |a, c| f(a, c))
}

/// Fold `f` over the whole tree rooted at `mt` (the root included),
/// depth-first, parents before children.
pub fn fold_term_rec<A, F>(mt: &Mterm, acc: A, f: &mut F) -> A
where
    F: FnMut(A, &Mterm) -> A,
{
    let acc = f(acc, mt);
    let mut children = Vec::new();
    collect_subterms(mt, &mut children);
    children.into_iter().fold(acc, |a, c| fold_term_rec(c, a, f))
}

/// Rebuild `mt` while threading an accumulator through each immediate
/// subterm, left to right.
pub fn fold_map_term<A, F>(mt: &Mterm, acc: A, f: &mut F) -> (A, Mterm)
where
    F: FnMut(A, &Mterm) -> (A, Mterm),
{
    let mut slot = Some(acc);
    let rebuilt = map_term(mt, &mut |child| {
        let a = slot.take().expect("fold_map_term: accumulator in flight");
        let (a, c) = f(a, child);
        slot = Some(a);
        c
    });
    (slot.expect("fold_map_term: accumulator lost"), rebuilt)
}

/// Rebuild a model applying one transformer per top-level shape:
/// declarations, storage items and functions.
pub fn map_model<FD, FS, FF>(mut model: Model, fd: &mut FD, fs: &mut FS, ff: &mut FF) -> Model
where
    FD: FnMut(Decl) -> Decl,
    FS: FnMut(crate::decl::StorageItem) -> crate::decl::StorageItem,
    FF: FnMut(crate::function::Function) -> crate::function::Function,
{
    model.decls = model.decls.into_iter().map(&mut *fd).collect();
    model.storage = model.storage.into_iter().map(&mut *fs).collect();
    model.functions = model.functions.into_iter().map(&mut *ff).collect();
    model
}

/// Where a term lives when [`map_mterm_model`] hands it to the visitor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Context {
    /// Enclosing function, when inside one
    pub function: Option<Ident>,
    /// True when the enclosing function is an entry
    pub is_entry: bool,
    /// Enclosing specification's owner, for spec terms
    pub spec_id: Option<Ident>,
    /// Enclosing invariant label, for loop invariants
    pub invariant_id: Option<Ident>,
}

/// Visit every term position of the model exactly once.
///
/// Covers function bodies and argument defaults, storage defaults,
/// declaration defaults, initial values and invariants, and every
/// specification formula. The visitor receives the position's [`Context`]
/// and is responsible for its own recursion into the term.
pub fn map_mterm_model<F>(mut model: Model, f: &mut F) -> Model
where
    F: FnMut(&Context, &Mterm) -> Mterm,
{
    let top = Context::default();

    for item in &mut model.storage {
        item.default = f(&top, &item.default);
    }

    for decl in &mut model.decls {
        match decl {
            Decl::Var(v) => {
                if let Some(d) = &v.default {
                    v.default = Some(f(&top, d));
                }
                for inv in &mut v.invariants {
                    let ctx = Context {
                        invariant_id: Some(inv.label.clone()),
                        ..Default::default()
                    };
                    inv.term = f(&ctx, &inv.term);
                }
            }
            Decl::Enum(e) => {
                for item in &mut e.values {
                    for inv in &mut item.invariants {
                        let ctx = Context {
                            invariant_id: Some(inv.label.clone()),
                            ..Default::default()
                        };
                        inv.term = f(&ctx, &inv.term);
                    }
                }
            }
            Decl::Asset(a) => {
                for field in &mut a.fields {
                    if let Some(d) = &field.default {
                        field.default = Some(f(&top, d));
                    }
                }
                for init in &mut a.init {
                    *init = f(&top, init);
                }
                for inv in &mut a.invariants {
                    let ctx = Context {
                        invariant_id: Some(inv.label.clone()),
                        ..Default::default()
                    };
                    inv.term = f(&ctx, &inv.term);
                }
            }
            Decl::Record(_) | Decl::Event(_) => {}
        }
    }

    for param in &mut model.parameters {
        if let Some(d) = &param.default {
            param.default = Some(f(&top, d));
        }
        if let Some(v) = &param.value {
            param.value = Some(f(&top, v));
        }
    }

    for function in &mut model.functions {
        let ctx = Context {
            function: Some(function.fs.name.clone()),
            is_entry: function.kind.is_entry(),
            ..Default::default()
        };
        for arg in &mut function.fs.args {
            if let Some(d) = &arg.default {
                arg.default = Some(f(&ctx, d));
            }
        }
        function.fs.body = f(&ctx, &function.fs.body);
        if let Some(spec) = &mut function.fs.spec {
            map_specification(spec, Some(function.fs.name.clone()), f);
        }
    }

    map_specification(&mut model.specification, None, f);

    for verif in &mut model.api_verif {
        verif.term = f(&top, &verif.term);
    }

    model
}

/// Read-only counterpart of [`map_mterm_model`]: hand every term position
/// to `f` without rebuilding the model.
pub fn visit_mterm_model<F>(model: &Model, f: &mut F)
where
    F: FnMut(&Context, &Mterm),
{
    let top = Context::default();

    for item in &model.storage {
        f(&top, &item.default);
    }

    for decl in &model.decls {
        match decl {
            Decl::Var(v) => {
                if let Some(d) = &v.default {
                    f(&top, d);
                }
                for inv in &v.invariants {
                    f(&top, &inv.term);
                }
            }
            Decl::Enum(e) => {
                for item in &e.values {
                    for inv in &item.invariants {
                        f(&top, &inv.term);
                    }
                }
            }
            Decl::Asset(a) => {
                for field in &a.fields {
                    if let Some(d) = &field.default {
                        f(&top, d);
                    }
                }
                for init in &a.init {
                    f(&top, init);
                }
                for inv in &a.invariants {
                    f(&top, &inv.term);
                }
            }
            Decl::Record(_) | Decl::Event(_) => {}
        }
    }

    for param in &model.parameters {
        if let Some(d) = &param.default {
            f(&top, d);
        }
        if let Some(v) = &param.value {
            f(&top, v);
        }
    }

    for function in &model.functions {
        let ctx = Context {
            function: Some(function.fs.name.clone()),
            is_entry: function.kind.is_entry(),
            ..Default::default()
        };
        for arg in &function.fs.args {
            if let Some(d) = &arg.default {
                f(&ctx, d);
            }
        }
        f(&ctx, &function.fs.body);
        if let Some(spec) = &function.fs.spec {
            for p in &spec.predicates {
                f(&ctx, &p.body);
            }
            for d in &spec.definitions {
                f(&ctx, &d.body);
            }
            for e in &spec.effects {
                f(&ctx, e);
            }
            for post in &spec.postconditions {
                f(&ctx, &post.formula);
                for inv in &post.invariants {
                    for formula in &inv.formulas {
                        f(&ctx, formula);
                    }
                }
            }
        }
    }

    for e in &model.specification.effects {
        f(&top, e);
    }
    for inv in &model.specification.invariants {
        f(&top, &inv.term);
    }
    for post in &model.specification.postconditions {
        f(&top, &post.formula);
        for inv in &post.invariants {
            for formula in &inv.formulas {
                f(&top, formula);
            }
        }
    }
    for verif in &model.api_verif {
        f(&top, &verif.term);
    }
}

fn map_specification<F>(
    spec: &mut crate::spec::Specification,
    owner: Option<Ident>,
    f: &mut F,
) where
    F: FnMut(&Context, &Mterm) -> Mterm,
{
    let base = Context {
        function: owner.clone(),
        spec_id: owner,
        ..Default::default()
    };

    for p in &mut spec.predicates {
        p.body = f(&base, &p.body);
    }
    for d in &mut spec.definitions {
        d.body = f(&base, &d.body);
    }
    for l in &mut spec.lemmas {
        l.term = f(&base, &l.term);
    }
    for t in &mut spec.theorems {
        t.term = f(&base, &t.term);
    }
    for v in &mut spec.variables {
        if let Some(d) = &v.decl.default {
            v.decl.default = Some(f(&base, d));
        }
    }
    for inv in &mut spec.invariants {
        let ctx = Context {
            invariant_id: Some(inv.label.clone()),
            ..base.clone()
        };
        inv.term = f(&ctx, &inv.term);
    }
    for e in &mut spec.effects {
        *e = f(&base, e);
    }
    for post in &mut spec.postconditions {
        let ctx = Context {
            spec_id: Some(post.name.clone()),
            ..base.clone()
        };
        post.formula = f(&ctx, &post.formula);
        for inv in &mut post.invariants {
            let inv_ctx = Context {
                invariant_id: Some(inv.label.clone()),
                ..ctx.clone()
            };
            for formula in &mut inv.formulas {
                *formula = f(&inv_ctx, formula);
            }
        }
    }
    for fail in &mut spec.fails {
        fail.formula = f(&base, &fail.formula);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::Span;
    use crate::types::Type;

    fn sp() -> Span {
        Span::zero(0)
    }

    fn plus(l: Mterm, r: Mterm) -> Mterm {
        Mterm::new(
            MtermNode::Plus(Box::new(l), Box::new(r)),
            Type::int(),
            sp(),
        )
    }

    #[test]
    fn test_map_term_rebuilds_children() {
        // (1 + 2) with every literal bumped by one
        let term = plus(Mterm::int(1, sp()), Mterm::int(2, sp()));
        let mapped = map_term(&term, &mut |c| match &c.node {
            MtermNode::Int(v) => Mterm::int(v + 1, c.span),
            _ => c.clone(),
        });

        match mapped.node {
            MtermNode::Plus(l, r) => {
                assert_eq!(l.node, MtermNode::Int(2.into()));
                assert_eq!(r.node, MtermNode::Int(3.into()));
            }
            other => panic!("expected Plus, got {other:?}"),
        }
    }

    #[test]
    fn test_fold_term_is_left_to_right() {
        let term = plus(Mterm::int(1, sp()), Mterm::int(2, sp()));
        let order = fold_term(&term, Vec::new(), &mut |mut acc, c| {
            if let MtermNode::Int(v) = &c.node {
                acc.push(v.clone());
            }
            acc
        });
        assert_eq!(order, vec![1.into(), 2.into()]);
    }

    #[test]
    fn test_fold_term_rec_visits_root_first() {
        let term = plus(
            plus(Mterm::int(1, sp()), Mterm::int(2, sp())),
            Mterm::int(3, sp()),
        );
        let count = fold_term_rec(&term, 0usize, &mut |acc, _| acc + 1);
        assert_eq!(count, 5); // two Plus nodes + three literals
    }

    #[test]
    fn test_fold_map_term_threads_accumulator() {
        let term = plus(Mterm::int(10, sp()), Mterm::int(20, sp()));
        let (n, rebuilt) = fold_map_term(&term, 0usize, &mut |acc, c| (acc + 1, c.clone()));
        assert_eq!(n, 2);
        assert_eq!(rebuilt, term);
    }

    #[test]
    fn test_pairing_check_exposes_its_operand() {
        let pairs_ty = Type::list(Type::tuple(vec![
            Type::new(crate::types::TypeNode::Bls12381G1),
            Type::new(crate::types::TypeNode::Bls12381G2),
        ]));
        let pairs = Mterm::new(MtermNode::Litlist(vec![]), pairs_ty, sp());
        let check = Mterm::new(
            MtermNode::PairingCheck(Box::new(pairs.clone())),
            Type::bool(),
            sp(),
        );

        let mut children = Vec::new();
        subterms(&check, &mut children);
        assert_eq!(children, vec![&pairs]);

        let mapped = map_term(&check, &mut |c| c.clone());
        assert_eq!(mapped, check);
    }

    #[test]
    fn test_map_term_ft_rewrites_types() {
        let term = Mterm::new(
            MtermNode::Equal(
                Type::rational(),
                Box::new(Mterm::int(1, sp())),
                Box::new(Mterm::int(2, sp())),
            ),
            Type::bool(),
            sp(),
        );
        let mapped = map_term_ft(&term, &mut |c| c.clone(), &mut |t| {
            if *t == Type::rational() {
                Type::tuple(vec![Type::int(), Type::nat()])
            } else {
                t.clone()
            }
        });
        match mapped.node {
            MtermNode::Equal(t, ..) => {
                assert_eq!(t, Type::tuple(vec![Type::int(), Type::nat()]));
            }
            other => panic!("expected Equal, got {other:?}"),
        }
    }

    #[test]
    fn test_map_mterm_model_visits_function_bodies() {
        use crate::function::{Function, FunctionKind, FunctionStruct};
        use crate::model::Model;

        let mut model = Model::new("m", sp());
        model.functions.push(Function {
            kind: FunctionKind::Entry,
            fs: FunctionStruct {
                name: "go".into(),
                args: vec![],
                eargs: vec![],
                body: Mterm::skip(sp()),
                stovars: vec![],
                spec: None,
                loc: sp(),
            },
        });

        let mut seen = Vec::new();
        let _ = map_mterm_model(model, &mut |ctx, mt| {
            seen.push(ctx.function.clone());
            mt.clone()
        });
        assert_eq!(seen, vec![Some("go".to_string())]);
    }
}
