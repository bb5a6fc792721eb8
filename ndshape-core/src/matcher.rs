#![forbid(unsafe_code)]

use ndshape_ast::{Type, TypeKind};

use crate::dims::match_dims;
use crate::symtable::{Entry, MatchResult, SymbolTable};

/// Structural match of `p` (pattern) against `c` (candidate), binding variables in `table`.
pub fn match_with<'a>(p: &Type, c: &'a Type, table: &mut SymbolTable<'a>) -> MatchResult {
    if p.is_optional() != c.is_optional() {
        return Ok(false);
    }

    match p.kind() {
        TypeKind::Any => Ok(true),

        TypeKind::FixedDim { .. }
        | TypeKind::SymbolicDim { .. }
        | TypeKind::VarDim { .. }
        | TypeKind::EllipsisDim { .. } => {
            let (pdims, pdtype) = p.dims_dtype();
            let (cdims, cdtype) = c.dims_dtype();
            if !match_dims(&pdims, &cdims, table)? {
                return Ok(false);
            }
            match_with(pdtype, cdtype, table)
        }

        TypeKind::Primitive(a) => Ok(matches!(c.kind(), TypeKind::Primitive(b) if a == b)),
        TypeKind::String => Ok(matches!(c.kind(), TypeKind::String)),
        TypeKind::FixedString { .. } | TypeKind::FixedBytes { .. } | TypeKind::Char(_) => {
            Ok(p.kind() == c.kind())
        }
        TypeKind::Bytes { target_align } => Ok(matches!(
            c.kind(),
            TypeKind::Bytes { target_align: t } if t == target_align
        )),
        TypeKind::Categorical(lits) => Ok(matches!(
            c.kind(),
            TypeKind::Categorical(other) if other == lits
        )),

        TypeKind::Kind(k) => Ok(match c.kind() {
            TypeKind::Kind(other) => other == k,
            other => k.contains(other),
        }),

        TypeKind::Ref(pi) => match c.kind() {
            TypeKind::Ref(ci) => match_with(pi, ci, table),
            _ => Ok(false),
        },

        TypeKind::Tuple { fields: pf, .. } => match c.kind() {
            TypeKind::Tuple { fields: cf, .. } if pf.len() == cf.len() => {
                match_fields(pf, cf, table)
            }
            _ => Ok(false),
        },

        TypeKind::Record {
            names: pn,
            fields: pf,
            ..
        } => match c.kind() {
            TypeKind::Record {
                names: cn,
                fields: cf,
                ..
            } if pf.len() == cf.len() => {
                if pn != cn {
                    return Ok(false);
                }
                match_fields(pf, cf, table)
            }
            _ => Ok(false),
        },

        TypeKind::Function {
            ret: pr,
            pos: pp,
            kwds: pk,
        } => match c.kind() {
            TypeKind::Function {
                ret: cr,
                pos: cp,
                kwds: ck,
            } => Ok(match_with(pr, cr, table)?
                && match_with(pp, cp, table)?
                && match_with(pk, ck, table)?),
            _ => Ok(false),
        },

        TypeKind::Typevar(name) => match c.kind() {
            TypeKind::Typevar(cname) => table.resolve_or_bind(name, Entry::Symbol(cname)),
            _ => table.resolve_or_bind(name, Entry::Type(c)),
        },

        TypeKind::Nominal { name, .. } => Ok(matches!(
            c.kind(),
            TypeKind::Nominal { name: other, .. } if other == name
        )),
        TypeKind::Module { name, inner } => Ok(matches!(
            c.kind(),
            TypeKind::Module { name: other, inner: ci } if other == name && ci == inner
        )),
        TypeKind::Constr { name, inner } => Ok(matches!(
            c.kind(),
            TypeKind::Constr { name: other, inner: ci } if other == name && ci == inner
        )),
    }
}

fn match_fields<'a>(pf: &[Type], cf: &'a [Type], table: &mut SymbolTable<'a>) -> MatchResult {
    for (p, c) in pf.iter().zip(cf) {
        if !match_with(p, c, table)? {
            return Ok(false);
        }
    }
    Ok(true)
}
