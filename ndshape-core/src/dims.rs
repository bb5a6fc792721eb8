#![forbid(unsafe_code)]

use ndshape_ast::{NdtError, Type, TypeKind};

use crate::symtable::{Entry, MatchResult, SymbolTable, UNNAMED_ELLIPSIS};

fn is_ellipsis(t: &Type) -> bool {
    matches!(t.kind(), TypeKind::EllipsisDim { .. })
}

/// Match one non-ellipsis pattern dimension against one concrete dimension.
fn match_dim<'a>(p: &Type, c: &'a Type, table: &mut SymbolTable<'a>) -> MatchResult {
    match (p.kind(), c.kind()) {
        (TypeKind::FixedDim { shape: ps, .. }, TypeKind::FixedDim { shape: cs, .. }) => {
            Ok(ps == cs)
        }
        (TypeKind::FixedDim { .. }, _) => Ok(false),
        (TypeKind::SymbolicDim { name, .. }, TypeKind::FixedDim { shape, .. }) => {
            table.resolve_or_bind(name, Entry::Shape(*shape))
        }
        (TypeKind::SymbolicDim { name, .. }, TypeKind::SymbolicDim { name: cname, .. }) => {
            table.resolve_or_bind(name, Entry::Symbol(cname))
        }
        (TypeKind::SymbolicDim { .. }, _) => Ok(false),
        (TypeKind::VarDim { .. }, TypeKind::VarDim { .. }) => Ok(true),
        (TypeKind::VarDim { .. }, _) => Ok(false),
        _ => Err(NdtError::runtime(format!(
            "unexpected node in dimension list: {p}"
        ))),
    }
}

/// Bind an ellipsis to the concrete dimensions it spans.
fn bind_ellipsis<'a>(
    name: Option<&str>,
    captured: &[&'a Type],
    table: &mut SymbolTable<'a>,
) -> MatchResult {
    let only_fixed_or_var = captured.iter().all(|d| {
        matches!(
            d.kind(),
            TypeKind::FixedDim { .. } | TypeKind::VarDim { .. }
        )
    });

    let Some(name) = name else {
        // An unnamed ellipsis always succeeds; the first capture is kept for outer-dims reporting.
        if only_fixed_or_var && matches!(table.find(UNNAMED_ELLIPSIS), Entry::Unbound) {
            table.bind(UNNAMED_ELLIPSIS, Entry::DimList(captured.to_vec()))?;
        }
        return Ok(true);
    };

    if let [single] = captured {
        if matches!(single.kind(), TypeKind::EllipsisDim { name: None, .. }) {
            return table.resolve_or_bind(name, Entry::Symbol(UNNAMED_ELLIPSIS));
        }
    }
    if !only_fixed_or_var {
        return Ok(false);
    }
    table.resolve_or_bind(name, Entry::DimList(captured.to_vec()))
}

/// Match two dimension lists, outermost first.
///
/// A prefix is matched forward up to the pattern's ellipsis, the suffix after it is
/// matched backward from the end of both lists, and the ellipsis binds whatever
/// concrete dimensions remain in between (possibly none).
pub(crate) fn match_dims<'a>(
    p: &[&Type],
    c: &[&'a Type],
    table: &mut SymbolTable<'a>,
) -> MatchResult {
    let mut i = 0;
    let mut k = 0;
    while i < p.len() && !is_ellipsis(p[i]) {
        if k == c.len() || !match_dim(p[i], c[k], table)? {
            return Ok(false);
        }
        i += 1;
        k += 1;
    }
    if i == p.len() {
        return Ok(k == c.len());
    }

    let ellipsis = p[i];
    if p[i + 1..].iter().any(|d| is_ellipsis(d)) {
        return Err(NdtError::value(
            "at most one ellipsis is allowed per dimension list",
        ));
    }

    let mut pj = p.len();
    let mut cj = c.len();
    while pj > i + 1 {
        if cj == k {
            return Ok(false);
        }
        pj -= 1;
        cj -= 1;
        if !match_dim(p[pj], c[cj], table)? {
            return Ok(false);
        }
    }

    let name = match ellipsis.kind() {
        TypeKind::EllipsisDim { name, .. } => name.as_deref(),
        _ => None,
    };
    bind_ellipsis(name, &c[k..cj], table)
}
