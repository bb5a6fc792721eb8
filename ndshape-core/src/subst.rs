#![forbid(unsafe_code)]

use ndshape_ast::{NdtError, Primitive, Type, TypeKind};
use tracing::debug;

use crate::matcher::match_with;
use crate::symtable::{Entry, SymbolTable, UNNAMED_ELLIPSIS};

fn unbound(name: &str) -> NdtError {
    NdtError::value(format!(
        "variable '{name}' not found or has incorrect type"
    ))
}

fn ellipsis_key(name: &Option<String>) -> &str {
    name.as_deref().unwrap_or(UNNAMED_ELLIPSIS)
}

/// Rebuild `t` with every variable replaced by its binding in `table`.
pub fn substitute(t: &Type, table: &SymbolTable<'_>) -> Result<Type, NdtError> {
    match t.kind() {
        TypeKind::FixedDim { shape, elem, .. } => {
            let u = substitute(elem, table)?;
            Type::fixed_dim(u, *shape, None)
        }

        TypeKind::SymbolicDim { name, elem } => {
            let Entry::Shape(shape) = table.find(name) else {
                return Err(unbound(name));
            };
            let shape = *shape;
            let u = substitute(elem, table)?;
            Type::fixed_dim(u, shape, None)
        }

        TypeKind::EllipsisDim { name, elem } => {
            let key = ellipsis_key(name);
            let Entry::DimList(dims) = table.find(key) else {
                return Err(unbound(key));
            };
            let mut u = substitute(elem, table)?;
            for d in dims.iter().rev() {
                match d.kind() {
                    TypeKind::FixedDim { shape, .. } => u = Type::fixed_dim(u, *shape, None)?,
                    _ => {
                        return Err(NdtError::not_implemented(format!(
                            "substituting '{d}' from an ellipsis binding"
                        )));
                    }
                }
            }
            Ok(u)
        }

        TypeKind::Typevar(name) => match table.find(name) {
            Entry::Type(bound) => substitute(bound, table),
            _ => Err(unbound(name)),
        },

        TypeKind::Ref(inner) => Ok(Type::reference(substitute(inner, table)?)),

        TypeKind::Primitive(p @ (Primitive::Int64 | Primitive::Float32 | Primitive::Float64)) => {
            Type::primitive(*p).with_optional(t.is_optional())
        }

        _ => Err(NdtError::not_implemented(format!(
            "substitution is not defined for '{t}'"
        ))),
    }
}

/// Number of dimensions an ellipsis in the return type stands for.
fn outer_dims(ret: &Type, table: &SymbolTable<'_>) -> usize {
    let ret = match ret.kind() {
        TypeKind::Ref(inner) => inner.as_ref(),
        _ => ret,
    };
    match ret.kind() {
        TypeKind::EllipsisDim { name, .. } => match table.find(ellipsis_key(name)) {
            Entry::DimList(dims) => dims.len(),
            _ => 0,
        },
        _ => 0,
    }
}

/// Check concrete `args` against the signature `sig` and compute the result type.
///
/// Returns the concrete return type and the number of outer dimensions
/// contributed by an ellipsis in the return type.
pub fn typecheck(sig: &Type, args: &Type) -> Result<(Type, usize), NdtError> {
    let TypeKind::Function { ret, pos, kwds } = sig.kind() else {
        return Err(NdtError::value(format!("'{sig}' is not a function signature")));
    };
    if matches!(kwds.kind(), TypeKind::Record { names, .. } if !names.is_empty()) {
        return Err(NdtError::not_implemented("keyword arguments"));
    }
    if !args.is_concrete() {
        return Err(NdtError::value(format!(
            "arguments must be concrete, got '{args}'"
        )));
    }

    let mut table = SymbolTable::new();
    if !match_with(pos, args, &mut table)? {
        return Err(NdtError::Type(format!(
            "argument types '{args}' do not match '{pos}'"
        )));
    }

    let result = substitute(ret, &table)?;
    let outer = outer_dims(ret, &table);
    debug!(signature = %sig, result = %result, outer_dims = outer, "typecheck");
    Ok((result, outer))
}
