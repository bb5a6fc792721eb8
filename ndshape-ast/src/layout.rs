#![forbid(unsafe_code)]

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::NdtError;
use crate::types::{Access, Encoding, Kind, Literal, MAX_DIM, Primitive, Type, TypeKind};

/// Size of a pointer slot (`ref`, `string`) in a concrete layout.
pub const POINTER_SIZE: i64 = std::mem::size_of::<usize>() as i64;
pub const POINTER_ALIGN: u16 = std::mem::align_of::<usize>() as u16;

/// Round `n` up to the next multiple of `align` (a power of two).
pub fn round_up(n: i64, align: u16) -> i64 {
    let a = i64::from(align.max(1));
    (n + a - 1) / a * a
}

fn leaf(kind: TypeKind, access: Access, datasize: i64, align: u16) -> Type {
    Type {
        kind,
        optional: false,
        access,
        datasize,
        align,
        ndim: 0,
    }
}

fn abstract_leaf(kind: TypeKind) -> Type {
    leaf(kind, Access::Abstract, 0, 1)
}

fn check_dim_elem(elem: &Type) -> Result<(), NdtError> {
    if elem.ndim + 1 > MAX_DIM {
        return Err(NdtError::value(format!(
            "too many dimensions: maximum is {MAX_DIM}"
        )));
    }
    if matches!(elem.kind, TypeKind::Function { .. }) {
        return Err(NdtError::value("function types can not be array elements"));
    }
    Ok(())
}

fn check_power_of_two(align: u16, what: &str) -> Result<(), NdtError> {
    if align == 0 || !align.is_power_of_two() {
        return Err(NdtError::value(format!(
            "{what} must be a power of two, got {align}"
        )));
    }
    Ok(())
}

fn combine_access<'a>(types: impl IntoIterator<Item = &'a Type>) -> Access {
    if types.into_iter().all(Type::is_concrete) {
        Access::Concrete
    } else {
        Access::Abstract
    }
}

/// C layout for a list of fields: offsets, total size, alignment.
fn struct_layout(fields: &[Type]) -> Result<(Vec<i64>, i64, u16), NdtError> {
    let mut offsets = Vec::with_capacity(fields.len());
    let mut size: i64 = 0;
    let mut align: u16 = 1;
    for f in fields {
        size = round_up(size, f.align);
        offsets.push(size);
        size = size
            .checked_add(f.datasize)
            .ok_or_else(|| NdtError::value("datasize overflow"))?;
        align = align.max(f.align);
    }
    Ok((offsets, round_up(size, align), align))
}

/// `(reach, items)` of a dimension chain, counted in innermost dtype items:
/// one past the largest index it can address, and how many items it stores.
fn dim_span(t: &Type) -> Option<(i64, i64)> {
    match &t.kind {
        TypeKind::FixedDim { shape, step, elem } => {
            if *shape == 0 {
                return Some((0, 0));
            }
            let (reach, items) = dim_span(elem)?;
            let last = (shape - 1).checked_mul(*step)?.checked_add(reach)?;
            Some((last, shape.checked_mul(items)?))
        }
        _ => Some((1, 1)),
    }
}

/// An explicit step must keep every index of the new dimension inside its storage.
fn check_step_in_bounds(elem: &Type, shape: i64, step: i64) -> Result<(), NdtError> {
    let overflow = || NdtError::value("step overflow");
    if shape == 0 {
        return Ok(());
    }
    let (reach, items) = dim_span(elem).ok_or_else(overflow)?;
    let last = (shape - 1)
        .checked_mul(step)
        .and_then(|n| n.checked_add(reach))
        .ok_or_else(overflow)?;
    let stored = shape.checked_mul(items).ok_or_else(overflow)?;
    if last > stored {
        return Err(NdtError::value(format!(
            "step {step} reaches item {last} of a dimension storing {stored}"
        )));
    }
    Ok(())
}

impl Type {
    pub fn any() -> Type {
        abstract_leaf(TypeKind::Any)
    }

    pub fn primitive(p: Primitive) -> Type {
        leaf(TypeKind::Primitive(p), Access::Concrete, p.size(), p.align())
    }

    /// Kind supertype such as `SignedKind`.
    pub fn supertype(k: Kind) -> Type {
        abstract_leaf(TypeKind::Kind(k))
    }

    pub fn typevar(name: impl Into<String>) -> Result<Type, NdtError> {
        let name = name.into();
        if name.is_empty() {
            return Err(NdtError::value("type variable name must not be empty"));
        }
        Ok(abstract_leaf(TypeKind::Typevar(name)))
    }

    pub fn string() -> Type {
        leaf(TypeKind::String, Access::Concrete, POINTER_SIZE, POINTER_ALIGN)
    }

    pub fn char(encoding: Encoding) -> Type {
        let unit = encoding.unit_size();
        leaf(TypeKind::Char(encoding), Access::Concrete, unit, unit as u16)
    }

    pub fn fixed_string(size: i64, encoding: Encoding) -> Result<Type, NdtError> {
        if size < 0 {
            return Err(NdtError::value("fixed_string size must be non-negative"));
        }
        let unit = encoding.unit_size();
        let datasize = size
            .checked_mul(unit)
            .ok_or_else(|| NdtError::value("datasize overflow"))?;
        Ok(leaf(
            TypeKind::FixedString { size, encoding },
            Access::Concrete,
            datasize,
            unit as u16,
        ))
    }

    pub fn fixed_bytes(size: i64, align: u16) -> Result<Type, NdtError> {
        check_power_of_two(align, "fixed_bytes alignment")?;
        if size < 0 || size % i64::from(align) != 0 {
            return Err(NdtError::value(format!(
                "fixed_bytes size {size} is not a non-negative multiple of its alignment {align}"
            )));
        }
        Ok(leaf(
            TypeKind::FixedBytes { size, align },
            Access::Concrete,
            size,
            align,
        ))
    }

    /// Dynamic bytes: a `{size: int64, data: pointer}` slot.
    pub fn bytes(target_align: u16) -> Result<Type, NdtError> {
        check_power_of_two(target_align, "bytes target alignment")?;
        Ok(leaf(
            TypeKind::Bytes { target_align },
            Access::Concrete,
            round_up(8 + POINTER_SIZE, POINTER_ALIGN.max(8)),
            POINTER_ALIGN.max(8),
        ))
    }

    pub fn categorical(literals: Vec<Literal>) -> Result<Type, NdtError> {
        if literals.is_empty() {
            return Err(NdtError::value("categorical type needs at least one value"));
        }
        for (i, a) in literals.iter().enumerate() {
            if literals[..i].contains(a) {
                return Err(NdtError::value(format!(
                    "duplicate categorical value {a}"
                )));
            }
        }
        Ok(leaf(TypeKind::Categorical(literals), Access::Concrete, 8, 8))
    }

    /// Fixed dimension. `step: None` recomputes a C-contiguous step from `elem`.
    pub fn fixed_dim(elem: Type, shape: i64, step: Option<i64>) -> Result<Type, NdtError> {
        if shape < 0 {
            return Err(NdtError::value(format!(
                "fixed dimension shape must be non-negative, got {shape}"
            )));
        }
        check_dim_elem(&elem)?;
        if matches!(elem.kind, TypeKind::VarDim { .. }) {
            return Err(NdtError::value("fixed and var dimensions can not be mixed"));
        }
        if elem.ellipsis_count() > 1 {
            return Err(NdtError::value("at most one ellipsis is allowed per dimension list"));
        }
        let computed = match &elem.kind {
            TypeKind::FixedDim {
                shape: s, step: st, ..
            } => s
                .checked_mul(*st)
                .ok_or_else(|| NdtError::value("step overflow"))?,
            TypeKind::SymbolicDim { .. } | TypeKind::EllipsisDim { .. } => 0,
            _ => 1,
        };
        let access = elem.access;
        let step = match step {
            None => computed,
            Some(step) if step < 0 => {
                return Err(NdtError::value(format!(
                    "fixed dimension step must be non-negative, got {step}"
                )));
            }
            Some(step) => {
                if access == Access::Concrete {
                    check_step_in_bounds(&elem, shape, step)?;
                }
                step
            }
        };
        let datasize = if access == Access::Concrete {
            shape
                .checked_mul(elem.datasize)
                .ok_or_else(|| NdtError::value("datasize overflow"))?
        } else {
            0
        };
        Ok(Type {
            access,
            datasize,
            align: elem.align,
            ndim: elem.ndim + 1,
            optional: false,
            kind: TypeKind::FixedDim {
                shape,
                step,
                elem: Box::new(elem),
            },
        })
    }

    pub fn symbolic_dim(name: impl Into<String>, elem: Type) -> Result<Type, NdtError> {
        check_dim_elem(&elem)?;
        if matches!(elem.kind, TypeKind::VarDim { .. }) {
            return Err(NdtError::value("symbolic and var dimensions can not be mixed"));
        }
        if elem.ellipsis_count() > 1 {
            return Err(NdtError::value("at most one ellipsis is allowed per dimension list"));
        }
        Ok(Type {
            access: Access::Abstract,
            datasize: 0,
            align: elem.align,
            ndim: elem.ndim + 1,
            optional: false,
            kind: TypeKind::SymbolicDim {
                name: name.into(),
                elem: Box::new(elem),
            },
        })
    }

    /// Variable dimension. Concrete only when `offsets` are given and `elem` is concrete.
    pub fn var_dim(elem: Type, offsets: Option<Vec<i32>>) -> Result<Type, NdtError> {
        check_dim_elem(&elem)?;
        if matches!(
            elem.kind,
            TypeKind::FixedDim { .. } | TypeKind::SymbolicDim { .. }
        ) {
            return Err(NdtError::value("fixed and var dimensions can not be mixed"));
        }
        if elem.ellipsis_count() > 1 {
            return Err(NdtError::value("at most one ellipsis is allowed per dimension list"));
        }

        let Some(offsets) = offsets else {
            return Ok(Type {
                access: Access::Abstract,
                datasize: 0,
                align: elem.align,
                ndim: elem.ndim + 1,
                optional: false,
                kind: TypeKind::VarDim {
                    offsets: None,
                    elem: Box::new(elem),
                },
            });
        };

        if offsets.len() < 2 {
            return Err(NdtError::value("var dimension offsets need at least two entries"));
        }
        if offsets[0] != 0 {
            return Err(NdtError::value("var dimension offsets must start at 0"));
        }
        if offsets.windows(2).any(|w| w[1] < w[0]) {
            return Err(NdtError::value("var dimension offsets must be non-decreasing"));
        }
        let last = i64::from(offsets[offsets.len() - 1]);

        let datasize = match &elem.kind {
            TypeKind::VarDim { offsets: inner, .. } => {
                let Some(inner) = inner else {
                    return Err(NdtError::value(
                        "inner var dimension of a concrete var dimension needs offsets",
                    ));
                };
                let items = inner.len() as i64 - 1;
                if last != items {
                    return Err(NdtError::value(format!(
                        "var dimension offsets end at {last}, but the inner dimension has {items} items"
                    )));
                }
                elem.datasize
            }
            _ => last
                .checked_mul(elem.datasize)
                .ok_or_else(|| NdtError::value("datasize overflow"))?,
        };

        let access = elem.access;
        Ok(Type {
            access,
            datasize: if access == Access::Concrete { datasize } else { 0 },
            align: elem.align,
            ndim: elem.ndim + 1,
            optional: false,
            kind: TypeKind::VarDim {
                offsets: Some(Arc::from(offsets)),
                elem: Box::new(elem),
            },
        })
    }

    pub fn ellipsis_dim(name: Option<String>, elem: Type) -> Result<Type, NdtError> {
        check_dim_elem(&elem)?;
        if elem.ellipsis_count() > 0 {
            return Err(NdtError::value("at most one ellipsis is allowed per dimension list"));
        }
        Ok(Type {
            access: Access::Abstract,
            datasize: 0,
            align: elem.align,
            ndim: elem.ndim + 1,
            optional: false,
            kind: TypeKind::EllipsisDim {
                name,
                elem: Box::new(elem),
            },
        })
    }

    pub fn tuple(fields: Vec<Type>) -> Result<Type, NdtError> {
        let access = combine_access(&fields);
        let (offsets, datasize, align) = if access == Access::Concrete {
            struct_layout(&fields)?
        } else {
            (Vec::new(), 0, 1)
        };
        Ok(Type {
            kind: TypeKind::Tuple { fields, offsets },
            optional: false,
            access,
            datasize,
            align,
            ndim: 0,
        })
    }

    pub fn record(fields: Vec<(String, Type)>) -> Result<Type, NdtError> {
        let mut seen = HashSet::new();
        for (name, _) in &fields {
            if !seen.insert(name.as_str()) {
                return Err(NdtError::value(format!("duplicate record field '{name}'")));
            }
        }
        let (names, fields): (Vec<String>, Vec<Type>) = fields.into_iter().unzip();
        let access = combine_access(&fields);
        let (offsets, datasize, align) = if access == Access::Concrete {
            struct_layout(&fields)?
        } else {
            (Vec::new(), 0, 1)
        };
        Ok(Type {
            kind: TypeKind::Record {
                names,
                fields,
                offsets,
            },
            optional: false,
            access,
            datasize,
            align,
            ndim: 0,
        })
    }

    /// Explicit indirection: a pointer slot to storage of `elem`.
    pub fn reference(elem: Type) -> Type {
        let access = elem.access;
        Type {
            kind: TypeKind::Ref(Box::new(elem)),
            optional: false,
            access,
            datasize: POINTER_SIZE,
            align: POINTER_ALIGN,
            ndim: 0,
        }
    }

    fn wrapper(kind: impl FnOnce(Box<Type>) -> TypeKind, inner: Type) -> Type {
        Type {
            access: inner.access,
            datasize: inner.datasize,
            align: inner.align,
            ndim: 0,
            optional: false,
            kind: kind(Box::new(inner)),
        }
    }

    /// Transparent named wrapper.
    pub fn constr(name: impl Into<String>, inner: Type) -> Type {
        let name = name.into();
        Self::wrapper(|inner| TypeKind::Constr { name, inner }, inner)
    }

    /// Opaque named type; `inner` only supplies its storage layout.
    pub fn nominal(name: impl Into<String>, inner: Type) -> Type {
        let name = name.into();
        Self::wrapper(|inner| TypeKind::Nominal { name, inner }, inner)
    }

    pub fn module(name: impl Into<String>, inner: Type) -> Type {
        let name = name.into();
        Self::wrapper(|inner| TypeKind::Module { name, inner }, inner)
    }

    /// Function signature. Signatures have no storage and are always abstract.
    pub fn function(ret: Type, pos: Type, kwds: Type) -> Result<Type, NdtError> {
        if !matches!(pos.kind, TypeKind::Tuple { .. }) {
            return Err(NdtError::value("positional arguments must be a tuple"));
        }
        if !matches!(kwds.kind, TypeKind::Record { .. }) {
            return Err(NdtError::value("keyword arguments must be a record"));
        }
        Ok(abstract_leaf(TypeKind::Function {
            ret: Box::new(ret),
            pos: Box::new(pos),
            kwds: Box::new(kwds),
        }))
    }

    pub fn with_optional(mut self, optional: bool) -> Result<Type, NdtError> {
        if optional && self.is_dim() {
            return Err(NdtError::value("dimensions can not be optional"));
        }
        self.optional = optional;
        Ok(self)
    }

    pub fn into_optional(self) -> Result<Type, NdtError> {
        self.with_optional(true)
    }
}
