#![forbid(unsafe_code)]

use std::cell::Cell;

use ndshape_ast::{NdtError, Type, TypeKind};

/// Presence bits for the optional members of one level of a type tree.
///
/// The tree mirrors the type: dimensions share their element's level, every
/// tuple/record/ref item opens `next` blocks, one per field (or target), in
/// item-major order. A named wrapper around dimensions opens one block per
/// item. A set bit means the value is present; a fresh bitmap
/// marks everything missing.
#[derive(Debug, Default)]
pub struct Bitmap {
    data: Option<Box<[Cell<u8>]>>,
    next: Vec<Bitmap>,
}

fn zeroed(nitems: i64) -> Result<Box<[Cell<u8>]>, NdtError> {
    let n = usize::try_from(nitems)
        .map_err(|_| NdtError::value("negative item count in bitmap"))?;
    let mut cells = Vec::new();
    cells
        .try_reserve_exact(n.div_ceil(8))
        .map_err(|_| NdtError::memory("bitmap allocation failed"))?;
    cells.resize_with(n.div_ceil(8), || Cell::new(0));
    Ok(cells.into_boxed_slice())
}

fn item_count(nitems: i64, per_item: i64) -> Result<i64, NdtError> {
    nitems
        .checked_mul(per_item)
        .ok_or_else(|| NdtError::value("too many items for a presence bitmap"))
}

fn blocks(
    count: i64,
    mut make: impl FnMut(usize) -> Result<Bitmap, NdtError>,
) -> Result<Vec<Bitmap>, NdtError> {
    let count = usize::try_from(count)
        .map_err(|_| NdtError::value("negative item count in bitmap"))?;
    let mut out = Vec::new();
    out.try_reserve_exact(count)
        .map_err(|_| NdtError::memory("bitmap allocation failed"))?;
    for i in 0..count {
        out.push(make(i)?);
    }
    Ok(out)
}

impl Bitmap {
    pub fn new(t: &Type) -> Result<Bitmap, NdtError> {
        Self::build(t, 1)
    }

    fn build(t: &Type, nitems: i64) -> Result<Bitmap, NdtError> {
        if !t.subtree_is_optional() {
            return Ok(Bitmap::default());
        }

        match t.kind() {
            TypeKind::FixedDim { shape, elem, .. } => {
                return Self::build(elem, item_count(nitems, *shape)?);
            }
            TypeKind::VarDim { offsets, elem } => {
                let Some(last) = offsets.as_deref().and_then(|o| o.last()) else {
                    return Err(NdtError::runtime("var dimension without offsets"));
                };
                return Self::build(elem, i64::from(*last));
            }
            _ => {}
        }

        let mut b = Bitmap::default();
        if t.is_optional() {
            b.data = Some(zeroed(nitems)?);
        }
        match t.kind() {
            TypeKind::Tuple { fields, .. } | TypeKind::Record { fields, .. } => {
                let n = fields.len();
                b.next = blocks(item_count(nitems, n as i64)?, |i| {
                    Self::build(&fields[i % n], 1)
                })?;
            }
            TypeKind::Ref(inner) => {
                b.next = blocks(nitems, |_| Self::build(inner, 1))?;
            }
            TypeKind::Constr { inner, .. } | TypeKind::Module { inner, .. }
                if inner.ndim() > 0 =>
            {
                b.next = blocks(nitems, |_| Self::build(inner, 1))?;
            }
            TypeKind::Constr { inner, .. } | TypeKind::Module { inner, .. } => {
                let shared = Self::build(inner, nitems)?;
                b.next = shared.next;
                if b.data.is_none() {
                    b.data = shared.data;
                }
            }
            _ => {}
        }
        Ok(b)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_none() && self.next.is_empty()
    }

    pub fn next(&self, i: i64) -> Option<&Bitmap> {
        usize::try_from(i).ok().and_then(|i| self.next.get(i))
    }

    pub fn get(&self, index: i64) -> Option<bool> {
        let (byte, mask) = self.locate(index)?;
        Some(byte.get() & mask != 0)
    }

    pub fn set(&self, index: i64, present: bool) -> Option<()> {
        let (byte, mask) = self.locate(index)?;
        if present {
            byte.set(byte.get() | mask);
        } else {
            byte.set(byte.get() & !mask);
        }
        Some(())
    }

    fn locate(&self, index: i64) -> Option<(&Cell<u8>, u8)> {
        let index = usize::try_from(index).ok()?;
        let byte = self.data.as_deref()?.get(index / 8)?;
        Some((byte, 1u8 << (index % 8)))
    }
}
