use std::ffi::CStr;
use std::fmt;

use ndshape_ast::{NdtError, Primitive, Type, TypeKind};

use crate::bitmap::Bitmap;

/// Layout of a dynamic `bytes` slot.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub(crate) struct BytesSlot {
    pub(crate) size: i64,
    pub(crate) data: *mut u8,
}

/// Primitive values that can be read from and written to a buffer slot.
///
/// # Safety
///
/// `PRIMITIVE` must have the size of `Self`, and `load` must accept every bit
/// pattern of that size.
pub unsafe trait Scalar: Copy {
    const PRIMITIVE: Primitive;

    /// # Safety
    ///
    /// `ptr` must be valid for reads of `size_of::<Self>()` bytes.
    unsafe fn load(ptr: *const u8) -> Self;

    /// # Safety
    ///
    /// `ptr` must be valid for writes of `size_of::<Self>()` bytes.
    unsafe fn store(self, ptr: *mut u8);
}

macro_rules! impl_scalar {
    ($($t:ty => $p:ident),* $(,)?) => {
        $(
            unsafe impl Scalar for $t {
                const PRIMITIVE: Primitive = Primitive::$p;

                unsafe fn load(ptr: *const u8) -> Self {
                    unsafe { ptr.cast::<$t>().read_unaligned() }
                }

                unsafe fn store(self, ptr: *mut u8) {
                    unsafe { ptr.cast::<$t>().write_unaligned(self) }
                }
            }
        )*
    };
}

impl_scalar! {
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    u8 => Uint8,
    u16 => Uint16,
    u32 => Uint32,
    u64 => Uint64,
    f32 => Float32,
    f64 => Float64,
}

unsafe impl Scalar for bool {
    const PRIMITIVE: Primitive = Primitive::Bool;

    unsafe fn load(ptr: *const u8) -> Self {
        unsafe { ptr.read() != 0 }
    }

    unsafe fn store(self, ptr: *mut u8) {
        unsafe { ptr.write(u8::from(self)) }
    }
}

/// A position inside a typed buffer.
///
/// Inside a dimension chain `index` counts elements of the innermost dtype (or
/// offset-array entries for var dimensions) and `ptr` stays at the array base;
/// once the type has no dimensions left, `ptr` is the element's own address and
/// `index` selects its presence bit.
#[derive(Clone, Copy)]
pub struct Handle<'b> {
    pub(crate) ptr: *mut u8,
    pub(crate) index: i64,
    pub(crate) ty: &'b Type,
    pub(crate) bitmap: Option<&'b Bitmap>,
}

impl fmt::Debug for Handle<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("ptr", &self.ptr)
            .field("index", &self.index)
            .field("type", &self.ty.to_string())
            .finish()
    }
}

fn elem_ptr(base: *mut u8, elem: &Type, index: i64) -> *mut u8 {
    if elem.ndim() == 0 {
        base.wrapping_offset((index * elem.datasize()) as isize)
    } else {
        base
    }
}

fn check_index(i: i64, len: i64, what: &str) -> Result<(), NdtError> {
    if i < 0 || i >= len {
        return Err(NdtError::value(format!(
            "{what} index {i} out of bounds for length {len}"
        )));
    }
    Ok(())
}

impl<'b> Handle<'b> {
    /// # Safety
    ///
    /// `ptr` must point to initialized storage laid out for `ty` that stays valid
    /// for `'b`, and `bitmap` must have been built for `ty`.
    pub(crate) unsafe fn new(ptr: *mut u8, ty: &'b Type, bitmap: Option<&'b Bitmap>) -> Self {
        Handle {
            ptr,
            index: 0,
            ty,
            bitmap,
        }
    }

    pub fn ty(&self) -> &'b Type {
        self.ty
    }

    pub fn index(&self) -> i64 {
        self.index
    }

    pub(crate) fn fixed_dim_next(&self, i: i64) -> Handle<'b> {
        let TypeKind::FixedDim { step, elem, .. } = self.ty.kind() else {
            return *self;
        };
        let index = self.index + i * step;
        Handle {
            ptr: elem_ptr(self.ptr, elem, index),
            index,
            ty: elem,
            bitmap: self.bitmap,
        }
    }

    /// `(start, step, shape)` of the var dimension item at the current index.
    pub(crate) fn var_indices(&self) -> Result<(i64, i64, i64), NdtError> {
        let offsets = self
            .ty
            .var_offsets()
            .ok_or_else(|| NdtError::runtime("var dimension without offsets"))?;
        let at = |i: i64| {
            usize::try_from(i)
                .ok()
                .and_then(|i| offsets.get(i))
                .map(|o| i64::from(*o))
                .ok_or_else(|| {
                    NdtError::runtime(format!(
                        "offset index {i} out of range for {} offsets",
                        offsets.len()
                    ))
                })
        };
        let start = at(self.index)?;
        let stop = at(self.index + 1)?;
        Ok((start, 1, stop - start))
    }

    pub(crate) fn var_dim_next(&self, start: i64, step: i64, i: i64) -> Handle<'b> {
        let TypeKind::VarDim { elem, .. } = self.ty.kind() else {
            return *self;
        };
        let index = start + i * step;
        Handle {
            ptr: elem_ptr(self.ptr, elem, index),
            index,
            ty: elem,
            bitmap: self.bitmap,
        }
    }

    /// Field `i` of a tuple or record.
    pub(crate) fn field_next(&self, i: usize) -> Handle<'b> {
        let (fields, offsets) = match self.ty.kind() {
            TypeKind::Tuple { fields, offsets } | TypeKind::Record { fields, offsets, .. } => {
                (fields, offsets)
            }
            _ => return *self,
        };
        let nfields = fields.len() as i64;
        Handle {
            ptr: self.ptr.wrapping_offset(offsets[i] as isize),
            index: 0,
            ty: &fields[i],
            bitmap: self
                .bitmap
                .and_then(|b| b.next(self.index * nfields + i as i64)),
        }
    }

    pub(crate) fn ref_slot(&self) -> *mut u8 {
        // SAFETY: a ref slot holds one pointer inside storage owned for `'b`.
        unsafe { self.ptr.cast::<*mut u8>().read_unaligned() }
    }

    /// Follow a `ref`. A null slot is a value error.
    pub(crate) fn ref_next(&self) -> Result<Handle<'b>, NdtError> {
        let TypeKind::Ref(inner) = self.ty.kind() else {
            return Err(NdtError::value(format!("'{}' is not a reference", self.ty)));
        };
        let target = self.ref_slot();
        if target.is_null() {
            return Err(NdtError::value("null reference"));
        }
        Ok(Handle {
            ptr: target,
            index: 0,
            ty: inner,
            bitmap: self.bitmap.and_then(|b| b.next(self.index)),
        })
    }

    /// Enter a named wrapper. Wrapped dimensions start a fresh chain at the
    /// element's address with their own presence block.
    pub(crate) fn wrapped_next(&self) -> Handle<'b> {
        match self.ty.kind() {
            TypeKind::Constr { inner, .. } | TypeKind::Module { inner, .. } if inner.ndim() > 0 => {
                Handle {
                    ptr: self.ptr,
                    index: 0,
                    ty: inner,
                    bitmap: self.bitmap.and_then(|b| b.next(self.index)),
                }
            }
            TypeKind::Constr { inner, .. } | TypeKind::Module { inner, .. } => Handle {
                ty: inner,
                ..*self
            },
            _ => *self,
        }
    }

    /// Navigate along `path`, one index per dimension or field.
    ///
    /// References and named wrappers are followed without consuming an index.
    pub fn subtree(&self, path: &[i64]) -> Result<Handle<'b>, NdtError> {
        let Some((&i, rest)) = path.split_first() else {
            return Ok(*self);
        };
        match self.ty.kind() {
            TypeKind::FixedDim { shape, .. } => {
                check_index(i, *shape, "dimension")?;
                self.fixed_dim_next(i).subtree(rest)
            }
            TypeKind::VarDim { .. } => {
                let (start, step, shape) = self.var_indices()?;
                check_index(i, shape, "dimension")?;
                self.var_dim_next(start, step, i).subtree(rest)
            }
            TypeKind::Tuple { fields, .. } | TypeKind::Record { fields, .. } => {
                check_index(i, fields.len() as i64, "field")?;
                self.field_next(i as usize).subtree(rest)
            }
            TypeKind::Ref(_) => self.ref_next()?.subtree(path),
            TypeKind::Constr { .. } | TypeKind::Module { .. } => self.wrapped_next().subtree(path),
            _ => Err(NdtError::value(format!("type '{}' is not indexable", self.ty))),
        }
    }

    /// Follow references and named wrappers down to the value they designate.
    pub fn resolve(&self) -> Result<Handle<'b>, NdtError> {
        match self.ty.kind() {
            TypeKind::Ref(_) => self.ref_next()?.resolve(),
            TypeKind::Constr { .. } | TypeKind::Module { .. } => self.wrapped_next().resolve(),
            _ => Ok(*self),
        }
    }

    /// The nearest optional value at or below this handle through refs and
    /// named wrappers; the handle itself when there is none.
    pub fn presence_holder(&self) -> Result<Handle<'b>, NdtError> {
        if self.ty.is_optional() {
            return Ok(*self);
        }
        match self.ty.kind() {
            TypeKind::Ref(_) => self.ref_next()?.presence_holder(),
            TypeKind::Constr { .. } | TypeKind::Module { .. } => {
                self.wrapped_next().presence_holder()
            }
            _ => Ok(*self),
        }
    }

    /// Like `subtree`, but selects record fields by name.
    pub fn field(&self, name: &str) -> Result<Handle<'b>, NdtError> {
        match self.ty.kind() {
            TypeKind::Record { names, .. } => {
                let i = names
                    .iter()
                    .position(|n| n == name)
                    .ok_or_else(|| NdtError::value(format!("no field named '{name}'")))?;
                Ok(self.field_next(i))
            }
            TypeKind::Ref(_) => self.ref_next()?.field(name),
            TypeKind::Constr { .. } | TypeKind::Module { .. } => self.wrapped_next().field(name),
            _ => Err(NdtError::value(format!("type '{}' has no fields", self.ty))),
        }
    }

    /// The physical address this handle designates.
    ///
    /// For an array handle this is the address of its first element.
    pub fn address(&self) -> Result<*const u8, NdtError> {
        if self.ty.ndim() == 0 {
            return Ok(self.ptr.cast_const());
        }
        let mut cur = *self;
        loop {
            match cur.ty.kind() {
                TypeKind::FixedDim { elem, .. } => {
                    cur = Handle {
                        ty: elem,
                        ..cur
                    };
                }
                TypeKind::VarDim { elem, .. } => {
                    let (start, _, _) = cur.var_indices()?;
                    cur = Handle {
                        index: start,
                        ty: elem,
                        ..cur
                    };
                }
                _ => break,
            }
        }
        Ok(elem_ptr(cur.ptr, cur.ty, cur.index).cast_const())
    }

    /// Number of items along the outermost dimension, or fields of a tuple/record.
    pub fn len(&self) -> Result<i64, NdtError> {
        match self.ty.kind() {
            TypeKind::FixedDim { shape, .. } => Ok(*shape),
            TypeKind::VarDim { .. } => Ok(self.var_indices()?.2),
            TypeKind::Tuple { fields, .. } | TypeKind::Record { fields, .. } => {
                Ok(fields.len() as i64)
            }
            _ => Err(NdtError::value(format!("type '{}' has no length", self.ty))),
        }
    }

    pub fn is_empty(&self) -> Result<bool, NdtError> {
        Ok(self.len()? == 0)
    }

    pub fn is_valid(&self) -> Result<bool, NdtError> {
        if !self.ty.is_optional() {
            return Ok(true);
        }
        self.bitmap
            .and_then(|b| b.get(self.index))
            .ok_or_else(|| NdtError::runtime("missing presence bitmap for optional value"))
    }

    pub fn is_na(&self) -> Result<bool, NdtError> {
        Ok(!self.is_valid()?)
    }

    pub(crate) fn set_presence(&self, present: bool) -> Result<(), NdtError> {
        if !self.ty.is_optional() {
            return Err(NdtError::value(format!(
                "type '{}' is not optional",
                self.ty
            )));
        }
        self.bitmap
            .and_then(|b| b.set(self.index, present))
            .ok_or_else(|| NdtError::runtime("missing presence bitmap for optional value"))
    }

    fn check_scalar<T: Scalar>(&self) -> Result<(), NdtError> {
        match self.ty.kind() {
            TypeKind::Primitive(p) if *p == T::PRIMITIVE => Ok(()),
            _ => Err(NdtError::Type(format!(
                "can not access '{}' as {}",
                self.ty,
                T::PRIMITIVE.name()
            ))),
        }
    }

    pub fn read<T: Scalar>(&self) -> Result<T, NdtError> {
        self.check_scalar::<T>()?;
        // SAFETY: the slot has the primitive's layout and lives for `'b`.
        Ok(unsafe { T::load(self.ptr) })
    }

    /// # Safety
    ///
    /// The caller must hold exclusive access to the buffer this handle points into.
    pub(crate) unsafe fn write<T: Scalar>(&self, value: T) -> Result<(), NdtError> {
        self.check_scalar::<T>()?;
        unsafe { value.store(self.ptr) };
        Ok(())
    }

    pub fn ref_target(&self) -> Result<Handle<'b>, NdtError> {
        self.ref_next()
    }

    pub(crate) fn string_slot(&self) -> *mut u8 {
        // SAFETY: a string slot holds one pointer.
        unsafe { self.ptr.cast::<*mut u8>().read_unaligned() }
    }

    pub(crate) fn bytes_slot(&self) -> BytesSlot {
        // SAFETY: a bytes slot has the `BytesSlot` layout.
        unsafe { self.ptr.cast::<BytesSlot>().read_unaligned() }
    }

    /// The string payload, or `None` if none was stored.
    pub fn get_string(&self) -> Result<Option<&'b str>, NdtError> {
        if !matches!(self.ty.kind(), TypeKind::String) {
            return Err(NdtError::Type(format!("'{}' is not a string", self.ty)));
        }
        let p = self.string_slot();
        if p.is_null() {
            return Ok(None);
        }
        // SAFETY: non-null string slots hold NUL-terminated payloads owned by the buffer.
        let s = unsafe { CStr::from_ptr(p.cast_const().cast()) };
        s.to_str()
            .map(Some)
            .map_err(|_| NdtError::value("string payload is not valid UTF-8"))
    }

    /// The bytes payload, or `None` if none was stored.
    pub fn get_bytes(&self) -> Result<Option<&'b [u8]>, NdtError> {
        if !matches!(self.ty.kind(), TypeKind::Bytes { .. }) {
            return Err(NdtError::Type(format!("'{}' is not bytes", self.ty)));
        }
        let slot = self.bytes_slot();
        if slot.data.is_null() {
            return Ok(None);
        }
        let len = usize::try_from(slot.size)
            .map_err(|_| NdtError::runtime("negative bytes payload size"))?;
        // SAFETY: non-null bytes slots hold `size` bytes owned by the buffer.
        Ok(Some(unsafe { std::slice::from_raw_parts(slot.data, len) }))
    }
}
