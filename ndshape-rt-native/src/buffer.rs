use std::borrow::Cow;
use std::ffi::CStr;
use std::fmt;
use std::ops::BitOr;
use std::ptr::{self, NonNull};

use ndshape_ast::{NdtError, Type, TypeKind};
use ndshape_parse::{ParseConfig, try_parse_type};
use tracing::{debug, trace};

use crate::allocator::{Allocator, SystemAllocator};
use crate::bitmap::Bitmap;
use crate::handle::{BytesSlot, Handle, Scalar};
use crate::view::BufferView;

/// Ownership bits of a [`MasterBuffer`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Flags(u32);

impl Flags {
    pub const OWN_TYPE: Flags = Flags(0x0001);
    pub const OWN_DATA: Flags = Flags(0x0002);
    pub const OWN_STRINGS: Flags = Flags(0x0004);
    pub const OWN_BYTES: Flags = Flags(0x0008);
    pub const OWN_POINTERS: Flags = Flags(0x0010);
    pub const OWN_EMBEDDED: Flags = Flags(0x001c);
    pub const OWN_ALL: Flags = Flags(0x001f);

    pub const fn empty() -> Flags {
        Flags(0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub fn from_bits(bits: u32) -> Option<Flags> {
        (bits & !Self::OWN_ALL.0 == 0).then_some(Flags(bits))
    }

    pub const fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: Flags) -> Flags {
        Flags(self.0 | other.0)
    }

    pub const fn difference(self, other: Flags) -> Flags {
        Flags(self.0 & !other.0)
    }
}

impl BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        self.union(rhs)
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Flags::OWN_TYPE, "OWN_TYPE"),
            (Flags::OWN_DATA, "OWN_DATA"),
            (Flags::OWN_STRINGS, "OWN_STRINGS"),
            (Flags::OWN_BYTES, "OWN_BYTES"),
            (Flags::OWN_POINTERS, "OWN_POINTERS"),
        ];
        let set: Vec<&str> = names
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "Flags({})", set.join(" | "))
    }
}

fn to_usize(n: i64, what: &str) -> Result<usize, NdtError> {
    usize::try_from(n).map_err(|_| NdtError::value(format!("negative {what}: {n}")))
}

/// Init and Clear over one buffer: the allocator it draws from and what it owns.
struct Engine<'a, A: Allocator> {
    alloc: &'a A,
    flags: Flags,
}

impl<A: Allocator> Engine<'_, A> {
    /// Initialize zero-filled storage. On error nothing below `h` stays allocated.
    fn init(&self, h: Handle<'_>) -> Result<(), NdtError> {
        let t = h.ty();
        if t.is_abstract() {
            return Err(NdtError::runtime(format!("init reached abstract type '{t}'")));
        }
        match t.kind() {
            TypeKind::FixedDim { shape, .. } => {
                for i in 0..*shape {
                    if let Err(e) = self.init(h.fixed_dim_next(i)) {
                        (0..i).for_each(|j| self.clear(h.fixed_dim_next(j)));
                        return Err(e);
                    }
                }
                Ok(())
            }
            TypeKind::VarDim { .. } => {
                let (start, step, shape) = h.var_indices()?;
                for i in 0..shape {
                    if let Err(e) = self.init(h.var_dim_next(start, step, i)) {
                        (0..i).for_each(|j| self.clear(h.var_dim_next(start, step, j)));
                        return Err(e);
                    }
                }
                Ok(())
            }
            TypeKind::Tuple { fields, .. } | TypeKind::Record { fields, .. } => {
                for i in 0..fields.len() {
                    if let Err(e) = self.init(h.field_next(i)) {
                        (0..i).for_each(|j| self.clear(h.field_next(j)));
                        return Err(e);
                    }
                }
                Ok(())
            }
            TypeKind::Ref(inner) => {
                if !self.flags.contains(Flags::OWN_POINTERS) {
                    return Ok(());
                }
                let size = to_usize(inner.datasize(), "datasize")?;
                let align = usize::from(inner.align());
                let target = self
                    .alloc
                    .alloc_aligned(size, align)
                    .ok_or_else(|| NdtError::memory("out of memory allocating ref target"))?;
                trace!(ty = %inner, size, "ref target allocated");
                // Seed the slot so the inner handle's bitmap lookup matches the ref's.
                // SAFETY: the slot holds one pointer inside initialized storage.
                unsafe { h.ptr.cast::<*mut u8>().write_unaligned(target.as_ptr()) };
                let inner_h = h.ref_next()?;
                if let Err(e) = self.init(inner_h) {
                    // SAFETY: `target` came from `alloc_aligned` with this size and alignment.
                    unsafe {
                        h.ptr.cast::<*mut u8>().write_unaligned(ptr::null_mut());
                        self.alloc.free_aligned(target, size, align);
                    }
                    return Err(e);
                }
                Ok(())
            }
            TypeKind::Constr { .. } | TypeKind::Module { .. } => self.init(h.wrapped_next()),
            TypeKind::Char(_) => Err(NdtError::not_implemented(
                "char is not implemented in typed buffers",
            )),
            TypeKind::Nominal { .. }
            | TypeKind::Categorical(_)
            | TypeKind::Primitive(_)
            | TypeKind::String
            | TypeKind::FixedString { .. }
            | TypeKind::FixedBytes { .. }
            | TypeKind::Bytes { .. } => Ok(()),
            _ => Err(NdtError::runtime(format!("init reached abstract type '{t}'"))),
        }
    }

    /// Release what this buffer owns below `h`. Safe on partially initialized storage.
    fn clear(&self, h: Handle<'_>) {
        let t = h.ty();
        match t.kind() {
            TypeKind::FixedDim { shape, .. } => {
                (0..*shape).for_each(|i| self.clear(h.fixed_dim_next(i)));
            }
            TypeKind::VarDim { .. } => {
                // Offsets were checked by init; a failure here means nothing was allocated.
                if let Ok((start, step, shape)) = h.var_indices() {
                    (0..shape).for_each(|i| self.clear(h.var_dim_next(start, step, i)));
                }
            }
            TypeKind::Tuple { fields, .. } | TypeKind::Record { fields, .. } => {
                (0..fields.len()).for_each(|i| self.clear(h.field_next(i)));
            }
            TypeKind::Ref(inner) => {
                if !self.flags.contains(Flags::OWN_POINTERS) {
                    return;
                }
                let Ok(inner_h) = h.ref_next() else {
                    return;
                };
                self.clear(inner_h);
                if let Some(target) = NonNull::new(h.ref_slot()) {
                    let size = inner.datasize().max(0) as usize;
                    trace!(ty = %inner, size, "ref target freed");
                    // SAFETY: owned ref targets come from `alloc_aligned` with the inner layout.
                    unsafe {
                        self.alloc
                            .free_aligned(target, size, usize::from(inner.align()));
                        h.ptr.cast::<*mut u8>().write_unaligned(ptr::null_mut());
                    }
                }
            }
            TypeKind::String => {
                if self.flags.contains(Flags::OWN_STRINGS) {
                    self.free_string(h);
                }
            }
            TypeKind::Bytes { target_align } => {
                if self.flags.contains(Flags::OWN_BYTES) {
                    self.free_bytes(h, *target_align);
                }
            }
            TypeKind::Constr { .. } | TypeKind::Module { .. } => self.clear(h.wrapped_next()),
            _ => {}
        }
    }

    fn free_string(&self, h: Handle<'_>) {
        let Some(p) = NonNull::new(h.string_slot()) else {
            return;
        };
        // SAFETY: owned string payloads are NUL-terminated blocks from `alloc`.
        unsafe {
            let size = CStr::from_ptr(p.as_ptr().cast_const().cast()).to_bytes().len() + 1;
            trace!(size, "string payload freed");
            self.alloc.free(p, size);
            h.ptr.cast::<*mut u8>().write_unaligned(ptr::null_mut());
        }
    }

    fn free_bytes(&self, h: Handle<'_>, target_align: u16) {
        let slot = h.bytes_slot();
        let Some(p) = NonNull::new(slot.data) else {
            return;
        };
        let size = slot.size.max(0) as usize;
        trace!(size, "bytes payload freed");
        // SAFETY: owned bytes payloads come from `alloc_aligned` with the slot's size.
        unsafe {
            self.alloc.free_aligned(p, size, usize::from(target_align));
            h.ptr.cast::<BytesSlot>().write_unaligned(BytesSlot {
                size: 0,
                data: ptr::null_mut(),
            });
        }
    }
}

/// Sole owner of one typed allocation and everything hanging off it.
///
/// The type is owned exactly when it is held as `Cow::Owned`. Dropping the
/// buffer clears the tree (freeing the ref targets and payloads its flags
/// claim), then frees the root block, then drops the type.
pub struct MasterBuffer<'t, A: Allocator = SystemAllocator> {
    data: NonNull<u8>,
    bitmap: Bitmap,
    flags: Flags,
    alloc: A,
    ty: Cow<'t, Type>,
}

// SAFETY: the buffer exclusively owns its storage; presence cells make it `!Sync`.
unsafe impl<A: Allocator + Send> Send for MasterBuffer<'_, A> {}

impl<'t> MasterBuffer<'t> {
    pub fn from_type(ty: Cow<'t, Type>, flags: Flags) -> Result<Self, NdtError> {
        Self::from_type_in(ty, flags, SystemAllocator)
    }
}

impl MasterBuffer<'static> {
    /// Parse `src` and allocate a buffer that owns the resulting type.
    pub fn from_type_string(src: &str, flags: Flags) -> Result<Self, NdtError> {
        Self::from_type_string_in(src, &ParseConfig::default(), flags, SystemAllocator)
    }
}

impl<A: Allocator> MasterBuffer<'static, A> {
    pub fn from_type_string_in(
        src: &str,
        config: &ParseConfig,
        flags: Flags,
        alloc: A,
    ) -> Result<Self, NdtError> {
        if !flags.contains(Flags::OWN_TYPE) {
            return Err(NdtError::value(
                "a buffer built from a type string must own its type",
            ));
        }
        let ty = try_parse_type(src, config).map_err(|e| NdtError::value(e.message))?;
        MasterBuffer::from_type_in(Cow::Owned(ty), flags, alloc)
    }
}

impl<'t, A: Allocator> MasterBuffer<'t, A> {
    /// Allocate zeroed storage for `ty` and initialize it.
    pub fn from_type_in(ty: Cow<'t, Type>, flags: Flags, alloc: A) -> Result<Self, NdtError> {
        if !flags.contains(Flags::OWN_DATA) {
            return Err(NdtError::value(
                "a master buffer must own its data; use a view for borrowed memory",
            ));
        }
        if matches!(ty, Cow::Owned(_)) != flags.contains(Flags::OWN_TYPE) {
            return Err(NdtError::value(
                "OWN_TYPE must be set exactly when the type is owned",
            ));
        }
        if ty.is_abstract() {
            return Err(NdtError::value(format!(
                "can not allocate a buffer for abstract type '{ty}'"
            )));
        }

        let size = to_usize(ty.datasize(), "datasize")?;
        let align = usize::from(ty.align());
        let bitmap = Bitmap::new(&ty)?;
        let data = alloc
            .alloc_aligned(size, align)
            .ok_or_else(|| NdtError::memory(format!("out of memory allocating {size} bytes")))?;

        let engine = Engine {
            alloc: &alloc,
            flags,
        };
        // SAFETY: `data` is zeroed storage laid out for `ty`.
        let root = unsafe { Handle::new(data.as_ptr(), &ty, Some(&bitmap)) };
        if let Err(e) = engine.init(root) {
            // SAFETY: `data` came from `alloc_aligned` with this size and alignment.
            unsafe { alloc.free_aligned(data, size, align) };
            return Err(e);
        }

        debug!(ty = %ty, size, align, flags = ?flags, "buffer allocated");
        Ok(MasterBuffer {
            data,
            bitmap,
            flags,
            alloc,
            ty,
        })
    }

    pub fn ty(&self) -> &Type {
        &self.ty
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn allocator(&self) -> &A {
        &self.alloc
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.data.as_ptr()
    }

    /// Size of the root allocation in bytes.
    pub fn nbytes(&self) -> usize {
        self.ty.datasize().max(0) as usize
    }

    /// The raw bytes of the root block.
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: the root block holds `nbytes` initialized bytes.
        unsafe { std::slice::from_raw_parts(self.data.as_ptr(), self.nbytes()) }
    }

    pub fn root(&self) -> Handle<'_> {
        // SAFETY: the root block is initialized storage for `ty` owned by `self`.
        unsafe { Handle::new(self.data.as_ptr(), &self.ty, Some(&self.bitmap)) }
    }

    pub fn subtree(&self, path: &[i64]) -> Result<Handle<'_>, NdtError> {
        self.root().subtree(path)
    }

    /// A non-owning view of the same memory.
    pub fn view(&self) -> BufferView<'_> {
        // SAFETY: the view borrows `self`, so the storage outlives it.
        unsafe { BufferView::from_raw(&self.ty, self.data, Some(&self.bitmap)) }
    }

    pub fn write<T: Scalar>(&mut self, path: &[i64], value: T) -> Result<(), NdtError> {
        let h = self.subtree(path)?.resolve()?;
        // SAFETY: `&mut self` gives exclusive access to the storage.
        unsafe { h.write(value)? };
        if h.ty().is_optional() {
            h.set_presence(true)?;
        }
        Ok(())
    }

    pub fn set_na(&mut self, path: &[i64]) -> Result<(), NdtError> {
        self.subtree(path)?.presence_holder()?.set_presence(false)
    }

    pub fn set_valid(&mut self, path: &[i64]) -> Result<(), NdtError> {
        self.subtree(path)?.presence_holder()?.set_presence(true)
    }

    fn engine(&self) -> Engine<'_, A> {
        Engine {
            alloc: &self.alloc,
            flags: self.flags,
        }
    }

    /// Store a copy of `value` as the string payload at `path`, releasing the old one.
    pub fn set_string(&mut self, path: &[i64], value: &str) -> Result<(), NdtError> {
        if !self.flags.contains(Flags::OWN_STRINGS) {
            return Err(NdtError::value("buffer does not own its strings"));
        }
        if value.as_bytes().contains(&0) {
            return Err(NdtError::value("string payload contains a NUL byte"));
        }
        let h = self.subtree(path)?.resolve()?;
        if !matches!(h.ty().kind(), TypeKind::String) {
            return Err(NdtError::Type(format!("'{}' is not a string", h.ty())));
        }
        let size = value.len() + 1;
        let p = self
            .alloc
            .alloc(size)
            .ok_or_else(|| NdtError::memory("out of memory allocating string payload"))?;
        trace!(size, "string payload allocated");
        self.engine().free_string(h);
        // SAFETY: `p` holds `size` bytes; the slot holds one pointer.
        unsafe {
            ptr::copy_nonoverlapping(value.as_ptr(), p.as_ptr(), value.len());
            p.as_ptr().add(value.len()).write(0);
            h.ptr.cast::<*mut u8>().write_unaligned(p.as_ptr());
        }
        if h.ty().is_optional() {
            h.set_presence(true)?;
        }
        Ok(())
    }

    /// Store a copy of `value` as the bytes payload at `path`, releasing the old one.
    pub fn set_bytes(&mut self, path: &[i64], value: &[u8]) -> Result<(), NdtError> {
        if !self.flags.contains(Flags::OWN_BYTES) {
            return Err(NdtError::value("buffer does not own its bytes"));
        }
        let h = self.subtree(path)?.resolve()?;
        let TypeKind::Bytes { target_align } = h.ty().kind() else {
            return Err(NdtError::Type(format!("'{}' is not bytes", h.ty())));
        };
        let align = usize::from(*target_align);
        let p = self
            .alloc
            .alloc_aligned(value.len(), align)
            .ok_or_else(|| NdtError::memory("out of memory allocating bytes payload"))?;
        trace!(size = value.len(), align, "bytes payload allocated");
        self.engine().free_bytes(h, *target_align);
        // SAFETY: `p` holds `value.len()` bytes; the slot has the `BytesSlot` layout.
        unsafe {
            ptr::copy_nonoverlapping(value.as_ptr(), p.as_ptr(), value.len());
            h.ptr.cast::<BytesSlot>().write_unaligned(BytesSlot {
                size: value.len() as i64,
                data: p.as_ptr(),
            });
        }
        if h.ty().is_optional() {
            h.set_presence(true)?;
        }
        Ok(())
    }
}

impl<A: Allocator> Drop for MasterBuffer<'_, A> {
    fn drop(&mut self) {
        self.engine().clear(self.root());
        let size = self.nbytes();
        // SAFETY: the root block came from `alloc_aligned` with the type's layout.
        unsafe {
            self.alloc
                .free_aligned(self.data, size, usize::from(self.ty.align()));
        }
        debug!(ty = %self.ty, size, "buffer destroyed");
    }
}

impl<A: Allocator> fmt::Debug for MasterBuffer<'_, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterBuffer")
            .field("type", &self.ty.to_string())
            .field("data", &self.data)
            .field("flags", &self.flags)
            .finish()
    }
}
