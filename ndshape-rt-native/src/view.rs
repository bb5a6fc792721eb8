use std::marker::PhantomData;
use std::ptr::NonNull;

use ndshape_ast::{NdtError, Type};

use crate::bitmap::Bitmap;
use crate::handle::Handle;

/// Borrowed, typed memory. A view navigates and reads; it never clears or frees.
#[derive(Clone, Copy, Debug)]
pub struct BufferView<'a> {
    ty: &'a Type,
    data: NonNull<u8>,
    bitmap: Option<&'a Bitmap>,
    _memory: PhantomData<&'a [u8]>,
}

impl<'a> BufferView<'a> {
    /// # Safety
    ///
    /// `data` must point to storage laid out and initialized for `ty` (ref slots
    /// null or pointing to initialized targets, string and bytes slots null or
    /// pointing to their payloads) that stays valid and unmodified for `'a`.
    pub unsafe fn from_raw(ty: &'a Type, data: NonNull<u8>, bitmap: Option<&'a Bitmap>) -> Self {
        BufferView {
            ty,
            data,
            bitmap,
            _memory: PhantomData,
        }
    }

    pub fn ty(&self) -> &'a Type {
        self.ty
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.data.as_ptr()
    }

    pub fn root(&self) -> Handle<'a> {
        // SAFETY: upheld by `from_raw`.
        unsafe { Handle::new(self.data.as_ptr(), self.ty, self.bitmap) }
    }

    pub fn subtree(&self, path: &[i64]) -> Result<Handle<'a>, NdtError> {
        self.root().subtree(path)
    }
}
