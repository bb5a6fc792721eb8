#![deny(unsafe_op_in_unsafe_fn)]

//! Typed memory buffers: allocation, initialization and teardown of storage
//! laid out by a concrete type, plus navigation into it.

mod allocator;
mod bitmap;
mod buffer;
mod handle;
mod view;

pub use allocator::{AllocationTelemetry, Allocator, CountingAllocator, SystemAllocator};
pub use bitmap::Bitmap;
pub use buffer::{Flags, MasterBuffer};
pub use handle::{Handle, Scalar};
pub use view::BufferView;
