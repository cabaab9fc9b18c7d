// SPDX-License-Identifier: MPL-2.0

mod recycle_allocator;

pub use self::recycle_allocator::RecycleAllocator;
