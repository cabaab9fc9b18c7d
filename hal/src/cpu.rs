// SPDX-License-Identifier: MPL-2.0

//! CPU topology.
//!
//! This kernel core models a single-CPU, non-preemptive machine: exactly one
//! task holds the CPU at any instant (see [`crate::task`]), so there is no
//! need for real per-CPU storage or SMP bring-up. This module only retains
//! the identifiers that the rest of the kernel uses to talk about "the CPU".

/// The id of the (only) CPU this kernel core runs on.
pub type CpuId = u32;

/// Returns the number of CPUs available to the kernel.
///
/// Always `1`: SMP is out of scope for this kernel core.
pub const fn num_cpus() -> u32 {
    1
}

/// Returns the id of the CPU the calling task is currently running on.
pub const fn current_cpu() -> CpuId {
    0
}
