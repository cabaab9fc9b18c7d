// SPDX-License-Identifier: MPL-2.0

//! The prelude.

pub type Result<T> = core::result::Result<T, crate::error::Error>;

pub(crate) use std::any::Any;
pub(crate) use std::boxed::Box;
pub(crate) use std::sync::Arc;
pub(crate) use std::vec::Vec;
