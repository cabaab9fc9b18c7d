// SPDX-License-Identifier: MPL-2.0

//! The prelude imported by (almost) every module in this crate.

#![allow(unused_imports)]

pub(crate) use std::sync::{Arc, Weak};
pub(crate) use std::vec::Vec;

pub(crate) use log::{debug, error, info, trace, warn};

pub(crate) use crate::error::{Errno, Error};
pub(crate) use crate::{return_errno, return_errno_with_message};

pub(crate) type Result<T> = core::result::Result<T, Error>;
