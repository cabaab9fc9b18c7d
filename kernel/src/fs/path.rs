// SPDX-License-Identifier: MPL-2.0

//! Pathname resolution: splitting a string into components and walking them
//! one vnode lookup at a time, the way `dir_namev`/`open_namev` do in the
//! source this is modeled on.

use std::sync::Arc;

use crate::error::{Errno, Result};
use crate::fs::vnode::{self, Vnode};

bitflags::bitflags! {
    pub struct OpenFlags: u32 {
        const CREAT = 1 << 0;
        const EXCL = 1 << 1;
        const DIRECTORY = 1 << 2;
    }
}

/// A resolved parent directory plus the final component name, as returned
/// by [`dir_namev`] — exactly what `create`/`mkdir`/`unlink`/`rename` need:
/// the directory to operate in, and the name to operate on within it.
pub struct NameAt {
    pub parent: Arc<Vnode>,
    pub name: String,
    pub trailing_slash: bool,
}

fn split_components(path: &str) -> (bool, Vec<&str>, bool) {
    let absolute = path.starts_with('/');
    let trailing_slash = path.len() > 1 && path.ends_with('/');
    let comps = path.split('/').filter(|s| !s.is_empty()).collect();
    (absolute, comps, trailing_slash)
}

/// Walks `comps` starting from `base` (or `root`, if the original path was
/// absolute), honoring `.` and `..` without ever going above `root`.
fn walk(comps: &[&str], absolute: bool, base: &Arc<Vnode>, root: &Arc<Vnode>) -> Result<Arc<Vnode>> {
    let mut stack: Vec<Arc<Vnode>> = vec![if absolute { root.clone() } else { base.clone() }];
    for (i, comp) in comps.iter().enumerate() {
        let is_last = i == comps.len() - 1;
        match *comp {
            "." => continue,
            ".." => {
                if stack.len() > 1 {
                    stack.pop();
                }
            }
            name => {
                let cur = stack.last().unwrap().clone();
                if !cur.is_dir() {
                    return Err(Errno::ENOTDIR.into());
                }
                let child = vnode::lookup(&cur, name)?;
                if !is_last && !child.is_dir() {
                    return Err(Errno::ENOTDIR.into());
                }
                stack.push(child);
            }
        }
    }
    Ok(stack.last().unwrap().clone())
}

/// Resolves `path` to a vnode. A trailing slash requires the result to be a
/// directory.
pub fn lookup_path(path: &str, base: &Arc<Vnode>, root: &Arc<Vnode>) -> Result<Arc<Vnode>> {
    if path.is_empty() {
        return Err(Errno::EINVAL.into());
    }
    let (absolute, comps, trailing_slash) = split_components(path);
    let result = walk(&comps, absolute, base, root)?;
    if trailing_slash && !result.is_dir() {
        return Err(Errno::ENOTDIR.into());
    }
    Ok(result)
}

/// Resolves everything but the last pathname component, returning the
/// parent directory and the final component's name. Used by every call that
/// names an entry to create, remove, or replace rather than one to open.
pub fn dir_namev(path: &str, base: &Arc<Vnode>, root: &Arc<Vnode>) -> Result<NameAt> {
    if path.is_empty() {
        return Err(Errno::EINVAL.into());
    }
    let (absolute, comps, trailing_slash) = split_components(path);
    let (last, rest) = match comps.split_last() {
        Some(split) => split,
        None => return Err(Errno::EINVAL.into()),
    };
    if *last == "." || *last == ".." {
        return Err(Errno::EINVAL.into());
    }
    let parent = walk(rest, absolute, base, root)?;
    if !parent.is_dir() {
        return Err(Errno::ENOTDIR.into());
    }
    Ok(NameAt {
        parent,
        name: (*last).to_string(),
        trailing_slash,
    })
}

/// Resolves `path` for `open`, creating the target first if `flags`
/// requests it and it is not already present.
pub fn open_namev(path: &str, flags: OpenFlags, base: &Arc<Vnode>, root: &Arc<Vnode>) -> Result<Arc<Vnode>> {
    match lookup_path(path, base, root) {
        Ok(vnode) => {
            if flags.contains(OpenFlags::CREAT | OpenFlags::EXCL) {
                return Err(Errno::EEXIST.into());
            }
            if flags.contains(OpenFlags::DIRECTORY) && !vnode.is_dir() {
                return Err(Errno::ENOTDIR.into());
            }
            Ok(vnode)
        }
        Err(e) if e.errno() == Errno::ENOENT && flags.contains(OpenFlags::CREAT) => {
            let at = dir_namev(path, base, root)?;
            if at.trailing_slash {
                return Err(Errno::ENOTDIR.into());
            }
            at.parent.ops().create(&at.name)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::ramfs;

    #[test]
    fn resolves_nested_directories_and_dot_dot() {
        let root = ramfs::new_root();
        let a = root.ops().mkdir("a").unwrap();
        let _b = a.ops().mkdir("b").unwrap();

        let resolved = lookup_path("/a/b/..", &root, &root).unwrap();
        assert!(Arc::ptr_eq(&resolved, &a));
    }

    #[test]
    fn trailing_slash_on_a_file_is_not_a_directory() {
        let root = ramfs::new_root();
        root.ops().create("f").unwrap();
        let err = lookup_path("/f/", &root, &root).unwrap_err();
        assert_eq!(err.errno(), Errno::ENOTDIR);
    }

    #[test]
    fn open_creat_makes_a_new_file_once() {
        let root = ramfs::new_root();
        let created = open_namev("/new", OpenFlags::CREAT, &root, &root).unwrap();
        assert!(!created.is_dir());

        let err = open_namev("/new", OpenFlags::CREAT | OpenFlags::EXCL, &root, &root).unwrap_err();
        assert_eq!(err.errno(), Errno::EEXIST);
    }

    #[test]
    fn missing_parent_directory_is_reported_as_such() {
        let root = ramfs::new_root();
        let err = dir_namev("/missing/child", &root, &root).unwrap_err();
        assert_eq!(err.errno(), Errno::ENOENT);
    }
}
