// SPDX-License-Identifier: MPL-2.0

//! Populates `/dev` with the handful of trivial devices the kernel core
//! wires up at boot: `null`, `zero`, and three `tty` stand-ins.

use std::sync::Arc;

use crate::device::{Device, NullDevice, TtyDevice, ZeroDevice};
use crate::fs::vnode::{Vnode, VnodeKind};

/// Creates `/dev` under `root` and populates it.
pub fn mount(root: &Arc<Vnode>) {
    let dev = root.ops().mkdir("dev").expect("fresh root has no /dev yet");

    mknod_char(&dev, "null", Arc::new(NullDevice));
    mknod_char(&dev, "zero", Arc::new(ZeroDevice));
    for name in ["tty0", "tty1", "tty2"] {
        mknod_char(&dev, name, TtyDevice::new());
    }
}

fn mknod_char(dev: &Arc<Vnode>, name: &str, device: Arc<dyn Device>) {
    dev.ops()
        .mknod(name, VnodeKind::CharDevice, device)
        .expect("devfs entries are created once, at boot, with unique names");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{path, ramfs};

    #[test]
    fn dev_null_and_zero_are_reachable_by_path() {
        let root = ramfs::new_root();
        mount(&root);

        let null = path::lookup_path("/dev/null", &root, &root).unwrap();
        assert_eq!(null.kind(), VnodeKind::CharDevice);

        let zero = path::lookup_path("/dev/zero", &root, &root).unwrap();
        let mut buf = [0xffu8; 4];
        zero.device().unwrap().read(0, &mut buf).unwrap();
        assert_eq!(buf, [0u8; 4]);
    }
}
