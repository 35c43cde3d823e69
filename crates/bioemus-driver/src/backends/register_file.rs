//! AXI-Lite register window mapped from `/dev/mem`

use super::mmap::MmapRegion;
use crate::backend::{BackendType, RegisterAccess, RegisterLayout};
use crate::error::Result;
use bioemus_hw::regs;
use std::path::Path;

/// Physical memory device.
pub const DEV_MEM: &str = "/dev/mem";

/// Exclusive owner of the emulation core's register window.
///
/// Register `i` is the 32-bit word at byte offset `4 × i`. The window is
/// unmapped when the register file is dropped.
#[derive(Debug)]
pub struct RegisterFile {
    region: MmapRegion,
    layout: RegisterLayout,
}

impl RegisterFile {
    /// Map the window at physical `base` of `size` bytes.
    ///
    /// # Errors
    ///
    /// Returns error if `/dev/mem` cannot be opened or mapped, or if the
    /// layout does not fit in `size`.
    pub fn open(base: u64, size: usize, layout: RegisterLayout) -> Result<Self> {
        Self::open_path(DEV_MEM, base, size, layout)
    }

    /// Map the reference core 0 window.
    ///
    /// # Errors
    ///
    /// Same as [`open`](Self::open).
    pub fn open_core0() -> Result<Self> {
        Self::open(regs::BASE_ADDR_ZYNQMP, regs::RANGE_ZYNQMP, RegisterLayout::CORE0)
    }

    /// Map a window from an arbitrary device file.
    ///
    /// # Errors
    ///
    /// Same as [`open`](Self::open).
    pub fn open_path(
        path: impl AsRef<Path>,
        base: u64,
        size: usize,
        layout: RegisterLayout,
    ) -> Result<Self> {
        let needed = usize::from(layout.total()) * 4;
        if needed > size {
            return Err(crate::BioemusError::invalid_argument(format!(
                "{} registers need {needed} bytes, window is {size}",
                layout.total()
            )));
        }
        let region = MmapRegion::open(path, base, size, true)?;
        tracing::info!(
            "Register window @ {base:#x}: {} write, {} read registers",
            layout.write_count,
            layout.read_count
        );
        Ok(Self { region, layout })
    }
}

impl RegisterAccess for RegisterFile {
    fn layout(&self) -> RegisterLayout {
        self.layout
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Mmap
    }

    fn write_raw(&mut self, index: u16, value: u32) -> Result<()> {
        self.layout.check_write(index)?;
        self.region.write_u32(usize::from(index) * 4, value)
    }

    fn read_raw(&self, index: u16) -> Result<u32> {
        self.layout.check_read(index)?;
        self.region.read_u32(usize::from(index) * 4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn backing_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&vec![0u8; 4096]).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn window_over_plain_file() {
        let file = backing_file();
        let mut window =
            RegisterFile::open_path(file.path(), 0, 4096, RegisterLayout::CORE0).unwrap();
        assert!(window.self_test().unwrap());
        window
            .write_fixed(regs::V_INIT_SYN_SFI, -65.0, bioemus_hw::fixed::V_TRUNC)
            .unwrap();
        let back = window
            .read_fixed(regs::V_INIT_SYN_SFI, bioemus_hw::fixed::V_TRUNC)
            .unwrap();
        assert!((back + 65.0).abs() < 1e-3);
        assert!(window.write_raw(63, 0).is_err());
        assert!(window.read_raw(72).is_err());
    }

    #[test]
    fn layout_must_fit_window() {
        let file = backing_file();
        let err = RegisterFile::open_path(file.path(), 0, 64, RegisterLayout::CORE0).unwrap_err();
        assert!(matches!(err, crate::BioemusError::InvalidArgument { .. }));
    }
}
