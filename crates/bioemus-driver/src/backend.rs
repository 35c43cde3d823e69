//! Register access abstraction
//!
//! Every component that drives the emulation core (run control, monitoring
//! selection, configuration upload) talks to the fabric through
//! [`RegisterAccess`]. Two backends implement it:
//!
//! ```text
//! RegisterFile       /dev/mem window on the target board
//! SimRegisterFile    in-process model with handshake acknowledgement (tests, CI)
//! ```

use crate::error::{BioemusError, Result};
use bioemus_hw::{regs, QFormat};
use std::fmt::Debug;

/// Register counts of a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterLayout {
    /// Host-written registers, indices `0..write_count`.
    pub write_count: u16,
    /// Fabric-written registers, indices `write_count..write_count + read_count`.
    pub read_count: u16,
}

impl RegisterLayout {
    /// Emulation core 0 of the reference build.
    pub const CORE0: Self = Self {
        write_count: regs::WRITE_COUNT,
        read_count: regs::READ_COUNT,
    };

    /// Total registers in the window.
    #[must_use]
    pub const fn total(&self) -> u16 {
        self.write_count + self.read_count
    }

    /// Fail unless `index` is a write register.
    ///
    /// # Errors
    ///
    /// [`BioemusError::RegisterOutOfRange`] otherwise.
    pub fn check_write(&self, index: u16) -> Result<()> {
        if index < self.write_count {
            Ok(())
        } else {
            Err(BioemusError::RegisterOutOfRange {
                index,
                limit: self.write_count,
            })
        }
    }

    /// Fail unless `index` is inside the window.
    ///
    /// # Errors
    ///
    /// [`BioemusError::RegisterOutOfRange`] otherwise.
    pub fn check_read(&self, index: u16) -> Result<()> {
        if index < self.total() {
            Ok(())
        } else {
            Err(BioemusError::RegisterOutOfRange {
                index,
                limit: self.total(),
            })
        }
    }
}

/// Backend type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    /// Physical register window mapped from `/dev/mem`
    Mmap,
    /// In-process simulation
    Simulated,
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mmap => write!(f, "Mmap (/dev/mem)"),
            Self::Simulated => write!(f, "Simulated"),
        }
    }
}

/// Indexed 32-bit register access.
///
/// Writes are discrete, ordered events for the fabric: implementations must
/// neither merge nor reorder them.
pub trait RegisterAccess: Debug + Send {
    /// Register counts of this window.
    fn layout(&self) -> RegisterLayout;

    /// Backend identification.
    fn backend_type(&self) -> BackendType;

    /// Write a raw word to write register `index`.
    ///
    /// # Errors
    ///
    /// Returns error if `index` is not a write register.
    fn write_raw(&mut self, index: u16, value: u32) -> Result<()>;

    /// Read a raw word from any register of the window.
    ///
    /// # Errors
    ///
    /// Returns error if `index` is outside the window.
    fn read_raw(&self, index: u16) -> Result<u32>;

    /// Encode `value` in `format` and write it.
    ///
    /// # Errors
    ///
    /// Same as [`write_raw`](Self::write_raw).
    fn write_fixed(&mut self, index: u16, value: f32, format: QFormat) -> Result<()> {
        self.write_raw(index, format.encode_word(value))
    }

    /// Read and decode a fixed-point register.
    ///
    /// # Errors
    ///
    /// Same as [`read_raw`](Self::read_raw).
    fn read_fixed(&self, index: u16, format: QFormat) -> Result<f32> {
        Ok(format.decode_word(self.read_raw(index)?))
    }

    /// Write its own index to every write register, read them back and report
    /// whether all match. Leaves the pattern in the registers.
    ///
    /// # Errors
    ///
    /// Returns error only if an access itself fails.
    fn self_test(&mut self) -> Result<bool> {
        let count = self.layout().write_count;
        for i in 0..count {
            self.write_raw(i, u32::from(i))?;
        }
        let mut ok = true;
        for i in 0..count {
            let read = self.read_raw(i)?;
            if read != u32::from(i) {
                tracing::warn!("Register {i}: wrote {i}, read {read}");
                ok = false;
            }
        }
        Ok(ok)
    }
}

impl<R: RegisterAccess + ?Sized> RegisterAccess for Box<R> {
    fn layout(&self) -> RegisterLayout {
        (**self).layout()
    }

    fn backend_type(&self) -> BackendType {
        (**self).backend_type()
    }

    fn write_raw(&mut self, index: u16, value: u32) -> Result<()> {
        (**self).write_raw(index, value)
    }

    fn read_raw(&self, index: u16) -> Result<u32> {
        (**self).read_raw(index)
    }

    fn self_test(&mut self) -> Result<bool> {
        (**self).self_test()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_bounds() {
        let l = RegisterLayout::CORE0;
        assert!(l.check_write(62).is_ok());
        assert!(matches!(
            l.check_write(63),
            Err(BioemusError::RegisterOutOfRange { index: 63, limit: 63 })
        ));
        assert!(l.check_read(71).is_ok());
        assert!(l.check_read(72).is_err());
    }

    #[test]
    fn backend_type_display() {
        assert_eq!(BackendType::Simulated.to_string(), "Simulated");
    }
}
