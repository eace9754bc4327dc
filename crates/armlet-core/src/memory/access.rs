//! Byte-level read/write paths over mapped regions.
//!
//! Host accesses (`read`, `write`) only require the bytes to be mapped.
//! Engine accesses (`fetch`, `load`, `check_store`, `store`) additionally enforce the
//! region permissions. Every access is validated across its whole span before
//! any byte moves, so a failing write leaves memory untouched.

use super::map::{Memory, Permissions};
use super::{AccessError, MemoryError};

/// Kind of memory access being validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum AccessKind {
    /// Data load.
    Read,
    /// Data store.
    Write,
    /// Instruction fetch.
    Fetch,
}

impl AccessKind {
    /// Permission bit a region must carry for this access.
    #[must_use]
    pub const fn required_permission(self) -> Permissions {
        match self {
            Self::Read => Permissions::READ,
            Self::Write => Permissions::WRITE,
            Self::Fetch => Permissions::EXEC,
        }
    }
}

impl Memory {
    /// Reads `len` bytes starting at `address`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Unmapped`] when any byte is outside the mapped regions.
    pub fn read(&self, address: u32, len: usize) -> Result<Vec<u8>, MemoryError> {
        self.validate(address, len, AccessKind::Read, false)?;
        let mut buf = vec![0; len];
        self.copy_out(address, &mut buf);
        Ok(buf)
    }

    /// Fills `buf` with the bytes starting at `address`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Unmapped`] when any byte is outside the mapped regions.
    pub fn read_into(&self, address: u32, buf: &mut [u8]) -> Result<(), MemoryError> {
        self.validate(address, buf.len(), AccessKind::Read, false)?;
        self.copy_out(address, buf);
        Ok(())
    }

    /// Writes `bytes` starting at `address`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Unmapped`] when any byte is outside the mapped
    /// regions; nothing is written in that case.
    pub fn write(&mut self, address: u32, bytes: &[u8]) -> Result<(), MemoryError> {
        self.validate(address, bytes.len(), AccessKind::Write, false)?;
        self.copy_in(address, bytes);
        Ok(())
    }

    /// Reads a little-endian 16-bit value.
    ///
    /// # Errors
    ///
    /// Same as [`Memory::read_into`].
    pub fn read_u16(&self, address: u32) -> Result<u16, MemoryError> {
        let mut buf = [0; 2];
        self.read_into(address, &mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    /// Reads a little-endian 32-bit value.
    ///
    /// # Errors
    ///
    /// Same as [`Memory::read_into`].
    pub fn read_u32(&self, address: u32) -> Result<u32, MemoryError> {
        let mut buf = [0; 4];
        self.read_into(address, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Writes a little-endian 16-bit value.
    ///
    /// # Errors
    ///
    /// Same as [`Memory::write`].
    pub fn write_u16(&mut self, address: u32, value: u16) -> Result<(), MemoryError> {
        self.write(address, &value.to_le_bytes())
    }

    /// Writes a little-endian 32-bit value.
    ///
    /// # Errors
    ///
    /// Same as [`Memory::write`].
    pub fn write_u32(&mut self, address: u32, value: u32) -> Result<(), MemoryError> {
        self.write(address, &value.to_le_bytes())
    }

    /// Fetches instruction bytes; the regions must be executable.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::Unmapped`] or [`AccessError::Protected`] with
    /// [`AccessKind::Fetch`].
    pub fn fetch(&self, address: u32, buf: &mut [u8]) -> Result<(), AccessError> {
        self.validate(address, buf.len(), AccessKind::Fetch, true)?;
        self.copy_out(address, buf);
        Ok(())
    }

    /// Engine data load of 1, 2, or 4 bytes, zero-extended; the regions must be readable.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::Unmapped`] or [`AccessError::Protected`] with
    /// [`AccessKind::Read`].
    pub fn load(&self, address: u32, size: u8) -> Result<u32, AccessError> {
        let mut buf = [0; 4];
        let bytes = &mut buf[..usize::from(size.min(4))];
        self.validate(address, bytes.len(), AccessKind::Read, true)?;
        self.copy_out(address, bytes);
        Ok(u32::from_le_bytes(buf))
    }

    /// Checks that an engine store of `len` bytes would succeed, without writing.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::Unmapped`] or [`AccessError::Protected`] with
    /// [`AccessKind::Write`].
    pub fn check_store(&self, address: u32, len: usize) -> Result<(), AccessError> {
        self.validate(address, len, AccessKind::Write, true)
    }

    /// Engine data store; the regions must be writable.
    ///
    /// # Errors
    ///
    /// Same as [`Memory::check_store`]; nothing is written on error.
    pub fn store(&mut self, address: u32, bytes: &[u8]) -> Result<(), AccessError> {
        self.validate(address, bytes.len(), AccessKind::Write, true)?;
        self.copy_in(address, bytes);
        Ok(())
    }

    fn validate(
        &self,
        address: u32,
        len: usize,
        access: AccessKind,
        enforce_permissions: bool,
    ) -> Result<(), AccessError> {
        let unmapped = AccessError::Unmapped {
            address,
            len,
            access,
        };
        let end = u64::from(address).saturating_add(len as u64);
        let mut cursor = u64::from(address);

        while cursor < end {
            let addr = u32::try_from(cursor).map_err(|_| unmapped)?;
            let mapped = self.mapped_at(addr).ok_or(unmapped)?;

            if enforce_permissions && !mapped.region.perms.contains(access.required_permission()) {
                return Err(AccessError::Protected {
                    address,
                    len,
                    access,
                });
            }

            cursor = mapped.region.end();
        }

        Ok(())
    }

    // Callers validate the span first.
    fn copy_out(&self, address: u32, buf: &mut [u8]) {
        let mut done = 0;
        while done < buf.len() {
            let Ok(step) = u32::try_from(done) else {
                return;
            };
            let addr = address.wrapping_add(step);
            let Some(mapped) = self.mapped_at(addr) else {
                return;
            };
            let offset = (addr - mapped.region.base) as usize;
            let chunk = (mapped.data.len() - offset).min(buf.len() - done);
            buf[done..done + chunk].copy_from_slice(&mapped.data[offset..offset + chunk]);
            done += chunk;
        }
    }

    fn copy_in(&mut self, address: u32, bytes: &[u8]) {
        let mut done = 0;
        while done < bytes.len() {
            let Ok(step) = u32::try_from(done) else {
                return;
            };
            let addr = address.wrapping_add(step);
            let Some(base) = self.mapped_at(addr).map(|mapped| mapped.region.base) else {
                return;
            };
            let Some(mapped) = self.regions.get_mut(&base) else {
                return;
            };
            let offset = (addr - base) as usize;
            let chunk = (mapped.data.len() - offset).min(bytes.len() - done);
            mapped.data[offset..offset + chunk].copy_from_slice(&bytes[done..done + chunk]);
            done += chunk;
        }
    }
}
