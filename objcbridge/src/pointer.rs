use std::fmt;

use crate::marshal::{self, KeepAlive};
use crate::{Bridge, BridgeError, HostValue, Result, TypeEncoding};

/// Untyped native memory viewed as an array of `element`.
///
/// Arithmetic is unchecked; the only condition guarded here is a null base,
/// which fails every operation before any address is formed.
#[derive(Debug, Clone)]
pub struct RawPointer {
    element: TypeEncoding,
    address: usize,
}

impl RawPointer {
    pub fn new(element: TypeEncoding, address: usize) -> Self {
        Self { element, address }
    }

    pub fn null(element: TypeEncoding) -> Self {
        Self::new(element, 0)
    }

    pub fn element(&self) -> &TypeEncoding {
        &self.element
    }

    pub fn element_size(&self) -> Option<usize> {
        self.element.size().ok()
    }

    pub fn address(&self) -> usize {
        self.address
    }

    pub fn is_null(&self) -> bool {
        self.address == 0
    }

    /// Address of element `index`.
    pub fn address_at(&self, index: i64) -> Result<usize> {
        if self.is_null() {
            return Err(BridgeError::NullPointerAccess);
        }
        let size = self.element.size()? as i64;
        Ok(self.address.wrapping_add_signed(index.wrapping_mul(size) as isize))
    }

    pub fn offset(&self, index: i64) -> Result<RawPointer> {
        Ok(Self::new(self.element.clone(), self.address_at(index)?))
    }

    /// Reads element `index`.
    ///
    /// # Safety
    /// The element must lie in readable memory holding a valid value of the
    /// element type.
    pub unsafe fn get_value(&self, bridge: &Bridge, index: i64) -> Result<HostValue> {
        let address = self.address_at(index)?;
        let size = self.element.size()?;
        // SAFETY: non-null, caller guarantees `size` readable bytes
        let bytes = unsafe { std::slice::from_raw_parts(address as *const u8, size) };
        marshal::read_value(bridge, &self.element, bytes, 0)
    }

    /// Writes `value` into element `index`. Temporaries the conversion needs
    /// are parked in `keep_alive`.
    ///
    /// # Safety
    /// The element must lie in writable memory.
    pub unsafe fn set_value(
        &self,
        bridge: &Bridge,
        index: i64,
        value: &HostValue,
        keep_alive: &mut KeepAlive,
    ) -> Result<()> {
        let address = self.address_at(index)?;
        let size = self.element.size()?;
        // SAFETY: non-null, caller guarantees `size` writable bytes
        let bytes = unsafe { std::slice::from_raw_parts_mut(address as *mut u8, size) };
        marshal::write_value(bridge, &self.element, bytes, 0, value, keep_alive)
    }
}

impl fmt::Display for RawPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<^{} {:#x}>", self.element, self.address)
    }
}
