//! Call records: the receiver, selector, argument and return slots of one
//! message send, laid out according to a [`MethodSignature`].
//!
//! Slot 0 is the return value; slots `1..` are the arguments, with the
//! receiver in slot 1 and the selector in slot 2 for method calls. Argument
//! bytes are packed back to back in declaration order.
use std::fmt;
use std::mem::size_of;

use crate::marshal::{self, KeepAlive};
use crate::{
    Bridge, BridgeError, HostValue, Id, MethodSignature, Result, Sel, TypeEncoding,
};

pub const RECEIVER_SLOT: usize = 1;
pub const SELECTOR_SLOT: usize = 2;
/// First slot holding an argument visible to host code.
pub const FIRST_HOST_SLOT: usize = 3;
/// Largest argument or return buffer a call record allocates.
pub const MAX_RECORD_BYTES: usize = 1 << 20;

/// Plain values that can be copied in and out of a slot of the same size.
///
/// # Safety
/// Every bit pattern of `size_of::<Self>()` bytes must be a valid `Self`.
pub unsafe trait SlotScalar: Copy {}

macro_rules! slot_scalars {
    ($($ty:ty),* $(,)?) => {
        $(unsafe impl SlotScalar for $ty {})*
    };
}

slot_scalars!(i8, u8, i16, u16, i32, u32, i64, u64, f32, f64, isize, usize, Id, Sel);

#[derive(Clone)]
pub struct CallRecord {
    signature: MethodSignature,
    offsets: Vec<usize>,
    arguments: Vec<u8>,
    return_value: Vec<u8>,
}

impl CallRecord {
    pub fn new(signature: MethodSignature) -> Result<Self> {
        let offsets = signature.argument_offsets()?;
        let argument_bytes = signature.total_argument_bytes()?;
        let return_bytes = match signature.return_type() {
            TypeEncoding::Void => 0,
            // at least a register so narrow results widen in place
            other => other.size()?.max(size_of::<usize>()),
        };
        for needed in [argument_bytes, return_bytes] {
            if needed > MAX_RECORD_BYTES {
                return Err(BridgeError::BufferOverflow {
                    offset: 0,
                    needed,
                    available: MAX_RECORD_BYTES,
                });
            }
        }
        Ok(Self {
            signature,
            offsets,
            arguments: vec![0; argument_bytes],
            return_value: vec![0; return_bytes],
        })
    }

    pub fn signature(&self) -> &MethodSignature {
        &self.signature
    }

    pub fn slot_count(&self) -> usize {
        self.signature.slot_count()
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.slot_count() {
            return Err(BridgeError::SlotOutOfRange {
                index,
                count: self.slot_count(),
            });
        }
        Ok(())
    }

    pub fn slot_encoding(&self, index: usize) -> Result<&TypeEncoding> {
        self.signature.slot(index).ok_or(BridgeError::SlotOutOfRange {
            index,
            count: self.slot_count(),
        })
    }

    pub fn slot_bytes(&self, index: usize) -> Result<&[u8]> {
        self.check_index(index)?;
        if index == 0 {
            return Ok(&self.return_value);
        }
        let offset = self.offsets[index - 1];
        let size = self.signature.arguments()[index - 1].size()?;
        Ok(&self.arguments[offset..offset + size])
    }

    pub fn slot_bytes_mut(&mut self, index: usize) -> Result<&mut [u8]> {
        self.check_index(index)?;
        if index == 0 {
            return Ok(&mut self.return_value);
        }
        let offset = self.offsets[index - 1];
        let size = self.signature.arguments()[index - 1].size()?;
        Ok(&mut self.arguments[offset..offset + size])
    }

    /// Packed argument bytes, in the layout [`arguments_as_array`] expects.
    pub fn argument_bytes(&self) -> &[u8] {
        &self.arguments
    }

    /// Raw typed read of a slot whose size matches `T`.
    pub fn get<T: SlotScalar>(&self, index: usize) -> Result<T> {
        let slot = self.slot_bytes(index)?;
        if slot.len() < size_of::<T>() || (index != 0 && slot.len() != size_of::<T>()) {
            return Err(self.size_mismatch::<T>(index));
        }
        // SAFETY: length checked above and every bit pattern is a valid T
        Ok(unsafe { (slot.as_ptr() as *const T).read_unaligned() })
    }

    /// Raw typed write of a slot whose size matches `T`.
    pub fn set<T: SlotScalar>(&mut self, index: usize, value: T) -> Result<()> {
        let error = self.size_mismatch::<T>(index);
        let slot = self.slot_bytes_mut(index)?;
        if slot.len() < size_of::<T>() || (index != 0 && slot.len() != size_of::<T>()) {
            return Err(error);
        }
        // SAFETY: length checked above
        unsafe { (slot.as_mut_ptr() as *mut T).write_unaligned(value) };
        Ok(())
    }

    fn size_mismatch<T>(&self, index: usize) -> BridgeError {
        BridgeError::TypeMismatch {
            encoding: self
                .signature
                .slot(index)
                .map(ToString::to_string)
                .unwrap_or_default(),
            got: std::any::type_name::<T>(),
        }
    }

    pub fn target(&self) -> Result<Id> {
        self.get(RECEIVER_SLOT)
    }

    pub fn set_target(&mut self, target: Id) -> Result<()> {
        self.set(RECEIVER_SLOT, target)
    }

    pub fn selector(&self) -> Result<Sel> {
        self.get(SELECTOR_SLOT)
    }

    pub fn set_selector(&mut self, selector: Sel) -> Result<()> {
        self.set(SELECTOR_SLOT, selector)
    }

    /// Decodes slot `index` into a host value. The return slot of a void
    /// signature cannot be read.
    pub fn get_slot(&self, bridge: &Bridge, index: usize) -> Result<HostValue> {
        let encoding = self.slot_encoding(index)?;
        if encoding.is_void() {
            return Err(BridgeError::VoidReturn);
        }
        marshal::read_value(bridge, encoding, self.slot_bytes(index)?, 0)
    }

    pub fn set_slot(
        &mut self,
        bridge: &Bridge,
        index: usize,
        value: &HostValue,
        keep_alive: &mut KeepAlive,
    ) -> Result<()> {
        let encoding = self.slot_encoding(index)?.clone();
        if encoding.is_void() {
            return Err(BridgeError::VoidReturn);
        }
        let slot = self.slot_bytes_mut(index)?;
        marshal::write_value(bridge, &encoding, slot, 0, value, keep_alive)
    }

    /// The return slot widened to an integer register.
    pub fn return_register(&self) -> Result<usize> {
        marshal::register_from_slot(self.signature.return_type(), &self.return_value)
    }

    /// Host view of every argument slot, implicit ones included.
    pub fn arguments(&self, bridge: &Bridge) -> Result<Vec<HostValue>> {
        arguments_as_array(bridge, &self.signature, &self.arguments)
    }
}

impl fmt::Debug for CallRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallRecord")
            .field("signature", &self.signature.to_string())
            .field("arguments", &self.arguments)
            .field("return_value", &self.return_value)
            .finish()
    }
}

pub fn total_argument_bytes(signature: &MethodSignature) -> Result<usize> {
    Ok(signature.total_argument_bytes()?)
}

/// Decodes every argument of `signature` from a packed buffer.
pub fn arguments_as_array(
    bridge: &Bridge,
    signature: &MethodSignature,
    buffer: &[u8],
) -> Result<Vec<HostValue>> {
    let offsets = signature.argument_offsets()?;
    signature
        .arguments()
        .iter()
        .zip(offsets)
        .map(|(encoding, offset)| marshal::read_value(bridge, encoding, buffer, offset))
        .collect()
}
