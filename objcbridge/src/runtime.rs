//! The seam between the bridge and the native object runtime.
//!
//! Everything the bridge needs from the runtime goes through
//! [`NativeRuntime`]; handles are plain pointer-width words so they can be
//! copied in and out of call records unchanged.
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::{BridgeError, CallRecord};

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[repr(transparent)]
        #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(usize);

        impl $name {
            pub const NIL: Self = Self(0);

            pub const fn from_addr(addr: usize) -> Self {
                Self(addr)
            }

            pub const fn addr(self) -> usize {
                self.0
            }

            pub const fn is_nil(self) -> bool {
                self.0 == 0
            }
        }

        impl fmt::Pointer for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }
    };
}

handle!(
    /// Reference to a native object.
    Id
);
handle!(
    /// Reference to a native class. Classes are objects as well.
    Class
);
handle!(
    /// Registered message name.
    Sel
);
handle!(
    /// Reference to a native protocol.
    Protocol
);

impl Class {
    pub const fn as_id(self) -> Id {
        Id(self.0)
    }
}

/// Scalar carried by a native number object.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Bool(bool),
    Int(i64),
    Float(f64),
}

/// How the runtime classifies an object for conversion into host values.
#[derive(Debug, Clone, PartialEq)]
pub enum Bridged {
    String(String),
    Number(Number),
    Data(Vec<u8>),
    Opaque,
}

/// An exception in the native runtime's own error model.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{name}: {reason}")]
pub struct NativeException {
    pub name: String,
    pub reason: String,
}

impl NativeException {
    pub fn new(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::new("NSInvalidArgumentException", reason)
    }
}

impl From<BridgeError> for NativeException {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::NativeSideFailure(exception) => exception,
            other => Self::invalid_argument(other.to_string()),
        }
    }
}

pub trait NativeRuntime {
    fn class_named(&self, name: &str) -> Option<Class>;

    fn protocol_named(&self, name: &str) -> Option<Protocol>;

    /// Class of `object`; for a class object this is the class itself so
    /// that class messages resolve against it.
    fn class_of(&self, object: Id) -> Option<Class>;

    fn class_name(&self, class: Class) -> String;

    fn register_selector(&self, name: &str) -> Sel;

    fn selector_name(&self, selector: Sel) -> Option<Arc<str>>;

    /// Complete type signature of `selector` as understood by `object`.
    fn method_types(&self, object: Id, selector: Sel) -> Option<String>;

    /// Sends the message described by `record`: receiver in slot 1, selector
    /// in slot 2. The return slot is filled in place.
    fn dispatch(&self, record: &mut CallRecord) -> Result<(), NativeException>;

    fn is_kind_of(&self, object: Id, class: Class) -> bool;

    fn conforms_to(&self, object: Id, protocol: Protocol) -> bool;

    fn responds_to(&self, object: Id, selector: Sel) -> bool {
        self.method_types(object, selector).is_some()
    }

    fn retain(&self, object: Id);

    fn release(&self, object: Id);

    fn autorelease(&self, object: Id);

    fn push_autorelease_pool(&self);

    fn pop_autorelease_pool(&self);

    fn bridged(&self, object: Id) -> Bridged;

    /// The `new_*` constructors return objects owned by the caller.
    fn new_string(&self, value: &str) -> Id;

    fn new_number(&self, value: Number) -> Id;

    fn new_data(&self, bytes: &[u8]) -> Id;

    fn new_array(&self, elements: &[Id]) -> Id;

    fn new_dictionary(&self, entries: &[(Id, Id)]) -> Id;

    /// Records `exception` as pending. Used where control cannot unwind,
    /// such as a closure invocation entered through the C ABI.
    fn raise(&self, exception: NativeException);

    fn take_exception(&self) -> Option<NativeException>;
}

/// Scope guard around an autorelease pool.
pub(crate) struct AutoreleasePool<'a> {
    runtime: &'a dyn NativeRuntime,
}

impl<'a> AutoreleasePool<'a> {
    pub(crate) fn push(runtime: &'a dyn NativeRuntime) -> Self {
        runtime.push_autorelease_pool();
        Self { runtime }
    }
}

impl Drop for AutoreleasePool<'_> {
    fn drop(&mut self) {
        self.runtime.pop_autorelease_pool();
    }
}
