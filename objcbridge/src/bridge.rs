use std::rc::Rc;

use log::debug;

use crate::closure::{ClosureHandle, HostCallable, NativeClosure};
use crate::selector;
use crate::{Id, NativeObject, NativeRuntime, RawPointer, Result, TypeEncoding};

#[derive(Debug, Clone)]
pub struct BridgeCreateInfo {
    /// Character host code writes where a native message name has `:`.
    pub host_separator: char,
    /// Whether [`Bridge::wrap`] takes a reference on the objects it wraps.
    pub retain_wrapped: bool,
}

impl Default for BridgeCreateInfo {
    fn default() -> Self {
        Self {
            host_separator: '_',
            retain_wrapped: false,
        }
    }
}

pub struct BridgeShared {
    runtime: Rc<dyn NativeRuntime>,
    info: BridgeCreateInfo,
}

/// Context handed to every part of the bridge: the native runtime plus the
/// configuration it was created with. Cloning is cheap and shares both.
#[derive(Clone)]
pub struct Bridge {
    inner: Rc<BridgeShared>,
}

impl Bridge {
    pub fn new(runtime: Rc<dyn NativeRuntime>, info: BridgeCreateInfo) -> Self {
        debug!(
            "bridge created, host separator '{}', retain wrapped {}",
            info.host_separator, info.retain_wrapped
        );
        Self {
            inner: Rc::new(BridgeShared { runtime, info }),
        }
    }

    pub fn runtime(&self) -> &dyn NativeRuntime {
        self.inner.runtime.as_ref()
    }

    pub fn info(&self) -> &BridgeCreateInfo {
        &self.inner.info
    }

    pub fn host_separator(&self) -> char {
        self.inner.info.host_separator
    }

    /// Host method answering the native message `selector` when native code
    /// messages a host object.
    pub fn host_method_name(&self, selector: &str) -> String {
        selector::host_method_name(selector, self.host_separator())
    }

    /// The class object named `name`. Class objects live for the whole
    /// program, so the handle never retains.
    pub fn find_class(&self, name: &str) -> Option<NativeObject> {
        let class = self.runtime().class_named(name)?;
        Some(NativeObject::borrowed(self, class.as_id()))
    }

    pub fn has_protocol(&self, name: &str) -> bool {
        self.runtime().protocol_named(name).is_some()
    }

    pub fn wrap_object(&self, object: Id, retaining: bool) -> NativeObject {
        if retaining {
            NativeObject::retained(self, object)
        } else {
            NativeObject::borrowed(self, object)
        }
    }

    /// Wraps `object` with the ownership configured at creation.
    pub fn wrap(&self, object: Id) -> NativeObject {
        self.wrap_object(object, self.inner.info.retain_wrapped)
    }

    /// Creates a native closure calling `callable` and installs it.
    pub fn create_closure(
        &self,
        types: &str,
        callable: Rc<dyn HostCallable>,
    ) -> Result<ClosureHandle> {
        Ok(NativeClosure::new(self, types, callable)?.install())
    }

    /// A pointer handle over `address` whose elements have type
    /// `element_types`.
    pub fn pointer(&self, element_types: &str, address: usize) -> Result<RawPointer> {
        Ok(RawPointer::new(TypeEncoding::parse(element_types)?, address))
    }
}
