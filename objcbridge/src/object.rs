use std::fmt::{self, Write as _};
use std::rc::Rc;

use log::debug;

use crate::invocation::FIRST_HOST_SLOT;
use crate::marshal::KeepAlive;
use crate::runtime::AutoreleasePool;
use crate::selector::{self, NATIVE_SEPARATOR};
use crate::{
    Bridge, BridgeError, CallRecord, HostValue, Id, MethodSignature, Result, TypeEncoding,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ownership {
    Borrowed,
    Retained,
}

struct ObjectInner {
    bridge: Bridge,
    id: Id,
    ownership: Ownership,
}

impl Drop for ObjectInner {
    fn drop(&mut self) {
        if self.ownership == Ownership::Retained && !self.id.is_nil() {
            self.bridge.runtime().release(self.id);
        }
    }
}

/// Host handle on a native object.
///
/// A borrowed handle relies on the object outliving it; a retained handle
/// holds one native reference, released exactly once when the last clone of
/// the handle is dropped.
#[derive(Clone)]
pub struct NativeObject(Rc<ObjectInner>);

impl NativeObject {
    pub fn borrowed(bridge: &Bridge, id: Id) -> Self {
        Self(Rc::new(ObjectInner {
            bridge: bridge.clone(),
            id,
            ownership: Ownership::Borrowed,
        }))
    }

    pub fn retained(bridge: &Bridge, id: Id) -> Self {
        if !id.is_nil() {
            bridge.runtime().retain(id);
        }
        Self(Rc::new(ObjectInner {
            bridge: bridge.clone(),
            id,
            ownership: Ownership::Retained,
        }))
    }

    pub fn id(&self) -> Id {
        self.0.id
    }

    pub fn is_nil(&self) -> bool {
        self.0.id.is_nil()
    }

    pub fn is_retaining(&self) -> bool {
        self.0.ownership == Ownership::Retained
    }

    pub fn class_name(&self) -> String {
        let runtime = self.0.bridge.runtime();
        match runtime.class_of(self.0.id) {
            Some(class) => runtime.class_name(class),
            None => "nil".to_string(),
        }
    }

    /// Sends `name` with `arguments` and returns the decoded result, or
    /// `Nil` for void methods.
    ///
    /// The signature is resolved before anything is converted: unknown
    /// messages and arity mismatches never reach the native runtime. Native
    /// temporaries created for the arguments live until the send returns.
    pub fn perform(&self, name: &str, arguments: &[HostValue]) -> Result<HostValue> {
        let bridge = &self.0.bridge;
        let runtime = bridge.runtime();
        let native_name =
            selector::native_message_name(name, arguments.len(), bridge.host_separator())?;
        let unknown = || BridgeError::UnknownMessage {
            class: self.class_name(),
            selector: native_name.clone(),
        };
        if self.is_nil() {
            return Err(unknown());
        }

        let selector = runtime.register_selector(&native_name);
        let types = runtime
            .method_types(self.0.id, selector)
            .ok_or_else(unknown)?;
        let signature = MethodSignature::parse(&types)?;
        if signature.host_arity() != arguments.len() {
            return Err(BridgeError::ArityMismatch {
                selector: native_name,
                expected: signature.host_arity(),
                found: arguments.len(),
            });
        }

        let mut record = CallRecord::new(signature)?;
        record.set_target(self.0.id)?;
        record.set_selector(selector)?;
        let mut keep_alive = KeepAlive::new(bridge);
        for (i, argument) in arguments.iter().enumerate() {
            record.set_slot(bridge, FIRST_HOST_SLOT + i, argument, &mut keep_alive)?;
        }

        debug!("send {}", self.format_call(&native_name, arguments));
        let _pool = AutoreleasePool::push(runtime);
        runtime
            .dispatch(&mut record)
            .map_err(BridgeError::NativeSideFailure)?;
        if record.signature().return_type().is_void() {
            return Ok(HostValue::Nil);
        }
        record.get_slot(bridge, 0)
    }

    pub fn is_kind_of_class(&self, class_name: &str) -> bool {
        let runtime = self.0.bridge.runtime();
        runtime
            .class_named(class_name)
            .is_some_and(|class| runtime.is_kind_of(self.0.id, class))
    }

    pub fn responds_to_selector(&self, name: &str) -> bool {
        let bridge = &self.0.bridge;
        let separator = bridge.host_separator();
        // a query has no arguments to count, so a trailing separator is what
        // marks a name that takes them
        let arity = usize::from(name.ends_with(separator) || name.ends_with(NATIVE_SEPARATOR));
        let Ok(native_name) = selector::native_message_name(name, arity, separator) else {
            return false;
        };
        let runtime = bridge.runtime();
        runtime.responds_to(self.0.id, runtime.register_selector(&native_name))
    }

    pub fn conforms_to_protocol(&self, protocol_name: &str) -> bool {
        let runtime = self.0.bridge.runtime();
        runtime
            .protocol_named(protocol_name)
            .is_some_and(|protocol| runtime.conforms_to(self.0.id, protocol))
    }

    /// Elements of an ordered native collection, read through `count` and
    /// `objectAtIndex:`.
    pub fn to_array(&self) -> Result<Vec<HostValue>> {
        let count = self.perform("count", &[])?;
        let count = count.as_int().ok_or_else(|| BridgeError::TypeMismatch {
            encoding: TypeEncoding::U64.to_string(),
            got: count.type_name(),
        })?;
        (0..count)
            .map(|i| self.perform("objectAtIndex:", &[HostValue::Int(i)]))
            .collect()
    }

    /// Entries of a keyed native collection, read through `allKeys` and
    /// `objectForKey:`.
    pub fn to_dictionary(&self) -> Result<Vec<(HostValue, HostValue)>> {
        let keys = match self.perform("allKeys", &[])? {
            HostValue::Object(keys) => keys.to_array()?,
            HostValue::Nil => Vec::new(),
            other => {
                return Err(BridgeError::TypeMismatch {
                    encoding: TypeEncoding::Object(None).to_string(),
                    got: other.type_name(),
                });
            }
        };
        keys.into_iter()
            .map(|key| {
                let value = self.perform("objectForKey:", std::slice::from_ref(&key))?;
                Ok((key, value))
            })
            .collect()
    }

    pub fn description(&self) -> Result<String> {
        match self.perform("description", &[])? {
            HostValue::String(description) => Ok(description),
            other => Ok(other.to_string()),
        }
    }

    /// Renders a send as `[<Class 0x..> label:arg label:arg]`.
    pub fn format_call(&self, native_name: &str, arguments: &[HostValue]) -> String {
        let mut call = format!("[{self}");
        if arguments.is_empty() {
            let _ = write!(call, " {native_name}");
        } else {
            for (label, argument) in native_name.split_terminator(NATIVE_SEPARATOR).zip(arguments) {
                let _ = write!(call, " {label}:{argument}");
            }
        }
        call.push(']');
        call
    }
}

impl fmt::Display for NativeObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} {:p}>", self.class_name(), self.0.id)
    }
}

impl fmt::Debug for NativeObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeObject")
            .field("id", &self.0.id)
            .field("ownership", &self.0.ownership)
            .finish()
    }
}
