//! An in-process native runtime backed by plain tables.
//!
//! Classes, protocols and objects are entries in maps guarded by
//! `parking_lot` locks; methods are Rust closures over a [`CallRecord`].
//! Guards are never held while a method runs, so implementations may send
//! further messages, allocate, or call back into host closures.
mod foundation;

use std::cell::Cell;
use std::collections::HashMap;
use std::ffi::CString;
use std::rc::Rc;
use std::sync::Arc;

use log::{trace, warn};
use parking_lot::{Mutex, RwLock};

use crate::closure::{self, ClosureLiteral};
use crate::interning::SelectorTable;
use crate::invocation::{FIRST_HOST_SLOT, SlotScalar};
use crate::{
    Bridged, CallRecord, Class, Id, NativeException, NativeRuntime, Number, Protocol, Sel,
};

/// First handle given out; everything below is treated as a bogus address.
const HANDLE_BASE: usize = 0x1000;
const HANDLE_STRIDE: usize = 0x10;

pub type MethodImpl = Rc<dyn Fn(&TableRuntime, &mut CallRecord) -> Result<(), NativeException>>;

#[derive(Clone)]
struct Method {
    types: Arc<str>,
    implementation: MethodImpl,
}

struct ClassEntry {
    name: String,
    superclass: Option<Class>,
    methods: HashMap<Sel, Method>,
    class_methods: HashMap<Sel, Method>,
    protocols: Vec<Protocol>,
}

struct ProtocolEntry {
    name: String,
    inherits: Vec<Protocol>,
}

/// Native state an object carries besides its class.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Plain,
    String(String),
    Number(Number),
    Data(Vec<u8>),
    Array(Vec<Id>),
    Dictionary(Vec<(Id, Id)>),
}

struct ObjectEntry {
    class: Class,
    references: usize,
    payload: Payload,
}

struct Tables {
    classes: HashMap<Class, ClassEntry>,
    class_names: HashMap<String, Class>,
    protocols: HashMap<Protocol, ProtocolEntry>,
    protocol_names: HashMap<String, Protocol>,
    objects: HashMap<Id, ObjectEntry>,
    next_handle: usize,
}

impl Tables {
    fn allocate_handle(&mut self) -> usize {
        let handle = self.next_handle;
        self.next_handle += HANDLE_STRIDE;
        handle
    }

    fn superclasses(&self, class: Class) -> impl Iterator<Item = &ClassEntry> {
        std::iter::successors(self.classes.get(&class), |entry| {
            entry.superclass.and_then(|superclass| self.classes.get(&superclass))
        })
    }

    fn is_subclass(&self, class: Class, ancestor: Class) -> bool {
        std::iter::successors(Some(class), |class| {
            self.classes.get(class).and_then(|entry| entry.superclass)
        })
        .any(|class| class == ancestor)
    }

    fn class_of(&self, object: Id) -> Option<Class> {
        let class = Class::from_addr(object.addr());
        if self.classes.contains_key(&class) {
            return Some(class);
        }
        self.objects.get(&object).map(|entry| entry.class)
    }

    fn protocol_inherits(&self, protocol: Protocol, ancestor: Protocol) -> bool {
        protocol == ancestor
            || self.protocols.get(&protocol).is_some_and(|entry| {
                entry
                    .inherits
                    .iter()
                    .any(|&parent| self.protocol_inherits(parent, ancestor))
            })
    }
}

/// Something an autorelease pool releases when it drains.
enum Pooled {
    Object(Id),
    Bytes(CString),
}

/// In-process [`NativeRuntime`] with a small Foundation-like class library.
pub struct TableRuntime {
    tables: RwLock<Tables>,
    selectors: SelectorTable,
    pools: Mutex<Vec<Vec<Pooled>>>,
    exception: Mutex<Option<NativeException>>,
    dispatches: Cell<usize>,
}

impl TableRuntime {
    pub fn new() -> Self {
        let runtime = Self::empty();
        foundation::install(&runtime);
        runtime
    }

    /// A runtime without any classes.
    pub fn empty() -> Self {
        Self {
            tables: RwLock::new(Tables {
                classes: HashMap::new(),
                class_names: HashMap::new(),
                protocols: HashMap::new(),
                protocol_names: HashMap::new(),
                objects: HashMap::new(),
                next_handle: HANDLE_BASE,
            }),
            selectors: SelectorTable::new(),
            // the root pool catches objects autoreleased outside any scope
            pools: Mutex::new(vec![Vec::new()]),
            exception: Mutex::new(None),
            dispatches: Cell::new(0),
        }
    }

    /// Defines `name` below `superclass`, or returns the existing class.
    pub fn define_class(&self, name: &str, superclass: Option<Class>) -> Class {
        let mut tables = self.tables.write();
        if let Some(&class) = tables.class_names.get(name) {
            return class;
        }
        let class = Class::from_addr(tables.allocate_handle());
        tables.classes.insert(
            class,
            ClassEntry {
                name: name.to_string(),
                superclass,
                methods: HashMap::new(),
                class_methods: HashMap::new(),
                protocols: Vec::new(),
            },
        );
        tables.class_names.insert(name.to_string(), class);
        trace!("defined class {name} at {class:p}");
        class
    }

    pub fn define_protocol(&self, name: &str, inherits: &[Protocol]) -> Protocol {
        let mut tables = self.tables.write();
        if let Some(&protocol) = tables.protocol_names.get(name) {
            return protocol;
        }
        let protocol = Protocol::from_addr(tables.allocate_handle());
        tables.protocols.insert(
            protocol,
            ProtocolEntry {
                name: name.to_string(),
                inherits: inherits.to_vec(),
            },
        );
        tables.protocol_names.insert(name.to_string(), protocol);
        protocol
    }

    pub fn adopt_protocol(&self, class: Class, protocol: Protocol) {
        if let Some(entry) = self.tables.write().classes.get_mut(&class) {
            entry.protocols.push(protocol);
        }
    }

    fn insert_method<F>(&self, class: Class, name: &str, types: &str, implementation: F, meta: bool)
    where
        F: Fn(&TableRuntime, &mut CallRecord) -> Result<(), NativeException> + 'static,
    {
        let selector = self.selectors.add(name);
        let method = Method {
            types: Arc::from(types),
            implementation: Rc::new(implementation),
        };
        let mut tables = self.tables.write();
        let Some(entry) = tables.classes.get_mut(&class) else {
            warn!("method '{name}' added to unknown class {class:p}");
            return;
        };
        let methods = if meta {
            &mut entry.class_methods
        } else {
            &mut entry.methods
        };
        methods.insert(selector, method);
    }

    pub fn add_method<F>(&self, class: Class, name: &str, types: &str, implementation: F)
    where
        F: Fn(&TableRuntime, &mut CallRecord) -> Result<(), NativeException> + 'static,
    {
        self.insert_method(class, name, types, implementation, false);
    }

    pub fn add_class_method<F>(&self, class: Class, name: &str, types: &str, implementation: F)
    where
        F: Fn(&TableRuntime, &mut CallRecord) -> Result<(), NativeException> + 'static,
    {
        self.insert_method(class, name, types, implementation, true);
    }

    /// A new instance of `class` owned by the caller.
    pub fn alloc_instance(&self, class: Class) -> Id {
        let payload = self.default_payload(class);
        self.alloc(class, payload)
    }

    fn default_payload(&self, class: Class) -> Payload {
        let tables = self.tables.read();
        let is = |name: &str| {
            tables
                .class_names
                .get(name)
                .is_some_and(|&ancestor| tables.is_subclass(class, ancestor))
        };
        if is("NSString") {
            Payload::String(String::new())
        } else if is("NSNumber") {
            Payload::Number(Number::Int(0))
        } else if is("NSData") {
            Payload::Data(Vec::new())
        } else if is("NSArray") {
            Payload::Array(Vec::new())
        } else if is("NSDictionary") {
            Payload::Dictionary(Vec::new())
        } else {
            Payload::Plain
        }
    }

    /// Allocates an object with one reference, taking over the references
    /// held in `payload`.
    pub fn alloc(&self, class: Class, payload: Payload) -> Id {
        let mut tables = self.tables.write();
        let object = Id::from_addr(tables.allocate_handle());
        tables.objects.insert(
            object,
            ObjectEntry {
                class,
                references: 1,
                payload,
            },
        );
        object
    }

    fn alloc_named(&self, class_name: &str, payload: Payload) -> Id {
        let class = self.class_named(class_name).unwrap_or(Class::NIL);
        self.alloc(class, payload)
    }

    pub fn payload(&self, object: Id) -> Option<Payload> {
        self.tables
            .read()
            .objects
            .get(&object)
            .map(|entry| entry.payload.clone())
    }

    /// Replaces the payload of `object`, returning the previous one.
    pub fn set_payload(&self, object: Id, payload: Payload) -> Option<Payload> {
        self.tables
            .write()
            .objects
            .get_mut(&object)
            .map(|entry| std::mem::replace(&mut entry.payload, payload))
    }

    pub fn string_value(&self, object: Id) -> Option<String> {
        match self.payload(object)? {
            Payload::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn retain_count(&self, object: Id) -> usize {
        self.tables
            .read()
            .objects
            .get(&object)
            .map_or(0, |entry| entry.references)
    }

    pub fn live_objects(&self) -> usize {
        self.tables.read().objects.len()
    }

    pub fn dispatch_count(&self) -> usize {
        self.dispatches.get()
    }

    /// Autoreleases `object` and hands it back, for returning new objects at
    /// +0.
    pub fn autoreleased(&self, object: Id) -> Id {
        self.autorelease(object);
        object
    }

    /// Keeps `bytes` alive until the current autorelease pool drains.
    pub fn autorelease_bytes(&self, bytes: CString) -> *const std::ffi::c_char {
        let ptr = bytes.as_ptr();
        self.pool_push(Pooled::Bytes(bytes));
        ptr
    }

    fn pool_push(&self, pooled: Pooled) {
        let mut pools = self.pools.lock();
        if pools.len() == 1 {
            warn!("autorelease with no pool in place, kept until the runtime is dropped");
        }
        if let Some(pool) = pools.last_mut() {
            pool.push(pooled);
        }
    }

    /// Calls a closure the way a native method does and surfaces any
    /// exception it raised.
    ///
    /// # Safety
    /// `block` must be a live closure created by this crate whose signature
    /// matches `arguments`.
    pub unsafe fn call_closure(
        &self,
        block: Id,
        arguments: &[usize],
    ) -> Result<usize, NativeException> {
        if block.is_nil() {
            return Err(NativeException::invalid_argument("block is nil"));
        }
        // SAFETY: guaranteed by the caller
        let result =
            unsafe { closure::invoke_closure(block.addr() as *const ClosureLiteral, arguments) }?;
        match self.take_exception() {
            Some(exception) => Err(exception),
            None => Ok(result),
        }
    }

    /// Method implementation for `selector` on `object`. Class objects
    /// resolve class methods.
    fn lookup(&self, object: Id, selector: Sel) -> Option<Method> {
        let tables = self.tables.read();
        let class = tables.class_of(object)?;
        let meta = class.addr() == object.addr();
        tables
            .superclasses(class)
            .find_map(|entry| {
                let methods = if meta {
                    &entry.class_methods
                } else {
                    &entry.methods
                };
                methods.get(&selector)
            })
            .cloned()
    }

    fn selector_label(&self, selector: Sel) -> String {
        self.selector_name(selector)
            .map_or_else(|| format!("{selector:p}"), |name| name.to_string())
    }

    /// Human readable rendering of `object`, as `description` returns it.
    /// Collections that contain themselves render the inner occurrence as
    /// a plain `<Class 0x..>`.
    pub fn describe(&self, object: Id) -> String {
        self.describe_within(object, &mut Vec::new())
    }

    fn describe_within(&self, object: Id, enclosing: &mut Vec<Id>) -> String {
        if object.is_nil() {
            return "(null)".to_string();
        }
        let payload = if enclosing.contains(&object) {
            None
        } else {
            self.payload(object)
        };
        match payload {
            Some(Payload::String(value)) => value,
            Some(Payload::Number(Number::Bool(value))) => u8::from(value).to_string(),
            Some(Payload::Number(Number::Int(value))) => value.to_string(),
            Some(Payload::Number(Number::Float(value))) => value.to_string(),
            Some(Payload::Data(bytes)) => describe_bytes(&bytes),
            Some(Payload::Array(elements)) => {
                enclosing.push(object);
                let elements: Vec<_> = elements
                    .iter()
                    .map(|&e| self.describe_within(e, enclosing))
                    .collect();
                enclosing.pop();
                format!("({})", elements.join(", "))
            }
            Some(Payload::Dictionary(entries)) => {
                enclosing.push(object);
                let entries: Vec<_> = entries
                    .iter()
                    .map(|&(key, value)| {
                        let key = self.describe_within(key, enclosing);
                        format!("{key} = {};", self.describe_within(value, enclosing))
                    })
                    .collect();
                enclosing.pop();
                format!("{{{}}}", entries.join(" "))
            }
            Some(Payload::Plain) | None => match self.class_of(object) {
                Some(class) => format!("<{} {object:p}>", self.class_name(class)),
                None => format!("<{object:p}>"),
            },
        }
    }

    /// Payload equality for value objects, identity otherwise.
    pub fn objects_equal(&self, a: Id, b: Id) -> bool {
        self.equal_within(a, b, &mut Vec::new())
    }

    fn equal_within(&self, a: Id, b: Id, comparing: &mut Vec<(Id, Id)>) -> bool {
        if a == b || comparing.contains(&(a, b)) {
            return true;
        }
        match (self.payload(a), self.payload(b)) {
            (Some(Payload::Plain), _) | (_, Some(Payload::Plain)) | (None, _) | (_, None) => false,
            (Some(Payload::Array(left)), Some(Payload::Array(right))) => {
                if left.len() != right.len() {
                    return false;
                }
                comparing.push((a, b));
                let equal = left
                    .iter()
                    .zip(&right)
                    .all(|(&l, &r)| self.equal_within(l, r, comparing));
                comparing.pop();
                equal
            }
            (Some(left), Some(right)) => left == right,
        }
    }
}

/// Hex dump in groups of four bytes: `<68656c6c 6f>`.
fn describe_bytes(bytes: &[u8]) -> String {
    let groups: Vec<String> = bytes
        .chunks(4)
        .map(|group| group.iter().map(|byte| format!("{byte:02x}")).collect())
        .collect();
    format!("<{}>", groups.join(" "))
}

impl Default for TableRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver of a dispatched record.
pub fn receiver(record: &CallRecord) -> Result<Id, NativeException> {
    Ok(record.target()?)
}

/// Explicit argument `index` (0-based) of a dispatched record.
pub fn argument<T: SlotScalar>(record: &CallRecord, index: usize) -> Result<T, NativeException> {
    Ok(record.get(FIRST_HOST_SLOT + index)?)
}

pub fn set_result<T: SlotScalar>(record: &mut CallRecord, value: T) -> Result<(), NativeException> {
    Ok(record.set(0, value)?)
}

impl NativeRuntime for TableRuntime {
    fn class_named(&self, name: &str) -> Option<Class> {
        self.tables.read().class_names.get(name).copied()
    }

    fn protocol_named(&self, name: &str) -> Option<Protocol> {
        self.tables.read().protocol_names.get(name).copied()
    }

    fn class_of(&self, object: Id) -> Option<Class> {
        self.tables.read().class_of(object)
    }

    fn class_name(&self, class: Class) -> String {
        self.tables
            .read()
            .classes
            .get(&class)
            .map_or_else(|| format!("{class:p}"), |entry| entry.name.clone())
    }

    fn register_selector(&self, name: &str) -> Sel {
        self.selectors.add(name)
    }

    fn selector_name(&self, selector: Sel) -> Option<Arc<str>> {
        self.selectors.get(selector)
    }

    fn method_types(&self, object: Id, selector: Sel) -> Option<String> {
        self.lookup(object, selector)
            .map(|method| method.types.to_string())
    }

    fn dispatch(&self, record: &mut CallRecord) -> Result<(), NativeException> {
        let target = record.target()?;
        let selector = record.selector()?;
        let Some(method) = self.lookup(target, selector) else {
            let class = self
                .class_of(target)
                .map_or_else(|| "nil".to_string(), |class| self.class_name(class));
            return Err(NativeException::invalid_argument(format!(
                "-[{class} {}]: unrecognized selector sent to instance {target:p}",
                self.selector_label(selector)
            )));
        };
        self.dispatches.set(self.dispatches.get() + 1);
        trace!("dispatching '{}' to {target:p}", self.selector_label(selector));
        (method.implementation)(self, record)
    }

    fn is_kind_of(&self, object: Id, class: Class) -> bool {
        let tables = self.tables.read();
        tables
            .class_of(object)
            .is_some_and(|own| tables.is_subclass(own, class))
    }

    fn conforms_to(&self, object: Id, protocol: Protocol) -> bool {
        let tables = self.tables.read();
        let Some(class) = tables.class_of(object) else {
            return false;
        };
        tables.superclasses(class).any(|entry| {
            entry
                .protocols
                .iter()
                .any(|&adopted| tables.protocol_inherits(adopted, protocol))
        })
    }

    fn retain(&self, object: Id) {
        let mut tables = self.tables.write();
        if tables.classes.contains_key(&Class::from_addr(object.addr())) {
            return;
        }
        match tables.objects.get_mut(&object) {
            Some(entry) => entry.references += 1,
            None => warn!("retain of unknown object {object:p}"),
        }
    }

    fn release(&self, object: Id) {
        let freed = {
            let mut tables = self.tables.write();
            if tables.classes.contains_key(&Class::from_addr(object.addr())) {
                return;
            }
            let Some(entry) = tables.objects.get_mut(&object) else {
                warn!("release of unknown object {object:p}");
                return;
            };
            entry.references -= 1;
            if entry.references > 0 {
                return;
            }
            tables.objects.remove(&object)
        };
        let Some(freed) = freed else {
            return;
        };
        trace!("freeing {object:p}");
        match freed.payload {
            Payload::Array(elements) => elements.into_iter().for_each(|e| self.release(e)),
            Payload::Dictionary(entries) => {
                for (key, value) in entries {
                    self.release(key);
                    self.release(value);
                }
            }
            _ => {}
        }
    }

    fn autorelease(&self, object: Id) {
        if !object.is_nil() {
            self.pool_push(Pooled::Object(object));
        }
    }

    fn push_autorelease_pool(&self) {
        self.pools.lock().push(Vec::new());
    }

    fn pop_autorelease_pool(&self) {
        let drained = {
            let mut pools = self.pools.lock();
            if pools.len() == 1 {
                warn!("autorelease pool underflow");
                return;
            }
            pools.pop().unwrap_or_default()
        };
        for pooled in drained {
            if let Pooled::Object(object) = pooled {
                self.release(object);
            }
        }
    }

    fn bridged(&self, object: Id) -> Bridged {
        match self.payload(object) {
            Some(Payload::String(value)) => Bridged::String(value),
            Some(Payload::Number(number)) => Bridged::Number(number),
            Some(Payload::Data(bytes)) => Bridged::Data(bytes),
            _ => Bridged::Opaque,
        }
    }

    fn new_string(&self, value: &str) -> Id {
        self.alloc_named("NSString", Payload::String(value.to_string()))
    }

    fn new_number(&self, value: Number) -> Id {
        self.alloc_named("NSNumber", Payload::Number(value))
    }

    fn new_data(&self, bytes: &[u8]) -> Id {
        self.alloc_named("NSData", Payload::Data(bytes.to_vec()))
    }

    fn new_array(&self, elements: &[Id]) -> Id {
        for &element in elements {
            self.retain(element);
        }
        self.alloc_named("NSArray", Payload::Array(elements.to_vec()))
    }

    fn new_dictionary(&self, entries: &[(Id, Id)]) -> Id {
        for &(key, value) in entries {
            self.retain(key);
            self.retain(value);
        }
        self.alloc_named("NSDictionary", Payload::Dictionary(entries.to_vec()))
    }

    fn raise(&self, exception: NativeException) {
        let mut pending = self.exception.lock();
        if let Some(previous) = pending.as_ref() {
            warn!("{previous} replaced by a newer exception before it was handled");
        }
        *pending = Some(exception);
    }

    fn take_exception(&self) -> Option<NativeException> {
        self.exception.lock().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MethodSignature;

    fn record(runtime: &TableRuntime, target: Id, name: &str) -> CallRecord {
        let selector = runtime.register_selector(name);
        let types = runtime
            .method_types(target, selector)
            .unwrap_or_else(|| panic!("{name} is implemented"));
        let mut record =
            CallRecord::new(MethodSignature::parse(&types).expect("valid types")).expect("sized");
        record.set_target(target).expect("receiver slot");
        record.set_selector(selector).expect("selector slot");
        record
    }

    #[test]
    fn methods_are_inherited() {
        let runtime = TableRuntime::new();
        let base = runtime.define_class("Base", runtime.class_named("NSObject"));
        let derived = runtime.define_class("Derived", Some(base));
        runtime.add_method(base, "answer", "q@:", |_, record| set_result(record, 42i64));
        let object = runtime.alloc_instance(derived);

        let mut call = record(&runtime, object, "answer");
        runtime.dispatch(&mut call).expect("inherited method");
        assert_eq!(call.get::<i64>(0), Ok(42));
        assert!(runtime.is_kind_of(object, base));
        assert!(!runtime.is_kind_of(object, runtime.class_named("NSString").unwrap_or_default()));
        assert_eq!(runtime.define_class("Derived", None), derived);
        runtime.release(object);
    }

    #[test]
    fn class_objects_resolve_class_methods() {
        let runtime = TableRuntime::new();
        let class = runtime.define_class("Counter", runtime.class_named("NSObject"));
        runtime.add_class_method(class, "start", "q@:", |_, record| set_result(record, 1i64));
        runtime.add_method(class, "step", "q@:", |_, record| set_result(record, 2i64));

        let start = runtime.register_selector("start");
        let step = runtime.register_selector("step");
        assert!(runtime.responds_to(class.as_id(), start));
        assert!(!runtime.responds_to(class.as_id(), step));

        let instance = runtime.alloc_instance(class);
        assert!(runtime.responds_to(instance, step));
        assert!(!runtime.responds_to(instance, start));
        runtime.release(instance);
    }

    #[test]
    fn unrecognized_selectors_raise_without_dispatch() {
        let runtime = TableRuntime::new();
        let string = runtime.new_string("x");
        let signature = MethodSignature::parse("v@:").expect("valid types");
        let mut call = CallRecord::new(signature).expect("sized");
        call.set_target(string).expect("receiver slot");
        call.set_selector(runtime.register_selector("explode"))
            .expect("selector slot");
        let err = runtime.dispatch(&mut call).expect_err("no such method");
        assert_eq!(err.name, "NSInvalidArgumentException");
        assert!(err.reason.contains("-[NSString explode]"), "{}", err.reason);
        assert_eq!(runtime.dispatch_count(), 0);
        runtime.release(string);
    }

    #[test]
    fn collections_release_their_elements() {
        let runtime = TableRuntime::new();
        let baseline = runtime.live_objects();
        let first = runtime.new_string("a");
        let second = runtime.new_number(Number::Int(2));
        let array = runtime.new_array(&[first, second]);
        runtime.release(first);
        runtime.release(second);
        assert_eq!(runtime.live_objects(), baseline + 3);
        assert_eq!(runtime.retain_count(first), 1);
        runtime.release(array);
        assert_eq!(runtime.live_objects(), baseline);
    }

    #[test]
    fn pools_release_on_pop() {
        let runtime = TableRuntime::new();
        let baseline = runtime.live_objects();
        runtime.push_autorelease_pool();
        let string = runtime.autoreleased(runtime.new_string("temporary"));
        assert_eq!(runtime.bridged(string), Bridged::String("temporary".to_string()));
        runtime.pop_autorelease_pool();
        assert_eq!(runtime.live_objects(), baseline);
        assert_eq!(runtime.bridged(string), Bridged::Opaque);
    }

    #[test]
    fn protocols_are_inherited_through_classes_and_protocols() {
        let runtime = TableRuntime::new();
        let root = runtime.protocol_named("NSObject").expect("builtin protocol");
        let sized = runtime.define_protocol("Sized", &[root]);
        let class = runtime.define_class("Box", runtime.class_named("NSObject"));
        runtime.adopt_protocol(class, sized);
        let sub = runtime.define_class("SmallBox", Some(class));
        let object = runtime.alloc_instance(sub);
        assert!(runtime.conforms_to(object, sized));
        assert!(runtime.conforms_to(object, root));
        let copying = runtime.protocol_named("NSCopying").expect("builtin protocol");
        assert!(!runtime.conforms_to(object, copying));
        runtime.release(object);
    }

    #[test]
    fn self_containing_arrays_describe_and_compare() {
        let runtime = TableRuntime::new();
        let baseline = runtime.live_objects();
        let class = runtime.class_named("NSMutableArray").expect("builtin class");
        let first = runtime.alloc(class, Payload::Array(Vec::new()));
        let second = runtime.alloc(class, Payload::Array(Vec::new()));
        let word = runtime.new_string("x");
        for array in [first, second] {
            runtime.retain(array);
            runtime.retain(word);
            runtime.set_payload(array, Payload::Array(vec![array, word]));
        }

        assert_eq!(
            runtime.describe(first),
            format!("(<NSMutableArray {first:p}>, x)")
        );
        assert!(runtime.objects_equal(first, second));
        runtime.set_payload(second, Payload::Array(vec![second, second]));
        assert!(!runtime.objects_equal(first, second));

        runtime.set_payload(first, Payload::Array(Vec::new()));
        runtime.set_payload(second, Payload::Array(Vec::new()));
        for array in [first, second] {
            runtime.release(array);
            runtime.release(word);
            runtime.release(array);
        }
        runtime.release(word);
        assert_eq!(runtime.live_objects(), baseline);
    }

    #[test]
    fn pending_exceptions_are_taken_once() {
        let runtime = TableRuntime::new();
        runtime.raise(NativeException::new("First", "one"));
        runtime.raise(NativeException::new("Second", "two"));
        assert_eq!(runtime.take_exception(), Some(NativeException::new("Second", "two")));
        assert_eq!(runtime.take_exception(), None);
    }

    #[test]
    fn unknown_objects_are_tolerated() {
        let runtime = TableRuntime::new();
        let bogus = Id::from_addr(0x40);
        runtime.retain(bogus);
        runtime.release(bogus);
        assert_eq!(runtime.bridged(bogus), Bridged::Opaque);
        assert_eq!(runtime.class_of(bogus), None);
        assert_eq!(runtime.describe(bogus), "<0x40>");
    }
}
