//! Host callables exposed to native code as block-ABI closures.
//!
//! A closure starts out unbound ([`NativeClosure`]), becomes active once
//! installed ([`ClosureHandle`]) and is released when its last native
//! reference goes away, dropping the captured callable.
//!
//! Invocations arrive as [`MAX_REGISTER_ARGUMENTS`] integer-register cells,
//! so only integer and pointer shaped arguments and results are accepted.
use std::any::Any;
use std::cell::Cell;
use std::ffi::{CString, c_char, c_void};
use std::panic::{self, AssertUnwindSafe};
use std::ptr::{self, NonNull};
use std::rc::Rc;

use log::{error, trace};

use crate::marshal::{self, KeepAlive};
use crate::{
    Bridge, BridgeError, CallRecord, HostError, HostValue, MethodSignature, NativeException,
    RawPointer, Result, TypeEncoding,
};

pub const MAX_REGISTER_ARGUMENTS: usize = 8;

/// The descriptor carries a type signature.
pub const BLOCK_HAS_SIGNATURE: i32 = 1 << 30;

pub type InvokeFn = unsafe extern "C" fn(
    *mut ClosureLiteral,
    usize,
    usize,
    usize,
    usize,
    usize,
    usize,
    usize,
    usize,
) -> usize;

#[repr(C)]
pub struct ClosureDescriptor {
    pub reserved: usize,
    pub size: usize,
    pub signature: *const c_char,
}

/// Fixed header every native closure starts with.
#[repr(C)]
pub struct ClosureLiteral {
    pub isa: *const c_void,
    pub flags: i32,
    pub reserved: i32,
    pub invoke: InvokeFn,
    pub descriptor: *const ClosureDescriptor,
}

/// A host function reachable from native code.
pub trait HostCallable {
    fn call(&self, arguments: &[HostValue]) -> Result<HostValue, HostError>;
}

impl<F> HostCallable for F
where
    F: Fn(&[HostValue]) -> Result<HostValue, HostError>,
{
    fn call(&self, arguments: &[HostValue]) -> Result<HostValue, HostError> {
        self(arguments)
    }
}

struct ClosureState {
    bridge: Bridge,
    callable: Rc<dyn HostCallable>,
    signature: MethodSignature,
    types: CString,
}

#[repr(C)]
struct ClosureBox {
    literal: ClosureLiteral,
    descriptor: ClosureDescriptor,
    references: Cell<usize>,
    state: ClosureState,
}

fn unsupported(types: &str, reason: &'static str) -> BridgeError {
    BridgeError::UnsupportedClosureSignature {
        types: types.to_string(),
        reason,
    }
}

/// Parses closure `types`: the return type followed by the explicit
/// arguments. A leading `@?` argument names the closure itself and is
/// dropped.
fn closure_signature(types: &str) -> Result<MethodSignature> {
    let parsed = MethodSignature::parse(types)?;
    let mut arguments = parsed.arguments().to_vec();
    if arguments.first() == Some(&TypeEncoding::Block) {
        arguments.remove(0);
    }
    if arguments.len() > MAX_REGISTER_ARGUMENTS {
        return Err(unsupported(types, "more arguments than register cells"));
    }
    if arguments.iter().any(|argument| !argument.is_integer_register_class()) {
        return Err(unsupported(
            types,
            "arguments must be integers, booleans, objects or pointers",
        ));
    }
    let return_type = parsed.return_type();
    if !return_type.is_void() && !return_type.is_integer_register_class() {
        return Err(unsupported(
            types,
            "result must be void, an integer, a boolean, an object or a pointer",
        ));
    }
    if *return_type == TypeEncoding::CString {
        return Err(unsupported(
            types,
            "C string results cannot outlive the invocation",
        ));
    }
    Ok(MethodSignature::new(return_type.clone(), arguments))
}

/// Block signature as native introspection expects it: the closure itself
/// is the first argument.
fn block_types(signature: &MethodSignature) -> String {
    let mut types = signature.return_type().to_string();
    types.push_str("@?");
    for argument in signature.arguments() {
        types.push_str(&argument.to_string());
    }
    types
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "host callable panicked".to_string()
    }
}

impl ClosureState {
    fn invoke(&self, cells: &[usize]) -> usize {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.call(cells)));
        let exception = match outcome {
            Ok(Ok(register)) => return register,
            Ok(Err(BridgeError::HostCallFailed(err))) => {
                NativeException::new("HostCallableException", err.message)
            }
            Ok(Err(err)) => NativeException::from(err),
            Err(payload) => {
                NativeException::new("HostCallableException", panic_message(payload.as_ref()))
            }
        };
        error!(
            "closure '{}' failed, raising {exception}",
            self.types.to_string_lossy()
        );
        self.bridge.runtime().raise(exception);
        0
    }

    fn call(&self, cells: &[usize]) -> Result<usize> {
        let arguments = self
            .signature
            .arguments()
            .iter()
            .zip(cells)
            .map(|(encoding, &cell)| marshal::value_from_register(&self.bridge, encoding, cell))
            .collect::<Result<Vec<_>>>()?;
        let result = self.callable.call(&arguments)?;

        let return_type = self.signature.return_type();
        if return_type.is_void() {
            return Ok(0);
        }
        let mut record = CallRecord::new(MethodSignature::new(return_type.clone(), Vec::new()))?;
        let mut keep_alive = KeepAlive::new(&self.bridge);
        record.set_slot(&self.bridge, 0, &result, &mut keep_alive)?;
        let register = record.return_register()?;
        if let (HostValue::Object(object), TypeEncoding::Object(_) | TypeEncoding::Block) =
            (&result, return_type)
        {
            if !object.is_nil() {
                // the wrapper may hold the last reference and drops below
                self.bridge.runtime().retain(object.id());
                keep_alive.hold(object.id());
            }
        }
        // objects created for the result must survive the return
        keep_alive.autorelease();
        Ok(register)
    }
}

unsafe extern "C" fn invoke_trampoline(
    literal: *mut ClosureLiteral,
    a0: usize,
    a1: usize,
    a2: usize,
    a3: usize,
    a4: usize,
    a5: usize,
    a6: usize,
    a7: usize,
) -> usize {
    // SAFETY: the trampoline is only installed in literals heading a
    // `ClosureBox`, which is `repr(C)` with the literal first
    let closure = unsafe { &*(literal as *const ClosureBox) };
    closure.state.invoke(&[a0, a1, a2, a3, a4, a5, a6, a7])
}

/// Takes an additional reference on a closure.
///
/// # Safety
/// `closure` must point at a live closure created by this crate.
pub unsafe extern "C" fn closure_retain(closure: *const ClosureLiteral) -> *const ClosureLiteral {
    // SAFETY: guaranteed by the caller
    let closure_box = unsafe { &*(closure as *const ClosureBox) };
    closure_box
        .references
        .set(closure_box.references.get() + 1);
    closure
}

/// Drops one reference; the last one frees the closure and its callable.
///
/// # Safety
/// `closure` must point at a live closure created by this crate, and the
/// caller must own the reference it gives up.
pub unsafe extern "C" fn closure_release(closure: *const ClosureLiteral) {
    // SAFETY: guaranteed by the caller
    let closure_box = unsafe { &*(closure as *const ClosureBox) };
    let remaining = closure_box.references.get() - 1;
    closure_box.references.set(remaining);
    if remaining == 0 {
        trace!(
            "releasing closure '{}'",
            closure_box.state.types.to_string_lossy()
        );
        // SAFETY: allocated by `NativeClosure::install` via `Box::into_raw`
        // and no references remain
        drop(unsafe { Box::from_raw(closure as *mut ClosureBox) });
    }
}

/// Calls a closure the way native code does, with `arguments` in the first
/// register cells and zeros in the rest. More arguments than register cells
/// is an `ArityMismatch`.
///
/// # Safety
/// `closure` must point at a live block-ABI closure whose signature matches
/// `arguments`.
pub unsafe fn invoke_closure(closure: *const ClosureLiteral, arguments: &[usize]) -> Result<usize> {
    if arguments.len() > MAX_REGISTER_ARGUMENTS {
        return Err(BridgeError::ArityMismatch {
            selector: "<block>".to_string(),
            expected: MAX_REGISTER_ARGUMENTS,
            found: arguments.len(),
        });
    }
    let mut cells = [0usize; MAX_REGISTER_ARGUMENTS];
    cells[..arguments.len()].copy_from_slice(arguments);
    let [a0, a1, a2, a3, a4, a5, a6, a7] = cells;
    // SAFETY: guaranteed by the caller
    Ok(unsafe {
        let invoke = (*closure).invoke;
        invoke(closure as *mut ClosureLiteral, a0, a1, a2, a3, a4, a5, a6, a7)
    })
}

/// A validated closure that native code cannot see yet.
pub struct NativeClosure {
    state: ClosureState,
}

impl NativeClosure {
    pub fn new(bridge: &Bridge, types: &str, callable: Rc<dyn HostCallable>) -> Result<Self> {
        let signature = closure_signature(types)?;
        let types = CString::new(block_types(&signature))
            .map_err(|_| unsupported(types, "signature contains a NUL byte"))?;
        Ok(Self {
            state: ClosureState {
                bridge: bridge.clone(),
                callable,
                signature,
                types,
            },
        })
    }

    pub fn signature(&self) -> &MethodSignature {
        &self.state.signature
    }

    /// Moves the closure to the heap where native code can reference it. The
    /// returned handle owns the first reference.
    pub fn install(self) -> ClosureHandle {
        let closure_box = Box::new(ClosureBox {
            literal: ClosureLiteral {
                isa: ptr::null(),
                flags: BLOCK_HAS_SIGNATURE,
                reserved: 0,
                invoke: invoke_trampoline,
                descriptor: ptr::null(),
            },
            descriptor: ClosureDescriptor {
                reserved: 0,
                size: size_of::<ClosureBox>(),
                signature: ptr::null(),
            },
            references: Cell::new(1),
            state: self.state,
        });
        let raw = Box::into_raw(closure_box);
        // SAFETY: `raw` is a fresh, exclusively owned allocation
        unsafe {
            (*raw).descriptor.signature = (*raw).state.types.as_ptr();
            (*raw).literal.descriptor = &raw const (*raw).descriptor;
        }
        trace!("installed closure at {raw:p}");
        ClosureHandle {
            // SAFETY: `Box::into_raw` never returns null
            closure: unsafe { NonNull::new_unchecked(raw) },
        }
    }
}

/// Host-side owner of one reference to an active closure.
pub struct ClosureHandle {
    closure: NonNull<ClosureBox>,
}

impl ClosureHandle {
    fn closure_box(&self) -> &ClosureBox {
        // SAFETY: the handle's own reference keeps the box alive
        unsafe { self.closure.as_ref() }
    }

    pub fn as_ptr(&self) -> *const ClosureLiteral {
        self.closure.as_ptr() as *const ClosureLiteral
    }

    pub fn address(&self) -> usize {
        self.as_ptr() as usize
    }

    pub fn signature(&self) -> &MethodSignature {
        &self.closure_box().state.signature
    }

    /// Signature recorded in the block descriptor.
    pub fn types(&self) -> &str {
        self.closure_box().state.types.to_str().unwrap_or_default()
    }

    pub fn reference_count(&self) -> usize {
        self.closure_box().references.get()
    }

    /// The closure as a host value, suitable for `@?` and pointer slots.
    pub fn to_host_value(&self) -> HostValue {
        HostValue::Pointer(RawPointer::new(TypeEncoding::Unknown, self.address()))
    }

    /// Invokes the closure through its native entry point.
    pub fn invoke(&self, arguments: &[usize]) -> Result<usize> {
        // SAFETY: the handle keeps the closure alive, and the trampoline
        // only decodes as many cells as the signature declares
        unsafe { invoke_closure(self.as_ptr(), arguments) }
    }
}

impl Drop for ClosureHandle {
    fn drop(&mut self) {
        // SAFETY: the handle owns exactly one reference
        unsafe { closure_release(self.as_ptr()) }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};

    use super::*;
    use crate::{BridgeCreateInfo, Bridged, Id, NativeRuntime, Payload, TableRuntime};

    fn bridge() -> (Rc<TableRuntime>, Bridge) {
        let runtime = Rc::new(TableRuntime::new());
        let bridge = Bridge::new(runtime.clone(), BridgeCreateInfo::default());
        (runtime, bridge)
    }

    fn callable<F>(f: F) -> Rc<dyn HostCallable>
    where
        F: Fn(&[HostValue]) -> Result<HostValue, HostError> + 'static,
    {
        Rc::new(f)
    }

    #[test]
    fn register_arguments_reach_the_host_callable() {
        let (_runtime, bridge) = bridge();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let recorder = seen.clone();
        let closure = bridge
            .create_closure(
                "ii",
                callable(move |args| {
                    recorder.borrow_mut().extend_from_slice(args);
                    Ok(HostValue::Int(args[0].as_int().unwrap_or_default() * 6))
                }),
            )
            .expect("integer closure");
        assert_eq!(closure.invoke(&[7]).expect("register arguments"), 42);
        assert_eq!(*seen.borrow(), vec![HostValue::Int(7)]);
        assert_eq!(closure.types(), "i@?i");
    }

    #[test]
    fn narrow_arguments_ignore_high_register_bits() {
        let (_runtime, bridge) = bridge();
        let closure = bridge
            .create_closure(
                "qcS",
                callable(|args| {
                    let sum = args.iter().filter_map(HostValue::as_int).sum::<i64>();
                    Ok(HostValue::Int(sum))
                }),
            )
            .expect("integer closure");
        assert_eq!(closure.invoke(&[0xAB_FF, 0xFFFF_0002]).expect("register arguments") as i64, -1 + 2);
    }

    #[test]
    fn leading_block_argument_is_skipped() {
        let (_runtime, bridge) = bridge();
        let closure = NativeClosure::new(&bridge, "v@?@", callable(|_| Ok(HostValue::Nil)))
            .expect("block signature");
        assert_eq!(closure.signature().arguments(), &[TypeEncoding::Object(None)]);
    }

    #[test]
    fn non_register_signatures_are_rejected_at_creation() {
        let (_runtime, bridge) = bridge();
        for types in ["dd", "vf", "v{CGPoint=dd}", "Di", "viiiiiiiii", "*", "*i"] {
            assert!(
                matches!(
                    NativeClosure::new(&bridge, types, callable(|_| Ok(HostValue::Nil))),
                    Err(BridgeError::UnsupportedClosureSignature { .. })
                ),
                "'{types}' must be rejected"
            );
        }
        assert!(matches!(
            NativeClosure::new(&bridge, "{", callable(|_| Ok(HostValue::Nil))),
            Err(BridgeError::Decode(_))
        ));
    }

    #[test]
    fn last_release_drops_the_callable() {
        let (_runtime, bridge) = bridge();
        let target = callable(|_| Ok(HostValue::Nil));
        let closure = bridge.create_closure("v", target.clone()).expect("void closure");
        assert_eq!(Rc::strong_count(&target), 2);

        let native_reference = unsafe { closure_retain(closure.as_ptr()) };
        assert_eq!(closure.reference_count(), 2);
        drop(closure);
        assert_eq!(Rc::strong_count(&target), 2, "native code still holds it");

        unsafe { closure_release(native_reference) };
        assert_eq!(Rc::strong_count(&target), 1);
    }

    #[test]
    fn host_failures_become_pending_native_exceptions() {
        let (runtime, bridge) = bridge();
        let closure = bridge
            .create_closure("q", callable(|_| Err(HostError::new("no answer"))))
            .expect("integer closure");
        assert_eq!(closure.invoke(&[]).expect("no arguments"), 0);
        assert_eq!(
            runtime.take_exception(),
            Some(NativeException::new("HostCallableException", "no answer"))
        );
        assert_eq!(runtime.take_exception(), None);
    }

    #[test]
    fn host_panics_do_not_cross_the_native_boundary() {
        let (runtime, bridge) = bridge();
        let closure = bridge
            .create_closure("v", callable(|_| panic!("callable blew up")))
            .expect("void closure");
        assert_eq!(closure.invoke(&[]).expect("no arguments"), 0);
        assert_eq!(
            runtime.take_exception().map(|exception| exception.reason),
            Some("callable blew up".to_string())
        );
    }

    #[test]
    fn mistyped_results_raise() {
        let (runtime, bridge) = bridge();
        let closure = bridge
            .create_closure("c", callable(|_| Ok(HostValue::Int(1000))))
            .expect("char closure");
        assert_eq!(closure.invoke(&[]).expect("no arguments"), 0);
        assert!(runtime.take_exception().is_some());
    }

    #[test]
    fn extra_register_arguments_are_refused() {
        let (runtime, bridge) = bridge();
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        let closure = bridge
            .create_closure(
                "v",
                callable(move |_| {
                    counter.set(counter.get() + 1);
                    Ok(HostValue::Nil)
                }),
            )
            .expect("void closure");
        assert!(matches!(
            closure.invoke(&[0; MAX_REGISTER_ARGUMENTS + 1]),
            Err(BridgeError::ArityMismatch { expected: MAX_REGISTER_ARGUMENTS, found: 9, .. })
        ));
        assert_eq!(calls.get(), 0);
        assert_eq!(runtime.take_exception(), None);
        assert_eq!(closure.invoke(&[0; MAX_REGISTER_ARGUMENTS]).expect("eight cells"), 0);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn object_results_survive_until_the_pool_drains() {
        let (runtime, bridge) = bridge();
        let closure = bridge
            .create_closure("@@", callable(|args| match &args[0] {
                HostValue::String(text) => Ok(HostValue::String(text.to_uppercase())),
                other => Err(HostError::new(format!("expected a string, got {other}"))),
            }))
            .expect("object closure");
        let input = runtime.new_string("shout");
        let baseline = runtime.live_objects();

        runtime.push_autorelease_pool();
        let result = Id::from_addr(closure.invoke(&[input.addr()]).expect("one argument"));
        assert_eq!(runtime.bridged(result), Bridged::String("SHOUT".to_string()));
        assert_eq!(runtime.live_objects(), baseline + 1);
        runtime.pop_autorelease_pool();

        assert_eq!(runtime.live_objects(), baseline);
        runtime.release(input);
    }

    #[test]
    fn returned_wrappers_do_not_free_the_result() {
        let (runtime, bridge) = bridge();
        let factory = bridge.clone();
        let closure = bridge
            .create_closure(
                "@",
                callable(move |_| {
                    let class = factory
                        .find_class("NSMutableArray")
                        .ok_or_else(|| HostError::new("no NSMutableArray"))?;
                    class
                        .perform("new", &[])
                        .map_err(|err| HostError::new(err.to_string()))
                }),
            )
            .expect("object closure");
        let baseline = runtime.live_objects();

        runtime.push_autorelease_pool();
        let result = Id::from_addr(closure.invoke(&[]).expect("no arguments"));
        assert_eq!(runtime.take_exception(), None);
        assert!(!result.is_nil());
        assert_eq!(runtime.payload(result), Some(Payload::Array(Vec::new())));
        assert_eq!(
            runtime.class_of(result).map(|class| runtime.class_name(class)),
            Some("NSMutableArray".to_string())
        );
        assert_eq!(runtime.live_objects(), baseline + 1);
        runtime.pop_autorelease_pool();

        assert_eq!(runtime.live_objects(), baseline);
    }
}
