mod bridge;
pub mod closure;
mod encoding;
mod error;
mod interning;
pub mod invocation;
pub mod marshal;
mod object;
mod pointer;
mod runtime;
pub mod selector;
mod table;
mod value;

pub use bridge::{Bridge, BridgeCreateInfo};
pub use closure::{ClosureHandle, HostCallable, NativeClosure};
pub use encoding::{IMPLICIT_ARGUMENTS, MethodSignature, TypeEncoding};
pub use error::{BridgeError, DecodeError, HostError, Result};
pub use interning::SelectorTable;
pub use invocation::CallRecord;
pub use marshal::KeepAlive;
pub use object::NativeObject;
pub use pointer::RawPointer;
pub use runtime::{Bridged, Class, Id, NativeException, NativeRuntime, Number, Protocol, Sel};
pub use table::{MethodImpl, Payload, TableRuntime};
pub use value::HostValue;
