//! Conversion between host values and raw native slots, driven entirely by
//! type encodings.
use std::ffi::{CStr, CString, c_char};
use std::mem::size_of;

use log::trace;

use crate::{
    Bridge, BridgeError, Bridged, HostValue, Id, NativeObject, Number, RawPointer,
    Result, TypeEncoding,
};

/// Native temporaries created while converting arguments for one call.
///
/// Owned objects are released and C strings freed when the collection is
/// dropped, so the scope of a `KeepAlive` is the lifetime of the call.
pub struct KeepAlive {
    bridge: Bridge,
    objects: Vec<Id>,
    c_strings: Vec<CString>,
}

impl KeepAlive {
    pub fn new(bridge: &Bridge) -> Self {
        Self {
            bridge: bridge.clone(),
            objects: Vec::new(),
            c_strings: Vec::new(),
        }
    }

    /// Takes over one owned reference to `object`.
    pub fn hold(&mut self, object: Id) -> Id {
        if !object.is_nil() {
            self.objects.push(object);
        }
        object
    }

    pub fn hold_c_string(&mut self, string: CString) -> *const c_char {
        let ptr = string.as_ptr();
        self.c_strings.push(string);
        ptr
    }

    pub fn len(&self) -> usize {
        self.objects.len() + self.c_strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hands the held objects to the current autorelease pool instead of
    /// releasing them on drop.
    pub fn autorelease(mut self) {
        let runtime = self.bridge.runtime();
        for object in self.objects.drain(..) {
            runtime.autorelease(object);
        }
    }
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        if !self.objects.is_empty() {
            trace!("releasing {} call temporaries", self.objects.len());
        }
        let runtime = self.bridge.runtime();
        for object in self.objects.drain(..) {
            runtime.release(object);
        }
    }
}

fn unsupported(encoding: &TypeEncoding, reason: &'static str) -> BridgeError {
    BridgeError::UnsupportedEncoding {
        encoding: encoding.to_string(),
        reason,
    }
}

fn mismatch(encoding: &TypeEncoding, value: &HostValue) -> BridgeError {
    BridgeError::TypeMismatch {
        encoding: encoding.to_string(),
        got: value.type_name(),
    }
}

/// Rejects encodings that have no scalar value representation.
fn check_marshallable(encoding: &TypeEncoding) -> Result<()> {
    match encoding {
        TypeEncoding::Void => Err(unsupported(encoding, "void carries no value")),
        TypeEncoding::Struct { .. } | TypeEncoding::Union { .. } | TypeEncoding::Array { .. } => {
            Err(unsupported(encoding, "aggregates cannot be passed by value"))
        }
        TypeEncoding::LongDouble => Err(unsupported(encoding, "long double is not supported")),
        TypeEncoding::Bitfield(_) | TypeEncoding::Unknown => {
            Err(unsupported(encoding, "encoding has no standalone value"))
        }
        _ => Ok(()),
    }
}

fn slot(buffer: &[u8], offset: usize, size: usize) -> Result<&[u8]> {
    offset
        .checked_add(size)
        .and_then(|end| buffer.get(offset..end))
        .ok_or(BridgeError::BufferOverflow {
            offset,
            needed: size,
            available: buffer.len(),
        })
}

fn slot_mut(buffer: &mut [u8], offset: usize, size: usize) -> Result<&mut [u8]> {
    let available = buffer.len();
    offset
        .checked_add(size)
        .and_then(|end| buffer.get_mut(offset..end))
        .ok_or(BridgeError::BufferOverflow {
            offset,
            needed: size,
            available,
        })
}

fn bytes<const N: usize>(slot: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&slot[..N]);
    out
}

fn word(slot: &[u8]) -> usize {
    usize::from_ne_bytes(bytes(slot))
}

/// Decodes the value of type `encoding` stored at `offset` in `buffer`.
///
/// Integers widen to `Int`, `f` widens to `Float`. Native strings and numbers
/// decode to their host counterparts, other objects are wrapped and retained.
pub fn read_value(
    bridge: &Bridge,
    encoding: &TypeEncoding,
    buffer: &[u8],
    offset: usize,
) -> Result<HostValue> {
    check_marshallable(encoding)?;
    let slot = slot(buffer, offset, encoding.size()?)?;
    let value = match encoding {
        TypeEncoding::Bool => HostValue::Bool(slot[0] != 0),
        TypeEncoding::I8 => HostValue::Int(i64::from(i8::from_ne_bytes(bytes(slot)))),
        TypeEncoding::U8 => HostValue::Int(i64::from(slot[0])),
        TypeEncoding::I16 => HostValue::Int(i64::from(i16::from_ne_bytes(bytes(slot)))),
        TypeEncoding::U16 => HostValue::Int(i64::from(u16::from_ne_bytes(bytes(slot)))),
        TypeEncoding::I32 => HostValue::Int(i64::from(i32::from_ne_bytes(bytes(slot)))),
        TypeEncoding::U32 => HostValue::Int(i64::from(u32::from_ne_bytes(bytes(slot)))),
        TypeEncoding::I64 => HostValue::Int(i64::from_ne_bytes(bytes(slot))),
        // values above i64::MAX keep their bit pattern
        TypeEncoding::U64 => HostValue::Int(u64::from_ne_bytes(bytes(slot)) as i64),
        TypeEncoding::F32 => HostValue::Float(f64::from(f32::from_ne_bytes(bytes(slot)))),
        TypeEncoding::F64 => HostValue::Float(f64::from_ne_bytes(bytes(slot))),
        TypeEncoding::CString => {
            let ptr = word(slot) as *const c_char;
            if ptr.is_null() {
                HostValue::Nil
            } else {
                // SAFETY: non-null C string slots point at NUL-terminated
                // storage that outlives the call
                let string = unsafe { CStr::from_ptr(ptr) };
                HostValue::String(string.to_string_lossy().into_owned())
            }
        }
        TypeEncoding::Object(_) => object_value(bridge, Id::from_addr(word(slot))),
        TypeEncoding::Class => {
            let class = Id::from_addr(word(slot));
            if class.is_nil() {
                HostValue::Nil
            } else {
                HostValue::Object(NativeObject::borrowed(bridge, class))
            }
        }
        TypeEncoding::Selector => {
            let selector = crate::Sel::from_addr(word(slot));
            match bridge.runtime().selector_name(selector) {
                Some(name) if !selector.is_nil() => HostValue::String(name.to_string()),
                _ => HostValue::Nil,
            }
        }
        TypeEncoding::Block => {
            HostValue::Pointer(RawPointer::new(TypeEncoding::Unknown, word(slot)))
        }
        TypeEncoding::Pointer(pointee) => {
            HostValue::Pointer(RawPointer::new((**pointee).clone(), word(slot)))
        }
        _ => return Err(unsupported(encoding, "encoding has no standalone value")),
    };
    Ok(value)
}

fn object_value(bridge: &Bridge, object: Id) -> HostValue {
    if object.is_nil() {
        return HostValue::Nil;
    }
    match bridge.runtime().bridged(object) {
        Bridged::String(string) => HostValue::String(string),
        Bridged::Number(Number::Bool(value)) => HostValue::Bool(value),
        Bridged::Number(Number::Int(value)) => HostValue::Int(value),
        Bridged::Number(Number::Float(value)) => HostValue::Float(value),
        Bridged::Data(bytes) => HostValue::Bytes(bytes),
        Bridged::Opaque => HostValue::Object(NativeObject::retained(bridge, object)),
    }
}

fn integer(encoding: &TypeEncoding, value: &HostValue) -> Result<i64> {
    match value {
        HostValue::Int(value) => Ok(*value),
        HostValue::Bool(value) => Ok(i64::from(*value)),
        other => Err(mismatch(encoding, other)),
    }
}

fn float(encoding: &TypeEncoding, value: &HostValue) -> Result<f64> {
    match value {
        HostValue::Float(value) => Ok(*value),
        HostValue::Int(value) => Ok(*value as f64),
        other => Err(mismatch(encoding, other)),
    }
}

macro_rules! write_integer {
    ($ty:ty, $encoding:expr, $value:expr, $slot:expr) => {{
        let n = integer($encoding, $value)?;
        let narrowed = <$ty>::try_from(n).map_err(|_| BridgeError::OutOfRange {
            encoding: $encoding.to_string(),
            value: n,
        })?;
        $slot.copy_from_slice(&narrowed.to_ne_bytes());
    }};
}

/// Encodes `value` as `encoding` at `offset` in `buffer`.
///
/// Native objects and C strings created for the conversion are parked in
/// `keep_alive`; they stay valid until it is dropped. On failure the slot is
/// left untouched.
pub fn write_value(
    bridge: &Bridge,
    encoding: &TypeEncoding,
    buffer: &mut [u8],
    offset: usize,
    value: &HostValue,
    keep_alive: &mut KeepAlive,
) -> Result<()> {
    check_marshallable(encoding)?;
    let size = encoding.size()?;
    // validate bounds before converting so failures leave no temporaries
    slot(buffer, offset, size)?;

    let pointer_word = match encoding {
        TypeEncoding::Bool => {
            let flag = match value {
                HostValue::Bool(value) => *value,
                HostValue::Int(value) => *value != 0,
                other => return Err(mismatch(encoding, other)),
            };
            slot_mut(buffer, offset, size)?[0] = u8::from(flag);
            return Ok(());
        }
        TypeEncoding::I8 => {
            write_integer!(i8, encoding, value, slot_mut(buffer, offset, size)?);
            return Ok(());
        }
        TypeEncoding::U8 => {
            write_integer!(u8, encoding, value, slot_mut(buffer, offset, size)?);
            return Ok(());
        }
        TypeEncoding::I16 => {
            write_integer!(i16, encoding, value, slot_mut(buffer, offset, size)?);
            return Ok(());
        }
        TypeEncoding::U16 => {
            write_integer!(u16, encoding, value, slot_mut(buffer, offset, size)?);
            return Ok(());
        }
        TypeEncoding::I32 => {
            write_integer!(i32, encoding, value, slot_mut(buffer, offset, size)?);
            return Ok(());
        }
        TypeEncoding::U32 => {
            write_integer!(u32, encoding, value, slot_mut(buffer, offset, size)?);
            return Ok(());
        }
        TypeEncoding::I64 => {
            write_integer!(i64, encoding, value, slot_mut(buffer, offset, size)?);
            return Ok(());
        }
        TypeEncoding::U64 => {
            write_integer!(u64, encoding, value, slot_mut(buffer, offset, size)?);
            return Ok(());
        }
        TypeEncoding::F32 => {
            let narrowed = float(encoding, value)? as f32;
            slot_mut(buffer, offset, size)?.copy_from_slice(&narrowed.to_ne_bytes());
            return Ok(());
        }
        TypeEncoding::F64 => {
            let wide = float(encoding, value)?;
            slot_mut(buffer, offset, size)?.copy_from_slice(&wide.to_ne_bytes());
            return Ok(());
        }
        TypeEncoding::CString => match value {
            HostValue::Nil => 0,
            HostValue::Pointer(pointer) => pointer.address(),
            HostValue::String(string) => {
                let c_string = CString::new(string.as_str())
                    .map_err(|_| mismatch(encoding, value))?;
                keep_alive.hold_c_string(c_string) as usize
            }
            other => return Err(mismatch(encoding, other)),
        },
        TypeEncoding::Object(_) => native_object(bridge, encoding, value, keep_alive)?.addr(),
        TypeEncoding::Block | TypeEncoding::Pointer(_) => match value {
            HostValue::Nil => 0,
            HostValue::Pointer(pointer) => pointer.address(),
            HostValue::Object(object) => object.id().addr(),
            other => return Err(mismatch(encoding, other)),
        },
        TypeEncoding::Class => match value {
            HostValue::Nil => 0,
            HostValue::Object(object) => object.id().addr(),
            HostValue::String(name) => bridge
                .runtime()
                .class_named(name)
                .ok_or_else(|| BridgeError::UnknownClass { name: name.clone() })?
                .addr(),
            other => return Err(mismatch(encoding, other)),
        },
        TypeEncoding::Selector => match value {
            HostValue::Nil => 0,
            HostValue::String(name) => bridge.runtime().register_selector(name).addr(),
            other => return Err(mismatch(encoding, other)),
        },
        _ => return Err(unsupported(encoding, "encoding has no standalone value")),
    };
    slot_mut(buffer, offset, size_of::<usize>())?.copy_from_slice(&pointer_word.to_ne_bytes());
    Ok(())
}

/// Converts a host value into a native object reference, creating native
/// strings, numbers and collections as needed.
pub fn native_object(
    bridge: &Bridge,
    encoding: &TypeEncoding,
    value: &HostValue,
    keep_alive: &mut KeepAlive,
) -> Result<Id> {
    let runtime = bridge.runtime();
    let object = match value {
        HostValue::Nil => Id::NIL,
        HostValue::Object(object) => object.id(),
        HostValue::Bool(value) => keep_alive.hold(runtime.new_number(Number::Bool(*value))),
        HostValue::Int(value) => keep_alive.hold(runtime.new_number(Number::Int(*value))),
        HostValue::Float(value) => keep_alive.hold(runtime.new_number(Number::Float(*value))),
        HostValue::String(value) => keep_alive.hold(runtime.new_string(value)),
        HostValue::Bytes(value) => keep_alive.hold(runtime.new_data(value)),
        HostValue::Array(values) => {
            let elements = values
                .iter()
                .map(|value| native_object(bridge, encoding, value, keep_alive))
                .collect::<Result<Vec<_>>>()?;
            keep_alive.hold(runtime.new_array(&elements))
        }
        HostValue::Dictionary(entries) => {
            let mut pairs = Vec::with_capacity(entries.len());
            for (key, value) in entries {
                let key = native_object(bridge, encoding, key, keep_alive)?;
                let value = native_object(bridge, encoding, value, keep_alive)?;
                pairs.push((key, value));
            }
            keep_alive.hold(runtime.new_dictionary(&pairs))
        }
        HostValue::Pointer(_) => return Err(mismatch(encoding, value)),
    };
    Ok(object)
}

/// Interprets one integer-register argument cell as `encoding`.
///
/// Narrow integers are taken from the low bits of the full register. Only
/// integer-register shapes are accepted: floating point and aggregate
/// arguments never arrive in these cells.
pub fn value_from_register(
    bridge: &Bridge,
    encoding: &TypeEncoding,
    cell: usize,
) -> Result<HostValue> {
    trace!("decoding register {cell:#x} as '{encoding}'");
    let value = match encoding {
        TypeEncoding::Bool => HostValue::Bool(cell as u8 != 0),
        TypeEncoding::I8 => HostValue::Int(i64::from(cell as i8)),
        TypeEncoding::U8 => HostValue::Int(i64::from(cell as u8)),
        TypeEncoding::I16 => HostValue::Int(i64::from(cell as i16)),
        TypeEncoding::U16 => HostValue::Int(i64::from(cell as u16)),
        TypeEncoding::I32 => HostValue::Int(i64::from(cell as i32)),
        TypeEncoding::U32 => HostValue::Int(i64::from(cell as u32)),
        TypeEncoding::I64 | TypeEncoding::U64 => HostValue::Int(cell as i64),
        other if other.is_integer_register_class() => {
            read_value(bridge, other, &cell.to_ne_bytes(), 0)?
        }
        other => {
            return Err(unsupported(
                other,
                "only integer-register arguments reach native closures",
            ));
        }
    };
    Ok(value)
}

/// Widens the scalar stored in `slot` to a full integer register.
pub(crate) fn register_from_slot(encoding: &TypeEncoding, slot: &[u8]) -> Result<usize> {
    let cell = match encoding {
        TypeEncoding::Void => 0,
        TypeEncoding::Bool | TypeEncoding::U8 => usize::from(slot[0]),
        TypeEncoding::I8 => i8::from_ne_bytes(bytes(slot)) as isize as usize,
        TypeEncoding::I16 => i16::from_ne_bytes(bytes(slot)) as isize as usize,
        TypeEncoding::U16 => usize::from(u16::from_ne_bytes(bytes(slot))),
        TypeEncoding::I32 => i32::from_ne_bytes(bytes(slot)) as isize as usize,
        TypeEncoding::U32 => u32::from_ne_bytes(bytes(slot)) as usize,
        TypeEncoding::I64 => i64::from_ne_bytes(bytes(slot)) as usize,
        TypeEncoding::U64 => u64::from_ne_bytes(bytes(slot)) as usize,
        other if other.is_integer_register_class() => word(slot),
        other => {
            return Err(unsupported(
                other,
                "only integer-register results can be returned from native closures",
            ));
        }
    };
    Ok(cell)
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::{BridgeCreateInfo, NativeRuntime, TableRuntime};

    fn bridge() -> (Rc<TableRuntime>, Bridge) {
        let runtime = Rc::new(TableRuntime::new());
        let bridge = Bridge::new(runtime.clone(), BridgeCreateInfo::default());
        (runtime, bridge)
    }

    fn encoding(source: &str) -> TypeEncoding {
        TypeEncoding::parse(source).expect("valid encoding")
    }

    fn round_trip(bridge: &Bridge, source: &str, value: HostValue) -> HostValue {
        let encoding = encoding(source);
        let mut buffer = vec![0u8; 16];
        let mut keep_alive = KeepAlive::new(bridge);
        write_value(bridge, &encoding, &mut buffer, 4, &value, &mut keep_alive)
            .unwrap_or_else(|err| panic!("writing {value} as '{source}': {err}"));
        read_value(bridge, &encoding, &buffer, 4)
            .unwrap_or_else(|err| panic!("reading '{source}': {err}"))
    }

    #[test]
    fn integer_scalars_round_trip_at_their_limits() {
        let (_runtime, bridge) = bridge();
        let cases: [(&str, i64, i64); 8] = [
            ("c", i8::MIN.into(), i8::MAX.into()),
            ("C", 0, u8::MAX.into()),
            ("s", i16::MIN.into(), i16::MAX.into()),
            ("S", 0, u16::MAX.into()),
            ("i", i32::MIN.into(), i32::MAX.into()),
            ("I", 0, u32::MAX.into()),
            ("q", i64::MIN, i64::MAX),
            ("Q", 0, i64::MAX),
        ];
        for (source, min, max) in cases {
            for n in [min, max, 0, 7] {
                assert_eq!(
                    round_trip(&bridge, source, HostValue::Int(n)),
                    HostValue::Int(n),
                    "'{source}' with {n}"
                );
            }
        }
    }

    #[test]
    fn floats_and_bools_round_trip_widened() {
        let (_runtime, bridge) = bridge();
        assert_eq!(round_trip(&bridge, "f", HostValue::Float(1.5)), HostValue::Float(1.5));
        assert_eq!(round_trip(&bridge, "d", HostValue::Float(-2.25)), HostValue::Float(-2.25));
        assert_eq!(round_trip(&bridge, "d", HostValue::Int(3)), HostValue::Float(3.0));
        assert_eq!(round_trip(&bridge, "B", HostValue::Bool(true)), HostValue::Bool(true));
        assert_eq!(round_trip(&bridge, "i", HostValue::Bool(true)), HostValue::Int(1));
    }

    #[test]
    fn incompatible_host_values_are_rejected_without_writing() {
        let (_runtime, bridge) = bridge();
        let mut buffer = vec![0xAAu8; 8];
        let mut keep_alive = KeepAlive::new(&bridge);

        let err = write_value(
            &bridge,
            &encoding("i"),
            &mut buffer,
            0,
            &HostValue::Float(1.0),
            &mut keep_alive,
        );
        assert!(matches!(err, Err(BridgeError::TypeMismatch { got: "float", .. })));

        let err = write_value(
            &bridge,
            &encoding("q"),
            &mut buffer,
            0,
            &HostValue::from("7"),
            &mut keep_alive,
        );
        assert!(matches!(err, Err(BridgeError::TypeMismatch { got: "string", .. })));

        let err = write_value(
            &bridge,
            &encoding("c"),
            &mut buffer,
            0,
            &HostValue::Int(300),
            &mut keep_alive,
        );
        assert!(matches!(err, Err(BridgeError::OutOfRange { value: 300, .. })));

        let err = write_value(
            &bridge,
            &encoding("Q"),
            &mut buffer,
            0,
            &HostValue::Int(-1),
            &mut keep_alive,
        );
        assert!(matches!(err, Err(BridgeError::OutOfRange { value: -1, .. })));

        assert_eq!(buffer, vec![0xAAu8; 8], "failed writes must not touch the slot");
        assert!(keep_alive.is_empty());
    }

    #[test]
    fn aggregates_and_void_are_unsupported() {
        let (_runtime, bridge) = bridge();
        let buffer = [0u8; 32];
        for source in ["{CGPoint=dd}", "(U=ic)", "[2i]", "v", "D"] {
            assert!(
                matches!(
                    read_value(&bridge, &encoding(source), &buffer, 0),
                    Err(BridgeError::UnsupportedEncoding { .. })
                ),
                "reading '{source}' must fail"
            );
        }
    }

    #[test]
    fn short_buffers_are_reported() {
        let (_runtime, bridge) = bridge();
        let buffer = [0u8; 6];
        assert_eq!(
            read_value(&bridge, &encoding("q"), &buffer, 2),
            Err(BridgeError::BufferOverflow {
                offset: 2,
                needed: 8,
                available: 6
            })
        );
    }

    #[test]
    fn strings_become_native_objects_released_with_the_keep_alive() {
        let (runtime, bridge) = bridge();
        let baseline = runtime.live_objects();
        let mut buffer = [0u8; 8];
        {
            let mut keep_alive = KeepAlive::new(&bridge);
            write_value(
                &bridge,
                &encoding("@"),
                &mut buffer,
                0,
                &HostValue::from("hello"),
                &mut keep_alive,
            )
            .expect("string converts to a native object");
            assert_eq!(keep_alive.len(), 1);
            assert_eq!(runtime.live_objects(), baseline + 1);
            assert_eq!(
                read_value(&bridge, &encoding("@"), &buffer, 0),
                Ok(HostValue::from("hello"))
            );
        }
        assert_eq!(runtime.live_objects(), baseline, "temporary string leaked");
    }

    #[test]
    fn byte_buffers_cross_as_native_data() {
        let (runtime, bridge) = bridge();
        let baseline = runtime.live_objects();
        let mut buffer = [0u8; 8];
        {
            let mut keep_alive = KeepAlive::new(&bridge);
            let bytes = HostValue::from(&b"\x00binary\xff"[..]);
            write_value(&bridge, &encoding("@"), &mut buffer, 0, &bytes, &mut keep_alive)
                .expect("bytes convert to native data");
            let data = Id::from_addr(usize::from_ne_bytes(buffer));
            assert_eq!(
                runtime.class_of(data).map(|class| runtime.class_name(class)),
                Some("NSData".to_string())
            );
            assert_eq!(read_value(&bridge, &encoding("@"), &buffer, 0), Ok(bytes));
        }
        assert_eq!(runtime.live_objects(), baseline, "temporary data leaked");
    }

    #[test]
    fn collections_convert_recursively() {
        let (runtime, bridge) = bridge();
        let baseline = runtime.live_objects();
        let mut buffer = [0u8; 8];
        let mut keep_alive = KeepAlive::new(&bridge);
        let value = HostValue::Array(vec![HostValue::Int(1), HostValue::from("two")]);
        write_value(&bridge, &encoding("@"), &mut buffer, 0, &value, &mut keep_alive)
            .expect("array converts");
        let HostValue::Object(array) =
            read_value(&bridge, &encoding("@"), &buffer, 0).expect("array reads back")
        else {
            panic!("arrays stay wrapped objects");
        };
        assert_eq!(
            array.to_array(),
            Ok(vec![HostValue::Int(1), HostValue::from("two")])
        );
        drop(array);
        drop(keep_alive);
        assert_eq!(runtime.live_objects(), baseline);
    }

    #[test]
    fn c_strings_and_selectors_round_trip() {
        let (_runtime, bridge) = bridge();
        let mut buffer = [0u8; 16];
        let mut keep_alive = KeepAlive::new(&bridge);
        write_value(
            &bridge,
            &encoding("*"),
            &mut buffer,
            0,
            &HostValue::from("bytes"),
            &mut keep_alive,
        )
        .expect("C string written");
        write_value(
            &bridge,
            &encoding(":"),
            &mut buffer,
            8,
            &HostValue::from("objectAtIndex:"),
            &mut keep_alive,
        )
        .expect("selector written");
        assert_eq!(
            read_value(&bridge, &encoding("*"), &buffer, 0),
            Ok(HostValue::from("bytes"))
        );
        assert_eq!(
            read_value(&bridge, &encoding(":"), &buffer, 8),
            Ok(HostValue::from("objectAtIndex:"))
        );

        let err = write_value(
            &bridge,
            &encoding("*"),
            &mut buffer,
            0,
            &HostValue::from("nul\0inside"),
            &mut keep_alive,
        );
        assert!(matches!(err, Err(BridgeError::TypeMismatch { .. })));
    }

    #[test]
    fn pointers_read_as_handles() {
        let (_runtime, bridge) = bridge();
        let buffer = 0x1000usize.to_ne_bytes();
        let value = read_value(&bridge, &encoding("^i"), &buffer, 0).expect("pointer reads");
        let HostValue::Pointer(pointer) = value else {
            panic!("expected a pointer handle");
        };
        assert_eq!(pointer.address(), 0x1000);
        assert_eq!(pointer.element(), &TypeEncoding::I32);
        assert_eq!(pointer.element_size(), Some(4));
    }

    #[test]
    fn registers_are_reinterpreted_by_width() {
        let (_runtime, bridge) = bridge();
        assert_eq!(
            value_from_register(&bridge, &TypeEncoding::I32, 7),
            Ok(HostValue::Int(7))
        );
        assert_eq!(
            value_from_register(&bridge, &TypeEncoding::I8, 0xFF),
            Ok(HostValue::Int(-1))
        );
        assert_eq!(
            value_from_register(&bridge, &TypeEncoding::U16, 0x1_0001),
            Ok(HostValue::Int(1))
        );
        assert_eq!(
            value_from_register(&bridge, &TypeEncoding::Object(None), 0),
            Ok(HostValue::Nil)
        );
        assert!(matches!(
            value_from_register(&bridge, &TypeEncoding::F64, 0),
            Err(BridgeError::UnsupportedEncoding { .. })
        ));
    }

    #[test]
    fn negative_results_sign_extend_into_registers() {
        let slot = (-2i32).to_ne_bytes();
        assert_eq!(register_from_slot(&TypeEncoding::I32, &slot), Ok(usize::MAX - 1));
        let slot = u32::MAX.to_ne_bytes();
        assert_eq!(register_from_slot(&TypeEncoding::U32, &slot), Ok(u32::MAX as usize));
        assert!(register_from_slot(&TypeEncoding::F32, &slot).is_err());
    }
}
