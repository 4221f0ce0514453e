use std::ffi::{CStr, CString, c_char};

use crate::table::{Payload, TableRuntime, argument, receiver, set_result};
use crate::{CallRecord, Class, Id, NativeException, NativeRuntime, Number, Sel};

pub type MethodResult = Result<(), NativeException>;

pub type MethodFunction = fn(&TableRuntime, &mut CallRecord) -> MethodResult;

#[derive(Debug, Copy, Clone)]
pub struct BuiltinMethod<'a> {
    pub name: &'a str,
    pub types: &'a str,
    pub function: MethodFunction,
}

impl<'a> BuiltinMethod<'a> {
    pub const fn new(name: &'a str, types: &'a str, function: MethodFunction) -> Self {
        Self {
            name,
            types,
            function,
        }
    }
}

/// Returned by `indexOfObject:` when nothing matches.
pub const NOT_FOUND: u64 = i64::MAX as u64;

const OBJECT_METHODS: &[BuiltinMethod] = &[
    BuiltinMethod::new("description", "@@:", object_description),
    BuiltinMethod::new("class", "#@:", object_class),
    BuiltinMethod::new("isEqual:", "B@:@", object_is_equal),
    BuiltinMethod::new("retainCount", "Q@:", object_retain_count),
    BuiltinMethod::new("respondsToSelector:", "B@::", object_responds_to_selector),
];

const OBJECT_CLASS_METHODS: &[BuiltinMethod] = &[
    BuiltinMethod::new("new", "@@:", class_new),
    BuiltinMethod::new("class", "#@:", class_class),
    BuiltinMethod::new("description", "@@:", class_description),
];

const STRING_METHODS: &[BuiltinMethod] = &[
    BuiltinMethod::new("description", "@@:", return_self),
    BuiltinMethod::new("length", "Q@:", string_length),
    BuiltinMethod::new("UTF8String", "*@:", string_utf8),
    BuiltinMethod::new("characterAtIndex:", "S@:Q", string_character_at),
    BuiltinMethod::new("isEqualToString:", "B@:@", string_is_equal),
    BuiltinMethod::new("hasPrefix:", "B@:@", string_has_prefix),
    BuiltinMethod::new("hasSuffix:", "B@:@", string_has_suffix),
    BuiltinMethod::new("stringByAppendingString:", "@@:@", string_appending),
    BuiltinMethod::new("uppercaseString", "@@:", string_uppercase),
    BuiltinMethod::new("lowercaseString", "@@:", string_lowercase),
];

const STRING_CLASS_METHODS: &[BuiltinMethod] = &[
    BuiltinMethod::new("string", "@@:", string_empty),
    BuiltinMethod::new("stringWithUTF8String:", "@@:r*", string_with_utf8),
];

const NUMBER_METHODS: &[BuiltinMethod] = &[
    BuiltinMethod::new("intValue", "i@:", number_int_value),
    BuiltinMethod::new("longLongValue", "q@:", number_long_long_value),
    BuiltinMethod::new("doubleValue", "d@:", number_double_value),
    BuiltinMethod::new("boolValue", "B@:", number_bool_value),
];

const NUMBER_CLASS_METHODS: &[BuiltinMethod] = &[
    BuiltinMethod::new("numberWithLongLong:", "@@:q", number_with_long_long),
    BuiltinMethod::new("numberWithDouble:", "@@:d", number_with_double),
    BuiltinMethod::new("numberWithBool:", "@@:B", number_with_bool),
];

const DATA_METHODS: &[BuiltinMethod] = &[
    BuiltinMethod::new("length", "Q@:", data_length),
    BuiltinMethod::new("isEqualToData:", "B@:@", data_is_equal),
];

const DATA_CLASS_METHODS: &[BuiltinMethod] = &[
    BuiltinMethod::new("data", "@@:", data_empty),
    BuiltinMethod::new("dataWithData:", "@@:@", data_with_data),
];

const MUTABLE_DATA_METHODS: &[BuiltinMethod] = &[
    BuiltinMethod::new("appendData:", "v@:@", data_append),
    BuiltinMethod::new("setLength:", "v@:Q", data_set_length),
];

const ARRAY_METHODS: &[BuiltinMethod] = &[
    BuiltinMethod::new("count", "Q@:", array_count),
    BuiltinMethod::new("objectAtIndex:", "@@:Q", array_object_at),
    BuiltinMethod::new("firstObject", "@@:", array_first),
    BuiltinMethod::new("lastObject", "@@:", array_last),
    BuiltinMethod::new("containsObject:", "B@:@", array_contains),
    BuiltinMethod::new("indexOfObject:", "Q@:@", array_index_of),
    BuiltinMethod::new("componentsJoinedByString:", "@@:@", array_joined),
    BuiltinMethod::new("enumerateObjectsUsingBlock:", "v@:@?", array_enumerate),
];

const ARRAY_CLASS_METHODS: &[BuiltinMethod] = &[
    BuiltinMethod::new("array", "@@:", array_empty),
    BuiltinMethod::new("arrayWithObject:", "@@:@", array_with_object),
];

const MUTABLE_ARRAY_METHODS: &[BuiltinMethod] = &[
    BuiltinMethod::new("addObject:", "v@:@", array_add),
    BuiltinMethod::new("insertObject:atIndex:", "v@:@Q", array_insert),
    BuiltinMethod::new("removeLastObject", "v@:", array_remove_last),
    BuiltinMethod::new("removeAllObjects", "v@:", array_remove_all),
];

const DICTIONARY_METHODS: &[BuiltinMethod] = &[
    BuiltinMethod::new("count", "Q@:", dictionary_count),
    BuiltinMethod::new("allKeys", "@@:", dictionary_keys),
    BuiltinMethod::new("allValues", "@@:", dictionary_values),
    BuiltinMethod::new("objectForKey:", "@@:@", dictionary_object_for_key),
];

const DICTIONARY_CLASS_METHODS: &[BuiltinMethod] = &[
    BuiltinMethod::new("dictionary", "@@:", dictionary_empty),
    BuiltinMethod::new("dictionaryWithObject:forKey:", "@@:@@", dictionary_with_object),
];

fn add_methods(
    runtime: &TableRuntime,
    class: Class,
    methods: &[BuiltinMethod],
    class_methods: &[BuiltinMethod],
) {
    for method in methods {
        let function = method.function;
        runtime.add_method(class, method.name, method.types, function);
    }
    for method in class_methods {
        let function = method.function;
        runtime.add_class_method(class, method.name, method.types, function);
    }
}

/// Defines the built-in classes and protocols.
pub fn install(runtime: &TableRuntime) {
    let object_protocol = runtime.define_protocol("NSObject", &[]);
    let copying = runtime.define_protocol("NSCopying", &[]);
    let enumeration = runtime.define_protocol("NSFastEnumeration", &[]);

    let object = runtime.define_class("NSObject", None);
    runtime.adopt_protocol(object, object_protocol);
    add_methods(runtime, object, OBJECT_METHODS, OBJECT_CLASS_METHODS);

    let string = runtime.define_class("NSString", Some(object));
    runtime.adopt_protocol(string, copying);
    add_methods(runtime, string, STRING_METHODS, STRING_CLASS_METHODS);

    let number = runtime.define_class("NSNumber", Some(object));
    runtime.adopt_protocol(number, copying);
    add_methods(runtime, number, NUMBER_METHODS, NUMBER_CLASS_METHODS);

    let data = runtime.define_class("NSData", Some(object));
    runtime.adopt_protocol(data, copying);
    add_methods(runtime, data, DATA_METHODS, DATA_CLASS_METHODS);

    let mutable_data = runtime.define_class("NSMutableData", Some(data));
    add_methods(runtime, mutable_data, MUTABLE_DATA_METHODS, &[]);

    let array = runtime.define_class("NSArray", Some(object));
    runtime.adopt_protocol(array, copying);
    runtime.adopt_protocol(array, enumeration);
    add_methods(runtime, array, ARRAY_METHODS, ARRAY_CLASS_METHODS);

    let mutable_array = runtime.define_class("NSMutableArray", Some(array));
    add_methods(runtime, mutable_array, MUTABLE_ARRAY_METHODS, &[]);

    let dictionary = runtime.define_class("NSDictionary", Some(object));
    runtime.adopt_protocol(dictionary, copying);
    runtime.adopt_protocol(dictionary, enumeration);
    add_methods(runtime, dictionary, DICTIONARY_METHODS, DICTIONARY_CLASS_METHODS);
}

fn range_exception(reason: String) -> NativeException {
    NativeException::new("NSRangeException", reason)
}

fn return_object(record: &mut CallRecord, object: Id) -> MethodResult {
    set_result(record, object)
}

/// Returns a freshly created object at +0.
fn return_new(runtime: &TableRuntime, record: &mut CallRecord, object: Id) -> MethodResult {
    set_result(record, runtime.autoreleased(object))
}

fn return_bool(record: &mut CallRecord, value: bool) -> MethodResult {
    set_result(record, u8::from(value))
}

fn receiver_string(runtime: &TableRuntime, record: &CallRecord) -> Result<String, NativeException> {
    let object = receiver(record)?;
    runtime
        .string_value(object)
        .ok_or_else(|| NativeException::invalid_argument(format!("{object:p} is not a string")))
}

fn string_argument(
    runtime: &TableRuntime,
    record: &CallRecord,
    index: usize,
) -> Result<String, NativeException> {
    let object: Id = argument(record, index)?;
    if object.is_nil() {
        return Err(NativeException::invalid_argument("nil argument"));
    }
    runtime
        .string_value(object)
        .ok_or_else(|| NativeException::invalid_argument(format!("{object:p} is not a string")))
}

fn receiver_number(runtime: &TableRuntime, record: &CallRecord) -> Result<Number, NativeException> {
    let object = receiver(record)?;
    match runtime.payload(object) {
        Some(Payload::Number(number)) => Ok(number),
        _ => Err(NativeException::invalid_argument(format!(
            "{object:p} is not a number"
        ))),
    }
}

fn data_of(runtime: &TableRuntime, object: Id) -> Result<Vec<u8>, NativeException> {
    match runtime.payload(object) {
        Some(Payload::Data(bytes)) => Ok(bytes),
        _ => Err(NativeException::invalid_argument(format!(
            "{object:p} is not data"
        ))),
    }
}

fn receiver_elements(runtime: &TableRuntime, record: &CallRecord) -> Result<Vec<Id>, NativeException> {
    let object = receiver(record)?;
    match runtime.payload(object) {
        Some(Payload::Array(elements)) => Ok(elements),
        _ => Err(NativeException::invalid_argument(format!(
            "{object:p} is not an array"
        ))),
    }
}

fn receiver_entries(
    runtime: &TableRuntime,
    record: &CallRecord,
) -> Result<Vec<(Id, Id)>, NativeException> {
    let object = receiver(record)?;
    match runtime.payload(object) {
        Some(Payload::Dictionary(entries)) => Ok(entries),
        _ => Err(NativeException::invalid_argument(format!(
            "{object:p} is not a dictionary"
        ))),
    }
}

fn object_description(runtime: &TableRuntime, record: &mut CallRecord) -> MethodResult {
    let description = runtime.describe(receiver(record)?);
    return_new(runtime, record, runtime.new_string(&description))
}

fn object_class(runtime: &TableRuntime, record: &mut CallRecord) -> MethodResult {
    let class = runtime.class_of(receiver(record)?).unwrap_or_default();
    set_result(record, class.addr())
}

fn object_is_equal(runtime: &TableRuntime, record: &mut CallRecord) -> MethodResult {
    let other: Id = argument(record, 0)?;
    return_bool(record, runtime.objects_equal(receiver(record)?, other))
}

fn object_retain_count(runtime: &TableRuntime, record: &mut CallRecord) -> MethodResult {
    let count = runtime.retain_count(receiver(record)?) as u64;
    set_result(record, count)
}

fn object_responds_to_selector(runtime: &TableRuntime, record: &mut CallRecord) -> MethodResult {
    let selector: Sel = argument(record, 0)?;
    return_bool(record, runtime.responds_to(receiver(record)?, selector))
}

fn class_new(runtime: &TableRuntime, record: &mut CallRecord) -> MethodResult {
    let class = Class::from_addr(receiver(record)?.addr());
    return_new(runtime, record, runtime.alloc_instance(class))
}

fn class_class(_runtime: &TableRuntime, record: &mut CallRecord) -> MethodResult {
    let class = receiver(record)?;
    set_result(record, class.addr())
}

fn class_description(runtime: &TableRuntime, record: &mut CallRecord) -> MethodResult {
    let name = runtime.class_name(Class::from_addr(receiver(record)?.addr()));
    return_new(runtime, record, runtime.new_string(&name))
}

fn return_self(_runtime: &TableRuntime, record: &mut CallRecord) -> MethodResult {
    let object = receiver(record)?;
    return_object(record, object)
}

fn string_length(runtime: &TableRuntime, record: &mut CallRecord) -> MethodResult {
    let length = receiver_string(runtime, record)?.encode_utf16().count() as u64;
    set_result(record, length)
}

fn string_utf8(runtime: &TableRuntime, record: &mut CallRecord) -> MethodResult {
    let text = receiver_string(runtime, record)?;
    // C strings end at the first NUL
    let visible = text.split('\0').next().unwrap_or_default();
    let bytes = CString::new(visible).unwrap_or_default();
    let pointer = runtime.autorelease_bytes(bytes);
    set_result(record, pointer as usize)
}

fn string_character_at(runtime: &TableRuntime, record: &mut CallRecord) -> MethodResult {
    let text = receiver_string(runtime, record)?;
    let index: u64 = argument(record, 0)?;
    let units: Vec<u16> = text.encode_utf16().collect();
    let unit = usize::try_from(index)
        .ok()
        .and_then(|index| units.get(index).copied())
        .ok_or_else(|| {
            range_exception(format!("index {index} beyond bounds of length {}", units.len()))
        })?;
    set_result(record, unit)
}

fn string_is_equal(runtime: &TableRuntime, record: &mut CallRecord) -> MethodResult {
    let text = receiver_string(runtime, record)?;
    let other: Id = argument(record, 0)?;
    let equal = runtime.string_value(other).is_some_and(|other| other == text);
    return_bool(record, equal)
}

fn string_has_prefix(runtime: &TableRuntime, record: &mut CallRecord) -> MethodResult {
    let text = receiver_string(runtime, record)?;
    let prefix = string_argument(runtime, record, 0)?;
    return_bool(record, text.starts_with(&prefix))
}

fn string_has_suffix(runtime: &TableRuntime, record: &mut CallRecord) -> MethodResult {
    let text = receiver_string(runtime, record)?;
    let suffix = string_argument(runtime, record, 0)?;
    return_bool(record, text.ends_with(&suffix))
}

fn string_appending(runtime: &TableRuntime, record: &mut CallRecord) -> MethodResult {
    let mut text = receiver_string(runtime, record)?;
    text.push_str(&string_argument(runtime, record, 0)?);
    return_new(runtime, record, runtime.new_string(&text))
}

fn string_uppercase(runtime: &TableRuntime, record: &mut CallRecord) -> MethodResult {
    let text = receiver_string(runtime, record)?.to_uppercase();
    return_new(runtime, record, runtime.new_string(&text))
}

fn string_lowercase(runtime: &TableRuntime, record: &mut CallRecord) -> MethodResult {
    let text = receiver_string(runtime, record)?.to_lowercase();
    return_new(runtime, record, runtime.new_string(&text))
}

fn string_empty(runtime: &TableRuntime, record: &mut CallRecord) -> MethodResult {
    return_new(runtime, record, runtime.new_string(""))
}

fn string_with_utf8(runtime: &TableRuntime, record: &mut CallRecord) -> MethodResult {
    let pointer: usize = argument(record, 0)?;
    if pointer == 0 {
        return Err(NativeException::invalid_argument("NULL C string"));
    }
    // SAFETY: `*` arguments point at NUL-terminated storage for the call
    let text = unsafe { CStr::from_ptr(pointer as *const c_char) }
        .to_string_lossy()
        .into_owned();
    return_new(runtime, record, runtime.new_string(&text))
}

fn number_int_value(runtime: &TableRuntime, record: &mut CallRecord) -> MethodResult {
    let value = match receiver_number(runtime, record)? {
        Number::Bool(value) => i32::from(value),
        Number::Int(value) => value as i32,
        Number::Float(value) => value as i32,
    };
    set_result(record, value)
}

fn number_long_long_value(runtime: &TableRuntime, record: &mut CallRecord) -> MethodResult {
    let value = match receiver_number(runtime, record)? {
        Number::Bool(value) => i64::from(value),
        Number::Int(value) => value,
        Number::Float(value) => value as i64,
    };
    set_result(record, value)
}

fn number_double_value(runtime: &TableRuntime, record: &mut CallRecord) -> MethodResult {
    let value = match receiver_number(runtime, record)? {
        Number::Bool(value) => f64::from(u8::from(value)),
        Number::Int(value) => value as f64,
        Number::Float(value) => value,
    };
    set_result(record, value)
}

fn number_bool_value(runtime: &TableRuntime, record: &mut CallRecord) -> MethodResult {
    let value = match receiver_number(runtime, record)? {
        Number::Bool(value) => value,
        Number::Int(value) => value != 0,
        Number::Float(value) => value != 0.0,
    };
    return_bool(record, value)
}

fn number_with_long_long(runtime: &TableRuntime, record: &mut CallRecord) -> MethodResult {
    let value: i64 = argument(record, 0)?;
    return_new(runtime, record, runtime.new_number(Number::Int(value)))
}

fn number_with_double(runtime: &TableRuntime, record: &mut CallRecord) -> MethodResult {
    let value: f64 = argument(record, 0)?;
    return_new(runtime, record, runtime.new_number(Number::Float(value)))
}

fn number_with_bool(runtime: &TableRuntime, record: &mut CallRecord) -> MethodResult {
    let value: u8 = argument(record, 0)?;
    return_new(runtime, record, runtime.new_number(Number::Bool(value != 0)))
}

fn array_count(runtime: &TableRuntime, record: &mut CallRecord) -> MethodResult {
    let count = receiver_elements(runtime, record)?.len() as u64;
    set_result(record, count)
}

fn array_object_at(runtime: &TableRuntime, record: &mut CallRecord) -> MethodResult {
    let elements = receiver_elements(runtime, record)?;
    let index: u64 = argument(record, 0)?;
    let element = usize::try_from(index)
        .ok()
        .and_then(|index| elements.get(index).copied())
        .ok_or_else(|| {
            range_exception(match elements.len() {
                0 => format!("index {index} beyond bounds for empty array"),
                len => format!("index {index} beyond bounds [0 .. {}]", len - 1),
            })
        })?;
    return_object(record, element)
}

fn array_first(runtime: &TableRuntime, record: &mut CallRecord) -> MethodResult {
    let first = receiver_elements(runtime, record)?.first().copied();
    return_object(record, first.unwrap_or_default())
}

fn array_last(runtime: &TableRuntime, record: &mut CallRecord) -> MethodResult {
    let last = receiver_elements(runtime, record)?.last().copied();
    return_object(record, last.unwrap_or_default())
}

fn array_position(
    runtime: &TableRuntime,
    record: &CallRecord,
) -> Result<Option<usize>, NativeException> {
    let elements = receiver_elements(runtime, record)?;
    let needle: Id = argument(record, 0)?;
    Ok(elements
        .iter()
        .position(|&element| runtime.objects_equal(element, needle)))
}

fn array_contains(runtime: &TableRuntime, record: &mut CallRecord) -> MethodResult {
    let found = array_position(runtime, record)?.is_some();
    return_bool(record, found)
}

fn array_index_of(runtime: &TableRuntime, record: &mut CallRecord) -> MethodResult {
    let index = array_position(runtime, record)?.map_or(NOT_FOUND, |index| index as u64);
    set_result(record, index)
}

fn array_joined(runtime: &TableRuntime, record: &mut CallRecord) -> MethodResult {
    let elements = receiver_elements(runtime, record)?;
    let separator = string_argument(runtime, record, 0)?;
    let parts: Vec<String> = elements.iter().map(|&e| runtime.describe(e)).collect();
    return_new(runtime, record, runtime.new_string(&parts.join(&separator)))
}

/// Calls the block with `(element, index, &stop)` until it sets `stop`.
fn array_enumerate(runtime: &TableRuntime, record: &mut CallRecord) -> MethodResult {
    let elements = receiver_elements(runtime, record)?;
    let block: Id = argument(record, 0)?;
    for (index, element) in elements.into_iter().enumerate() {
        let mut stop = 0u8;
        let stop_pointer = (&raw mut stop) as usize;
        // SAFETY: the block argument of this method takes `(id, NSUInteger,
        // BOOL *)`
        unsafe { runtime.call_closure(block, &[element.addr(), index, stop_pointer])? };
        if stop != 0 {
            break;
        }
    }
    Ok(())
}

fn array_empty(runtime: &TableRuntime, record: &mut CallRecord) -> MethodResult {
    return_new(runtime, record, runtime.new_array(&[]))
}

fn array_with_object(runtime: &TableRuntime, record: &mut CallRecord) -> MethodResult {
    let object: Id = argument(record, 0)?;
    if object.is_nil() {
        return Err(NativeException::invalid_argument("attempt to insert nil object"));
    }
    return_new(runtime, record, runtime.new_array(&[object]))
}

fn data_length(runtime: &TableRuntime, record: &mut CallRecord) -> MethodResult {
    let length = data_of(runtime, receiver(record)?)?.len() as u64;
    set_result(record, length)
}

fn data_is_equal(runtime: &TableRuntime, record: &mut CallRecord) -> MethodResult {
    let bytes = data_of(runtime, receiver(record)?)?;
    let other: Id = argument(record, 0)?;
    let equal = data_of(runtime, other).is_ok_and(|other| other == bytes);
    return_bool(record, equal)
}

fn data_empty(runtime: &TableRuntime, record: &mut CallRecord) -> MethodResult {
    return_new(runtime, record, runtime.new_data(&[]))
}

fn data_with_data(runtime: &TableRuntime, record: &mut CallRecord) -> MethodResult {
    let bytes = data_of(runtime, argument(record, 0)?)?;
    return_new(runtime, record, runtime.new_data(&bytes))
}

fn data_append(runtime: &TableRuntime, record: &mut CallRecord) -> MethodResult {
    let object = receiver(record)?;
    let mut bytes = data_of(runtime, object)?;
    bytes.extend(data_of(runtime, argument(record, 0)?)?);
    runtime.set_payload(object, Payload::Data(bytes));
    Ok(())
}

/// Truncates, or zero-fills up to `length`.
fn data_set_length(runtime: &TableRuntime, record: &mut CallRecord) -> MethodResult {
    let object = receiver(record)?;
    let length: u64 = argument(record, 0)?;
    let length = usize::try_from(length)
        .map_err(|_| range_exception(format!("length {length} is too large")))?;
    let mut bytes = data_of(runtime, object)?;
    bytes.resize(length, 0);
    runtime.set_payload(object, Payload::Data(bytes));
    Ok(())
}

fn update_elements<F>(runtime: &TableRuntime, record: &CallRecord, update: F) -> MethodResult
where
    F: FnOnce(&mut Vec<Id>) -> Result<Vec<Id>, NativeException>,
{
    let array = receiver(record)?;
    let mut elements = receiver_elements(runtime, record)?;
    let removed = update(&mut elements)?;
    runtime.set_payload(array, Payload::Array(elements));
    for element in removed {
        runtime.release(element);
    }
    Ok(())
}

fn inserted_object(record: &CallRecord) -> Result<Id, NativeException> {
    let object: Id = argument(record, 0)?;
    if object.is_nil() {
        return Err(NativeException::invalid_argument("attempt to insert nil object"));
    }
    Ok(object)
}

fn array_add(runtime: &TableRuntime, record: &mut CallRecord) -> MethodResult {
    let object = inserted_object(record)?;
    update_elements(runtime, record, |elements| {
        runtime.retain(object);
        elements.push(object);
        Ok(Vec::new())
    })
}

fn array_insert(runtime: &TableRuntime, record: &mut CallRecord) -> MethodResult {
    let object = inserted_object(record)?;
    let index: u64 = argument(record, 1)?;
    update_elements(runtime, record, |elements| {
        let index = usize::try_from(index)
            .ok()
            .filter(|&index| index <= elements.len())
            .ok_or_else(|| {
                range_exception(format!(
                    "index {index} beyond bounds [0 .. {}]",
                    elements.len()
                ))
            })?;
        runtime.retain(object);
        elements.insert(index, object);
        Ok(Vec::new())
    })
}

fn array_remove_last(runtime: &TableRuntime, record: &mut CallRecord) -> MethodResult {
    update_elements(runtime, record, |elements| Ok(elements.pop().into_iter().collect()))
}

fn array_remove_all(runtime: &TableRuntime, record: &mut CallRecord) -> MethodResult {
    update_elements(runtime, record, |elements| Ok(std::mem::take(elements)))
}

fn dictionary_count(runtime: &TableRuntime, record: &mut CallRecord) -> MethodResult {
    let count = receiver_entries(runtime, record)?.len() as u64;
    set_result(record, count)
}

fn dictionary_keys(runtime: &TableRuntime, record: &mut CallRecord) -> MethodResult {
    let keys: Vec<Id> = receiver_entries(runtime, record)?
        .into_iter()
        .map(|(key, _)| key)
        .collect();
    return_new(runtime, record, runtime.new_array(&keys))
}

fn dictionary_values(runtime: &TableRuntime, record: &mut CallRecord) -> MethodResult {
    let values: Vec<Id> = receiver_entries(runtime, record)?
        .into_iter()
        .map(|(_, value)| value)
        .collect();
    return_new(runtime, record, runtime.new_array(&values))
}

fn dictionary_object_for_key(runtime: &TableRuntime, record: &mut CallRecord) -> MethodResult {
    let entries = receiver_entries(runtime, record)?;
    let key: Id = argument(record, 0)?;
    let value = entries
        .iter()
        .find(|&&(candidate, _)| runtime.objects_equal(candidate, key))
        .map_or(Id::NIL, |&(_, value)| value);
    return_object(record, value)
}

fn dictionary_empty(runtime: &TableRuntime, record: &mut CallRecord) -> MethodResult {
    return_new(runtime, record, runtime.new_dictionary(&[]))
}

fn dictionary_with_object(runtime: &TableRuntime, record: &mut CallRecord) -> MethodResult {
    let value: Id = argument(record, 0)?;
    let key: Id = argument(record, 1)?;
    if value.is_nil() || key.is_nil() {
        return Err(NativeException::invalid_argument("attempt to insert nil object"));
    }
    return_new(runtime, record, runtime.new_dictionary(&[(key, value)]))
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::{
        Bridge, BridgeCreateInfo, BridgeError, HostCallable, HostError, HostValue, KeepAlive,
        NativeException, NativeObject, NativeRuntime, Number, TableRuntime,
    };

    fn bridge() -> (Rc<TableRuntime>, Bridge) {
        let runtime = Rc::new(TableRuntime::new());
        let bridge = Bridge::new(runtime.clone(), BridgeCreateInfo::default());
        (runtime, bridge)
    }

    fn send(bridge: &Bridge, class: &str, message: &str, arguments: &[HostValue]) -> HostValue {
        bridge
            .find_class(class)
            .unwrap_or_else(|| panic!("{class} is builtin"))
            .perform(message, arguments)
            .unwrap_or_else(|err| panic!("+[{class} {message}] failed: {err}"))
    }

    fn object(value: HostValue) -> NativeObject {
        match value {
            HostValue::Object(object) => object,
            other => panic!("expected an object, got {other}"),
        }
    }

    #[test]
    fn strings_answer_foundation_messages() {
        let (_runtime, bridge) = bridge();
        let text = bridge.wrap_object(bridge.runtime().new_string("héllo"), true);
        bridge.runtime().release(text.id());
        assert_eq!(text.perform("length", &[]), Ok(HostValue::Int(5)));
        assert_eq!(text.perform("UTF8String", &[]), Ok(HostValue::from("héllo")));
        assert_eq!(
            text.perform("characterAtIndex:", &[HostValue::Int(1)]),
            Ok(HostValue::Int(0xE9))
        );
        assert_eq!(text.perform("uppercaseString", &[]), Ok(HostValue::from("HÉLLO")));
        assert!(matches!(
            text.perform("characterAtIndex:", &[HostValue::Int(9)]),
            Err(BridgeError::NativeSideFailure(exception)) if exception.name == "NSRangeException"
        ));
    }

    #[test]
    fn numbers_convert_between_representations() {
        let (runtime, bridge) = bridge();
        let number = bridge.wrap_object(runtime.new_number(Number::Float(2.75)), true);
        runtime.release(number.id());
        assert_eq!(number.perform("intValue", &[]), Ok(HostValue::Int(2)));
        assert_eq!(number.perform("doubleValue", &[]), Ok(HostValue::Float(2.75)));
        assert_eq!(number.perform("boolValue", &[]), Ok(HostValue::Bool(true)));
        assert_eq!(number.description(), Ok("2.75".to_string()));
        assert_eq!(
            send(&bridge, "NSNumber", "numberWithBool:", &[HostValue::Bool(true)]),
            HostValue::Bool(true)
        );
    }

    #[test]
    fn data_objects_exchange_bytes_with_the_host() {
        let (runtime, bridge) = bridge();
        let baseline = runtime.live_objects();
        {
            let class = runtime.class_named("NSMutableData").expect("builtin class");
            let buffer = bridge.wrap_object(runtime.alloc_instance(class), true);
            runtime.release(buffer.id());

            buffer
                .perform("appendData:", &[HostValue::from(&b"hello"[..])])
                .expect("append");
            assert_eq!(buffer.perform("length", &[]), Ok(HostValue::Int(5)));
            assert_eq!(
                buffer.perform("isEqualToData:", &[HostValue::from(&b"hello"[..])]),
                Ok(HostValue::Bool(true))
            );
            assert_eq!(buffer.description(), Ok("<68656c6c 6f>".to_string()));

            buffer.perform("setLength:", &[HostValue::Int(7)]).expect("grow");
            assert_eq!(
                send(&bridge, "NSData", "dataWithData:", &[HostValue::Object(buffer.clone())]),
                HostValue::Bytes(b"hello\0\0".to_vec())
            );
            buffer.perform("setLength:", &[HostValue::Int(2)]).expect("truncate");
            assert_eq!(runtime.bridged(buffer.id()), crate::Bridged::Data(b"he".to_vec()));
            assert!(matches!(
                buffer.perform("appendData:", &[HostValue::from("text")]),
                Err(BridgeError::NativeSideFailure(exception))
                    if exception.name == "NSInvalidArgumentException"
            ));
        }
        assert_eq!(send(&bridge, "NSData", "data", &[]), HostValue::Bytes(Vec::new()));
        assert_eq!(runtime.live_objects(), baseline, "data objects leaked");
    }

    #[test]
    fn mutable_arrays_grow_and_shrink() {
        let (runtime, bridge) = bridge();
        let baseline = runtime.live_objects();
        {
            let array = object(send(&bridge, "NSMutableArray", "new", &[]));
            array
                .perform("addObject:", &[HostValue::from("b")])
                .expect("append");
            array
                .perform("insertObject:atIndex:", &[HostValue::from("a"), HostValue::Int(0)])
                .expect("insert");
            array
                .perform("addObject:", &[HostValue::Int(3)])
                .expect("append number");
            assert_eq!(
                array.to_array(),
                Ok(vec![HostValue::from("a"), HostValue::from("b"), HostValue::Int(3)])
            );
            assert_eq!(
                array.perform("componentsJoinedByString:", &[HostValue::from("-")]),
                Ok(HostValue::from("a-b-3"))
            );
            assert_eq!(
                array.perform("indexOfObject:", &[HostValue::from("b")]),
                Ok(HostValue::Int(1))
            );
            array.perform("removeLastObject", &[]).expect("pop");
            assert_eq!(array.perform("count", &[]), Ok(HostValue::Int(2)));
            assert!(matches!(
                array.perform("insertObject:atIndex:", &[HostValue::from("z"), HostValue::Int(7)]),
                Err(BridgeError::NativeSideFailure(_))
            ));
            array.perform("removeAllObjects", &[]).expect("clear");
            assert_eq!(array.perform("firstObject", &[]), Ok(HostValue::Nil));
        }
        assert_eq!(runtime.live_objects(), baseline);
    }

    #[test]
    fn blocks_call_back_into_host_code() {
        let (runtime, bridge) = bridge();
        let list = object(send(&bridge, "NSMutableArray", "new", &[]));
        for word in ["one", "two", "three"] {
            list.perform("addObject:", &[HostValue::from(word)])
                .expect("append");
        }

        let seen = Rc::new(RefCell::new(Vec::new()));
        let recorder = seen.clone();
        let host_bridge = bridge.clone();
        let visit: Rc<dyn HostCallable> = Rc::new(move |args: &[HostValue]| -> Result<HostValue, HostError> {
            recorder.borrow_mut().push((args[0].clone(), args[1].clone()));
            if args[1] == HostValue::Int(1) {
                let HostValue::Pointer(stop) = &args[2] else {
                    return Err(HostError::new("stop flag is not a pointer"));
                };
                let mut keep_alive = KeepAlive::new(&host_bridge);
                // SAFETY: the stop flag lives for the duration of the call
                let stopped = unsafe {
                    stop.set_value(&host_bridge, 0, &HostValue::Bool(true), &mut keep_alive)
                };
                stopped.map_err(|err| HostError::new(err.to_string()))?;
            }
            Ok(HostValue::Nil)
        });
        let block = bridge.create_closure("v@Q^B", visit).expect("block signature");
        list.perform("enumerateObjectsUsingBlock:", &[block.to_host_value()])
            .expect("enumeration");
        assert_eq!(
            *seen.borrow(),
            vec![
                (HostValue::from("one"), HostValue::Int(0)),
                (HostValue::from("two"), HostValue::Int(1)),
            ]
        );

        let failing = bridge
            .create_closure(
                "v@Q^B",
                Rc::new(|_: &[HostValue]| Err::<HostValue, _>(HostError::new("refused"))),
            )
            .expect("block signature");
        assert_eq!(
            list.perform("enumerateObjectsUsingBlock:", &[failing.to_host_value()]),
            Err(BridgeError::NativeSideFailure(NativeException::new(
                "HostCallableException",
                "refused"
            )))
        );
        assert_eq!(runtime.take_exception(), None);
    }

    #[test]
    fn dictionaries_look_up_by_value() {
        let (_runtime, bridge) = bridge();
        let dictionary = object(send(
            &bridge,
            "NSDictionary",
            "dictionaryWithObject:forKey:",
            &[HostValue::from("v"), HostValue::from("k")],
        ));
        assert_eq!(
            dictionary.perform("objectForKey:", &[HostValue::from("k")]),
            Ok(HostValue::from("v"))
        );
        assert_eq!(
            dictionary.perform("objectForKey:", &[HostValue::from("missing")]),
            Ok(HostValue::Nil)
        );
        assert_eq!(dictionary.description(), Ok("{k = v;}".to_string()));
        assert!(dictionary.conforms_to_protocol("NSFastEnumeration"));
    }

    #[test]
    fn object_basics() {
        let (runtime, bridge) = bridge();
        let class = bridge.find_class("NSObject").expect("root class");
        let instance = object(class.perform("new", &[]).expect("instance"));
        let description = instance.description().expect("description");
        assert!(description.starts_with("<NSObject 0x"), "{description}");
        assert_eq!(instance.perform("retainCount", &[]), Ok(HostValue::Int(1)));
        assert_eq!(
            instance.perform("respondsToSelector:", &[HostValue::from("isEqual:")]),
            Ok(HostValue::Bool(true))
        );
        assert_eq!(
            instance.perform("isEqual:", &[HostValue::Object(instance.clone())]),
            Ok(HostValue::Bool(true))
        );
        let HostValue::Object(own_class) = instance.perform("class", &[]).expect("class") else {
            panic!("classes are wrapped");
        };
        assert_eq!(own_class.id(), class.id());
        assert_eq!(class.description(), Ok("NSObject".to_string()));
        drop(instance);
        assert_eq!(runtime.dispatch_count(), 7);
    }
}
