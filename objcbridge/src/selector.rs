use crate::{BridgeError, Result};

/// Separator the native runtime places after each argument label.
pub const NATIVE_SEPARATOR: char = ':';

/// Translates a host-supplied message name into native message syntax.
///
/// - names already containing `:` are native syntax and must end with `:`
/// - names without `:` sent with no arguments are used verbatim
/// - otherwise the name must end with `host_separator`, and every
///   `host_separator` becomes `:` (`insert_at_` becomes `insert:at:`)
///
/// Every other shape is ambiguous and rejected.
pub fn native_message_name(
    host_name: &str,
    arity: usize,
    host_separator: char,
) -> Result<String> {
    let ambiguous = |reason| BridgeError::AmbiguousMessageName {
        name: host_name.to_string(),
        reason,
    };

    if host_name.is_empty() {
        return Err(ambiguous("empty message name"));
    }
    if host_name.contains(NATIVE_SEPARATOR) {
        if !host_name.ends_with(NATIVE_SEPARATOR) {
            return Err(ambiguous("native-style names must end with ':'"));
        }
        return Ok(host_name.to_string());
    }
    if arity == 0 {
        return Ok(host_name.to_string());
    }
    if !host_name.ends_with(host_separator) {
        return Err(ambiguous(
            "names sent with arguments must end with the host separator",
        ));
    }
    if host_name.starts_with(host_separator) && host_name.len() == host_separator.len_utf8() {
        return Err(ambiguous("name has no label"));
    }
    Ok(host_name.replace(host_separator, ":"))
}

/// Name of the host method that answers a native message: the final `:` is
/// dropped and the others become `host_separator` (`insertObject:atIndex:`
/// becomes `insertObject_atIndex`).
pub fn host_method_name(native_name: &str, host_separator: char) -> String {
    native_name
        .strip_suffix(NATIVE_SEPARATOR)
        .unwrap_or(native_name)
        .replace(NATIVE_SEPARATOR, host_separator.encode_utf8(&mut [0; 4]))
}

/// Number of arguments a native message name takes.
pub fn message_arity(native_name: &str) -> usize {
    native_name.matches(NATIVE_SEPARATOR).count()
}
