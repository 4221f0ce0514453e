use thiserror::Error;

use crate::NativeException;

/// Failure to interpret a type encoding.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("type encoding '{encoding}' ends unexpectedly")]
    UnexpectedEnd { encoding: String },
    #[error("unknown type code '{code}' in '{encoding}'")]
    UnknownCode { code: char, encoding: String },
    #[error("malformed type encoding '{encoding}': {reason}")]
    Malformed {
        encoding: String,
        reason: &'static str,
    },
    #[error("type '{encoding}' has no computable size")]
    Unsized { encoding: String },
}

/// Error raised by a host callable invoked through a native closure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct HostError {
    pub message: String,
}

impl HostError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BridgeError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("unsupported type encoding '{encoding}': {reason}")]
    UnsupportedEncoding {
        encoding: String,
        reason: &'static str,
    },
    #[error("'{selector}' expects {expected} arguments, got {found}")]
    ArityMismatch {
        selector: String,
        expected: usize,
        found: usize,
    },
    #[error("{class} does not understand '{selector}'")]
    UnknownMessage { class: String, selector: String },
    #[error("unknown class '{name}'")]
    UnknownClass { name: String },
    #[error("message name '{name}' is ambiguous: {reason}")]
    AmbiguousMessageName { name: String, reason: &'static str },
    #[error("cannot store {got} into a '{encoding}' slot")]
    TypeMismatch { encoding: String, got: &'static str },
    #[error("value {value} does not fit a '{encoding}' slot")]
    OutOfRange { encoding: String, value: i64 },
    #[error("pointer is null")]
    NullPointerAccess,
    #[error(
        "buffer of {available} bytes cannot hold {needed} bytes at offset {offset}"
    )]
    BufferOverflow {
        offset: usize,
        needed: usize,
        available: usize,
    },
    #[error("slot {index} is out of range for a call record with {count} slots")]
    SlotOutOfRange { index: usize, count: usize },
    #[error("void return slot cannot be read or written")]
    VoidReturn,
    #[error("closure signature '{types}' is not supported: {reason}")]
    UnsupportedClosureSignature { types: String, reason: &'static str },
    #[error("host callable failed: {0}")]
    HostCallFailed(#[from] HostError),
    #[error("native call failed: {0}")]
    NativeSideFailure(NativeException),
}

pub type Result<T, E = BridgeError> = std::result::Result<T, E>;
