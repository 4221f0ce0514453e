//! Type encodings: the compact grammar the native runtime uses to describe
//! argument and return shapes.
//!
//! `TypeEncoding`: one parsed token (`i`, `^v`, `{CGPoint=dd}`, ...)
//!
//! `MethodSignature`: a return encoding followed by the argument encodings,
//! parsed from a complete signature string such as `v24@0:8i16`
use std::fmt;
use std::mem::{align_of, size_of};

use crate::DecodeError;

/// Qualifier characters that may prefix an encoding and carry no layout.
const QUALIFIERS: &[u8] = b"rnNoORVA";

/// Receiver and selector precede the declared arguments of every method.
pub const IMPLICIT_ARGUMENTS: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeEncoding {
    Void,
    Bool,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    LongDouble,
    CString,
    /// `@`, optionally annotated with a class name (`@"NSString"`)
    Object(Option<String>),
    /// `@?`
    Block,
    Class,
    Selector,
    Pointer(Box<TypeEncoding>),
    /// `?`, usually seen as `^?` for function pointers
    Unknown,
    Struct {
        name: String,
        fields: Option<Vec<TypeEncoding>>,
    },
    Union {
        name: String,
        fields: Option<Vec<TypeEncoding>>,
    },
    Array {
        len: usize,
        element: Box<TypeEncoding>,
    },
    Bitfield(u32),
}

impl TypeEncoding {
    /// Parses the first encoding in `source`, returning it together with the
    /// number of bytes consumed. Leading qualifiers are skipped and counted.
    pub fn parse_one(source: &str) -> Result<(Self, usize), DecodeError> {
        let mut cursor = Cursor::new(source);
        let encoding = cursor.parse(false)?;
        Ok((encoding, cursor.pos))
    }

    /// Parses `source` as exactly one encoding.
    pub fn parse(source: &str) -> Result<Self, DecodeError> {
        let (encoding, consumed) = Self::parse_one(source)?;
        if consumed != source.len() {
            return Err(DecodeError::Malformed {
                encoding: source.to_string(),
                reason: "trailing characters after encoding",
            });
        }
        Ok(encoding)
    }

    pub fn size(&self) -> Result<usize, DecodeError> {
        self.layout().map(|(size, _)| size)
    }

    pub fn alignment(&self) -> Result<usize, DecodeError> {
        self.layout().map(|(_, align)| align)
    }

    /// C layout of the encoding as `(size, alignment)`.
    fn layout(&self) -> Result<(usize, usize), DecodeError> {
        let word = (size_of::<usize>(), align_of::<usize>());
        match self {
            Self::Void => Ok((0, 1)),
            Self::Bool | Self::I8 | Self::U8 => Ok((1, 1)),
            Self::I16 | Self::U16 => Ok((2, 2)),
            Self::I32 | Self::U32 | Self::F32 => Ok((4, 4)),
            Self::I64 | Self::U64 => Ok((8, align_of::<u64>())),
            Self::F64 => Ok((8, align_of::<f64>())),
            Self::LongDouble => Ok((16, 16)),
            Self::CString
            | Self::Object(_)
            | Self::Block
            | Self::Class
            | Self::Selector
            | Self::Pointer(_) => Ok(word),
            Self::Array { len, element } => {
                let (size, align) = element.layout()?;
                let total = size
                    .checked_mul(*len)
                    .ok_or_else(|| self.size_overflow())?;
                self.fits((total, align))
            }
            Self::Struct {
                fields: Some(fields),
                ..
            } => {
                let mut offset = 0;
                let mut max_align = 1;
                for field in fields {
                    let (size, align) = field.layout()?;
                    offset = align_up(offset, align)
                        .and_then(|start| start.checked_add(size))
                        .ok_or_else(|| self.size_overflow())?;
                    max_align = max_align.max(align);
                }
                let size = align_up(offset, max_align).ok_or_else(|| self.size_overflow())?;
                self.fits((size, max_align))
            }
            Self::Union {
                fields: Some(fields),
                ..
            } => {
                let mut max_size = 0;
                let mut max_align = 1;
                for field in fields {
                    let (size, align) = field.layout()?;
                    max_size = max_size.max(size);
                    max_align = max_align.max(align);
                }
                let size = align_up(max_size, max_align).ok_or_else(|| self.size_overflow())?;
                self.fits((size, max_align))
            }
            Self::Unknown
            | Self::Bitfield(_)
            | Self::Struct { fields: None, .. }
            | Self::Union { fields: None, .. } => Err(DecodeError::Unsized {
                encoding: self.to_string(),
            }),
        }
    }

    fn size_overflow(&self) -> DecodeError {
        DecodeError::Malformed {
            encoding: self.to_string(),
            reason: "size overflows",
        }
    }

    /// Objects larger than `isize::MAX` bytes cannot exist.
    fn fits(&self, layout: (usize, usize)) -> Result<(usize, usize), DecodeError> {
        if layout.0 > isize::MAX as usize {
            return Err(self.size_overflow());
        }
        Ok(layout)
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Self::Void)
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(
            self,
            Self::Struct { .. } | Self::Union { .. } | Self::Array { .. }
        )
    }

    /// True for shapes passed in integer registers: integers, booleans and
    /// anything pointer-like.
    pub fn is_integer_register_class(&self) -> bool {
        matches!(
            self,
            Self::Bool
                | Self::I8
                | Self::U8
                | Self::I16
                | Self::U16
                | Self::I32
                | Self::U32
                | Self::I64
                | Self::U64
                | Self::CString
                | Self::Object(_)
                | Self::Block
                | Self::Class
                | Self::Selector
                | Self::Pointer(_)
        )
    }
}

fn align_up(offset: usize, align: usize) -> Option<usize> {
    offset.div_ceil(align).checked_mul(align)
}

impl fmt::Display for TypeEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Void => f.write_str("v"),
            Self::Bool => f.write_str("B"),
            Self::I8 => f.write_str("c"),
            Self::U8 => f.write_str("C"),
            Self::I16 => f.write_str("s"),
            Self::U16 => f.write_str("S"),
            Self::I32 => f.write_str("i"),
            Self::U32 => f.write_str("I"),
            Self::I64 => f.write_str("q"),
            Self::U64 => f.write_str("Q"),
            Self::F32 => f.write_str("f"),
            Self::F64 => f.write_str("d"),
            Self::LongDouble => f.write_str("D"),
            Self::CString => f.write_str("*"),
            Self::Object(None) => f.write_str("@"),
            Self::Object(Some(class)) => write!(f, "@\"{class}\""),
            Self::Block => f.write_str("@?"),
            Self::Class => f.write_str("#"),
            Self::Selector => f.write_str(":"),
            Self::Pointer(pointee) => write!(f, "^{pointee}"),
            Self::Unknown => f.write_str("?"),
            Self::Struct { name, fields } => {
                write_aggregate(f, '{', '}', name, fields.as_deref())
            }
            Self::Union { name, fields } => {
                write_aggregate(f, '(', ')', name, fields.as_deref())
            }
            Self::Array { len, element } => write!(f, "[{len}{element}]"),
            Self::Bitfield(bits) => write!(f, "b{bits}"),
        }
    }
}

fn write_aggregate(
    f: &mut fmt::Formatter<'_>,
    open: char,
    close: char,
    name: &str,
    fields: Option<&[TypeEncoding]>,
) -> fmt::Result {
    write!(f, "{open}{name}")?;
    if let Some(fields) = fields {
        f.write_str("=")?;
        for field in fields {
            write!(f, "{field}")?;
        }
    }
    write!(f, "{close}")
}

struct Cursor<'a> {
    source: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            pos: 0,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        Some(byte)
    }

    fn unexpected_end(&self) -> DecodeError {
        DecodeError::UnexpectedEnd {
            encoding: self.source.to_string(),
        }
    }

    fn malformed(&self, reason: &'static str) -> DecodeError {
        DecodeError::Malformed {
            encoding: self.source.to_string(),
            reason,
        }
    }

    fn expect(&mut self, byte: u8) -> Result<(), DecodeError> {
        match self.bump() {
            Some(found) if found == byte => Ok(()),
            Some(_) => Err(self.malformed("unbalanced brackets")),
            None => Err(self.unexpected_end()),
        }
    }

    fn number(&mut self) -> Result<usize, DecodeError> {
        let start = self.pos;
        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(self.malformed("expected a count"));
        }
        self.source[start..self.pos]
            .parse()
            .map_err(|_| self.malformed("count out of range"))
    }

    /// Reads a `"..."` run and returns its contents.
    fn quoted(&mut self) -> Result<&'a str, DecodeError> {
        self.expect(b'"')?;
        let start = self.pos;
        loop {
            match self.bump() {
                Some(b'"') => return Ok(&self.source[start..self.pos - 1]),
                Some(_) => {}
                None => return Err(self.unexpected_end()),
            }
        }
    }

    /// Skips the frame offset digits that follow each type in a complete
    /// method signature.
    fn skip_offset(&mut self) {
        if matches!(self.peek(), Some(b'-' | b'+')) {
            self.pos += 1;
        }
        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.pos += 1;
        }
    }

    fn parse(&mut self, in_named_fields: bool) -> Result<TypeEncoding, DecodeError> {
        while self.peek().is_some_and(|b| QUALIFIERS.contains(&b)) {
            self.pos += 1;
        }
        let code = self.bump().ok_or_else(|| self.unexpected_end())?;
        let encoding = match code {
            b'v' => TypeEncoding::Void,
            b'B' => TypeEncoding::Bool,
            b'c' => TypeEncoding::I8,
            b'C' => TypeEncoding::U8,
            b's' => TypeEncoding::I16,
            b'S' => TypeEncoding::U16,
            b'i' | b'l' => TypeEncoding::I32,
            b'I' | b'L' => TypeEncoding::U32,
            b'q' => TypeEncoding::I64,
            b'Q' => TypeEncoding::U64,
            b'f' => TypeEncoding::F32,
            b'd' => TypeEncoding::F64,
            b'D' => TypeEncoding::LongDouble,
            b'*' => TypeEncoding::CString,
            b'#' => TypeEncoding::Class,
            b':' => TypeEncoding::Selector,
            b'?' => TypeEncoding::Unknown,
            b'@' => self.object(in_named_fields)?,
            b'^' => TypeEncoding::Pointer(Box::new(self.parse(false)?)),
            b'b' => {
                let bits = self.number()?;
                let bits = u32::try_from(bits)
                    .map_err(|_| self.malformed("bitfield width out of range"))?;
                TypeEncoding::Bitfield(bits)
            }
            b'[' => {
                let len = self.number()?;
                let element = self.parse(false)?;
                self.expect(b']')?;
                TypeEncoding::Array {
                    len,
                    element: Box::new(element),
                }
            }
            b'{' => {
                let (name, fields) = self.aggregate(b'}')?;
                TypeEncoding::Struct { name, fields }
            }
            b'(' => {
                let (name, fields) = self.aggregate(b')')?;
                TypeEncoding::Union { name, fields }
            }
            other => {
                return Err(DecodeError::UnknownCode {
                    code: other as char,
                    encoding: self.source.to_string(),
                });
            }
        };
        Ok(encoding)
    }

    fn object(&mut self, in_named_fields: bool) -> Result<TypeEncoding, DecodeError> {
        match self.peek() {
            Some(b'?') => {
                self.pos += 1;
                Ok(TypeEncoding::Block)
            }
            Some(b'"') => {
                let rewind = self.pos;
                let class = self.quoted()?;
                // Inside a struct with named fields, `@"x"` followed by a type
                // is a bare object whose next field is named "x".
                if in_named_fields && !matches!(self.peek(), Some(b'"' | b'}' | b')')) {
                    self.pos = rewind;
                    return Ok(TypeEncoding::Object(None));
                }
                Ok(TypeEncoding::Object(Some(class.to_string())))
            }
            _ => Ok(TypeEncoding::Object(None)),
        }
    }

    fn aggregate(
        &mut self,
        close: u8,
    ) -> Result<(String, Option<Vec<TypeEncoding>>), DecodeError> {
        let start = self.pos;
        loop {
            match self.bump() {
                Some(b'=') => break,
                Some(b) if b == close => {
                    let name = self.source[start..self.pos - 1].to_string();
                    return Ok((name, None));
                }
                Some(_) => {}
                None => return Err(self.unexpected_end()),
            }
        }
        let name = self.source[start..self.pos - 1].to_string();

        let mut fields = Vec::new();
        let mut named = false;
        loop {
            match self.peek() {
                None => return Err(self.unexpected_end()),
                Some(b) if b == close => {
                    self.pos += 1;
                    return Ok((name, Some(fields)));
                }
                Some(b'"') => {
                    self.quoted()?;
                    named = true;
                }
                Some(_) => fields.push(self.parse(named)?),
            }
        }
    }
}

/// Return encoding plus ordered argument encodings of one method or closure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSignature {
    return_type: TypeEncoding,
    arguments: Vec<TypeEncoding>,
}

impl MethodSignature {
    pub fn new(return_type: TypeEncoding, arguments: Vec<TypeEncoding>) -> Self {
        Self {
            return_type,
            arguments,
        }
    }

    /// Parses a complete signature. Frame offsets after each type are
    /// accepted and ignored.
    pub fn parse(types: &str) -> Result<Self, DecodeError> {
        let mut cursor = Cursor::new(types);
        let mut encodings = Vec::new();
        while !cursor.at_end() {
            encodings.push(cursor.parse(false)?);
            cursor.skip_offset();
        }
        if encodings.is_empty() {
            return Err(cursor.unexpected_end());
        }
        let return_type = encodings.remove(0);
        Ok(Self {
            return_type,
            arguments: encodings,
        })
    }

    pub fn return_type(&self) -> &TypeEncoding {
        &self.return_type
    }

    pub fn arguments(&self) -> &[TypeEncoding] {
        &self.arguments
    }

    pub fn argument_count(&self) -> usize {
        self.arguments.len()
    }

    /// Arguments visible to host code: everything after receiver and
    /// selector.
    pub fn host_arity(&self) -> usize {
        self.arguments.len().saturating_sub(IMPLICIT_ARGUMENTS)
    }

    /// Slot 0 is the return value, slots `1..=argument_count` the arguments.
    pub fn slot(&self, index: usize) -> Option<&TypeEncoding> {
        match index {
            0 => Some(&self.return_type),
            n => self.arguments.get(n - 1),
        }
    }

    pub fn slot_count(&self) -> usize {
        self.arguments.len() + 1
    }

    /// Byte offset of every argument in a packed argument buffer.
    pub fn argument_offsets(&self) -> Result<Vec<usize>, DecodeError> {
        let mut offsets = Vec::with_capacity(self.arguments.len());
        let mut offset = 0usize;
        for argument in &self.arguments {
            offsets.push(offset);
            offset = offset
                .checked_add(argument.size()?)
                .ok_or_else(|| self.size_overflow())?;
        }
        Ok(offsets)
    }

    pub fn total_argument_bytes(&self) -> Result<usize, DecodeError> {
        self.arguments.iter().try_fold(0usize, |total, argument| {
            total
                .checked_add(argument.size()?)
                .ok_or_else(|| self.size_overflow())
        })
    }

    fn size_overflow(&self) -> DecodeError {
        DecodeError::Malformed {
            encoding: self.to_string(),
            reason: "argument sizes overflow",
        }
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.return_type)?;
        for argument in &self.arguments {
            write!(f, "{argument}")?;
        }
        Ok(())
    }
}
