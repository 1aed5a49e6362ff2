//! Argument and result marshaling.
//!
//! Every export declares an ordered list of [`ArgKind`]s and a single
//! [`ResultShape`]. [`decode`] turns host call arguments into [`NativeArgs`]
//! and [`encode`] turns the native entry point's [`NativeValue`] back into a
//! [`HostValue`]. Neither can infer anything from the values themselves: the
//! declaration is the contract.

use std::borrow::Cow;
use std::fmt;

use tether_core::{
    BridgeError, BridgeResult, FunctionRef, HandleTable, HostValue, NativeValue, Ownership,
    RawAddress, TypeTag,
};

/// Expected kind of one argument of an exported function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    /// 32-bit integer, via `ToInt32`.
    Int32,
    /// 64-bit integer.
    Int64,
    /// Boolean, via `ToBoolean`.
    Bool,
    /// String, via `ToString`. Valid for the duration of the call only.
    Str,
    /// A host function. Never coerced.
    Function,
    /// An opaque handle to a native object of the given type.
    Handle(TypeTag),
}

impl ArgKind {
    /// A handle to a `T`.
    pub fn handle<T: 'static>() -> Self {
        Self::Handle(TypeTag::of::<T>())
    }
}

impl fmt::Display for ArgKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int32 => f.write_str("int32"),
            Self::Int64 => f.write_str("int64"),
            Self::Bool => f.write_str("bool"),
            Self::Str => f.write_str("string"),
            Self::Function => f.write_str("function"),
            Self::Handle(tag) => write!(f, "handle<{tag}>"),
        }
    }
}

/// A decoded argument.
#[derive(Debug)]
pub enum NativeArg<'a> {
    /// 32-bit integer.
    Int32(i32),
    /// 64-bit integer.
    Int64(i64),
    /// Boolean.
    Bool(bool),
    /// String borrowed from the host, or a temporary produced by coercion.
    Str(Cow<'a, str>),
    /// Host function. Only the callback relay may retain it past the call.
    Function(FunctionRef),
    /// Native object behind a type-checked handle.
    Object {
        /// Address of the object.
        address: RawAddress,
        /// Its verified type.
        tag: TypeTag,
    },
}

impl NativeArg<'_> {
    fn kind_name(&self) -> String {
        match self {
            Self::Int32(_) => "int32".to_string(),
            Self::Int64(_) => "int64".to_string(),
            Self::Bool(_) => "bool".to_string(),
            Self::Str(_) => "string".to_string(),
            Self::Function(_) => "function".to_string(),
            Self::Object { tag, .. } => format!("handle<{tag}>"),
        }
    }
}

/// Decoded arguments of one call, in declaration order.
#[derive(Debug)]
pub struct NativeArgs<'a> {
    function: &'a str,
    values: Vec<NativeArg<'a>>,
}

impl<'a> NativeArgs<'a> {
    /// Name of the export being called.
    pub fn function(&self) -> &str {
        self.function
    }

    /// Number of decoded arguments.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether there are no arguments.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn get(&self, index: usize, expected: &str) -> BridgeResult<&NativeArg<'a>> {
        self.values.get(index).ok_or_else(|| {
            BridgeError::type_mismatch(
                format!("{expected} argument {index} of '{}'", self.function),
                "nothing",
            )
        })
    }

    fn mismatch(&self, index: usize, expected: &str, found: &NativeArg<'_>) -> BridgeError {
        BridgeError::type_mismatch(
            format!("{expected} argument {index} of '{}'", self.function),
            found.kind_name(),
        )
    }

    /// Argument `index` as a 32-bit integer.
    pub fn int32(&self, index: usize) -> BridgeResult<i32> {
        match self.get(index, "int32")? {
            NativeArg::Int32(n) => Ok(*n),
            other => Err(self.mismatch(index, "int32", other)),
        }
    }

    /// Argument `index` as a 64-bit integer.
    pub fn int64(&self, index: usize) -> BridgeResult<i64> {
        match self.get(index, "int64")? {
            NativeArg::Int64(n) => Ok(*n),
            other => Err(self.mismatch(index, "int64", other)),
        }
    }

    /// Argument `index` as a boolean.
    pub fn bool(&self, index: usize) -> BridgeResult<bool> {
        match self.get(index, "bool")? {
            NativeArg::Bool(b) => Ok(*b),
            other => Err(self.mismatch(index, "bool", other)),
        }
    }

    /// Argument `index` as a string. Copy it to keep it past the call.
    pub fn str(&self, index: usize) -> BridgeResult<&str> {
        match self.get(index, "string")? {
            NativeArg::Str(s) => Ok(&**s),
            other => Err(self.mismatch(index, "string", other)),
        }
    }

    /// Argument `index` as a host function.
    pub fn function_ref(&self, index: usize) -> BridgeResult<FunctionRef> {
        match self.get(index, "function")? {
            NativeArg::Function(f) => Ok(f.clone()),
            other => Err(self.mismatch(index, "function", other)),
        }
    }

    /// Address of the object behind argument `index`.
    pub fn address(&self, index: usize) -> BridgeResult<RawAddress> {
        match self.get(index, "handle")? {
            NativeArg::Object { address, .. } => Ok(*address),
            other => Err(self.mismatch(index, "handle", other)),
        }
    }

    /// Argument `index` as a reference to the native `T` it designates.
    ///
    /// The reference is only valid for the duration of the call. For a
    /// borrowing handle the referenced object must still be alive, which the
    /// `unsafe` constructor that lent it required of its caller.
    pub fn object<T: 'static>(&self, index: usize) -> BridgeResult<&T> {
        let expected = TypeTag::of::<T>();
        match self.get(index, "handle")? {
            NativeArg::Object { address, tag } if *tag == expected => {
                // SAFETY: the address came from a live handle-table entry whose
                // tag is `T`, and entries only hold addresses their unsafe
                // constructors vouched for. Owning entries keep their object
                // alive until they leave the table, which the bridge's
                // re-entrancy check rules out during this call.
                Ok(unsafe { &*address.as_ptr::<T>() })
            }
            other => Err(self.mismatch(index, &format!("handle<{expected}>"), other)),
        }
    }
}

/// Decode host arguments against the declared kinds.
///
/// Fails with [`BridgeError::ArityMismatch`] before touching any argument if
/// too few were supplied. Surplus arguments are ignored.
pub fn decode<'a>(
    function: &'a str,
    handles: &HandleTable,
    args: &'a [HostValue],
    kinds: &[ArgKind],
) -> BridgeResult<NativeArgs<'a>> {
    if args.len() < kinds.len() {
        return Err(BridgeError::ArityMismatch {
            function: function.to_string(),
            expected: kinds.len(),
            supplied: args.len(),
        });
    }

    let mut values = Vec::with_capacity(kinds.len());
    for (value, kind) in args.iter().zip(kinds) {
        let arg = match kind {
            ArgKind::Int32 => NativeArg::Int32(value.to_int32()),
            ArgKind::Int64 => NativeArg::Int64(value.to_integer()),
            ArgKind::Bool => NativeArg::Bool(value.to_boolean()),
            ArgKind::Str => NativeArg::Str(value.to_host_string()),
            ArgKind::Function => match value {
                HostValue::Function(f) => NativeArg::Function(f.clone()),
                other => return Err(BridgeError::type_mismatch("function", other.type_name())),
            },
            ArgKind::Handle(tag) => NativeArg::Object {
                address: handles.unwrap_as(value, *tag)?,
                tag: *tag,
            },
        };
        values.push(arg);
    }

    Ok(NativeArgs { function, values })
}

/// Declared result shape of an exported function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    /// Returns nothing; the host sees `undefined`.
    None,
    /// Returns a boolean.
    Bool,
    /// Returns a 32-bit integer.
    Int32,
    /// Returns a 64-bit integer, encoded as a host number.
    Int64,
    /// Returns a string, copied into the host.
    Str,
    /// Returns a reference to an object owned elsewhere.
    Borrowed(TypeTag),
    /// Returns a new object the host will own.
    Owned(TypeTag),
}

impl ResultShape {
    /// A borrowed `T`.
    pub fn borrowed<T: 'static>() -> Self {
        Self::Borrowed(TypeTag::of::<T>())
    }

    /// An owned `T`.
    pub fn owned<T: 'static>() -> Self {
        Self::Owned(TypeTag::of::<T>())
    }
}

impl fmt::Display for ResultShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("nothing"),
            Self::Bool => f.write_str("bool"),
            Self::Int32 => f.write_str("int32"),
            Self::Int64 => f.write_str("int64"),
            Self::Str => f.write_str("string"),
            Self::Borrowed(tag) => write!(f, "borrowed<{tag}>"),
            Self::Owned(tag) => write!(f, "owned<{tag}>"),
        }
    }
}

/// Encode a native result against its declared shape.
///
/// A mismatch is reported as [`BridgeError::ResultShape`]; an owned object
/// carried by the rejected value is destroyed on the way out.
pub fn encode(
    function: &str,
    handles: &mut HandleTable,
    shape: ResultShape,
    value: NativeValue,
) -> BridgeResult<HostValue> {
    let matches = match (&shape, &value) {
        (ResultShape::None, NativeValue::Nothing)
        | (ResultShape::Bool, NativeValue::Bool(_))
        | (ResultShape::Int32, NativeValue::Int32(_))
        | (ResultShape::Int64, NativeValue::Int64(_))
        | (ResultShape::Str, NativeValue::Str(_)) => true,
        (ResultShape::Borrowed(tag), NativeValue::Object(obj)) => {
            obj.tag() == *tag && obj.ownership() == Ownership::Borrowing
        }
        (ResultShape::Owned(tag), NativeValue::Object(obj)) => {
            obj.tag() == *tag && obj.ownership() == Ownership::Owning
        }
        _ => false,
    };

    if !matches {
        return Err(BridgeError::ResultShape {
            function: function.to_string(),
            declared: shape.to_string(),
            returned: value.describe(),
        });
    }

    Ok(encode_value(handles, value))
}

/// Encode a self-describing native value, as carried by native events.
pub fn encode_value(handles: &mut HandleTable, value: NativeValue) -> HostValue {
    match value {
        NativeValue::Nothing => HostValue::Undefined,
        NativeValue::Bool(b) => HostValue::Bool(b),
        NativeValue::Int32(n) => HostValue::Int32(n),
        NativeValue::Int64(n) => HostValue::Number(n as f64),
        NativeValue::Str(s) => HostValue::from(s),
        NativeValue::Object(obj) => {
            let (address, tag, destructor) = obj.into_parts();
            // SAFETY: every `NativeObject` constructor that takes a raw
            // address is `unsafe` and requires it to be valid for `tag`.
            let handle = unsafe {
                match destructor {
                    Some(destructor) => handles.make_owning(address, tag, destructor),
                    None => handles.make_borrowing(address, tag),
                }
            };
            HostValue::Handle(handle)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tether_core::{NativeObject, Ownership};

    struct Socket {
        port: i32,
    }
    struct Other;

    #[test]
    fn test_decode_primitives() {
        let handles = HandleTable::new();
        let args = [
            HostValue::Number(7.9),
            HostValue::string("12345678901"),
            HostValue::Int32(0),
            HostValue::string("host"),
        ];
        let kinds = [ArgKind::Int32, ArgKind::Int64, ArgKind::Bool, ArgKind::Str];

        let decoded = decode("f", &handles, &args, &kinds).unwrap();
        assert_eq!(decoded.len(), 4);
        assert_eq!(decoded.int32(0).unwrap(), 7);
        assert_eq!(decoded.int64(1).unwrap(), 12_345_678_901);
        assert!(!decoded.bool(2).unwrap());
        assert_eq!(decoded.str(3).unwrap(), "host");
    }

    #[test]
    fn test_decode_arity_mismatch() {
        let handles = HandleTable::new();
        let args = [HostValue::Int32(1)];
        let kinds = [ArgKind::Int32, ArgKind::Str, ArgKind::Bool];

        match decode("timer_start", &handles, &args, &kinds) {
            Err(BridgeError::ArityMismatch {
                function,
                expected,
                supplied,
            }) => {
                assert_eq!(function, "timer_start");
                assert_eq!(expected, 3);
                assert_eq!(supplied, 1);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_decode_ignores_surplus_arguments() {
        let handles = HandleTable::new();
        let args = [HostValue::Int32(1), HostValue::Int32(2)];
        let decoded = decode("f", &handles, &args, &[ArgKind::Int32]).unwrap();
        assert_eq!(decoded.len(), 1);
    }

    #[test]
    fn test_decode_function_requires_function() {
        let handles = HandleTable::new();
        let args = [HostValue::string("not a function")];
        let err = decode("f", &handles, &args, &[ArgKind::Function]).unwrap_err();
        assert!(matches!(err, BridgeError::TypeMismatch { .. }));
    }

    #[test]
    fn test_decode_object_handle() {
        let mut handles = HandleTable::new();
        let socket = Socket { port: 6121 };
        // SAFETY: `socket` outlives `handles` and every decoded argument.
        let handle = unsafe {
            handles.make_borrowing(
                RawAddress::from_ptr(&socket as *const Socket),
                TypeTag::of::<Socket>(),
            )
        };
        let args = [HostValue::Handle(handle)];

        let decoded = decode("f", &handles, &args, &[ArgKind::handle::<Socket>()]).unwrap();
        assert_eq!(decoded.object::<Socket>(0).unwrap().port, 6121);
        assert!(decoded.object::<Other>(0).is_err());

        let err = decode("f", &handles, &args, &[ArgKind::handle::<Other>()]).unwrap_err();
        assert!(matches!(err, BridgeError::TypeMismatch { .. }));
    }

    #[test]
    fn test_accessor_kind_mismatch() {
        let handles = HandleTable::new();
        let args = [HostValue::Int32(3)];
        let decoded = decode("f", &handles, &args, &[ArgKind::Int32]).unwrap();
        assert!(decoded.str(0).is_err());
        assert!(decoded.int32(1).is_err());
    }

    #[test]
    fn test_encode_primitives() {
        let mut handles = HandleTable::new();
        assert_eq!(
            encode("f", &mut handles, ResultShape::None, NativeValue::Nothing).unwrap(),
            HostValue::Undefined
        );
        assert_eq!(
            encode("f", &mut handles, ResultShape::Int64, NativeValue::Int64(1 << 40)).unwrap(),
            HostValue::Number((1u64 << 40) as f64)
        );
        assert_eq!(
            encode("f", &mut handles, ResultShape::Str, NativeValue::from("ok")).unwrap(),
            HostValue::string("ok")
        );
    }

    #[test]
    fn test_encode_owned_and_borrowed() {
        let mut handles = HandleTable::new();
        let owned = encode(
            "f",
            &mut handles,
            ResultShape::owned::<Socket>(),
            NativeObject::owned(Box::new(Socket { port: 1 })).into(),
        )
        .unwrap();
        let owned = owned.as_handle().unwrap().clone();
        assert_eq!(handles.ownership(&owned), Some(Ownership::Owning));

        let socket = Socket { port: 2 };
        let borrowed = encode(
            "f",
            &mut handles,
            ResultShape::borrowed::<Socket>(),
            // SAFETY: `socket` outlives the handle, which is released below.
            unsafe { NativeObject::borrowed(&socket) }.into(),
        )
        .unwrap();
        let borrowed = borrowed.as_handle().unwrap().clone();
        assert_eq!(handles.ownership(&borrowed), Some(Ownership::Borrowing));

        handles.release(&owned).unwrap();
        handles.release(&borrowed).unwrap();
    }

    #[test]
    fn test_encode_shape_mismatch_destroys_object() {
        let drops = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&drops);
        // SAFETY: the shape check rejects the object before it is wrapped, so
        // the fake address is never dereferenced.
        let obj = unsafe {
            NativeObject::owned_with(RawAddress::new(0x99), TypeTag::of::<Socket>(), move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        };

        let mut handles = HandleTable::new();
        let err = encode("f", &mut handles, ResultShape::borrowed::<Socket>(), obj.into())
            .unwrap_err();
        match err {
            BridgeError::ResultShape {
                declared, returned, ..
            } => {
                assert_eq!(declared, "borrowed<Socket>");
                assert_eq!(returned, "owned<Socket>");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert!(handles.is_empty());
    }
}
