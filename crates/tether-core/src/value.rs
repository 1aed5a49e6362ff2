//! Host-side values.
//!
//! These are the values the scripting runtime exchanges with the bridge. They
//! are reference counted with `Rc` and therefore confined to the host thread;
//! native threads talk to the host only through [`NativeValue`](crate::native::NativeValue)s
//! queued on the callback relay.
//!
//! Coercions follow ECMAScript conversion rules, which is what the
//! argument marshaler applies when a host value is passed where a
//! primitive is expected.

use std::borrow::Cow;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::error::{BridgeError, BridgeResult};
use crate::handle::OpaqueHandle;

type HostFn = dyn Fn(&[HostValue]) -> BridgeResult<HostValue>;

/// A host callable value.
#[derive(Clone)]
pub struct FunctionRef {
    name: Rc<str>,
    inner: Rc<HostFn>,
}

impl FunctionRef {
    /// Wrap a closure as an anonymous host function.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&[HostValue]) -> BridgeResult<HostValue> + 'static,
    {
        Self::named("anonymous", f)
    }

    /// Wrap a closure as a named host function.
    pub fn named<F>(name: &str, f: F) -> Self
    where
        F: Fn(&[HostValue]) -> BridgeResult<HostValue> + 'static,
    {
        Self {
            name: Rc::from(name),
            inner: Rc::new(f),
        }
    }

    /// The function's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke the function.
    pub fn call(&self, args: &[HostValue]) -> BridgeResult<HostValue> {
        (self.inner)(args)
    }

    /// Whether both references point at the same function.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for FunctionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FunctionRef({})", self.name)
    }
}

/// A shared, mutable namespace object.
///
/// Used as the module target that exports are installed into, and as the
/// raw export object handed to a helper layer.
#[derive(Clone, Default)]
pub struct HostObject {
    fields: Rc<RefCell<BTreeMap<String, HostValue>>>,
}

impl HostObject {
    /// Create an empty object.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a property, returning the previous value.
    pub fn set(&self, name: impl Into<String>, value: impl Into<HostValue>) -> Option<HostValue> {
        self.fields.borrow_mut().insert(name.into(), value.into())
    }

    /// Get a property.
    pub fn get(&self, name: &str) -> Option<HostValue> {
        self.fields.borrow().get(name).cloned()
    }

    /// Remove a property.
    pub fn remove(&self, name: &str) -> Option<HostValue> {
        self.fields.borrow_mut().remove(name)
    }

    /// Whether a property exists.
    pub fn contains(&self, name: &str) -> bool {
        self.fields.borrow().contains_key(name)
    }

    /// Property names in sorted order.
    pub fn keys(&self) -> Vec<String> {
        self.fields.borrow().keys().cloned().collect()
    }

    /// Number of properties.
    pub fn len(&self) -> usize {
        self.fields.borrow().len()
    }

    /// Whether the object has no properties.
    pub fn is_empty(&self) -> bool {
        self.fields.borrow().is_empty()
    }

    /// Call a function-valued property.
    pub fn call(&self, name: &str, args: &[HostValue]) -> BridgeResult<HostValue> {
        match self.get(name) {
            Some(HostValue::Function(f)) => f.call(args),
            Some(other) => Err(BridgeError::type_mismatch("function", other.type_name())),
            None => Err(BridgeError::type_mismatch("function", "undefined")),
        }
    }

    /// Whether both values are the same object.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.fields, &other.fields)
    }
}

impl fmt::Debug for HostObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.fields.borrow().keys()).finish()
    }
}

/// A value in the host runtime.
#[derive(Clone, Debug, Default)]
pub enum HostValue {
    /// Absence of a value.
    #[default]
    Undefined,
    /// The null value.
    Null,
    /// A boolean.
    Bool(bool),
    /// A 32-bit integer.
    Int32(i32),
    /// A double-precision number. 64-bit native integers are encoded here.
    Number(f64),
    /// An immutable string.
    String(Rc<str>),
    /// A callable.
    Function(FunctionRef),
    /// An opaque handle to a native object.
    Handle(OpaqueHandle),
    /// A namespace object.
    Object(HostObject),
}

impl HostValue {
    /// Create a string value.
    pub fn string(s: impl AsRef<str>) -> Self {
        Self::String(Rc::from(s.as_ref()))
    }

    /// Name of the value's type, as used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Int32(_) => "int32",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Function(_) => "function",
            Self::Handle(_) => "handle",
            Self::Object(_) => "object",
        }
    }

    /// Whether this is `undefined`.
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// The handle, if this is one.
    pub fn as_handle(&self) -> Option<&OpaqueHandle> {
        match self {
            Self::Handle(h) => Some(h),
            _ => None,
        }
    }

    /// The function, if this is one.
    pub fn as_function(&self) -> Option<&FunctionRef> {
        match self {
            Self::Function(f) => Some(f),
            _ => None,
        }
    }

    /// The object, if this is one.
    pub fn as_object(&self) -> Option<&HostObject> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    /// The string contents, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// ECMAScript `ToNumber`.
    pub fn to_number(&self) -> f64 {
        match self {
            Self::Undefined => f64::NAN,
            Self::Null => 0.0,
            Self::Bool(b) => f64::from(u8::from(*b)),
            Self::Int32(n) => f64::from(*n),
            Self::Number(n) => *n,
            Self::String(s) => string_to_number(s),
            Self::Function(_) | Self::Handle(_) | Self::Object(_) => f64::NAN,
        }
    }

    /// ECMAScript `ToInt32`.
    pub fn to_int32(&self) -> i32 {
        match self {
            Self::Int32(n) => *n,
            other => number_to_int32(other.to_number()),
        }
    }

    /// Integer conversion for 64-bit arguments: truncates, saturates, NaN is 0.
    pub fn to_integer(&self) -> i64 {
        match self {
            Self::Int32(n) => i64::from(*n),
            other => {
                let n = other.to_number();
                if n.is_nan() { 0 } else { n.trunc() as i64 }
            }
        }
    }

    /// ECMAScript `ToBoolean`.
    pub fn to_boolean(&self) -> bool {
        match self {
            Self::Undefined | Self::Null => false,
            Self::Bool(b) => *b,
            Self::Int32(n) => *n != 0,
            Self::Number(n) => !(n.is_nan() || *n == 0.0),
            Self::String(s) => !s.is_empty(),
            Self::Function(_) | Self::Handle(_) | Self::Object(_) => true,
        }
    }

    /// ECMAScript `ToString`. Strings are borrowed rather than copied.
    pub fn to_host_string(&self) -> Cow<'_, str> {
        match self {
            Self::String(s) => Cow::Borrowed(&**s),
            Self::Undefined => Cow::Borrowed("undefined"),
            Self::Null => Cow::Borrowed("null"),
            Self::Bool(true) => Cow::Borrowed("true"),
            Self::Bool(false) => Cow::Borrowed("false"),
            Self::Int32(n) => Cow::Owned(n.to_string()),
            Self::Number(n) => Cow::Owned(format_number(*n)),
            Self::Function(f) => Cow::Owned(format!("function {}() {{ [native code] }}", f.name())),
            Self::Handle(_) => Cow::Borrowed("[object Handle]"),
            Self::Object(_) => Cow::Borrowed("[object Object]"),
        }
    }
}

impl PartialEq for HostValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int32(a), Self::Int32(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::Int32(a), Self::Number(b)) | (Self::Number(b), Self::Int32(a)) => {
                f64::from(*a) == *b
            }
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Function(a), Self::Function(b)) => a.ptr_eq(b),
            (Self::Handle(a), Self::Handle(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl From<bool> for HostValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i32> for HostValue {
    fn from(n: i32) -> Self {
        Self::Int32(n)
    }
}

impl From<f64> for HostValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        Self::string(s)
    }
}

impl From<String> for HostValue {
    fn from(s: String) -> Self {
        Self::String(Rc::from(s))
    }
}

impl From<FunctionRef> for HostValue {
    fn from(f: FunctionRef) -> Self {
        Self::Function(f)
    }
}

impl From<OpaqueHandle> for HostValue {
    fn from(h: OpaqueHandle) -> Self {
        Self::Handle(h)
    }
}

impl From<HostObject> for HostValue {
    fn from(o: HostObject) -> Self {
        Self::Object(o)
    }
}

fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return 0.0;
    }

    match trimmed {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }

    if let Some(value) = radix_literal(trimmed) {
        return value;
    }

    // Rust's float grammar also accepts "inf" and "nan"; ECMAScript does not.
    if trimmed
        .bytes()
        .any(|b| b.is_ascii_alphabetic() && b != b'e' && b != b'E')
    {
        return f64::NAN;
    }

    trimmed.parse::<f64>().unwrap_or(f64::NAN)
}

/// `0x`, `0o` and `0b` literals. Returns `None` for anything else.
fn radix_literal(s: &str) -> Option<f64> {
    let radix = match s.get(..2)? {
        "0x" | "0X" => 16,
        "0o" | "0O" => 8,
        "0b" | "0B" => 2,
        _ => return None,
    };

    let digits = &s[2..];
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return Some(f64::NAN);
    }

    Some(match u128::from_str_radix(digits, radix) {
        Ok(value) => value as f64,
        // Wider than 128 bits.
        Err(_) => digits
            .chars()
            .filter_map(|c| c.to_digit(radix))
            .fold(0.0, |acc, d| acc * f64::from(radix) + f64::from(d)),
    })
}

fn number_to_int32(n: f64) -> i32 {
    if !n.is_finite() {
        return 0;
    }

    const TWO_32: f64 = 4_294_967_296.0;
    const TWO_31: f64 = 2_147_483_648.0;

    let wrapped = n.trunc().rem_euclid(TWO_32);
    if wrapped >= TWO_31 {
        (wrapped - TWO_32) as i32
    } else {
        wrapped as i32
    }
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    if n.is_infinite() {
        return (if n > 0.0 { "Infinity" } else { "-Infinity" }).to_string();
    }
    if n < 0.0 {
        return format!("-{}", format_number(-n));
    }

    // Shortest round-trip digits with a decimal exponent, e.g. "1.25e-7".
    let scientific = format!("{n:e}");
    let (mantissa, exponent) = scientific
        .split_once('e')
        .unwrap_or((scientific.as_str(), "0"));
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();
    let exponent: i32 = exponent.parse().unwrap_or(0);

    // The value is 0.digits * 10^point.
    let k = digits.len() as i32;
    let point = exponent + 1;

    if k <= point && point <= 21 {
        format!("{digits}{}", "0".repeat((point - k) as usize))
    } else if 0 < point && point <= 21 {
        let (int, frac) = digits.split_at(point as usize);
        format!("{int}.{frac}")
    } else if -6 < point && point <= 0 {
        format!("0.{}{digits}", "0".repeat(point.unsigned_abs() as usize))
    } else {
        let sign = if exponent < 0 { '-' } else { '+' };
        let (first, rest) = digits.split_at(1);
        if rest.is_empty() {
            format!("{first}e{sign}{}", exponent.unsigned_abs())
        } else {
            format!("{first}.{rest}e{sign}{}", exponent.unsigned_abs())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_int32() {
        assert_eq!(HostValue::Number(42.9).to_int32(), 42);
        assert_eq!(HostValue::Number(-1.5).to_int32(), -1);
        assert_eq!(HostValue::Number(4_294_967_297.0).to_int32(), 1);
        assert_eq!(HostValue::Number(2_147_483_648.0).to_int32(), i32::MIN);
        assert_eq!(HostValue::Number(f64::NAN).to_int32(), 0);
        assert_eq!(HostValue::string(" 17 ").to_int32(), 17);
        assert_eq!(HostValue::string("0x10").to_int32(), 16);
        assert_eq!(HostValue::string("nan").to_int32(), 0);
        assert_eq!(HostValue::Bool(true).to_int32(), 1);
        assert_eq!(HostValue::Undefined.to_int32(), 0);
    }

    #[test]
    fn test_to_integer() {
        assert_eq!(HostValue::Number(9_007_199_254_740_993.0).to_integer(), 9_007_199_254_740_992);
        assert_eq!(HostValue::Number(-3.7).to_integer(), -3);
        assert_eq!(HostValue::Number(f64::INFINITY).to_integer(), i64::MAX);
        assert_eq!(HostValue::string("abc").to_integer(), 0);
    }

    #[test]
    fn test_to_boolean() {
        assert!(!HostValue::Undefined.to_boolean());
        assert!(!HostValue::Number(f64::NAN).to_boolean());
        assert!(!HostValue::string("").to_boolean());
        assert!(HostValue::string("0").to_boolean());
        assert!(HostValue::Int32(-1).to_boolean());
        assert!(HostValue::Object(HostObject::new()).to_boolean());
    }

    #[test]
    fn test_to_host_string() {
        assert_eq!(HostValue::Number(3.0).to_host_string(), "3");
        assert_eq!(HostValue::Number(0.5).to_host_string(), "0.5");
        assert_eq!(HostValue::Number(-0.0).to_host_string(), "0");
        assert_eq!(HostValue::Number(f64::NEG_INFINITY).to_host_string(), "-Infinity");
        assert_eq!(HostValue::Int32(-12).to_host_string(), "-12");
        assert_eq!(HostValue::Bool(false).to_host_string(), "false");
        assert_eq!(HostValue::Null.to_host_string(), "null");

        let value = HostValue::string("borrowed");
        assert!(matches!(value.to_host_string(), Cow::Borrowed("borrowed")));
    }

    #[test]
    fn test_number_to_string_extremes() {
        let cases = [
            (1e21, "1e+21"),
            (1e20, "100000000000000000000"),
            (123.456, "123.456"),
            (0.000001, "0.000001"),
            (1e-7, "1e-7"),
            (1.23e-18, "1.23e-18"),
            (-1.5e300, "-1.5e+300"),
            (5e-324, "5e-324"),
            (f64::MAX, "1.7976931348623157e+308"),
        ];
        for (n, text) in cases {
            assert_eq!(HostValue::Number(n).to_host_string(), text, "formatting {n:e}");
        }
    }

    #[test]
    fn test_radix_literals() {
        assert_eq!(HostValue::string("0b101").to_number(), 5.0);
        assert_eq!(HostValue::string("0O17").to_number(), 15.0);
        assert_eq!(HostValue::string("0xff").to_number(), 255.0);
        assert_eq!(
            HostValue::string("0x10000000000000000").to_number(),
            18_446_744_073_709_551_616.0
        );
        assert!(HostValue::string("0b").to_number().is_nan());
        assert!(HostValue::string("0b102").to_number().is_nan());
        assert!(HostValue::string("0x+1").to_number().is_nan());
        assert!(HostValue::string("-0x10").to_number().is_nan());
    }

    #[test]
    fn test_host_object_call() {
        let object = HostObject::new();
        object.set(
            "double",
            FunctionRef::named("double", |args: &[HostValue]| {
                Ok(HostValue::Int32(args[0].to_int32() * 2))
            }),
        );
        object.set("answer", 42);

        assert_eq!(object.call("double", &[HostValue::Int32(21)]).unwrap(), HostValue::Int32(42));
        assert!(matches!(
            object.call("answer", &[]),
            Err(BridgeError::TypeMismatch { .. })
        ));
        assert!(object.call("missing", &[]).is_err());
        assert_eq!(object.keys(), vec!["answer".to_string(), "double".to_string()]);
    }

    #[test]
    fn test_function_identity() {
        let f = FunctionRef::new(|_: &[HostValue]| Ok(HostValue::Undefined));
        let g = FunctionRef::new(|_: &[HostValue]| Ok(HostValue::Undefined));
        assert_eq!(HostValue::Function(f.clone()), HostValue::Function(f.clone()));
        assert_ne!(HostValue::Function(f), HostValue::Function(g));
    }
}
