//! Maps a loosely-typed host value to one of the AMF3 wire types.
//!
//! The encoder itself (`Encoder::encode`) walks an already wire-tagged
//! [`Value`]: by the time a value reaches the encoder, someone has already
//! decided whether a number is an `Integer` or a `Double`, and whether a
//! sequence is a dense array or an associative one. [`Host`] is the looser
//! shape application code naturally produces before that decision is
//! made; [`infer`] makes it.
use super::{exclude_dunder_fields, FieldFilter, ObjectData, Value};
use crate::error::{EncodeError, EncodeResult};
use crate::Pair;

/// The upper/lower bound of the 29-bit signed integer range representable
/// without falling back to `Double`.
const I29_MIN: i64 = -(1 << 28);
const I29_MAX: i64 = (1 << 28) - 1;

/// A host-supplied object descriptor: an explicit class name, an explicit
/// dynamic flag, and a field list split into the subset that is sealed
/// (`static_field_names`) versus dynamic.
///
/// A `dynamic = false` descriptor with no class name still produces a
/// *typed* (non-dynamic) object with an empty class name, not an anonymous
/// dynamic one (see the named-object descriptor note in the component
/// design).
#[derive(Debug, Clone, Default)]
pub struct NamedObject {
    /// `None` for an anonymous object.
    pub class_name: Option<String>,

    /// Whether fields outside `static_field_names` may be attached.
    pub dynamic: bool,

    /// Whether this object externalizes itself; `infer` cannot produce a
    /// useful body for these, since externalizable bodies come from a host
    /// write callback supplied directly to the encoder.
    pub externalizable: bool,

    /// The subset of `fields`'s keys that are sealed members, in trait
    /// order (which may differ from `fields`'s order).
    pub static_field_names: Vec<String>,

    /// The object's fields, in host insertion order.
    pub fields: Vec<(String, Host)>,
}

/// The wire type a [`Host::Forced`] value is pinned to, overriding
/// inference.
///
/// Not every variant is a valid encoder target: only the types the
/// encoder's main dispatch can reach (everything except the vector and
/// dictionary forms) can actually be produced by [`infer`]. Forcing one of
/// the unreachable types fails with `EncodeError::UnsupportedType`: see
/// the ForcedType coverage gap design note.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForcedWireType {
    /// `UNDEFINED` (0x00).
    Undefined,
    /// `NULL` (0x01).
    Null,
    /// `FALSE` (0x02).
    False,
    /// `TRUE` (0x03).
    True,
    /// `INTEGER` (0x04).
    Integer,
    /// `DOUBLE` (0x05).
    Double,
    /// `STRING` (0x06).
    String,
    /// `DATE` (0x08).
    Date,
    /// `ARRAY` (0x09), dense or associative depending on the wrapped host
    /// value's shape.
    Array,
    /// `OBJECT` (0x0A).
    Object,
    /// `BYTE_ARRAY` (0x0C).
    ByteArray,
    /// `VECTOR_INT` (0x0D), unreachable, see type docs.
    VectorInt,
    /// `VECTOR_UINT` (0x0E), unreachable, see type docs.
    VectorUInt,
    /// `VECTOR_DOUBLE` (0x0F), unreachable, see type docs.
    VectorDouble,
    /// `VECTOR_OBJECT` (0x10), unreachable, see type docs.
    VectorObject,
    /// `DICTIONARY` (0x11), unreachable, see type docs.
    Dictionary,
}

impl ForcedWireType {
    fn name(self) -> &'static str {
        use ForcedWireType::*;
        match self {
            Undefined => "UNDEFINED",
            Null => "NULL",
            False => "FALSE",
            True => "TRUE",
            Integer => "INTEGER",
            Double => "DOUBLE",
            String => "STRING",
            Date => "DATE",
            Array => "ARRAY",
            Object => "OBJECT",
            ByteArray => "BYTE_ARRAY",
            VectorInt => "VECTOR_INT",
            VectorUInt => "VECTOR_UINT",
            VectorDouble => "VECTOR_DOUBLE",
            VectorObject => "VECTOR_OBJECT",
            Dictionary => "DICTIONARY",
        }
    }

    fn is_reachable(self) -> bool {
        use ForcedWireType::*;
        !matches!(
            self,
            VectorInt | VectorUInt | VectorDouble | VectorObject | Dictionary
        )
    }
}

/// A loosely-typed host value: the shape application code has on hand
/// before it commits to an exact AMF3 wire type.
#[derive(Debug, Clone)]
pub enum Host {
    /// Maps to `NULL`.
    Null,
    /// Maps to `UNDEFINED`.
    Undefined,
    /// Maps to `FALSE`/`TRUE`.
    Bool(bool),
    /// Maps to `INTEGER` if finite, integral, and in range, else `DOUBLE`.
    Number(f64),
    /// Maps to `STRING`.
    Str(String),
    /// Maps to `DATE`; milliseconds since the Unix epoch.
    Date(f64),
    /// Maps to `BYTE_ARRAY`.
    Bytes(Vec<u8>),
    /// An indexed sequence; maps to the dense form of `ARRAY`.
    Array(Vec<Host>),
    /// A name→value mapping with no object descriptor; maps to the
    /// associative form of `ARRAY`.
    Map(Vec<(String, Host)>),
    /// A host object carrying an explicit class name/dynamic descriptor;
    /// maps to `OBJECT`.
    Named(NamedObject),
    /// Overrides inference for the wrapped value.
    Forced(Box<Host>, ForcedWireType),
}

impl Host {
    /// Wraps `value` so it is encoded as `wire_type` regardless of what
    /// inference would otherwise choose.
    pub fn forced(value: Host, wire_type: ForcedWireType) -> Host {
        Host::Forced(Box::new(value), wire_type)
    }
}

/// Converts a [`Host`] value into a wire-tagged [`Value`] per the type
/// inference rules in the component design, applying `filter` (in
/// addition to the unconditional `__`-prefix exclusion) to every object
/// and associative-array field list encountered.
pub fn infer(host: Host, filter: Option<&FieldFilter>) -> EncodeResult<Value> {
    match host {
        Host::Null => Ok(Value::Null),
        Host::Undefined => Ok(Value::Undefined),
        Host::Bool(b) => Ok(Value::Bool(b)),
        Host::Number(n) => Ok(infer_number(n)),
        Host::Str(s) => Ok(Value::String(s)),
        Host::Date(millis) => Ok(Value::date(millis)),
        Host::Bytes(bytes) => Ok(Value::byte_array(bytes)),
        Host::Array(items) => {
            let values = items
                .into_iter()
                .map(|h| infer(h, filter))
                .collect::<EncodeResult<Vec<_>>>()?;
            Ok(Value::dense_array(values))
        }
        Host::Map(fields) => into_assoc_array(fields, filter),
        Host::Named(named) => into_object(named, filter),
        Host::Forced(inner, wire_type) => apply_forced(*inner, wire_type, filter),
    }
}

fn infer_number(n: f64) -> Value {
    if n.is_finite() && n.fract() == 0.0 {
        let as_i64 = n as i64;
        if (I29_MIN..=I29_MAX).contains(&as_i64) && as_i64 as f64 == n {
            return Value::Integer(as_i64 as i32);
        }
    }
    Value::Double(n)
}

fn into_assoc_array(fields: Vec<(String, Host)>, filter: Option<&FieldFilter>) -> EncodeResult<Value> {
    let mut pairs = Vec::with_capacity(fields.len());
    for (key, host) in fields {
        if key.starts_with("__") {
            continue;
        }
        if let Some(f) = filter {
            if !f(&key) {
                continue;
            }
        }
        pairs.push(Pair::new(key, infer(host, filter)?));
    }
    Ok(Value::assoc_array(exclude_dunder_fields(pairs)))
}

fn into_object(named: NamedObject, filter: Option<&FieldFilter>) -> EncodeResult<Value> {
    let NamedObject {
        class_name,
        dynamic,
        externalizable,
        static_field_names,
        fields,
    } = named;

    let mut values = Vec::with_capacity(fields.len());
    for (key, host) in fields {
        if key.starts_with("__") {
            continue;
        }
        if let Some(f) = filter {
            if !f(&key) {
                continue;
            }
        }
        values.push((key, infer(host, filter)?));
    }

    let mut slots: Vec<Option<(String, Value)>> = static_field_names.iter().map(|_| None).collect();
    let mut dynamic_fields = Vec::new();
    for (key, value) in values {
        if let Some(pos) = static_field_names.iter().position(|name| *name == key) {
            slots[pos] = Some((key, value));
        } else if dynamic {
            dynamic_fields.push(Pair::new(key, value));
        }
    }
    let static_fields = slots
        .into_iter()
        .flatten()
        .map(|(k, v)| Pair::new(k, v))
        .collect();

    Ok(Value::Object(super::handle(ObjectData {
        class_name,
        dynamic,
        externalizable,
        static_fields,
        dynamic_fields,
        trait_identity: super::handle(()),
    })))
}

fn as_number(host: &Host) -> EncodeResult<f64> {
    match host {
        Host::Number(n) => Ok(*n),
        _ => Err(EncodeError::UnsupportedValue),
    }
}

fn as_string(host: Host) -> EncodeResult<String> {
    match host {
        Host::Str(s) => Ok(s),
        _ => Err(EncodeError::UnsupportedValue),
    }
}

fn as_bytes(host: Host) -> EncodeResult<Vec<u8>> {
    match host {
        Host::Bytes(b) => Ok(b),
        _ => Err(EncodeError::UnsupportedValue),
    }
}

fn apply_forced(inner: Host, wire_type: ForcedWireType, filter: Option<&FieldFilter>) -> EncodeResult<Value> {
    if !wire_type.is_reachable() {
        return Err(EncodeError::UnsupportedType {
            requested: wire_type.name(),
        });
    }
    use ForcedWireType::*;
    match wire_type {
        Undefined => Ok(Value::Undefined),
        Null => Ok(Value::Null),
        False => Ok(Value::Bool(false)),
        True => Ok(Value::Bool(true)),
        Integer => {
            let n = as_number(&inner)?;
            let i = n as i64;
            if !(I29_MIN..=I29_MAX).contains(&i) {
                return Err(EncodeError::OutOfRange { value: i });
            }
            Ok(Value::Integer(i as i32))
        }
        Double => Ok(Value::Double(as_number(&inner)?)),
        String => Ok(Value::String(as_string(inner)?)),
        Date => Ok(Value::date(as_number(&inner)?)),
        ByteArray => Ok(Value::byte_array(as_bytes(inner)?)),
        Array => match inner {
            Host::Array(_) | Host::Map(_) => infer(inner, filter),
            _ => Err(EncodeError::UnsupportedValue),
        },
        Object => match inner {
            Host::Named(named) => into_object(named, filter),
            _ => Err(EncodeError::UnsupportedValue),
        },
        VectorInt | VectorUInt | VectorDouble | VectorObject | Dictionary => unreachable!(
            "rejected above by is_reachable"
        ),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn infers_integer_within_range() {
        assert!(matches!(infer(Host::Number(5.0), None).unwrap(), Value::Integer(5)));
        assert!(matches!(
            infer(Host::Number(((1i64 << 28) - 1) as f64), None).unwrap(),
            Value::Integer(n) if n == (1 << 28) - 1
        ));
    }

    #[test]
    fn infers_double_outside_range_or_non_integral() {
        assert!(matches!(
            infer(Host::Number((1i64 << 28) as f64), None).unwrap(),
            Value::Double(_)
        ));
        assert!(matches!(infer(Host::Number(1.5), None).unwrap(), Value::Double(_)));
    }

    #[test]
    fn forced_type_overrides_inference() {
        let v = infer(Host::forced(Host::Number(1.0), ForcedWireType::Double), None).unwrap();
        match v {
            Value::Double(n) => assert_eq!(n, 1.0),
            other => panic!("expected Double, got {:?}", other),
        }
    }

    #[test]
    fn forced_vector_type_is_rejected() {
        let err = infer(Host::forced(Host::Array(vec![]), ForcedWireType::VectorInt), None).unwrap_err();
        assert!(matches!(err, EncodeError::UnsupportedType { .. }));
    }

    #[test]
    fn map_excludes_dunder_fields() {
        let v = infer(
            Host::Map(vec![
                ("a".to_string(), Host::Number(1.0)),
                ("__hidden".to_string(), Host::Number(2.0)),
            ]),
            None,
        )
        .unwrap();
        match v {
            Value::AssocArray(h) => assert_eq!(h.borrow().len(), 1),
            other => panic!("expected AssocArray, got {:?}", other),
        }
    }
}
