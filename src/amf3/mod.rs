//! An [AMF3](https://www.adobe.com/content/dam/acom/en/devnet/pdf/amf-file-format-spec.pdf) implementation.
//!
//! # Examples
//! ```
//! use amf3::amf3::Value;
//!
//! // Encodes an AMF3 integer
//! let integer = Value::Integer(123);
//! let mut buf = Vec::new();
//! integer.write_to(&mut buf).unwrap();
//!
//! // Decodes the above integer
//! let decoded = Value::read_from(&buf[..]).unwrap();
//! assert!(matches!(decoded, Value::Integer(123)));
//! ```
use crate::error::{DecodeResult, EncodeResult};
use crate::Pair;
use std::cell::RefCell;
use std::io;
use std::rc::Rc;

pub use self::decode::Decoder;
pub use self::encode::Encoder;
pub use self::infer::{infer, ForcedWireType, Host, NamedObject};
pub use self::registry::{register, register_writer, ExternalizableReader, ExternalizableWriter};

mod decode;
mod encode;
mod infer;
pub mod reader;
pub mod registry;
pub mod writer;

pub(crate) mod marker {
    pub const UNDEFINED: u8 = 0x00;
    pub const NULL: u8 = 0x01;
    pub const FALSE: u8 = 0x02;
    pub const TRUE: u8 = 0x03;
    pub const INTEGER: u8 = 0x04;
    pub const DOUBLE: u8 = 0x05;
    pub const STRING: u8 = 0x06;
    pub const DATE: u8 = 0x08;
    pub const ARRAY: u8 = 0x09;
    pub const OBJECT: u8 = 0x0A;
    pub const BYTE_ARRAY: u8 = 0x0C;
    pub const VECTOR_INT: u8 = 0x0D;
    pub const VECTOR_UINT: u8 = 0x0E;
    pub const VECTOR_DOUBLE: u8 = 0x0F;
    pub const VECTOR_OBJECT: u8 = 0x10;
    pub const DICTIONARY: u8 = 0x11;
}

/// The name Flex gives to the one externalizable class the decoder
/// understands without a registration: an `ArrayCollection` externalizes as
/// a single nested AMF3 value.
pub const ARRAY_COLLECTION_CLASS: &str = "flex.messaging.io.ArrayCollection";

/// A reference-counted, interior-mutable cell standing in for a complex
/// value.
///
/// Every referencable AMF3 wire type (date, byte array, the two array
/// forms, object, the four vector forms, dictionary) is stored behind a
/// `Handle` rather than inline. This is what makes cyclic decoding
/// possible: the decoder registers a handle to an empty placeholder body in
/// the object reference table *before* it recurses into the body, so a
/// self-referential field captures the same handle it is still
/// constructing. It is also what makes encode-side reference-table lookups
/// identity comparisons (`Rc::ptr_eq`) instead of structural equality.
pub type Handle<T> = Rc<RefCell<T>>;

fn handle<T>(value: T) -> Handle<T> {
    Rc::new(RefCell::new(value))
}

/// Returns an integer that is unique per distinct handle and stable for the
/// lifetime of the handle, suitable for identity-based reference-table
/// lookups.
fn handle_identity<T>(h: &Handle<T>) -> usize {
    Rc::as_ptr(h) as usize
}

/// An AMF3 value.
///
/// Complex (referencable) variants hold a [`Handle`] rather than an inline
/// payload so that decoded cyclic structures (`o.self = o`) are represented
/// faithfully: two `Value`s that came from the same reference-table slot
/// share the same handle, and mutating through one is visible through the
/// other.
///
/// `Value` intentionally does not implement `PartialEq`: a structural,
/// recursive comparison would not terminate on a self-referential object.
/// Tests compare individual fields, and identity can be checked with
/// [`Value::is_same_handle`].
#[derive(Debug, Clone)]
pub enum Value {
    /// See [3.2 undefined Type](https://www.adobe.com/content/dam/acom/en/devnet/pdf/amf-file-format-spec.pdf#page=6).
    Undefined,

    /// See [3.3 null Type](https://www.adobe.com/content/dam/acom/en/devnet/pdf/amf-file-format-spec.pdf#page=6).
    Null,

    /// See [3.4/3.5 false/true Type](https://www.adobe.com/content/dam/acom/en/devnet/pdf/amf-file-format-spec.pdf#page=7).
    Bool(bool),

    /// See [3.6 integer Type](https://www.adobe.com/content/dam/acom/en/devnet/pdf/amf-file-format-spec.pdf#page=7).
    /// Always within `[-2^28, 2^28 - 1]`.
    Integer(i32),

    /// See [3.7 double Type](https://www.adobe.com/content/dam/acom/en/devnet/pdf/amf-file-format-spec.pdf#page=7).
    Double(f64),

    /// See [3.8 String Type](https://www.adobe.com/content/dam/acom/en/devnet/pdf/amf-file-format-spec.pdf#page=7).
    String(String),

    /// See [3.10 Date Type](https://www.adobe.com/content/dam/acom/en/devnet/pdf/amf-file-format-spec.pdf#page=8).
    /// Milliseconds since the Unix epoch.
    Date(Handle<f64>),

    /// See [3.14 ByteArray Type](https://www.adobe.com/content/dam/acom/en/devnet/pdf/amf-file-format-spec.pdf#page=11).
    ByteArray(Handle<Vec<u8>>),

    /// The dense (numerically-indexed) form of [3.11 Array Type](https://www.adobe.com/content/dam/acom/en/devnet/pdf/amf-file-format-spec.pdf#page=9).
    DenseArray(Handle<Vec<Value>>),

    /// The associative (named-field) form of [3.11 Array Type](https://www.adobe.com/content/dam/acom/en/devnet/pdf/amf-file-format-spec.pdf#page=9).
    AssocArray(Handle<Vec<Pair<String, Value>>>),

    /// See [3.12 Object Type](https://www.adobe.com/content/dam/acom/en/devnet/pdf/amf-file-format-spec.pdf#page=9).
    Object(Handle<ObjectData>),

    /// A `Vector.<int>` (see [3.15 Vector Type](https://www.adobe.com/content/dam/acom/en/devnet/pdf/amf-file-format-spec.pdf#page=12)).
    VectorInt(Handle<VectorData<i32>>),

    /// A `Vector.<uint>`.
    VectorUInt(Handle<VectorData<u32>>),

    /// A `Vector.<Number>`.
    VectorDouble(Handle<VectorData<f64>>),

    /// A `Vector.<T>` of objects, or the ANY-typed `Vector.<*>`.
    VectorObject(Handle<ObjectVectorData>),

    /// See [3.16 Dictionary Type](https://www.adobe.com/content/dam/acom/en/devnet/pdf/amf-file-format-spec.pdf#page=13).
    Dictionary(Handle<DictionaryData>),
}

/// The payload of a [`Value::Object`].
#[derive(Debug, Clone, Default)]
pub struct ObjectData {
    /// `None` for an anonymous object.
    pub class_name: Option<String>,

    /// Whether fields beyond `static_fields` may be attached.
    pub dynamic: bool,

    /// Whether this object's body is written/read by a host callback
    /// rather than the generic trait protocol.
    pub externalizable: bool,

    /// Sealed (trait-declared) members, in trait order.
    pub static_fields: Vec<Pair<String, Value>>,

    /// Members attached dynamically, in insertion order. Always empty for
    /// non-dynamic objects.
    pub dynamic_fields: Vec<Pair<String, Value>>,

    /// An opaque identity token shared by every object that came from the
    /// same trait reference-table slot.
    ///
    /// The encoder's `trait_refs` table dedups on this handle's identity
    /// rather than on the structural content of `class_name`/`dynamic`/
    /// `static_fields`, so two independently host-constructed objects with
    /// matching class surfaces still each get their own inline trait
    /// definition (each construction path allocates a fresh token), while
    /// objects the decoder produced from the same trait-ref share one.
    pub trait_identity: Handle<()>,
}

/// The payload shared by the three primitive vector wire types.
#[derive(Debug, Clone, Default)]
pub struct VectorData<T> {
    /// Whether the vector's length is fixed (`Vector.<T>` with `fixed=true`).
    pub fixed: bool,

    /// The vector's elements, in order.
    pub entries: Vec<T>,
}

/// The payload of a [`Value::VectorObject`].
#[derive(Debug, Clone, Default)]
pub struct ObjectVectorData {
    /// The base type name of the vector's elements. `None` is the ANY type (`*`).
    pub class_name: Option<String>,

    /// Whether the vector's length is fixed.
    pub fixed: bool,

    /// The vector's elements, in order.
    pub entries: Vec<Value>,
}

/// The payload of a [`Value::Dictionary`].
///
/// Entries preserve the original key `Value` rather than stringifying it
/// (see the Dictionary key coercion design note): lookups are O(n), which
/// is appropriate for AMF3 dictionaries, which are rarely large.
#[derive(Debug, Clone, Default)]
pub struct DictionaryData {
    /// Whether keys are weakly referenced (ActionScript `Dictionary(true)`).
    pub weak_keys: bool,

    /// The dictionary's entries, in insertion order.
    pub entries: Vec<(Value, Value)>,
}

/// An object's class surface, preceding its body on the wire.
///
/// Traits are values, not identities: two structurally-equal `Trait`s may
/// still occupy distinct trait reference-table slots, because slots are
/// created by encounter order in the stream, not by structural equality.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Trait {
    /// The class name, or the empty string for an anonymous object.
    pub class_name: String,

    /// Whether the object accepts fields beyond `static_fields`.
    pub dynamic: bool,

    /// Whether the object's body is externalizable.
    pub externalizable: bool,

    /// The ordered names of the object's sealed members.
    pub static_fields: Vec<String>,
}

impl Value {
    /// Reads an AMF3-encoded `Value` from `reader`.
    pub fn read_from<R>(reader: R) -> DecodeResult<Self>
    where
        R: io::Read,
    {
        Decoder::new(reader).decode()
    }

    /// Writes the AMF3-encoded bytes of this value to `writer`.
    pub fn write_to<W>(&self, writer: W) -> Result<(), EncodeError>
    where
        W: io::Write,
    {
        Encoder::new(writer).encode(self)
    }

    /// Returns `true` if `self` and `other` are the *same* complex value
    /// (same handle), as opposed to merely structurally equal.
    ///
    /// Returns `false` for primitives, which have no identity.
    pub fn is_same_handle(&self, other: &Value) -> bool {
        use Value::*;
        match (self, other) {
            (Date(a), Date(b)) => Rc::ptr_eq(a, b),
            (ByteArray(a), ByteArray(b)) => Rc::ptr_eq(a, b),
            (DenseArray(a), DenseArray(b)) => Rc::ptr_eq(a, b),
            (AssocArray(a), AssocArray(b)) => Rc::ptr_eq(a, b),
            (Object(a), Object(b)) => Rc::ptr_eq(a, b),
            (VectorInt(a), VectorInt(b)) => Rc::ptr_eq(a, b),
            (VectorUInt(a), VectorUInt(b)) => Rc::ptr_eq(a, b),
            (VectorDouble(a), VectorDouble(b)) => Rc::ptr_eq(a, b),
            (VectorObject(a), VectorObject(b)) => Rc::ptr_eq(a, b),
            (Dictionary(a), Dictionary(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// A stable integer identifying this value's handle, or `None` for
    /// non-complex (non-referencable) values. Used by the encoder's
    /// reference tables.
    pub(crate) fn complex_identity(&self) -> Option<usize> {
        use Value::*;
        match self {
            Date(h) => Some(handle_identity(h)),
            ByteArray(h) => Some(handle_identity(h)),
            DenseArray(h) => Some(handle_identity(h)),
            AssocArray(h) => Some(handle_identity(h)),
            Object(h) => Some(handle_identity(h)),
            VectorInt(h) => Some(handle_identity(h)),
            VectorUInt(h) => Some(handle_identity(h)),
            VectorDouble(h) => Some(handle_identity(h)),
            VectorObject(h) => Some(handle_identity(h)),
            Dictionary(h) => Some(handle_identity(h)),
            _ => None,
        }
    }

    /// Convenience constructor for a dense array from owned elements.
    pub fn dense_array(entries: Vec<Value>) -> Value {
        Value::DenseArray(handle(entries))
    }

    /// Convenience constructor for an associative array.
    pub fn assoc_array(entries: Vec<Pair<String, Value>>) -> Value {
        Value::AssocArray(handle(entries))
    }

    /// Convenience constructor for an anonymous dynamic object.
    pub fn object(dynamic_fields: Vec<Pair<String, Value>>) -> Value {
        Value::Object(handle(ObjectData {
            class_name: None,
            dynamic: true,
            externalizable: false,
            static_fields: Vec::new(),
            dynamic_fields,
            trait_identity: handle(()),
        }))
    }

    /// Convenience constructor for a byte array.
    pub fn byte_array(bytes: Vec<u8>) -> Value {
        Value::ByteArray(handle(bytes))
    }

    /// Convenience constructor for a date, given milliseconds since epoch.
    pub fn date(millis: f64) -> Value {
        Value::Date(handle(millis))
    }
}

pub use crate::error::EncodeError;

/// Excludes fields whose name begins with `__`, preserving relative order.
///
/// Applied unconditionally to every object/associative-array field list on
/// both encode and decode-adjacent construction helpers; a host-supplied
/// [`FieldFilter`] narrows the set further but can never re-admit a
/// `__`-prefixed field.
pub(crate) fn exclude_dunder_fields<T>(fields: Vec<Pair<String, T>>) -> Vec<Pair<String, T>> {
    fields.into_iter().filter(|p| !p.key.starts_with("__")).collect()
}

/// A host-supplied hook selecting which fields of an object participate in
/// serialization, beyond the unconditional `__`-prefix exclusion.
pub type FieldFilter<'a> = dyn Fn(&str) -> bool + 'a;
