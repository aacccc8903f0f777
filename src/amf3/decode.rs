//! The AMF3 decoder: wire-type dispatch, reference-table management, the
//! trait protocol, and externalizable dispatch.
use super::reader::ByteReader;
use super::registry::{self, ExternalizableSource};
use super::{handle, marker, Handle};
use super::{DictionaryData, ObjectData, ObjectVectorData, Trait, VectorData};
use crate::error::{DecodeError, DecodeResult};
use crate::{Pair, Value};
use log::{trace, warn};
use std::io;
use std::rc::Rc;

/// Wraps a reader and counts bytes consumed through it, so [`Decoder`] can
/// report [`Decoder::position`] without requiring `R: Seek`.
struct CountingReader<R> {
    inner: R,
    position: u64,
}

impl<R: io::Read> io::Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.position += n as u64;
        Ok(n)
    }
}

/// A single trait reference-table entry: the trait's content, and the
/// identity token every object decoded through this entry will share.
struct TraitEntry {
    def: Trait,
    identity: Handle<()>,
}

/// Reads AMF3-encoded values from an underlying `io::Read`.
///
/// A `Decoder` may be reused across independent messages: [`Decoder::decode`]
/// clears all three reference tables at the start of every call.
pub struct Decoder<R> {
    reader: ByteReader<CountingReader<R>>,
    string_refs: Vec<String>,
    object_refs: Vec<Value>,
    trait_refs: Vec<TraitEntry>,
}

impl<R> Decoder<R>
where
    R: io::Read,
{
    /// Wraps `reader` for decoding.
    pub fn new(reader: R) -> Self {
        Decoder {
            reader: ByteReader::new(CountingReader { inner: reader, position: 0 }),
            string_refs: Vec::new(),
            object_refs: Vec::new(),
            trait_refs: Vec::new(),
        }
    }

    /// The number of bytes consumed from the underlying reader so far.
    pub fn position(&self) -> u64 {
        self.reader.inner_ref().position
    }

    /// Reads and returns one AMF3 value, clearing all reference tables
    /// first.
    pub fn decode(&mut self) -> DecodeResult<Value> {
        self.string_refs.clear();
        self.object_refs.clear();
        self.trait_refs.clear();
        self.decode_value()
    }

    fn decode_value(&mut self) -> DecodeResult<Value> {
        let tag = self.reader.u8()?;
        match tag {
            marker::UNDEFINED => Ok(Value::Undefined),
            marker::NULL => Ok(Value::Null),
            marker::FALSE => Ok(Value::Bool(false)),
            marker::TRUE => Ok(Value::Bool(true)),
            marker::INTEGER => Ok(Value::Integer(self.reader.integer()?)),
            marker::DOUBLE => Ok(Value::Double(self.reader.f64_be()?)),
            marker::STRING => self.decode_string(),
            marker::DATE => self.decode_date(),
            marker::ARRAY => self.decode_array(),
            marker::OBJECT => self.decode_object(),
            marker::BYTE_ARRAY => self.decode_byte_array(),
            marker::VECTOR_INT => self.decode_vector_int(),
            marker::VECTOR_UINT => self.decode_vector_uint(),
            marker::VECTOR_DOUBLE => self.decode_vector_double(),
            marker::VECTOR_OBJECT => self.decode_vector_object(),
            marker::DICTIONARY => self.decode_dictionary(),
            other => Err(DecodeError::UnsupportedType { marker: other }),
        }
    }

    fn decode_string(&mut self) -> DecodeResult<Value> {
        Ok(Value::String(self.read_ref_string()?))
    }

    /// Reads a referencable inline-or-reference string header and body,
    /// registering non-empty strings in `string_refs`.
    fn read_ref_string(&mut self) -> DecodeResult<String> {
        let header = self.reader.amf_header()?;
        if !header.is_def {
            return self.string_refs.get(header.value).cloned().ok_or_else(|| {
                warn!("invalid string reference: index {}", header.value);
                DecodeError::InvalidReference {
                    table: "string",
                    index: header.value,
                }
            });
        }
        if header.value == 0 {
            return Ok(String::new());
        }
        let s = self.reader.utf8(header.value)?;
        trace!("registering string reference {:?}", s);
        self.string_refs.push(s.clone());
        Ok(s)
    }

    fn object_ref_hit(&self, index: usize) -> DecodeResult<Value> {
        self.object_refs.get(index).cloned().ok_or_else(|| {
            warn!("invalid object reference: index {}", index);
            DecodeError::InvalidReference {
                table: "object",
                index,
            }
        })
    }

    fn decode_date(&mut self) -> DecodeResult<Value> {
        let header = self.reader.amf_header()?;
        if !header.is_def {
            return self.object_ref_hit(header.value);
        }
        let slot = handle(0.0);
        let value = Value::Date(slot.clone());
        self.object_refs.push(value.clone());
        let millis = self.reader.f64_be()?;
        *slot.borrow_mut() = millis;
        Ok(value)
    }

    fn decode_byte_array(&mut self) -> DecodeResult<Value> {
        let header = self.reader.amf_header()?;
        if !header.is_def {
            return self.object_ref_hit(header.value);
        }
        let slot = handle(Vec::new());
        let value = Value::ByteArray(slot.clone());
        self.object_refs.push(value.clone());
        let bytes = self.reader.bytes(header.value)?;
        *slot.borrow_mut() = bytes;
        Ok(value)
    }

    /// Array bodies announce a dense length but may instead carry
    /// associative pairs; if any named pairs are present the dense part is
    /// never read, matching the wire behavior this format actually uses.
    fn decode_array(&mut self) -> DecodeResult<Value> {
        let header = self.reader.amf_header()?;
        if !header.is_def {
            return self.object_ref_hit(header.value);
        }
        let dense_slot = handle(Vec::new());
        let placeholder = Value::DenseArray(dense_slot.clone());
        self.object_refs.push(placeholder);
        let slot_index = self.object_refs.len() - 1;

        let mut assoc = Vec::new();
        loop {
            let key = self.read_ref_string()?;
            if key.is_empty() {
                break;
            }
            let value = self.decode_value()?;
            assoc.push(Pair::new(key, value));
        }

        if !assoc.is_empty() {
            let assoc_slot = handle(assoc);
            self.object_refs[slot_index] = Value::AssocArray(assoc_slot.clone());
            return Ok(Value::AssocArray(assoc_slot));
        }

        let mut entries = Vec::with_capacity(header.value);
        for _ in 0..header.value {
            entries.push(self.decode_value()?);
        }
        *dense_slot.borrow_mut() = entries;
        Ok(Value::DenseArray(dense_slot))
    }

    /// Reads or reuses a trait given the trait-header bits carried by an
    /// object's AMF header value.
    fn decode_trait(&mut self, header_value: usize) -> DecodeResult<TraitEntry> {
        if (header_value & 1) == 0 {
            let index = header_value >> 1;
            let entry = self.trait_refs.get(index).ok_or_else(|| {
                warn!("invalid trait reference: index {}", index);
                DecodeError::InvalidReference {
                    table: "trait",
                    index,
                }
            })?;
            trace!("reusing trait reference {}", index);
            return Ok(TraitEntry {
                def: entry.def.clone(),
                identity: entry.identity.clone(),
            });
        }
        let externalizable = (header_value >> 1 & 1) != 0;
        let dynamic = (header_value >> 2 & 1) != 0;
        let field_count = header_value >> 3;
        let class_name = self.read_ref_string()?;
        let mut static_fields = Vec::with_capacity(field_count);
        for _ in 0..field_count {
            static_fields.push(self.read_ref_string()?);
        }
        let def = Trait {
            class_name,
            dynamic,
            externalizable,
            static_fields,
        };
        let identity = handle(());
        self.trait_refs.push(TraitEntry {
            def: def.clone(),
            identity: identity.clone(),
        });
        Ok(TraitEntry { def, identity })
    }

    fn decode_object(&mut self) -> DecodeResult<Value> {
        let header = self.reader.amf_header()?;
        if !header.is_def {
            return self.object_ref_hit(header.value);
        }

        let trait_entry = self.decode_trait(header.value)?;

        let slot = handle(ObjectData {
            class_name: if trait_entry.def.class_name.is_empty() {
                None
            } else {
                Some(trait_entry.def.class_name.clone())
            },
            dynamic: trait_entry.def.dynamic,
            externalizable: trait_entry.def.externalizable,
            static_fields: Vec::new(),
            dynamic_fields: Vec::new(),
            trait_identity: trait_entry.identity,
        });
        let placeholder = Value::Object(slot.clone());
        self.object_refs.push(placeholder.clone());

        if trait_entry.def.externalizable {
            return self.decode_externalizable(&trait_entry.def.class_name, placeholder, slot);
        }

        let mut static_fields = Vec::with_capacity(trait_entry.def.static_fields.len());
        for name in &trait_entry.def.static_fields {
            let value = self.decode_value()?;
            static_fields.push(Pair::new(name.clone(), value));
        }

        let mut dynamic_fields = Vec::new();
        if trait_entry.def.dynamic {
            loop {
                let key = self.read_ref_string()?;
                if key.is_empty() {
                    break;
                }
                let value = self.decode_value()?;
                dynamic_fields.push(Pair::new(key, value));
            }
        }

        {
            let mut data = slot.borrow_mut();
            data.static_fields = static_fields;
            data.dynamic_fields = dynamic_fields;
        }
        Ok(placeholder)
    }

    /// Decodes the body of an externalizable object: the built-in
    /// `ArrayCollection` shortcut, or a registered class reader.
    fn decode_externalizable(
        &mut self,
        class_name: &str,
        placeholder: Value,
        slot: Handle<ObjectData>,
    ) -> DecodeResult<Value> {
        if class_name == super::ARRAY_COLLECTION_CLASS {
            let inner = self.decode_value()?;
            slot.borrow_mut().dynamic_fields = vec![Pair::new("source".to_string(), inner)];
            return Ok(placeholder);
        }
        let reader = registry::lookup(class_name).ok_or_else(|| {
            warn!("no externalizable reader registered for {:?}", class_name);
            DecodeError::UnregisteredExternalizable {
                class_name: class_name.to_string(),
            }
        })?;
        let decoded = reader(self)?;
        if let Value::Object(decoded_slot) = &decoded {
            let fields = decoded_slot.borrow();
            let mut data = slot.borrow_mut();
            data.static_fields = fields.static_fields.clone();
            data.dynamic_fields = fields.dynamic_fields.clone();
        } else {
            slot.borrow_mut().dynamic_fields = vec![Pair::new("value".to_string(), decoded)];
        }
        Ok(placeholder)
    }

    fn decode_vector_int(&mut self) -> DecodeResult<Value> {
        let header = self.reader.amf_header()?;
        if !header.is_def {
            return self.object_ref_hit(header.value);
        }
        let fixed = self.reader.u8()? != 0;
        let slot = handle(VectorData { fixed, entries: Vec::new() });
        let value = Value::VectorInt(slot.clone());
        self.object_refs.push(value.clone());
        let mut entries = Vec::with_capacity(header.value);
        for _ in 0..header.value {
            entries.push(self.reader.i32_be()?);
        }
        slot.borrow_mut().entries = entries;
        Ok(value)
    }

    fn decode_vector_uint(&mut self) -> DecodeResult<Value> {
        let header = self.reader.amf_header()?;
        if !header.is_def {
            return self.object_ref_hit(header.value);
        }
        let fixed = self.reader.u8()? != 0;
        let slot = handle(VectorData { fixed, entries: Vec::new() });
        let value = Value::VectorUInt(slot.clone());
        self.object_refs.push(value.clone());
        let mut entries = Vec::with_capacity(header.value);
        for _ in 0..header.value {
            entries.push(self.reader.u32_be()?);
        }
        slot.borrow_mut().entries = entries;
        Ok(value)
    }

    fn decode_vector_double(&mut self) -> DecodeResult<Value> {
        let header = self.reader.amf_header()?;
        if !header.is_def {
            return self.object_ref_hit(header.value);
        }
        let fixed = self.reader.u8()? != 0;
        let slot = handle(VectorData { fixed, entries: Vec::new() });
        let value = Value::VectorDouble(slot.clone());
        self.object_refs.push(value.clone());
        let mut entries = Vec::with_capacity(header.value);
        for _ in 0..header.value {
            entries.push(self.reader.f64_be()?);
        }
        slot.borrow_mut().entries = entries;
        Ok(value)
    }

    fn decode_vector_object(&mut self) -> DecodeResult<Value> {
        let header = self.reader.amf_header()?;
        if !header.is_def {
            return self.object_ref_hit(header.value);
        }
        let fixed = self.reader.u8()? != 0;
        let class_name = self.read_ref_string()?;
        let slot = handle(ObjectVectorData {
            class_name: if class_name.is_empty() || class_name == "*" {
                None
            } else {
                Some(class_name)
            },
            fixed,
            entries: Vec::new(),
        });
        let value = Value::VectorObject(slot.clone());
        self.object_refs.push(value.clone());
        let mut entries = Vec::with_capacity(header.value);
        for _ in 0..header.value {
            entries.push(self.decode_value()?);
        }
        slot.borrow_mut().entries = entries;
        Ok(value)
    }

    fn decode_dictionary(&mut self) -> DecodeResult<Value> {
        let header = self.reader.amf_header()?;
        if !header.is_def {
            return self.object_ref_hit(header.value);
        }
        let weak_keys = self.reader.u8()? != 0;
        let slot = handle(DictionaryData { weak_keys, entries: Vec::new() });
        let value = Value::Dictionary(slot.clone());
        self.object_refs.push(value.clone());
        let mut entries = Vec::with_capacity(header.value);
        for _ in 0..header.value {
            let key = self.decode_value()?;
            let val = self.decode_value()?;
            entries.push((key, val));
        }
        slot.borrow_mut().entries = entries;
        Ok(value)
    }
}

impl<R> ExternalizableSource for Decoder<R>
where
    R: io::Read,
{
    fn decode_value(&mut self) -> DecodeResult<Value> {
        Decoder::decode_value(self)
    }

    fn read_bytes(&mut self, n: usize) -> DecodeResult<Vec<u8>> {
        self.reader.bytes(n)
    }

    fn read_u8(&mut self) -> DecodeResult<u8> {
        self.reader.u8()
    }
}

impl<R> Decoder<R>
where
    R: io::Read + io::Seek,
{
    /// Seeks the underlying stream to byte offset `n`.
    ///
    /// Does not clear reference tables: this repositions the raw stream, it
    /// is not a new `decode()` call.
    pub fn set_position(&mut self, n: u64) -> DecodeResult<()> {
        let inner = self.reader.inner_mut();
        inner.inner.seek(io::SeekFrom::Start(n))?;
        inner.position = n;
        Ok(())
    }

    /// The number of bytes remaining in the underlying stream.
    pub fn remaining(&mut self) -> DecodeResult<u64> {
        let current = self.reader.inner_ref().position;
        let inner = self.reader.inner_mut();
        let end = inner.inner.seek(io::SeekFrom::End(0))?;
        inner.inner.seek(io::SeekFrom::Start(current))?;
        Ok(end.saturating_sub(current))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    fn decode(bytes: &[u8]) -> Value {
        Decoder::new(Cursor::new(bytes.to_vec())).decode().unwrap()
    }

    #[test]
    fn decodes_small_integer() {
        assert!(matches!(decode(&[0x04, 0x05]), Value::Integer(5)));
    }

    #[test]
    fn decodes_string_reference() {
        let bytes = [0x09, 0x05, 0x01, 0x06, 0x05, b'a', b'b', 0x06, 0x00];
        match decode(&bytes) {
            Value::DenseArray(h) => {
                let entries = h.borrow();
                assert_eq!(entries.len(), 2);
                for v in entries.iter() {
                    assert!(matches!(v, Value::String(s) if s == "ab"));
                }
            }
            other => panic!("expected dense array, got {:?}", other),
        }
    }

    #[test]
    fn decodes_anonymous_dynamic_object() {
        let bytes = [0x0A, 0x0B, 0x01, 0x03, b'x', 0x04, 0x01, 0x01];
        match decode(&bytes) {
            Value::Object(h) => {
                let data = h.borrow();
                assert!(data.class_name.is_none());
                assert!(data.dynamic);
                assert_eq!(data.dynamic_fields.len(), 1);
                assert_eq!(data.dynamic_fields[0].key, "x");
                assert!(matches!(data.dynamic_fields[0].value, Value::Integer(1)));
            }
            other => panic!("expected object, got {:?}", other),
        }
    }

    #[test]
    fn decodes_cyclic_object() {
        // object: inline dynamic trait, 0 static fields, empty class name;
        // one dynamic field "self" pointing back at object reference 0.
        let bytes = [
            0x0A, 0x0B, 0x01, // object tag, inline dynamic trait, empty class name
            0x09, b's', b'e', b'l', b'f', 0x0A, 0x00, // "self" -> object ref 0
            0x01, // terminator
        ];
        match decode(&bytes) {
            Value::Object(h) => {
                let data = h.borrow();
                assert_eq!(data.dynamic_fields.len(), 1);
                match &data.dynamic_fields[0].value {
                    Value::Object(inner) => assert!(Rc::ptr_eq(inner, &h)),
                    other => panic!("expected object, got {:?}", other),
                }
            }
            other => panic!("expected object, got {:?}", other),
        }
    }

    #[test]
    fn rejects_unknown_tag() {
        let mut decoder = Decoder::new(Cursor::new(vec![0xFE]));
        assert!(matches!(
            decoder.decode(),
            Err(DecodeError::UnsupportedType { marker: 0xFE })
        ));
    }

    #[test]
    fn rejects_invalid_object_reference() {
        let mut decoder = Decoder::new(Cursor::new(vec![0x0A, 0x02]));
        assert!(matches!(
            decoder.decode(),
            Err(DecodeError::InvalidReference { table: "object", index: 1 })
        ));
    }

    #[test]
    fn tracks_position() {
        let mut decoder = Decoder::new(Cursor::new(vec![0x04, 0x05, 0x04, 0x06]));
        assert_eq!(decoder.decode().unwrap().complex_identity(), None);
        assert_eq!(decoder.position(), 2);
    }

    #[test]
    fn decodes_dictionary_with_object_keys() {
        // dictionary: size 1, strong keys, one entry whose key is an
        // anonymous object and whose value is an integer.
        let bytes = [
            0x11, 0x03, 0x00, // dictionary tag, size(1), weak_keys=false
            0x0A, 0x0B, 0x01, // key: inline dynamic trait, empty class name
            0x01, // key object: no dynamic fields, terminator
            0x04, 0x2A, // value: Integer(42)
        ];
        match decode(&bytes) {
            Value::Dictionary(h) => {
                let data = h.borrow();
                assert_eq!(data.entries.len(), 1);
                assert!(matches!(data.entries[0].0, Value::Object(_)));
                assert!(matches!(data.entries[0].1, Value::Integer(42)));
            }
            other => panic!("expected dictionary, got {:?}", other),
        }
    }

    #[test]
    fn decodes_through_registered_externalizable_reader() {
        use super::super::registry::{register, ExternalizableSource};

        register(
            "decode::test::Point",
            Box::new(|src| {
                let x = src.decode_value()?;
                let y = src.decode_value()?;
                Ok(Value::object(vec![
                    Pair::new("x".to_string(), x),
                    Pair::new("y".to_string(), y),
                ]))
            }),
        );

        let mut bytes = vec![0x0A, 0x07]; // object tag, inline externalizable trait, 0 fields
        let class_name = "decode::test::Point";
        bytes.push(((class_name.len() << 1) | 1) as u8);
        bytes.extend_from_slice(class_name.as_bytes());
        bytes.extend_from_slice(&[0x04, 0x01]); // Integer(1)
        bytes.extend_from_slice(&[0x04, 0x02]); // Integer(2)

        match decode(&bytes) {
            Value::Object(h) => {
                let data = h.borrow();
                assert!(data.externalizable);
                assert_eq!(data.dynamic_fields.len(), 2);
                assert_eq!(data.dynamic_fields[0].key, "x");
                assert_eq!(data.dynamic_fields[1].key, "y");
            }
            other => panic!("expected object, got {:?}", other),
        }
    }

    #[test]
    fn decodes_array_collection_externalizable_without_registration() {
        let mut bytes = vec![0x0A, 0x07];
        let class_name = super::super::ARRAY_COLLECTION_CLASS;
        bytes.push(((class_name.len() << 1) | 1) as u8);
        bytes.extend_from_slice(class_name.as_bytes());
        bytes.extend_from_slice(&[0x09, 0x01, 0x01]); // empty dense array

        match decode(&bytes) {
            Value::Object(h) => {
                let data = h.borrow();
                assert_eq!(data.dynamic_fields.len(), 1);
                assert_eq!(data.dynamic_fields[0].key, "source");
                assert!(matches!(data.dynamic_fields[0].value, Value::DenseArray(_)));
            }
            other => panic!("expected object, got {:?}", other),
        }
    }
}
