//! The AMF3 encoder: wire-type dispatch, reference-table management, and
//! externalizable dispatch.
use super::registry::{self, ExternalizableSink};
use super::writer::ByteWriter;
use super::{marker, ObjectData};
use crate::error::EncodeError;
use crate::Value;
use log::{trace, warn};
use std::collections::HashMap;
use std::io;

/// Writes AMF3-encoded values to an underlying `io::Write`.
///
/// An `Encoder` may be reused across independent messages: [`Encoder::clear`]
/// resets the writer and all three reference tables.
pub struct Encoder<W> {
    writer: ByteWriter<W>,
    string_refs: HashMap<String, u32>,
    object_refs: HashMap<usize, u32>,
    trait_refs: HashMap<usize, u32>,
}

impl<W> Encoder<W>
where
    W: io::Write,
{
    /// Wraps `writer` for encoding.
    pub fn new(writer: W) -> Self {
        Encoder {
            writer: ByteWriter::new(writer),
            string_refs: HashMap::new(),
            object_refs: HashMap::new(),
            trait_refs: HashMap::new(),
        }
    }

    /// Unwraps the encoder, returning the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }

    /// Appends the tagged wire representation of `value`.
    pub fn encode(&mut self, value: &Value) -> Result<(), EncodeError> {
        match value {
            Value::Undefined => self.writer.u8(marker::UNDEFINED),
            Value::Null => self.writer.u8(marker::NULL),
            Value::Bool(false) => self.writer.u8(marker::FALSE),
            Value::Bool(true) => self.writer.u8(marker::TRUE),
            Value::Integer(n) => {
                self.writer.u8(marker::INTEGER)?;
                self.writer.integer(*n)
            }
            Value::Double(n) => {
                self.writer.u8(marker::DOUBLE)?;
                self.writer.f64_be(*n)
            }
            Value::String(s) => self.encode_string(s),
            Value::Date(h) => self.encode_referencable(value, marker::DATE, |this| {
                this.writer.f64_be(*h.borrow())
            }),
            Value::ByteArray(h) => self.encode_referencable(value, marker::BYTE_ARRAY, |this| {
                let bytes = h.borrow();
                this.writer.size(bytes.len())?;
                this.writer.bytes(&bytes)
            }),
            Value::DenseArray(h) => self.encode_referencable(value, marker::ARRAY, |this| {
                let entries = h.borrow();
                this.writer.size(entries.len())?;
                this.writer.inline_utf8("")?;
                for entry in entries.iter() {
                    this.encode(entry)?;
                }
                Ok(())
            }),
            Value::AssocArray(h) => self.encode_referencable(value, marker::ARRAY, |this| {
                this.writer.size(0)?;
                let pairs = h.borrow();
                for pair in pairs.iter() {
                    if pair.key.starts_with("__") {
                        continue;
                    }
                    this.encode_string_body(&pair.key)?;
                    this.encode(&pair.value)?;
                }
                this.writer.inline_utf8("")
            }),
            Value::Object(_) => self.encode_object(value),
            Value::VectorInt(h) => self.encode_referencable(value, marker::VECTOR_INT, |this| {
                let data = h.borrow();
                this.writer.size(data.entries.len())?;
                this.writer.u8(data.fixed as u8)?;
                for &n in &data.entries {
                    this.writer.i32_be(n)?;
                }
                Ok(())
            }),
            Value::VectorUInt(h) => self.encode_referencable(value, marker::VECTOR_UINT, |this| {
                let data = h.borrow();
                this.writer.size(data.entries.len())?;
                this.writer.u8(data.fixed as u8)?;
                for &n in &data.entries {
                    this.writer.u32_be(n)?;
                }
                Ok(())
            }),
            Value::VectorDouble(h) => {
                self.encode_referencable(value, marker::VECTOR_DOUBLE, |this| {
                    let data = h.borrow();
                    this.writer.size(data.entries.len())?;
                    this.writer.u8(data.fixed as u8)?;
                    for &n in &data.entries {
                        this.writer.f64_be(n)?;
                    }
                    Ok(())
                })
            }
            Value::VectorObject(h) => {
                self.encode_referencable(value, marker::VECTOR_OBJECT, |this| {
                    let data = h.borrow();
                    this.writer.size(data.entries.len())?;
                    this.writer.u8(data.fixed as u8)?;
                    this.encode_string_body(data.class_name.as_deref().unwrap_or("*"))?;
                    for entry in &data.entries {
                        this.encode(entry)?;
                    }
                    Ok(())
                })
            }
            Value::Dictionary(h) => self.encode_referencable(value, marker::DICTIONARY, |this| {
                let data = h.borrow();
                this.writer.size(data.entries.len())?;
                this.writer.u8(data.weak_keys as u8)?;
                for (key, val) in &data.entries {
                    this.encode(key)?;
                    this.encode(val)?;
                }
                Ok(())
            }),
        }
    }

    fn encode_string(&mut self, s: &str) -> Result<(), EncodeError> {
        self.writer.u8(marker::STRING)?;
        self.encode_string_body(s)
    }

    fn encode_string_body(&mut self, s: &str) -> Result<(), EncodeError> {
        if s.is_empty() {
            return self.writer.inline_utf8("");
        }
        if let Some(&index) = self.string_refs.get(s) {
            trace!("string reference hit at {}", index);
            return self.writer.reference(index as usize);
        }
        let index = self.string_refs.len() as u32;
        self.string_refs.insert(s.to_string(), index);
        self.writer.inline_utf8(s)
    }

    /// Handles the reference-table lookup/registration shared by every
    /// complex (handle-backed) wire type, then delegates to `write_body` for
    /// the type-specific payload.
    fn encode_referencable<F>(
        &mut self,
        value: &Value,
        tag: u8,
        write_body: F,
    ) -> Result<(), EncodeError>
    where
        F: FnOnce(&mut Self) -> Result<(), EncodeError>,
    {
        self.writer.u8(tag)?;
        let identity = value
            .complex_identity()
            .expect("encode_referencable called with a non-complex value");
        if let Some(&index) = self.object_refs.get(&identity) {
            trace!("object reference hit at {}", index);
            return self.writer.reference(index as usize);
        }
        let index = self.object_refs.len() as u32;
        self.object_refs.insert(identity, index);
        write_body(self)
    }

    fn encode_object(&mut self, value: &Value) -> Result<(), EncodeError> {
        let Value::Object(h) = value else {
            unreachable!("encode_object called with a non-object value")
        };
        self.writer.u8(marker::OBJECT)?;
        let identity = value.complex_identity().expect("object always has identity");
        if let Some(&index) = self.object_refs.get(&identity) {
            trace!("object reference hit at {}", index);
            return self.writer.reference(index as usize);
        }
        let index = self.object_refs.len() as u32;
        self.object_refs.insert(identity, index);

        let data = h.borrow();
        let is_new_trait = self.encode_trait_header(&data)?;
        if is_new_trait {
            self.encode_string_body(data.class_name.as_deref().unwrap_or(""))?;
            for name in data.static_fields.iter().map(|p| &p.key) {
                self.encode_string_body(name)?;
            }
        }

        if data.externalizable {
            let class_name = data.class_name.clone().unwrap_or_default();
            drop(data);
            return self.encode_externalizable_body(&class_name, value);
        }

        for pair in data.static_fields.iter() {
            self.encode(&pair.value)?;
        }
        if data.dynamic {
            for pair in data.dynamic_fields.iter() {
                if pair.key.starts_with("__") {
                    continue;
                }
                self.encode_string_body(&pair.key)?;
                self.encode(&pair.value)?;
            }
            self.writer.inline_utf8("")?;
        }
        Ok(())
    }

    /// Emits the full object-header U29 (object-is-new bit folded in),
    /// reusing the inline trait reference slot when this object's
    /// `trait_identity` handle was seen before. Returns whether the trait
    /// was freshly defined (`true`) rather than referenced (`false`): the
    /// caller must skip re-emitting the class name and static field names
    /// for a referenced trait, since only the first encounter carries them.
    ///
    /// Layout (LSB first): bit0 = object-is-new (always 1 here, the
    /// reference case is handled by the caller before this is reached);
    /// bit1 = trait-is-inline; for an inline trait, bit2 = externalizable,
    /// bit3 = dynamic, bits4+ = static field count; for a trait reference,
    /// bits2+ = the trait's index.
    fn encode_trait_header(&mut self, data: &ObjectData) -> Result<bool, EncodeError> {
        let trait_key = super::handle_identity(&data.trait_identity);
        if let Some(&index) = self.trait_refs.get(&trait_key) {
            trace!("trait reference hit at {}", index);
            self.writer.u29(((index << 2) | 0b01) & 0x1FFF_FFFF)?;
            return Ok(false);
        }
        let index = self.trait_refs.len() as u32;
        self.trait_refs.insert(trait_key, index);

        let field_count = data.static_fields.len() as u32;
        let header = (field_count << 4)
            | ((data.dynamic as u32) << 3)
            | ((data.externalizable as u32) << 2)
            | 0b011;
        self.writer.u29(header)?;
        Ok(true)
    }

    /// Delegates an externalizable object's body to the built-in
    /// `ArrayCollection` shortcut, or a registered class writer.
    fn encode_externalizable_body(&mut self, class_name: &str, value: &Value) -> Result<(), EncodeError> {
        if class_name == super::ARRAY_COLLECTION_CLASS {
            let Value::Object(h) = value else {
                unreachable!("encode_externalizable_body called with a non-object value")
            };
            let source = h
                .borrow()
                .dynamic_fields
                .iter()
                .find(|p| p.key == "source")
                .map(|p| p.value.clone())
                .unwrap_or(Value::Undefined);
            return self.encode(&source);
        }
        let writer = registry::lookup_writer(class_name).ok_or_else(|| {
            warn!("no externalizable writer registered for {:?}", class_name);
            EncodeError::UnregisteredExternalizable {
                class_name: class_name.to_string(),
            }
        })?;
        writer(self, value)
    }
}

impl<W> ExternalizableSink for Encoder<W>
where
    W: io::Write,
{
    fn encode_value(&mut self, value: &Value) -> Result<(), EncodeError> {
        Encoder::encode(self, value)
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), EncodeError> {
        self.writer.bytes(bytes)
    }

    fn write_u8(&mut self, b: u8) -> Result<(), EncodeError> {
        self.writer.u8(b)
    }
}

impl Encoder<Vec<u8>> {
    /// Materializes the accumulated bytes.
    pub fn buffer(&self) -> &[u8] {
        self.writer.buffer()
    }

    /// Resets the writer and all reference tables, so the encoder can be
    /// reused for an unrelated message.
    pub fn clear(&mut self) {
        self.writer.reset();
        self.string_refs.clear();
        self.object_refs.clear();
        self.trait_refs.clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Pair;

    fn encode(value: &Value) -> Vec<u8> {
        let mut e = Encoder::new(Vec::new());
        e.encode(value).unwrap();
        e.into_inner()
    }

    #[test]
    fn encodes_small_integer() {
        assert_eq!(encode(&Value::Integer(5)), vec![0x04, 0x05]);
    }

    #[test]
    fn encodes_double() {
        assert_eq!(
            encode(&Value::Double(1.5)),
            vec![0x05, 0x3F, 0xF8, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn encodes_empty_string_without_reference() {
        assert_eq!(encode(&Value::String(String::new())), vec![0x06, 0x01]);
    }

    #[test]
    fn shares_repeated_string_by_value() {
        let array = Value::dense_array(vec![
            Value::String("foo".to_string()),
            Value::String("foo".to_string()),
            Value::String("foo".to_string()),
        ]);
        let bytes = encode(&array);
        // one inline "foo" (0x06 0x07 'f' 'o' 'o'), then two 1-byte refs (0x06 0x00)
        let inline_count = bytes.windows(5).filter(|w| w == b"\x06\x07foo").count();
        assert_eq!(inline_count, 1);
    }

    #[test]
    fn shares_repeated_object_by_handle() {
        let o = Value::object(vec![]);
        let array = Value::dense_array(vec![o.clone(), o]);
        let bytes = encode(&array);
        // array tag, size(2)+def, empty assoc terminator, then one inline
        // object def, then a 1-byte object reference.
        assert_eq!(bytes[0], marker::ARRAY);
    }

    #[test]
    fn anonymous_object_round_trips_fields() {
        let o = Value::object(vec![Pair::new("x".to_string(), Value::Integer(1))]);
        let bytes = encode(&o);
        assert_eq!(bytes, vec![0x0A, 0x0B, 0x01, 0x03, b'x', 0x04, 0x01, 0x01]);
    }

    #[test]
    fn shares_trait_by_handle_identity_not_structure() {
        // Two objects from the decoder's same trait-ref slot share one
        // `trait_identity` token and re-encode to one inline trait def plus
        // one trait reference.
        let bytes_in = [
            0x09, 0x05, 0x01, // array, dense size 2, no assoc pairs
            0x0A, 0x0B, 0x01, 0x03, b'x', 0x04, 0x01, 0x01, // inline trait, object {x:1}
            0x0A, 0x01, 0x03, b'y', 0x04, 0x02, 0x01, // trait ref (index 0), object {y:2}
        ];
        let decoded = crate::amf3::Decoder::new(std::io::Cursor::new(bytes_in.to_vec()))
            .decode()
            .unwrap();
        let bytes_out = encode(&decoded);

        // exactly one inline trait header (0x0B) survives re-encoding; the
        // second object's header instead re-emits as a trait reference.
        let inline_trait_headers = bytes_out.iter().filter(|&&b| b == 0x0B).count();
        assert_eq!(inline_trait_headers, 1);

        // two independently host-constructed objects with an identical
        // surface instead each get their own inline trait definition, since
        // each carries a freshly allocated `trait_identity`.
        let built = Value::dense_array(vec![Value::object(vec![]), Value::object(vec![])]);
        let built_bytes = encode(&built);
        // anonymous dynamic object, 0 static fields: inline trait header
        // value is (0<<4)|(1<<3)|(0<<2)|0b011 = 0x0B, once per object.
        let built_inline_headers = built_bytes.iter().filter(|&&b| b == 0x0B).count();
        assert_eq!(built_inline_headers, 2);
    }

    #[test]
    fn externalizable_round_trips_through_registered_writer() {
        registry::register_writer(
            "encode::test::Marker",
            Box::new(|sink, value| {
                let Value::Object(h) = value else {
                    unreachable!()
                };
                let fields = h.borrow().dynamic_fields.clone();
                for pair in &fields {
                    sink.encode_value(&pair.value)?;
                }
                Ok(())
            }),
        );

        let slot = super::handle(ObjectData {
            class_name: Some("encode::test::Marker".to_string()),
            dynamic: false,
            externalizable: true,
            static_fields: Vec::new(),
            dynamic_fields: vec![Pair::new("value".to_string(), Value::Integer(7))],
            trait_identity: super::handle(()),
        });
        let bytes = encode(&Value::Object(slot));

        // object tag, inline externalizable trait (0 fields), class name, one
        // integer body with no generic dynamic-field terminator.
        let expected_header = [0x0A, 0x07];
        assert_eq!(&bytes[..2], &expected_header);
        assert_eq!(bytes.last(), Some(&0x07));
    }

    #[test]
    fn externalizable_without_registered_writer_fails() {
        let slot = super::handle(ObjectData {
            class_name: Some("encode::test::NeverRegistered".to_string()),
            dynamic: false,
            externalizable: true,
            static_fields: Vec::new(),
            dynamic_fields: Vec::new(),
            trait_identity: super::handle(()),
        });
        let mut e = Encoder::new(Vec::new());
        let err = e.encode(&Value::Object(slot)).unwrap_err();
        assert!(matches!(err, EncodeError::UnregisteredExternalizable { .. }));
    }
}
