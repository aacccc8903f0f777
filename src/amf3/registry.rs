//! The process-wide externalizable-class registry.
//!
//! An externalizable object's body is opaque to the generic trait
//! protocol: only host code registered under the object's class name knows
//! how to read or write it. Registration is global because the class name
//! is a property of the host's class graph, not of any single decode or
//! encode call, and idempotent (registering the same name twice replaces
//! the previous reader/writer) so a long-running process can re-register
//! during a hot reload without restarting. Reader and writer registries
//! are independent: a class may be decoded without ever being re-encoded.
use crate::error::{DecodeResult, EncodeResult};
use crate::Value;
use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

/// The interface an externalizable reader uses to pull bytes and nested
/// values out of the in-flight decode. Implemented by [`super::Decoder`].
pub trait ExternalizableSource {
    /// Decodes one nested AMF3 value, participating in the same reference
    /// tables as the enclosing decode.
    fn decode_value(&mut self) -> DecodeResult<Value>;

    /// Reads `n` raw bytes from the underlying stream.
    fn read_bytes(&mut self, n: usize) -> DecodeResult<Vec<u8>>;

    /// Reads a single raw byte from the underlying stream.
    fn read_u8(&mut self) -> DecodeResult<u8>;
}

/// The interface an externalizable writer uses to push bytes and nested
/// values into the in-flight encode. Implemented by [`super::Encoder`].
pub trait ExternalizableSink {
    /// Encodes one nested AMF3 value, participating in the same reference
    /// tables as the enclosing encode.
    fn encode_value(&mut self, value: &Value) -> EncodeResult<()>;

    /// Writes `bytes` verbatim to the underlying stream.
    fn write_bytes(&mut self, bytes: &[u8]) -> EncodeResult<()>;

    /// Writes a single raw byte to the underlying stream.
    fn write_u8(&mut self, b: u8) -> EncodeResult<()>;
}

/// A host callback that reads an externalizable object's body and produces
/// the value it decodes to.
pub type ExternalizableReader =
    Box<dyn Fn(&mut dyn ExternalizableSource) -> DecodeResult<Value> + Send + Sync>;

/// A host callback that writes an externalizable object's body, given the
/// value that was passed to [`super::Encoder::encode`].
pub type ExternalizableWriter =
    Box<dyn Fn(&mut dyn ExternalizableSink, &Value) -> EncodeResult<()> + Send + Sync>;

fn readers() -> &'static Mutex<HashMap<String, Arc<ExternalizableReader>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, Arc<ExternalizableReader>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

fn writers() -> &'static Mutex<HashMap<String, Arc<ExternalizableWriter>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, Arc<ExternalizableWriter>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Registers `reader` as the externalizable decode handler for
/// `class_name`, replacing any previously registered reader for that name.
pub fn register(class_name: impl Into<String>, reader: ExternalizableReader) {
    let class_name = class_name.into();
    debug!("registering externalizable reader for class {:?}", class_name);
    readers()
        .lock()
        .expect("externalizable registry mutex poisoned")
        .insert(class_name, Arc::new(reader));
}

/// Registers `writer` as the externalizable encode handler for
/// `class_name`, replacing any previously registered writer for that name.
pub fn register_writer(class_name: impl Into<String>, writer: ExternalizableWriter) {
    let class_name = class_name.into();
    debug!("registering externalizable writer for class {:?}", class_name);
    writers()
        .lock()
        .expect("externalizable registry mutex poisoned")
        .insert(class_name, Arc::new(writer));
}

/// Looks up the reader registered for `class_name`, if any.
pub(crate) fn lookup(class_name: &str) -> Option<Arc<ExternalizableReader>> {
    readers()
        .lock()
        .expect("externalizable registry mutex poisoned")
        .get(class_name)
        .cloned()
}

/// Looks up the writer registered for `class_name`, if any.
pub(crate) fn lookup_writer(class_name: &str) -> Option<Arc<ExternalizableWriter>> {
    writers()
        .lock()
        .expect("externalizable registry mutex poisoned")
        .get(class_name)
        .cloned()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Value;

    #[test]
    fn register_then_lookup_round_trips() {
        register(
            "registry::test::Marker",
            Box::new(|_src| Ok(Value::Integer(42))),
        );
        let reader = lookup("registry::test::Marker").expect("reader registered");
        struct NoSource;
        impl ExternalizableSource for NoSource {
            fn decode_value(&mut self) -> DecodeResult<Value> {
                unreachable!()
            }
            fn read_bytes(&mut self, _n: usize) -> DecodeResult<Vec<u8>> {
                unreachable!()
            }
            fn read_u8(&mut self) -> DecodeResult<u8> {
                unreachable!()
            }
        }
        let mut src = NoSource;
        match reader(&mut src).unwrap() {
            Value::Integer(42) => {}
            other => panic!("unexpected value: {:?}", other),
        }
    }

    #[test]
    fn lookup_of_unregistered_class_is_none() {
        assert!(lookup("registry::test::NeverRegistered").is_none());
    }

    #[test]
    fn register_writer_then_lookup_round_trips() {
        register_writer(
            "registry::test::WriterMarker",
            Box::new(|sink, value| sink.encode_value(value)),
        );
        let writer = lookup_writer("registry::test::WriterMarker").expect("writer registered");
        struct NoSink(Vec<u8>);
        impl ExternalizableSink for NoSink {
            fn encode_value(&mut self, _value: &Value) -> EncodeResult<()> {
                self.0.push(1);
                Ok(())
            }
            fn write_bytes(&mut self, _bytes: &[u8]) -> EncodeResult<()> {
                unreachable!()
            }
            fn write_u8(&mut self, _b: u8) -> EncodeResult<()> {
                unreachable!()
            }
        }
        let mut sink = NoSink(Vec::new());
        writer(&mut sink, &Value::Integer(1)).unwrap();
        assert_eq!(sink.0, vec![1]);
    }

    #[test]
    fn lookup_of_unregistered_writer_is_none() {
        assert!(lookup_writer("registry::test::NeverRegisteredWriter").is_none());
    }
}
