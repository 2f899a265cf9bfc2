/*!
The OTLP wire types and the conversions into them.

Wire types are `sval` values with protobuf field indexes, so they can be streamed directly into a buffer by `sval_protobuf`.
*/

use std::{collections::HashSet, ops::ControlFlow};

use bytes::Buf;
use sval_protobuf::buf::{ProtoBuf, ProtoBufCursor};

pub mod metrics;

mod any_value;
mod instrumentation_scope;
mod resource;

#[cfg(test)]
pub(crate) mod proto;

pub use self::{any_value::*, instrumentation_scope::*, resource::*};

/**
A request that's been encoded into protobuf.
*/
pub(crate) struct EncodedPayload(ProtoBuf);

impl EncodedPayload {
    pub fn encode(value: impl sval::Value) -> Self {
        EncodedPayload(sval_protobuf::stream_to_protobuf(value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn into_cursor(self) -> EncodedCursor {
        EncodedCursor(self.0.into_cursor())
    }

    #[cfg(test)]
    pub fn to_vec(self) -> Vec<u8> {
        let mut cursor = self.into_cursor();
        let mut buf = Vec::with_capacity(cursor.remaining());

        while cursor.has_remaining() {
            let chunk = cursor.chunk();
            let len = chunk.len();

            buf.extend_from_slice(chunk);
            cursor.advance(len);
        }

        buf
    }
}

pub(crate) struct EncodedCursor(ProtoBufCursor);

impl Buf for EncodedCursor {
    fn remaining(&self) -> usize {
        self.0.remaining()
    }

    fn chunk(&self) -> &[u8] {
        self.0.chunk()
    }

    fn advance(&mut self, cnt: usize) {
        self.0.advance(cnt)
    }
}

/**
Collects wire attributes.

The first occurrence of a key wins. Values that can't be represented as an [`AnyValue`] are skipped and counted.
*/
#[derive(Default)]
pub(crate) struct AttributesBuilder {
    attributes: Vec<KeyValue<String, AnyValue>>,
    dropped: u32,
    seen: HashSet<String>,
}

impl AttributesBuilder {
    pub fn push(&mut self, key: &str, value: &emit::Value) {
        if !self.seen.insert(key.to_owned()) {
            return;
        }

        match AnyValue::from_value(value) {
            Some(value) => self.attributes.push(KeyValue {
                key: key.to_owned(),
                value,
            }),
            None => self.dropped += 1,
        }
    }

    pub fn finish(self) -> (Vec<KeyValue<String, AnyValue>>, u32) {
        (self.attributes, self.dropped)
    }
}

/**
Convert a set of properties into wire attributes.
*/
pub(crate) fn attributes_from_props(
    props: &impl emit::Props,
) -> (Vec<KeyValue<String, AnyValue>>, u32) {
    let mut builder = AttributesBuilder::default();

    let _ = props.for_each(|k, v| {
        builder.push(k.get(), &v);

        ControlFlow::Continue(())
    });

    builder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    use super::any_value::to_proto;

    fn double(value: f64) -> proto::AnyValue {
        proto::AnyValue {
            value: Some(proto::any_value::Value::DoubleValue(value)),
        }
    }

    #[test]
    fn attributes_first_key_wins() {
        let props = [("a", 1.5f64), ("b", 2.0), ("a", 3.0)];

        let (attributes, dropped) = attributes_from_props(&props);

        assert_eq!(0, dropped);
        assert_eq!(
            vec![("a", double(1.5)), ("b", double(2.0))],
            attributes
                .iter()
                .map(|kv| (&*kv.key, to_proto(&kv.value)))
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn attributes_builder_mixed() {
        let mut builder = AttributesBuilder::default();

        builder.push("a", &emit::Value::from("1"));
        builder.push("b", &emit::Value::from(2.5f64));
        builder.push("a", &emit::Value::from(3.0f64));
        builder.push("c", &emit::Value::null());

        let (attributes, dropped) = builder.finish();

        assert_eq!(1, dropped);
        assert_eq!(2, attributes.len());
        assert_eq!(Some("1"), attributes[0].value.to_text().as_deref());
        assert_eq!(double(2.5), to_proto(&attributes[1].value));
    }

    #[test]
    fn payload_to_vec() {
        let payload = EncodedPayload::encode(InstrumentationScope {
            name: "a".to_owned(),
            version: "1".to_owned(),
        });

        let len = payload.len();
        let bytes = payload.to_vec();

        assert_eq!(len, bytes.len());
        assert_eq!(vec![0x0a, 0x01, b'a', 0x12, 0x01, b'1'], bytes);
    }
}
