use sval_derive::Value;

const ANY_VALUE_STRING_LABEL: sval::Label =
    sval::Label::new("stringValue").with_tag(&sval::tags::VALUE_IDENT);
const ANY_VALUE_BOOL_LABEL: sval::Label =
    sval::Label::new("boolValue").with_tag(&sval::tags::VALUE_IDENT);
const ANY_VALUE_INT_LABEL: sval::Label =
    sval::Label::new("intValue").with_tag(&sval::tags::VALUE_IDENT);
const ANY_VALUE_DOUBLE_LABEL: sval::Label =
    sval::Label::new("doubleValue").with_tag(&sval::tags::VALUE_IDENT);
const ANY_VALUE_ARRAY_LABEL: sval::Label =
    sval::Label::new("arrayValue").with_tag(&sval::tags::VALUE_IDENT);
const ANY_VALUE_KVLIST_LABEL: sval::Label =
    sval::Label::new("kvlistValue").with_tag(&sval::tags::VALUE_IDENT);
const ANY_VALUE_BYTES_LABEL: sval::Label =
    sval::Label::new("bytesValue").with_tag(&sval::tags::VALUE_IDENT);

const ANY_VALUE_STRING_INDEX: sval::Index = sval::Index::new(1);
const ANY_VALUE_BOOL_INDEX: sval::Index = sval::Index::new(2);
const ANY_VALUE_INT_INDEX: sval::Index = sval::Index::new(3);
const ANY_VALUE_DOUBLE_INDEX: sval::Index = sval::Index::new(4);
const ANY_VALUE_ARRAY_INDEX: sval::Index = sval::Index::new(5);
const ANY_VALUE_KVLIST_INDEX: sval::Index = sval::Index::new(6);
const ANY_VALUE_BYTES_INDEX: sval::Index = sval::Index::new(7);

const ARRAY_VALUES_LABEL: sval::Label =
    sval::Label::new("values").with_tag(&sval::tags::VALUE_IDENT);

const ARRAY_VALUES_INDEX: sval::Index = sval::Index::new(1);

const KVLIST_VALUES_LABEL: sval::Label =
    sval::Label::new("values").with_tag(&sval::tags::VALUE_IDENT);

const KVLIST_VALUES_INDEX: sval::Index = sval::Index::new(1);

const KEY_VALUE_KEY_LABEL: sval::Label = sval::Label::new("key").with_tag(&sval::tags::VALUE_IDENT);
const KEY_VALUE_VALUE_LABEL: sval::Label =
    sval::Label::new("value").with_tag(&sval::tags::VALUE_IDENT);

const KEY_VALUE_KEY_INDEX: sval::Index = sval::Index::new(1);
const KEY_VALUE_VALUE_INDEX: sval::Index = sval::Index::new(2);

#[derive(Value, Debug, Clone, PartialEq)]
pub struct KeyValue<K, V> {
    #[sval(label = KEY_VALUE_KEY_LABEL, index = KEY_VALUE_KEY_INDEX)]
    pub key: K,
    #[sval(label = KEY_VALUE_VALUE_LABEL, index = KEY_VALUE_VALUE_INDEX)]
    pub value: V,
}

/**
A value in the OTLP attribute model.

The value is buffered in its wire shape, so it can be streamed into any number of requests.
*/
#[derive(Debug, Clone)]
pub struct AnyValue(sval_buffer::Value<'static>);

impl AnyValue {
    /**
    Convert an [`emit::Value`] into the OTLP value model.

    Returns `None` if the value can't be represented, such as when it's null or is a map with non-string keys.
    */
    pub fn from_value(value: &emit::Value) -> Option<AnyValue> {
        sval_buffer::stream_to_value_owned(EmitValue(value.by_ref()))
            .ok()
            .map(|buf| AnyValue(buf.into_value()))
    }

    /**
    Get the value as text, if it's a `stringValue`.
    */
    pub fn to_text(&self) -> Option<String> {
        struct Extract(Option<String>);

        impl<'sval> sval::Stream<'sval> for Extract {
            fn null(&mut self) -> sval::Result {
                sval::error()
            }

            fn bool(&mut self, _: bool) -> sval::Result {
                sval::error()
            }

            fn text_begin(&mut self, num_bytes: Option<usize>) -> sval::Result {
                if self.0.is_some() {
                    return sval::error();
                }

                self.0 = Some(String::with_capacity(num_bytes.unwrap_or(0)));

                Ok(())
            }

            fn text_fragment_computed(&mut self, fragment: &str) -> sval::Result {
                match self.0 {
                    Some(ref mut text) => {
                        text.push_str(fragment);

                        Ok(())
                    }
                    None => sval::error(),
                }
            }

            fn text_end(&mut self) -> sval::Result {
                Ok(())
            }

            fn i64(&mut self, _: i64) -> sval::Result {
                sval::error()
            }

            fn f64(&mut self, _: f64) -> sval::Result {
                sval::error()
            }

            fn seq_begin(&mut self, _: Option<usize>) -> sval::Result {
                sval::error()
            }

            fn seq_value_begin(&mut self) -> sval::Result {
                sval::error()
            }

            fn seq_value_end(&mut self) -> sval::Result {
                sval::error()
            }

            fn seq_end(&mut self) -> sval::Result {
                sval::error()
            }
        }

        let mut extract = Extract(None);
        sval::Value::stream(&self.0, &mut extract).ok()?;

        extract.0
    }
}

impl sval::Value for AnyValue {
    fn stream<'sval, S: sval::Stream<'sval> + ?Sized>(&'sval self, stream: &mut S) -> sval::Result {
        sval::Value::stream(&self.0, stream)
    }
}

/**
Streams an [`emit::Value`] in the shape of an OTLP `AnyValue`.
*/
pub(crate) struct EmitValue<'a>(pub emit::value::Value<'a>);

impl<'a> sval::Value for EmitValue<'a> {
    fn stream<'sval, S: sval::Stream<'sval> + ?Sized>(&'sval self, stream: &mut S) -> sval::Result {
        use sval_ref::ValueRef as _;

        self.stream_ref(stream)
    }
}

impl<'a> sval_ref::ValueRef<'a> for EmitValue<'a> {
    fn stream_ref<S: sval::Stream<'a> + ?Sized>(&self, stream: &mut S) -> sval::Result {
        struct AnyStream<S> {
            stream: S,
            in_map_key: bool,
        }

        impl<'sval, S: sval::Stream<'sval>> AnyStream<S> {
            fn any_value_begin(
                &mut self,
                label: &sval::Label,
                index: &sval::Index,
            ) -> sval::Result {
                // OTLP only supports string keys
                if self.in_map_key {
                    return sval::error();
                }

                self.stream.enum_begin(None, None, None)?;
                self.stream.tagged_begin(None, Some(label), Some(index))
            }

            fn any_value_end(&mut self, label: &sval::Label, index: &sval::Index) -> sval::Result {
                self.stream.tagged_end(None, Some(label), Some(index))?;
                self.stream.enum_end(None, None, None)
            }
        }

        impl<'sval, S: sval::Stream<'sval>> sval::Stream<'sval> for AnyStream<S> {
            fn null(&mut self) -> sval::Result {
                sval::error()
            }

            fn bool(&mut self, value: bool) -> sval::Result {
                self.any_value_begin(&ANY_VALUE_BOOL_LABEL, &ANY_VALUE_BOOL_INDEX)?;
                self.stream.bool(value)?;
                self.any_value_end(&ANY_VALUE_BOOL_LABEL, &ANY_VALUE_BOOL_INDEX)
            }

            fn text_begin(&mut self, num_bytes: Option<usize>) -> sval::Result {
                if !self.in_map_key {
                    self.any_value_begin(&ANY_VALUE_STRING_LABEL, &ANY_VALUE_STRING_INDEX)?;
                }

                self.stream.text_begin(num_bytes)
            }

            fn text_fragment(&mut self, fragment: &'sval str) -> sval::Result {
                self.stream.text_fragment(fragment)
            }

            fn text_fragment_computed(&mut self, fragment: &str) -> sval::Result {
                self.stream.text_fragment_computed(fragment)
            }

            fn text_end(&mut self) -> sval::Result {
                self.stream.text_end()?;

                if !self.in_map_key {
                    self.any_value_end(&ANY_VALUE_STRING_LABEL, &ANY_VALUE_STRING_INDEX)?;
                }

                Ok(())
            }

            fn u64(&mut self, value: u64) -> sval::Result {
                match i64::try_from(value) {
                    Ok(value) => sval::Stream::i64(self, value),
                    Err(_) => sval::error(),
                }
            }

            fn u128(&mut self, value: u128) -> sval::Result {
                match i64::try_from(value) {
                    Ok(value) => sval::Stream::i64(self, value),
                    Err(_) => sval::error(),
                }
            }

            fn i128(&mut self, value: i128) -> sval::Result {
                match i64::try_from(value) {
                    Ok(value) => sval::Stream::i64(self, value),
                    Err(_) => sval::error(),
                }
            }

            fn i64(&mut self, value: i64) -> sval::Result {
                self.any_value_begin(&ANY_VALUE_INT_LABEL, &ANY_VALUE_INT_INDEX)?;
                self.stream.i64(value)?;
                self.any_value_end(&ANY_VALUE_INT_LABEL, &ANY_VALUE_INT_INDEX)
            }

            fn f64(&mut self, value: f64) -> sval::Result {
                self.any_value_begin(&ANY_VALUE_DOUBLE_LABEL, &ANY_VALUE_DOUBLE_INDEX)?;
                self.stream.f64(value)?;
                self.any_value_end(&ANY_VALUE_DOUBLE_LABEL, &ANY_VALUE_DOUBLE_INDEX)
            }

            fn binary_begin(&mut self, num_bytes: Option<usize>) -> sval::Result {
                self.any_value_begin(&ANY_VALUE_BYTES_LABEL, &ANY_VALUE_BYTES_INDEX)?;
                self.stream.binary_begin(num_bytes)
            }

            fn binary_fragment(&mut self, fragment: &'sval [u8]) -> sval::Result {
                self.stream.binary_fragment(fragment)
            }

            fn binary_fragment_computed(&mut self, fragment: &[u8]) -> sval::Result {
                self.stream.binary_fragment_computed(fragment)
            }

            fn binary_end(&mut self) -> sval::Result {
                self.stream.binary_end()?;
                self.any_value_end(&ANY_VALUE_BYTES_LABEL, &ANY_VALUE_BYTES_INDEX)
            }

            fn seq_begin(&mut self, num_entries: Option<usize>) -> sval::Result {
                self.any_value_begin(&ANY_VALUE_ARRAY_LABEL, &ANY_VALUE_ARRAY_INDEX)?;
                self.stream.record_tuple_begin(None, None, None, Some(1))?;
                self.stream.record_tuple_value_begin(
                    None,
                    &ARRAY_VALUES_LABEL,
                    &ARRAY_VALUES_INDEX,
                )?;
                self.stream.seq_begin(num_entries)
            }

            fn seq_value_begin(&mut self) -> sval::Result {
                self.stream.seq_value_begin()
            }

            fn seq_value_end(&mut self) -> sval::Result {
                self.stream.seq_value_end()
            }

            fn seq_end(&mut self) -> sval::Result {
                self.stream.seq_end()?;
                self.stream.record_tuple_value_end(
                    None,
                    &ARRAY_VALUES_LABEL,
                    &ARRAY_VALUES_INDEX,
                )?;
                self.stream.record_tuple_end(None, None, None)?;
                self.any_value_end(&ANY_VALUE_ARRAY_LABEL, &ANY_VALUE_ARRAY_INDEX)
            }

            fn map_begin(&mut self, num_entries: Option<usize>) -> sval::Result {
                self.any_value_begin(&ANY_VALUE_KVLIST_LABEL, &ANY_VALUE_KVLIST_INDEX)?;
                self.stream.record_tuple_begin(None, None, None, Some(1))?;
                self.stream.record_tuple_value_begin(
                    None,
                    &KVLIST_VALUES_LABEL,
                    &KVLIST_VALUES_INDEX,
                )?;
                self.stream.seq_begin(num_entries)
            }

            fn map_key_begin(&mut self) -> sval::Result {
                self.in_map_key = true;

                self.stream.seq_value_begin()?;
                self.stream.record_tuple_begin(None, None, None, Some(2))?;
                self.stream.record_tuple_value_begin(
                    None,
                    &KEY_VALUE_KEY_LABEL,
                    &KEY_VALUE_KEY_INDEX,
                )
            }

            fn map_key_end(&mut self) -> sval::Result {
                self.in_map_key = false;

                self.stream
                    .record_tuple_value_end(None, &KEY_VALUE_KEY_LABEL, &KEY_VALUE_KEY_INDEX)
            }

            fn map_value_begin(&mut self) -> sval::Result {
                self.stream.record_tuple_value_begin(
                    None,
                    &KEY_VALUE_VALUE_LABEL,
                    &KEY_VALUE_VALUE_INDEX,
                )
            }

            fn map_value_end(&mut self) -> sval::Result {
                self.stream.record_tuple_value_end(
                    None,
                    &KEY_VALUE_VALUE_LABEL,
                    &KEY_VALUE_VALUE_INDEX,
                )?;
                self.stream.record_tuple_end(None, None, None)?;
                self.stream.seq_value_end()
            }

            fn map_end(&mut self) -> sval::Result {
                self.stream.seq_end()?;
                self.stream.record_tuple_value_end(
                    None,
                    &KVLIST_VALUES_LABEL,
                    &KVLIST_VALUES_INDEX,
                )?;
                self.stream.record_tuple_end(None, None, None)?;
                self.any_value_end(&ANY_VALUE_KVLIST_LABEL, &ANY_VALUE_KVLIST_INDEX)
            }
        }

        sval_ref::stream_ref(
            &mut AnyStream {
                stream,
                in_map_key: false,
            },
            &self.0,
        )
    }
}

#[cfg(test)]
pub(crate) fn to_proto(value: &AnyValue) -> crate::data::proto::AnyValue {
    use prost::Message as _;

    let payload = crate::data::EncodedPayload::encode(KeyValue { key: "", value });

    crate::data::proto::KeyValue::decode(&*payload.to_vec())
        .unwrap()
        .value
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::data::proto::{self, any_value::Value as Proto};

    fn convert(value: impl emit::value::ToValue) -> Option<proto::AnyValue> {
        AnyValue::from_value(&value.to_value()).map(|value| to_proto(&value))
    }

    fn any(value: Proto) -> proto::AnyValue {
        proto::AnyValue { value: Some(value) }
    }

    #[test]
    fn from_value_primitives() {
        assert_eq!(Some(proto::AnyValue::string("a")), convert("a"));
        assert_eq!(Some(any(Proto::IntValue(7))), convert(7usize));
        assert_eq!(Some(any(Proto::IntValue(-42))), convert(-42i64));
        assert_eq!(Some(any(Proto::DoubleValue(1.5))), convert(1.5f64));
        assert_eq!(Some(any(Proto::BoolValue(true))), convert(true));
    }

    #[test]
    fn from_value_long_text() {
        let text = "a string that's too long to be stored inline";

        let value = AnyValue::from_value(&emit::Value::from(text)).unwrap();

        assert_eq!(Some(text.to_owned()), value.to_text());
        assert_eq!(proto::AnyValue::string(text), to_proto(&value));
    }

    #[test]
    fn from_value_unrepresentable() {
        assert_eq!(None, convert(u64::MAX));
        assert_eq!(None, convert(i64::MAX as u64 + 1));
        assert_eq!(Some(any(Proto::IntValue(i64::MAX))), convert(i64::MAX as u64));

        assert!(AnyValue::from_value(&emit::Value::null()).is_none());
    }

    #[test]
    fn from_value_nested() {
        let map = [("a", vec![1.0f64, 2.5])];
        let map = sval::MapSlice::new(&map);
        let value = emit::Value::from_sval(&map);

        assert_eq!(
            any(Proto::KvlistValue(proto::KeyValueList {
                values: vec![proto::KeyValue {
                    key: "a".to_owned(),
                    value: Some(any(Proto::ArrayValue(proto::ArrayValue {
                        values: vec![any(Proto::DoubleValue(1.0)), any(Proto::DoubleValue(2.5))],
                    }))),
                }],
            })),
            to_proto(&AnyValue::from_value(&value).unwrap())
        );
    }

    #[test]
    fn from_value_rejects_non_string_keys() {
        let map = [(1i64, "a")];
        let map = sval::MapSlice::new(&map);
        let value = emit::Value::from_sval(&map);

        assert!(AnyValue::from_value(&value).is_none());
    }

    #[test]
    fn from_value_rejects_nested_nulls() {
        let values = vec![Some(1i64), None];
        let value = emit::Value::from_sval(&values);

        assert!(AnyValue::from_value(&value).is_none());
    }

    #[test]
    fn to_text_only_for_strings() {
        assert_eq!(
            Some("a".to_owned()),
            AnyValue::from_value(&emit::Value::from("a")).unwrap().to_text()
        );
        assert_eq!(
            None,
            AnyValue::from_value(&emit::Value::from(1i64)).unwrap().to_text()
        );
    }
}
