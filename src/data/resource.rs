use sval_derive::Value;

use super::{AnyValue, KeyValue};

const RESOURCE_ATTRIBUTES_LABEL: sval::Label =
    sval::Label::new("attributes").with_tag(&sval::tags::VALUE_IDENT);
const RESOURCE_DROPPED_ATTRIBUTES_COUNT_LABEL: sval::Label =
    sval::Label::new("droppedAttributesCount").with_tag(&sval::tags::VALUE_IDENT);

const RESOURCE_ATTRIBUTES_INDEX: sval::Index = sval::Index::new(1);
const RESOURCE_DROPPED_ATTRIBUTES_COUNT_INDEX: sval::Index = sval::Index::new(2);

/**
The translated resource sent with every request.
*/
#[derive(Value, Debug, Clone, Default)]
pub struct Resource {
    #[sval(label = RESOURCE_ATTRIBUTES_LABEL, index = RESOURCE_ATTRIBUTES_INDEX)]
    pub attributes: Vec<KeyValue<String, AnyValue>>,
    #[sval(
        label = RESOURCE_DROPPED_ATTRIBUTES_COUNT_LABEL,
        index = RESOURCE_DROPPED_ATTRIBUTES_COUNT_INDEX
    )]
    pub dropped_attributes_count: u32,
}

impl Resource {
    /**
    Get the value of the attribute with the given key.
    */
    pub fn get(&self, key: &str) -> Option<&AnyValue> {
        self.attributes
            .iter()
            .find(|kv| kv.key == key)
            .map(|kv| &kv.value)
    }
}
