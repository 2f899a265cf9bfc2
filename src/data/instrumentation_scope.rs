use sval_derive::Value;

#[derive(Value, Debug, Clone, PartialEq, Default)]
pub struct InstrumentationScope {
    #[sval(label = "name", index = 1)]
    pub name: String,
    #[sval(label = "version", index = 2)]
    pub version: String,
}
