/*!
Describing the process that emits metrics.

The resource is supplied through a [`ResourceProvider`] and translated into the wire model once per exporter.
*/

use std::{ops::ControlFlow, path::Path};

use crate::data::{AnyValue, AttributesBuilder, KeyValue, Resource};

/**
The well-known attribute identifying the service that emits metrics.
*/
pub const SERVICE_NAME: &str = "service.name";

/**
A source of resource attributes.
*/
pub trait ResourceProvider: Send + Sync {
    /**
    Visit each attribute of the resource.
    */
    fn for_each_attribute(&self, for_each: &mut dyn FnMut(emit::Str<'_>, emit::Value<'_>));

    /**
    The service name to use when the resource doesn't contain a [`SERVICE_NAME`].

    The default is `unknown_service:<executable>`, following the OpenTelemetry convention.
    */
    fn default_service_name(&self) -> String {
        default_service_name()
    }
}

impl<'a, R: ResourceProvider + ?Sized> ResourceProvider for &'a R {
    fn for_each_attribute(&self, for_each: &mut dyn FnMut(emit::Str<'_>, emit::Value<'_>)) {
        (**self).for_each_attribute(for_each)
    }

    fn default_service_name(&self) -> String {
        (**self).default_service_name()
    }
}

impl<R: ResourceProvider + ?Sized> ResourceProvider for Box<R> {
    fn for_each_attribute(&self, for_each: &mut dyn FnMut(emit::Str<'_>, emit::Value<'_>)) {
        (**self).for_each_attribute(for_each)
    }

    fn default_service_name(&self) -> String {
        (**self).default_service_name()
    }
}

/**
A [`ResourceProvider`] over a fixed set of [`emit::Props`].
*/
pub struct PropsResource<P>(pub P);

impl<P: emit::Props + Send + Sync> ResourceProvider for PropsResource<P> {
    fn for_each_attribute(&self, for_each: &mut dyn FnMut(emit::Str<'_>, emit::Value<'_>)) {
        let _ = self.0.for_each(|k, v| {
            for_each(k, v);

            ControlFlow::Continue(())
        });
    }
}

/**
The `unknown_service:<executable>` service name for the current process.
*/
pub fn default_service_name() -> String {
    std::env::current_exe()
        .ok()
        .as_deref()
        .and_then(Path::file_stem)
        .and_then(|name| name.to_str())
        .map(|name| format!("unknown_service:{name}"))
        .unwrap_or_else(|| "unknown_service".to_owned())
}

/**
Translate the attributes of a provider into a wire resource.

The first occurrence of each key wins. Attributes that can't be represented on the wire are dropped and counted in [`Resource::dropped_attributes_count`]. If no [`SERVICE_NAME`] is present then one is added from [`ResourceProvider::default_service_name`].
*/
pub fn translate(provider: &(impl ResourceProvider + ?Sized)) -> Resource {
    let mut builder = AttributesBuilder::default();
    provider.for_each_attribute(&mut |k, v| builder.push(k.get(), &v));

    let (mut attributes, dropped) = builder.finish();

    if !attributes.iter().any(|kv| kv.key == SERVICE_NAME) {
        let service_name = provider.default_service_name();

        if let Some(value) = AnyValue::from_value(&emit::Value::from(&*service_name)) {
            attributes.push(KeyValue {
                key: SERVICE_NAME.to_owned(),
                value,
            });
        }
    }

    Resource {
        attributes,
        dropped_attributes_count: dropped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    impl ResourceProvider for Named {
        fn for_each_attribute(&self, _: &mut dyn FnMut(emit::Str<'_>, emit::Value<'_>)) {}

        fn default_service_name(&self) -> String {
            self.0.to_owned()
        }
    }

    #[test]
    fn translate_injects_service_name() {
        let resource = translate(&Named("fallback"));

        assert_eq!(1, resource.attributes.len());
        assert_eq!(
            Some("fallback"),
            resource.get(SERVICE_NAME).and_then(|v| v.to_text()).as_deref()
        );
    }

    #[test]
    fn translate_keeps_service_name() {
        let resource = translate(&PropsResource([
            (SERVICE_NAME, "svc"),
            ("host.name", "a"),
            (SERVICE_NAME, "other"),
        ]));

        assert_eq!(2, resource.attributes.len());
        assert_eq!(
            1,
            resource
                .attributes
                .iter()
                .filter(|kv| kv.key == SERVICE_NAME)
                .count()
        );
        assert_eq!(
            Some("svc"),
            resource.get(SERVICE_NAME).and_then(|v| v.to_text()).as_deref()
        );
    }

    #[test]
    fn default_service_name_is_unknown_service() {
        assert!(default_service_name().starts_with("unknown_service"));
    }
}
