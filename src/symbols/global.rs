use super::fn_table;

fn_table! {
    /// Loader level entry points available before any instance exists.
    pub struct GlobalFn {
        create_instance => vkCreateInstance,
        enumerate_instance_extension_properties => vkEnumerateInstanceExtensionProperties,
        enumerate_instance_layer_properties => vkEnumerateInstanceLayerProperties,
    }
}
