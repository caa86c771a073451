use ash::vk;

macro_rules! device_features {
    ($($field:ident,)+) => {
        paste::paste! {
            /// A single member of `VkPhysicalDeviceFeatures`.
            #[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
            pub enum DeviceFeature {
                $([<$field:camel>],)+
            }

            impl DeviceFeature {
                pub const ALL: &'static [DeviceFeature] = &[$(DeviceFeature::[<$field:camel>],)+];

                /// The name of the struct member this feature corresponds to.
                pub const fn name(&self) -> &'static str {
                    match self {
                        $(DeviceFeature::[<$field:camel>] => stringify!($field),)+
                    }
                }

                pub fn get(&self, features: &vk::PhysicalDeviceFeatures) -> bool {
                    match self {
                        $(DeviceFeature::[<$field:camel>] => features.$field != vk::FALSE,)+
                    }
                }

                pub fn enable(&self, features: &mut vk::PhysicalDeviceFeatures) {
                    match self {
                        $(DeviceFeature::[<$field:camel>] => features.$field = vk::TRUE,)+
                    }
                }
            }
        }
    }
}

device_features! {
    robust_buffer_access,
    full_draw_index_uint32,
    image_cube_array,
    independent_blend,
    geometry_shader,
    tessellation_shader,
    sample_rate_shading,
    dual_src_blend,
    logic_op,
    multi_draw_indirect,
    draw_indirect_first_instance,
    depth_clamp,
    depth_bias_clamp,
    fill_mode_non_solid,
    depth_bounds,
    wide_lines,
    large_points,
    alpha_to_one,
    multi_viewport,
    sampler_anisotropy,
    texture_compression_etc2,
    texture_compression_astc_ldr,
    texture_compression_bc,
    occlusion_query_precise,
    pipeline_statistics_query,
    vertex_pipeline_stores_and_atomics,
    fragment_stores_and_atomics,
    shader_tessellation_and_geometry_point_size,
    shader_image_gather_extended,
    shader_storage_image_extended_formats,
    shader_storage_image_multisample,
    shader_storage_image_read_without_format,
    shader_storage_image_write_without_format,
    shader_uniform_buffer_array_dynamic_indexing,
    shader_sampled_image_array_dynamic_indexing,
    shader_storage_buffer_array_dynamic_indexing,
    shader_storage_image_array_dynamic_indexing,
    shader_clip_distance,
    shader_cull_distance,
    shader_float64,
    shader_int64,
    shader_int16,
    shader_resource_residency,
    shader_resource_min_lod,
    sparse_binding,
    sparse_residency_buffer,
    sparse_residency_image2_d,
    sparse_residency_image3_d,
    sparse_residency2_samples,
    sparse_residency4_samples,
    sparse_residency8_samples,
    sparse_residency16_samples,
    sparse_residency_aliased,
    variable_multisample_rate,
    inherited_queries,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enable_sets_only_one_member() {
        let mut features = vk::PhysicalDeviceFeatures::default();
        DeviceFeature::SampleRateShading.enable(&mut features);

        assert_eq!(features.sample_rate_shading, vk::TRUE);
        let enabled: Vec<_> = DeviceFeature::ALL.iter().filter(|f| f.get(&features)).collect();
        assert_eq!(enabled, vec![&DeviceFeature::SampleRateShading]);
        assert_eq!(DeviceFeature::SampleRateShading.name(), "sample_rate_shading");
    }
}
