//! Versioned tables of native entry points.
//!
//! Every native function the crate calls is resolved into one of the tables in this module.
//! Core tables are grouped by api version tier and resolved by walking an ordered list of tier
//! loaders (see [`walk_tiers`]). Extension tables are only loaded if the matching extension was
//! enabled.

pub mod global;
pub mod instance;
pub mod device;
pub mod extensions;

use std::ffi::CStr;

use ash::vk;

use crate::error::{post_error, Error};
use crate::instance::VulkanVersion;

pub use global::GlobalFn;
pub use instance::{InstanceCore, InstanceFnV1_0, InstanceFnV1_1};
pub use device::{DeviceCore, DeviceFnV1_0, DeviceFnV1_1, DeviceFnV1_2, DeviceFnV1_3};
pub use extensions::{DebugUtilsFn, SwapchainKhrFn};

/// Looks up a single native symbol. Returns `None` if the symbol is unavailable.
pub type SymbolLoader<'a> = dyn FnMut(&CStr) -> vk::PFN_vkVoidFunction + 'a;

/// Loads the table of one tier, including all tiers below it.
pub type TierLoader<T> = unsafe fn(&mut SymbolLoader, VulkanVersion) -> Result<T, Error>;

/// Generates a struct of typed native function pointers together with a `load` function
/// resolving every member through a [`SymbolLoader`].
///
/// Loading collects the names of all symbols for which the loader returned null and fails
/// with the complete list.
macro_rules! fn_table {
    ($(#[$meta:meta])* $vis:vis struct $name:ident { $($field:ident => $sym:ident,)+ }) => {
        paste::paste! {
            $(#[$meta])*
            #[derive(Copy, Clone)]
            $vis struct $name {
                $(pub $field: ash::vk::[<PFN_ $sym>],)+
            }

            impl $name {
                pub const NAME: &'static str = stringify!($name);

                /// # Safety
                /// The loader must return function pointers matching the signature of the
                /// requested symbol.
                pub unsafe fn load(loader: &mut $crate::symbols::SymbolLoader) -> Result<Self, Vec<&'static str>> {
                    let mut missing = Vec::new();
                    $(
                        let symbol = std::ffi::CStr::from_bytes_with_nul_unchecked(concat!(stringify!($sym), "\0").as_bytes());
                        let $field = match loader(symbol) {
                            Some(ptr) => Some(std::mem::transmute::<unsafe extern "system" fn(), ash::vk::[<PFN_ $sym>]>(ptr)),
                            None => {
                                missing.push(stringify!($sym));
                                None
                            }
                        };
                    )+

                    match ($($field,)+) {
                        ($(Some($field),)+) => Ok(Self { $($field,)+ }),
                        _ => Err(missing),
                    }
                }
            }
        }
    }
}

pub(crate) use fn_table;

/// Converts the result of a table load into the crate error type.
pub(crate) fn check_table<T>(table: &'static str, result: Result<T, Vec<&'static str>>) -> Result<T, Error> {
    match result {
        Ok(loaded) => Ok(loaded),
        Err(missing) => {
            log::error!("Loader returned null for {} symbols of {}", missing.len(), table);
            post_error(Error::NullEntryPoints { table, missing })
        }
    }
}

/// Walks the tiers from the lowest upwards and materializes the table of the first tier whose
/// ceiling is not below the negotiated version.
///
/// If the negotiated version exceeds the highest known tier this fails with
/// [`Error::ApiVersionUnsupported`] naming the highest tier and the negotiated version.
///
/// # Safety
/// The loader must return function pointers matching the signature of the requested symbol.
pub unsafe fn walk_tiers<T>(tiers: &[(VulkanVersion, TierLoader<T>)], negotiated: VulkanVersion, loader: &mut SymbolLoader) -> Result<T, Error> {
    let mut last_good = None;
    for (ceiling, load) in tiers {
        if ceiling.is_at_least(negotiated) {
            return load(loader, negotiated);
        }
        last_good = Some(*ceiling);
    }

    post_error(Error::ApiVersionUnsupported {
        supported: last_good.unwrap_or(VulkanVersion::VK_1_0),
        requested: negotiated,
    })
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    fn counting_tiers() -> [(VulkanVersion, TierLoader<VulkanVersion>); 3] {
        unsafe fn load_1_0(_: &mut SymbolLoader, _: VulkanVersion) -> Result<VulkanVersion, Error> {
            Ok(VulkanVersion::VK_1_0)
        }
        unsafe fn load_1_1(_: &mut SymbolLoader, _: VulkanVersion) -> Result<VulkanVersion, Error> {
            Ok(VulkanVersion::VK_1_1)
        }
        unsafe fn load_1_2(_: &mut SymbolLoader, _: VulkanVersion) -> Result<VulkanVersion, Error> {
            Ok(VulkanVersion::VK_1_2)
        }

        [
            (VulkanVersion::VK_1_0, load_1_0 as TierLoader<VulkanVersion>),
            (VulkanVersion::VK_1_1, load_1_1 as TierLoader<VulkanVersion>),
            (VulkanVersion::VK_1_2, load_1_2 as TierLoader<VulkanVersion>),
        ]
    }

    #[test]
    fn walk_picks_matching_tier() {
        let tiers = counting_tiers();
        let mut loader = |_: &CStr| -> vk::PFN_vkVoidFunction { None };

        let tier = unsafe { walk_tiers(&tiers, VulkanVersion::new(0, 1, 1, 200), &mut loader) };
        assert_eq!(tier, Ok(VulkanVersion::VK_1_1));

        let tier = unsafe { walk_tiers(&tiers, VulkanVersion::VK_1_0, &mut loader) };
        assert_eq!(tier, Ok(VulkanVersion::VK_1_0));
    }

    #[test]
    fn walk_fails_above_highest_tier() {
        let tiers = counting_tiers();
        let mut loader = |_: &CStr| -> vk::PFN_vkVoidFunction { None };

        match unsafe { walk_tiers(&tiers, VulkanVersion::VK_1_3, &mut loader) } {
            Err(Error::ApiVersionUnsupported { supported, requested }) => {
                assert_eq!(supported, VulkanVersion::VK_1_2);
                assert_eq!(requested, VulkanVersion::VK_1_3);
            }
            other => panic!("Unexpected result {:?}", other),
        }
    }

    #[test]
    fn null_symbols_are_all_reported() {
        let requested = RefCell::new(Vec::new());
        let mut loader = |name: &CStr| -> vk::PFN_vkVoidFunction {
            requested.borrow_mut().push(name.to_str().unwrap().to_string());
            None
        };

        let result = unsafe { GlobalFn::load(&mut loader) };
        match check_table(GlobalFn::NAME, result.map(|_| ())) {
            Err(Error::NullEntryPoints { table, missing }) => {
                assert_eq!(table, "GlobalFn");
                assert_eq!(missing, vec!["vkCreateInstance", "vkEnumerateInstanceExtensionProperties", "vkEnumerateInstanceLayerProperties"]);
            }
            other => panic!("Unexpected result {:?}", other),
        }
        assert_eq!(requested.borrow().len(), 3);
    }
}
