use std::ffi::c_void;
use std::fmt::{Debug, Formatter};

use ash::vk;

use crate::device::DeviceContext;
use crate::error::{post_error, Error, VulkanError};
use crate::objects::handle::{DeviceHandle, Handle, Unowned};
use crate::vk_check;

pub struct QueryPool {
    handle: DeviceHandle<vk::QueryPool>,
    query_type: vk::QueryType,
    count: u32,
}

impl QueryPool {
    pub fn new(device: &DeviceContext, query_type: vk::QueryType, count: u32, statistics: vk::QueryPipelineStatisticFlags) -> Result<Self, Error> {
        let create_info = vk::QueryPoolCreateInfo::builder()
            .query_type(query_type)
            .query_count(count)
            .pipeline_statistics(statistics);

        let handle = Handle::create(device.get_functions().clone(), |functions| {
            let mut pool = vk::QueryPool::null();
            unsafe {
                vk_check!((functions.vk().create_query_pool)(functions.handle(), &*create_info, std::ptr::null(), &mut pool))?;
            }
            Ok(pool)
        })?;

        Ok(Self {
            handle,
            query_type,
            count,
        })
    }

    pub fn handle(&self) -> vk::QueryPool {
        self.handle.raw()
    }

    pub fn weak(&self) -> Unowned<vk::QueryPool> {
        self.handle.weak()
    }

    pub fn query_type(&self) -> vk::QueryType {
        self.query_type
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub(crate) fn check_range(&self, first: u32, count: u32) -> Result<(), Error> {
        if first.checked_add(count).map_or(true, |end| end > self.count) {
            return post_error(Error::Logic(format!("queries {}+{} exceed pool size {}", first, count, self.count)));
        }
        Ok(())
    }

    /// Reads 64 bit results of `results.len()` queries starting at `first`.
    ///
    /// Returns `false` without waiting if some results are not available yet, unless `flags`
    /// contains `WAIT`.
    pub fn get_results(&self, first: u32, results: &mut [u64], flags: vk::QueryResultFlags) -> Result<bool, Error> {
        let count = results.len() as u32;
        self.check_range(first, count)?;

        let functions = self.handle.owner();
        let flags = flags | vk::QueryResultFlags::TYPE_64;
        let result = unsafe {
            (functions.vk().get_query_pool_results)(
                functions.handle(),
                self.handle(),
                first,
                count,
                std::mem::size_of_val(results),
                results.as_mut_ptr() as *mut c_void,
                std::mem::size_of::<u64>() as vk::DeviceSize,
                flags
            )
        };
        match result {
            vk::Result::SUCCESS => Ok(true),
            vk::Result::NOT_READY => Ok(false),
            result => post_error(Error::Vulkan(VulkanError::new(result, file!(), line!()))),
        }
    }

    /// Resets queries from the host. Needs a device of version 1.2 or higher.
    pub fn host_reset(&mut self, first: u32, count: u32) -> Result<(), Error> {
        self.check_range(first, count)?;
        let functions = self.handle.owner();
        let v1_2 = functions.core().v1_2()?;
        unsafe {
            (v1_2.reset_query_pool)(functions.handle(), self.handle(), first, count);
        }
        Ok(())
    }
}

impl Debug for QueryPool {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryPool")
            .field("handle", &self.handle())
            .field("type", &self.query_type)
            .field("count", &self.count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::VulkanVersion;
    use crate::util::test::{make_test_device, make_test_device_with_version};

    #[test]
    fn host_reset_needs_1_2() {
        let device = make_test_device();
        let mut pool = QueryPool::new(&device, vk::QueryType::TIMESTAMP, 4, vk::QueryPipelineStatisticFlags::empty()).unwrap();
        match pool.host_reset(0, 4) {
            Err(Error::SymbolsMissing { requested, .. }) => assert_eq!(requested, VulkanVersion::VK_1_2),
            other => panic!("Unexpected result {:?}", other),
        }

        let device = make_test_device_with_version(VulkanVersion::VK_1_2);
        let mut pool = QueryPool::new(&device, vk::QueryType::TIMESTAMP, 4, vk::QueryPipelineStatisticFlags::empty()).unwrap();
        pool.host_reset(0, 4).unwrap();
        assert!(pool.host_reset(2, 3).is_err());
    }

    #[test]
    fn results_are_range_checked() {
        let device = make_test_device();
        let pool = QueryPool::new(&device, vk::QueryType::OCCLUSION, 2, vk::QueryPipelineStatisticFlags::empty()).unwrap();
        let mut results = [0u64; 2];
        assert!(pool.get_results(0, &mut results, vk::QueryResultFlags::empty()).unwrap());
        assert!(pool.get_results(1, &mut results, vk::QueryResultFlags::empty()).is_err());
    }
}
