use ash::vk;

use crate::error::{post_error, Error, VulkanError};

/// Runs a native enumeration function using the usual two call idiom.
///
/// The first call queries the count, the second fills the buffer. If the count changed between
/// the calls the driver returns `INCOMPLETE` and the whole sequence is retried.
pub fn enumerate<T, F>(mut f: F) -> Result<Vec<T>, Error> where T: Default + Clone, F: FnMut(*mut u32, *mut T) -> vk::Result {
    loop {
        let mut count = 0u32;
        let result = f(&mut count, std::ptr::null_mut());
        if result != vk::Result::SUCCESS {
            return post_error(Error::Vulkan(VulkanError::new(result, file!(), line!())));
        }

        let mut data = vec![T::default(); count as usize];
        let result = f(&mut count, data.as_mut_ptr());
        match result {
            vk::Result::SUCCESS => {
                data.truncate(count as usize);
                return Ok(data);
            }
            vk::Result::INCOMPLETE => continue,
            result => return post_error(Error::Vulkan(VulkanError::new(result, file!(), line!()))),
        }
    }
}

/// Like [`enumerate`] for functions which cannot fail.
pub fn enumerate_infallible<T, F>(mut f: F) -> Vec<T> where T: Default + Clone, F: FnMut(*mut u32, *mut T) {
    let mut count = 0u32;
    f(&mut count, std::ptr::null_mut());

    let mut data = vec![T::default(); count as usize];
    f(&mut count, data.as_mut_ptr());
    data.truncate(count as usize);
    data
}

#[inline]
pub fn make_full_viewport(size: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: size.width as f32,
        height: size.height as f32,
        min_depth: 0.0,
        max_depth: 1.0
    }
}

#[inline]
pub fn make_full_rect(size: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D{ x: 0, y: 0 },
        extent: size,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enumerate_retries_incomplete() {
        let mut calls = 0;
        let mut available = 2u32;
        let result = enumerate(|count: *mut u32, data: *mut u32| unsafe {
            calls += 1;
            if data.is_null() {
                *count = available;
                return vk::Result::SUCCESS;
            }
            if *count < 3 {
                // Another item appeared between the two calls
                available = 3;
                return vk::Result::INCOMPLETE;
            }
            for i in 0..3 {
                *data.add(i) = i as u32 + 10;
            }
            vk::Result::SUCCESS
        }).unwrap();

        assert_eq!(result, vec![10, 11, 12]);
        assert_eq!(calls, 4);
    }

    #[test]
    fn enumerate_reports_failures() {
        let result = enumerate(|_: *mut u32, _: *mut u32| vk::Result::ERROR_OUT_OF_HOST_MEMORY);
        assert_eq!(result.unwrap_err().vk_result(), Some(vk::Result::ERROR_OUT_OF_HOST_MEMORY));
    }
}
