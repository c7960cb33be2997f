// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Foreign array descriptors and their validation.
//!
//! The simulator hands the bridge SystemVerilog open arrays
//! (`svOpenArrayHandle`). Nothing about such a handle is trusted: every
//! access goes through [`validate`] first, which checks the layout the
//! bridge relies on before any byte is read or written.

use std::ffi::c_void;
use std::fmt;
use std::marker::PhantomData;
use std::os::raw::c_int;
use std::ptr;
use std::sync::OnceLock;
use thiserror::Error;

/// Accessors of a foreign array, mirroring the `svdpi.h` open-array API.
pub trait OpenArray {
    /// Number of unpacked dimensions.
    fn dimensions(&self) -> i32;
    /// Base pointer of the backing storage, or null if it has no C layout.
    fn array_ptr(&self) -> *mut c_void;
    /// Total size in bytes.
    fn size_of_array(&self) -> i32;
    /// Number of elements in dimension `dim` (1-based).
    fn size(&self, dim: i32) -> i32;
    /// Pointer to element `index` of a 1-D array, or null if out of range.
    fn elem_ptr(&self, index: i32) -> *mut c_void;
}

/// Reasons a foreign array is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArrayError {
    #[error("array has {0} dimensions, expected 1")]
    NotOneDimensional(i32),
    #[error("array has no C layout (ptr==NULL)")]
    NullPointer,
    #[error("array has no C layout (total_bytes==0)")]
    Empty,
    #[error(
        "unexpected element size: expected={expected} numElems={elems} totalBytes={total_bytes}"
    )]
    ElementSize {
        expected: usize,
        elems: i32,
        total_bytes: i32,
    },
    #[error("element {0} is not addressable")]
    NullElement(usize),
}

impl ArrayError {
    /// Validation code: which layout check failed.
    pub fn code(&self) -> c_int {
        match self {
            Self::NotOneDimensional(_) => -1,
            Self::NullPointer | Self::NullElement(_) => -2,
            Self::Empty => -3,
            Self::ElementSize { .. } => -4,
        }
    }
}

/// Check that `array` is a non-empty 1-D array with C layout whose elements
/// are `expected_elem_size` bytes wide.
pub fn validate(
    array: &dyn OpenArray,
    expected_elem_size: usize,
) -> Result<ByteArrayView<'_>, ArrayError> {
    let dims = array.dimensions();
    if dims != 1 {
        return Err(ArrayError::NotOneDimensional(dims));
    }
    if array.array_ptr().is_null() {
        return Err(ArrayError::NullPointer);
    }
    let total_bytes = array.size_of_array();
    if total_bytes <= 0 {
        return Err(ArrayError::Empty);
    }
    let elems = array.size(1);
    if i64::from(elems) * expected_elem_size as i64 != i64::from(total_bytes) {
        return Err(ArrayError::ElementSize {
            expected: expected_elem_size,
            elems,
            total_bytes,
        });
    }
    Ok(ByteArrayView {
        array,
        len: total_bytes as usize,
    })
}

/// A validated byte array. Only obtainable through [`validate`].
pub struct ByteArrayView<'a> {
    array: &'a dyn OpenArray,
    len: usize,
}

impl fmt::Debug for ByteArrayView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteArrayView")
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

impl ByteArrayView<'_> {
    /// Size of the array in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn elem(&self, index: usize) -> Result<*mut u8, ArrayError> {
        if index >= self.len {
            return Err(ArrayError::NullElement(index));
        }
        let ptr = self.array.elem_ptr(index as i32).cast::<u8>();
        if ptr.is_null() {
            return Err(ArrayError::NullElement(index));
        }
        Ok(ptr)
    }

    /// Copy the first `count` bytes out of the array.
    pub fn read(&self, count: usize) -> Result<Vec<u8>, ArrayError> {
        (0..count)
            .map(|i| {
                let ptr = self.elem(i)?;
                // SAFETY: `elem` returned a non-null pointer to an in-range
                // element of a validated single-byte array.
                Ok(unsafe { ptr.read() })
            })
            .collect()
    }

    /// Copy `src` into the array, then zero bytes up to `fill_to`.
    ///
    /// Every element pointer is resolved before the first write, so a failure
    /// leaves the array untouched.
    pub fn write(&self, src: &[u8], fill_to: usize) -> Result<(), ArrayError> {
        let end = fill_to.max(src.len());
        let ptrs = (0..end)
            .map(|i| self.elem(i))
            .collect::<Result<Vec<_>, _>>()?;
        for (i, ptr) in ptrs.into_iter().enumerate() {
            let byte = src.get(i).copied().unwrap_or(0);
            // SAFETY: see `read`.
            unsafe { ptr.write(byte) };
        }
        Ok(())
    }
}

/// `svdpi.h` accessors, resolved from the hosting simulator at run time.
struct SvApi {
    dimensions: unsafe extern "C" fn(*const c_void) -> c_int,
    get_array_ptr: unsafe extern "C" fn(*const c_void) -> *mut c_void,
    size_of_array: unsafe extern "C" fn(*const c_void) -> c_int,
    size: unsafe extern "C" fn(*const c_void, c_int) -> c_int,
    get_arr_elem_ptr1: unsafe extern "C" fn(*const c_void, c_int) -> *mut c_void,
}

#[cfg(unix)]
fn resolve(name: &'static [u8]) -> Option<*mut c_void> {
    // SAFETY: `name` is a NUL-terminated literal; RTLD_DEFAULT searches the
    // global symbol scope of the process, where the simulator exports svdpi.
    let sym = unsafe { libc::dlsym(libc::RTLD_DEFAULT, name.as_ptr().cast()) };
    (!sym.is_null()).then_some(sym)
}

#[cfg(not(unix))]
fn resolve(_name: &'static [u8]) -> Option<*mut c_void> {
    None
}

fn sv_api() -> Option<&'static SvApi> {
    static API: OnceLock<Option<SvApi>> = OnceLock::new();
    API.get_or_init(|| {
        let dimensions = resolve(b"svDimensions\0")?;
        let get_array_ptr = resolve(b"svGetArrayPtr\0")?;
        let size_of_array = resolve(b"svSizeOfArray\0")?;
        let size = resolve(b"svSize\0")?;
        let get_arr_elem_ptr1 = resolve(b"svGetArrElemPtr1\0")?;
        // SAFETY: the symbols come from the simulator's svdpi implementation,
        // whose C signatures these function pointer types mirror.
        unsafe {
            Some(SvApi {
                dimensions: std::mem::transmute::<*mut c_void, _>(dimensions),
                get_array_ptr: std::mem::transmute::<*mut c_void, _>(get_array_ptr),
                size_of_array: std::mem::transmute::<*mut c_void, _>(size_of_array),
                size: std::mem::transmute::<*mut c_void, _>(size),
                get_arr_elem_ptr1: std::mem::transmute::<*mut c_void, _>(get_arr_elem_ptr1),
            })
        }
    })
    .as_ref()
}

/// A simulator-owned `svOpenArrayHandle`.
///
/// When the svdpi accessors cannot be found (no simulator loaded us) or the
/// handle is null, the array reports zero dimensions and fails validation.
pub struct SvOpenArray {
    handle: *const c_void,
    api: Option<&'static SvApi>,
}

impl SvOpenArray {
    /// Wrap a handle received through a DPI call.
    ///
    /// # Safety
    /// `handle` must be null or an open-array handle that stays valid for the
    /// duration of the current DPI call.
    pub unsafe fn from_handle(handle: *const c_void) -> Self {
        let api = if handle.is_null() { None } else { sv_api() };
        Self { handle, api }
    }
}

impl OpenArray for SvOpenArray {
    fn dimensions(&self) -> i32 {
        // SAFETY: `from_handle` contract.
        self.api
            .map_or(0, |api| unsafe { (api.dimensions)(self.handle) })
    }

    fn array_ptr(&self) -> *mut c_void {
        self.api
            .map_or(ptr::null_mut(), |api| unsafe { (api.get_array_ptr)(self.handle) })
    }

    fn size_of_array(&self) -> i32 {
        self.api
            .map_or(0, |api| unsafe { (api.size_of_array)(self.handle) })
    }

    fn size(&self, dim: i32) -> i32 {
        self.api.map_or(0, |api| unsafe { (api.size)(self.handle, dim) })
    }

    fn elem_ptr(&self, index: i32) -> *mut c_void {
        self.api.map_or(ptr::null_mut(), |api| unsafe {
            (api.get_arr_elem_ptr1)(self.handle, index)
        })
    }
}

/// A Rust byte slice presented as a 1-D open array.
///
/// Lets Rust harnesses (and tests) drive the bridge without a simulator.
pub struct SliceArray<'a> {
    ptr: *mut u8,
    len: usize,
    _marker: PhantomData<&'a mut [u8]>,
}

impl<'a> SliceArray<'a> {
    pub fn new(bytes: &'a mut [u8]) -> Self {
        Self {
            ptr: bytes.as_mut_ptr(),
            len: bytes.len(),
            _marker: PhantomData,
        }
    }
}

impl OpenArray for SliceArray<'_> {
    fn dimensions(&self) -> i32 {
        1
    }

    fn array_ptr(&self) -> *mut c_void {
        self.ptr.cast()
    }

    fn size_of_array(&self) -> i32 {
        i32::try_from(self.len).unwrap_or(i32::MAX)
    }

    fn size(&self, dim: i32) -> i32 {
        if dim == 1 {
            self.size_of_array()
        } else {
            0
        }
    }

    fn elem_ptr(&self, index: i32) -> *mut c_void {
        match usize::try_from(index) {
            // SAFETY: in bounds of the borrowed slice.
            Ok(i) if i < self.len => unsafe { self.ptr.add(i).cast() },
            _ => ptr::null_mut(),
        }
    }
}
