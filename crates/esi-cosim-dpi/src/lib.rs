// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # ESI cosim DPI-C bridge
//!
//! Shared library loaded by an RTL simulator. The simulation's cosim
//! endpoints call the `sv2cCosimserver*` functions below to register
//! channels, poll messages from host software, push messages to it and
//! publish the system manifest. Host software reaches the same channels
//! through the `esi-cosim` transport.
//!
//! Every entry point locks one process-wide [`Cosim`]; the transport runs on
//! its own thread and never takes that lock.
//!
//! # Safety
//!
//! All exported functions are `unsafe` and require the caller to uphold the
//! invariants documented in each function's safety comment. They are meant to
//! be called from the simulator's DPI thread.

#![allow(non_snake_case)]

pub mod bridge;
pub mod env_config;
pub mod error;
pub mod message_log;
pub mod open_array;
pub mod registry;

pub use bridge::{Cosim, AUTO_SIZE};
pub use env_config::EnvConfig;
pub use error::BridgeError;
pub use message_log::{Direction, MessageLog};
pub use open_array::{ArrayError, OpenArray, SliceArray, SvOpenArray};

use std::ffi::{c_void, CStr};
use std::os::raw::{c_char, c_int, c_uint};
use std::sync::{Mutex, MutexGuard, Once, OnceLock};

/// Lock the process-wide bridge, creating it from the environment on first use.
pub fn global() -> MutexGuard<'static, Cosim> {
    static COSIM: OnceLock<Mutex<Cosim>> = OnceLock::new();
    COSIM
        .get_or_init(|| {
            init_logging();
            Mutex::new(Cosim::new(EnvConfig::from_env()))
        })
        .lock()
        .unwrap_or_else(|err| err.into_inner())
}

fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = env_logger::Builder::from_env(
            env_logger::Env::default().filter_or(env_config::ENV_LOG, "info"),
        )
        .format_timestamp_millis()
        .try_init();
    });
}

/// Pick up `COSIM_*` changes made while the bridge was stopped.
fn refresh_config(cosim: &mut Cosim) {
    if !cosim.is_running() {
        cosim.set_config(EnvConfig::from_env());
    }
}

/// Start the bridge, re-reading the environment if it is not running.
fn start(cosim: &mut Cosim) {
    refresh_config(cosim);
    cosim.init();
}

/// Borrow a C string. NULL and invalid UTF-8 yield `None`.
unsafe fn c_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok()
}

fn report(func: &str, err: &BridgeError) -> c_int {
    log::error!("[cosim] {}: {}", func, err);
    err.code()
}

/// Start the cosim RPC server. Idempotent.
///
/// # Safety
/// Call from the simulator's DPI thread.
#[no_mangle]
pub unsafe extern "C" fn sv2cCosimserverInit() -> c_int {
    start(&mut global());
    0
}

/// Stop the RPC server and drop every registered endpoint. Idempotent.
///
/// # Safety
/// Call from the simulator's DPI thread.
#[no_mangle]
pub unsafe extern "C" fn sv2cCosimserverFinish() {
    global().finish();
}

/// Register an endpoint. Set exactly one of `from_host_type_id` (a channel
/// the simulator reads) and `to_host_type_id` (a channel it writes); the
/// other must be NULL or empty.
///
/// Returns 0, -1 (server not running or bad id), -2 (direction) or -3
/// (endpoint already registered).
///
/// # Safety
/// - `endpoint_id` must be a valid null-terminated C string.
/// - The type ids must be valid null-terminated C strings or NULL.
#[no_mangle]
pub unsafe extern "C" fn sv2cCosimserverEpRegister(
    endpoint_id: *const c_char,
    from_host_type_id: *const c_char,
    from_host_type_size: c_int,
    to_host_type_id: *const c_char,
    to_host_type_size: c_int,
) -> c_int {
    let Some(id) = c_str(endpoint_id) else {
        log::error!("[cosim] sv2cCosimserverEpRegister: invalid endpoint id");
        return -1;
    };
    let from_type = c_str(from_host_type_id).unwrap_or("");
    let to_type = c_str(to_host_type_id).unwrap_or("");

    let mut cosim = global();
    start(&mut cosim);
    match cosim.register_endpoint(id, from_type, from_host_type_size, to_type, to_host_type_size) {
        Ok(()) => 0,
        Err(e) => report("sv2cCosimserverEpRegister", &e),
    }
}

/// Poll a from-host endpoint without blocking.
///
/// On entry `*data_size` is the number of bytes the caller accepts, or
/// `0xFFFFFFFF` for the whole of `data`. On success it holds the message
/// length, 0 if nothing was waiting.
///
/// Returns 0, -1 (server not running), -2 (invalid array), -3 (size larger
/// than the array), -4 (unknown endpoint) or -5 (message does not fit).
///
/// # Safety
/// - `endpoint_id` must be a valid null-terminated C string.
/// - `data` must be an open-array handle valid for this call.
/// - `data_size` must point to a writable `unsigned int`.
#[no_mangle]
pub unsafe extern "C" fn sv2cCosimserverEpTryGet(
    endpoint_id: *const c_char,
    data: *const c_void,
    data_size: *mut c_uint,
) -> c_int {
    if data_size.is_null() {
        log::error!("[cosim] sv2cCosimserverEpTryGet: NULL size");
        return -3;
    }
    let Some(id) = c_str(endpoint_id) else {
        log::error!("[cosim] sv2cCosimserverEpTryGet: invalid endpoint id");
        return -4;
    };
    let array = SvOpenArray::from_handle(data);
    match global().try_get(id, &array, *data_size) {
        Ok(len) => {
            *data_size = len;
            0
        }
        Err(e) => report("sv2cCosimserverEpTryGet", &e),
    }
}

/// Send the first `data_size` bytes of `data` to the host. A negative size
/// sends the whole array.
///
/// Returns 0, -1 (server not running), -2 (invalid array), -3 (size larger
/// than the array) or -4 (unknown endpoint).
///
/// # Safety
/// - `endpoint_id` must be a valid null-terminated C string.
/// - `data` must be an open-array handle valid for this call.
#[no_mangle]
pub unsafe extern "C" fn sv2cCosimserverEpTryPut(
    endpoint_id: *const c_char,
    data: *const c_void,
    data_size: c_int,
) -> c_int {
    let Some(id) = c_str(endpoint_id) else {
        log::error!("[cosim] sv2cCosimserverEpTryPut: invalid endpoint id");
        return -4;
    };
    let array = SvOpenArray::from_handle(data);
    match global().try_put(id, &array, data_size) {
        Ok(()) => 0,
        Err(e) => report("sv2cCosimserverEpTryPut", &e),
    }
}

/// Publish the compressed manifest for host clients.
///
/// # Safety
/// `compressed_manifest` must be an open-array handle valid for this call.
#[no_mangle]
pub unsafe extern "C" fn sv2cCosimserverSetManifest(
    esi_version: c_int,
    compressed_manifest: *const c_void,
) {
    let array = SvOpenArray::from_handle(compressed_manifest);
    let mut cosim = global();
    start(&mut cosim);
    cosim.set_manifest(esi_version, &array);
}

/// Claim the low-level MMIO master. Returns 0, or -1 if already claimed.
///
/// # Safety
/// Call from the simulator's DPI thread.
#[no_mangle]
pub unsafe extern "C" fn sv2cCosimserverMMIORegister() -> c_int {
    let mut cosim = global();
    refresh_config(&mut cosim);
    match cosim.mmio_register() {
        Ok(()) => 0,
        Err(e) => report("sv2cCosimserverMMIORegister", &e),
    }
}

/// Poll for an MMIO read request. This transport carries no low-level
/// requests, so there is never one: always returns -1.
///
/// # Safety
/// `address` is never written and may be NULL.
#[no_mangle]
pub unsafe extern "C" fn sv2cCosimserverMMIOReadTryGet(_address: *mut u32) -> c_int {
    -1
}

/// Answer an MMIO read request.
///
/// # Safety
/// Call from the simulator's DPI thread.
#[no_mangle]
pub unsafe extern "C" fn sv2cCosimserverMMIOReadRespond(data: u32, error: c_char) {
    log::error!(
        "[cosim] More MMIO read responses than requests, dropping data={:#010x} error={}",
        data,
        error
    );
}

/// Answer an MMIO write request.
///
/// # Safety
/// Call from the simulator's DPI thread.
#[no_mangle]
pub unsafe extern "C" fn sv2cCosimserverMMIOWriteRespond(error: c_char) {
    log::error!(
        "[cosim] More MMIO write responses than requests, dropping error={}",
        error
    );
}

/// Poll for an MMIO write request. Always returns -1; see
/// [`sv2cCosimserverMMIOReadTryGet`].
///
/// # Safety
/// The pointers are never written and may be NULL.
#[no_mangle]
pub unsafe extern "C" fn sv2cCosimserverMMIOWriteTryGet(
    _address: *mut u32,
    _data: *mut u32,
) -> c_int {
    -1
}
