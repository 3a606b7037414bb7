//! Windows named pipe instances.

use std::ffi::{c_void, CString};

use tokio::net::windows::named_pipe::{
    ClientOptions, NamedPipeClient, NamedPipeServer, PipeMode, ServerOptions,
};
use tracing::{debug, warn};
use windows_sys::Win32::Foundation::{
    LocalFree, ERROR_FILE_NOT_FOUND, ERROR_PIPE_BUSY, ERROR_SEM_TIMEOUT,
};
use windows_sys::Win32::Security::Authorization::ConvertStringSecurityDescriptorToSecurityDescriptorA;
use windows_sys::Win32::Security::SECURITY_ATTRIBUTES;
use windows_sys::Win32::System::Pipes::WaitNamedPipeW;

use crate::error::{Result, TransportError};
use crate::name::PipeSecurity;

/// Size of the in/out buffers of each pipe instance.
const PIPE_BUFFER_SIZE: u32 = 4096;

const SDDL_REVISION_1: u32 = 1;

/// Security descriptor allocated by the SDDL parser, released with `LocalFree`.
struct SecurityDescriptor(*mut c_void);

impl SecurityDescriptor {
    fn from_sddl(sddl: &str) -> std::io::Result<Self> {
        let sddl = CString::new(sddl)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        let mut descriptor: *mut c_void = std::ptr::null_mut();

        // SAFETY: `sddl` is a valid NUL-terminated string and `descriptor` is a
        // writable out pointer. The size out-parameter is optional.
        let ok = unsafe {
            ConvertStringSecurityDescriptorToSecurityDescriptorA(
                sddl.as_ptr().cast(),
                SDDL_REVISION_1,
                &mut descriptor,
                std::ptr::null_mut(),
            )
        };
        if ok == 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(Self(descriptor))
    }
}

impl Drop for SecurityDescriptor {
    fn drop(&mut self) {
        if !self.0.is_null() {
            // SAFETY: the pointer was allocated by the SDDL parser with LocalAlloc.
            unsafe {
                LocalFree(self.0);
            }
        }
    }
}

/// Create one unconnected server instance of the named pipe `name`.
pub(crate) fn create_instance(name: &str, security: &PipeSecurity) -> Result<NamedPipeServer> {
    let create_err = |source: std::io::Error| TransportError::Create {
        name: name.to_string(),
        source,
    };

    let mut options = ServerOptions::new();
    options
        .access_inbound(true)
        .access_outbound(true)
        .pipe_mode(PipeMode::Byte)
        .in_buffer_size(PIPE_BUFFER_SIZE)
        .out_buffer_size(PIPE_BUFFER_SIZE);

    let server = match security.sddl() {
        None => options.create(name).map_err(create_err)?,
        Some(sddl) => {
            let descriptor = SecurityDescriptor::from_sddl(sddl).map_err(create_err)?;
            let mut attributes = SECURITY_ATTRIBUTES {
                nLength: std::mem::size_of::<SECURITY_ATTRIBUTES>() as u32,
                lpSecurityDescriptor: descriptor.0,
                bInheritHandle: 0,
            };
            // SAFETY: `attributes` and the descriptor it points to outlive the call.
            unsafe {
                options.create_with_security_attributes_raw(
                    name,
                    (&mut attributes as *mut SECURITY_ATTRIBUTES).cast(),
                )
            }
            .map_err(create_err)?
        }
    };

    debug!(pipe = name, "created named pipe instance");
    Ok(server)
}

/// Open the client end of the named pipe `name`.
pub(crate) fn open_client(name: &str) -> Result<NamedPipeClient> {
    match ClientOptions::new().open(name) {
        Ok(client) => {
            debug!(pipe = name, "connected to named pipe");
            Ok(client)
        }
        Err(source)
            if source.raw_os_error() == Some(ERROR_PIPE_BUSY as i32)
                || source.raw_os_error() == Some(ERROR_FILE_NOT_FOUND as i32) =>
        {
            Err(TransportError::Unavailable {
                name: name.to_string(),
                source,
            })
        }
        Err(source) => Err(TransportError::Connect {
            name: name.to_string(),
            source,
        }),
    }
}

/// True when at least one server instance of `name` exists (busy or not).
///
/// Uses `WaitNamedPipeW` with a minimal wait so no instance is consumed.
pub(crate) fn endpoint_exists(name: &str) -> bool {
    let wide: Vec<u16> = name.encode_utf16().chain(std::iter::once(0)).collect();
    // SAFETY: `wide` is a valid NUL-terminated UTF-16 string.
    let ok = unsafe { WaitNamedPipeW(wide.as_ptr(), 1) };
    if ok != 0 {
        return true;
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(ERROR_FILE_NOT_FOUND as i32) {
        false
    } else {
        // Instances exist but are all busy.
        if err.raw_os_error() != Some(ERROR_SEM_TIMEOUT as i32) {
            warn!(pipe = name, error = %err, "unexpected result waiting for named pipe");
        }
        true
    }
}
