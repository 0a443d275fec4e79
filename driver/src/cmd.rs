//! Byte-level request/response surface
//!
//! Stateless queries are exposed as a small serialized command set so a
//! transport shim (ioctl marshalling, an RPC endpoint, a test harness) can
//! drive the driver without linking against its types. Encoding is bincode
//! on both sides.

use serde::{Deserialize, Serialize};

use crate::driver::BwcDriver;
use crate::format::{BufferAttrs, ImageFormat};
use crate::BufferHandle;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    SetBufferAttrs {
        handle: BufferHandle,
        attrs: BufferAttrs,
    },
    GetBufferAttrs {
        handle: BufferHandle,
    },
    GetHwVersion,
    GetStrideAlignment {
        format: ImageFormat,
    },
    ValidateStride {
        format: ImageFormat,
        width: u32,
        stride: u32,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    Ok,
    Attrs { attrs: BufferAttrs },
    HwVersion { major: u32, minor: u32 },
    StrideAlignment { align: u32 },
    StrideValid { valid: bool },
    Error { message: String },
}

fn encode(response: &Response) -> Vec<u8> {
    // A Response always serializes; an empty reply signals the
    // impossible.
    bincode::serialize(response).unwrap_or_default()
}

fn fail(message: String) -> Vec<u8> {
    encode(&Response::Error { message })
}

/// Decode one request, run it, encode the reply
pub fn handle_request(driver: &BwcDriver, bytes: &[u8]) -> Vec<u8> {
    let request: Request = match bincode::deserialize(bytes) {
        Ok(request) => request,
        Err(_) => return fail("malformed request".into()),
    };

    let response = match request {
        Request::SetBufferAttrs { handle, attrs } => {
            match driver.set_buffer_attrs(handle, &attrs) {
                Ok(()) => Response::Ok,
                Err(e) => return fail(e.to_string()),
            }
        }
        Request::GetBufferAttrs { handle } => match driver.get_buffer_attrs(handle) {
            Ok(attrs) => Response::Attrs { attrs },
            Err(e) => return fail(e.to_string()),
        },
        Request::GetHwVersion => match driver.hw_version() {
            Ok((major, minor)) => Response::HwVersion { major, minor },
            Err(e) => return fail(e.to_string()),
        },
        Request::GetStrideAlignment { format } => match driver.stride_alignment(format) {
            Ok(align) => Response::StrideAlignment { align },
            Err(e) => return fail(e.to_string()),
        },
        Request::ValidateStride {
            format,
            width,
            stride,
        } => match driver.validate_stride(format, width, stride) {
            Ok(valid) => Response::StrideValid { valid },
            Err(e) => return fail(e.to_string()),
        },
    };
    encode(&response)
}
