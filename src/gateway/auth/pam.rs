//! PAM password verification through a runtime-loaded `libpam`.
//!
//! The library is opened with `libloading` instead of being linked, so the
//! gateway builds and starts on hosts that lack the PAM development files.
//! Only `pam_start`, `pam_authenticate` and `pam_end` are used.

use std::ffi::{CStr, CString, c_char, c_int, c_void};
use std::ptr;

use libloading::{Library, Symbol};
use nix::libc;
use tracing::{debug, error};

use crate::gateway::error::GatewayError;

use super::password::PasswordVerifier;

/// PAM service consulted for gateway logins.
pub const DEFAULT_SERVICE: &str = "login";

const LIBRARY: &str = "libpam.so.0";

const PAM_SUCCESS: c_int = 0;
const PAM_BUF_ERR: c_int = 5;
const PAM_CONV_ERR: c_int = 19;
const PAM_ERROR_MSG: c_int = 3;

#[repr(C)]
struct PamMessage {
    msg_style: c_int,
    msg: *const c_char,
}

#[repr(C)]
struct PamResponse {
    resp: *mut c_char,
    #[allow(dead_code)]
    resp_retcode: c_int,
}

type ConvFn = extern "C" fn(
    num_msg: c_int,
    msg: *mut *const PamMessage,
    resp: *mut *mut PamResponse,
    appdata_ptr: *mut c_void,
) -> c_int;

#[repr(C)]
struct PamConv {
    conv: ConvFn,
    appdata_ptr: *mut c_void,
}

type PamStartFn = unsafe extern "C" fn(
    service_name: *const c_char,
    user: *const c_char,
    pam_conversation: *const PamConv,
    pamh: *mut *mut c_void,
) -> c_int;
type PamAuthenticateFn = unsafe extern "C" fn(pamh: *mut c_void, flags: c_int) -> c_int;
type PamEndFn = unsafe extern "C" fn(pamh: *mut c_void, pam_status: c_int) -> c_int;

/// State shared with the conversation callback.
struct Conversation {
    password: CString,
    /// Error text reported by a module, if any.
    error: Option<String>,
}

/// Answer every prompt with the password; abort on an error message.
extern "C" fn converse(
    num_msg: c_int,
    msg: *mut *const PamMessage,
    resp: *mut *mut PamResponse,
    appdata_ptr: *mut c_void,
) -> c_int {
    if num_msg <= 0 || msg.is_null() || resp.is_null() || appdata_ptr.is_null() {
        return PAM_CONV_ERR;
    }
    // SAFETY: appdata_ptr is the Conversation passed to pam_start, alive for
    // the whole transaction.
    let conversation = unsafe { &mut *appdata_ptr.cast::<Conversation>() };
    let count = num_msg as usize;

    // PAM releases the replies with free(), so they come from the C allocator.
    let replies =
        unsafe { libc::calloc(count, std::mem::size_of::<PamResponse>()) }.cast::<PamResponse>();
    if replies.is_null() {
        return PAM_BUF_ERR;
    }

    for i in 0..count {
        // SAFETY: Linux-PAM passes an array of num_msg message pointers.
        let message = unsafe { &**msg.add(i) };
        if message.msg_style == PAM_ERROR_MSG {
            let text = if message.msg.is_null() {
                String::new()
            } else {
                unsafe { CStr::from_ptr(message.msg) }
                    .to_string_lossy()
                    .into_owned()
            };
            conversation.error = Some(text);
            unsafe { free_replies(replies, i) };
            return PAM_CONV_ERR;
        }

        let answer = unsafe { libc::strdup(conversation.password.as_ptr()) };
        if answer.is_null() {
            unsafe { free_replies(replies, i) };
            return PAM_BUF_ERR;
        }
        unsafe { (*replies.add(i)).resp = answer };
    }

    unsafe { *resp = replies };
    PAM_SUCCESS
}

/// Free the first `filled` replies and the reply array itself.
unsafe fn free_replies(replies: *mut PamResponse, filled: usize) {
    for i in 0..filled {
        unsafe { libc::free((*replies.add(i)).resp.cast()) };
    }
    unsafe { libc::free(replies.cast()) };
}

/// Password verifier backed by the host's PAM stack.
pub struct PamVerifier {
    library: Library,
    service: CString,
}

impl PamVerifier {
    /// Open `libpam` for the given service.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Password`] if the library or its entry points
    /// cannot be found.
    pub fn load(service: &str) -> Result<Self, GatewayError> {
        let service = CString::new(service)
            .map_err(|_| GatewayError::Password("PAM service name contains NUL".into()))?;
        // SAFETY: libpam has no initialisation routines with preconditions.
        let library = unsafe { Library::new(LIBRARY) }.map_err(|e| {
            GatewayError::Password(format!("password authentication unavailable: {e}"))
        })?;

        let verifier = Self { library, service };
        verifier.symbols()?;
        Ok(verifier)
    }

    fn symbols(
        &self,
    ) -> Result<
        (
            Symbol<'_, PamStartFn>,
            Symbol<'_, PamAuthenticateFn>,
            Symbol<'_, PamEndFn>,
        ),
        GatewayError,
    > {
        let missing =
            |e: libloading::Error| GatewayError::Password(format!("incomplete libpam: {e}"));
        // SAFETY: the signatures match the Linux-PAM headers.
        unsafe {
            Ok((
                self.library.get(b"pam_start\0").map_err(missing)?,
                self.library.get(b"pam_authenticate\0").map_err(missing)?,
                self.library.get(b"pam_end\0").map_err(missing)?,
            ))
        }
    }
}

impl PasswordVerifier for PamVerifier {
    fn verify(&self, username: &str, password: &str) -> Result<bool, GatewayError> {
        let user = CString::new(username)
            .map_err(|_| GatewayError::Password("user name contains NUL".into()))?;
        let password = CString::new(password)
            .map_err(|_| GatewayError::Password("password contains NUL".into()))?;
        let (pam_start, pam_authenticate, pam_end) = self.symbols()?;

        let mut conversation = Box::new(Conversation {
            password,
            error: None,
        });
        let conv = PamConv {
            conv: converse,
            appdata_ptr: ptr::from_mut(conversation.as_mut()).cast(),
        };

        let mut handle: *mut c_void = ptr::null_mut();
        // SAFETY: every pointer outlives the transaction, which ends below.
        let status = unsafe { pam_start(self.service.as_ptr(), user.as_ptr(), &conv, &mut handle) };
        if status != PAM_SUCCESS || handle.is_null() {
            return Err(GatewayError::Password(format!(
                "pam_start failed with status {status}"
            )));
        }

        let status = unsafe { pam_authenticate(handle, 0) };
        unsafe { pam_end(handle, status) };

        if let Some(message) = conversation.error.take() {
            error!("PAM reported an error for {}: {}", username, message);
        }
        if status != PAM_SUCCESS {
            debug!("PAM rejected {} with status {}", username, status);
        }
        Ok(status == PAM_SUCCESS)
    }
}
