//! Native [`SessionHost`] over the Windows Terminal Services API.
//!
//! Only compiled on Windows. Every native allocation is owned by a guard
//! type whose `Drop` releases it, so early returns and `?` never leak a
//! server handle, a WTS buffer, a token or an environment block.
//!
//! # Safety
//!
//! Each `unsafe` block relies on the documented contract of the wrapped
//! Win32 call. Pointers returned by the API never escape this module;
//! buffers are copied into owned `Vec<u8>`s before they are freed.

use crate::error::{codes, SessionError, SessionErrorKind, SessionResult};
use crate::host::{computer_name_from_env, ServerHandle, SessionHost};
use crate::types::{
    AttributeClass, HostTarget, LaunchRequest, LaunchedProcess, ProcessEntry,
    SendMessageRequest, SessionEntry, SessionState,
};
use log::debug;
use std::ffi::c_void;
use std::time::Duration;

use windows::core::{PCWSTR, PWSTR};
use windows::Win32::Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0};
use windows::Win32::Security::{
    DuplicateTokenEx, SecurityImpersonation, TokenPrimary, TOKEN_ACCESS_MASK,
};
use windows::Win32::System::Environment::{CreateEnvironmentBlock, DestroyEnvironmentBlock};
use windows::Win32::System::RemoteDesktop::{
    WTSCloseServer, WTSDisconnectSession, WTSEnumerateProcessesW, WTSEnumerateSessionsW,
    WTSFreeMemory, WTSLogoffSession, WTSOpenServerW, WTSQuerySessionInformationW,
    WTSQueryUserToken, WTSSendMessageW, WTS_INFO_CLASS, WTS_PROCESS_INFOW, WTS_SESSION_INFOW,
};
use windows::Win32::System::Threading::{
    CreateProcessAsUserW, GetExitCodeProcess, WaitForSingleObject, CREATE_NEW_CONSOLE,
    CREATE_UNICODE_ENVIRONMENT, PROCESS_INFORMATION, STARTUPINFOW,
};
use windows::Win32::UI::WindowsAndMessaging::{MESSAGEBOX_RESULT, MESSAGEBOX_STYLE};

/// MAXIMUM_ALLOWED access right.
const MAXIMUM_ALLOWED: u32 = 0x0200_0000;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Encode a Rust string as a null-terminated wide string.
fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0u16)).collect()
}

/// Decode a null-terminated wide string pointer to a Rust String.
///
/// # Safety
/// `ptr` must be null or a valid, null-terminated UTF-16 string pointer.
unsafe fn from_wide_ptr(ptr: *const u16) -> String {
    if ptr.is_null() {
        return String::new();
    }
    let mut len = 0usize;
    while *ptr.add(len) != 0 {
        len += 1;
    }
    String::from_utf16_lossy(std::slice::from_raw_parts(ptr, len))
}

/// Win32 error code carried by a `windows` error (HRESULT_FROM_WIN32 unwrapped).
fn win32_code(e: &windows::core::Error) -> u32 {
    let hr = e.code().0 as u32;
    if hr & 0xFFFF_0000 == 0x8007_0000 {
        hr & 0xFFFF
    } else {
        hr
    }
}

/// Buffer allocated by a WTS call, freed with `WTSFreeMemory`.
struct WtsBuffer(*mut c_void);

impl Drop for WtsBuffer {
    fn drop(&mut self) {
        if !self.0.is_null() {
            // SAFETY: pointer came from a WTS allocation and is freed once.
            unsafe { WTSFreeMemory(self.0) };
        }
    }
}

/// Kernel handle closed on drop.
struct OwnedHandle(HANDLE);

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        if !self.0.is_invalid() && !self.0 .0.is_null() {
            // SAFETY: handle is owned by this guard and closed once.
            let _ = unsafe { CloseHandle(self.0) };
        }
    }
}

/// Environment block from `CreateEnvironmentBlock`.
struct EnvironmentBlock(*mut c_void);

impl Drop for EnvironmentBlock {
    fn drop(&mut self) {
        if !self.0.is_null() {
            // SAFETY: block was created by CreateEnvironmentBlock.
            let _ = unsafe { DestroyEnvironmentBlock(self.0) };
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Host
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The real session host, reached through `wtsapi32`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WtsHost;

impl SessionHost for WtsHost {
    fn open(&self, target: &HostTarget) -> SessionResult<Box<dyn ServerHandle>> {
        match target {
            HostTarget::Local => {
                debug!("Using WTS_CURRENT_SERVER for local host");
                Ok(Box::new(WtsServer {
                    handle: HANDLE(std::ptr::null_mut()),
                    name: target.to_string(),
                    owned: false,
                }))
            }
            HostTarget::Named(name) => {
                let wide = to_wide(name);
                // SAFETY: `wide` is null-terminated and outlives the call.
                let handle = unsafe { WTSOpenServerW(PCWSTR(wide.as_ptr())) };
                if handle.is_invalid() || handle.0.is_null() {
                    let err = windows::core::Error::from_win32();
                    return Err(SessionError::host_unavailable(name, win32_code(&err)));
                }
                debug!("Opened WTS server handle for {}", name);
                Ok(Box::new(WtsServer {
                    handle,
                    name: name.clone(),
                    owned: true,
                }))
            }
        }
    }

    fn local_computer_name(&self) -> Option<String> {
        computer_name_from_env()
    }
}

/// An open WTS server handle.
struct WtsServer {
    handle: HANDLE,
    name: String,
    owned: bool,
}

// SAFETY: a WTS server handle is a plain kernel-side token usable from any
// thread; the wrapper owns it exclusively.
unsafe impl Send for WtsServer {}

impl Drop for WtsServer {
    fn drop(&mut self) {
        if self.owned && !self.handle.is_invalid() {
            // SAFETY: handle was returned by WTSOpenServerW and is closed once.
            unsafe { WTSCloseServer(self.handle) };
            debug!("Closed WTS server handle for {}", self.name);
        }
    }
}

impl ServerHandle for WtsServer {
    fn enumerate_sessions(&self) -> SessionResult<Vec<SessionEntry>> {
        let mut info_ptr: *mut WTS_SESSION_INFOW = std::ptr::null_mut();
        let mut count: u32 = 0;

        // SAFETY: fills info_ptr/count; the guard frees the array.
        unsafe { WTSEnumerateSessionsW(self.handle, 0, 1, &mut info_ptr, &mut count) }
            .map_err(|e| SessionError::host_unavailable(&self.name, win32_code(&e)))?;
        let _guard = WtsBuffer(info_ptr as *mut c_void);

        let mut sessions = Vec::with_capacity(count as usize);
        for i in 0..count as usize {
            // SAFETY: info_ptr points to `count` contiguous WTS_SESSION_INFOW structs.
            let raw = unsafe { &*info_ptr.add(i) };
            sessions.push(SessionEntry {
                session_id: raw.SessionId,
                // SAFETY: pWinStationName lives inside the guarded buffer.
                win_station_name: unsafe { from_wide_ptr(raw.pWinStationName.0) },
                state: SessionState::from_native(raw.State.0),
            });
        }
        debug!("Enumerated {} sessions on {}", sessions.len(), self.name);
        Ok(sessions)
    }

    fn query_attribute(&self, session_id: u32, class: AttributeClass) -> SessionResult<Vec<u8>> {
        let mut buf = PWSTR::null();
        let mut bytes: u32 = 0;

        // SAFETY: on success buf points to `bytes` bytes owned by WTS.
        let result = unsafe {
            WTSQuerySessionInformationW(
                self.handle,
                session_id,
                WTS_INFO_CLASS(class.native_class()),
                &mut buf,
                &mut bytes,
            )
        };
        let _guard = WtsBuffer(buf.0 as *mut c_void);
        if let Err(e) = result {
            return Err(SessionError::new(
                SessionErrorKind::AttributeUnavailable,
                format!("{:?} for session {}: native error {}", class, session_id, win32_code(&e)),
            ));
        }
        if buf.is_null() {
            return Ok(Vec::new());
        }
        // SAFETY: buf is valid for `bytes` bytes until the guard drops.
        let copy = unsafe { std::slice::from_raw_parts(buf.0 as *const u8, bytes as usize) }.to_vec();
        Ok(copy)
    }

    fn disconnect(&self, session_id: u32, wait: bool) -> SessionResult<()> {
        // SAFETY: plain call on a valid server handle.
        unsafe { WTSDisconnectSession(self.handle, session_id, wait) }.map_err(|e| {
            SessionError::action_failed(&format!("WTSDisconnectSession({})", session_id), win32_code(&e))
        })?;
        debug!("Disconnected session {} on {}", session_id, self.name);
        Ok(())
    }

    fn logoff(&self, session_id: u32, wait: bool) -> SessionResult<()> {
        // SAFETY: plain call on a valid server handle.
        unsafe { WTSLogoffSession(self.handle, session_id, wait) }.map_err(|e| {
            SessionError::action_failed(&format!("WTSLogoffSession({})", session_id), win32_code(&e))
        })?;
        debug!("Logged off session {} on {}", session_id, self.name);
        Ok(())
    }

    fn send_message(&self, session_id: u32, request: &SendMessageRequest) -> SessionResult<u32> {
        let wide_title = to_wide(&request.title);
        let wide_msg = to_wide(&request.message);
        let mut response = MESSAGEBOX_RESULT(0);

        // SAFETY: both strings are null-terminated and outlive the call.
        unsafe {
            WTSSendMessageW(
                self.handle,
                session_id,
                PCWSTR(wide_title.as_ptr()),
                (wide_title.len() as u32) * 2,
                PCWSTR(wide_msg.as_ptr()),
                (wide_msg.len() as u32) * 2,
                MESSAGEBOX_STYLE(request.style()),
                request.timeout_seconds,
                &mut response,
                request.wait,
            )
        }
        .map_err(|e| {
            SessionError::action_failed(&format!("WTSSendMessageW(session {})", session_id), win32_code(&e))
        })?;

        Ok(response.0 as u32)
    }

    fn launch_interactive(
        &self,
        session_id: u32,
        request: &LaunchRequest,
        wait_timeout: Duration,
    ) -> SessionResult<LaunchedProcess> {
        if self.owned {
            // The user token can only be obtained on the machine that owns the session.
            return Err(SessionError::action_failed(
                &format!("interactive launch on '{}' needs a remote executor", self.name),
                codes::ERROR_NOT_SUPPORTED,
            ));
        }

        let mut user_token = HANDLE::default();
        // SAFETY: requires SE_TCB_NAME; failure is mapped below.
        unsafe { WTSQueryUserToken(session_id, &mut user_token) }
            .map_err(|e| SessionError::action_failed("WTSQueryUserToken", win32_code(&e)))?;
        let user_token = OwnedHandle(user_token);

        let mut primary = HANDLE::default();
        // SAFETY: duplicating a valid token handle into `primary`.
        unsafe {
            DuplicateTokenEx(
                user_token.0,
                TOKEN_ACCESS_MASK(MAXIMUM_ALLOWED),
                None,
                SecurityImpersonation,
                TokenPrimary,
                &mut primary,
            )
        }
        .map_err(|e| SessionError::action_failed("DuplicateTokenEx", win32_code(&e)))?;
        let primary = OwnedHandle(primary);

        let mut env: *mut c_void = std::ptr::null_mut();
        // SAFETY: env receives a block owned by the guard below.
        unsafe { CreateEnvironmentBlock(&mut env, primary.0, false) }
            .map_err(|e| SessionError::action_failed("CreateEnvironmentBlock", win32_code(&e)))?;
        let env = EnvironmentBlock(env);

        let mut desktop = to_wide("winsta0\\default");
        let mut command_line = to_wide(&request.command_line);
        let cwd = request.working_directory.as_deref().map(to_wide);
        let startup = STARTUPINFOW {
            cb: std::mem::size_of::<STARTUPINFOW>() as u32,
            lpDesktop: PWSTR(desktop.as_mut_ptr()),
            ..Default::default()
        };
        let mut info = PROCESS_INFORMATION::default();

        // SAFETY: all string buffers are null-terminated and live across the call;
        // CreateProcessAsUserW may write into the command line buffer.
        unsafe {
            CreateProcessAsUserW(
                primary.0,
                PCWSTR::null(),
                PWSTR(command_line.as_mut_ptr()),
                None,
                None,
                false,
                CREATE_UNICODE_ENVIRONMENT | CREATE_NEW_CONSOLE,
                Some(env.0 as *const c_void),
                cwd.as_ref().map_or(PCWSTR::null(), |w| PCWSTR(w.as_ptr())),
                &startup,
                &mut info,
            )
        }
        .map_err(|e| SessionError::action_failed("CreateProcessAsUserW", win32_code(&e)))?;
        let process = OwnedHandle(info.hProcess);
        let _thread = OwnedHandle(info.hThread);
        debug!(
            "Launched pid {} in session {}: {}",
            info.dwProcessId, session_id, request.command_line
        );

        let mut launched = LaunchedProcess {
            process_id: (info.dwProcessId != 0).then_some(info.dwProcessId),
            exit_code: None,
        };
        if request.wait {
            let millis = wait_timeout.as_millis().min(u128::from(u32::MAX - 1)) as u32;
            // SAFETY: waiting on a process handle we own.
            let waited = unsafe { WaitForSingleObject(process.0, millis) };
            if waited == WAIT_OBJECT_0 {
                let mut code: u32 = 0;
                // SAFETY: the process has exited; reading its exit code.
                if unsafe { GetExitCodeProcess(process.0, &mut code) }.is_ok() {
                    launched.exit_code = Some(code);
                }
            } else {
                debug!("pid {} still running after {:?}", info.dwProcessId, wait_timeout);
            }
        }
        Ok(launched)
    }

    fn list_processes(&self) -> SessionResult<Vec<ProcessEntry>> {
        let mut info_ptr: *mut WTS_PROCESS_INFOW = std::ptr::null_mut();
        let mut count: u32 = 0;

        // SAFETY: fills info_ptr/count; the guard frees the array.
        unsafe { WTSEnumerateProcessesW(self.handle, 0, 1, &mut info_ptr, &mut count) }
            .map_err(|e| SessionError::action_failed("WTSEnumerateProcessesW", win32_code(&e)))?;
        let _guard = WtsBuffer(info_ptr as *mut c_void);

        let mut procs = Vec::with_capacity(count as usize);
        for i in 0..count as usize {
            // SAFETY: info_ptr points to `count` contiguous WTS_PROCESS_INFOW structs.
            let raw = unsafe { &*info_ptr.add(i) };
            procs.push(ProcessEntry {
                session_id: raw.SessionId,
                process_id: raw.ProcessId,
                // SAFETY: pProcessName lives inside the guarded buffer.
                image_name: unsafe { from_wide_ptr(raw.pProcessName.0) },
            });
        }
        Ok(procs)
    }
}
