//! Native directory transport over the Windows LDAP client (`wldap32`).
//!
//! Calls are blocking, so every operation runs on tokio's blocking pool. The default bind uses
//! the process identity (Negotiate), which is what makes this transport preferable on
//! domain-joined hosts.

use std::collections::HashMap;
use std::ptr::{null, null_mut};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::spawn_blocking;
use windows::Win32::Foundation::{BOOLEAN, PSTR, PWSTR};
use windows::Win32::Networking::Ldap::{
    ber_free, ldap, ldap_bind_sW, ldap_connect, ldap_err2stringW, ldap_first_attributeW,
    ldap_first_entry, ldap_get_dnW, ldap_get_values_lenW, ldap_initW, ldap_memfree, ldap_msgfree,
    ldap_next_attributeW, ldap_next_entry, ldap_search_ext_sW, ldap_set_optionW,
    ldap_simple_bind_sW, ldap_sslinitW, ldap_unbind, ldap_value_free_len, LdapGetLastError,
    LDAPMessage, LDAP_SUCCESS, LDAP_TIMEVAL,
};

use addir_core::{Error, Result};

use crate::transport::{
    ConnectTarget, DirectoryEntry, DirectorySession, DirectoryTransport, SearchScope,
};

const LDAP_AUTH_NEGOTIATE: u32 = 1158;
const LDAP_INVALID_CREDENTIALS: u32 = 0x31;
const LDAP_OPT_PROTOCOL_VERSION: i32 = 0x11;
const LDAP_OPT_SERVER_CERTIFICATE: i32 = 0x81;
const LDAP_VERSION3: u32 = 3;

#[derive(Clone, Copy)]
struct Handle(*mut ldap);

// wldap32 handles may be used from any thread as long as calls are not concurrent; each
// session is owned by a single caller and awaited sequentially.
unsafe impl Send for Handle {}

/// Transport backed by the operating system's LDAP client.
pub struct NativeTransport {
    connection_timeout: Duration,
}

impl NativeTransport {
    /// Creates a transport with the given connection timeout.
    #[must_use]
    pub fn new(connection_timeout: Duration) -> Self {
        Self { connection_timeout }
    }
}

#[async_trait]
impl DirectoryTransport for NativeTransport {
    async fn connect(&self, target: &ConnectTarget) -> Result<Box<dyn DirectorySession>> {
        let target = target.clone();
        let seconds = i32::try_from(self.connection_timeout.as_secs()).unwrap_or(i32::MAX);
        let handle = run_blocking(move || open(&target, seconds)).await?;
        Ok(Box::new(NativeSession { handle }))
    }
}

struct NativeSession {
    handle: Handle,
}

#[async_trait]
impl DirectorySession for NativeSession {
    async fn simple_bind(&mut self, dn: &str, password: &str) -> Result<()> {
        if password.is_empty() {
            return Err(Error::InvalidCredentials);
        }
        let handle = self.handle;
        let (dn, password) = (dn.to_owned(), password.to_owned());
        run_blocking(move || {
            let code = unsafe { ldap_simple_bind_sW(handle.0, dn.as_str(), password.as_str()) };
            match code {
                c if c == LDAP_SUCCESS.0 as u32 => Ok(()),
                LDAP_INVALID_CREDENTIALS => Err(Error::InvalidCredentials),
                c => Err(ldap_error("bind", c)),
            }
        })
        .await
    }

    async fn default_bind(&mut self) -> Result<()> {
        let handle = self.handle;
        run_blocking(move || {
            let code =
                unsafe { ldap_bind_sW(handle.0, None, PWSTR(null_mut()), LDAP_AUTH_NEGOTIATE) };
            if code == LDAP_SUCCESS.0 as u32 {
                Ok(())
            } else {
                Err(ldap_error("bind", code))
            }
        })
        .await
    }

    async fn search(
        &mut self,
        base_dn: &str,
        scope: SearchScope,
        filter: &str,
        attributes: &[String],
    ) -> Result<Vec<DirectoryEntry>> {
        let handle = self.handle;
        let (base_dn, filter, attributes) =
            (base_dn.to_owned(), filter.to_owned(), attributes.to_vec());
        run_blocking(move || search(handle, &base_dn, scope, &filter, &attributes)).await
    }

    async fn unbind(&mut self) -> Result<()> {
        let handle = self.handle;
        self.handle = Handle(null_mut());
        if handle.0.is_null() {
            return Ok(());
        }
        run_blocking(move || {
            let code = unsafe { ldap_unbind(handle.0) };
            if code == LDAP_SUCCESS.0 as u32 {
                Ok(())
            } else {
                Err(ldap_error("unbind", code))
            }
        })
        .await
    }
}

impl Drop for NativeSession {
    fn drop(&mut self) {
        if !self.handle.0.is_null() {
            unsafe { ldap_unbind(self.handle.0) };
        }
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    spawn_blocking(f)
        .await
        .map_err(|err| Error::InternalError(format!("directory call panicked: {err}")))?
}

unsafe extern "system" fn accept_any_certificate(
    _connection: *mut ldap,
    _certificate: *mut *mut core::ffi::c_void,
) -> BOOLEAN {
    BOOLEAN(1)
}

fn open(target: &ConnectTarget, timeout_secs: i32) -> Result<Handle> {
    let port = u32::from(target.port);
    let handle = unsafe {
        match (target.host.as_deref(), target.tls_mode.uses_tls()) {
            (Some(host), true) => ldap_sslinitW(host, port, 1),
            (None, true) => ldap_sslinitW(None, port, 1),
            (Some(host), false) => ldap_initW(host, port),
            (None, false) => ldap_initW(None, port),
        }
    };
    if handle.is_null() {
        return Err(ldap_error("connect", unsafe { LdapGetLastError() }));
    }
    let handle = Handle(handle);

    let version = LDAP_VERSION3;
    unsafe {
        ldap_set_optionW(
            handle.0,
            LDAP_OPT_PROTOCOL_VERSION,
            &version as *const u32 as *const _,
        );
    }
    if target.tls_mode.uses_tls() && !target.tls_mode.verifies_certificates() {
        let callback = accept_any_certificate as *const core::ffi::c_void;
        unsafe { ldap_set_optionW(handle.0, LDAP_OPT_SERVER_CERTIFICATE, callback) };
    }

    let mut timeout = LDAP_TIMEVAL {
        tv_sec: timeout_secs,
        tv_usec: 0,
    };
    let code = unsafe { ldap_connect(handle.0, &mut timeout) };
    if code != LDAP_SUCCESS.0 as u32 {
        unsafe { ldap_unbind(handle.0) };
        return Err(ldap_error("connect", code));
    }
    Ok(handle)
}

fn search(
    handle: Handle,
    base_dn: &str,
    scope: SearchScope,
    filter: &str,
    attributes: &[String],
) -> Result<Vec<DirectoryEntry>> {
    let scope = match scope {
        SearchScope::Base => 0,
        SearchScope::OneLevel => 1,
        SearchScope::Subtree => 2,
    };
    // Pointers into `attr_names` stay valid because the vectors are not touched afterwards.
    let attr_names: Vec<Vec<u16>> = attributes.iter().map(|a| str_to_wstr(a)).collect();
    let attr_ptrs: Vec<*const u16> = attr_names
        .iter()
        .map(|a| a.as_ptr())
        .chain(std::iter::once(null()))
        .collect();

    let mut result: *mut LDAPMessage = null_mut();
    let code = unsafe {
        ldap_search_ext_sW(
            handle.0,
            base_dn,
            scope,
            filter,
            attr_ptrs.as_ptr(),
            0,
            null_mut(),
            null_mut(),
            null_mut(),
            0,
            &mut result as *mut *mut LDAPMessage,
        )
    };
    if code != LDAP_SUCCESS.0 as u32 {
        if !result.is_null() {
            unsafe { ldap_msgfree(result) };
        }
        return Err(ldap_error("search", code));
    }

    let mut entries = Vec::new();
    let mut cursor = unsafe { ldap_first_entry(handle.0, result) };
    while !cursor.is_null() {
        entries.push(read_entry(handle, cursor));
        cursor = unsafe { ldap_next_entry(handle.0, cursor) };
    }
    unsafe { ldap_msgfree(result) };
    Ok(entries)
}

fn read_entry(handle: Handle, entry: *mut LDAPMessage) -> DirectoryEntry {
    let dn = unsafe {
        let ptr = ldap_get_dnW(handle.0, entry);
        if ptr.is_null() {
            String::new()
        } else {
            let dn = pwstr_to_str(ptr.0);
            ldap_memfree(PSTR(ptr.0.cast()));
            dn
        }
    };

    let mut attributes = HashMap::new();
    let mut ber = null_mut();
    let mut attr_name = unsafe { ldap_first_attributeW(handle.0, entry, &mut ber) };
    while !attr_name.is_null() {
        let name = pwstr_to_str(attr_name.0);
        let mut values = Vec::new();
        let raw = unsafe { ldap_get_values_lenW(handle.0, entry, attr_name) };
        if !raw.is_null() {
            for index in 0.. {
                let value = unsafe { *raw.offset(index) };
                if value.is_null() {
                    break;
                }
                let bytes = unsafe {
                    std::slice::from_raw_parts((*value).bv_val.0, (*value).bv_len as usize)
                };
                values.push(String::from_utf8_lossy(bytes).into_owned());
            }
            unsafe { ldap_value_free_len(raw) };
        }
        attributes.insert(name, values);
        // Each name returned by the attribute walk is owned by the caller.
        unsafe { ldap_memfree(PSTR(attr_name.0.cast())) };
        attr_name = unsafe { ldap_next_attributeW(handle.0, entry, ber) };
    }
    if !ber.is_null() {
        unsafe { ber_free(ber, 0) };
    }

    DirectoryEntry { dn, attributes }
}

fn str_to_wstr(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

fn pwstr_to_str(ptr: *const u16) -> String {
    let mut len = 0;
    unsafe {
        while *(ptr.add(len)) != 0 {
            len += 1;
        }
    }
    let slice = unsafe { std::slice::from_raw_parts(ptr, len) };
    String::from_utf16_lossy(slice)
}

fn ldap_error(operation: &str, code: u32) -> Error {
    let message = unsafe { ldap_err2stringW(code) };
    let message = if message.is_null() {
        format!("unknown error, code {code}")
    } else {
        pwstr_to_str(message.0)
    };
    Error::ldap(format!("{operation} failed: {message}"))
}
