//! Text Input Source Services bindings
//!
//! Raw FFI against the Carbon TIS API plus a `SourceDirectory`
//! implementation over it. Property values come back as unowned
//! CoreFoundation objects and are copied into plain Rust values before
//! leaving this module.

use std::ffi::c_void;

use core_foundation::array::CFArray;
use core_foundation::base::{Boolean, CFTypeRef, TCFType};
use core_foundation::boolean::{CFBoolean, CFBooleanRef};
use core_foundation::dictionary::{CFDictionary, CFDictionaryRef};
use core_foundation::string::{CFString, CFStringRef};
use tracing::warn;

use super::{ActivateError, InputSource, SourceDirectory};

type TISInputSourceRef = *const c_void;
type OSStatus = i32;

#[link(name = "Carbon", kind = "framework")]
extern "C" {
    static kTISPropertyInputSourceCategory: CFStringRef;
    static kTISCategoryKeyboardInputSource: CFStringRef;
    static kTISPropertyInputSourceID: CFStringRef;
    static kTISPropertyLocalizedName: CFStringRef;
    static kTISPropertyInputSourceIsSelectCapable: CFStringRef;

    fn TISCreateInputSourceList(
        properties: CFDictionaryRef,
        include_all_installed: Boolean,
    ) -> *const c_void;
    fn TISGetInputSourceProperty(source: TISInputSourceRef, key: CFStringRef) -> CFTypeRef;
    fn TISSelectInputSource(source: TISInputSourceRef) -> OSStatus;
}

/// `SourceDirectory` backed by Text Input Source Services
#[derive(Debug, Default)]
pub struct TisDirectory;

impl TisDirectory {
    pub fn new() -> Self {
        Self
    }
}

impl SourceDirectory for TisDirectory {
    fn list_selectable(&self) -> Vec<InputSource> {
        let Some(sources) = copy_keyboard_sources() else {
            warn!("TISCreateInputSourceList returned no keyboard sources");
            return Vec::new();
        };

        let mut result = Vec::new();
        for i in 0..sources.len() {
            let Some(source) = sources.get(i) else {
                continue;
            };
            let source = *source as TISInputSourceRef;

            if !is_select_capable(source) {
                continue;
            }

            let (Some(id), Some(localized_name)) = (
                string_property(source, unsafe { kTISPropertyInputSourceID }),
                string_property(source, unsafe { kTISPropertyLocalizedName }),
            ) else {
                continue;
            };

            result.push(InputSource {
                id,
                localized_name,
                selectable: true,
            });
        }
        result
    }

    fn activate(&self, target: &InputSource) -> Result<(), ActivateError> {
        let Some(sources) = copy_keyboard_sources() else {
            return Err(ActivateError::SourceGone {
                id: target.id.clone(),
            });
        };

        for i in 0..sources.len() {
            let Some(source) = sources.get(i) else {
                continue;
            };
            let source = *source as TISInputSourceRef;

            if !is_select_capable(source) {
                continue;
            }

            let matches = string_property(source, unsafe { kTISPropertyInputSourceID })
                .is_some_and(|id| id == target.id);
            if !matches {
                continue;
            }

            let status = unsafe { TISSelectInputSource(source) };
            if status != 0 {
                return Err(ActivateError::Refused { status });
            }
            return Ok(());
        }

        Err(ActivateError::SourceGone {
            id: target.id.clone(),
        })
    }
}

/// Enumerate keyboard-category input sources, freshly each call.
fn copy_keyboard_sources() -> Option<CFArray> {
    let conditions = unsafe {
        CFDictionary::from_CFType_pairs(&[(
            CFString::wrap_under_get_rule(kTISPropertyInputSourceCategory).as_CFType(),
            CFString::wrap_under_get_rule(kTISCategoryKeyboardInputSource).as_CFType(),
        )])
    };

    let raw = unsafe { TISCreateInputSourceList(conditions.as_concrete_TypeRef(), 0) };
    if raw.is_null() {
        return None;
    }
    // TISCreateInputSourceList follows the Create rule
    Some(unsafe { CFArray::wrap_under_create_rule(raw as _) })
}

fn string_property(source: TISInputSourceRef, key: CFStringRef) -> Option<String> {
    let value = unsafe { TISGetInputSourceProperty(source, key) };
    if value.is_null() {
        return None;
    }
    let s = unsafe { CFString::wrap_under_get_rule(value as CFStringRef) };
    Some(s.to_string())
}

/// Sources missing the select-capable property are kept; only an
/// explicit false (parent/grouping entries) excludes one.
fn is_select_capable(source: TISInputSourceRef) -> bool {
    let value = unsafe { TISGetInputSourceProperty(source, kTISPropertyInputSourceIsSelectCapable) };
    if value.is_null() {
        return true;
    }
    let selectable = unsafe { CFBoolean::wrap_under_get_rule(value as CFBooleanRef) };
    selectable.into()
}
