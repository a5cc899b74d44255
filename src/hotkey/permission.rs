//! Accessibility-permission checks
//!
//! The event tap cannot be created until the user grants this process
//! accessibility access in System Settings; the OS call fails silently
//! otherwise.

use core_foundation::base::TCFType;
use core_foundation::boolean::CFBoolean;
use core_foundation::dictionary::{CFDictionary, CFDictionaryRef};
use core_foundation::string::{CFString, CFStringRef};

#[link(name = "ApplicationServices", kind = "framework")]
extern "C" {
    static kAXTrustedCheckOptionPrompt: CFStringRef;

    fn AXIsProcessTrusted() -> bool;
    fn AXIsProcessTrustedWithOptions(options: CFDictionaryRef) -> bool;
}

/// Whether the process currently holds accessibility access.
pub fn is_trusted() -> bool {
    unsafe { AXIsProcessTrusted() }
}

/// Check access and ask the OS to show its grant prompt if missing.
/// The prompt appears at most once per process by OS policy.
pub fn request_trust() -> bool {
    let options = unsafe {
        CFDictionary::from_CFType_pairs(&[(
            CFString::wrap_under_get_rule(kAXTrustedCheckOptionPrompt).as_CFType(),
            CFBoolean::true_value().as_CFType(),
        )])
    };
    unsafe { AXIsProcessTrustedWithOptions(options.as_concrete_TypeRef()) }
}
