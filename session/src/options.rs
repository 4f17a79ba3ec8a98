//! Options a session is negotiated under.
//!
//! The HTTP layer validates its payload into [`SessionOptions`] and hands
//! it to the registry. Compatibility, the test for whether a pooled
//! session can serve a new request, is strict field-wise equality,
//! because every field except `code` shapes either the spawned process or
//! the config file it was started with.

use std::collections::BTreeMap;

use serde::Deserialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionOptions {
    /// Target Python version for the config file, e.g. `"3.12"`.
    pub python_version: Option<String>,
    /// Target platform for the config file, e.g. `"All"` or `"Linux"`.
    pub python_platform: Option<String>,
    /// Exact pyright version to run; `None` means "latest".
    pub pyright_version: Option<String>,
    /// Only `"strict"` has an effect; anything else keeps pyright's default.
    pub type_checking_mode: Option<String>,
    /// Boolean pyright config settings merged into the config file verbatim.
    pub config_overrides: BTreeMap<String, bool>,
    /// BCP 47 locale for analyzer messages.
    pub locale: Option<String>,
    /// Initial document text, used only to warm the analyzer up after
    /// create or reuse. Never part of compatibility.
    pub code: Option<String>,
}

impl SessionOptions {
    /// Whether a session started under `self` can serve a request asking
    /// for `other`. Every field must match exactly, including the full
    /// override map; `code` is transient and excluded.
    #[must_use]
    pub fn is_compatible_with(&self, other: &Self) -> bool {
        self.python_version == other.python_version
            && self.python_platform == other.python_platform
            && self.pyright_version == other.pyright_version
            && self.type_checking_mode == other.type_checking_mode
            && self.locale == other.locale
            && self.config_overrides == other.config_overrides
    }
}
