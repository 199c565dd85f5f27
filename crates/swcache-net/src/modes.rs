//! Fetch request modes.
//!
//! Each mode renders to the same lower-case token the Fetch standard uses,
//! which is also the form persisted in serialized requests.

use std::fmt;
use std::str::FromStr;

use crate::NetError;

macro_rules! fetch_mode {
    (
        $(#[$meta:meta])*
        $name:ident { $( $(#[$vmeta:meta])* $variant:ident => $token:literal ),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $( $(#[$vmeta])* $variant, )+
        }

        impl $name {
            /// Token as used by the Fetch standard.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $name::$variant => $token, )+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = NetError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $token => Ok($name::$variant), )+
                    other => Err(NetError::InvalidMode(format!(
                        "{}: {}",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

fetch_mode! {
    /// Request mode.
    RequestMode {
        /// Top-level page load.
        Navigate => "navigate",
        SameOrigin => "same-origin",
        NoCors => "no-cors",
        Cors => "cors",
    }
}

fetch_mode! {
    /// Credentials mode for requests.
    CredentialsMode {
        /// Never send cookies.
        Omit => "omit",
        /// Send cookies only for same-origin requests.
        SameOrigin => "same-origin",
        /// Always send cookies.
        Include => "include",
    }
}

fetch_mode! {
    /// HTTP cache mode.
    CacheMode {
        Default => "default",
        NoStore => "no-store",
        Reload => "reload",
        NoCache => "no-cache",
        ForceCache => "force-cache",
        OnlyIfCached => "only-if-cached",
    }
}

fetch_mode! {
    /// Redirect handling.
    RedirectMode {
        Follow => "follow",
        Error => "error",
        Manual => "manual",
    }
}

impl Default for RequestMode {
    fn default() -> Self {
        Self::Cors
    }
}

impl Default for CredentialsMode {
    fn default() -> Self {
        Self::SameOrigin
    }
}

impl Default for CacheMode {
    fn default() -> Self {
        Self::Default
    }
}

impl Default for RedirectMode {
    fn default() -> Self {
        Self::Follow
    }
}
