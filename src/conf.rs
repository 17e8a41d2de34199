/*
 * mualib - configuration types.
 *
 * This file is part of mualib.
 *
 * mualib is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * mualib is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with mualib. If not, see <http://www.gnu.org/licenses/>.
 */

//! Account settings consumed by the backends.
//!
//! Loading the configuration *file* is the embedding application's business;
//! this module only defines the settings each account constructor validates.

use indexmap::IndexMap;
use serde_derive::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct AccountSettings {
    pub name: String,
    /// Backend tag, `"mbox"` or `"imap"`.
    pub kind: String,
    /// Local spool path for mbox accounts.
    #[serde(default)]
    pub root_mailbox: String,
    /// Backend-specific fields, validated by the backend constructor.
    #[serde(default)]
    pub extra: IndexMap<String, String>,
}

/// Fetch a backend field out of [`AccountSettings::extra`], with the settings
/// name in the error so the user knows which account to fix. The two-argument
/// form parses with `FromStr` and falls back to a default.
macro_rules! get_conf_val {
    ($s:ident[$var:literal]) => {
        $s.extra.get($var).ok_or_else(|| {
            crate::error::Error::new(format!(
                "Configuration error ({}): the `{}` backend requires the field `{}` set",
                $s.name.as_str(),
                $s.kind.as_str(),
                $var
            ))
            .set_kind(crate::error::ErrorKind::Configuration)
        })
    };
    ($s:ident[$var:literal], $default:expr) => {
        $s.extra
            .get($var)
            .map(|v| {
                <_ as std::str::FromStr>::from_str(v).map_err(|e| {
                    crate::error::Error::new(format!(
                        "Configuration error ({}): invalid value for field `{}`: {}\n{}",
                        $s.name.as_str(),
                        $var,
                        v,
                        e
                    ))
                    .set_kind(crate::error::ErrorKind::Configuration)
                })
            })
            .unwrap_or_else(|| Ok($default))
    };
}

pub(crate) use get_conf_val;
