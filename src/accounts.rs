/*
 * mualib - accounts module.
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

//! Accounts: the capability interface over local and remote mailbox
//! collections, and the registry that builds one from settings.

use std::{fmt, sync::Arc};

use crate::{
    conf::AccountSettings,
    error::{Error, ErrorKind, Result},
    imap::ImapAccount,
    mailbox::Mailbox,
    mbox::MboxAccount,
    EngineContext,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AccountKind {
    LocalMbox,
    Imap,
}

impl fmt::Display for AccountKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::LocalMbox => "local",
                Self::Imap => "imap",
            }
        )
    }
}

/// An email account: a named, ordered collection of mailboxes behind a
/// possibly remote transport.
///
/// `connect`/`disconnect` are no-ops for purely local accounts.
pub trait Account: fmt::Debug + Send {
    fn name(&self) -> &str;
    fn kind(&self) -> AccountKind;

    fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        Ok(())
    }

    /// Obtain the account's mailboxes, possibly doing filesystem or network
    /// I/O, and cache them. The result is in specials-first order.
    fn get_mboxes(&mut self) -> Result<&mut [Box<dyn Mailbox>]>;

    /// The mailboxes previously obtained by [`Account::get_mboxes`].
    fn mboxes(&mut self) -> &mut [Box<dyn Mailbox>];
}

/// Build an account from its settings, dispatching on the kind tag.
pub fn from_settings(
    s: &AccountSettings,
    ctx: Arc<EngineContext>,
) -> Result<Box<dyn Account>> {
    match s.kind.as_str() {
        "mbox" => Ok(Box::new(MboxAccount::new(s, ctx)?)),
        "imap" => Ok(Box::new(ImapAccount::new(s, ctx)?)),
        other => Err(Error::new(format!(
            "Configuration error ({}): `{}` is not a valid account kind, expected `mbox` or `imap`",
            s.name, other
        ))
        .set_kind(ErrorKind::Configuration)),
    }
}
