/*
* KeepAbove session daemon
* Copyright (C) 2022 Caleb Connolly <caleb@connolly.tech>
*
* This program is free software; you can redistribute it and/or modify
* it under the terms of the GNU General Public License as published by
* the Free Software Foundation; either version 2 of the License, or
* (at your option) any later version.
*
* This program is distributed in the hope that it will be useful,
* but WITHOUT ANY WARRANTY; without even the implied warranty of
* MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
* GNU General Public License for more details.
*
* You should have received a copy of the GNU General Public License along
* with this program; if not, write to the Free Software Foundation, Inc.,
* 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.
*/

// Session bus seams. The core only ever talks to these traits, the
// zbus backed implementation lives in `session`.

use anyhow::Result;
use std::fmt;
use strum_macros::Display;

mod session;

pub use session::{ZbusConnection, ZbusSession};

/// Well-known name owned by Live Captions
pub const BUS_NAME: &str = "net.sapples.LiveCaptions";
pub const OBJECT_PATH: &str = "/net/sapples/LiveCaptions/External";
pub const EXTERNAL_INTERFACE: &str = "net.sapples.LiveCaptions.External";
pub const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";

pub const ALLOW_KEEP_ABOVE: &str = "AllowKeepAbove";
pub const KEEP_ABOVE: &str = "KeepAbove";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SignalId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

impl fmt::Display for WatchId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "watch#{}", self.0)
    }
}

impl fmt::Display for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "signal#{}", self.0)
    }
}

/// The remote calls issued against the Live Captions object.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum RemoteCall {
    /// `net.sapples.LiveCaptions.External.AllowKeepAbove()`, reply ignored
    AllowKeepAbove,
    /// `org.freedesktop.DBus.Properties.Get(EXTERNAL_INTERFACE, "KeepAbove")`
    GetKeepAbove,
}

/// A bus value reduced to what we care about. Anything other
/// than a boolean only keeps its signature for logging.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Bool(bool),
    Other(String),
}

impl PropertyValue {
    pub fn as_bool(&self) -> Result<bool> {
        match self {
            PropertyValue::Bool(b) => Ok(*b),
            PropertyValue::Other(signature) => {
                Err(anyhow!("Expected a boolean, got a value of type '{}'", signature))
            }
        }
    }
}

/// A live connection handed out with every appeared notification.
///
/// Calls are asynchronous: `call` returns as soon as the message is
/// queued and the reply is delivered later on the event queue as
/// `AllowKeepAboveReturned` or `KeepAboveRead`. Subscriptions deliver
/// `PropertiesChanged` events tagged with the returned `SignalId`.
pub trait BusConnection: fmt::Debug + Send + Sync {
    fn id(&self) -> ConnectionId;

    fn call(&self, call: RemoteCall);

    /// Subscribe to `PropertiesChanged` emitted by `BUS_NAME` on `OBJECT_PATH`
    fn subscribe_properties_changed(&self) -> Result<SignalId>;

    fn unsubscribe(&self, id: SignalId);
}

/// Watches a well-known name on the session bus. The watcher reports
/// `NameAppeared` (with a connection) or `NameVanished` once the
/// current state is known and again on every change.
pub trait SessionBus {
    fn watch_name(&mut self, name: &str) -> Result<WatchId>;

    fn unwatch_name(&mut self, id: WatchId);
}
