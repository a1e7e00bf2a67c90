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

// Keeps track of the KeepAbove property of Live Captions: probe,
// initial read, then follow PropertiesChanged.

use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use crate::bus::{BusConnection, PropertyValue, RemoteCall, SignalId, KEEP_ABOVE};

/// A PropertiesChanged subscription, tied to the connection that made it.
/// Consumed by `unsubscribe`, so it can only be released once.
#[derive(Debug)]
pub struct PropertySubscription {
    connection: Arc<dyn BusConnection>,
    id: SignalId,
}

impl PropertySubscription {
    pub fn id(&self) -> SignalId {
        self.id
    }

    pub fn unsubscribe(self) {
        debug!("Unsubscribing {} on connection {:?}", self.id, self.connection.id());
        self.connection.unsubscribe(self.id);
    }
}

/// Kick off the probe and the initial read, then subscribe to changes.
/// Replies come back through the event queue. A failed subscription
/// is logged, the initial read still goes ahead.
pub fn name_appeared(connection: Arc<dyn BusConnection>) -> Option<PropertySubscription> {
    connection.call(RemoteCall::AllowKeepAbove);
    connection.call(RemoteCall::GetKeepAbove);

    match connection.subscribe_properties_changed() {
        Ok(id) => {
            debug!("Subscribed to PropertiesChanged as {}", id);
            Some(PropertySubscription { connection, id })
        }
        Err(e) => {
            error!("Failed to subscribe to PropertiesChanged: {}", e);
            None
        }
    }
}

/// Fire and forget, a failure is only worth a log line.
pub fn allow_keep_above_returned(result: Result<()>) {
    match result {
        Ok(()) => trace!("{} succeeded", RemoteCall::AllowKeepAbove),
        Err(e) => error!("{} failed: {}", RemoteCall::AllowKeepAbove, e),
    }
}

/// The value to reconcile to after the initial read, if any
pub fn keep_above_read(result: Result<PropertyValue>) -> Option<bool> {
    match result.and_then(|value| value.as_bool()) {
        Ok(value) => Some(value),
        Err(e) => {
            error!("Failed to read {}: {}", KEEP_ABOVE, e);
            None
        }
    }
}

/// The new value carried by a PropertiesChanged payload, if it has one
pub fn keep_above_changed(changed: &HashMap<String, PropertyValue>) -> Option<bool> {
    let value = changed.get(KEEP_ABOVE)?;
    match value.as_bool() {
        Ok(value) => Some(value),
        Err(e) => {
            trace!("Ignoring {} change: {}", KEEP_ABOVE, e);
            None
        }
    }
}
