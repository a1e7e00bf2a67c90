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

// Every watch, call and subscription gets a thread which reports
// back through the event channel. Calls use the blocking API, signal
// streams are followed asynchronously so they can be aborted.

use anyhow::Result;
use futures_util::future::{AbortHandle, Abortable, Aborted};
use futures_util::{pin_mut, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{spawn, JoinHandle};
use std::time::Duration;
use zbus::blocking::{Connection, Proxy, ProxyBuilder};
use zbus::fdo::{DBusProxy, PropertiesProxy};
use zbus::names::BusName;
use zbus::zvariant::{OwnedValue, Value};
use zbus::{CacheProperties, MethodFlags};
use super::{
    BusConnection, ConnectionId, PropertyValue, RemoteCall, SessionBus, SignalId, WatchId,
    ALLOW_KEEP_ABOVE, BUS_NAME, EXTERNAL_INTERFACE, KEEP_ABOVE, OBJECT_PATH,
    PROPERTIES_INTERFACE,
};
use crate::events::KeepAboveEvent;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Aborting a worker wakes it up and drops the signal stream it was
/// following, which removes its match rule from the bus.
type Cancel = AbortHandle;

/// Run `work` on its own thread until it finishes or is aborted
fn spawn_worker<F>(what: String, work: F) -> (Cancel, JoinHandle<()>)
where
    F: Future<Output = ()> + Send + 'static,
{
    let (cancel, registration) = AbortHandle::new_pair();
    let worker = spawn(move || match zbus::block_on(Abortable::new(work, registration)) {
        Ok(()) => trace!("{} finished", what),
        Err(Aborted) => trace!("{} cancelled", what),
    });
    (cancel, worker)
}

/// What to report when a NameOwnerChanged moves the name to `new`,
/// given the owner reported last. A signal racing the initial
/// GetNameOwner repeats an owner already reported and is skipped.
/// A hand-over is reported as the old owner leaving first.
fn owner_transitions(reported: Option<&str>, new: Option<&str>) -> Vec<Option<String>> {
    match (reported, new) {
        (reported, new) if reported == new => Vec::new(),
        (Some(_), Some(new)) => vec![None, Some(new.to_string())],
        (_, new) => vec![new.map(str::to_string)],
    }
}

fn report_owner(
    tx: &Sender<KeepAboveEvent>,
    connection: &ZbusConnection,
    watch: WatchId,
    owner: Option<String>,
) -> bool {
    let event = match owner {
        Some(owner) => KeepAboveEvent::NameAppeared {
            watch,
            owner,
            connection: Arc::new(connection.clone()),
        },
        None => KeepAboveEvent::NameVanished { watch },
    };
    tx.send(event).is_ok()
}

pub struct ZbusSession {
    tx: Sender<KeepAboveEvent>,
    timeout: Option<Duration>,
    connection: Option<ZbusConnection>,
    watches: HashMap<WatchId, Cancel>,
}

impl ZbusSession {
    pub fn new(tx: Sender<KeepAboveEvent>, timeout: Option<Duration>) -> Self {
        Self {
            tx,
            timeout,
            connection: None,
            watches: HashMap::new(),
        }
    }

    fn connection(&mut self) -> Result<ZbusConnection> {
        if let Some(c) = &self.connection {
            return Ok(c.clone());
        }

        // Requires DBUS_SESSION_BUS_ADDRESS to be set
        debug!("Connecting to session bus");
        let conn = match Connection::session() {
            Ok(c) => c,
            Err(e) => {
                bail!("Failed to connect to DBUS session bus, is DBUS_SESSION_BUS_ADDRESS set? {}", e);
            }
        };
        info!("DBUS: connected to session bus as {:?}", conn.unique_name());

        let c = ZbusConnection {
            id: ConnectionId(next_id()),
            conn,
            tx: self.tx.clone(),
            timeout: self.timeout,
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
        };
        self.connection = Some(c.clone());
        Ok(c)
    }
}

impl SessionBus for ZbusSession {
    fn watch_name(&mut self, name: &str) -> Result<WatchId> {
        let connection = self.connection()?;
        let watch = WatchId(next_id());
        let name = name.to_string();

        // Subscribe before asking for the owner so no change can slip
        // in between.
        let conn = connection.conn.inner().clone();
        let (dbus, changes) = zbus::block_on(async {
            let dbus = DBusProxy::new(&conn).await?;
            let changes = dbus
                .receive_name_owner_changed_with_args(&[(0, name.as_str())])
                .await?;
            Ok::<_, zbus::Error>((dbus, changes))
        })?;

        let tx = self.tx.clone();
        let (cancel, _) = spawn_worker(format!("Name watch {}", watch), async move {
            let owner = match BusName::try_from(name.as_str()) {
                Ok(bus_name) => dbus.get_name_owner(bus_name).await.ok().map(|o| o.to_string()),
                Err(_) => None,
            };
            let mut reported = owner.clone();
            if !report_owner(&tx, &connection, watch, owner) {
                return;
            }

            pin_mut!(changes);
            while let Some(signal) = changes.next().await {
                let args = match signal.args() {
                    Ok(args) => args,
                    Err(e) => {
                        warn!("Failed to parse NameOwnerChanged: {}", e);
                        continue;
                    }
                };
                let old_owner = (**args.old_owner()).as_ref().map(|o| o.to_string());
                let new_owner = (**args.new_owner()).as_ref().map(|o| o.to_string());
                trace!("{} owner {:?} -> {:?}", name, old_owner, new_owner);

                for owner in owner_transitions(reported.as_deref(), new_owner.as_deref()) {
                    reported = owner.clone();
                    if !report_owner(&tx, &connection, watch, owner) {
                        return;
                    }
                }
            }
        });

        self.watches.insert(watch, cancel);
        Ok(watch)
    }

    fn unwatch_name(&mut self, id: WatchId) {
        match self.watches.remove(&id) {
            Some(cancel) => cancel.abort(),
            None => warn!("Unwatching unknown {}", id),
        }
    }
}

/// Cheap to clone, clones share the bus connection and subscriptions
#[derive(Clone)]
pub struct ZbusConnection {
    id: ConnectionId,
    conn: Connection,
    tx: Sender<KeepAboveEvent>,
    timeout: Option<Duration>,
    subscriptions: Arc<Mutex<HashMap<SignalId, Cancel>>>,
}

impl fmt::Debug for ZbusConnection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ZbusConnection")
            .field("id", &self.id)
            .field("unique_name", &self.conn.unique_name())
            .finish()
    }
}

impl ZbusConnection {
    fn proxy(&self, interface: &'static str) -> Result<Proxy<'static>> {
        Ok(ProxyBuilder::<Proxy<'static>>::new_bare(&self.conn)
            .destination(BUS_NAME)?
            .path(OBJECT_PATH)?
            .interface(interface)?
            .cache_properties(CacheProperties::No)
            .build()?)
    }

    fn allow_keep_above(&self) -> Result<()> {
        self.proxy(EXTERNAL_INTERFACE)?.call_with_flags::<_, _, ()>(
            ALLOW_KEEP_ABOVE,
            MethodFlags::NoAutoStart.into(),
            &(),
        )?;
        Ok(())
    }

    fn get_keep_above(&self) -> Result<PropertyValue> {
        let reply = self.proxy(PROPERTIES_INTERFACE)?.call_with_flags::<_, _, OwnedValue>(
            "Get",
            MethodFlags::NoAutoStart.into(),
            &(EXTERNAL_INTERFACE, KEEP_ABOVE),
        )?;
        match reply {
            Some(value) => Ok(property_value(&value)),
            None => Err(anyhow!("Get returned no value")),
        }
    }

    /// Run `f` on its own thread, hand the result to `done` unless
    /// it takes longer than the configured timeout.
    fn spawn_call<T, F, D>(&self, call: RemoteCall, f: F, done: D)
    where
        T: Send + 'static,
        F: FnOnce(&ZbusConnection) -> Result<T> + Send + 'static,
        D: FnOnce(Result<T>) -> KeepAboveEvent + Send + 'static,
    {
        let timeout = self.timeout;
        let tx = self.tx.clone();
        let (result_tx, result_rx) = channel();

        let this = self.clone();
        spawn(move || {
            let _ = result_tx.send(f(&this));
        });

        spawn(move || {
            let result = match timeout {
                Some(timeout) => match result_rx.recv_timeout(timeout) {
                    Ok(result) => result,
                    Err(RecvTimeoutError::Timeout) => {
                        Err(anyhow!("{} timed out after {}s", call, timeout.as_secs()))
                    }
                    Err(RecvTimeoutError::Disconnected) => Err(anyhow!("{} was dropped", call)),
                },
                None => result_rx
                    .recv()
                    .unwrap_or_else(|_| Err(anyhow!("{} was dropped", call))),
            };
            if tx.send(done(result)).is_err() {
                trace!("Event loop is gone, dropping {} reply", call);
            }
        });
    }
}

impl BusConnection for ZbusConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn call(&self, call: RemoteCall) {
        trace!("Calling {} on {}", call, BUS_NAME);
        match call {
            RemoteCall::AllowKeepAbove => self.spawn_call(
                call,
                |c| c.allow_keep_above(),
                KeepAboveEvent::AllowKeepAboveReturned,
            ),
            RemoteCall::GetKeepAbove => self.spawn_call(
                call,
                |c| c.get_keep_above(),
                KeepAboveEvent::KeepAboveRead,
            ),
        }
    }

    fn subscribe_properties_changed(&self) -> Result<SignalId> {
        let id = SignalId(next_id());

        let conn = self.conn.inner().clone();
        let (proxy, signals) = zbus::block_on(async {
            let proxy = PropertiesProxy::builder(&conn)
                .destination(BUS_NAME)?
                .path(OBJECT_PATH)?
                .build()
                .await?;
            let signals = proxy.receive_properties_changed().await?;
            Ok::<_, zbus::Error>((proxy, signals))
        })?;

        let tx = self.tx.clone();
        let (cancel, _) = spawn_worker(format!("Subscription {}", id), async move {
            // Keeps the match rule owner alive as long as the stream
            let _proxy = proxy;
            pin_mut!(signals);
            while let Some(signal) = signals.next().await {
                let args = match signal.args() {
                    Ok(args) => args,
                    Err(e) => {
                        warn!("Failed to parse PropertiesChanged: {}", e);
                        continue;
                    }
                };
                let changed = args
                    .changed_properties()
                    .iter()
                    .map(|(k, v)| (k.to_string(), property_value(v)))
                    .collect();
                let event = KeepAboveEvent::PropertiesChanged {
                    subscription: id,
                    interface: args.interface_name().to_string(),
                    changed,
                };
                if tx.send(event).is_err() {
                    return;
                }
            }
        });

        self.subscriptions.lock().insert(id, cancel);
        Ok(id)
    }

    fn unsubscribe(&self, id: SignalId) {
        match self.subscriptions.lock().remove(&id) {
            Some(cancel) => cancel.abort(),
            None => warn!("Unsubscribing unknown {}", id),
        }
    }
}

fn property_value(value: &Value) -> PropertyValue {
    match value {
        Value::Bool(b) => PropertyValue::Bool(*b),
        // Variants can nest
        Value::Value(inner) => property_value(inner),
        other => PropertyValue::Other(other.value_signature().to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn converts_values() {
        assert_eq!(property_value(&Value::Bool(true)), PropertyValue::Bool(true));
        assert_eq!(
            property_value(&Value::Value(Box::new(Value::Bool(false)))),
            PropertyValue::Bool(false)
        );
        assert_eq!(property_value(&Value::U32(3)), PropertyValue::Other("u".into()));
        assert_eq!(property_value(&Value::from("yes")), PropertyValue::Other("s".into()));
    }

    #[test]
    fn owner_reports() {
        let none: Vec<Option<String>> = vec![];
        // Already reported by GetNameOwner
        assert_eq!(owner_transitions(Some(":1.5"), Some(":1.5")), none);
        assert_eq!(owner_transitions(None, None), none);

        assert_eq!(owner_transitions(None, Some(":1.5")), vec![Some(":1.5".to_string())]);
        assert_eq!(owner_transitions(Some(":1.5"), None), vec![None]);
        assert_eq!(
            owner_transitions(Some(":1.5"), Some(":1.9")),
            vec![None, Some(":1.9".to_string())]
        );
    }

    #[test]
    fn aborted_worker_exits_and_drops_its_stream() {
        let held = Arc::new(());
        let inside = held.clone();
        let (cancel, worker) = spawn_worker("idle stream".to_string(), async move {
            let _inside = inside;
            let mut stream = futures_util::stream::pending::<()>();
            while stream.next().await.is_some() {}
        });

        cancel.abort();
        worker.join().unwrap();
        assert_eq!(Arc::strong_count(&held), 1);
    }

    #[test]
    fn finished_worker_exits() {
        let (cancel, worker) = spawn_worker("one shot".to_string(), async {});
        worker.join().unwrap();
        // Too late to matter
        cancel.abort();
    }
}
