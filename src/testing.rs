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

// In-memory stand-ins for the session bus and the window system.
// Nothing is delivered on its own, tests feed the events back in.

use anyhow::Result;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use crate::bus::{BusConnection, ConnectionId, RemoteCall, SessionBus, SignalId, WatchId};
use crate::events::KeepAboveEvent;
use crate::reconciler::Generation;
use crate::windows::{AppRef, HandlerId, WindowRef, WindowSystem};

#[derive(Debug, Default)]
struct ConnectionLog {
    calls: Vec<RemoteCall>,
    active: BTreeSet<SignalId>,
    unsubscribed: Vec<SignalId>,
    next_signal: u64,
    fail_subscriptions: bool,
}

#[derive(Debug)]
pub struct FakeConnection {
    id: ConnectionId,
    log: Mutex<ConnectionLog>,
}

impl FakeConnection {
    pub fn new(id: u64) -> Arc<Self> {
        Arc::new(Self {
            id: ConnectionId(id),
            log: Mutex::new(ConnectionLog::default()),
        })
    }

    pub fn fail_subscriptions(&self) {
        self.log.lock().fail_subscriptions = true;
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.log.lock().calls.clone()
    }

    pub fn active_subscriptions(&self) -> Vec<SignalId> {
        self.log.lock().active.iter().copied().collect()
    }

    pub fn unsubscribed(&self) -> Vec<SignalId> {
        self.log.lock().unsubscribed.clone()
    }
}

impl BusConnection for FakeConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn call(&self, call: RemoteCall) {
        self.log.lock().calls.push(call);
    }

    fn subscribe_properties_changed(&self) -> Result<SignalId> {
        let mut log = self.log.lock();
        if log.fail_subscriptions {
            bail!("AddMatch failed");
        }
        log.next_signal += 1;
        let id = SignalId(log.next_signal);
        log.active.insert(id);
        Ok(id)
    }

    fn unsubscribe(&self, id: SignalId) {
        let mut log = self.log.lock();
        assert!(log.active.remove(&id), "{} unsubscribed twice or never subscribed", id);
        log.unsubscribed.push(id);
    }
}

#[derive(Debug, Default)]
struct BusState {
    names: Vec<String>,
    active: BTreeSet<WatchId>,
    started: usize,
    next_watch: u64,
}

#[derive(Clone)]
pub struct FakeBus {
    state: Arc<Mutex<BusState>>,
    connection: Arc<FakeConnection>,
}

impl FakeBus {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BusState::default())),
            connection: FakeConnection::new(1),
        }
    }

    pub fn connection(&self) -> Arc<FakeConnection> {
        self.connection.clone()
    }

    pub fn watched_names(&self) -> Vec<String> {
        self.state.lock().names.clone()
    }

    pub fn watches_started(&self) -> usize {
        self.state.lock().started
    }

    pub fn active_watches(&self) -> usize {
        self.state.lock().active.len()
    }

    fn current_watch(&self) -> WatchId {
        WatchId(self.state.lock().next_watch)
    }

    pub fn appeared(&self) -> KeepAboveEvent {
        KeepAboveEvent::NameAppeared {
            watch: self.current_watch(),
            owner: ":1.42".into(),
            connection: self.connection.clone(),
        }
    }

    pub fn vanished(&self) -> KeepAboveEvent {
        KeepAboveEvent::NameVanished {
            watch: self.current_watch(),
        }
    }
}

impl SessionBus for FakeBus {
    fn watch_name(&mut self, name: &str) -> Result<WatchId> {
        let mut state = self.state.lock();
        state.next_watch += 1;
        state.started += 1;
        let id = WatchId(state.next_watch);
        state.active.insert(id);
        state.names.push(name.to_string());
        Ok(id)
    }

    fn unwatch_name(&mut self, id: WatchId) {
        assert!(self.state.lock().active.remove(&id), "{} unwatched twice", id);
    }
}

#[derive(Debug, Default)]
struct WindowsState {
    apps: Vec<(AppRef, Vec<WindowRef>)>,
    classes: HashMap<WindowRef, String>,
    /// (always on top, sticky)
    state: HashMap<WindowRef, (bool, bool)>,
    handlers: BTreeMap<HandlerId, (AppRef, Generation)>,
    fired: Vec<(AppRef, HandlerId, Generation)>,
    mutations: usize,
    next_window: u32,
    next_handler: u64,
}

impl WindowsState {
    fn new_window(&mut self, class: &str) -> WindowRef {
        self.next_window += 1;
        let w = WindowRef(self.next_window);
        self.classes.insert(w, class.to_string());
        self.state.insert(w, (false, false));
        w
    }
}

#[derive(Clone, Default)]
pub struct FakeWindows {
    state: Arc<Mutex<WindowsState>>,
}

impl FakeWindows {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a running app, one window per entry in `classes`
    pub fn add_app(&self, id: &str, classes: &[&str]) -> AppRef {
        let mut state = self.state.lock();
        let app = AppRef::new(id);
        let windows = classes.iter().map(|c| state.new_window(c)).collect();
        state.apps.push((app.clone(), windows));
        app
    }

    pub fn remove_app(&self, app: &AppRef) {
        self.state.lock().apps.retain(|(a, _)| a != app);
    }

    /// Open a new window and queue windows-changed for every handler on `app`
    pub fn add_window(&self, app: &AppRef, class: &str) -> WindowRef {
        let mut state = self.state.lock();
        let w = state.new_window(class);
        if let Some((_, windows)) = state.apps.iter_mut().find(|(a, _)| a == app) {
            windows.push(w);
        }
        let fired: Vec<_> = state
            .handlers
            .iter()
            .filter(|(_, (a, _))| a == app)
            .map(|(h, (a, g))| (a.clone(), *h, *g))
            .collect();
        state.fired.extend(fired);
        w
    }

    pub fn take_fired(&self) -> Vec<(AppRef, HandlerId, Generation)> {
        std::mem::take(&mut self.state.lock().fired)
    }

    pub fn state(&self, window: WindowRef) -> (bool, bool) {
        self.state.lock().state.get(&window).copied().unwrap_or_default()
    }

    pub fn mutations(&self) -> usize {
        self.state.lock().mutations
    }

    pub fn connected_handlers(&self) -> Vec<HandlerId> {
        self.state.lock().handlers.keys().copied().collect()
    }
}

impl WindowSystem for FakeWindows {
    fn lookup_app(&self, id: &str) -> Option<AppRef> {
        self.state
            .lock()
            .apps
            .iter()
            .find(|(a, _)| a.id() == id)
            .map(|(a, _)| a.clone())
    }

    fn running_apps(&self) -> Vec<AppRef> {
        self.state.lock().apps.iter().map(|(a, _)| a.clone()).collect()
    }

    fn windows(&self, app: &AppRef) -> Vec<WindowRef> {
        self.state
            .lock()
            .apps
            .iter()
            .find(|(a, _)| a == app)
            .map(|(_, w)| w.clone())
            .unwrap_or_default()
    }

    fn wm_class(&self, window: WindowRef) -> Option<String> {
        self.state.lock().classes.get(&window).cloned()
    }

    fn set_always_on_top(&mut self, window: WindowRef, above: bool) -> Result<()> {
        let mut state = self.state.lock();
        state.mutations += 1;
        match state.state.get_mut(&window) {
            Some(s) => s.0 = above,
            None => bail!("No such window {}", window),
        }
        Ok(())
    }

    fn set_sticky(&mut self, window: WindowRef, sticky: bool) -> Result<()> {
        let mut state = self.state.lock();
        state.mutations += 1;
        match state.state.get_mut(&window) {
            Some(s) => s.1 = sticky,
            None => bail!("No such window {}", window),
        }
        Ok(())
    }

    fn connect_windows_changed(&mut self, app: &AppRef, generation: Generation) -> Result<HandlerId> {
        let mut state = self.state.lock();
        state.next_handler += 1;
        let id = HandlerId(state.next_handler);
        state.handlers.insert(id, (app.clone(), generation));
        Ok(id)
    }

    fn disconnect(&mut self, handler: HandlerId) {
        assert!(
            self.state.lock().handlers.remove(&handler).is_some(),
            "{} disconnected twice",
            handler
        );
    }
}
