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

// EWMH window tracking. An "application" is every managed window
// sharing a WM_CLASS class, or matching one of the aliases of a
// known application.

use anyhow::Result;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::spawn;
use x11rb::connection::Connection as X11Connection;
use x11rb::protocol::xproto::{
    AtomEnum, ChangeWindowAttributesAux, ClientMessageEvent, ConnectionExt as X11ConnectionExt,
    EventMask, Window,
};
use x11rb::protocol::Event as X11Event;
use x11rb::rust_connection::RustConnection;
use super::{AppRef, HandlerId, WindowRef, WindowSystem};
use crate::events::KeepAboveEvent;
use crate::reconciler::Generation;

x11rb::atom_manager! {
    pub X11Atoms: X11AtomsCookie {
        _NET_CLIENT_LIST,
        _NET_WM_STATE,
        _NET_WM_STATE_ABOVE,
        _NET_WM_STATE_STICKY,
    }
}

const NET_WM_STATE_REMOVE: u32 = 0;
const NET_WM_STATE_ADD: u32 = 1;
/// Source indication: a normal application
const SOURCE_APPLICATION: u32 = 1;

/// An application registered up front, the X11 counterpart of an
/// installed desktop file. It can be looked up by any alias before
/// it has mapped a window.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KnownApp {
    aliases: Vec<String>,
}

impl KnownApp {
    /// The first alias names the application
    pub fn new<I, S>(aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            aliases: aliases.into_iter().map(Into::into).collect(),
        }
    }

    fn app(&self) -> Option<AppRef> {
        self.aliases.first().map(AppRef::new)
    }

    fn answers_to(&self, id: &str) -> bool {
        self.aliases.iter().any(|alias| alias == id)
    }

    /// Toolkits disagree on the case of WM_CLASS
    fn owns(&self, client: &Client) -> bool {
        self.aliases.iter().any(|alias| {
            alias.eq_ignore_ascii_case(&client.instance) || alias.eq_ignore_ascii_case(&client.class)
        })
    }
}

/// A managed window and its WM_CLASS
#[derive(Clone, Debug, PartialEq, Eq)]
struct Client {
    window: WindowRef,
    instance: String,
    class: String,
}

fn group_of(known: &[KnownApp], client: &Client) -> AppRef {
    known
        .iter()
        .filter(|app| app.owns(client))
        .find_map(KnownApp::app)
        .unwrap_or_else(|| AppRef::new(client.class.clone()))
}

fn lookup(known: &[KnownApp], clients: &[Client], id: &str) -> Option<AppRef> {
    if let Some(app) = known.iter().filter(|app| app.answers_to(id)).find_map(KnownApp::app) {
        return Some(app);
    }
    clients
        .iter()
        .find(|c| c.instance == id || c.class == id)
        .map(|c| group_of(known, c))
}

fn group_windows(known: &[KnownApp], clients: &[Client], app: &AppRef) -> Vec<WindowRef> {
    clients
        .iter()
        .filter(|c| group_of(known, c) == *app)
        .map(|c| c.window)
        .collect()
}

fn running(known: &[KnownApp], clients: &[Client]) -> Vec<AppRef> {
    let mut apps: Vec<AppRef> = Vec::new();
    for client in clients {
        let app = group_of(known, client);
        if !apps.contains(&app) {
            apps.push(app);
        }
    }
    apps
}

#[derive(Clone)]
struct X11State {
    connection: Arc<RustConnection>,
    root: Window,
    atoms: X11Atoms,
    known: Arc<Vec<KnownApp>>,
}

impl X11State {
    fn client_list(&self) -> Vec<Window> {
        let reply = match self
            .connection
            .get_property(false, self.root, self.atoms._NET_CLIENT_LIST, AtomEnum::WINDOW, 0, u32::MAX)
            .map_err(anyhow::Error::from)
            .and_then(|cookie| Ok(cookie.reply()?))
        {
            Ok(reply) => reply,
            Err(e) => {
                warn!("[X11] Failed to read _NET_CLIENT_LIST: {}", e);
                return Vec::new();
            }
        };

        let windows = match reply.value32() {
            Some(windows) => windows.collect(),
            None => Vec::new(),
        };
        windows
    }

    /// Managed windows with a usable WM_CLASS
    fn clients(&self) -> Vec<Client> {
        self.client_list()
            .into_iter()
            .filter_map(|w| {
                let (instance, class) = self.wm_class(w)?;
                Some(Client {
                    window: WindowRef(w),
                    instance,
                    class,
                })
            })
            .collect()
    }

    fn wm_class(&self, window: Window) -> Option<(String, String)> {
        let reply = self
            .connection
            .get_property(false, window, AtomEnum::WM_CLASS, AtomEnum::STRING, 0, 1024)
            .ok()?
            .reply()
            .ok()?;

        parse_wm_class(&reply.value)
    }

    fn app_windows(&self, app: &AppRef) -> Vec<WindowRef> {
        group_windows(&self.known, &self.clients(), app)
    }

    fn set_state(&self, window: WindowRef, property: u32, enable: bool) -> Result<()> {
        let action = if enable { NET_WM_STATE_ADD } else { NET_WM_STATE_REMOVE };
        let event = ClientMessageEvent::new(
            32,
            window.0,
            self.atoms._NET_WM_STATE,
            [action, property, 0, SOURCE_APPLICATION, 0],
        );
        self.connection
            .send_event(
                false,
                self.root,
                EventMask::SUBSTRUCTURE_REDIRECT | EventMask::SUBSTRUCTURE_NOTIFY,
                event,
            )?
            .check()?;
        self.connection.flush()?;
        Ok(())
    }
}

/// WM_CLASS format: "instance\0class\0"
fn parse_wm_class(value: &[u8]) -> Option<(String, String)> {
    let mut parts = value.split(|&b| b == 0);
    let instance = String::from_utf8(parts.next()?.to_vec()).ok()?;
    let class = match parts.next() {
        Some(class) if !class.is_empty() => String::from_utf8(class.to_vec()).ok()?,
        _ => instance.clone(),
    };
    if class.is_empty() {
        return None;
    }
    Some((instance, class))
}

struct Handler {
    app: AppRef,
    generation: Generation,
    last: Vec<WindowRef>,
}

type Handlers = Arc<Mutex<BTreeMap<HandlerId, Handler>>>;

pub struct X11Windows {
    state: X11State,
    handlers: Handlers,
    next_handler: u64,
}

impl X11Windows {
    pub fn new(display: Option<&str>, known: Vec<KnownApp>, tx: Sender<KeepAboveEvent>) -> Result<Self> {
        debug!("[X11] Connecting to display {:?}", display);
        let (connection, screen_num) = x11rb::connect(display)?;
        let root = connection.setup().roots[screen_num].root;
        let atoms = X11Atoms::new(&connection)?.reply()?;

        // The window manager updates _NET_CLIENT_LIST on the root
        // window whenever a client is mapped or unmapped
        let attrs = ChangeWindowAttributesAux::new().event_mask(EventMask::PROPERTY_CHANGE);
        connection.change_window_attributes(root, &attrs)?;
        connection.flush()?;

        let state = X11State {
            connection: Arc::new(connection),
            root,
            atoms,
            known: Arc::new(known),
        };
        let handlers = Handlers::default();

        let thread_state = state.clone();
        let thread_handlers = handlers.clone();
        spawn(move || Self::watch_client_list(thread_state, thread_handlers, tx));

        info!("[X11] Connected to display");
        Ok(Self {
            state,
            handlers,
            next_handler: 0,
        })
    }

    fn watch_client_list(state: X11State, handlers: Handlers, tx: Sender<KeepAboveEvent>) {
        loop {
            match state.connection.wait_for_event() {
                Ok(X11Event::PropertyNotify(e)) if e.atom == state.atoms._NET_CLIENT_LIST => {
                    for (id, handler) in handlers.lock().iter_mut() {
                        let current = state.app_windows(&handler.app);
                        if current == handler.last {
                            continue;
                        }
                        trace!("[X11] {} now has {} windows", handler.app, current.len());
                        handler.last = current;
                        let event = KeepAboveEvent::WindowsChanged {
                            app: handler.app.clone(),
                            handler: *id,
                            generation: handler.generation,
                        };
                        if tx.send(event).is_err() {
                            info!("[X11] Event loop is gone, exiting");
                            return;
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("[X11] Connection lost: {}", e);
                    return;
                }
            }
        }
    }
}

impl WindowSystem for X11Windows {
    fn lookup_app(&self, id: &str) -> Option<AppRef> {
        lookup(&self.state.known, &self.state.clients(), id)
    }

    fn running_apps(&self) -> Vec<AppRef> {
        running(&self.state.known, &self.state.clients())
    }

    fn windows(&self, app: &AppRef) -> Vec<WindowRef> {
        self.state.app_windows(app)
    }

    fn wm_class(&self, window: WindowRef) -> Option<String> {
        self.state.wm_class(window.0).map(|(_, class)| class)
    }

    fn set_always_on_top(&mut self, window: WindowRef, above: bool) -> Result<()> {
        trace!("[X11] {} above: {}", window, above);
        self.state.set_state(window, self.state.atoms._NET_WM_STATE_ABOVE, above)
    }

    fn set_sticky(&mut self, window: WindowRef, sticky: bool) -> Result<()> {
        trace!("[X11] {} sticky: {}", window, sticky);
        self.state.set_state(window, self.state.atoms._NET_WM_STATE_STICKY, sticky)
    }

    fn connect_windows_changed(&mut self, app: &AppRef, generation: Generation) -> Result<HandlerId> {
        self.next_handler += 1;
        let id = HandlerId(self.next_handler);
        let handler = Handler {
            app: app.clone(),
            generation,
            last: self.state.app_windows(app),
        };
        self.handlers.lock().insert(id, handler);
        Ok(id)
    }

    fn disconnect(&mut self, handler: HandlerId) {
        if self.handlers.lock().remove(&handler).is_none() {
            warn!("[X11] Disconnecting unknown {}", handler);
        }
    }
}
