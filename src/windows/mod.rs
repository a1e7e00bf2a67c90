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

// The window tracking code is a thin layer over whatever
// manages the windows, we only need a handful of operations.

use anyhow::Result;
use std::fmt;
use crate::reconciler::Generation;

mod x11;

pub use x11::{KnownApp, X11Windows};

/// Opaque reference to a running application, as handed out by
/// the window system.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AppRef {
    id: String,
}

impl AppRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for AppRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", &self.id)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowRef(pub u32);

impl fmt::Display for WindowRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

/// A windows-changed connection on an application
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(pub u64);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "handler#{}", self.0)
    }
}

pub trait WindowSystem {
    /// Look an application up by one of its identifiers (window class
    /// or desktop id). Exact match only. Applications the window system
    /// knows about are found even before their first window is mapped,
    /// windows mapped later belong to the same `AppRef`.
    fn lookup_app(&self, id: &str) -> Option<AppRef>;

    fn running_apps(&self) -> Vec<AppRef>;

    fn windows(&self, app: &AppRef) -> Vec<WindowRef>;

    fn wm_class(&self, window: WindowRef) -> Option<String>;

    fn set_always_on_top(&mut self, window: WindowRef, above: bool) -> Result<()>;

    fn set_sticky(&mut self, window: WindowRef, sticky: bool) -> Result<()>;

    /// Deliver a `WindowsChanged` event carrying `generation` every time
    /// the window list of `app` changes, until disconnected.
    fn connect_windows_changed(&mut self, app: &AppRef, generation: Generation) -> Result<HandlerId>;

    fn disconnect(&mut self, handler: HandlerId);
}
