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

use anyhow::Result;
use std::collections::HashMap;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use strum_macros::Display;
use crate::bus::{BusConnection, PropertyValue, SessionBus, SignalId, WatchId};
use crate::keepabove::KeepAbove;
use crate::reconciler::Generation;
use crate::windows::{AppRef, HandlerId, WindowSystem};

/// Everything that can happen to us. Adapters push these from their
/// worker threads, the event loop drains them one at a time.
#[derive(Debug, Display)]
pub enum KeepAboveEvent {
    NameAppeared {
        watch: WatchId,
        owner: String,
        connection: Arc<dyn BusConnection>,
    },
    NameVanished {
        watch: WatchId,
    },
    AllowKeepAboveReturned(Result<()>),
    KeepAboveRead(Result<PropertyValue>),
    PropertiesChanged {
        subscription: SignalId,
        interface: String,
        changed: HashMap<String, PropertyValue>,
    },
    WindowsChanged {
        app: AppRef,
        handler: HandlerId,
        generation: Generation,
    },
    Shutdown,
}

pub struct KeepAboveEventLoop;

impl KeepAboveEventLoop {
    /// Enable, then handle events until we're asked to shut down
    /// (or every sender is gone), then disable.
    pub fn run<B, W>(keepabove: &mut KeepAbove<B, W>, rx: Receiver<KeepAboveEvent>) -> Result<()>
    where
        B: SessionBus,
        W: WindowSystem,
    {
        keepabove.enable()?;

        while let Ok(event) = rx.recv() {
            trace!("Received event: {}", event);
            if let KeepAboveEvent::Shutdown = event {
                info!("Shutting down");
                break;
            }
            if let Err(e) = keepabove.handle_event(event) {
                warn!("{}", e);
            }
        }

        keepabove.disable();
        Ok(())
    }
}
