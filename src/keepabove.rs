/*
* KeepAbove
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
use crate::bus::{SessionBus, WatchId, BUS_NAME};
use crate::events::KeepAboveEvent;
use crate::reconciler::Reconciler;
use crate::sync::{self, PropertySubscription};
use crate::windows::WindowSystem;

#[derive(Debug)]
enum NameState {
    Absent,
    Present {
        owner: String,
        subscription: Option<PropertySubscription>,
    },
}

#[derive(Debug)]
enum Lifecycle {
    Disabled,
    Enabled { watch: WatchId, name: NameState },
}

pub struct KeepAbove<B: SessionBus, W: WindowSystem> {
    bus: B,
    windows: W,
    reconciler: Reconciler,
    lifecycle: Lifecycle,
}

impl<B: SessionBus, W: WindowSystem> KeepAbove<B, W> {
    pub fn new(bus: B, windows: W) -> Self {
        Self {
            bus,
            windows,
            reconciler: Reconciler::new(),
            lifecycle: Lifecycle::Disabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self.lifecycle, Lifecycle::Enabled { .. })
    }

    /// Whether Live Captions currently owns its name, as far as we know
    pub fn name_present(&self) -> bool {
        matches!(
            self.lifecycle,
            Lifecycle::Enabled { name: NameState::Present { .. }, .. }
        )
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn enable(&mut self) -> Result<()> {
        if self.is_enabled() {
            warn!("Already enabled");
            return Ok(());
        }

        let watch = self.bus.watch_name(BUS_NAME)?;
        info!("Watching for {} ({})", BUS_NAME, watch);
        self.lifecycle = Lifecycle::Enabled {
            watch,
            name: NameState::Absent,
        };
        Ok(())
    }

    pub fn disable(&mut self) {
        let (watch, name) = match std::mem::replace(&mut self.lifecycle, Lifecycle::Disabled) {
            Lifecycle::Enabled { watch, name } => (watch, name),
            Lifecycle::Disabled => {
                warn!("Already disabled");
                return;
            }
        };

        self.bus.unwatch_name(watch);
        if let NameState::Present { subscription: Some(subscription), .. } = name {
            subscription.unsubscribe();
        }
        self.reconciler.detach(&mut self.windows);
        info!("Stopped watching for {}", BUS_NAME);
    }

    pub fn handle_event(&mut self, event: KeepAboveEvent) -> Result<()> {
        let current_watch = match &self.lifecycle {
            Lifecycle::Enabled { watch, .. } => *watch,
            Lifecycle::Disabled => {
                trace!("Disabled, dropping {}", event);
                return Ok(());
            }
        };

        match event {
            KeepAboveEvent::NameAppeared { watch, owner, connection } => {
                if watch != current_watch {
                    trace!("Dropping appeared from old {}", watch);
                    return Ok(());
                }
                self.name_vanished();
                info!("{} appeared, owned by {}", BUS_NAME, owner);
                let subscription = sync::name_appeared(connection);
                self.set_name(NameState::Present { owner, subscription });
                Ok(())
            }
            KeepAboveEvent::NameVanished { watch } => {
                if watch != current_watch {
                    trace!("Dropping vanished from old {}", watch);
                    return Ok(());
                }
                self.name_vanished();
                Ok(())
            }
            KeepAboveEvent::AllowKeepAboveReturned(result) => {
                sync::allow_keep_above_returned(result);
                Ok(())
            }
            KeepAboveEvent::KeepAboveRead(result) => match sync::keep_above_read(result) {
                Some(value) => self.update_keep_above(value),
                None => Ok(()),
            },
            KeepAboveEvent::PropertiesChanged { subscription, interface, changed } => {
                if !self.is_current_subscription(subscription) {
                    trace!("Dropping PropertiesChanged from old {}", subscription);
                    return Ok(());
                }
                trace!("PropertiesChanged on {}: {:?}", interface, changed);
                match sync::keep_above_changed(&changed) {
                    Some(value) => self.update_keep_above(value),
                    None => Ok(()),
                }
            }
            KeepAboveEvent::WindowsChanged { app, handler, generation } => {
                self.reconciler.windows_changed(&mut self.windows, &app, handler, generation);
                Ok(())
            }
            KeepAboveEvent::Shutdown => {
                self.disable();
                Ok(())
            }
        }
    }

    fn update_keep_above(&mut self, value: bool) -> Result<()> {
        debug!("Keep above is now {}", value);
        self.reconciler.update_keep_above(&mut self.windows, value)
    }

    /// Release the property subscription, if there is one. The window
    /// state we last applied is left alone.
    fn name_vanished(&mut self) {
        if let Some(NameState::Present { owner, subscription }) = self.take_name() {
            info!("{} vanished (was owned by {})", BUS_NAME, owner);
            if let Some(subscription) = subscription {
                subscription.unsubscribe();
            }
        }
    }

    fn take_name(&mut self) -> Option<NameState> {
        match &mut self.lifecycle {
            Lifecycle::Enabled { name, .. } => Some(std::mem::replace(name, NameState::Absent)),
            Lifecycle::Disabled => None,
        }
    }

    fn set_name(&mut self, state: NameState) {
        if let Lifecycle::Enabled { name, .. } = &mut self.lifecycle {
            *name = state;
        }
    }

    fn is_current_subscription(&self, id: crate::bus::SignalId) -> bool {
        match &self.lifecycle {
            Lifecycle::Enabled {
                name: NameState::Present { subscription: Some(s), .. },
                ..
            } => s.id() == id,
            _ => false,
        }
    }
}
