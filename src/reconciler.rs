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
use std::fmt;
use crate::locate::locate_app;
use crate::windows::{AppRef, HandlerId, WindowRef, WindowSystem};

/// Issued once per keep-above update. A windows-changed event only
/// acts if it carries the current generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

impl Generation {
    fn next(self) -> Self {
        Generation(self.0 + 1)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "gen{}", self.0)
    }
}

/// "Keep applying `value` to the windows of `app`"
#[derive(Debug, Clone, PartialEq)]
pub struct PendingReconciliation {
    pub app: AppRef,
    pub value: bool,
    pub generation: Generation,
    pub handler: HandlerId,
}

/// Mirrors the keep-above value onto the windows of Live Captions,
/// including windows that only show up later.
#[derive(Debug, Default)]
pub struct Reconciler {
    generation: Generation,
    pending: Option<PendingReconciliation>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn pending(&self) -> Option<&PendingReconciliation> {
        self.pending.as_ref()
    }

    pub fn update_keep_above<W: WindowSystem>(&mut self, windows: &mut W, value: bool) -> Result<()> {
        self.detach(windows);
        self.generation = self.generation.next();

        let (app, strategy) = match locate_app(windows) {
            Some(found) => found,
            None => bail!("Could not find the Live Captions application"),
        };
        debug!("Found {} by {}, keep above: {}", app, strategy, value);

        let targets = windows.windows(&app);
        apply(windows, &targets, value);

        let handler = windows.connect_windows_changed(&app, self.generation)?;
        trace!("Armed {} for {} ({})", handler, app, self.generation);
        self.pending = Some(PendingReconciliation {
            app,
            value,
            generation: self.generation,
            handler,
        });

        Ok(())
    }

    pub fn windows_changed<W: WindowSystem>(
        &mut self,
        windows: &mut W,
        app: &AppRef,
        handler: HandlerId,
        generation: Generation,
    ) {
        if generation != self.generation {
            // Superseded, and already disconnected by the update
            // that superseded it. This one was still in the queue.
            trace!("Ignoring stale windows-changed from {} ({} < {})", handler, generation, self.generation);
            return;
        }

        let value = match &self.pending {
            Some(p) if p.handler == handler => p.value,
            _ => {
                trace!("Ignoring windows-changed from detached {}", handler);
                return;
            }
        };

        let targets = windows.windows(app);
        trace!("Window list of {} changed, reapplying keep above: {}", app, value);
        apply(windows, &targets, value);
    }

    /// Disconnect the armed continuation, if any
    pub fn detach<W: WindowSystem>(&mut self, windows: &mut W) {
        if let Some(pending) = self.pending.take() {
            trace!("Detaching {} from {}", pending.handler, pending.app);
            windows.disconnect(pending.handler);
        }
    }
}

fn apply<W: WindowSystem>(windows: &mut W, targets: &[WindowRef], value: bool) {
    for window in targets {
        if let Err(e) = windows.set_always_on_top(*window, value) {
            warn!("Failed to update always-on-top for {}: {}", window, e);
        }
        if let Err(e) = windows.set_sticky(*window, value) {
            warn!("Failed to update sticky for {}: {}", window, e);
        }
    }
}
