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

use strum_macros::Display;
use crate::windows::{AppRef, WindowSystem};

/// Window class Live Captions uses
pub const WM_CLASS: &str = "livecaptions";
/// Reverse-DNS application id, also the bus name
pub const APP_ID: &str = "net.sapples.LiveCaptions";

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum LookupStrategy {
    WmClass,
    AppId,
    ScanRunning,
}

/// Tried in order, first hit wins
pub const STRATEGIES: [LookupStrategy; 3] = [
    LookupStrategy::WmClass,
    LookupStrategy::AppId,
    LookupStrategy::ScanRunning,
];

impl LookupStrategy {
    pub fn find<W: WindowSystem>(&self, windows: &W) -> Option<AppRef> {
        match self {
            LookupStrategy::WmClass => windows.lookup_app(WM_CLASS),
            LookupStrategy::AppId => windows.lookup_app(APP_ID),
            LookupStrategy::ScanRunning => scan_running(windows),
        }
    }
}

/// Only the first window of each app is looked at. Apps without
/// any window can't be identified this way and are skipped.
fn scan_running<W: WindowSystem>(windows: &W) -> Option<AppRef> {
    let app_id = APP_ID.to_lowercase();
    windows.running_apps().into_iter().find(|app| {
        let first = match windows.windows(app).first() {
            Some(w) => *w,
            None => return false,
        };
        match windows.wm_class(first) {
            Some(class) => {
                let class = class.to_lowercase();
                class == WM_CLASS || class == app_id
            }
            None => false,
        }
    })
}

pub fn locate_app<W: WindowSystem>(windows: &W) -> Option<(AppRef, LookupStrategy)> {
    STRATEGIES
        .iter()
        .find_map(|strategy| strategy.find(windows).map(|app| (app, *strategy)))
}
