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

use anyhow::{bail, Result};
use clap::Parser;
use keepabove::args::Args;
use keepabove::bus::ZbusSession;
use keepabove::config::Config;
use keepabove::events::{KeepAboveEvent, KeepAboveEventLoop};
use keepabove::keepabove::KeepAbove;
use keepabove::locate::{APP_ID, WM_CLASS};
use keepabove::windows::{KnownApp, X11Windows};
use log::{info, warn};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::io::Write;
use std::sync::mpsc::channel;

fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(args.verbose);

    let config = match Config::load(args.config_path) {
        Ok(c) => c,
        Err(e) => bail!("Failed to load config: {:#}", e),
    };
    let display = args.display.or(config.display.clone());

    let (tx, rx) = channel::<KeepAboveEvent>();

    let known = vec![KnownApp::new([WM_CLASS, APP_ID])];
    let windows = match X11Windows::new(display.as_deref(), known, tx.clone()) {
        Ok(w) => w,
        Err(e) => bail!("Failed to connect to the X server: {}", e),
    };
    let bus = ZbusSession::new(tx.clone(), config.call_timeout());

    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    std::thread::spawn(move || {
        if let Some(signal) = signals.forever().next() {
            info!("Got signal {}", signal);
            if tx.send(KeepAboveEvent::Shutdown).is_err() {
                warn!("Event loop already gone");
            }
        }
    });

    info!("KeepAbove started! Call timeout: {:?}", config.call_timeout());

    let mut keepabove = KeepAbove::new(bus, windows);
    KeepAboveEventLoop::run(&mut keepabove, rx)
}

fn setup_logging(verbose: bool) {
    if verbose || cfg!(debug_assertions) {
        ::std::env::set_var("RUST_LOG", "trace");
    } else if ::std::env::var_os("RUST_LOG").is_none() {
        ::std::env::set_var("RUST_LOG", "info");
    }

    env_logger::Builder::from_default_env()
        .format(|buf, record| {
            let style = buf.default_level_style(record.level());

            writeln!(
                buf,
                "{} [{}] {}",
                chrono::Local::now().format("%F %T%.3f"),
                style.value(record.level()),
                record.args()
            )
        })
        .init();
}
