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

use clap::Parser;
use std::path::PathBuf;

/// Keep Live Captions above other windows whenever it asks to be
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Args {
    /// Config file, defaults to $XDG_CONFIG_HOME/keepabove/config.yaml
    #[arg(short, long = "config")]
    pub config_path: Option<PathBuf>,

    /// X11 display to connect to, overrides the config file
    #[arg(short, long)]
    pub display: Option<String>,

    /// Log everything
    #[arg(short, long)]
    pub verbose: bool,
}
