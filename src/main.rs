mod data;
mod output;
mod playback;

use anyhow::Result;
use data::config::Config;
use playback::controller::{Controller, PlayoutObserver};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::{Arc, Weak};

/// Prints track and state changes for the operator; registered through the
/// observer capability set like any other collaborator.
struct ConsoleObserver {
    controller: Weak<Controller>,
}

impl PlayoutObserver for ConsoleObserver {
    fn notify_track_change(&self) {
        let Some(controller) = self.controller.upgrade() else {
            return;
        };
        if let Some(track) = controller.current_track() {
            let meta = controller.current_meta();
            let shown = if meta.display_title().is_empty() {
                track.display()
            } else {
                meta.display_title()
            };
            println!("now playing: {shown}");
        }
    }

    fn notify_state_change(&self) {
        let Some(controller) = self.controller.upgrade() else {
            return;
        };
        println!("state: {:?}", controller.state());
    }
}

fn print_status(controller: &Controller) {
    println!("state:    {:?}", controller.state());
    println!("shuffle:  {}", controller.shuffle());
    println!(
        "playlist: {}",
        controller.active_playlist_name().unwrap_or_else(|| "-".into())
    );
    if let Some(pending) = controller.pending_playlist_name() {
        println!("pending:  {pending}");
    }
    if let Some(track) = controller.current_track() {
        println!(
            "track:    {} ({:.0}s elapsed)",
            track.display(),
            controller.elapsed_seconds()
        );
        let meta = controller.current_meta();
        if let Some(n) = &meta.track_number {
            println!("track#:   {n}");
        }
        if meta.has_art() {
            println!("art:      embedded cover present");
        }
    }
    println!("playlists: {}", controller.playlist_names().join(", "));
}

fn main() -> Result<()> {
    env_logger::init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));
    let cfg = Config::load_or_default(&config_path);

    if cfg.web.enabled {
        log::info!(
            "web collaborator expected on {}:{}",
            cfg.web.host,
            cfg.web.port
        );
    }

    let controller = Controller::new(cfg);
    controller.load_playlists();
    controller.add_observer(Box::new(ConsoleObserver {
        controller: Arc::downgrade(&controller),
    }));
    controller.start();

    println!("haze playout. commands: play stop pause resume next prev shuffle switch <name> [now] reload status quit");
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };
        let mut words = line.split_whitespace();
        match words.next() {
            Some("play") | Some("start") => controller.start(),
            Some("pause") => controller.pause(),
            Some("resume") => controller.resume(),
            Some("next") => controller.next_track(),
            Some("prev") => controller.prev_track(),
            Some("shuffle") => controller.toggle_shuffle(),
            Some("switch") => match words.next() {
                Some(name) => {
                    let immediate = words.next() == Some("now");
                    controller.switch_to(name, immediate);
                }
                None => println!("usage: switch <name> [now]"),
            },
            Some("stop") => controller.stop(),
            Some("reload") => controller.reload_playlists(),
            Some("status") => print_status(&controller),
            Some("quit") | Some("exit") => break,
            Some(other) => println!("unknown command: {other}"),
            None => {}
        }
        print!("> ");
        let _ = io::stdout().flush();
    }

    controller.stop();
    Ok(())
}
