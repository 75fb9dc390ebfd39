// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Waits until the user asks a host process to quit.
use std::io::BufRead;
use std::sync::mpsc::{channel, Sender};

use nix::sys::signal::{SigSet, Signal};

use crate::exception::GripperResult;

/// Why [`QuitSignals::wait_for_quit`] returned.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum QuitReason {
    Enter,
    Signal(Signal),
}

/// SIGINT and SIGTERM, blocked so they can be received synchronously.
pub struct QuitSignals {
    set: SigSet,
}

impl QuitSignals {
    /// Blocks SIGINT and SIGTERM for the calling thread and every thread it spawns afterwards.
    /// Call this before any other thread is started.
    pub fn block() -> GripperResult<QuitSignals> {
        let mut set = SigSet::empty();
        set.add(Signal::SIGINT);
        set.add(Signal::SIGTERM);
        set.thread_block()?;
        Ok(QuitSignals { set })
    }

    /// Blocks until Enter is pressed on stdin or SIGINT/SIGTERM arrives.
    ///
    /// If stdin is closed only signals end the wait.
    pub fn wait_for_quit(&self) -> QuitReason {
        let (sender, receiver) = channel();

        let set = self.set;
        let signal_sender = sender.clone();
        let spawned = std::thread::Builder::new()
            .name("quit-signals".to_string())
            .spawn(move || loop {
                match set.wait() {
                    Ok(signal) => {
                        let _ = signal_sender.send(QuitReason::Signal(signal));
                        return;
                    }
                    Err(e) => log::warn!("waiting for signals failed: {}", e),
                }
            });
        if let Err(e) = spawned {
            log::warn!("cannot wait for signals: {}", e);
        }

        let spawned = std::thread::Builder::new()
            .name("quit-stdin".to_string())
            .spawn(move || {
                let stdin = std::io::stdin();
                watch_input(stdin.lock(), sender)
            });
        if let Err(e) = spawned {
            log::warn!("cannot read stdin: {}", e);
        }

        // only fails if neither thread started
        receiver.recv().unwrap_or(QuitReason::Signal(Signal::SIGTERM))
    }
}

fn watch_input<R: BufRead>(input: R, sender: Sender<QuitReason>) {
    if let Some(reason) = wait_for_line(input) {
        let _ = sender.send(reason);
    } else {
        log::info!("stdin closed, waiting for SIGINT or SIGTERM");
    }
}

/// Returns once a line is read, None if the input ends first.
fn wait_for_line<R: BufRead>(mut input: R) -> Option<QuitReason> {
    let mut line = String::new();
    match input.read_line(&mut line) {
        Ok(0) => None,
        Ok(_) => Some(QuitReason::Enter),
        Err(e) => {
            log::warn!("reading stdin failed: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::mpsc::channel;

    use crate::signals::{wait_for_line, watch_input, QuitReason};

    #[test]
    fn enter_quits() {
        assert_eq!(wait_for_line(Cursor::new("\n")), Some(QuitReason::Enter));
        assert_eq!(wait_for_line(Cursor::new("q\n")), Some(QuitReason::Enter));
    }

    #[test]
    fn closed_input_does_not_quit() {
        assert_eq!(wait_for_line(Cursor::new("")), None);
        let (sender, receiver) = channel();
        watch_input(Cursor::new(""), sender);
        assert!(receiver.recv().is_err());
    }
}
