//! Pending start/stop command bookkeeping shared by the download
//! strategies.

use std::collections::HashMap;
use wotfetch_api::IdentityId;

/// A deferred instruction for one identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Begin (or restart) downloading/watching the identity.
    Start,
    /// Stop downloading/watching the identity.
    Stop,
}

/// At most one pending command per identity. Requests collapse against
/// the pending command and against the identity's current state, so a
/// burst of trust churn settles to the minimal set of transitions.
#[derive(Debug, Default)]
pub struct CommandQueue(HashMap<IdentityId, Command>);

impl CommandQueue {
    /// Request a start. `active` is whether the identity is already
    /// running: a pending stop is cancelled out, and a start for an
    /// already-active identity with nothing pending is a no-op.
    pub fn request_start(&mut self, identity: IdentityId, active: bool) {
        match self.0.get(&identity) {
            Some(Command::Stop) => {
                self.0.remove(&identity);
            }
            Some(Command::Start) => (),
            None => {
                if !active {
                    self.0.insert(identity, Command::Start);
                }
            }
        }
    }

    /// Request a stop. Mirror image of [CommandQueue::request_start].
    pub fn request_stop(&mut self, identity: IdentityId, active: bool) {
        match self.0.get(&identity) {
            Some(Command::Start) => {
                self.0.remove(&identity);
            }
            Some(Command::Stop) => (),
            None => {
                if active {
                    self.0.insert(identity, Command::Stop);
                }
            }
        }
    }

    /// Queue a start unconditionally, replacing any pending command. A
    /// start executed against an already-active identity restarts it, so
    /// this is how a forced restart is requested.
    pub fn request_restart(&mut self, identity: IdentityId) {
        self.0.insert(identity, Command::Start);
    }

    /// Take the whole pending batch.
    pub fn drain(&mut self) -> Vec<(IdentityId, Command)> {
        self.0.drain().collect()
    }

    /// Put back commands from a failed batch. Commands requested since
    /// the drain win over the restored ones.
    pub fn restore(&mut self, batch: Vec<(IdentityId, Command)>) {
        for (identity, command) in batch {
            self.0.entry(identity).or_insert(command);
        }
    }

    /// Drop every pending command.
    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// The pending command for the identity, if any.
    pub fn get(&self, identity: &IdentityId) -> Option<Command> {
        self.0.get(identity).copied()
    }

    /// Number of pending commands.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
