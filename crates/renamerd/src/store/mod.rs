//! In-memory session store using the actor pattern.
//!
//! ```text
//! ┌─────────────────┐  StoreCommand   ┌─────────────────┐
//! │   Supervisor    │────────────────▶│   StoreActor    │
//! │ (StoreHandle)   │◀────────────────│ HashMap<Key,    │
//! └─────────────────┘  oneshot reply  │   Session>      │
//!                                     └─────────────────┘
//! ```
//!
//! Storage is process-scoped. Nothing survives a restart.

use tokio::sync::mpsc;

mod actor;
mod commands;
mod handle;

pub use actor::{StoreActor, MAX_SESSIONS};
pub use commands::{Mutator, StoreCommand, StoreError};
pub use handle::StoreHandle;

/// Channel buffer size
const COMMAND_BUFFER: usize = 100;

/// Spawns the store actor and returns a handle to it.
///
/// The actor stops once every handle has been dropped.
pub fn spawn_store(max_sessions: usize) -> StoreHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);

    let actor = StoreActor::new(cmd_rx, max_sessions);
    tokio::spawn(actor.run());

    StoreHandle::new(cmd_tx)
}
