//! Simulation processes and their suspension state machine.
//!
//! A process body is a resumable callback: each resume runs until the next
//! suspension point and returns a [`Suspend`] telling the scheduler how to
//! park it. Continuation state lives inside the body value itself (an
//! explicit state machine or a capturing closure), never on a saved stack.

use crate::error::RtError;
use crate::model::Model;
use crate::scope::ScopeId;
use crate::wakeable::TriggerId;
use vrt_common::{define_arena_id, Ident};

define_arena_id! {
    /// Opaque ID of a process in the model's process arena.
    ProcessId
}

/// How a process body left its latest resume.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Suspend {
    /// Park until a sensitive nexus notifies.
    WaitEvent,
    /// Park for the given delay in femtoseconds; zero means the next
    /// delta cycle of the same instant.
    WaitFor(u64),
    /// The body finished and is never resumed again.
    Done,
}

/// What flavor of concurrent statement a process implements.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ProcessKind {
    /// An ordinary process statement.
    Concurrent,
    /// A property/assertion checker.
    Property,
    /// A signal-transfer task for a concurrent assignment.
    Transfer,
}

/// A resumable process body.
pub trait ProcessBody: Send {
    /// Runs until the next suspension point. The model is handed in
    /// mutably so the body can call kernel entry points; the process's own
    /// arena slot holds `None` for the duration of the call.
    fn resume(&mut self, model: &mut Model, id: ProcessId) -> Result<Suspend, RtError>;
}

impl<F> ProcessBody for F
where
    F: FnMut(&mut Model, ProcessId) -> Result<Suspend, RtError> + Send,
{
    fn resume(&mut self, model: &mut Model, id: ProcessId) -> Result<Suspend, RtError> {
        self(model, id)
    }
}

/// Scheduler-visible process state.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ProcessState {
    /// Waiting on events or a timeout.
    Waiting,
    /// Finished; never resumed again.
    Done,
}

/// One simulation process.
pub struct Process {
    /// Name for diagnostics.
    pub name: Ident,
    /// Owning scope.
    pub scope: ScopeId,
    /// Flavor of concurrent statement.
    pub kind: ProcessKind,
    /// Postponed processes run only in the last delta of an instant.
    pub postponed: bool,
    /// Optional trigger guard consulted before enqueueing a wakeup.
    pub trigger: Option<TriggerId>,
    /// The resumable body. Taken out of the slot while running so the body
    /// can borrow the model mutably.
    pub body: Option<Box<dyn ProcessBody>>,
    /// Scheduler-visible state.
    pub state: ProcessState,
    /// True while sitting in a run queue; guards exactly-once enqueueing.
    pub queued: bool,
}

impl Process {
    /// A fresh waiting process.
    pub fn new(name: Ident, scope: ScopeId, kind: ProcessKind, body: Box<dyn ProcessBody>) -> Self {
        Self {
            name,
            scope,
            kind,
            postponed: false,
            trigger: None,
            body: Some(body),
            state: ProcessState::Waiting,
            queued: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vrt_common::ArenaId;

    #[test]
    fn closure_body_steps_through_states() {
        // A two-phase body expressed as a counter-driven state machine
        let mut phase = 0u32;
        let mut body: Box<dyn ProcessBody> = Box::new(move |_model: &mut Model, _id| {
            phase += 1;
            Ok(match phase {
                1 => Suspend::WaitFor(1_000),
                2 => Suspend::WaitEvent,
                _ => Suspend::Done,
            })
        });
        let mut model = Model::default();
        let id = ProcessId::from_raw(0);
        assert_eq!(body.resume(&mut model, id).unwrap(), Suspend::WaitFor(1_000));
        assert_eq!(body.resume(&mut model, id).unwrap(), Suspend::WaitEvent);
        assert_eq!(body.resume(&mut model, id).unwrap(), Suspend::Done);
    }
}
