//! Operation worker thread and handle.
//!
//! Every operation runs on its own OS thread. The requesting thread blocks
//! until the start sequence has finished (successfully or not) and then gets
//! back an [`OperationHandle`]; polling continues in the background.
//!
//! Start-up is a two-step handshake:
//!
//! ```text
//! requester                         worker
//!   hold running element lock
//!   spawn ───────────────────────►  plan, send_to_controllers
//!   recv  ◄──────── dispatch result
//!   drop running element lock
//!   send ─────────────── released ►  flush dispatch events, poll
//! ```
//!
//! Sinks called by the flush may therefore start operations themselves.

use crate::dispatch::OperationDispatcher;
use crate::element::Element;
use crate::error::EngineError;
use crate::hooks::OperationHooks;
use crate::operation::OperationRequest;
use crate::outbox::{Listeners, Outbox};
use crate::poll::{OperationOutcome, PollingStateMachine, StateProxy};
use pool_common::config::EngineConfig;
use parking_lot::MutexGuard;
use pool_common::element::{ElementId, OperationId};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread::{self, JoinHandle};
use tracing::{error, info};

/// Everything an operation thread needs, moved into it at spawn.
pub struct Worker {
    dispatcher: OperationDispatcher,
    listeners: Listeners,
    proxy: Option<Arc<dyn StateProxy>>,
    config: EngineConfig,
    request: OperationRequest,
    operation: OperationId,
    hooks: Box<dyn OperationHooks>,
}

impl Worker {
    /// Worker for one operation.
    pub fn new(
        dispatcher: OperationDispatcher,
        listeners: Listeners,
        proxy: Option<Arc<dyn StateProxy>>,
        config: EngineConfig,
        request: OperationRequest,
        operation: OperationId,
        hooks: Box<dyn OperationHooks>,
    ) -> Self {
        Self {
            dispatcher,
            listeners,
            proxy,
            config,
            request,
            operation,
            hooks,
        }
    }

    /// Start the thread and wait for the end of the start sequence.
    ///
    /// `guard` is the operation lock of `running`. It is released once the
    /// dispatch result is in, before the worker delivers any event.
    pub fn spawn(
        self,
        running: Arc<Element>,
        guard: MutexGuard<'_, ()>,
    ) -> Result<OperationHandle, EngineError> {
        let operation = self.operation;
        let (done_tx, done_rx) = mpsc::sync_channel(1);
        let (released_tx, released_rx) = mpsc::sync_channel(1);

        let join = thread::Builder::new()
            .name(format!("pool-{operation}"))
            .spawn(move || self.run(done_tx, released_rx))
            .map_err(|e| EngineError::Spawn(e.to_string()))?;

        let dispatched = done_rx.recv();
        drop(guard);
        let _ = released_tx.send(());

        match dispatched {
            Ok(Ok(())) => Ok(OperationHandle {
                operation,
                element: running,
                join,
            }),
            Ok(Err(e)) => {
                // The thread returns once the rollback events are delivered.
                let _ = join.join();
                Err(e)
            }
            Err(_) => match join.join() {
                Err(_) => Err(EngineError::WorkerPanicked),
                Ok(_) => Err(EngineError::DispatchLost),
            },
        }
    }

    fn run(
        mut self,
        done: SyncSender<Result<(), EngineError>>,
        released: Receiver<()>,
    ) -> Result<OperationOutcome, EngineError> {
        let op = self.operation;
        let plan = match self.dispatcher.plan(&self.request, op) {
            Ok(plan) => plan,
            Err(e) => {
                let _ = done.send(Err(e.clone()));
                return Err(e);
            }
        };

        let mut outbox = Outbox::new();
        let started = self
            .dispatcher
            .send_to_controllers(&plan, self.hooks.as_mut(), &mut outbox)
            .map(|_| ());
        let _ = done.send(started.clone());
        // Wait for the requester to let go of the running element.
        let _ = released.recv();
        outbox.flush(&self.listeners);
        started?;

        info!(
            "{}: {:?} of '{}' started on {} element(s)",
            op,
            plan.kind,
            plan.running.name(),
            plan.elements.len()
        );

        let timing = self.hooks.timing(&self.config);
        let machine = PollingStateMachine::new(
            &self.dispatcher,
            &self.listeners,
            self.proxy.as_deref(),
            timing,
        );
        let outcome = machine.run(&plan, self.hooks.as_mut());
        if let Err(e) = &outcome {
            error!("{}: operation failed: {}", op, e);
        }
        outcome
    }
}

/// Handle on a running operation.
#[derive(Debug)]
pub struct OperationHandle {
    operation: OperationId,
    element: Arc<Element>,
    join: JoinHandle<Result<OperationOutcome, EngineError>>,
}

impl OperationHandle {
    /// Id of the operation.
    pub fn id(&self) -> OperationId {
        self.operation
    }

    /// Element the operation was requested on.
    pub fn element(&self) -> ElementId {
        self.element.id()
    }

    /// True once the worker thread has returned.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Request a cooperative abort. Members are stopped within one tick.
    pub fn abort(&self) {
        info!("{}: abort requested on '{}'", self.operation, self.element.name());
        self.element.request_abort();
    }

    /// Block until the operation is over.
    pub fn wait(self) -> Result<OperationOutcome, EngineError> {
        self.join.join().map_err(|_| EngineError::WorkerPanicked)?
    }
}
