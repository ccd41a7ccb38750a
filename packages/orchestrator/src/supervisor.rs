//! Supervisor actor owning the queue and the worker actors.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use ractor::{Actor, ActorCell, ActorId, ActorProcessingErr, ActorRef, SupervisionEvent};
use tokio::sync::broadcast;
use training_core::{JobEvent, JobStore, PoolConfig};

use crate::messages::{QueueMessage, SupervisorMessage, WorkerMessage};
use crate::queue_actor::{QueueActor, QueueActorState};
use crate::trainer::Trainer;
use crate::worker_actor::{WorkerActor, WorkerArgs};

/// Arguments for starting a pool.
pub struct PoolArgs {
    pub config: PoolConfig,
    pub trainer: Arc<dyn Trainer>,
    pub store: Arc<dyn JobStore>,
    pub event_tx: broadcast::Sender<JobEvent>,
}

/// State for the supervisor actor.
pub struct SupervisorState {
    queue: ActorRef<QueueMessage>,
    /// Live workers by actor ID.
    workers: HashMap<ActorId, (String, ActorRef<WorkerMessage>)>,
    trainer: Arc<dyn Trainer>,
    store: Arc<dyn JobStore>,
    event_tx: broadcast::Sender<JobEvent>,
    /// Worker counter for unique IDs.
    worker_counter: u64,
    stopping: bool,
}

impl SupervisorState {
    /// Generate a unique worker ID.
    fn next_worker_id(&mut self) -> String {
        self.worker_counter += 1;
        format!("worker-{}", self.worker_counter)
    }
}

async fn spawn_worker(
    myself: &ActorRef<SupervisorMessage>,
    state: &mut SupervisorState,
) -> Result<String, ActorProcessingErr> {
    let worker_id = state.next_worker_id();
    let args = WorkerArgs {
        worker_id: worker_id.clone(),
        queue: state.queue.clone(),
        trainer: state.trainer.clone(),
        store: state.store.clone(),
        event_tx: state.event_tx.clone(),
    };

    let (worker, _handle) = Actor::spawn_linked(None, WorkerActor, args, myself.get_cell())
        .await
        .map_err(|e| ActorProcessingErr::from(format!("Failed to spawn worker: {}", e)))?;

    state
        .workers
        .insert(worker.get_id(), (worker_id.clone(), worker));
    Ok(worker_id)
}

/// Supervisor actor for the worker pool.
pub struct PoolSupervisor;

impl PoolSupervisor {
    async fn on_child_exit(
        &self,
        myself: &ActorRef<SupervisorMessage>,
        state: &mut SupervisorState,
        cell: ActorCell,
        reason: String,
    ) -> Result<(), ActorProcessingErr> {
        if state.stopping {
            return Ok(());
        }

        let id = cell.get_id();
        if id == state.queue.get_id() {
            tracing::error!("Training queue stopped ({}); stopping pool", reason);
            state.stopping = true;
            for (_, worker) in state.workers.values() {
                worker.stop(None);
            }
            myself.stop(Some("queue stopped".to_string()));
            return Ok(());
        }

        let Some((worker_id, _)) = state.workers.remove(&id) else {
            return Ok(());
        };

        tracing::warn!("Worker {} stopped: {}", worker_id, reason);
        state.queue.send_message(QueueMessage::WorkerLost {
            worker_id: worker_id.clone(),
        })?;

        let replacement = spawn_worker(myself, state).await?;
        tracing::info!("Replaced worker {} with {}", worker_id, replacement);
        let _ = state.event_tx.send(JobEvent::WorkerRestarted {
            worker_id,
            timestamp: Utc::now(),
        });
        Ok(())
    }
}

impl Actor for PoolSupervisor {
    type Msg = SupervisorMessage;
    type State = SupervisorState;
    type Arguments = PoolArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting worker pool supervisor");

        let concurrency = args.config.concurrency.max(1);
        let queue_state =
            QueueActorState::new(args.config, args.store.clone(), args.event_tx.clone());
        let (queue, _handle) =
            Actor::spawn_linked(None, QueueActor, queue_state, myself.get_cell())
                .await
                .map_err(|e| ActorProcessingErr::from(format!("Failed to spawn queue: {}", e)))?;

        let mut state = SupervisorState {
            queue,
            workers: HashMap::new(),
            trainer: args.trainer,
            store: args.store,
            event_tx: args.event_tx,
            worker_counter: 0,
            stopping: false,
        };

        for _ in 0..concurrency {
            spawn_worker(&myself, &mut state).await?;
        }

        Ok(state)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisorMessage::GetQueue { reply } => {
                let _ = reply.send(state.queue.clone());
            }

            SupervisorMessage::Shutdown => {
                tracing::info!("Shutting down worker pool");
                state.stopping = true;
                for (_, worker) in state.workers.values() {
                    worker.stop(None);
                }
                state.queue.stop(None);
                myself.stop(None);
            }
        }

        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        myself: ActorRef<Self::Msg>,
        message: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisionEvent::ActorTerminated(cell, _, reason) => {
                let reason = reason.unwrap_or_else(|| "terminated".to_string());
                self.on_child_exit(&myself, state, cell, reason).await?;
            }
            SupervisionEvent::ActorFailed(cell, err) => {
                self.on_child_exit(&myself, state, cell, err.to_string())
                    .await?;
            }
            _ => {}
        }
        Ok(())
    }
}

/// Start the pool supervisor.
pub async fn start_supervisor(
    args: PoolArgs,
) -> Result<(ActorRef<SupervisorMessage>, tokio::task::JoinHandle<()>), ractor::SpawnErr> {
    Actor::spawn(None, PoolSupervisor, args).await
}
