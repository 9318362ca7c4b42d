use std::sync::Arc;

use chrono::Utc;
use log::{error, info};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::broadcast::BroadcastHub;
use crate::config::TimerConfig;
use crate::error::{Result, SessionError};
use crate::models::{
    ActivityKind, CycleCompletion, CycleId, CycleKind, InterruptionSource, PomodoroCycle,
    Session, SessionEnd, SessionPatch,
};
use crate::protocol::ServerMessage;
use crate::session::machine::{EndOutcome, SessionMachine};
use crate::store::SessionStore;
use crate::timer::TimerState;

/// Control messages delivered to a session's task. Every mutation for a
/// session flows through here, which is what gives the session its
/// single-writer discipline.
pub(crate) enum Command {
    Update(SessionPatch, oneshot::Sender<Result<Session>>),
    Pause(oneshot::Sender<Result<Session>>),
    Resume(oneshot::Sender<Result<Session>>),
    End(SessionEnd, oneshot::Sender<Result<EndOutcome>>),
    Activity(ActivityKind, oneshot::Sender<bool>),
    Interruption(InterruptionSource, oneshot::Sender<bool>),
    State(oneshot::Sender<TimerState>),
    StartCycle {
        cycle_number: u32,
        kind: CycleKind,
        planned_ms: u64,
        reply: oneshot::Sender<Result<PomodoroCycle>>,
    },
    CompleteCycle {
        cycle_id: CycleId,
        completion: CycleCompletion,
        reply: oneshot::Sender<Result<PomodoroCycle>>,
    },
}

/// One session's timekeeping loop: wakes on the tick, on control messages,
/// or on cancellation, whichever comes first.
pub(crate) async fn session_loop(
    mut machine: SessionMachine,
    store: Arc<dyn SessionStore>,
    hub: BroadcastHub,
    mut rx: mpsc::Receiver<Command>,
    cancel: CancellationToken,
    config: TimerConfig,
) {
    let id = machine.id();
    let mut interval = time::interval(config.tick_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut ticks: u32 = 0;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let now = Utc::now();
                machine.tick(now);
                hub.publish(id, &ServerMessage::timer_update(machine.timer_state(now), now));

                ticks = ticks.wrapping_add(1);
                if config.persist_every_ticks > 0 && ticks % config.persist_every_ticks == 0 {
                    if let Err(err) = store.update_session(machine.session()).await {
                        error!("Failed to persist progress for session {id}: {err}");
                    }
                }
            }
            command = rx.recv() => {
                match command {
                    Some(command) => {
                        let ended = handle_command(&mut machine, &store, &hub, command).await;
                        if ended {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = cancel.cancelled() => {
                info!("Timer task for session {id} cancelled");
                break;
            }
        }
    }

    // Drain whatever was queued behind the terminal command so no caller is
    // left hanging on a oneshot.
    rx.close();
    while let Ok(command) = rx.try_recv() {
        answer_after_stop(&machine, command);
    }

    hub.close_session(id);
}

/// Apply one control message. Returns true when the session ended and the
/// loop should tear down.
async fn handle_command(
    machine: &mut SessionMachine,
    store: &Arc<dyn SessionStore>,
    hub: &BroadcastHub,
    command: Command,
) -> bool {
    let id = machine.id();
    let now = Utc::now();

    match command {
        Command::Update(patch, reply) => {
            let result = match machine.update(patch, now) {
                Ok(()) => {
                    let result = persist_session(store, machine).await;
                    publish_state(hub, machine);
                    result
                }
                Err(err) => Err(err),
            };
            let _ = reply.send(result);
            false
        }
        Command::Pause(reply) => {
            let result = match machine.pause(now) {
                Ok(brk) => {
                    let result = match store.append_break(&brk).await {
                        Ok(()) => persist_session(store, machine).await,
                        Err(err) => Err(err.into()),
                    };
                    publish_state(hub, machine);
                    result
                }
                Err(err) => Err(err),
            };
            let _ = reply.send(result);
            false
        }
        Command::Resume(reply) => {
            let result = match machine.resume(now) {
                Ok(brk) => {
                    let result = match store.update_break(&brk).await {
                        Ok(()) => persist_session(store, machine).await,
                        Err(err) => Err(err.into()),
                    };
                    publish_state(hub, machine);
                    result
                }
                Err(err) => Err(err),
            };
            let _ = reply.send(result);
            false
        }
        Command::End(final_data, reply) => match machine.end(final_data, now) {
            Ok(closed_break) => {
                let mut persist_error = None;

                if let Some(brk) = closed_break {
                    if let Err(err) = store.update_break(&brk).await {
                        persist_error.get_or_insert(SessionError::from(err));
                    }
                }
                if let Err(err) = store.update_session(machine.session()).await {
                    persist_error.get_or_insert(SessionError::from(err));
                }
                if let (Some(document_id), Some(page)) =
                    (machine.session().document_id, machine.session().ending_page)
                {
                    if let Err(err) = store.update_document_progress(document_id, page).await {
                        persist_error.get_or_insert(SessionError::from(err));
                    }
                }

                if let Some(err) = &persist_error {
                    error!("Final persist failed for session {id}: {err}");
                }

                publish_state(hub, machine);
                hub.publish(
                    id,
                    &ServerMessage::session_completed(machine.session().clone(), now),
                );

                let _ = reply.send(Ok(EndOutcome {
                    session: machine.session().clone(),
                    persist_error,
                }));
                true
            }
            Err(err) => {
                let _ = reply.send(Err(err));
                false
            }
        },
        Command::Activity(kind, reply) => {
            let accepted = machine.register_activity(kind, now);
            if accepted {
                publish_state(hub, machine);
            }
            let _ = reply.send(accepted);
            false
        }
        Command::Interruption(source, reply) => {
            let accepted = machine.register_interruption(source, now);
            if accepted {
                publish_state(hub, machine);
            }
            let _ = reply.send(accepted);
            false
        }
        Command::State(reply) => {
            let _ = reply.send(machine.timer_state(now));
            false
        }
        Command::StartCycle {
            cycle_number,
            kind,
            planned_ms,
            reply,
        } => {
            let result = match machine.start_cycle(cycle_number, kind, planned_ms, now) {
                Ok(cycle) => match store.append_cycle(&cycle).await {
                    Ok(()) => Ok(cycle),
                    Err(err) => Err(err.into()),
                },
                Err(err) => Err(err),
            };
            let _ = reply.send(result);
            false
        }
        Command::CompleteCycle {
            cycle_id,
            completion,
            reply,
        } => {
            let result = match machine.complete_cycle(cycle_id, completion, now) {
                Ok(cycle) => {
                    let result = match store.update_cycle(&cycle).await {
                        Ok(()) => persist_session(store, machine).await.map(|_| cycle),
                        Err(err) => Err(err.into()),
                    };
                    publish_state(hub, machine);
                    result
                }
                Err(err) => Err(err),
            };
            let _ = reply.send(result);
            false
        }
    }
}

async fn persist_session(
    store: &Arc<dyn SessionStore>,
    machine: &SessionMachine,
) -> Result<Session> {
    store.update_session(machine.session()).await?;
    Ok(machine.session().clone())
}

fn publish_state(hub: &BroadcastHub, machine: &SessionMachine) {
    let now = Utc::now();
    hub.publish(
        machine.id(),
        &ServerMessage::timer_update(machine.timer_state(now), now),
    );
}

/// Answer a command that arrived after the loop decided to stop.
fn answer_after_stop(machine: &SessionMachine, command: Command) {
    let stopped = || {
        SessionError::InvalidState(format!("session {} timer stopped", machine.id()))
    };

    match command {
        Command::Update(_, reply) => {
            let _ = reply.send(Err(stopped()));
        }
        Command::Pause(reply) | Command::Resume(reply) => {
            let _ = reply.send(Err(stopped()));
        }
        Command::End(_, reply) => {
            let _ = reply.send(Err(stopped()));
        }
        Command::Activity(_, reply) => {
            let _ = reply.send(false);
        }
        Command::Interruption(_, reply) => {
            let _ = reply.send(false);
        }
        Command::State(reply) => {
            let _ = reply.send(machine.timer_state(Utc::now()));
        }
        Command::StartCycle { reply, .. } | Command::CompleteCycle { reply, .. } => {
            let _ = reply.send(Err(stopped()));
        }
    }
}
