// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Unix-socket accept loop: decodes one [`Request`] per connection (or, for
//! `Subscribe`, switches the connection into a one-way event stream) and
//! writes back a [`Response`]. Grounded on the teacher's
//! `daemon::listener` shape — one task per accepted connection, a shared
//! `Arc<ListenCtx>` handed to each.

use std::sync::Arc;
use std::time::Instant;

use tf_core::{AgentKind, ClassifierOutcome, CoreError, ErrorKind, Priority, TaskId, TaskState};
use tf_engine::{classify, ClassifierRequest, SessionManager, TaskManager, WorkerPool};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Notify;
use tracing::{debug, error, warn};

use crate::classifier_client::CliSmallLmClient;
use crate::fanout::Fanout;
use crate::protocol::{Request, Response, StatusSnapshot};
use crate::protocol_wire::{self, ProtocolError, DEFAULT_TIMEOUT, PROTOCOL_VERSION};

type Manager = TaskManager<tf_core::SystemClock, tf_core::UuidIdGen>;

/// Everything a connection handler needs, shared across every accepted
/// connection.
pub struct ListenCtx {
    pub store: tf_storage::Store,
    pub manager: Manager,
    pub sessions: SessionManager,
    pub fanout: Fanout,
    pub classifier: CliSmallLmClient,
    pub pool: WorkerPool,
    pub start_time: Instant,
    pub shutdown: Arc<Notify>,
    pub default_model: String,
}

pub struct Listener {
    listener: UnixListener,
    ctx: Arc<ListenCtx>,
}

impl Listener {
    pub fn new(listener: UnixListener, ctx: Arc<ListenCtx>) -> Self {
        Self { listener, ctx }
    }

    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, _addr)) => {
                    let ctx = Arc::clone(&self.ctx);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, ctx).await {
                            debug!("connection ended: {e}");
                        }
                    });
                }
                Err(e) => {
                    error!("accept failed: {e}");
                }
            }
        }
    }
}

async fn handle_connection(stream: UnixStream, ctx: Arc<ListenCtx>) -> Result<(), ProtocolError> {
    let (mut reader, mut writer) = stream.into_split();

    loop {
        let request = match protocol_wire::read_request(&mut reader, DEFAULT_TIMEOUT).await {
            Ok(r) => r,
            Err(ProtocolError::ConnectionClosed) => return Ok(()),
            Err(e) => return Err(e),
        };

        if let Request::Subscribe { scope, channel } = request {
            return stream_subscription(&mut writer, &ctx, scope, channel).await;
        }

        let response = dispatch(&request, &ctx).await;
        let is_shutdown = matches!(response, Response::ShuttingDown);
        protocol_wire::write_response(&mut writer, &response, DEFAULT_TIMEOUT).await?;
        if is_shutdown {
            return Ok(());
        }
    }
}

async fn stream_subscription(
    writer: &mut (impl tokio::io::AsyncWriteExt + Unpin),
    ctx: &Arc<ListenCtx>,
    scope: crate::fanout::Scope,
    channel: crate::fanout::Channel,
) -> Result<(), ProtocolError> {
    let mut rx = ctx.fanout.subscribe(channel);
    loop {
        match rx.recv().await {
            Ok(envelope) => {
                if !scope.admits(envelope.user_id.as_ref()) {
                    continue;
                }
                let response = Response::Event(Box::new(envelope));
                protocol_wire::write_response(writer, &response, DEFAULT_TIMEOUT).await?;
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "subscriber lagged, dropping backlog");
                continue;
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => return Ok(()),
        }
    }
}

async fn dispatch(request: &Request, ctx: &Arc<ListenCtx>) -> Response {
    match request {
        Request::Hello { .. } => Response::Hello {
            version: PROTOCOL_VERSION.to_string(),
        },

        Request::SubmitMessage {
            user_id,
            content,
            input_kind,
            priority,
        } => submit_message(ctx, user_id.clone(), content.clone(), *input_kind, *priority).await,

        Request::StopTask { task_id } => {
            let id = TaskId::from(task_id.as_str());
            match ctx.manager.stop(&id).await {
                Ok(()) => Response::Ok,
                Err(e) => Response::from_core_error(e),
            }
        }

        Request::StopAllUserTasks { user_id } => match ctx.manager.stop_all_user_tasks(user_id).await {
            Ok(()) => Response::Ok,
            Err(e) => Response::from_core_error(e),
        },

        Request::ClearSession { user_id } => {
            let now = chrono::Utc::now();
            match ctx.sessions.clear(user_id.clone(), now) {
                Ok(()) => Response::Ok,
                Err(e) => Response::from_core_error(CoreError::new(ErrorKind::Unknown, e.to_string())),
            }
        }

        Request::GetTask { task_id } => match ctx.manager.get(task_id) {
            Some(task) => Response::Task(Box::new(task)),
            None => Response::from_core_error(CoreError::not_found(format!(
                "no such task: {task_id}"
            ))),
        },

        Request::ListTasks { user_id, state } => {
            Response::Tasks(ctx.manager.list(user_id.as_ref(), *state))
        }

        Request::Subscribe { .. } => unreachable!("handled before dispatch"),

        Request::Status => Response::Status(status_snapshot(ctx)),

        Request::Shutdown { kill } => {
            if *kill {
                for task in ctx.store.list_tasks(None, Some(TaskState::Running)) {
                    let _ = ctx.manager.stop(&task.id).await;
                }
            }
            ctx.shutdown.notify_one();
            Response::ShuttingDown
        }
    }
}

async fn submit_message(
    ctx: &Arc<ListenCtx>,
    user_id: tf_core::UserId,
    content: String,
    input_kind: tf_core::InputKind,
    priority: Priority,
) -> Response {
    let now = chrono::Utc::now();
    if let Err(e) = ctx
        .sessions
        .record_user_message(user_id.clone(), content.clone(), input_kind, now)
    {
        return Response::from_core_error(CoreError::new(ErrorKind::Unknown, e.to_string()));
    }

    let recent_messages = ctx
        .sessions
        .recent_context(&user_id, tf_engine::classifier::CONTEXT_RECENT_MESSAGES);
    let active_task_descriptions = ctx
        .manager
        .list(Some(&user_id), Some(TaskState::Running))
        .into_iter()
        .take(tf_engine::classifier::CONTEXT_MAX_ACTIVE_TASKS)
        .map(|t| t.description)
        .collect();

    let request = ClassifierRequest {
        content,
        recent_messages,
        active_task_descriptions,
        recent_log_lines: Vec::new(),
    };

    match classify(&ctx.classifier, request).await {
        Ok(ClassifierOutcome::DirectAnswer(text)) => Response::Answer { text },
        Ok(ClassifierOutcome::Background(spec)) => {
            match ctx
                .manager
                .submit(
                    user_id,
                    spec.description,
                    ctx.default_model.clone(),
                    AgentKind::Coding,
                    priority,
                )
                .await
            {
                Ok(task) => {
                    ctx.fanout.publish_task(task.clone());
                    Response::Accepted {
                        task_id: task.id.as_str().to_string(),
                        user_reply_text: spec.user_reply_text,
                    }
                }
                Err(e) => Response::from_core_error(e),
            }
        }
        Err(e) => Response::from_core_error(CoreError::malicious_input(e.to_string())),
    }
}

fn status_snapshot(ctx: &Arc<ListenCtx>) -> StatusSnapshot {
    let pool = ctx.pool.status();
    let tasks_pending = ctx.store.list_tasks(None, Some(TaskState::Pending)).len();
    let tasks_running = ctx.store.list_tasks(None, Some(TaskState::Running)).len();
    StatusSnapshot {
        uptime_secs: ctx.start_time.elapsed().as_secs(),
        tasks_pending,
        tasks_running,
        workers_busy: pool.active_workers,
        workers_total: pool.workers,
    }
}
