//! Per-worker event loop.
//!
//! A worker owns one [`Dispatcher`] outright and processes commands from
//! its private channel to completion, one at a time. Events for different
//! connections interleave at command granularity; events for the same
//! connection arrive in protocol order because the runtime feeds one
//! worker per connection. Replicate workers for throughput; they share
//! nothing.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};

use sift_common::{Signal, internal};

use crate::{
    dispatch::{ConnectionId, Dispatcher, Verdict},
    error::DispatchError,
    event::Event,
    runtime::SessionRuntime,
};

/// Commands a runtime feeds one worker's event loop.
pub enum Command {
    /// A new MTA connection was accepted; the dispatcher constructs its
    /// handler from the registered factory.
    Establish {
        connection: ConnectionId,
        runtime: Arc<dyn SessionRuntime>,
    },
    /// Deliver one protocol event and answer with the arbitrated verdict.
    Dispatch {
        connection: ConnectionId,
        event: Event,
        verdict: oneshot::Sender<Result<Verdict, DispatchError>>,
    },
}

/// Drive `dispatcher` until the command channel closes or shutdown is
/// signalled. Returns the dispatcher so the embedding runtime can inspect
/// its finished-session records.
pub async fn run(
    mut dispatcher: Dispatcher,
    mut commands: mpsc::Receiver<Command>,
    mut signal: broadcast::Receiver<Signal>,
) -> Dispatcher {
    loop {
        tokio::select! {
            _ = signal.recv() => {
                internal!("worker shutting down, {} sessions live", dispatcher.active_sessions());
                break;
            }
            command = commands.recv() => {
                let Some(command) = command else { break };
                match command {
                    Command::Establish { connection, runtime } => {
                        if let Err(error) = dispatcher.connection_established(connection, runtime) {
                            internal!(level = ERROR, "{error}");
                        }
                    }
                    Command::Dispatch { connection, event, verdict } => {
                        let outcome = dispatcher.dispatch(connection, event).await;
                        // The runtime may have torn the connection down
                        // while the event was queued.
                        let _ = verdict.send(outcome);
                    }
                }
            }
        }
    }

    dispatcher
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod test {
    use async_trait::async_trait;

    use sift_common::{config::FilterConfig, status::Status};

    use crate::{
        context::SessionContext,
        handler::{FilterHandler, HandlerResult},
        runtime::RecordingRuntime,
        stage::StageSet,
    };

    use super::*;

    struct Accepting;

    #[async_trait]
    impl FilterHandler for Accepting {
        fn stages(&self) -> StageSet {
            StageSet::CONNECT | StageSet::END_OF_MESSAGE
        }

        async fn connect(
            &mut self,
            ctx: &mut SessionContext,
            _host: &str,
            _address: std::net::SocketAddr,
        ) -> HandlerResult {
            self.continue_processing(ctx);
            Ok(())
        }

        async fn end_of_message(&mut self, ctx: &mut SessionContext) -> HandlerResult {
            self.accept(ctx);
            Ok(())
        }
    }

    async fn dispatch_on(
        commands: &mpsc::Sender<Command>,
        connection: ConnectionId,
        event: Event,
    ) -> Verdict {
        let (tx, rx) = oneshot::channel();
        commands
            .send(Command::Dispatch {
                connection,
                event,
                verdict: tx,
            })
            .await
            .unwrap();
        rx.await.unwrap().unwrap()
    }

    fn accepting_dispatcher() -> Dispatcher {
        Dispatcher::new(&FilterConfig::default(), || {
            Box::new(Accepting) as Box<dyn FilterHandler + Send>
        })
    }

    #[tokio::test]
    async fn a_worker_answers_commands_in_order_and_drains_on_shutdown() {
        let (commands, receiver) = mpsc::channel(8);
        let (shutdown, signal) = broadcast::channel(1);

        let worker = tokio::spawn(run(accepting_dispatcher(), receiver, signal));

        let connection = ConnectionId::new(1);
        commands
            .send(Command::Establish {
                connection,
                runtime: Arc::new(RecordingRuntime::new()),
            })
            .await
            .unwrap();

        let verdict = dispatch_on(
            &commands,
            connection,
            Event::Connect {
                host: "mail.example.com".to_string(),
                address: "192.0.2.1:49152".parse().unwrap(),
            },
        )
        .await;
        assert_eq!(verdict.status, Status::Continue);

        // An unimplemented stage still gets an answer.
        let verdict = dispatch_on(
            &commands,
            connection,
            Event::Helo {
                fqdn: "client.example.com".to_string(),
            },
        )
        .await;
        assert_eq!(verdict.status, Status::Continue);

        let verdict = dispatch_on(&commands, connection, Event::EndOfMessage).await;
        assert_eq!(verdict.status, Status::Accept);

        let verdict = dispatch_on(&commands, connection, Event::Finished).await;
        assert_eq!(verdict.status, Status::Default);

        shutdown.send(Signal::Shutdown).unwrap();
        let dispatcher = worker.await.unwrap();

        assert_eq!(dispatcher.active_sessions(), 0);
        assert_eq!(dispatcher.finished_sessions().count(), 1);
        let record = dispatcher.finished_sessions().next().unwrap();
        assert_eq!(record.connection, connection);
        assert_eq!(record.last_status, Status::Default);
    }

    #[tokio::test]
    async fn a_closed_command_channel_ends_the_worker() {
        let (commands, receiver) = mpsc::channel::<Command>(1);
        let (_shutdown, signal) = broadcast::channel(1);

        let worker = tokio::spawn(run(accepting_dispatcher(), receiver, signal));
        drop(commands);

        let dispatcher = worker.await.unwrap();
        assert_eq!(dispatcher.active_sessions(), 0);
    }
}
