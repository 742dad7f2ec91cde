//! Supervision of the two forwarding roles
//!
//! The supervisor spawns the sender (egress) once and the writer (ingress) once, then waits for
//! either of them to terminate. What happens to a terminated role is decided by its
//! [`RestartPolicy`]: by default a writer is replaced immediately while a lost sender is only
//! reported, leaving the tunnel receive-only.
//!
//! Each role runs in its own tokio task, so a panic inside one of them is caught at the task
//! boundary and never reaches the other role or the supervisor. The role tasks belong to the
//! supervisor's [`JoinSet`]: dropping or aborting [`Supervisor::run`] aborts them too.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::{Id, JoinError, JoinSet};

use crate::codec::HeaderTemplate;
use crate::config::TunnelConfig;
use crate::error::ForwardError;
use crate::forward;
use crate::transport::{RawTransport, VirtualInterface};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    /// Tap to network.
    Sender,
    /// Network to tap.
    Writer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Sender => write!(f, "sender"),
            Role::Writer => write!(f, "writer"),
        }
    }
}

/// Whether a terminated role is started again.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RestartPolicy {
    pub restart_sender: bool,
    pub restart_writer: bool,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        RestartPolicy {
            restart_sender: false,
            restart_writer: true,
        }
    }
}

impl RestartPolicy {
    pub fn restarts(&self, role: Role) -> bool {
        match role {
            Role::Sender => self.restart_sender,
            Role::Writer => self.restart_writer,
        }
    }
}

/// How a role task ended.
#[derive(Debug)]
pub enum Exit {
    Failed(ForwardError),
    Panicked,
    Cancelled,
}

impl Exit {
    fn from_join(result: Result<Result<(), ForwardError>, JoinError>) -> Self {
        match result {
            Ok(Err(e)) => Exit::Failed(e),
            // the loops never return Ok, treat it like a cancellation
            Ok(Ok(())) => Exit::Cancelled,
            Err(e) if e.is_panic() => Exit::Panicked,
            Err(_) => Exit::Cancelled,
        }
    }
}

impl fmt::Display for Exit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exit::Failed(e) => write!(f, "{}", e),
            Exit::Panicked => write!(f, "panicked"),
            Exit::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Lifecycle notifications, generation counts spawns per role starting at 1.
#[derive(Debug)]
pub enum Event {
    Spawned { role: Role, generation: u64 },
    Exited { role: Role, generation: u64, exit: Exit },
}

pub struct Supervisor<D, T> {
    config: Arc<TunnelConfig>,
    template: HeaderTemplate,
    device: Arc<D>,
    transport: Arc<T>,
    policy: RestartPolicy,
    events: Option<UnboundedSender<Event>>,
}

impl<D: VirtualInterface, T: RawTransport> Supervisor<D, T> {
    pub fn new(config: Arc<TunnelConfig>, device: Arc<D>, transport: Arc<T>) -> Self {
        Supervisor {
            template: HeaderTemplate::from_config(&config),
            config,
            device,
            transport,
            policy: RestartPolicy::default(),
            events: None,
        }
    }

    pub fn with_policy(mut self, policy: RestartPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_events(mut self, events: UnboundedSender<Event>) -> Self {
        self.events = Some(events);
        self
    }

    fn notify(&self, event: Event) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    fn forward(&self, role: Role) -> impl Future<Output = Result<(), ForwardError>> + Send + 'static {
        let device = self.device.clone();
        let transport = self.transport.clone();
        let template = self.template;
        let max_frame_len = self.config.max_frame_len();

        async move {
            match role {
                Role::Sender => forward::egress(&*device, &*transport, &template, max_frame_len).await,
                Role::Writer => forward::ingress(&*device, &*transport, &template).await,
            }
        }
    }

    /// Start both roles and keep supervising them.
    ///
    /// Only returns once no role is left running, which the default policy never allows.
    pub async fn run(self) {
        let mut children: JoinSet<Result<(), ForwardError>> = JoinSet::new();
        let mut running: HashMap<Id, (Role, u64)> = HashMap::new();
        let mut generations = [0u64; 2];

        let mut start = |role: Role,
                         children: &mut JoinSet<Result<(), ForwardError>>,
                         running: &mut HashMap<Id, (Role, u64)>| {
            let slot = &mut generations[role as usize];
            *slot += 1;
            let generation = *slot;

            let handle = children.spawn(self.forward(role));
            running.insert(handle.id(), (role, generation));

            debug!("{} #{} started", role, generation);
            self.notify(Event::Spawned { role, generation });
        };

        start(Role::Sender, &mut children, &mut running);
        start(Role::Writer, &mut children, &mut running);

        while let Some(joined) = children.join_next_with_id().await {
            let (id, result) = match joined {
                Ok((id, result)) => (id, Ok(result)),
                Err(e) => (e.id(), Err(e)),
            };
            let (role, generation) = match running.remove(&id) {
                Some(child) => child,
                None => {
                    error!("unknown task {} terminated", id);
                    continue;
                }
            };
            let exit = Exit::from_join(result);

            let restart = self.policy.restarts(role);
            if restart {
                warn!("{} #{} terminated ({}), restarting", role, generation, exit);
            } else {
                error!("{} #{} terminated ({}), not restarting", role, generation, exit);
            }
            self.notify(Event::Exited { role, generation, exit });

            if restart {
                start(role, &mut children, &mut running);
            }
        }

        warn!("no forwarding role left");
    }
}
