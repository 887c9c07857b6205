//! Bounded read-ahead of executable commands.
//!
//! A [`CommandBuffer`] runs one producer thread that walks a [`CommandStream`]
//! line by line and queues every `G`/`M` command, so the job loop never waits
//! on the file. The producer backs off while the queue is full or the stream's
//! index is still being built, and exits for good when it reaches the end of
//! the stream, fails to read, or is stopped.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use log::{debug, error, info, warn};

use crate::cancel::CancelToken;
use crate::command::Command;
use crate::command_stream::CommandStream;
use crate::config::BufferSettings;
use crate::error::{Error, Result};
use crate::text_stream::IndexState;

/// Read position reported once the producer has exited for good.
pub const FINISHED_POSITION: i64 = -1;

/// Lifecycle of the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerState {
    /// Never started.
    Idle,
    Running,
    /// Reached the end of the stream.
    Finished,
    /// Stopped or cancelled before the end.
    Stopped,
    /// Exited on a read error or an unusable source.
    Failed,
}

impl ProducerState {
    /// Whether the producer has exited and will not queue anything else.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProducerState::Finished | ProducerState::Stopped | ProducerState::Failed
        )
    }
}

/// Result of [`CommandBuffer::next`].
#[derive(Debug, Clone)]
pub enum Fetch {
    /// A queued command, with the line the producer will read next.
    Ready {
        read_position: i64,
        command: Arc<Command>,
    },
    /// Nothing queued yet, but the producer is still running.
    Empty { read_position: i64 },
    /// Nothing queued and nothing will be. `reached_end` tells a complete read
    /// of the stream apart from an early exit.
    Exhausted { reached_end: bool },
}

#[derive(Debug)]
struct Queue {
    items: VecDeque<Arc<Command>>,
    state: ProducerState,
    /// Incremented on every start, so an old producer cannot touch a new run.
    run: u64,
}

#[derive(Debug)]
struct Shared {
    queue: Mutex<Queue>,
    read_position: AtomicI64,
}

impl Shared {
    fn lock_queue(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug)]
pub struct CommandBuffer {
    source: Option<Arc<CommandStream>>,
    settings: BufferSettings,
    shared: Arc<Shared>,
    producer_cancel: Mutex<Option<CancelToken>>,
}

impl CommandBuffer {
    pub fn new(source: Option<Arc<CommandStream>>, settings: BufferSettings) -> Self {
        Self {
            source,
            settings,
            shared: Arc::new(Shared {
                queue: Mutex::new(Queue {
                    items: VecDeque::new(),
                    state: ProducerState::Idle,
                    run: 0,
                }),
                read_position: AtomicI64::new(0),
            }),
            producer_cancel: Mutex::new(None),
        }
    }

    pub fn source(&self) -> Option<&Arc<CommandStream>> {
        self.source.as_ref()
    }

    pub fn capacity(&self) -> usize {
        self.settings.capacity
    }

    pub fn state(&self) -> ProducerState {
        self.shared.lock_queue().state
    }

    /// Number of queued commands.
    pub fn len(&self) -> usize {
        self.shared.lock_queue().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Next line the producer reads, or [`FINISHED_POSITION`] once it has exited.
    pub fn read_position(&self) -> i64 {
        let queue = self.shared.lock_queue();
        if queue.state.is_terminal() {
            FINISHED_POSITION
        } else {
            self.shared.read_position.load(Ordering::Acquire)
        }
    }

    fn lock_producer_cancel(&self) -> MutexGuard<'_, Option<CancelToken>> {
        self.producer_cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts the producer from the first line of the source.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - There is no source, or it has been closed
    /// - The producer is already running
    /// - The producer thread cannot be spawned
    pub fn start(&self) -> Result<()> {
        let source = match &self.source {
            Some(source) if source.index_state() != IndexState::Closed => Arc::clone(source),
            _ => {
                warn!("Ignoring start of a command buffer without a usable source");
                return Err(Error::BufferWithoutSource);
            }
        };

        let mut producer_cancel = self.lock_producer_cancel();
        let run = {
            let mut queue = self.shared.lock_queue();
            if queue.state == ProducerState::Running {
                warn!("Ignoring start of a command buffer that is already running");
                return Err(Error::BufferRunning);
            }
            queue.items.clear();
            queue.state = ProducerState::Running;
            queue.run += 1;
            self.shared.read_position.store(0, Ordering::Release);
            queue.run
        };

        let cancel = CancelToken::new();
        let producer = Producer {
            source,
            settings: self.settings.clone(),
            shared: Arc::clone(&self.shared),
            cancel: cancel.clone(),
            run,
        };
        let spawned = thread::Builder::new()
            .name("gcode-buffer".to_string())
            .spawn(move || producer.run());
        if let Err(e) = spawned {
            error!("Could not start the command buffer producer: {}", e);
            self.shared.lock_queue().state = ProducerState::Failed;
            return Err(Error::Thread(e));
        }

        *producer_cancel = Some(cancel);
        Ok(())
    }

    /// Asks the producer to exit and discards the queue.
    ///
    /// The producer notices at its next check; nothing is queued after this
    /// returns.
    pub fn stop(&self) {
        if let Some(cancel) = self.lock_producer_cancel().take() {
            cancel.cancel();
        }

        let mut queue = self.shared.lock_queue();
        let discarded = queue.items.len();
        queue.items.clear();
        if queue.state == ProducerState::Running {
            queue.state = ProducerState::Stopped;
        }
        debug!("Command buffer stopped, {} queued commands discarded", discarded);
    }

    /// Takes the next queued command without blocking.
    pub fn next(&self) -> Fetch {
        let mut queue = self.shared.lock_queue();
        let read_position = self.shared.read_position.load(Ordering::Acquire);
        if let Some(command) = queue.items.pop_front() {
            return Fetch::Ready {
                read_position,
                command,
            };
        }

        match queue.state {
            ProducerState::Running => Fetch::Empty { read_position },
            ProducerState::Finished => Fetch::Exhausted { reached_end: true },
            ProducerState::Idle | ProducerState::Stopped | ProducerState::Failed => {
                Fetch::Exhausted { reached_end: false }
            }
        }
    }
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        if let Some(cancel) = self.lock_producer_cancel().take() {
            cancel.cancel();
        }
    }
}

struct Producer {
    source: Arc<CommandStream>,
    settings: BufferSettings,
    shared: Arc<Shared>,
    cancel: CancelToken,
    run: u64,
}

impl Producer {
    fn run(self) {
        info!("Command buffer producer started for `{}`", self.source.path());
        let outcome = self.fill();

        let mut queue = self.shared.lock_queue();
        if queue.run == self.run && queue.state == ProducerState::Running {
            queue.state = outcome;
        }
        info!(
            "Command buffer producer for `{}` exited: {:?} at line {}",
            self.source.path(),
            queue.state,
            self.shared.read_position.load(Ordering::Acquire)
        );
    }

    fn fill(&self) -> ProducerState {
        loop {
            if self.cancel.is_cancelled() {
                return ProducerState::Stopped;
            }

            match self.source.index_state() {
                IndexState::Built => {}
                IndexState::Building => {
                    thread::sleep(self.settings.check_source_interval());
                    continue;
                }
                IndexState::Failed | IndexState::Closed => {
                    warn!("Source `{}` is not readable", self.source.path());
                    return ProducerState::Failed;
                }
            }

            if self.shared.lock_queue().items.len() >= self.settings.capacity {
                thread::sleep(self.settings.check_source_interval());
                continue;
            }

            let position = self.shared.read_position.load(Ordering::Acquire);
            let line_index = u64::try_from(position).unwrap_or_default();
            let command = match self.source.get_command(line_index) {
                Ok(Some(command)) => command,
                Ok(None) => return ProducerState::Finished,
                Err(e) => {
                    error!("Command buffer failed reading line {}: {}", line_index, e);
                    return ProducerState::Failed;
                }
            };

            let queued = {
                let mut queue = self.shared.lock_queue();
                if self.cancel.is_cancelled() {
                    return ProducerState::Stopped;
                }
                self.shared
                    .read_position
                    .store(position + 1, Ordering::Release);
                if command.kind.is_executable() {
                    queue.items.push_back(command);
                    true
                } else {
                    debug!("Skipping {} line {}", command.kind, line_index);
                    false
                }
            };

            if queued {
                thread::sleep(self.settings.read_interval());
            }
        }
    }
}
