//! The `Context` owns everything a run mutates: the tick counter, the data containers
//! registered by each module, and the handlers that are invoked once per tick.
//!
//! Simulation time is discrete. `execute()` runs tick `0`, then tick `1`, and so on until
//! the configured maximum is reached, `shutdown()` has been called, or an external stop
//! request arrives through a [`StopHandle`]. A tick is never interrupted: stop requests are
//! only looked at between ticks.
//!
//! Within a tick, handlers run by [`ExecutionPhase`] and, inside a phase, in the order they
//! were registered. Callbacks queued with `queue_callback` run before the next tick starts.
use std::any::{Any, TypeId};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::trace;

use crate::HashMap;

/// A type-keyed slot for module data held by the [`Context`].
pub trait DataPlugin: Any {
    type DataContainer;

    fn create_data_container() -> Self::DataContainer;
}

/// Defines a new type for storing data in `Context`.
#[macro_export]
macro_rules! define_data_plugin {
    ($plugin:ident, $data_container:ty, $default: expr) => {
        #[derive(Copy, Clone)]
        struct $plugin;

        impl $crate::context::DataPlugin for $plugin {
            type DataContainer = $data_container;

            fn create_data_container() -> Self::DataContainer {
                $default
            }
        }
    };
}
pub use define_data_plugin;

/// Phase of a tick in which a handler runs. Phases run in declaration order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ExecutionPhase {
    First,
    Normal,
    Last,
}

impl ExecutionPhase {
    const ALL: [ExecutionPhase; 3] = [
        ExecutionPhase::First,
        ExecutionPhase::Normal,
        ExecutionPhase::Last,
    ];

    fn index(self) -> usize {
        match self {
            ExecutionPhase::First => 0,
            ExecutionPhase::Normal => 1,
            ExecutionPhase::Last => 2,
        }
    }
}

/// A cloneable handle that requests the run to stop at the next tick boundary. It can be
/// moved to another thread.
#[derive(Clone, Debug, Default)]
pub struct StopHandle {
    requested: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn request_stop(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

type Callback = dyn FnOnce(&mut Context);
type TickHandler = dyn FnMut(&mut Context);

pub struct Context {
    data_plugins: HashMap<TypeId, Box<dyn Any>>,
    tick_handlers: [Vec<Box<TickHandler>>; 3],
    callback_queue: VecDeque<Box<Callback>>,
    current_tick: u64,
    max_ticks: Option<u64>,
    shutdown_requested: bool,
    stop_handle: StopHandle,
}

impl Context {
    #[must_use]
    pub fn new() -> Context {
        Context {
            data_plugins: HashMap::default(),
            tick_handlers: [Vec::new(), Vec::new(), Vec::new()],
            callback_queue: VecDeque::new(),
            current_tick: 0,
            max_ticks: None,
            shutdown_requested: false,
            stop_handle: StopHandle::default(),
        }
    }

    /// Registers a handler that runs once every tick in the `Normal` phase.
    pub fn add_tick_handler(&mut self, handler: impl FnMut(&mut Context) + 'static) {
        self.add_tick_handler_with_phase(handler, ExecutionPhase::Normal);
    }

    /// Registers a handler that runs once every tick in the given phase.
    pub fn add_tick_handler_with_phase(
        &mut self,
        handler: impl FnMut(&mut Context) + 'static,
        phase: ExecutionPhase,
    ) {
        trace!("adding tick handler in phase {phase:?}");
        self.tick_handlers[phase.index()].push(Box::new(handler));
    }

    /// Queues a callback that runs before the next tick starts.
    pub fn queue_callback(&mut self, callback: impl FnOnce(&mut Context) + 'static) {
        self.callback_queue.push_back(Box::new(callback));
    }

    /// Limits the run to `max_ticks` ticks. Without a limit, `execute` runs until shutdown.
    pub fn set_max_ticks(&mut self, max_ticks: u64) {
        self.max_ticks = Some(max_ticks);
    }

    #[must_use]
    pub fn get_max_ticks(&self) -> Option<u64> {
        self.max_ticks
    }

    /// Ends the run once the current tick has completed.
    pub fn shutdown(&mut self) {
        trace!("shutdown requested at tick {}", self.current_tick);
        self.shutdown_requested = true;
    }

    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        self.stop_handle.clone()
    }

    /// The index of the tick being executed, or the number of ticks executed so far once the
    /// run has returned from `execute`.
    #[must_use]
    pub fn get_current_tick(&self) -> u64 {
        self.current_tick
    }

    fn add_plugin<T: DataPlugin>(&mut self) {
        self.data_plugins
            .insert(TypeId::of::<T>(), Box::new(T::create_data_container()));
    }

    /// Returns a mutable reference to the data container for `T`, creating it if it doesn't
    /// exist yet.
    pub fn get_data_container_mut<T: DataPlugin>(&mut self, _plugin: T) -> &mut T::DataContainer {
        let type_id = TypeId::of::<T>();
        if !self.data_plugins.contains_key(&type_id) {
            self.add_plugin::<T>();
        }
        self.data_plugins
            .get_mut(&type_id)
            .and_then(|data| data.downcast_mut::<T::DataContainer>())
            // Will never panic as the container was inserted above with the matching type
            .unwrap()
    }

    /// Returns a reference to the data container for `T` if it exists.
    #[must_use]
    pub fn get_data_container<T: DataPlugin>(&self, _plugin: T) -> Option<&T::DataContainer> {
        self.data_plugins
            .get(&TypeId::of::<T>())
            .and_then(|data| data.downcast_ref::<T::DataContainer>())
    }

    fn should_stop(&self) -> bool {
        self.shutdown_requested
            || self.stop_handle.is_stop_requested()
            || self.max_ticks.is_some_and(|max| self.current_tick >= max)
    }

    fn run_tick(&mut self) {
        for phase in ExecutionPhase::ALL {
            let index = phase.index();
            let mut handlers = std::mem::take(&mut self.tick_handlers[index]);
            for handler in &mut handlers {
                handler(self);
            }
            // Handlers registered while this phase ran were pushed onto the emptied slot.
            let added = std::mem::replace(&mut self.tick_handlers[index], handlers);
            self.tick_handlers[index].extend(added);
        }
    }

    /// Runs ticks until the run is stopped. Returns immediately if no tick handlers exist.
    pub fn execute(&mut self) {
        trace!("entering tick loop");
        loop {
            if let Some(callback) = self.callback_queue.pop_front() {
                callback(self);
                continue;
            }

            if self.should_stop() || self.tick_handlers.iter().all(Vec::is_empty) {
                break;
            }

            self.run_tick();
            self.current_tick += 1;

            #[cfg(feature = "progress_bar")]
            crate::progress::update_tick_progress(self.current_tick);
        }
        trace!("leaving tick loop after {} ticks", self.current_tick);
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
