//! Environment
//!
//! The root owner of a reactor program. The environment holds the
//! arenas for every element, the lifecycle phase, the global reaction
//! dependency edges, and the scheduler. All cross-references between
//! elements are arena keys minted by the `add_*` methods.
//!
//! Lifecycle: elements are created during Construction; `assemble()`
//! advances to Assembly and runs the assembly hooks, which bind ports
//! and declare triggers; `startup()` computes the execution indexes,
//! lets timers schedule their first events, and advances to
//! Execution; `execute()` runs the event loop until the program shuts
//! down, leaving the environment in Deconstruction.

use std::sync::Arc;

use tracing::{debug, info, trace};

use cadence_foundation::{
    get_physical_time, ActionKey, Duration, Path, Phase, PortKey, ReactionKey, ReactorKey, Tag,
    TimePoint,
};

use crate::action::{ActionKind, ActionState};
use crate::dot;
use crate::element::ElementMeta;
use crate::error::{Error, Result};
use crate::graph;
use crate::port::{PortKind, PortState};
use crate::reaction::{Deadline, DeadlineHandler, ReactionBody, ReactionState};
use crate::reactor::{self, AssemblyHook, ReactorState};
use crate::scheduler::{self, PhysicalActionRef, Scheduler, ShutdownHandle};

/// Root owner of a reactor program.
pub struct Environment {
    pub(crate) phase: Phase,
    pub(crate) start_time: TimePoint,
    pub(crate) run_forever: bool,
    pub(crate) fast_fwd_execution: bool,
    pub(crate) reactors: Vec<ReactorState>,
    pub(crate) ports: Vec<PortState>,
    pub(crate) actions: Vec<ActionState>,
    pub(crate) reactions: Vec<ReactionState>,
    pub(crate) top_level: Vec<ReactorKey>,
    /// `(after, before)`: the first reaction must execute after the
    /// second.
    pub(crate) dependency_edges: Vec<(ReactionKey, ReactionKey)>,
    pub(crate) max_reaction_index: usize,
    pub(crate) scheduler: Scheduler,
}

impl Environment {
    pub fn new() -> Self {
        Self::with_options(false, false)
    }

    /// `run_forever`: when the event queue drains, wait for
    /// asynchronous events instead of shutting down.
    /// `fast_fwd_execution`: never wait for physical time to catch up
    /// with the next tag.
    pub fn with_options(run_forever: bool, fast_fwd_execution: bool) -> Self {
        Self {
            phase: Phase::Construction,
            start_time: TimePoint::MIN,
            run_forever,
            fast_fwd_execution,
            reactors: Vec::new(),
            ports: Vec::new(),
            actions: Vec::new(),
            reactions: Vec::new(),
            top_level: Vec::new(),
            dependency_edges: Vec::new(),
            max_reaction_index: 0,
            scheduler: Scheduler::new(),
        }
    }

    fn expect_phase(&self, operation: &'static str, phase: Phase) -> Result<()> {
        if self.phase != phase {
            return Err(Error::PhaseViolation {
                operation,
                phase: self.phase,
            });
        }
        Ok(())
    }

    fn validate_fresh_name(&self, container: Option<ReactorKey>, name: &str) -> Result<()> {
        let parent_fqn = match container {
            Some(key) => self.reactors[key.index()].meta.fqn.clone(),
            None => Path::new(Vec::new()),
        };
        if name.is_empty() {
            return Err(Error::StructuralViolation {
                fqn: parent_fqn,
                message: "element names must not be empty".to_string(),
            });
        }
        let taken = match container {
            None => self
                .top_level
                .iter()
                .any(|r| self.reactors[r.index()].meta.name == name),
            Some(key) => {
                let reactor = &self.reactors[key.index()];
                reactor
                    .reactors
                    .iter()
                    .any(|k| self.reactors[k.index()].meta.name == name)
                    || reactor
                        .inputs
                        .iter()
                        .chain(reactor.outputs.iter())
                        .any(|k| self.ports[k.index()].meta.name == name)
                    || reactor
                        .actions
                        .iter()
                        .any(|k| self.actions[k.index()].meta.name == name)
                    || reactor
                        .reactions
                        .iter()
                        .any(|k| self.reactions[k.index()].meta.name == name)
            }
        };
        if taken {
            return Err(Error::StructuralViolation {
                fqn: parent_fqn.child(name),
                message: "element names must be unique within their container".to_string(),
            });
        }
        Ok(())
    }

    fn child_meta(&self, container: ReactorKey, name: &str) -> ElementMeta {
        let fqn = self.reactors[container.index()].meta.fqn.child(name);
        ElementMeta::new(name, fqn, Some(container))
    }

    // === Construction ===

    /// Create a reactor. Without a container it is registered as a
    /// top-level reactor of this environment.
    pub fn add_reactor(&mut self, name: &str, container: Option<ReactorKey>) -> Result<ReactorKey> {
        self.expect_phase("add_reactor", Phase::Construction)?;
        self.validate_fresh_name(container, name)?;

        let meta = match container {
            Some(parent) => self.child_meta(parent, name),
            None => ElementMeta::new(name, Path::root(name), None),
        };
        trace!(reactor = %meta.fqn, "registered reactor");

        let key = ReactorKey(self.reactors.len());
        self.reactors.push(ReactorState::new(meta));
        match container {
            Some(parent) => {
                self.reactors[parent.index()].reactors.insert(key);
            }
            None => self.top_level.push(key),
        }
        Ok(key)
    }

    pub fn add_input(&mut self, reactor: ReactorKey, name: &str) -> Result<PortKey> {
        self.add_port(reactor, name, PortKind::Input)
    }

    pub fn add_output(&mut self, reactor: ReactorKey, name: &str) -> Result<PortKey> {
        self.add_port(reactor, name, PortKind::Output)
    }

    fn add_port(&mut self, reactor: ReactorKey, name: &str, kind: PortKind) -> Result<PortKey> {
        self.expect_phase("add_port", Phase::Construction)?;
        self.validate_fresh_name(Some(reactor), name)?;

        let meta = self.child_meta(reactor, name);
        trace!(port = %meta.fqn, ?kind, "registered port");

        let key = PortKey(self.ports.len());
        self.ports.push(PortState::new(meta, kind));
        match kind {
            PortKind::Input => self.reactors[reactor.index()].inputs.insert(key),
            PortKind::Output => self.reactors[reactor.index()].outputs.insert(key),
        };
        Ok(key)
    }

    /// Create a timer firing at `start_time + offset` and every
    /// `period` thereafter; a zero period fires once.
    pub fn add_timer(
        &mut self,
        reactor: ReactorKey,
        name: &str,
        offset: Duration,
        period: Duration,
    ) -> Result<ActionKey> {
        self.add_action(reactor, name, ActionKind::Timer { offset, period })
    }

    pub fn add_logical_action(
        &mut self,
        reactor: ReactorKey,
        name: &str,
        min_delay: Duration,
    ) -> Result<ActionKey> {
        self.add_action(reactor, name, ActionKind::Logical { min_delay })
    }

    pub fn add_physical_action(&mut self, reactor: ReactorKey, name: &str) -> Result<ActionKey> {
        self.add_action(reactor, name, ActionKind::Physical)
    }

    pub fn add_shutdown_action(&mut self, reactor: ReactorKey, name: &str) -> Result<ActionKey> {
        self.add_action(reactor, name, ActionKind::Shutdown)
    }

    fn add_action(
        &mut self,
        reactor: ReactorKey,
        name: &str,
        kind: ActionKind,
    ) -> Result<ActionKey> {
        self.expect_phase("add_action", Phase::Construction)?;
        self.validate_fresh_name(Some(reactor), name)?;

        let meta = self.child_meta(reactor, name);
        trace!(action = %meta.fqn, ?kind, "registered action");

        let key = ActionKey(self.actions.len());
        self.actions.push(ActionState::new(meta, kind));
        self.reactors[reactor.index()].actions.insert(key);
        Ok(key)
    }

    /// Create a reaction. Priorities are nonzero and unique among the
    /// reactions of one reactor; smaller priorities run first.
    pub fn add_reaction(
        &mut self,
        reactor: ReactorKey,
        name: &str,
        priority: i32,
        body: ReactionBody,
    ) -> Result<ReactionKey> {
        self.expect_phase("add_reaction", Phase::Construction)?;
        if priority == 0 {
            return Err(Error::InvalidPriority(0));
        }
        self.validate_fresh_name(Some(reactor), name)?;

        let meta = self.child_meta(reactor, name);
        trace!(reaction = %meta.fqn, priority, "registered reaction");

        let key = ReactionKey(self.reactions.len());
        self.reactions.push(ReactionState::new(meta, priority, body));
        self.reactors[reactor.index()].reactions.insert(key);
        Ok(key)
    }

    /// Install the hook `assemble()` runs for this reactor.
    pub fn set_assembly(&mut self, reactor: ReactorKey, hook: AssemblyHook) -> Result<()> {
        self.expect_phase("set_assembly", Phase::Construction)?;
        self.reactors[reactor.index()].assembly = Some(hook);
        Ok(())
    }

    /// Attach a deadline: when the reaction triggers with
    /// `physical_time - logical_time > duration`, the handler runs
    /// instead of the body.
    pub fn set_deadline(
        &mut self,
        reaction: ReactionKey,
        duration: Duration,
        handler: DeadlineHandler,
    ) -> Result<()> {
        self.expect_phase("set_deadline", Phase::Construction)?;
        let state = &mut self.reactions[reaction.index()];
        if state.has_deadline() {
            return Err(Error::StructuralViolation {
                fqn: state.meta.fqn.clone(),
                message: "a reaction may declare at most one deadline".to_string(),
            });
        }
        state.deadline = Some(Deadline {
            duration,
            handler: Some(handler),
        });
        Ok(())
    }

    // === Assembly ===

    /// Advance to Assembly and run every reactor's assembly hook,
    /// containers before their contained reactors, then validate
    /// per-reactor priority uniqueness.
    pub fn assemble(&mut self) -> Result<()> {
        self.expect_phase("assemble", Phase::Construction)?;
        self.phase = Phase::Assembly;

        let tops = self.top_level.clone();
        for top in tops {
            self.run_assembly_hooks(top)?;
        }

        graph::validate_priorities(self)
    }

    fn run_assembly_hooks(&mut self, key: ReactorKey) -> Result<()> {
        if let Some(hook) = self.reactors[key.index()].assembly.take() {
            debug!(reactor = %self.reactors[key.index()].meta.fqn, "assembling reactor");
            hook(self)?;
        }
        let contained: Vec<ReactorKey> =
            self.reactors[key.index()].reactors.iter().copied().collect();
        for child in contained {
            self.run_assembly_hooks(child)?;
        }
        Ok(())
    }

    /// Bind `from` to `to`: `to` reads its value from `from`.
    ///
    /// Legal bindings are output→input between siblings, input→input
    /// from a container to a contained reactor, and output→output
    /// from a contained reactor to its container.
    pub fn bind(&mut self, from: PortKey, to: PortKey) -> Result<()> {
        self.expect_phase("bind", Phase::Assembly)?;

        let violation = |env: &Self, message: &str| -> Error {
            Error::BindingViolation {
                from: env.ports[from.index()].meta.fqn.clone(),
                to: env.ports[to.index()].meta.fqn.clone(),
                message: message.to_string(),
            }
        };

        if self.ports[to.index()].has_inward_binding() {
            return Err(violation(self, "ports may only be bound once"));
        }
        if self.ports[from.index()].has_dependencies() {
            return Err(violation(
                self,
                "ports with dependencies may not be bound to other ports",
            ));
        }
        if self.ports[to.index()].has_antidependencies() {
            return Err(violation(
                self,
                "ports with antidependencies may not be bound to other ports",
            ));
        }

        let from_port = &self.ports[from.index()];
        let to_port = &self.ports[to.index()];
        let from_reactor = self.port_container(from);
        let to_reactor = self.port_container(to);

        let legal = if from_port.is_input() && to_port.is_input() {
            // container's input feeding a contained reactor's input
            self.reactor_container(to_reactor) == Some(from_reactor)
        } else if from_port.is_output() && to_port.is_input() {
            // output feeding a sibling reactor's input
            self.reactor_container(from_reactor) == self.reactor_container(to_reactor)
                && from_reactor != to_reactor
        } else if from_port.is_output() && to_port.is_output() {
            // contained reactor's output feeding its container's output
            self.reactor_container(from_reactor) == Some(to_reactor)
        } else {
            false
        };
        if !legal {
            return Err(violation(
                self,
                "binding violates the direction/containment rules",
            ));
        }

        trace!(
            from = %self.ports[from.index()].meta.fqn,
            to = %self.ports[to.index()].meta.fqn,
            "bound ports"
        );
        self.ports[to.index()].inward_binding = Some(from);
        self.ports[from.index()].outward_bindings.insert(to);
        Ok(())
    }

    /// Declare that an action's events fire this reaction. The action
    /// must belong to the reaction's reactor.
    pub fn declare_action_trigger(
        &mut self,
        reaction: ReactionKey,
        action: ActionKey,
    ) -> Result<()> {
        self.expect_phase("declare_action_trigger", Phase::Assembly)?;
        if self.actions[action.index()].meta.container
            != self.reactions[reaction.index()].meta.container
        {
            return Err(Error::StructuralViolation {
                fqn: self.actions[action.index()].meta.fqn.clone(),
                message: "action triggers must belong to the same reactor as the triggered \
                          reaction"
                    .to_string(),
            });
        }
        self.reactions[reaction.index()].action_triggers.insert(action);
        self.actions[action.index()].triggered_reactions.insert(reaction);
        Ok(())
    }

    /// Declare that this reaction may schedule a logical action of
    /// its own reactor.
    pub fn declare_schedulable_action(
        &mut self,
        reaction: ReactionKey,
        action: ActionKey,
    ) -> Result<()> {
        self.expect_phase("declare_schedulable_action", Phase::Assembly)?;
        if !self.actions[action.index()].is_logical() {
            return Err(Error::InvalidSchedule {
                reaction: self.reactions[reaction.index()].meta.fqn.clone(),
                action: self.actions[action.index()].meta.fqn.clone(),
                message: "only logical actions may be scheduled by reactions".to_string(),
            });
        }
        if self.actions[action.index()].meta.container
            != self.reactions[reaction.index()].meta.container
        {
            return Err(Error::StructuralViolation {
                fqn: self.actions[action.index()].meta.fqn.clone(),
                message: "schedulable actions must belong to the same reactor as the scheduling \
                          reaction"
                    .to_string(),
            });
        }
        self.reactions[reaction.index()].schedulable_actions.insert(action);
        self.actions[action.index()].scheduler_reactions.insert(reaction);
        Ok(())
    }

    /// Declare that a port write fires this reaction. Implies a
    /// dependency on the port.
    pub fn declare_port_trigger(&mut self, reaction: ReactionKey, port: PortKey) -> Result<()> {
        self.expect_phase("declare_port_trigger", Phase::Assembly)?;
        self.register_port_dependency(reaction, port, true)
    }

    /// Declare that this reaction reads a port.
    pub fn declare_dependency(&mut self, reaction: ReactionKey, port: PortKey) -> Result<()> {
        self.expect_phase("declare_dependency", Phase::Assembly)?;
        self.register_port_dependency(reaction, port, false)
    }

    fn register_port_dependency(
        &mut self,
        reaction: ReactionKey,
        port: PortKey,
        is_trigger: bool,
    ) -> Result<()> {
        let port_reactor = self.port_container(port);
        let reaction_reactor = self.reactions[reaction.index()].meta.container;

        // inputs are read by reactions of the same reactor, outputs
        // by reactions of the containing reactor
        let legal = if self.ports[port.index()].is_input() {
            Some(port_reactor) == reaction_reactor
        } else {
            self.reactor_container(port_reactor) == reaction_reactor
        };
        if !legal {
            return Err(Error::StructuralViolation {
                fqn: self.ports[port.index()].meta.fqn.clone(),
                message: "dependent ports must be visible from the reaction's reactor".to_string(),
            });
        }
        if self.ports[port.index()].has_outward_bindings() {
            return Err(Error::StructuralViolation {
                fqn: self.ports[port.index()].meta.fqn.clone(),
                message: "dependencies may not be declared on ports with outward bindings"
                    .to_string(),
            });
        }

        self.reactions[reaction.index()].dependencies.insert(port);
        self.ports[port.index()].dependencies.insert(reaction);
        if is_trigger {
            self.reactions[reaction.index()].port_triggers.insert(port);
            self.ports[port.index()].triggers.insert(reaction);
        }
        Ok(())
    }

    /// Declare that this reaction writes a port.
    pub fn declare_antidependency(&mut self, reaction: ReactionKey, port: PortKey) -> Result<()> {
        self.expect_phase("declare_antidependency", Phase::Assembly)?;

        let port_reactor = self.port_container(port);
        let reaction_reactor = self.reactions[reaction.index()].meta.container;

        // outputs are written by reactions of the same reactor,
        // inputs by reactions of the containing reactor
        let legal = if self.ports[port.index()].is_output() {
            Some(port_reactor) == reaction_reactor
        } else {
            self.reactor_container(port_reactor) == reaction_reactor
        };
        if !legal {
            return Err(Error::StructuralViolation {
                fqn: self.ports[port.index()].meta.fqn.clone(),
                message: "antidependent ports must be visible from the reaction's reactor"
                    .to_string(),
            });
        }
        if self.ports[port.index()].has_inward_binding() {
            return Err(Error::StructuralViolation {
                fqn: self.ports[port.index()].meta.fqn.clone(),
                message: "antidependencies may not be declared on ports with an inward binding"
                    .to_string(),
            });
        }

        self.reactions[reaction.index()].antidependencies.insert(port);
        self.ports[port.index()].antidependencies.insert(reaction);
        Ok(())
    }

    // === Startup and execution ===

    /// Build the dependency graph, assign execution indexes, let
    /// timers schedule their first events, and advance to Execution.
    pub fn startup(&mut self) -> Result<()> {
        self.expect_phase("startup", Phase::Assembly)?;

        graph::build_dependency_graph(self)?;
        graph::calculate_indexes(self)?;

        info!("starting the execution");
        self.phase = Phase::Startup;
        self.start_time = get_physical_time();

        let tops = self.top_level.clone();
        for top in tops {
            reactor::startup_tree(self, top);
        }

        self.phase = Phase::Execution;
        Ok(())
    }

    /// Run the event loop to completion. Returns once the program has
    /// shut down and the environment reached Deconstruction.
    pub fn execute(&mut self) -> Result<()> {
        self.expect_phase("execute", Phase::Execution)?;
        scheduler::run(self)
    }

    /// Terminate the execution from the owning thread: run the
    /// shutdown hooks, execute the shutdown reactions at the final
    /// microstep, and stop the scheduler.
    ///
    /// This is the termination path for an environment whose event
    /// loop is not running (`execute()` holds the environment
    /// exclusively while it runs; other threads use
    /// [`shutdown_handle`](Self::shutdown_handle) instead). The final
    /// microstep is drained inline, so shutdown reactions run even
    /// though `execute()` is never entered.
    pub fn sync_shutdown(&mut self) -> Result<()> {
        self.expect_phase("sync_shutdown", Phase::Execution)?;
        self.shutdown_sequence();
        scheduler::drain_final_microstep(self);
        Ok(())
    }

    pub(crate) fn shutdown_sequence(&mut self) {
        info!("terminating the execution");
        self.phase = Phase::Shutdown;

        let tops = self.top_level.clone();
        for top in tops {
            reactor::shutdown_tree(self, top);
        }

        self.phase = Phase::Deconstruction;
        self.scheduler.stop();
    }

    /// Handle for shutting the running environment down from another
    /// thread.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle::new(Arc::clone(&self.scheduler.shared))
    }

    /// Handle for scheduling a physical action from any thread.
    pub fn physical_action_ref(&self, action: ActionKey) -> Result<PhysicalActionRef> {
        if self.actions[action.index()].kind != ActionKind::Physical {
            return Err(Error::StructuralViolation {
                fqn: self.actions[action.index()].meta.fqn.clone(),
                message: "asynchronous scheduling handles exist only for physical actions"
                    .to_string(),
            });
        }
        Ok(PhysicalActionRef::new(
            Arc::clone(&self.scheduler.shared),
            action,
        ))
    }

    // === Accessors ===

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn start_time(&self) -> TimePoint {
        self.start_time
    }

    /// The scheduler's current logical time.
    pub fn get_logical_time(&self) -> Tag {
        self.scheduler.logical_time.as_tag()
    }

    pub fn get_elapsed_logical_time(&self) -> Duration {
        self.get_logical_time().time_point() - self.start_time
    }

    pub fn get_elapsed_physical_time(&self) -> Duration {
        get_physical_time() - self.start_time
    }

    /// Largest execution index over all reactions; valid after
    /// `startup()`.
    pub fn max_reaction_index(&self) -> usize {
        self.max_reaction_index
    }

    /// A reaction's execution index; `None` before `startup()`.
    pub fn reaction_index(&self, reaction: ReactionKey) -> Option<usize> {
        self.reactions[reaction.index()].index
    }

    /// The global dependency edge list: `(after, before)` pairs.
    pub fn dependency_edges(&self) -> &[(ReactionKey, ReactionKey)] {
        &self.dependency_edges
    }

    pub fn reactor_fqn(&self, reactor: ReactorKey) -> &Path {
        &self.reactors[reactor.index()].meta.fqn
    }

    pub fn port_fqn(&self, port: PortKey) -> &Path {
        &self.ports[port.index()].meta.fqn
    }

    pub fn action_fqn(&self, action: ActionKey) -> &Path {
        &self.actions[action.index()].meta.fqn
    }

    pub fn reaction_fqn(&self, reaction: ReactionKey) -> &Path {
        &self.reactions[reaction.index()].meta.fqn
    }

    /// The source a port transitively reads from (itself when
    /// unbound).
    pub fn port_source(&self, port: PortKey) -> PortKey {
        crate::port::source_of(&self.ports, port)
    }

    /// Write the reaction dependency graph in DOT format.
    pub fn export_dependency_graph(&self, path: &std::path::Path) -> std::io::Result<()> {
        dot::export(self, path)
    }

    pub(crate) fn port_container(&self, port: PortKey) -> ReactorKey {
        self.ports[port.index()]
            .meta
            .container
            .expect("ports are always contained in a reactor")
    }

    pub(crate) fn reactor_container(&self, reactor: ReactorKey) -> Option<ReactorKey> {
        self.reactors[reactor.index()].meta.container
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}
