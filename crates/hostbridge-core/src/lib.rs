//! Bridge between host-owned agent state and script-side behaviors.
//!
//! The host owns every agent. Behaviors and message handlers reach agent
//! state only through handles, and this crate makes those crossings safe:
//! writes are buffered and flushed once, handles are released exactly once,
//! and neighbor reads are served from a cache that is coherent with the
//! current step.
//!
//! # Modules
//!
//! - [`host`] -- Handle traits and the [`HostHandle`] release guard.
//! - [`proxy`] -- [`StateProxy`], the deferred-write view of one agent.
//! - [`context`] -- The [`Context`] trait and its lazy [`StepContext`].
//! - [`behavior`] -- [`NamedBehavior`], [`BehaviorRegistry`], [`BehaviorRunner`].
//! - [`cache`] -- [`StepCache`], the step-stamped neighbor cache.
//! - [`init`] -- [`InitSource`] and the [`Initializer`].
//! - [`handler`] -- Async message handlers and [`MessageHandlerRunner`].
//! - [`routing`] -- [`MessageMap`], delivery of outbound messages.
//! - [`memory`] -- In-process handles and neighbor search.
//! - [`sim`] -- [`Simulation`], the step driver.
//! - [`config`] -- Configuration loading from `hostbridge-config.yaml`.
//!
//! [`HostHandle`]: host::HostHandle
//! [`StateProxy`]: proxy::StateProxy
//! [`Context`]: context::Context
//! [`StepContext`]: context::StepContext
//! [`NamedBehavior`]: behavior::NamedBehavior
//! [`BehaviorRegistry`]: behavior::BehaviorRegistry
//! [`BehaviorRunner`]: behavior::BehaviorRunner
//! [`StepCache`]: cache::StepCache
//! [`InitSource`]: init::InitSource
//! [`Initializer`]: init::Initializer
//! [`MessageHandlerRunner`]: handler::MessageHandlerRunner
//! [`MessageMap`]: routing::MessageMap
//! [`Simulation`]: sim::Simulation

pub mod behavior;
pub mod cache;
pub mod config;
pub mod context;
pub mod handler;
pub mod host;
pub mod init;
pub mod memory;
pub mod proxy;
pub mod routing;
pub mod sim;
