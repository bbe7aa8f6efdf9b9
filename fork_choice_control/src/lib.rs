//! Supporting code for the fork choice store.
//!
//! This crate handles the following concerns:
//! - Serializing mutations of [`Store`] in a dedicated thread.
//! - Publishing consistent snapshots of [`Store`] to readers.
//! - [Waiting for message handling to finish](`Controller::wait_for_tasks`).
//! - Delaying and retrying objects that cannot be applied immediately.
//! - Notifying other components of the application about changes to the head and checkpoints.
//! - Testing.
//!
//! [`Store`]: fork_choice_store::Store

pub use crate::{
    controller::{Controller, MutatorHandle},
    events::{ChainReorgEvent, Event, HeadEvent, PrunedEvent, Topic},
    queries::ForkTip,
    unbounded_sink::UnboundedSink,
    wait::Wait,
};

mod controller;
mod events;
mod messages;
mod misc;
mod mutator;
mod queries;
mod unbounded_sink;
mod wait;

#[cfg(test)]
mod helpers;
