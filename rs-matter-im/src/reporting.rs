/*
 *
 *    Copyright (c) 2020-2022 Project CHIP Authors
 *
 *    Licensed under the Apache License, Version 2.0 (the "License");
 *    you may not use this file except in compliance with the License.
 *    You may obtain a copy of the License at
 *
 *        http://www.apache.org/licenses/LICENSE-2.0
 *
 *    Unless required by applicable law or agreed to in writing, software
 *    distributed under the License is distributed on an "AS IS" BASIS,
 *    WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *    See the License for the specific language governing permissions and
 *    limitations under the License.
 */

//! Scheduling of subscription reports.
//!
//! Every subscription has exactly one [`ReadHandlerNode`] in the scheduler, created when
//! the subscription is established and destroyed with it. A node keeps the earliest
//! (`min_timestamp`) and the latest (`max_timestamp`) time of the next report, both
//! derived from the time of the last report and the negotiated intervals.
//!
//! The scheduler never sends anything itself: when a timer fires, the engine runs its
//! reporting pass, which asks [`ReportScheduler::is_reportable_now`] for every
//! subscription.

use std::collections::BTreeMap;

use embassy_time::Duration;

use log::trace;

use crate::im::SubscriptionId;
use crate::utils::epoch::Timestamp;

pub use scheduler::*;
pub use synchronized::*;

mod scheduler;
mod synchronized;

/// Identifies a timer of a [`TimerDelegate`]
pub type TimerKey = u32;

/// The timer key used by the [`SynchronizedReportScheduler`]. Never a subscription ID.
pub const SYNC_TIMER_KEY: TimerKey = 0;

/// The timer service the schedulers arm their timers with.
///
/// Arming an armed timer re-arms it. The host polls the expired timers and hands them
/// back to [`ReportScheduler::on_timer_fired`].
pub trait TimerDelegate {
    fn start_timer(&mut self, key: TimerKey, now: Timestamp, timeout: Duration);

    /// Cancels a timer; cancelling a timer which is not armed is a no-op
    fn cancel_timer(&mut self, key: TimerKey);

    fn is_timer_active(&self, key: TimerKey) -> bool;

    /// The earliest deadline of all armed timers
    fn next_deadline(&self) -> Option<Timestamp>;

    /// Disarms and returns the timers whose deadline is `now` or earlier
    fn take_expired(&mut self, now: Timestamp) -> Vec<TimerKey>;
}

/// A [`TimerDelegate`] keeping the deadlines of the armed timers.
#[derive(Debug, Default, Clone)]
pub struct TimerQueue {
    deadlines: BTreeMap<TimerKey, Timestamp>,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deadline(&self, key: TimerKey) -> Option<Timestamp> {
        self.deadlines.get(&key).copied()
    }
}

impl TimerDelegate for TimerQueue {
    fn start_timer(&mut self, key: TimerKey, now: Timestamp, timeout: Duration) {
        trace!("Timer {} armed for {} ms", key, timeout.as_millis());
        self.deadlines.insert(key, now + timeout);
    }

    fn cancel_timer(&mut self, key: TimerKey) {
        self.deadlines.remove(&key);
    }

    fn is_timer_active(&self, key: TimerKey) -> bool {
        self.deadlines.contains_key(&key)
    }

    fn next_deadline(&self) -> Option<Timestamp> {
        self.deadlines.values().min().copied()
    }

    fn take_expired(&mut self, now: Timestamp) -> Vec<TimerKey> {
        let expired = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(key, _)| *key)
            .collect::<Vec<_>>();

        for key in &expired {
            self.deadlines.remove(key);
        }

        expired
    }
}

/// The scheduling state of one subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadHandlerNode {
    subscription_id: SubscriptionId,
    min_interval: Duration,
    max_interval: Duration,
    min_timestamp: Timestamp,
    max_timestamp: Timestamp,
    dirty: bool,
    synced: bool,
}

impl ReadHandlerNode {
    /// Panics if `min_interval` exceeds `max_interval`
    pub fn new(
        subscription_id: SubscriptionId,
        min_interval: Duration,
        max_interval: Duration,
        now: Timestamp,
    ) -> Self {
        assert!(
            min_interval <= max_interval,
            "Subscription {}: min interval above max interval",
            subscription_id
        );

        Self {
            subscription_id,
            min_interval,
            max_interval,
            min_timestamp: now + min_interval,
            max_timestamp: now + max_interval,
            dirty: false,
            synced: false,
        }
    }

    pub fn subscription_id(&self) -> SubscriptionId {
        self.subscription_id
    }

    pub fn min_timestamp(&self) -> Timestamp {
        self.min_timestamp
    }

    pub fn max_timestamp(&self) -> Timestamp {
        self.max_timestamp
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Restarts both intervals at `now`
    pub fn set_interval_timestamps(&mut self, now: Timestamp) {
        self.min_timestamp = now + self.min_interval;
        self.max_timestamp = now + self.max_interval;
    }

    pub fn is_reportable_now(&self, now: Timestamp) -> bool {
        ((self.dirty || self.synced) && now >= self.min_timestamp) || now >= self.max_timestamp
    }

    /// How long until the node becomes reportable, given its current state
    pub fn timeout(&self, now: Timestamp) -> Duration {
        if self.is_reportable_now(now) {
            Duration::MIN
        } else if self.dirty {
            self.min_timestamp.saturating_duration_since(now)
        } else {
            self.max_timestamp.saturating_duration_since(now)
        }
    }
}

/// The report scheduler interface the engine drives.
///
/// Operations on a subscription which has no node are silent no-ops.
pub trait ReportScheduler {
    /// Creates the node of a newly established (or resumed) subscription and arms its timer.
    ///
    /// Panics if the subscription has a node already, or if the node pool is exhausted:
    /// both mean that the pairing of subscriptions and nodes is broken.
    fn on_subscription_established(
        &mut self,
        id: SubscriptionId,
        min_interval: Duration,
        max_interval: Duration,
        now: Timestamp,
    );

    /// Marks the subscription dirty and reschedules its report
    fn on_became_reportable(&mut self, id: SubscriptionId, now: Timestamp);

    /// Restarts the intervals of the subscription after a report went out
    fn on_subscription_report_sent(&mut self, id: SubscriptionId, now: Timestamp);

    /// Cancels the timer of the subscription and releases its node
    fn on_subscription_destroyed(&mut self, id: SubscriptionId);

    /// Handles an expired timer of the [`TimerDelegate`]
    fn on_timer_fired(&mut self, key: TimerKey, now: Timestamp);

    /// Cancels the pending report of a subscription; idempotent
    fn cancel_report(&mut self, id: SubscriptionId);

    fn is_reportable_now(&self, id: SubscriptionId, now: Timestamp) -> bool;

    fn node(&self, id: SubscriptionId) -> Option<&ReadHandlerNode>;

    fn node_count(&self) -> usize;

    /// The size of the node pool, which is also the size of the subscription pool
    fn capacity(&self) -> usize;

    fn timers(&self) -> &dyn TimerDelegate;

    fn timers_mut(&mut self) -> &mut dyn TimerDelegate;
}

/// The nodes of a scheduler, sized after the subscription pool.
#[derive(Debug)]
struct NodePool {
    capacity: usize,
    nodes: BTreeMap<SubscriptionId, ReadHandlerNode>,
}

impl NodePool {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            nodes: BTreeMap::new(),
        }
    }

    fn create(&mut self, node: ReadHandlerNode) -> &mut ReadHandlerNode {
        let id = node.subscription_id;

        assert!(
            !self.nodes.contains_key(&id),
            "Subscription {} already has a scheduling node",
            id
        );
        assert!(
            self.nodes.len() < self.capacity,
            "Scheduling node pool exhausted: the subscription pool is larger"
        );

        self.nodes.entry(id).or_insert(node)
    }
}
