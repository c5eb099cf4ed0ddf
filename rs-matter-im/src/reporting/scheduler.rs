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

use embassy_time::Duration;

use log::debug;

use crate::im::SubscriptionId;
use crate::utils::epoch::Timestamp;

use super::{NodePool, ReadHandlerNode, ReportScheduler, TimerDelegate, TimerKey};

/// A [`ReportScheduler`] with one timer per subscription.
///
/// Each timer is armed for the moment its node becomes reportable: immediately if it
/// already is, at `min_timestamp` if the subscription is dirty, and at `max_timestamp`
/// otherwise.
#[derive(Debug)]
pub struct ReportSchedulerImpl<T> {
    nodes: NodePool,
    timers: T,
}

impl<T> ReportSchedulerImpl<T>
where
    T: TimerDelegate,
{
    pub fn new(capacity: usize, timers: T) -> Self {
        Self {
            nodes: NodePool::new(capacity),
            timers,
        }
    }

    fn schedule(&mut self, id: SubscriptionId, now: Timestamp) {
        if let Some(node) = self.nodes.nodes.get(&id) {
            let timeout = node.timeout(now);

            debug!("Subscription {}: next report in {} ms", id, timeout.as_millis());
            self.timers.start_timer(id as TimerKey, now, timeout);
        }
    }
}

impl<T> ReportScheduler for ReportSchedulerImpl<T>
where
    T: TimerDelegate,
{
    fn on_subscription_established(
        &mut self,
        id: SubscriptionId,
        min_interval: Duration,
        max_interval: Duration,
        now: Timestamp,
    ) {
        self.nodes
            .create(ReadHandlerNode::new(id, min_interval, max_interval, now));
        self.schedule(id, now);
    }

    fn on_became_reportable(&mut self, id: SubscriptionId, now: Timestamp) {
        if let Some(node) = self.nodes.nodes.get_mut(&id) {
            node.dirty = true;
            self.schedule(id, now);
        }
    }

    fn on_subscription_report_sent(&mut self, id: SubscriptionId, now: Timestamp) {
        if let Some(node) = self.nodes.nodes.get_mut(&id) {
            node.dirty = false;
            node.synced = false;
            node.set_interval_timestamps(now);
            self.schedule(id, now);
        }
    }

    fn on_subscription_destroyed(&mut self, id: SubscriptionId) {
        self.timers.cancel_timer(id as TimerKey);
        self.nodes.nodes.remove(&id);
    }

    fn on_timer_fired(&mut self, _key: TimerKey, _now: Timestamp) {
        // Nothing to track: the reporting pass which follows every expiry decides
    }

    fn cancel_report(&mut self, id: SubscriptionId) {
        self.timers.cancel_timer(id as TimerKey);
    }

    fn is_reportable_now(&self, id: SubscriptionId, now: Timestamp) -> bool {
        self.nodes
            .nodes
            .get(&id)
            .map(|node| node.is_reportable_now(now))
            .unwrap_or(false)
    }

    fn node(&self, id: SubscriptionId) -> Option<&ReadHandlerNode> {
        self.nodes.nodes.get(&id)
    }

    fn node_count(&self) -> usize {
        self.nodes.nodes.len()
    }

    fn capacity(&self) -> usize {
        self.nodes.capacity
    }

    fn timers(&self) -> &dyn TimerDelegate {
        &self.timers
    }

    fn timers_mut(&mut self) -> &mut dyn TimerDelegate {
        &mut self.timers
    }
}
