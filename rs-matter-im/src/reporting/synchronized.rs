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

use super::{
    NodePool, ReadHandlerNode, ReportScheduler, TimerDelegate, TimerKey, SYNC_TIMER_KEY,
};

/// A [`ReportScheduler`] aligning the reports of all subscriptions on a single timer.
///
/// The timer is armed for the earliest `max_timestamp` of all nodes, or the earliest
/// `min_timestamp` of a dirty node if that comes first. When it fires, every node whose
/// min interval has elapsed is reported along, so that a sleepy device wakes up once
/// for all of its subscribers.
#[derive(Debug)]
pub struct SynchronizedReportScheduler<T> {
    nodes: NodePool,
    timers: T,
}

impl<T> SynchronizedReportScheduler<T>
where
    T: TimerDelegate,
{
    pub fn new(capacity: usize, timers: T) -> Self {
        Self {
            nodes: NodePool::new(capacity),
            timers,
        }
    }

    fn earliest_deadline(&self, now: Timestamp) -> Option<Timestamp> {
        self.nodes
            .nodes
            .values()
            .map(|node| {
                if node.is_reportable_now(now) {
                    now
                } else if node.dirty {
                    node.min_timestamp.min(node.max_timestamp)
                } else {
                    node.max_timestamp
                }
            })
            .min()
    }

    fn reschedule(&mut self, now: Timestamp) {
        match self.earliest_deadline(now) {
            Some(deadline) => {
                let timeout = deadline.saturating_duration_since(now);

                debug!("Next synchronized report in {} ms", timeout.as_millis());
                self.timers.start_timer(SYNC_TIMER_KEY, now, timeout);
            }
            None => self.timers.cancel_timer(SYNC_TIMER_KEY),
        }
    }
}

impl<T> ReportScheduler for SynchronizedReportScheduler<T>
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
        self.reschedule(now);
    }

    fn on_became_reportable(&mut self, id: SubscriptionId, now: Timestamp) {
        if let Some(node) = self.nodes.nodes.get_mut(&id) {
            node.dirty = true;
            self.reschedule(now);
        }
    }

    fn on_subscription_report_sent(&mut self, id: SubscriptionId, now: Timestamp) {
        if let Some(node) = self.nodes.nodes.get_mut(&id) {
            node.dirty = false;
            node.synced = false;
            node.set_interval_timestamps(now);
            self.reschedule(now);
        }
    }

    fn on_subscription_destroyed(&mut self, id: SubscriptionId) {
        // The timer may still be armed for the node's deadline; it re-arms when it fires
        if self.nodes.nodes.remove(&id).is_some() && self.nodes.nodes.is_empty() {
            self.timers.cancel_timer(SYNC_TIMER_KEY);
        }
    }

    fn on_timer_fired(&mut self, key: TimerKey, now: Timestamp) {
        if key != SYNC_TIMER_KEY {
            return;
        }

        for node in self.nodes.nodes.values_mut() {
            if now >= node.min_timestamp {
                node.synced = true;
            }
        }

        self.reschedule(now);
    }

    fn cancel_report(&mut self, id: SubscriptionId) {
        if let Some(node) = self.nodes.nodes.get_mut(&id) {
            node.synced = false;
        }
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

#[cfg(test)]
mod tests {
    use embassy_time::{Duration, Instant};

    use crate::reporting::{ReportScheduler, TimerQueue, SYNC_TIMER_KEY};

    use super::SynchronizedReportScheduler;

    fn secs(secs: u64) -> Duration {
        Duration::from_secs(secs)
    }

    fn at(secs: u64) -> Instant {
        Instant::from_secs(secs)
    }

    #[test]
    fn test_single_timer_on_earliest_max() {
        let mut scheduler = SynchronizedReportScheduler::new(4, TimerQueue::new());

        scheduler.on_subscription_established(1, secs(2), secs(30), at(0));
        scheduler.on_subscription_established(2, secs(2), secs(20), at(0));

        assert!(scheduler.timers().is_timer_active(SYNC_TIMER_KEY));
        assert_eq!(scheduler.timers().next_deadline(), Some(at(20)));

        scheduler.on_became_reportable(1, at(1));
        assert_eq!(scheduler.timers().next_deadline(), Some(at(2)));
    }

    #[test]
    fn test_fired_timer_syncs_eligible_nodes() {
        let mut scheduler = SynchronizedReportScheduler::new(4, TimerQueue::new());

        scheduler.on_subscription_established(1, secs(2), secs(20), at(0));
        scheduler.on_subscription_established(2, secs(2), secs(30), at(0));
        scheduler.on_subscription_established(3, secs(25), secs(40), at(0));

        let expired = scheduler.timers_mut().take_expired(at(20));
        assert_eq!(expired, vec![SYNC_TIMER_KEY]);
        scheduler.on_timer_fired(SYNC_TIMER_KEY, at(20));

        assert!(scheduler.is_reportable_now(1, at(20)));
        assert!(scheduler.is_reportable_now(2, at(20)));
        assert!(!scheduler.is_reportable_now(3, at(20)));

        scheduler.on_subscription_report_sent(1, at(20));
        scheduler.on_subscription_report_sent(2, at(20));
        assert_eq!(scheduler.timers().next_deadline(), Some(at(40)));

        scheduler.on_subscription_destroyed(1);
        scheduler.on_subscription_destroyed(2);
        scheduler.on_subscription_destroyed(3);
        assert!(!scheduler.timers().is_timer_active(SYNC_TIMER_KEY));
    }

    #[test]
    fn test_timer_rearms_after_destroyed_node() {
        let mut scheduler = SynchronizedReportScheduler::new(4, TimerQueue::new());

        scheduler.on_subscription_established(1, secs(1), secs(5), at(0));
        scheduler.on_subscription_established(2, secs(10), secs(60), at(0));
        assert_eq!(scheduler.timers().next_deadline(), Some(at(5)));

        scheduler.on_subscription_destroyed(1);

        let expired = scheduler.timers_mut().take_expired(at(5));
        assert_eq!(expired, vec![SYNC_TIMER_KEY]);
        scheduler.on_timer_fired(SYNC_TIMER_KEY, at(5));

        assert!(!scheduler.is_reportable_now(2, at(5)));
        assert_eq!(scheduler.timers().next_deadline(), Some(at(60)));
    }
}
