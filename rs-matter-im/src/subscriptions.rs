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

//! The subscriptions accepted by the engine.
//!
//! A [`Subscription`] carries the negotiated state of one subscribe interaction. The
//! [`SubscriptionPool`] owns both the subscriptions and the [`ReportScheduler`], and is
//! the only place where either gets created or destroyed, so every subscription has
//! exactly one scheduling node for its whole life.

use std::collections::{BTreeMap, BTreeSet};

use embassy_time::Duration;

use log::{debug, info};

use crate::acl::SubjectDescriptor;
use crate::dm::ConcretePath;
use crate::error::{Error, ErrorCode};
use crate::im::{
    AttrPath, DataVersionFilter, EventNumber, EventPath, FabricIndex, NodeId, SubscriptionId,
};
use crate::reporting::{ReportScheduler, TimerKey};
use crate::resumption::SubscriptionInfo;
use crate::utils::epoch::Timestamp;
use crate::utils::fabric_arena::FabricArena;

/// What a report of a subscription has to carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportContent {
    /// Everything the subscription covers
    Full,
    /// The changed attributes only; events are always reported from the subscription's
    /// event floor onwards
    Changes(Vec<ConcretePath>),
}

/// One peer's active subscription.
#[derive(Debug, Clone)]
pub struct Subscription {
    id: SubscriptionId,
    subject: SubjectDescriptor,
    min_int_secs: u16,
    max_int_secs: u16,
    fabric_filtered: bool,
    attr_paths: Vec<AttrPath>,
    event_paths: Vec<EventPath>,
    dataver_filters: Vec<DataVersionFilter>,
    event_min: EventNumber,
    changed: BTreeSet<ConcretePath>,
    events_pending: bool,
    priming: bool,
}

impl Subscription {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: SubscriptionId,
        subject: SubjectDescriptor,
        min_int_secs: u16,
        max_int_secs: u16,
        fabric_filtered: bool,
        attr_paths: Vec<AttrPath>,
        event_paths: Vec<EventPath>,
        event_min: EventNumber,
    ) -> Self {
        Self {
            id,
            subject,
            min_int_secs,
            max_int_secs,
            fabric_filtered,
            attr_paths,
            event_paths,
            dataver_filters: Vec::new(),
            event_min,
            changed: BTreeSet::new(),
            events_pending: false,
            priming: false,
        }
    }

    /// Re-creates a subscription from its persisted record.
    ///
    /// The subscription is re-established with a CASE subject for the stored peer, and
    /// starts out needing a full priming report.
    pub fn from_info(info: &SubscriptionInfo) -> Self {
        let mut sub = Self::new(
            info.subscription_id,
            SubjectDescriptor::case(info.fab_idx, info.node_id, &[]),
            info.min_interval,
            info.max_interval,
            info.fabric_filtered,
            info.attr_paths.clone(),
            info.event_paths.clone(),
            0,
        );

        sub.priming = true;

        sub
    }

    /// The durable projection of this subscription
    pub fn info(&self) -> SubscriptionInfo {
        SubscriptionInfo {
            node_id: self.subject.node_id,
            fab_idx: self.subject.fab_idx,
            subscription_id: self.id,
            min_interval: self.min_int_secs,
            max_interval: self.max_int_secs,
            fabric_filtered: self.fabric_filtered,
            attr_paths: self.attr_paths.clone(),
            event_paths: self.event_paths.clone(),
        }
    }

    pub fn with_dataver_filters(mut self, filters: Vec<DataVersionFilter>) -> Self {
        self.dataver_filters = filters;
        self
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn subject(&self) -> &SubjectDescriptor {
        &self.subject
    }

    pub fn fab_idx(&self) -> FabricIndex {
        self.subject.fab_idx
    }

    pub fn node_id(&self) -> NodeId {
        self.subject.node_id
    }

    pub fn min_int_secs(&self) -> u16 {
        self.min_int_secs
    }

    pub fn max_int_secs(&self) -> u16 {
        self.max_int_secs
    }

    pub fn is_fabric_filtered(&self) -> bool {
        self.fabric_filtered
    }

    pub fn attr_paths(&self) -> &[AttrPath] {
        &self.attr_paths
    }

    pub fn event_paths(&self) -> &[EventPath] {
        &self.event_paths
    }

    pub fn dataver_filters(&self) -> &[DataVersionFilter] {
        &self.dataver_filters
    }

    /// The number of the first event not reported yet
    pub fn event_min(&self) -> EventNumber {
        self.event_min
    }

    pub fn set_event_min(&mut self, event_min: EventNumber) {
        self.event_min = self.event_min.max(event_min);
    }

    pub fn is_priming(&self) -> bool {
        self.priming
    }

    pub fn is_dirty(&self) -> bool {
        self.priming || self.events_pending || !self.changed.is_empty()
    }

    pub fn covers_attr(&self, path: &ConcretePath) -> bool {
        let gp = path.to_gp();
        self.attr_paths.iter().any(|ap| ap.to_gp().matches(&gp))
    }

    pub fn covers_event(&self, path: &ConcretePath) -> bool {
        let gp = path.to_gp();
        self.event_paths.iter().any(|ep| ep.to_gp().matches(&gp))
    }

    /// Records an attribute change, returning whether the subscription covers it
    fn mark_changed(&mut self, path: &ConcretePath) -> bool {
        if self.covers_attr(path) {
            self.changed.insert(*path);
            true
        } else {
            false
        }
    }

    fn mark_event(&mut self, path: &ConcretePath) -> bool {
        if self.covers_event(path) {
            self.events_pending = true;
            true
        } else {
            false
        }
    }

    /// What the next report has to carry
    pub fn report_content(&self) -> ReportContent {
        if self.priming {
            ReportContent::Full
        } else {
            ReportContent::Changes(self.changed.iter().copied().collect())
        }
    }

    fn clear(&mut self) {
        self.changed.clear();
        self.events_pending = false;
        self.priming = false;
    }
}

/// The subscriptions of the engine, paired 1:1 with the nodes of its report scheduler.
///
/// The pool is sized after the scheduler's node pool. On top of that, every fabric may
/// hold at most a configured number of subscriptions.
pub struct SubscriptionPool {
    subscriptions: BTreeMap<SubscriptionId, Subscription>,
    by_fabric: FabricArena<SubscriptionId>,
    scheduler: Box<dyn ReportScheduler>,
    next_id: SubscriptionId,
}

impl SubscriptionPool {
    pub fn new(scheduler: Box<dyn ReportScheduler>, max_per_fabric: usize) -> Self {
        assert_eq!(
            scheduler.node_count(),
            0,
            "The report scheduler already schedules subscriptions"
        );

        Self {
            subscriptions: BTreeMap::new(),
            by_fabric: FabricArena::new(max_per_fabric),
            scheduler,
            next_id: 1,
        }
    }

    pub fn capacity(&self) -> usize {
        self.scheduler.capacity()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    pub fn scheduler(&self) -> &dyn ReportScheduler {
        self.scheduler.as_ref()
    }

    /// A subscription ID not in use, never 0
    pub fn next_id(&mut self) -> SubscriptionId {
        loop {
            let id = self.next_id;
            self.next_id = self.next_id.wrapping_add(1).max(1);

            if !self.subscriptions.contains_key(&id) {
                return id;
            }
        }
    }

    /// Adds a subscription and creates its scheduling node.
    ///
    /// Fails with `ResourceExhausted` if the pool or the fabric's share of it is full,
    /// and with `Duplicate` if the ID is taken.
    pub fn add(&mut self, sub: Subscription, now: Timestamp) -> Result<SubscriptionId, Error> {
        let id = sub.id;

        if self.subscriptions.contains_key(&id) {
            Err(ErrorCode::Duplicate)?;
        }

        if self.subscriptions.len() >= self.capacity() {
            debug!("Subscription pool full");
            Err(ErrorCode::ResourceExhausted)?;
        }

        if self.by_fabric.push(sub.fab_idx(), id).is_err() {
            debug!("Subscriptions of fabric {} exhausted", sub.fab_idx());
            Err(ErrorCode::ResourceExhausted)?;
        }

        if id >= self.next_id {
            self.next_id = id.wrapping_add(1).max(1);
        }

        self.scheduler.on_subscription_established(
            id,
            Duration::from_secs(sub.min_int_secs as _),
            Duration::from_secs(sub.max_int_secs as _),
            now,
        );

        info!(
            "Subscription [F:{:x},P:{:x}]::{} created",
            sub.fab_idx(),
            sub.node_id(),
            id
        );

        self.subscriptions.insert(id, sub);

        Ok(id)
    }

    /// Removes a subscription along with its scheduling node
    pub fn remove(&mut self, id: SubscriptionId) -> Option<Subscription> {
        let sub = self.subscriptions.remove(&id)?;

        self.scheduler.on_subscription_destroyed(id);

        let fab_idx = sub.fab_idx();
        if let Some(index) = self
            .by_fabric
            .get(fab_idx)
            .iter()
            .position(|sid| *sid == id)
        {
            self.by_fabric.remove(fab_idx, index);
        }

        info!(
            "Subscription [F:{:x},P:{:x}]::{} removed",
            sub.fab_idx(),
            sub.node_id(),
            id
        );

        Some(sub)
    }

    /// Removes every subscription of a peer
    pub fn remove_for_peer(&mut self, fab_idx: FabricIndex, node_id: NodeId) -> Vec<Subscription> {
        self.remove_where(|sub| sub.fab_idx() == fab_idx && sub.node_id() == node_id)
    }

    /// Removes every subscription of a fabric
    pub fn remove_for_fabric(&mut self, fab_idx: FabricIndex) -> Vec<Subscription> {
        let removed = self.remove_where(|sub| sub.fab_idx() == fab_idx);
        self.by_fabric.reset(fab_idx);

        removed
    }

    fn remove_where<F>(&mut self, f: F) -> Vec<Subscription>
    where
        F: Fn(&Subscription) -> bool,
    {
        let ids = self
            .subscriptions
            .values()
            .filter(|sub| f(sub))
            .map(Subscription::id)
            .collect::<Vec<_>>();

        ids.into_iter().filter_map(|id| self.remove(id)).collect()
    }

    pub fn get(&self, id: SubscriptionId) -> Option<&Subscription> {
        self.subscriptions.get(&id)
    }

    pub fn get_mut(&mut self, id: SubscriptionId) -> Option<&mut Subscription> {
        self.subscriptions.get_mut(&id)
    }

    pub fn ids(&self) -> Vec<SubscriptionId> {
        self.subscriptions.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Subscription> {
        self.subscriptions.values()
    }

    pub fn count_for_fabric(&self, fab_idx: FabricIndex) -> usize {
        self.by_fabric.get(fab_idx).len()
    }

    /// Marks the subscriptions covering an attribute dirty.
    ///
    /// Returns how many subscriptions were affected.
    pub fn mark_attribute_changed(&mut self, path: &ConcretePath, now: Timestamp) -> usize {
        let mut marked = 0;

        for sub in self.subscriptions.values_mut() {
            if sub.mark_changed(path) {
                self.scheduler.on_became_reportable(sub.id, now);
                marked += 1;
            }
        }

        marked
    }

    /// Marks the subscriptions covering an event dirty
    pub fn mark_event_emitted(&mut self, path: &ConcretePath, now: Timestamp) -> usize {
        let mut marked = 0;

        for sub in self.subscriptions.values_mut() {
            if sub.mark_event(path) {
                self.scheduler.on_became_reportable(sub.id, now);
                marked += 1;
            }
        }

        marked
    }

    /// The subscriptions to report on in a reporting pass at `now`
    pub fn reportable(&self, now: Timestamp) -> Vec<SubscriptionId> {
        self.subscriptions
            .values()
            .filter(|sub| sub.priming || self.scheduler.is_reportable_now(sub.id, now))
            .map(Subscription::id)
            .collect()
    }

    /// Records that a report went out, restarting the subscription's intervals
    pub fn report_sent(&mut self, id: SubscriptionId, event_min: EventNumber, now: Timestamp) {
        if let Some(sub) = self.subscriptions.get_mut(&id) {
            sub.clear();
            sub.set_event_min(event_min);

            self.scheduler.on_subscription_report_sent(id, now);
        }
    }

    /// The earliest moment a scheduler timer expires
    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.scheduler.timers().next_deadline()
    }

    /// Hands the expired scheduler timers back to the scheduler.
    ///
    /// Returns whether any timer expired, i.e. whether a reporting pass is due.
    pub fn fire_expired_timers(&mut self, now: Timestamp) -> bool {
        let expired: Vec<TimerKey> = self.scheduler.timers_mut().take_expired(now);

        for key in &expired {
            self.scheduler.on_timer_fired(*key, now);
        }

        !expired.is_empty()
    }
}

impl Drop for SubscriptionPool {
    fn drop(&mut self) {
        for id in self.ids() {
            self.scheduler.on_subscription_destroyed(id);
        }
    }
}
