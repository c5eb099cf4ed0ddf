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

//! A bounded in-memory log of the events emitted by the clusters of the node.

use std::collections::VecDeque;

use log::{debug, trace};

use crate::dm::{ConcretePath, EventPriority};
use crate::error::Error;
use crate::im::{EventDataTag, EventNumber, FabricIndex, GenericPath};
use crate::tlv::{get_root_node, to_tlv_vec, TLVWriter, TagType, ToTLV};
use crate::utils::epoch::Timestamp;

/// Context tag of the EventDataIB within an EventReportIB
const EVENT_REPORT_DATA_TAG: u8 = 1;

/// One emitted event, with its fields already encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub number: EventNumber,
    pub path: ConcretePath,
    pub priority: EventPriority,
    /// Emission time, relative to the epoch of the engine clock
    pub timestamp: Timestamp,
    /// The fabric the event is bound to, 0 if it is visible to all fabrics
    pub fab_idx: FabricIndex,
    /// A single anonymous TLV element
    pub data: Vec<u8>,
}

impl EventRecord {
    /// Whether `fab_idx` may see this event
    pub fn is_visible_to(&self, fab_idx: FabricIndex) -> bool {
        self.fab_idx == 0 || self.fab_idx == fab_idx
    }
}

/// Writes the record as an EventReportIB
impl ToTLV for EventRecord {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: TagType) -> Result<(), Error> {
        tw.start_struct(tag)?;
        tw.start_struct(TagType::Context(EVENT_REPORT_DATA_TAG))?;
        self.path
            .event_path()
            .to_tlv(tw, TagType::Context(EventDataTag::Path as _))?;
        tw.u64(TagType::Context(EventDataTag::EventNumber as _), self.number)?;
        tw.u8(
            TagType::Context(EventDataTag::Priority as _),
            self.priority as u8,
        )?;
        tw.u64(
            TagType::Context(EventDataTag::SystemTimestamp as _),
            self.timestamp.as_millis(),
        )?;
        tw.element(
            TagType::Context(EventDataTag::Data as _),
            &get_root_node(&self.data)?,
        )?;
        tw.end_container()?;
        tw.end_container()
    }
}

/// The event log.
///
/// Event numbers increase monotonically across the life of the log. When the log is
/// full, the oldest event of the lowest priority present is dropped first.
#[derive(Debug)]
pub struct EventLog {
    capacity: usize,
    records: VecDeque<EventRecord>,
    next_number: EventNumber,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            records: VecDeque::new(),
            next_number: 1,
        }
    }

    /// Appends an event carrying `data`, returning its number
    pub fn emit<T: ToTLV + ?Sized>(
        &mut self,
        path: ConcretePath,
        priority: EventPriority,
        fab_idx: FabricIndex,
        timestamp: Timestamp,
        data: &T,
    ) -> Result<EventNumber, Error> {
        let data = to_tlv_vec(data)?;

        if self.capacity == 0 {
            // Nothing is retained, the number is still consumed
            let number = self.next_number;
            self.next_number += 1;
            return Ok(number);
        }

        while self.records.len() >= self.capacity {
            self.evict();
        }

        let number = self.next_number;
        self.next_number += 1;

        debug!("Event {} emitted on {} ({:?})", number, path, priority);

        self.records.push_back(EventRecord {
            number,
            path,
            priority,
            timestamp,
            fab_idx,
            data,
        });

        Ok(number)
    }

    fn evict(&mut self) {
        let victim = self
            .records
            .iter()
            .enumerate()
            .min_by_key(|(_, record)| (record.priority, record.number))
            .map(|(index, _)| index);

        if let Some(record) = victim.and_then(|index| self.records.remove(index)) {
            trace!("Event {} evicted", record.number);
        }
    }

    /// The number the next emitted event will get
    pub fn next_number(&self) -> EventNumber {
        self.next_number
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, number: EventNumber) -> Option<&EventRecord> {
        self.records.iter().find(|record| record.number == number)
    }

    /// The events numbered `min_number` or above matching any of `paths`, in emission order
    pub fn matching<'a>(
        &'a self,
        paths: &'a [GenericPath],
        min_number: EventNumber,
    ) -> impl Iterator<Item = &'a EventRecord> + 'a {
        self.records.iter().filter(move |record| {
            record.number >= min_number
                && paths
                    .iter()
                    .any(|path| path.matches(&record.path.to_gp()))
        })
    }

    /// Drops the events bound to a removed fabric
    pub fn remove_fabric(&mut self, fab_idx: FabricIndex) {
        self.records.retain(|record| record.fab_idx != fab_idx);
    }
}

#[cfg(test)]
mod tests {
    use embassy_time::Instant;

    use super::EventLog;
    use crate::dm::{ConcretePath, EventPriority};
    use crate::im::{EventResp, GenericPath};
    use crate::tlv::{get_root_node, to_tlv_vec, FromTLV};

    fn path(event: u32) -> ConcretePath {
        ConcretePath::new(1, 0x28, event)
    }

    #[test]
    fn test_numbers_and_filtering() {
        let mut log = EventLog::new(8);

        for i in 0..4 {
            log.emit(path(i % 2), EventPriority::Info, 0, Instant::MIN, &i)
                .unwrap();
        }

        let paths = [GenericPath::new(Some(1), Some(0x28), Some(1))];
        let numbers = log
            .matching(&paths, 0)
            .map(|record| record.number)
            .collect::<Vec<_>>();
        assert_eq!(numbers, vec![2, 4]);

        let numbers = log
            .matching(&paths, 3)
            .map(|record| record.number)
            .collect::<Vec<_>>();
        assert_eq!(numbers, vec![4]);

        let wildcard = [GenericPath::new(None, None, None)];
        assert_eq!(log.matching(&wildcard, 0).count(), 4);
    }

    #[test]
    fn test_eviction_prefers_low_priority() {
        let mut log = EventLog::new(3);

        log.emit(path(0), EventPriority::Critical, 0, Instant::MIN, &0_u8)
            .unwrap();
        log.emit(path(0), EventPriority::Debug, 0, Instant::MIN, &1_u8)
            .unwrap();
        log.emit(path(0), EventPriority::Info, 0, Instant::MIN, &2_u8)
            .unwrap();
        log.emit(path(0), EventPriority::Info, 0, Instant::MIN, &3_u8)
            .unwrap();
        log.emit(path(0), EventPriority::Info, 0, Instant::MIN, &4_u8)
            .unwrap();

        assert_eq!(log.len(), 3);
        assert!(log.get(1).is_some());
        assert!(log.get(2).is_none());
        assert!(log.get(3).is_none());
        assert_eq!(log.next_number(), 6);
    }

    #[test]
    fn test_report_encoding() {
        let mut log = EventLog::new(2);
        let number = log
            .emit(
                path(3),
                EventPriority::Critical,
                2,
                Instant::from_millis(1500),
                &42_u16,
            )
            .unwrap();

        let record = log.get(number).unwrap();
        assert!(record.is_visible_to(2));
        assert!(!record.is_visible_to(1));

        let encoded = to_tlv_vec(record).unwrap();
        match EventResp::from_tlv(&get_root_node(&encoded).unwrap()).unwrap() {
            EventResp::Data(data) => {
                assert_eq!(data.event_number, number);
                assert_eq!(data.priority, 2);
                assert_eq!(data.system_timestamp_ms, Some(1500));
                assert_eq!(data.path.event, Some(3));
                assert_eq!(data.data.u16().unwrap(), 42);
            }
            other => panic!("unexpected report {:?}", other),
        }

        log.remove_fabric(2);
        assert!(log.is_empty());
    }
}
