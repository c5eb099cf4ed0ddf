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

use std::collections::BTreeMap;

use crate::im::FabricIndex;

/// Variable-length, owned per-fabric data.
///
/// Each fabric index owns one sequence. When a fabric index gets reused (the
/// old fabric was removed and a new one took its index), [`FabricArena::claim`]
/// resets the slot so that nothing of the previous owner leaks through.
#[derive(Debug)]
pub struct FabricArena<T> {
    slots: BTreeMap<FabricIndex, Vec<T>>,
    max_per_fabric: usize,
}

impl<T> FabricArena<T> {
    pub const fn new(max_per_fabric: usize) -> Self {
        Self {
            slots: BTreeMap::new(),
            max_per_fabric,
        }
    }

    pub fn max_per_fabric(&self) -> usize {
        self.max_per_fabric
    }

    /// Returns the (reset) slot of a fabric which is taking `fab_idx` into use.
    pub fn claim(&mut self, fab_idx: FabricIndex) -> &mut Vec<T> {
        let slot = self.slots.entry(fab_idx).or_default();
        slot.clear();
        slot
    }

    pub fn get(&self, fab_idx: FabricIndex) -> &[T] {
        self.slots
            .get(&fab_idx)
            .map(|slot| slot.as_slice())
            .unwrap_or(&[])
    }

    /// Appends to the fabric's slot, failing once the slot is full.
    pub fn push(&mut self, fab_idx: FabricIndex, value: T) -> Result<usize, T> {
        let slot = self.slots.entry(fab_idx).or_default();
        if slot.len() >= self.max_per_fabric {
            return Err(value);
        }

        slot.push(value);
        Ok(slot.len() - 1)
    }

    pub fn get_mut(&mut self, fab_idx: FabricIndex, index: usize) -> Option<&mut T> {
        self.slots.get_mut(&fab_idx)?.get_mut(index)
    }

    pub fn remove(&mut self, fab_idx: FabricIndex, index: usize) -> Option<T> {
        let slot = self.slots.get_mut(&fab_idx)?;
        (index < slot.len()).then(|| slot.remove(index))
    }

    /// Drops everything the fabric owned. The slot stays allocated for reuse.
    pub fn reset(&mut self, fab_idx: FabricIndex) {
        if let Some(slot) = self.slots.get_mut(&fab_idx) {
            slot.clear();
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (FabricIndex, &T)> {
        self.slots
            .iter()
            .flat_map(|(fab_idx, slot)| slot.iter().map(move |value| (*fab_idx, value)))
    }

    pub fn len(&self) -> usize {
        self.slots.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
