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

//! Persistence of subscriptions, so that they can be resumed after a restart.
//!
//! Every subscription is stored as its own record, under the key
//! `su/{fabric}/{node}/{subscription id}`. An index record lists the keys of all
//! records; iteration walks the index and loads every record lazily.

use core::fmt;

use log::{debug, info, warn};

use crate::error::{Error, ErrorCode};
use crate::im::{AttrPath, EventPath, FabricIndex, NodeId, SubscriptionId};
use crate::persist::KvBlobStore;
use crate::tlv::{
    from_tlv_member, get_root_node, to_tlv_vec, FromTLV, TLVElement, TLVWriter, TagType, ToTLV,
};

/// The maximum serialized size of the attribute and event paths of one subscription
pub const MAX_SERIALIZED_PATHS_SIZE: usize = 65535;

/// Room for the scalar members of a record on top of its paths
const RECORD_OVERHEAD: usize = 64;

const INDEX_KEY: &str = "su/idx";

/// The durable projection of a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionInfo {
    pub node_id: NodeId,
    pub fab_idx: FabricIndex,
    pub subscription_id: SubscriptionId,
    /// Negotiated minimum interval, in seconds
    pub min_interval: u16,
    /// Negotiated maximum interval, in seconds
    pub max_interval: u16,
    pub fabric_filtered: bool,
    pub attr_paths: Vec<AttrPath>,
    pub event_paths: Vec<EventPath>,
}

impl SubscriptionInfo {
    pub fn key(&self) -> SubscriptionKey {
        SubscriptionKey {
            fab_idx: self.fab_idx,
            node_id: self.node_id,
            subscription_id: self.subscription_id,
        }
    }
}

impl<'a> FromTLV<'a> for SubscriptionInfo {
    fn from_tlv(t: &TLVElement<'a>) -> Result<Self, Error> {
        let t = t.confirm_struct()?;

        Ok(Self {
            node_id: from_tlv_member(&t, 0)?,
            fab_idx: from_tlv_member(&t, 1)?,
            subscription_id: from_tlv_member(&t, 2)?,
            min_interval: from_tlv_member(&t, 3)?,
            max_interval: from_tlv_member(&t, 4)?,
            fabric_filtered: from_tlv_member(&t, 5)?,
            attr_paths: from_tlv_member(&t, 6)?,
            event_paths: from_tlv_member(&t, 7)?,
        })
    }
}

impl ToTLV for SubscriptionInfo {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: TagType) -> Result<(), Error> {
        tw.start_struct(tag)?;
        tw.u64(TagType::Context(0), self.node_id)?;
        tw.u8(TagType::Context(1), self.fab_idx)?;
        tw.u32(TagType::Context(2), self.subscription_id)?;
        tw.u16(TagType::Context(3), self.min_interval)?;
        tw.u16(TagType::Context(4), self.max_interval)?;
        tw.bool(TagType::Context(5), self.fabric_filtered)?;
        self.attr_paths.to_tlv(tw, TagType::Context(6))?;
        self.event_paths.to_tlv(tw, TagType::Context(7))?;
        tw.end_container()
    }
}

/// Identifies one stored subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionKey {
    pub fab_idx: FabricIndex,
    pub node_id: NodeId,
    pub subscription_id: SubscriptionId,
}

impl SubscriptionKey {
    fn storage_key(&self) -> String {
        format!(
            "su/{:02x}/{:016x}/{:08x}",
            self.fab_idx, self.node_id, self.subscription_id
        )
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[F:{},P:{}]::{}",
            self.fab_idx, self.node_id, self.subscription_id
        )
    }
}

impl<'a> FromTLV<'a> for SubscriptionKey {
    fn from_tlv(t: &TLVElement<'a>) -> Result<Self, Error> {
        let t = t.confirm_struct()?;

        Ok(Self {
            fab_idx: from_tlv_member(&t, 0)?,
            node_id: from_tlv_member(&t, 1)?,
            subscription_id: from_tlv_member(&t, 2)?,
        })
    }
}

impl ToTLV for SubscriptionKey {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: TagType) -> Result<(), Error> {
        tw.start_struct(tag)?;
        tw.u8(TagType::Context(0), self.fab_idx)?;
        tw.u64(TagType::Context(1), self.node_id)?;
        tw.u32(TagType::Context(2), self.subscription_id)?;
        tw.end_container()
    }
}

/// A one-shot iteration over the stored subscriptions
pub type SubscriptionIter<'a> = Box<dyn Iterator<Item = Result<SubscriptionInfo, Error>> + 'a>;

/// The subscription resumption store.
pub trait SubscriptionResumptionStorage {
    /// Iterates the stored subscriptions. Records which cannot be loaded are skipped.
    fn iterate(&self) -> Result<SubscriptionIter<'_>, Error>;

    fn load(&self, key: &SubscriptionKey) -> Result<Option<SubscriptionInfo>, Error>;

    /// Inserts or replaces the record of a subscription.
    ///
    /// Fails with `BufferTooSmall`, without storing anything, if the paths serialize to
    /// more than [`MAX_SERIALIZED_PATHS_SIZE`] bytes.
    fn save(&mut self, info: &SubscriptionInfo) -> Result<(), Error>;

    /// Removes one record, failing with `NotFound` if there is no such record
    fn delete(&mut self, key: &SubscriptionKey) -> Result<(), Error>;

    /// Removes all records of a fabric; a fabric without records is not an error
    fn delete_all(&mut self, fab_idx: FabricIndex) -> Result<(), Error>;
}

/// The [`SubscriptionResumptionStorage`] over a [`KvBlobStore`].
pub struct DefaultSubscriptionResumptionStorage<S> {
    store: S,
}

impl<S> DefaultSubscriptionResumptionStorage<S>
where
    S: KvBlobStore,
{
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn load_index(&self) -> Result<Vec<SubscriptionKey>, Error> {
        match load_owned(&self.store, INDEX_KEY, usize::MAX)? {
            Some(data) => Vec::<SubscriptionKey>::from_tlv(&get_root_node(&data)?),
            None => Ok(Vec::new()),
        }
    }

    fn store_index(&mut self, index: &[SubscriptionKey]) -> Result<(), Error> {
        if index.is_empty() {
            self.store.remove(INDEX_KEY)
        } else {
            self.store.store(INDEX_KEY, &to_tlv_vec(index)?)
        }
    }
}

impl<S> SubscriptionResumptionStorage for DefaultSubscriptionResumptionStorage<S>
where
    S: KvBlobStore,
{
    fn iterate(&self) -> Result<SubscriptionIter<'_>, Error> {
        let index = self.load_index()?;

        Ok(Box::new(index.into_iter().filter_map(move |key| {
            match self.load(&key) {
                Ok(Some(info)) => Some(Ok(info)),
                Ok(None) => {
                    warn!("Subscription {} is indexed but not stored, skipping", key);
                    None
                }
                Err(e) if e.code() == ErrorCode::StdIoError => Some(Err(e)),
                Err(e) => {
                    warn!("Subscription {} cannot be loaded ({:?}), skipping", key, e);
                    None
                }
            }
        })))
    }

    fn load(&self, key: &SubscriptionKey) -> Result<Option<SubscriptionInfo>, Error> {
        let Some(data) = load_owned(
            &self.store,
            &key.storage_key(),
            MAX_SERIALIZED_PATHS_SIZE + RECORD_OVERHEAD,
        )?
        else {
            return Ok(None);
        };

        let info = SubscriptionInfo::from_tlv(&get_root_node(&data)?)?;
        if info.key() != *key {
            Err(ErrorCode::InvalidData)?;
        }

        Ok(Some(info))
    }

    fn save(&mut self, info: &SubscriptionInfo) -> Result<(), Error> {
        let paths_size =
            to_tlv_vec(&info.attr_paths)?.len() + to_tlv_vec(&info.event_paths)?.len();
        if paths_size > MAX_SERIALIZED_PATHS_SIZE {
            warn!(
                "Subscription {}: {} bytes of paths, not persisted",
                info.key(),
                paths_size
            );
            Err(ErrorCode::BufferTooSmall)?;
        }

        let key = info.key();
        let mut index = self.load_index()?;

        self.store.store(&key.storage_key(), &to_tlv_vec(info)?)?;

        if !index.contains(&key) {
            index.push(key);

            if let Err(e) = self.store_index(&index) {
                // A record missing from the index is never resumed nor deleted
                if let Err(e) = self.store.remove(&key.storage_key()) {
                    warn!("Subscription {}: removing the record failed: {:?}", key, e.code());
                }

                return Err(e);
            }
        }

        debug!("Subscription {} persisted", key);

        Ok(())
    }

    fn delete(&mut self, key: &SubscriptionKey) -> Result<(), Error> {
        let mut index = self.load_index()?;
        let position = index
            .iter()
            .position(|indexed| indexed == key)
            .ok_or(ErrorCode::NotFound)?;

        index.remove(position);
        self.store_index(&index)?;
        self.store.remove(&key.storage_key())?;

        debug!("Subscription {} deleted", key);

        Ok(())
    }

    fn delete_all(&mut self, fab_idx: FabricIndex) -> Result<(), Error> {
        let index = self.load_index()?;
        let (removed, kept): (Vec<_>, Vec<_>) =
            index.into_iter().partition(|key| key.fab_idx == fab_idx);

        if removed.is_empty() {
            return Ok(());
        }

        self.store_index(&kept)?;
        for key in &removed {
            self.store.remove(&key.storage_key())?;
        }

        info!(
            "Deleted {} persisted subscriptions of fabric {}",
            removed.len(),
            fab_idx
        );

        Ok(())
    }
}

/// Loads a value of unknown size, growing the buffer up to `max` bytes
fn load_owned<S: KvBlobStore>(
    store: &S,
    key: &str,
    max: usize,
) -> Result<Option<Vec<u8>>, Error> {
    let mut size = 256;

    loop {
        let mut buf = vec![0; size];

        match store.load(key, &mut buf) {
            Ok(Some(data)) => {
                let len = data.len();
                buf.truncate(len);
                return Ok(Some(buf));
            }
            Ok(None) => return Ok(None),
            Err(e) if e.code() == ErrorCode::BufferTooSmall && size < max => {
                size = size.saturating_mul(2).min(max);
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        DefaultSubscriptionResumptionStorage, SubscriptionInfo, SubscriptionKey,
        SubscriptionResumptionStorage,
    };
    use crate::error::{Error, ErrorCode};
    use crate::im::{AttrPath, EventPath};
    use crate::persist::{KvBlobStore, MemKvStore};

    use super::INDEX_KEY;

    /// Fails every write of the index
    #[derive(Default)]
    struct NoIndexStore(MemKvStore);

    impl KvBlobStore for NoIndexStore {
        fn load<'b>(&self, key: &str, buf: &'b mut [u8]) -> Result<Option<&'b [u8]>, Error> {
            self.0.load(key, buf)
        }

        fn store(&mut self, key: &str, data: &[u8]) -> Result<(), Error> {
            if key == INDEX_KEY {
                Err(ErrorCode::StdIoError)?;
            }

            self.0.store(key, data)
        }

        fn remove(&mut self, key: &str) -> Result<(), Error> {
            self.0.remove(key)
        }
    }

    fn info(fab_idx: u8, node_id: u64, subscription_id: u32, paths: usize) -> SubscriptionInfo {
        SubscriptionInfo {
            node_id,
            fab_idx,
            subscription_id,
            min_interval: 1,
            max_interval: 60,
            fabric_filtered: true,
            attr_paths: (0..paths)
                .map(|i| AttrPath {
                    endpoint: Some(1),
                    cluster: Some(6),
                    attr: Some(i as u32),
                    ..Default::default()
                })
                .collect(),
            event_paths: vec![EventPath {
                endpoint: Some(0),
                ..Default::default()
            }],
        }
    }

    #[test]
    fn test_save_load_iterate() {
        let mut storage = DefaultSubscriptionResumptionStorage::new(MemKvStore::new());

        let first = info(1, 100, 7, 3);
        let second = info(2, 200, 8, 1);
        storage.save(&first).unwrap();
        storage.save(&second).unwrap();

        assert_eq!(storage.load(&first.key()).unwrap(), Some(first.clone()));

        let mut updated = first.clone();
        updated.max_interval = 120;
        storage.save(&updated).unwrap();

        let all = storage
            .iterate()
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(all, vec![updated, second]);
    }

    #[test]
    fn test_failed_index_write_leaves_no_record() {
        let mut storage = DefaultSubscriptionResumptionStorage::new(NoIndexStore::default());

        let first = info(1, 100, 7, 1);
        assert_eq!(storage.save(&first).unwrap_err().code(), ErrorCode::StdIoError);

        assert!(storage.store().0.is_empty());
        assert_eq!(storage.iterate().unwrap().count(), 0);
    }

    #[test]
    fn test_delete() {
        let mut storage = DefaultSubscriptionResumptionStorage::new(MemKvStore::new());
        let first = info(1, 100, 7, 1);
        storage.save(&first).unwrap();

        storage.delete(&first.key()).unwrap();
        assert_eq!(
            storage.delete(&first.key()).unwrap_err().code(),
            ErrorCode::NotFound
        );
        assert_eq!(storage.load(&first.key()).unwrap(), None);
        assert!(storage.store().is_empty());
    }

    #[test]
    fn test_delete_all() {
        let mut storage = DefaultSubscriptionResumptionStorage::new(MemKvStore::new());

        storage.delete_all(3).unwrap();

        storage.save(&info(1, 100, 1, 1)).unwrap();
        storage.save(&info(1, 101, 2, 1)).unwrap();
        storage.save(&info(2, 100, 3, 1)).unwrap();

        storage.delete_all(1).unwrap();
        storage.delete_all(1).unwrap();

        let left = storage
            .iterate()
            .unwrap()
            .map(|info| info.unwrap().key())
            .collect::<Vec<_>>();
        assert_eq!(
            left,
            vec![SubscriptionKey {
                fab_idx: 2,
                node_id: 100,
                subscription_id: 3
            }]
        );
    }

    #[test]
    fn test_paths_size_cap() {
        let mut storage = DefaultSubscriptionResumptionStorage::new(MemKvStore::new());

        // A path takes 8 to 9 bytes here
        let too_big = info(1, 100, 1, 8000);
        assert_eq!(
            storage.save(&too_big).unwrap_err().code(),
            ErrorCode::BufferTooSmall
        );
        assert!(storage.store().is_empty());

        let big = info(1, 100, 2, 3000);
        storage.save(&big).unwrap();
        assert_eq!(storage.load(&big.key()).unwrap(), Some(big));
    }

    #[test]
    fn test_corrupt_records_are_skipped() {
        let mut store = MemKvStore::new();
        {
            let mut storage = DefaultSubscriptionResumptionStorage::new(&mut store);
            storage.save(&info(1, 100, 1, 1)).unwrap();
            storage.save(&info(1, 100, 2, 1)).unwrap();
        }

        store.store("su/01/0000000000000064/00000001", &[0x15]).unwrap();

        let storage = DefaultSubscriptionResumptionStorage::new(store);
        let ids = storage
            .iterate()
            .unwrap()
            .map(|info| info.unwrap().subscription_id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![2]);
    }
}
