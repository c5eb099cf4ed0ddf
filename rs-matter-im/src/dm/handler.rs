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

use log::{debug, info};

use crate::error::{Error, ErrorCode};
use crate::im::{ClusterId, DataVersion, EndptId};
use crate::tlv::TLVElement;

use super::{AttrDataDecoder, AttrDataEncoder, AttrDetails, CmdDetails, CmdReply, Dataver};

/// The capability interface of a cluster implementation.
///
/// One handler instance serves one (endpoint, cluster) pair. Metadata lookups, access
/// control, timed-interaction and data-version checks have all been done by the time a
/// handler method is called, and global attributes never reach it.
pub trait Handler {
    fn read(&self, attr: &AttrDetails, encoder: &mut AttrDataEncoder) -> Result<(), Error>;

    /// Writes an attribute.
    ///
    /// For list attributes the decoder carries a [`ListOp`](super::ListOp). Chunked list
    /// writes are bracketed by [`Handler::list_write_begin`] and [`Handler::list_write_end`].
    fn write(&mut self, _attr: &AttrDetails, _data: &AttrDataDecoder) -> Result<(), Error> {
        Err(ErrorCode::UnsupportedWrite.into())
    }

    fn list_write_begin(&mut self, _attr: &AttrDetails) -> Result<(), Error> {
        Ok(())
    }

    /// Closes a list write; `successful` is false if any of its chunks failed
    fn list_write_end(&mut self, _attr: &AttrDetails, _successful: bool) -> Result<(), Error> {
        Ok(())
    }

    fn invoke(
        &mut self,
        _cmd: &CmdDetails,
        _data: Option<&TLVElement>,
        _reply: &mut CmdReply,
    ) -> Result<(), Error> {
        Err(ErrorCode::CommandNotFound.into())
    }
}

impl<T> Handler for Box<T>
where
    T: Handler + ?Sized,
{
    fn read(&self, attr: &AttrDetails, encoder: &mut AttrDataEncoder) -> Result<(), Error> {
        (**self).read(attr, encoder)
    }

    fn write(&mut self, attr: &AttrDetails, data: &AttrDataDecoder) -> Result<(), Error> {
        (**self).write(attr, data)
    }

    fn list_write_begin(&mut self, attr: &AttrDetails) -> Result<(), Error> {
        (**self).list_write_begin(attr)
    }

    fn list_write_end(&mut self, attr: &AttrDetails, successful: bool) -> Result<(), Error> {
        (**self).list_write_end(attr, successful)
    }

    fn invoke(
        &mut self,
        cmd: &CmdDetails,
        data: Option<&TLVElement>,
        reply: &mut CmdReply,
    ) -> Result<(), Error> {
        (**self).invoke(cmd, data, reply)
    }
}

struct Entry {
    handler: Box<dyn Handler>,
    dataver: Dataver,
}

/// Maps (endpoint, cluster) pairs to the handlers serving them.
#[derive(Default)]
pub struct HandlerRegistry {
    entries: BTreeMap<(EndptId, ClusterId), Entry>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for the given cluster.
    ///
    /// Fails with `Duplicate` if one is registered already.
    pub fn register<H>(
        &mut self,
        endpoint: EndptId,
        cluster: ClusterId,
        handler: H,
    ) -> Result<(), Error>
    where
        H: Handler + 'static,
    {
        if self.entries.contains_key(&(endpoint, cluster)) {
            Err(ErrorCode::Duplicate)?;
        }

        self.entries.insert(
            (endpoint, cluster),
            Entry {
                handler: Box::new(handler),
                dataver: Dataver::new_rand(&mut rand::thread_rng()),
            },
        );

        info!(
            "Endpt(0x{:02x})::Cluster(0x{:04x}): handler registered",
            endpoint, cluster
        );

        Ok(())
    }

    pub fn unregister(
        &mut self,
        endpoint: EndptId,
        cluster: ClusterId,
    ) -> Result<Box<dyn Handler>, Error> {
        let entry = self
            .entries
            .remove(&(endpoint, cluster))
            .ok_or(ErrorCode::NotFound)?;

        info!(
            "Endpt(0x{:02x})::Cluster(0x{:04x}): handler unregistered",
            endpoint, cluster
        );

        Ok(entry.handler)
    }

    /// Drops all handlers of an endpoint, returning how many there were
    pub fn unregister_endpoint(&mut self, endpoint: EndptId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(ep, _), _| *ep != endpoint);

        let removed = before - self.entries.len();
        debug!("Endpt(0x{:02x}): {} handlers unregistered", endpoint, removed);

        removed
    }

    pub fn contains(&self, endpoint: EndptId, cluster: ClusterId) -> bool {
        self.entries.contains_key(&(endpoint, cluster))
    }

    pub fn get(&self, endpoint: EndptId, cluster: ClusterId) -> Option<&dyn Handler> {
        self.entries
            .get(&(endpoint, cluster))
            .map(|entry| entry.handler.as_ref())
    }

    pub fn get_mut(
        &mut self,
        endpoint: EndptId,
        cluster: ClusterId,
    ) -> Option<&mut (dyn Handler + 'static)> {
        self.entries
            .get_mut(&(endpoint, cluster))
            .map(|entry| entry.handler.as_mut())
    }

    /// The current data version of a cluster, `None` if no handler serves it
    pub fn dataver(&self, endpoint: EndptId, cluster: ClusterId) -> Option<DataVersion> {
        self.entries
            .get(&(endpoint, cluster))
            .map(|entry| entry.dataver.get())
    }

    /// Bumps the data version of a cluster, returning the new one
    pub fn dataver_changed(&self, endpoint: EndptId, cluster: ClusterId) -> Option<DataVersion> {
        self.entries
            .get(&(endpoint, cluster))
            .map(|entry| entry.dataver.changed())
    }
}
