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

//! Tracking of the command references of a batch invoke whose responses are still outstanding.

use crate::error::{Error, ErrorCode};
use crate::im::CommandRef;

/// The maximum number of command references tracked by one [`PendingResponseTracker`].
pub const MAX_PENDING_RESPONSES: usize = 32;

/// A bounded set of the command references whose responses have not been sent yet.
///
/// Pop order is unspecified, but every tracked reference is popped exactly once.
#[derive(Debug, Default, Clone)]
pub struct PendingResponseTracker {
    refs: heapless::Vec<CommandRef, MAX_PENDING_RESPONSES>,
}

impl PendingResponseTracker {
    pub const fn new() -> Self {
        Self {
            refs: heapless::Vec::new(),
        }
    }

    /// Fails with `Duplicate` if `command_ref` is tracked already, `NoSpace` if the tracker is full
    pub fn add(&mut self, command_ref: CommandRef) -> Result<(), Error> {
        if self.is_tracked(command_ref) {
            Err(ErrorCode::Duplicate)?;
        }

        self.refs
            .push(command_ref)
            .map_err(|_| ErrorCode::NoSpace.into())
    }

    /// Fails with `NotFound` if `command_ref` is not tracked
    pub fn remove(&mut self, command_ref: CommandRef) -> Result<(), Error> {
        let index = self
            .refs
            .iter()
            .position(|tracked| *tracked == command_ref)
            .ok_or(ErrorCode::NotFound)?;

        self.refs.swap_remove(index);

        Ok(())
    }

    pub fn is_tracked(&self, command_ref: CommandRef) -> bool {
        self.refs.contains(&command_ref)
    }

    pub fn count(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    /// Removes and returns some tracked reference, `None` once empty
    pub fn pop_pending_response(&mut self) -> Option<CommandRef> {
        self.refs.pop()
    }
}
