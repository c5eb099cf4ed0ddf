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

use core::cell::Cell;

use std::rc::Rc;

use embassy_time::{Duration, Instant};

/// A point on the monotonic clock the report scheduler runs on.
pub type Timestamp = Instant;

/// A monotonic time source.
pub trait Clock {
    fn now(&self) -> Timestamp;
}

impl<T: Clock + ?Sized> Clock for Rc<T> {
    fn now(&self) -> Timestamp {
        (**self).now()
    }
}

/// The clock of the `embassy-time` driver.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysClock;

impl SysClock {
    pub const fn new() -> Self {
        Self
    }
}

impl Clock for SysClock {
    fn now(&self) -> Timestamp {
        Instant::now()
    }
}

/// A clock which only moves when told to. Used to drive timers deterministically.
#[derive(Debug)]
pub struct ManualClock(Cell<Timestamp>);

impl ManualClock {
    pub const fn new() -> Self {
        Self(Cell::new(Instant::MIN))
    }

    pub fn set(&self, now: Timestamp) {
        self.0.set(now);
    }

    pub fn advance(&self, by: Duration) {
        self.0.set(self.0.get() + by);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.0.get()
    }
}
