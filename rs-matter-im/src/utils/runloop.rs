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

use core::fmt;

use std::rc::Rc;

use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;

use log::trace;

use crate::error::{Error, ErrorCode};

/// The number of continuations a [`RunLoop`] holds before posting fails.
pub const RUN_LOOP_QUEUE_SIZE: usize = 64;

/// Cancellation flag shared between whoever started an async operation and its continuation.
///
/// Cancelling does not stop the operation itself; its continuation is simply
/// never run once it reaches the loop.
#[derive(Clone)]
pub struct CancelToken(Rc<Signal<NoopRawMutex, ()>>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Rc::new(Signal::new()))
    }

    pub fn cancel(&self) {
        self.0.signal(());
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.signaled()
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CancelToken")
            .field(&self.is_cancelled())
            .finish()
    }
}

struct Task<C> {
    token: Option<CancelToken>,
    run: Box<dyn FnOnce(&mut C)>,
}

type Queue<C> = Rc<Channel<NoopRawMutex, Task<C>, RUN_LOOP_QUEUE_SIZE>>;

/// The single cooperative loop everything in the engine executes on.
///
/// Completions of deferred work re-enter the engine by posting a continuation
/// here, which then runs with exclusive access to the loop context `C`.
pub struct RunLoop<C> {
    queue: Queue<C>,
}

/// Posting end of a [`RunLoop`]. Cheap to clone and hand out to async operations.
pub struct Poster<C> {
    queue: Queue<C>,
}

impl<C> Clone for Poster<C> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
        }
    }
}

impl<C> Poster<C> {
    /// Fails with `NoSpace` if the loop has [`RUN_LOOP_QUEUE_SIZE`] continuations queued
    pub fn post<F>(&self, f: F) -> Result<(), Error>
    where
        F: FnOnce(&mut C) + 'static,
    {
        self.send(Task {
            token: None,
            run: Box::new(f),
        })
    }

    pub fn post_cancellable<F>(&self, token: &CancelToken, f: F) -> Result<(), Error>
    where
        F: FnOnce(&mut C) + 'static,
    {
        self.send(Task {
            token: Some(token.clone()),
            run: Box::new(f),
        })
    }

    fn send(&self, task: Task<C>) -> Result<(), Error> {
        self.queue
            .try_send(task)
            .map_err(|_| ErrorCode::NoSpace.into())
    }
}

impl<C> RunLoop<C> {
    pub fn new() -> Self {
        Self {
            queue: Rc::new(Channel::new()),
        }
    }

    pub fn poster(&self) -> Poster<C> {
        Poster {
            queue: self.queue.clone(),
        }
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Runs queued continuations in posting order, including ones posted while
    /// running. Returns how many actually ran.
    pub fn run_pending(&self, ctx: &mut C) -> usize {
        let mut ran = 0;

        while let Ok(task) = self.queue.try_receive() {
            if task.token.as_ref().is_some_and(CancelToken::is_cancelled) {
                trace!("Skipping cancelled continuation");
                continue;
            }

            (task.run)(ctx);
            ran += 1;
        }

        ran
    }
}

impl<C> Default for RunLoop<C> {
    fn default() -> Self {
        Self::new()
    }
}
