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

use std::rc::Rc;

use log::info;

use crate::dm::InteractionModel;
use crate::error::Error;
use crate::im::engine::{ExchangeCtx, ImEngine, MessageSink};
use crate::im::OpCode;
use crate::resumption::SubscriptionResumptionStorage;
use crate::utils::epoch::{Clock, Timestamp};
use crate::utils::runloop::RunLoop;

pub use crate::im::engine::EngineConfig;

/// The primary object: the Interaction Model engine, together with the loop its deferred
/// work runs on.
///
/// The session layer feeds received messages to [`Server::handle`] and calls
/// [`Server::run_once`] whenever it wakes up, at the latest at the deadline the previous
/// call returned.
pub struct Server<M>
where
    M: InteractionModel + 'static,
{
    run_loop: RunLoop<ImEngine<M>>,
    engine: ImEngine<M>,
}

impl<M> Server<M>
where
    M: InteractionModel + 'static,
{
    pub fn new(
        model: M,
        config: EngineConfig,
        clock: Rc<dyn Clock>,
        sink: Box<dyn MessageSink>,
    ) -> Self {
        let run_loop = RunLoop::new();
        let engine = ImEngine::new(model, config, clock, sink, run_loop.poster());

        Self { run_loop, engine }
    }

    /// Persists subscriptions into `storage` and resumes the ones already in there
    pub fn with_resumption(
        mut self,
        storage: Box<dyn SubscriptionResumptionStorage>,
    ) -> Result<Self, Error> {
        self.engine.set_resumption(storage);

        let resumed = self.engine.resume_subscriptions()?;
        if resumed > 0 {
            info!("Resumed {} subscriptions", resumed);
        }

        Ok(self)
    }

    pub fn engine(&self) -> &ImEngine<M> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut ImEngine<M> {
        &mut self.engine
    }

    pub fn handle(
        &mut self,
        ctx: &ExchangeCtx,
        opcode: OpCode,
        payload: &[u8],
    ) -> Result<(), Error> {
        self.engine.handle(ctx, opcode, payload)?;
        self.run_loop.run_pending(&mut self.engine);

        Ok(())
    }

    /// Runs the continuations of deferred work, then the reporting pass if one is due.
    ///
    /// Returns when to call again, if anything is scheduled.
    pub fn run_once(&mut self) -> Option<Timestamp> {
        self.run_loop.run_pending(&mut self.engine);
        self.engine.poll();

        self.engine.next_deadline()
    }

    /// Terminates every transaction and subscription. Persisted subscriptions survive.
    pub fn shutdown(&mut self) {
        self.engine.shutdown();

        // Whatever the teardown posted is cancelled by now
        self.run_loop.run_pending(&mut self.engine);
    }
}

impl<M> Drop for Server<M>
where
    M: InteractionModel + 'static,
{
    fn drop(&mut self) {
        self.shutdown();
    }
}
