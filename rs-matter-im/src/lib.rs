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

//! Native Rust implementation of the Matter Interaction Model
//!
//! This crate implements the server side of the Interaction Model: Read, Write, Invoke,
//! Subscribe and Timed interactions against a data model, the reporting engine which
//! keeps subscriptions up to date, and the persistence which lets subscriptions survive
//! a restart.
//!
//! The session layer is not part of the crate. It hands received messages to the
//! [`Server`] and implements [`im::engine::MessageSink`] for the messages going out.
//!
//! # Examples
//! ```
//! use std::rc::Rc;
//!
//! use rs_matter_im::acl::AclMgr;
//! use rs_matter_im::dm::{DataModel, Node};
//! use rs_matter_im::error::Error;
//! use rs_matter_im::im::engine::{Dest, MessageSink};
//! use rs_matter_im::im::OpCode;
//! use rs_matter_im::utils::epoch::SysClock;
//! use rs_matter_im::{EngineConfig, Server};
//!
//! struct Discard;
//!
//! impl MessageSink for Discard {
//!     fn send(&mut self, _dest: Dest, _opcode: OpCode, _payload: &[u8]) -> Result<(), Error> {
//!         Ok(())
//!     }
//! }
//!
//! let model = DataModel::new(Node::new(0, vec![]), AclMgr::new());
//! let mut server = Server::new(
//!     model,
//!     EngineConfig::default(),
//!     Rc::new(SysClock::new()),
//!     Box::new(Discard),
//! );
//!
//! // Call again at the returned deadline, or when a message arrives
//! let _next = server.run_once();
//! ```
//! Start off exploring by going to the [Server] object.

pub mod acl;
pub mod core;
pub mod dm;
pub mod error;
pub mod events;
pub mod im;
pub mod pending;
pub mod persist;
pub mod reporting;
pub mod resumption;
pub mod subscriptions;
pub mod tlv;
pub mod utils;

pub use crate::core::*;
