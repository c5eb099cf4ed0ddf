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

//! The data model: metadata of the node, cluster handlers and the dispatch of
//! attribute/command operations onto them.

pub use encoder::*;
pub use expand::*;
pub use handler::*;
pub use metadata::*;
pub use model::*;
pub use reply::*;
pub use types::*;

mod encoder;
mod expand;
mod handler;
mod metadata;
mod model;
mod reply;
mod types;
