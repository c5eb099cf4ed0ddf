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

use embassy_time::Duration;

use rs_matter_im::dm::{ConcretePath, InteractionModel};
use rs_matter_im::error::ErrorCode;
use rs_matter_im::im::{AttrData, AttrPath, IMStatusCode, OpCode, TimedReq, WriteReq};
use rs_matter_im::tlv::{get_root_node, Nullable};

use crate::common::{
    handlers,
    im_engine::{attr_path, attr_reports, read_req, tlv, u16_value, ImEngine},
    init_env_logger,
};

mod common;

fn attr_data<'a>(path: AttrPath, data: &'a [u8]) -> AttrData<'a> {
    AttrData {
        data_ver: None,
        path,
        data: get_root_node(data).unwrap(),
    }
}

fn write_req<'a>(data: Vec<AttrData<'a>>) -> WriteReq<'a> {
    WriteReq {
        suppress_response: false,
        timed_request: false,
        write_requests: data,
        more_chunks: false,
    }
}

fn list_append(endpoint: u16) -> AttrPath {
    let mut path = attr_path(Some(endpoint), Some(handlers::ATTR_LIST));
    path.list_index = Some(Nullable::Null);

    path
}

fn statuses(sent: &[common::im_engine::Sent]) -> Vec<IMStatusCode> {
    assert_eq!(sent.len(), 1);

    sent[0]
        .write_resp()
        .write_responses
        .iter()
        .map(|status| status.status.status)
        .collect()
}

#[test]
fn test_write_then_read() {
    init_env_logger();

    let mut im = ImEngine::new_default();

    let value = tlv(&1234_u16);
    let sent = im.request(
        OpCode::WriteRequest,
        &write_req(vec![attr_data(
            attr_path(Some(1), Some(handlers::ATTR_VALUE)),
            &value,
        )]),
    );

    assert_eq!(statuses(&sent), vec![IMStatusCode::Success]);
    assert_eq!(im.state(1).borrow().value, 1234);
    assert_eq!(im.state(0).borrow().value, 0);

    let sent = im.request(
        OpCode::ReadRequest,
        &read_req(&[attr_path(Some(1), Some(handlers::ATTR_VALUE))]),
    );
    assert_eq!(u16_value(&attr_reports(&sent)[0]), 1234);
}

#[test]
fn test_write_without_privilege() {
    init_env_logger();

    let mut im = ImEngine::new_default();

    let value = tlv(&5_u16);
    let ctx = im.new_exchange(ImEngine::viewer());
    let sent = im.request_on(
        &ctx,
        OpCode::WriteRequest,
        &write_req(vec![attr_data(
            attr_path(Some(1), Some(handlers::ATTR_VALUE)),
            &value,
        )]),
    );

    assert_eq!(statuses(&sent), vec![IMStatusCode::UnsupportedAccess]);
    assert_eq!(im.state(1).borrow().value, 0);
}

#[test]
fn test_timed_attribute_needs_timed_write() {
    init_env_logger();

    let mut im = ImEngine::new_default();

    let value = tlv(&7_u16);
    let sent = im.request(
        OpCode::WriteRequest,
        &write_req(vec![attr_data(
            attr_path(Some(0), Some(handlers::ATTR_TIMED)),
            &value,
        )]),
    );

    assert_eq!(statuses(&sent), vec![IMStatusCode::NeedsTimedInteraction]);
    assert_eq!(im.state(0).borrow().timed, 0);
}

#[test]
fn test_timed_write() {
    init_env_logger();

    let mut im = ImEngine::new_default();
    let ctx = im.new_exchange(ImEngine::subject());

    let sent = im.request_on(&ctx, OpCode::TimedRequest, &TimedReq { timeout_ms: 500 });
    assert_eq!(sent[0].status(), IMStatusCode::Success);

    im.clock.advance(Duration::from_millis(100));

    let value = tlv(&7_u16);
    let mut req = write_req(vec![attr_data(
        attr_path(Some(0), Some(handlers::ATTR_TIMED)),
        &value,
    )]);
    req.timed_request = true;

    let sent = im.request_on(&ctx, OpCode::WriteRequest, &req);
    assert_eq!(statuses(&sent), vec![IMStatusCode::Success]);
    assert_eq!(im.state(0).borrow().timed, 7);
}

#[test]
fn test_timed_flag_without_timed_request() {
    init_env_logger();

    let mut im = ImEngine::new_default();

    let value = tlv(&7_u16);
    let mut req = write_req(vec![attr_data(
        attr_path(Some(0), Some(handlers::ATTR_TIMED)),
        &value,
    )]);
    req.timed_request = true;

    let sent = im.request(OpCode::WriteRequest, &req);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].status(), IMStatusCode::TimedRequestMisMatch);
    assert_eq!(im.state(0).borrow().timed, 0);
}

#[test]
fn test_expired_timed_request() {
    init_env_logger();

    let mut im = ImEngine::new_default();
    let ctx = im.new_exchange(ImEngine::subject());

    im.request_on(&ctx, OpCode::TimedRequest, &TimedReq { timeout_ms: 100 });
    im.clock.advance(Duration::from_millis(250));

    let value = tlv(&7_u16);
    let mut req = write_req(vec![attr_data(
        attr_path(Some(0), Some(handlers::ATTR_TIMED)),
        &value,
    )]);
    req.timed_request = true;

    let sent = im.request_on(&ctx, OpCode::WriteRequest, &req);
    assert_eq!(sent[0].status(), IMStatusCode::Timeout);
    assert_eq!(im.state(0).borrow().timed, 0);
}

#[test]
fn test_chunked_list_write() {
    init_env_logger();

    let mut im = ImEngine::new_default();
    im.state(1).borrow_mut().list = vec![99];

    let ctx = im.new_exchange(ImEngine::subject());

    let initial = tlv(&[1_u32, 2][..]);
    let mut req = write_req(vec![attr_data(
        attr_path(Some(1), Some(handlers::ATTR_LIST)),
        &initial,
    )]);
    req.more_chunks = true;

    let sent = im.request_on(&ctx, OpCode::WriteRequest, &req);
    assert_eq!(statuses(&sent), vec![IMStatusCode::Success]);

    // Nothing committed while the write is still in flight
    assert_eq!(im.state(1).borrow().list, vec![99]);
    assert_eq!(im.state(1).borrow().list_writes, 0);

    let (three, four) = (tlv(&3_u32), tlv(&4_u32));
    let req = write_req(vec![
        attr_data(list_append(1), &three),
        attr_data(list_append(1), &four),
    ]);

    let sent = im.request_on(&ctx, OpCode::WriteRequest, &req);
    assert_eq!(
        statuses(&sent),
        vec![IMStatusCode::Success, IMStatusCode::Success]
    );

    let state = im.state(1);
    let state = state.borrow();
    assert_eq!(state.list, vec![1, 2, 3, 4]);
    assert_eq!(state.list_writes, 1);
    assert_eq!(state.aborted_list_writes, 0);
}

#[test]
fn test_list_write_closed_by_next_attribute() {
    init_env_logger();

    let mut im = ImEngine::new_default();

    let (list, five, value) = (tlv(&[1_u32][..]), tlv(&5_u32), tlv(&3_u16));
    let req = write_req(vec![
        attr_data(attr_path(Some(2), Some(handlers::ATTR_LIST)), &list),
        attr_data(list_append(2), &five),
        attr_data(attr_path(Some(2), Some(handlers::ATTR_VALUE)), &value),
    ]);

    let sent = im.request(OpCode::WriteRequest, &req);
    assert_eq!(statuses(&sent), vec![IMStatusCode::Success; 3]);

    let state = im.state(2);
    let state = state.borrow();
    assert_eq!(state.list, vec![1, 5]);
    assert_eq!(state.list_writes, 1);
    assert_eq!(state.value, 3);
}

#[test]
fn test_failed_list_append_aborts_the_list_write() {
    init_env_logger();

    let mut im = ImEngine::new_default();
    im.state(1).borrow_mut().list = vec![42];

    let ctx = im.new_exchange(ImEngine::subject());

    let initial = tlv(&[1_u32][..]);
    let mut req = write_req(vec![attr_data(
        attr_path(Some(1), Some(handlers::ATTR_LIST)),
        &initial,
    )]);
    req.more_chunks = true;
    im.request_on(&ctx, OpCode::WriteRequest, &req);

    let (rejected, six, seven) = (tlv(&handlers::REJECTED_ITEM), tlv(&6_u32), tlv(&7_u32));
    let mut req = write_req(vec![
        attr_data(list_append(1), &rejected),
        attr_data(list_append(1), &six),
    ]);
    req.more_chunks = true;

    let sent = im.request_on(&ctx, OpCode::WriteRequest, &req);
    assert_eq!(
        statuses(&sent),
        vec![IMStatusCode::ConstraintError, IMStatusCode::ConstraintError]
    );

    // Later chunks of the same list keep failing the same way
    let req = write_req(vec![attr_data(list_append(1), &seven)]);
    let sent = im.request_on(&ctx, OpCode::WriteRequest, &req);
    assert_eq!(statuses(&sent), vec![IMStatusCode::ConstraintError]);

    let state = im.state(1);
    let state = state.borrow();
    assert_eq!(state.list, vec![42]);
    assert_eq!(state.list_writes, 0);
    assert_eq!(state.aborted_list_writes, 1);
}

#[test]
fn test_abandoned_list_write_is_not_committed() {
    init_env_logger();

    let mut im = ImEngine::new_default();
    let ctx = im.new_exchange(ImEngine::subject());

    let initial = tlv(&[1_u32, 2][..]);
    let mut req = write_req(vec![attr_data(
        attr_path(Some(0), Some(handlers::ATTR_LIST)),
        &initial,
    )]);
    req.more_chunks = true;
    im.request_on(&ctx, OpCode::WriteRequest, &req);

    im.server.engine_mut().close_exchange(ctx.id);

    assert!(im.state(0).borrow().list.is_empty());
    assert_eq!(im.state(0).borrow().list_writes, 0);
}

#[test]
fn test_data_version_mismatch() {
    init_env_logger();

    let mut im = ImEngine::new_default();

    let current = im
        .server
        .engine()
        .model()
        .dataver(1, handlers::ID)
        .unwrap();

    let value = tlv(&9_u16);
    let mut data = attr_data(attr_path(Some(1), Some(handlers::ATTR_VALUE)), &value);
    data.data_ver = Some(current.wrapping_add(1));

    let sent = im.request(OpCode::WriteRequest, &write_req(vec![data]));
    assert_eq!(statuses(&sent), vec![IMStatusCode::DataVersionMismatch]);
    assert_eq!(im.state(1).borrow().value, 0);

    data.data_ver = Some(current);

    let sent = im.request(OpCode::WriteRequest, &write_req(vec![data]));
    assert_eq!(statuses(&sent), vec![IMStatusCode::Success]);
    assert_eq!(im.state(1).borrow().value, 9);

    // The successful write bumped the version
    assert_ne!(
        im.server.engine().model().dataver(1, handlers::ID),
        Some(current)
    );
}

#[test]
fn test_wildcard_write() {
    init_env_logger();

    let mut im = ImEngine::new_default();

    let value = tlv(&77_u16);
    let sent = im.request(
        OpCode::WriteRequest,
        &write_req(vec![attr_data(
            attr_path(None, Some(handlers::ATTR_VALUE)),
            &value,
        )]),
    );

    // Wildcard writes carry no status
    assert!(statuses(&sent).is_empty());

    for ep in [0, 1, 2] {
        assert_eq!(im.state(ep).borrow().value, 77);
    }
}

#[test]
fn test_suppressed_write_response() {
    init_env_logger();

    let mut im = ImEngine::new_default();

    let value = tlv(&3_u16);
    let mut req = write_req(vec![attr_data(
        attr_path(Some(2), Some(handlers::ATTR_VALUE)),
        &value,
    )]);
    req.suppress_response = true;

    assert!(im.request(OpCode::WriteRequest, &req).is_empty());
    assert_eq!(im.state(2).borrow().value, 3);
}

#[test]
fn test_write_internal() {
    init_env_logger();

    let mut im = ImEngine::new_default();

    let value = tlv(&11_u16);
    im.server
        .engine_mut()
        .write_internal(
            &ConcretePath::new(1, handlers::ID, handlers::ATTR_TIMED),
            get_root_node(&value).unwrap(),
        )
        .unwrap();
    assert_eq!(im.state(1).borrow().timed, 11);

    let list = tlv(&[8_u32, 9][..]);
    im.server
        .engine_mut()
        .write_internal(
            &ConcretePath::new(1, handlers::ID, handlers::ATTR_LIST),
            get_root_node(&list).unwrap(),
        )
        .unwrap();
    assert_eq!(im.state(1).borrow().list, vec![8, 9]);
    assert_eq!(im.state(1).borrow().list_writes, 1);

    let err = im
        .server
        .engine_mut()
        .write_internal(
            &ConcretePath::new(5, handlers::ID, handlers::ATTR_VALUE),
            get_root_node(&value).unwrap(),
        )
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::EndpointNotFound);
}
