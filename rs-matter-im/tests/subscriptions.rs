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

use embassy_time::{Duration, Instant};

use rs_matter_im::dm::{ConcretePath, EventPriority};
use rs_matter_im::im::engine::Dest;
use rs_matter_im::im::{
    AttrData, EventResp, IMStatusCode, OpCode, SubscriptionId, WriteReq,
};
use rs_matter_im::tlv::{get_root_node, FromTLV};
use rs_matter_im::EngineConfig;

use crate::common::{
    handlers,
    im_engine::{
        admin_acl_entry, attr_path, attr_reports, event_path, subscribe_req, tlv, u16_value,
        ImEngine, Sent, SharedStore, FAB_IDX, PEER_NODE_ID,
    },
    init_env_logger,
};

mod common;

fn secs(secs: u64) -> Instant {
    Instant::from_secs(secs)
}

fn millis(millis: u64) -> Instant {
    Instant::from_millis(millis)
}

fn just_before(at: Instant) -> Instant {
    at - Duration::from_millis(1)
}

/// Subscribes to the value attribute of endpoint 1, checking the priming exchange
fn subscribe(im: &mut ImEngine, min: u16, max: u16) -> SubscriptionId {
    let sent = im.request(
        OpCode::SubscribeRequest,
        &subscribe_req(min, max, &[attr_path(Some(1), Some(handlers::ATTR_VALUE))]),
    );

    assert_eq!(sent.len(), 2);

    let priming = sent[0].report();
    let id = priming.subscription_id.unwrap();
    assert!(!priming.more_chunks);
    assert!(!priming.suppress_response);
    assert!(matches!(sent[0].dest, Dest::Exchange(_)));

    let resp = sent[1].subscribe_resp();
    assert_eq!(resp.subscription_id, id);
    assert_eq!(resp.max_int, max);

    id
}

fn subscriber_reports(sent: &[Sent]) -> Vec<(SubscriptionId, Instant)> {
    sent.iter()
        .map(|sent| match sent.dest {
            Dest::Subscriber {
                fab_idx,
                node_id,
                subscription_id,
            } => {
                assert_eq!((fab_idx, node_id), (FAB_IDX, PEER_NODE_ID));
                assert_eq!(sent.report().subscription_id, Some(subscription_id));

                (subscription_id, sent.at)
            }
            Dest::Exchange(_) => panic!("Unexpected exchange message {:?}", sent.opcode),
        })
        .collect()
}

#[test]
fn test_keep_alive_at_max_interval() {
    init_env_logger();

    let mut im = ImEngine::new_default();
    im.state(1).borrow_mut().value = 3;

    let id = subscribe(&mut im, 1, 10);

    assert!(im.run_until(just_before(secs(10))).is_empty());

    let sent = im.run_until(secs(10));
    assert_eq!(subscriber_reports(&sent), vec![(id, secs(10))]);

    // Nothing changed: an empty report
    assert!(sent[0].report().attr_reports.is_none());

    let sent = im.run_until(secs(20));
    assert_eq!(subscriber_reports(&sent), vec![(id, secs(20))]);
}

#[test]
fn test_change_reported_at_min_interval() {
    init_env_logger();

    let mut im = ImEngine::new_default();
    let id = subscribe(&mut im, 1, 10);

    im.run_until(millis(200));

    let value = tlv(&66_u16);
    let sent = im.request(
        OpCode::WriteRequest,
        &WriteReq {
            suppress_response: false,
            timed_request: false,
            write_requests: vec![AttrData {
                data_ver: None,
                path: attr_path(Some(1), Some(handlers::ATTR_VALUE)),
                data: get_root_node(&value).unwrap(),
            }],
            more_chunks: false,
        },
    );
    assert_eq!(sent.len(), 1);

    assert!(im.run_until(millis(999)).is_empty());

    let sent = im.run_until(secs(1));
    assert_eq!(subscriber_reports(&sent), vec![(id, secs(1))]);

    let reports = attr_reports(&sent);
    assert_eq!(reports.len(), 1);
    assert_eq!(u16_value(&reports[0]), 66);

    // The intervals restart with the report
    assert!(im.run_until(just_before(secs(11))).is_empty());
    assert_eq!(subscriber_reports(&im.run_until(secs(11))), vec![(id, secs(11))]);
}

#[test]
fn test_change_past_min_interval_is_reported_at_once() {
    init_env_logger();

    let mut im = ImEngine::new_default();
    let id = subscribe(&mut im, 2, 60);

    im.run_until(secs(5));
    im.state(1).borrow_mut().value = 8;
    let dirty = im
        .server
        .engine_mut()
        .notify_attribute_changed(&ConcretePath::new(1, handlers::ID, handlers::ATTR_VALUE));
    assert_eq!(dirty, 1);

    let sent = im.run_until(secs(5));
    assert_eq!(subscriber_reports(&sent), vec![(id, secs(5))]);
    assert_eq!(u16_value(&attr_reports(&sent)[0]), 8);
}

#[test]
fn test_changes_outside_the_subscription_are_not_reported() {
    init_env_logger();

    let mut im = ImEngine::new_default();
    subscribe(&mut im, 1, 10);

    let dirty = im
        .server
        .engine_mut()
        .notify_attribute_changed(&ConcretePath::new(2, handlers::ID, handlers::ATTR_VALUE));
    assert_eq!(dirty, 0);

    assert!(im.run_until(just_before(secs(10))).is_empty());
}

#[test]
fn test_per_fabric_limit() {
    init_env_logger();

    let mut im = ImEngine::new_default();

    for _ in 0..3 {
        subscribe(&mut im, 1, 10);
    }

    let sent = im.request(
        OpCode::SubscribeRequest,
        &subscribe_req(1, 10, &[attr_path(Some(1), Some(handlers::ATTR_VALUE))]),
    );

    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].status(), IMStatusCode::ResourceExhausted);
    assert_eq!(im.server.engine().subscriptions().len(), 3);
}

#[test]
fn test_subscribe_without_keep_subs_replaces_the_peers_subscriptions() {
    init_env_logger();

    let mut im = ImEngine::new_default();

    let first = subscribe(&mut im, 1, 10);
    let second = subscribe(&mut im, 1, 10);

    let mut req = subscribe_req(1, 10, &[attr_path(Some(0), Some(handlers::ATTR_VALUE))]);
    req.keep_subs = false;

    let sent = im.request(OpCode::SubscribeRequest, &req);
    let id = sent[1].subscribe_resp().subscription_id;

    assert_eq!(im.server.engine().subscriptions().ids(), vec![id]);
    assert!(id != first && id != second);
}

#[test]
fn test_invalid_subscriptions() {
    init_env_logger();

    let mut im = ImEngine::new_default();

    let sent = im.request(
        OpCode::SubscribeRequest,
        &subscribe_req(20, 10, &[attr_path(Some(1), Some(handlers::ATTR_VALUE))]),
    );
    assert_eq!(sent[0].status(), IMStatusCode::InvalidAction);

    let sent = im.request(OpCode::SubscribeRequest, &subscribe_req(1, 10, &[]));
    assert_eq!(sent[0].status(), IMStatusCode::InvalidAction);

    let sent = im.request(
        OpCode::SubscribeRequest,
        &subscribe_req(1, 10, &[attr_path(Some(7), Some(handlers::ATTR_VALUE))]),
    );
    assert_eq!(sent[0].status(), IMStatusCode::InvalidAction);

    let ctx = im.new_exchange(ImEngine::viewer());
    let sent = im.request_on(
        &ctx,
        OpCode::SubscribeRequest,
        &subscribe_req(1, 10, &[attr_path(Some(2), Some(handlers::ATTR_VALUE))]),
    );
    assert_eq!(sent[0].status(), IMStatusCode::UnsupportedAccess);

    assert!(im.server.engine().subscriptions().is_empty());
}

#[test]
fn test_publisher_floor_raises_max_interval() {
    init_env_logger();

    let config = EngineConfig {
        publisher_max_interval_floor: Some(30),
        ..Default::default()
    };
    let mut im = ImEngine::new(config, None);

    let sent = im.request(
        OpCode::SubscribeRequest,
        &subscribe_req(1, 10, &[attr_path(Some(1), Some(handlers::ATTR_VALUE))]),
    );
    let resp = sent[1].subscribe_resp();
    assert_eq!(resp.max_int, 30);

    assert!(im.run_until(just_before(secs(30))).is_empty());
    assert_eq!(
        subscriber_reports(&im.run_until(secs(30))),
        vec![(resp.subscription_id, secs(30))]
    );
}

#[test]
fn test_failed_priming_report_drops_the_subscription() {
    init_env_logger();

    let mut im = ImEngine::new_default();
    let ctx = im.new_exchange(ImEngine::subject());

    im.fail_sends(true);

    let payload = tlv(&subscribe_req(
        1,
        10,
        &[attr_path(Some(1), Some(handlers::ATTR_VALUE))],
    ));
    assert!(im
        .server
        .handle(&ctx, OpCode::SubscribeRequest, &payload)
        .is_err());

    assert!(im.server.engine().subscriptions().is_empty());
}

#[test]
fn test_failed_report_terminates_the_subscription() {
    init_env_logger();

    let store = SharedStore::default();
    let mut im = ImEngine::new(EngineConfig::default(), Some(store));
    subscribe(&mut im, 1, 10);

    im.fail_sends(true);
    im.run_until(secs(10));
    im.fail_sends(false);

    assert!(im.server.engine().subscriptions().is_empty());

    // The peer may come back: the record survives
    let storage = im.server.engine().resumption().unwrap();
    assert_eq!(storage.iterate().unwrap().count(), 1);

    assert!(im.run_until(secs(30)).is_empty());
}

#[test]
fn test_event_subscription() {
    init_env_logger();

    let mut im = ImEngine::new_default();

    let mut req = subscribe_req(1, 10, &[]);
    req.event_requests = Some(vec![event_path(Some(1), Some(handlers::EVENT_ALARM))]);

    let sent = im.request(OpCode::SubscribeRequest, &req);
    assert_eq!(sent.len(), 2);
    assert!(sent[0].report().event_reports.is_none());

    im.run_until(secs(2));

    let path = ConcretePath::new(1, handlers::ID, handlers::EVENT_ALARM);
    let engine = im.server.engine_mut();
    let number = engine
        .emit_event(&path, EventPriority::Info, FAB_IDX, &5_u8)
        .unwrap();
    engine
        .emit_event(&path, EventPriority::Info, FAB_IDX + 1, &6_u8)
        .unwrap();

    let sent = im.run_until(secs(2));
    assert_eq!(sent.len(), 1);

    let events = sent[0].report().event_reports.unwrap();
    match events.as_slice() {
        [EventResp::Data(data)] => {
            assert_eq!(data.event_number, number);
            assert_eq!(u8::from_tlv(&data.data).unwrap(), 5);
        }
        other => panic!("Unexpected events: {:?}", other),
    }

    // Reported events are not reported again
    let sent = im.run_until(secs(12));
    assert_eq!(sent.len(), 1);
    assert!(sent[0].report().event_reports.is_none());
}

#[test]
fn test_synchronized_reports() {
    init_env_logger();

    for synchronized_reports in [false, true] {
        let config = EngineConfig {
            synchronized_reports,
            ..Default::default()
        };
        let mut im = ImEngine::new(config, None);

        let first = subscribe(&mut im, 1, 10);
        im.run_until(secs(3));
        let second = subscribe(&mut im, 1, 30);

        let reports = subscriber_reports(&im.run_until(secs(10)));

        if synchronized_reports {
            assert_eq!(reports, vec![(first, secs(10)), (second, secs(10))]);
        } else {
            assert_eq!(reports, vec![(first, secs(10))]);
        }
    }
}

#[test]
fn test_synchronized_keep_alive_survives_cancel() {
    init_env_logger();

    let config = EngineConfig {
        synchronized_reports: true,
        ..Default::default()
    };
    let mut im = ImEngine::new(config, None);

    let first = subscribe(&mut im, 1, 5);
    let second = subscribe(&mut im, 10, 60);

    im.run_until(secs(2));
    im.server.engine_mut().cancel_subscription(first).unwrap();

    let reports = subscriber_reports(&im.run_until(secs(120)));
    assert_eq!(reports, vec![(second, secs(60)), (second, secs(120))]);
}

#[test]
fn test_cancel_subscription() {
    init_env_logger();

    let store = SharedStore::default();
    let mut im = ImEngine::new(EngineConfig::default(), Some(store));

    let id = subscribe(&mut im, 1, 10);
    im.server.engine_mut().cancel_subscription(id).unwrap();

    assert!(im.server.engine().subscriptions().is_empty());

    let storage = im.server.engine().resumption().unwrap();
    assert_eq!(storage.iterate().unwrap().count(), 0);

    assert!(im.server.engine_mut().cancel_subscription(id).is_err());
    assert!(im.run_until(secs(20)).is_empty());
}

#[test]
fn test_resumption_after_restart() {
    init_env_logger();

    let store = SharedStore::default();

    let mut im = ImEngine::new(EngineConfig::default(), Some(store.clone()));
    let id = subscribe(&mut im, 1, 10);
    drop(im);

    let mut im = ImEngine::new_at(EngineConfig::default(), Some(store), secs(100));
    assert_eq!(im.server.engine().subscriptions().ids(), vec![id]);

    im.state(1).borrow_mut().value = 9;

    // The resumed subscription is primed again, straight to the subscriber
    let sent = im.run_until(secs(100));
    assert_eq!(subscriber_reports(&sent), vec![(id, secs(100))]);

    let reports = attr_reports(&sent);
    assert_eq!(reports.len(), 1);
    assert_eq!(u16_value(&reports[0]), 9);

    let sent = im.run_until(secs(110));
    assert_eq!(subscriber_reports(&sent), vec![(id, secs(110))]);
}

#[test]
fn test_fabric_removal() {
    init_env_logger();

    let store = SharedStore::default();
    let mut im = ImEngine::new(EngineConfig::default(), Some(store));

    subscribe(&mut im, 1, 10);
    subscribe(&mut im, 1, 20);

    im.server.engine_mut().on_fabric_removed(FAB_IDX);

    assert!(im.server.engine().subscriptions().is_empty());

    let storage = im.server.engine().resumption().unwrap();
    assert_eq!(storage.iterate().unwrap().count(), 0);

    assert!(im.run_until(secs(30)).is_empty());

    // The fabric's ACL entries went away with it
    let sent = im.request(
        OpCode::SubscribeRequest,
        &subscribe_req(1, 10, &[attr_path(Some(1), Some(handlers::ATTR_VALUE))]),
    );
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].status(), IMStatusCode::UnsupportedAccess);

    im.server
        .engine_mut()
        .model_mut()
        .acl_mut()
        .add(FAB_IDX, admin_acl_entry())
        .unwrap();

    // The fabric's quota is free again
    for _ in 0..3 {
        subscribe(&mut im, 1, 10);
    }
}
