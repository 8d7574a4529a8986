//! Integration tests exercising the public API the way a harness embedding this crate would:
//! across module boundaries, never reaching into private state.

use spiegel::config::Config;
use spiegel::intercept::InterceptEngine;
use spiegel::platform::{FakePlatform, LoadedObject};
use spiegel::syslog::{Outcome, SyslogFacade};
use spiegel::testnode::{FixtureKind, TestTree};
use spiegel::State;

#[test]
fn add_self_skips_every_object_matching_the_configured_ignore_list() {
    let platform = FakePlatform {
        objects: vec![
            LoadedObject {
                path: Some("/lib64/ld-linux-x86-64.so.2".into()),
                mappings: Vec::new(),
            },
            LoadedObject {
                path: Some("/opt/musl/libc.so".into()),
                mappings: Vec::new(),
            },
        ],
        ..Default::default()
    };
    let config = Config::builder().ignore_prefix("/opt/musl/").build();

    let mut state = State::with_platform_and_config(platform, config);
    state.add_self().expect("every object is ignored, so nothing is ever opened");
    assert!(state.compile_units().is_empty());
}

extern "C" fn test_body() {}

#[test]
fn a_node_with_mocks_and_fixtures_installs_and_tears_down_through_the_engine() {
    let mut code = [0x55u8, 0x90, 0x90];
    let target = code.as_mut_ptr() as usize;

    let mut tree = TestTree::new("suite");
    let case = tree.make_path(tree.root(), "group.case");
    tree.set_fixture(case, FixtureKind::Test, test_body);
    tree.add_mock(case, target, 0xdead_beef);

    let engine = InterceptEngine::with_platform(FakePlatform::default());
    tree.pre_run(case, &engine).unwrap();
    assert_eq!(code[0], 0xCC, "pre_run should have patched the mocked target");
    assert!(tree.fixture(case, FixtureKind::Test).is_some());

    tree.post_run(case, &engine).unwrap();
    assert_eq!(code[0], 0x55, "post_run should have restored the original byte");
}

#[test]
fn syslog_facade_routes_messages_through_the_classifier_by_severity() {
    let facade = SyslogFacade::new();
    facade.ignore(r"^connected$").unwrap();
    facade.count_rule(r"retrying", 42).unwrap();
    facade.fail(r"segmentation fault").unwrap();

    assert_eq!(facade.dispatch(libc::LOG_INFO, "connected"), Outcome::Swallowed);
    assert_eq!(facade.dispatch(libc::LOG_WARNING, "retrying connection"), Outcome::Swallowed);
    assert_eq!(facade.count(42).unwrap(), 1);

    match facade.dispatch(libc::LOG_CRIT, "segmentation fault in worker") {
        Outcome::Fail(msg) => assert!(msg.starts_with("crit:")),
        other => panic!("expected Fail, got {other:?}"),
    }

    match facade.dispatch(libc::LOG_ERR, "unexpected disk latency") {
        Outcome::Raise(msg) => assert_eq!(msg, "err: unexpected disk latency"),
        other => panic!("expected Raise for an unmatched message, got {other:?}"),
    }
}
