//! WdaDriver against a mock WebDriverAgent over real HTTP.
//!
//! Covers session creation, transparent recreation after WDA forgets the
//! session, error mapping, and the element/app routes.

mod common;

use std::sync::{Arc, Mutex};

use common::mock_wda;
use serde_json::json;
use tracing::{span, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

use ocrtap_core::driver::{AutomationDriver, DriverError};
use ocrtap_core::element::{ElementRef, Frame};
use ocrtap_core::protocol::{ButtonName, Locator};
use ocrtap_core::wda_driver::WdaDriver;

async fn connected(px: (u32, u32), window: (f64, f64)) -> (common::MockWda, WdaDriver) {
    let wda = mock_wda(px.0, px.1, window).await;
    let driver = WdaDriver::new(wda.url()).unwrap();
    driver.connect().await.unwrap();
    (wda, driver)
}

// ---------------------------------------------------------------------------
// 1. Connect and status
// ---------------------------------------------------------------------------

#[tokio::test]
async fn connect_checks_status_and_opens_session() {
    let (wda, driver) = connected((30, 60), (10.0, 20.0)).await;
    assert!(driver.is_connected());
    assert_eq!(wda.sessions_created(), 1);
    assert_eq!(driver.session_id().await.as_deref(), Some("session-1"));

    let status = driver.status().await.unwrap();
    assert!(status.ready);
    assert_eq!(status.ios_version.as_deref(), Some("17.4"));
}

#[tokio::test]
async fn connect_fails_when_wda_not_ready() {
    let wda = mock_wda(10, 10, (10.0, 10.0)).await;
    wda.set_ready(false);
    let driver = WdaDriver::new(wda.url()).unwrap();
    let err = driver.connect().await.unwrap_err();
    assert!(matches!(err, DriverError::ConnectionLost(ref m) if m.contains("not ready")), "{err}");
    assert_eq!(wda.sessions_created(), 0);
}

#[tokio::test]
async fn connect_to_closed_port_is_connection_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let driver = WdaDriver::new(format!("http://{addr}")).unwrap();
    let err = driver.connect().await.unwrap_err();
    assert!(matches!(err, DriverError::ConnectionLost(_)), "{err:?}");
}

// ---------------------------------------------------------------------------
// 2. Session recreation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn expired_session_is_recreated_and_command_retried() {
    let (wda, driver) = connected((30, 60), (10.0, 20.0)).await;
    wda.expire_session();

    driver.tap_location(100, 200).await.unwrap();

    assert_eq!(wda.sessions_created(), 2);
    assert_eq!(driver.session_id().await.as_deref(), Some("session-2"));
    let taps = wda.requests_to("/wda/tap/0");
    assert_eq!(taps.len(), 2, "first attempt rejected, second accepted");
    assert_eq!(taps[0].session().as_deref(), Some("session-1"));
    assert_eq!(taps[1].session().as_deref(), Some("session-2"));
    assert_eq!(taps[1].body, json!({ "x": 100, "y": 200 }));
}

#[tokio::test]
async fn second_invalid_session_is_returned_as_expired() {
    let (wda, driver) = connected((30, 60), (10.0, 20.0)).await;
    wda.respond(
        "POST /wda/tap/0",
        404,
        json!({ "error": "invalid session id", "message": "Session does not exist" }),
    );

    let err = driver.tap_location(5, 5).await.unwrap_err();

    assert!(matches!(err, DriverError::SessionExpired(_)), "{err:?}");
    assert_eq!(wda.requests_to("/wda/tap/0").len(), 2, "exactly one retry");
    assert_eq!(wda.sessions_created(), 2);
}

#[tokio::test]
async fn session_created_lazily_without_connect() {
    let wda = mock_wda(30, 60, (10.0, 20.0)).await;
    let driver = WdaDriver::new(wda.url()).unwrap();
    let size = driver.window_size().await.unwrap();
    assert_eq!(size.width, 10.0);
    assert_eq!(wda.sessions_created(), 1);
}

#[tokio::test]
async fn screenshot_does_not_need_a_session() {
    let wda = mock_wda(4, 8, (4.0, 8.0)).await;
    let driver = WdaDriver::new(wda.url()).unwrap();
    let png = driver.screenshot().await.unwrap();
    let img = image::load_from_memory(&png).unwrap();
    assert_eq!((img.width(), img.height()), (4, 8));
    assert_eq!(wda.sessions_created(), 0);
}

#[tokio::test]
async fn disconnect_deletes_session() {
    let (wda, driver) = connected((10, 10), (10.0, 10.0)).await;
    driver.disconnect().await.unwrap();
    assert!(!driver.is_connected());
    assert!(wda.current_session().is_none());
    assert_eq!(wda.requests().last().unwrap().method, "DELETE");
}

// ---------------------------------------------------------------------------
// 3. Gestures and keys on the wire
// ---------------------------------------------------------------------------

#[tokio::test]
async fn swipe_and_keys_payloads() {
    let (wda, driver) = connected((10, 10), (10.0, 10.0)).await;
    driver.swipe(195, 572, 195, 272, 0.5).await.unwrap();
    driver.type_text("hi").await.unwrap();
    driver.type_text("").await.unwrap();
    driver.press_button(ButtonName::VolumeUp).await.unwrap();

    let drag = &wda.requests_to("/wda/dragfromtoforduration")[0];
    assert_eq!(
        drag.body,
        json!({ "fromX": 195, "fromY": 572, "toX": 195, "toY": 272, "duration": 0.5 })
    );
    let keys = wda.requests_to("/wda/keys");
    assert_eq!(keys.len(), 1, "empty text sends nothing");
    assert_eq!(keys[0].body, json!({ "value": ["h", "i"] }));
    assert_eq!(wda.requests_to("/wda/pressButton")[0].body, json!({ "name": "volumeUp" }));
}

#[tokio::test]
async fn home_and_active_app() {
    let (wda, driver) = connected((10, 10), (10.0, 10.0)).await;
    driver.home().await.unwrap();
    assert_eq!(wda.requests_to("/wda/homescreen").len(), 1);

    let app = driver.active_app().await.unwrap();
    assert_eq!(app.bundle_id, "com.apple.Preferences");
    assert_eq!(app.pid, Some(312));
}

// ---------------------------------------------------------------------------
// 4. Elements
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_element_is_none() {
    let (_wda, driver) = connected((10, 10), (10.0, 10.0)).await;
    let found = driver
        .find_element(Locator::AccessibilityId, "Nope")
        .await
        .unwrap();
    assert!(found.is_none());
}

#[tokio::test]
async fn element_lookup_click_and_rect() {
    let (wda, driver) = connected((10, 10), (10.0, 10.0)).await;
    wda.respond(
        "POST /element",
        200,
        json!({ "element-6066-11e4-a52e-4f735466cecf": "E1" }),
    );
    wda.respond(
        "GET /element/E1/rect",
        200,
        json!({ "x": 10, "y": 20, "width": 100, "height": 44 }),
    );

    let element = driver
        .find_element(Locator::AccessibilityId, "Done")
        .await
        .unwrap()
        .expect("element should be found");
    assert_eq!(element, ElementRef("E1".into()));
    assert_eq!(
        wda.requests_to("/element")[0].body,
        json!({ "using": "accessibility id", "value": "Done" })
    );

    driver.element_click(&element).await.unwrap();
    assert_eq!(wda.requests_to("/element/E1/click").len(), 1);

    let rect = driver.element_rect(&element).await.unwrap();
    assert_eq!(rect, Frame::new(10.0, 20.0, 100.0, 44.0));
}

#[tokio::test]
async fn wda_error_maps_to_command_failed() {
    let (wda, driver) = connected((10, 10), (10.0, 10.0)).await;
    wda.respond(
        "POST /wda/apps/launch",
        500,
        json!({ "error": "unknown error", "message": "app com.nope is not installed" }),
    );
    let err = driver.launch_app("com.nope").await.unwrap_err();
    match err {
        DriverError::CommandFailed(msg) => assert!(msg.contains("not installed"), "{msg}"),
        other => panic!("expected CommandFailed, got: {other:?}"),
    }
}

#[tokio::test]
async fn clipboard_round_trip_encoding() {
    let (wda, driver) = connected((10, 10), (10.0, 10.0)).await;
    driver.set_clipboard("héllo").await.unwrap();
    let sent = &wda.requests_to("/wda/setPasteboard")[0].body;
    assert_eq!(sent["content"], "aMOpbGxv");

    wda.respond("POST /wda/getPasteboard", 200, json!("aMOpbGxv"));
    assert_eq!(driver.get_clipboard().await.unwrap(), "héllo");
}

// ---------------------------------------------------------------------------
// 5. Tracing spans
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct SpanNames(Arc<Mutex<Vec<&'static str>>>);

impl<S: Subscriber> Layer<S> for SpanNames {
    fn on_new_span(&self, attrs: &span::Attributes<'_>, _id: &span::Id, _ctx: Context<'_, S>) {
        self.0.lock().unwrap().push(attrs.metadata().name());
    }
}

#[tokio::test]
async fn every_driver_operation_opens_a_span() {
    let names = SpanNames::default();
    let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(names.clone()));

    let (_wda, driver) = connected((30, 60), (10.0, 20.0)).await;
    driver.status().await.unwrap();
    driver.long_press(5, 5, 1.0).await.unwrap();
    driver.press_button(ButtonName::Home).await.unwrap();
    driver.home().await.unwrap();
    driver.window_size().await.unwrap();
    driver.active_app().await.unwrap();
    driver.page_source().await.unwrap();
    driver.is_locked().await.unwrap();

    let seen = names.0.lock().unwrap().clone();
    for op in [
        "connect",
        "status",
        "long_press",
        "press_button",
        "home",
        "window_size",
        "active_app",
        "page_source",
        "is_locked",
    ] {
        assert!(seen.contains(&op), "no span for {op}: {seen:?}");
    }
}
