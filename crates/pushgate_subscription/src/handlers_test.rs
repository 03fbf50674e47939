#[cfg(test)]
mod tests {
    use crate::hub::HubClient;
    use crate::logic::SubscriptionService;
    use crate::routes::routes;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use pushgate_common::{Device, DeviceFilter, DeviceType};
    use pushgate_db::{DbError, DeviceStore, HubStore, MemoryDeviceStore, MemoryHubStore};
    use pushgate_queue::{Dispatch, JobDispatcher, JobSettings, PushJob, PushQueues};
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tower::ServiceExt;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CALLBACK: &str = "http://gateway.test/callback";

    #[derive(Default)]
    struct RecordingDispatcher {
        jobs: Mutex<Vec<PushJob>>,
    }

    #[async_trait]
    impl JobDispatcher for RecordingDispatcher {
        async fn dispatch(&self, job: &PushJob) -> Dispatch {
            self.jobs.lock().unwrap().push(job.clone());
            Dispatch::Delivered
        }
    }

    /// Memory store whose lookups fail for one owner.
    struct FlakyDeviceStore {
        inner: MemoryDeviceStore,
        broken_owner: &'static str,
    }

    #[async_trait]
    impl DeviceStore for FlakyDeviceStore {
        async fn save(&self, device: Device) -> Result<Device, DbError> {
            self.inner.save(device).await
        }

        async fn remove_topic(
            &self,
            device_type: &DeviceType,
            device_id: &str,
            owner_id: &str,
            topic: &str,
        ) -> Result<bool, DbError> {
            self.inner
                .remove_topic(device_type, device_id, owner_id, topic)
                .await
        }

        async fn find_by_owner_and_topic(
            &self,
            owner_id: &str,
            topic: Option<&str>,
        ) -> Result<Vec<Device>, DbError> {
            if owner_id == self.broken_owner {
                return Err(DbError::QueryError("transient".to_string()));
            }
            self.inner.find_by_owner_and_topic(owner_id, topic).await
        }

        async fn delete(&self, filter: &DeviceFilter) -> Result<u64, DbError> {
            self.inner.delete(filter).await
        }
    }

    struct Harness {
        app: Router,
        service: Arc<SubscriptionService>,
        devices: Arc<MemoryDeviceStore>,
        hubs: Arc<MemoryHubStore>,
        dispatcher: Arc<RecordingDispatcher>,
    }

    fn harness() -> Harness {
        let devices = Arc::new(MemoryDeviceStore::new());
        let hubs = Arc::new(MemoryHubStore::new());
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let queues = Arc::new(PushQueues::new(JobSettings::default(), dispatcher.clone()));
        let service = Arc::new(SubscriptionService::new(
            devices.clone(),
            hubs.clone(),
            queues,
            HubClient::new(reqwest::Client::new(), CALLBACK),
        ));
        Harness {
            app: routes(service.clone()),
            service,
            devices,
            hubs,
            dispatcher,
        }
    }

    fn form(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn json_post(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, String) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8_lossy(&body).to_string())
    }

    async fn hub(status: u16, body: &str) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .mount(&server)
            .await;
        server
    }

    fn subscribe_form(hub_uri: &str, topic: &str, device_type: &str, device_id: &str) -> String {
        serde_urlencoded::to_string([
            ("hub_uri", hub_uri),
            ("hub_topic", topic),
            ("owner_id", "acme"),
            ("oauth_token", "token"),
            ("device_type", device_type),
            ("device_id", device_id),
        ])
        .unwrap()
    }

    async fn wait_for_jobs(dispatcher: &RecordingDispatcher, count: usize) -> Vec<PushJob> {
        for _ in 0..100 {
            let jobs = dispatcher.jobs.lock().unwrap().clone();
            if jobs.len() >= count {
                return jobs;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        dispatcher.jobs.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn index_names_the_callback_uri() {
        let h = harness();
        let (status, body) = send(&h.app, get("/")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains(CALLBACK));
    }

    #[tokio::test]
    async fn subscribe_stores_device_and_hub_and_proxies_the_hub() {
        let h = harness();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hub"))
            .and(body_string_contains("hub.mode=subscribe"))
            .and(body_string_contains("hub.topic=inbox"))
            .respond_with(ResponseTemplate::new(202).set_body_string("verification pending"))
            .expect(1)
            .mount(&server)
            .await;

        // Topic taken from the hub URI
        let hub_uri = format!("{}/hub?hub.topic=inbox", server.uri());
        let body = serde_urlencoded::to_string([
            ("hub_uri", hub_uri.as_str()),
            ("owner_id", "acme"),
            ("oauth_token", "token"),
            ("device_type", "ios"),
            ("device_id", "device-1"),
            ("project_id", "app-1"),
        ])
        .unwrap();
        let (status, body) = send(&h.app, form("/subscribe", &body)).await;

        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body, "verification pending");

        let devices = h
            .devices
            .find_by_owner_and_topic("acme", Some("inbox"))
            .await
            .unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].device_type, DeviceType::Ios);
        assert_eq!(devices[0].project_id(), Some("app-1"));

        let hubs = h.hubs.find_by_owner("acme").await.unwrap().unwrap();
        assert!(hubs.hub_uris.contains(&hub_uri));
    }

    #[tokio::test]
    async fn resubscribing_grows_the_topic_set() {
        let h = harness();
        let server = hub(204, "").await;

        for topic in ["inbox", "calendar"] {
            let body = subscribe_form(&server.uri(), topic, "android", "device-1");
            let (status, _) = send(&h.app, form("/subscribe", &body)).await;
            assert_eq!(status, StatusCode::NO_CONTENT);
        }

        let devices = h.devices.find_by_owner_and_topic("acme", None).await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].topics.len(), 2);
    }

    #[tokio::test]
    async fn subscribe_accepts_json_bodies() {
        let h = harness();
        let server = hub(200, "ok").await;

        let (status, _) = send(
            &h.app,
            json_post(
                "/subscribe",
                json!({
                    "hub_uri": server.uri(),
                    "hub_topic": "inbox",
                    "owner_id": "acme",
                    "oauth_token": "token",
                    "device_type": "windows",
                    "device_id": "https://channel.example/1"
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn subscribe_validates_required_fields() {
        let h = harness();
        let body = serde_urlencoded::to_string([
            ("hub_uri", "http://hub.example/hub"),
            ("hub_topic", "inbox"),
            ("owner_id", "acme"),
            ("device_type", "ios"),
            ("device_id", "device-1"),
        ])
        .unwrap();

        let (status, body) = send(&h.app, form("/subscribe", &body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("oauth_token"));

        let devices = h.devices.find_by_owner_and_topic("acme", None).await.unwrap();
        assert!(devices.is_empty());
    }

    #[tokio::test]
    async fn unreachable_hub_is_service_unavailable() {
        let h = harness();
        let body = subscribe_form("http://127.0.0.1:9/hub", "inbox", "ios", "device-1");
        let (status, _) = send(&h.app, form("/subscribe", &body)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn unsubscribe_removes_one_topic_and_proxies_hub_errors() {
        let h = harness();
        h.devices
            .save(
                Device::new(DeviceType::Ios, "device-1", "acme")
                    .with_topic("inbox")
                    .with_topic("calendar"),
            )
            .await
            .unwrap();
        let server = hub(404, "unknown subscription").await;

        let body = serde_urlencoded::to_string([
            ("hub_uri", server.uri().as_str()),
            ("hub_topic", "inbox"),
            ("owner_id", "acme"),
            ("device_type", "ios"),
            ("device_id", "device-1"),
        ])
        .unwrap();
        let (status, body) = send(&h.app, form("/unsubscribe", &body)).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, "unknown subscription");
        let devices = h.devices.find_by_owner_and_topic("acme", None).await.unwrap();
        assert_eq!(
            devices[0].topics.iter().collect::<Vec<_>>(),
            vec!["calendar"]
        );
    }

    #[tokio::test]
    async fn unregister_deletes_the_device() {
        let h = harness();
        h.devices
            .save(Device::new(DeviceType::Android, "device-1", "acme").with_topic("inbox"))
            .await
            .unwrap();
        h.devices
            .save(Device::new(DeviceType::Android, "device-1", "other").with_topic("inbox"))
            .await
            .unwrap();

        let (status, body) = send(
            &h.app,
            form(
                "/unregister",
                "owner_id=acme&device_type=android&device_id=device-1",
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "succeeded");
        assert!(h
            .devices
            .find_by_owner_and_topic("acme", None)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            h.devices
                .find_by_owner_and_topic("other", None)
                .await
                .unwrap()
                .len(),
            1
        );

        let (status, _) = send(&h.app, form("/unregister", "device_type=android")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn verification_status_codes() {
        let h = harness();
        h.devices
            .save(Device::new(DeviceType::Ios, "device-1", "acme").with_topic("inbox"))
            .await
            .unwrap();

        let cases = [
            ("/callback?hub.challenge=c&hub.mode=subscribe", 401, None),
            ("/callback?owner_id=acme&hub.mode=subscribe", 403, None),
            ("/callback?owner_id=acme&hub.challenge=c", 404, None),
            (
                "/callback?owner_id=acme&hub.challenge=c&hub.mode=subscribe&hub.topic=news",
                405,
                None,
            ),
            (
                "/callback?owner_id=acme&hub.challenge=abc123&hub.mode=subscribe&hub.topic=inbox",
                200,
                Some("abc123"),
            ),
            (
                "/callback?owner_id=nobody&hub.challenge=bye&hub.mode=unsubscribe&hub.topic=inbox",
                200,
                Some("bye"),
            ),
        ];

        for (uri, expected, echoed) in cases {
            let (status, body) = send(&h.app, get(uri)).await;
            assert_eq!(status.as_u16(), expected, "{uri}");
            if let Some(challenge) = echoed {
                assert_eq!(body, challenge);
            }
        }
    }

    #[tokio::test]
    async fn pings_become_one_job_per_device_type() {
        let h = harness();
        for (device_type, id) in [
            (DeviceType::Ios, "i1"),
            (DeviceType::Ios, "i2"),
            (DeviceType::Ios, "i3"),
            (DeviceType::Android, "a1"),
        ] {
            h.devices
                .save(Device::new(device_type, id, "acme").with_topic("inbox"))
                .await
                .unwrap();
        }

        let (status, body) = send(
            &h.app,
            json_post(
                "/callback",
                json!([{ "owner_id": "acme", "topic": "inbox", "object_data": { "id": 42 } }]),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let report: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(report["jobs"], 2);

        let jobs = wait_for_jobs(&h.dispatcher, 2).await;
        assert_eq!(jobs.len(), 2);
        let ios = jobs
            .iter()
            .find(|j| j.device_type == DeviceType::Ios)
            .unwrap();
        assert_eq!(ios.device_ids.len(), 3);
        assert_eq!(ios.payload.data, json!({ "id": 42 }));
        assert_eq!(ios.payload.topic.as_deref(), Some("inbox"));
    }

    #[tokio::test]
    async fn projects_split_jobs_of_one_device_type() {
        let h = harness();
        h.devices
            .save(
                Device::new(DeviceType::Android, "a1", "acme")
                    .with_topic("inbox")
                    .with_extra("project_id", json!("app-1")),
            )
            .await
            .unwrap();
        h.devices
            .save(Device::new(DeviceType::Android, "a2", "acme").with_topic("inbox"))
            .await
            .unwrap();

        send(
            &h.app,
            json_post("/callback", json!([{ "owner_id": "acme", "topic": "inbox", "object_data": {} }])),
        )
        .await;

        let jobs = wait_for_jobs(&h.dispatcher, 2).await;
        assert_eq!(jobs.len(), 2);
        assert!(jobs
            .iter()
            .any(|j| j.extra.get("project_id") == Some(&json!("app-1"))));
        assert!(jobs.iter().any(|j| j.extra.is_empty()));
    }

    #[tokio::test]
    async fn malformed_entries_are_skipped() {
        let h = harness();
        h.devices
            .save(Device::new(DeviceType::Ios, "i1", "acme").with_topic("inbox"))
            .await
            .unwrap();

        let (status, body) = send(
            &h.app,
            json_post(
                "/callback",
                json!([
                    { "owner_id": "acme", "topic": "inbox", "object_data": {} },
                    { "topic": "inbox" },
                    "garbage"
                ]),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let report: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(report["accepted"], 1);
        assert_eq!(report["skipped"], 2);
        assert_eq!(wait_for_jobs(&h.dispatcher, 1).await.len(), 1);

        let (status, _) = send(&h.app, json_post("/callback", json!({ "owner_id": "acme" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn empty_fields_and_missing_object_data_are_malformed() {
        let h = harness();
        let server = hub(204, "").await;
        h.hubs.save("acme", &server.uri()).await.unwrap();

        let (status, body) = send(
            &h.app,
            json_post(
                "/callback",
                json!([
                    { "owner_id": "acme", "topic": "", "object_data": {} },
                    { "owner_id": " ", "topic": "inbox", "object_data": {} },
                    { "owner_id": "acme", "topic": "inbox" }
                ]),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let report: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(report["accepted"], 0);
        assert_eq!(report["skipped"], 3);
        assert_eq!(report["unsubscribed"], 0);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn a_failing_lookup_only_fails_its_own_entry() {
        let devices = Arc::new(FlakyDeviceStore {
            inner: MemoryDeviceStore::new(),
            broken_owner: "broken",
        });
        for (owner, id) in [("first", "t1"), ("broken", "t2"), ("last", "t3")] {
            devices
                .save(Device::new(DeviceType::Ios, id, owner).with_topic("inbox"))
                .await
                .unwrap();
        }
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let queues = Arc::new(PushQueues::new(JobSettings::default(), dispatcher.clone()));
        let service = Arc::new(SubscriptionService::new(
            devices,
            Arc::new(MemoryHubStore::new()),
            queues,
            HubClient::new(reqwest::Client::new(), CALLBACK),
        ));
        let app = routes(service.clone());

        let (status, body) = send(
            &app,
            json_post(
                "/callback",
                json!([
                    { "owner_id": "first", "topic": "inbox", "object_data": {} },
                    { "owner_id": "broken", "topic": "inbox", "object_data": {} },
                    { "owner_id": "last", "topic": "inbox", "object_data": {} }
                ]),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let report: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(report["accepted"], 3);
        assert_eq!(report["failed"], 1);
        assert_eq!(report["jobs"], 2);

        let jobs = wait_for_jobs(&dispatcher, 2).await;
        let mut recipients: Vec<String> = jobs
            .iter()
            .flat_map(|j| j.device_ids.clone())
            .collect();
        recipients.sort();
        assert_eq!(recipients, vec!["t1", "t3"]);
    }

    #[tokio::test]
    async fn pings_without_devices_unsubscribe_from_every_hub() {
        let h = harness();
        let first = hub(204, "").await;
        let second = hub(204, "").await;
        h.hubs.save("acme", &first.uri()).await.unwrap();
        h.hubs.save("acme", &second.uri()).await.unwrap();

        let (status, _) = send(
            &h.app,
            json_post("/callback", json!([{ "owner_id": "acme", "topic": "gone", "object_data": {} }])),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);

        for server in [&first, &second] {
            let mut received = Vec::new();
            for _ in 0..100 {
                received = server.received_requests().await.unwrap();
                if !received.is_empty() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            assert_eq!(received.len(), 1);
            let body = String::from_utf8_lossy(&received[0].body).to_string();
            assert!(body.contains("hub.mode=unsubscribe"));
            assert!(body.contains("hub.topic=gone"));
        }
        assert!(h.dispatcher.jobs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cascade_survives_a_failing_hub() {
        let h = harness();
        let healthy = hub(204, "").await;
        h.hubs.save("acme", &healthy.uri()).await.unwrap();
        h.hubs.save("acme", "http://127.0.0.1:9/hub").await.unwrap();

        let results = h.service.auto_unsubscribe("acme", "gone").await;

        assert_eq!(results.len(), 2);
        let ok = results.iter().find(|r| r.hub_uri == healthy.uri()).unwrap();
        assert_eq!(ok.result, Ok(204));
        assert!(results.iter().any(|r| r.result.is_err()));
    }
}
