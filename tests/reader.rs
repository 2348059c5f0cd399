// Integration tests for `EnvoyReader` against a mocked Envoy.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use envoy_reader::model::{Generation, Metric, MetricName};
use envoy_reader::{envoy, EnvoyReader, Error, CONSUMPTION_NOT_AVAILABLE, INVERTERS_NOT_AVAILABLE};
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn read_resource(filename: &str) -> String {
    let mut d = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    d.push(format!("resources/test/{}", filename));
    fs::read_to_string(d.as_path()).unwrap()
}

fn json_response(filename: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "application/json")
        .set_body_string(read_resource(filename))
}

fn html_response(filename: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/html")
        .set_body_string(read_resource(filename))
}

async fn mount(server: &MockServer, endpoint: &str, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(endpoint))
        .respond_with(response)
        .mount(server)
        .await;
}

fn reader(server: &MockServer, inverters: bool) -> EnvoyReader {
    EnvoyReader::new(envoy(server.uri(), None, None, inverters)).unwrap()
}

fn not_available() -> Metric {
    Metric::NotAvailable(CONSUMPTION_NOT_AVAILABLE.to_string())
}

const DIGEST_CHALLENGE: &str =
    r#"Digest realm="enphaseenergy.com", nonce="dcd98b7102dd2f0e8b11d0f600bfb0c093", qop="auth""#;

#[tokio::test]
async fn model_s_metered() {
    let server = MockServer::start().await;
    mount(&server, "/production.json", json_response("production.json")).await;

    let reader = reader(&server, false);
    let profile = reader.detect().await.unwrap();
    assert_eq!(Some(Generation::ModelS { metered: true }), profile.generation);

    assert_eq!(Metric::Value(478), reader.production().await.unwrap());
    assert_eq!(Metric::Value(4429), reader.daily_production().await.unwrap());
    assert_eq!(Metric::Value(42971), reader.seven_days_production().await.unwrap());
    assert_eq!(Metric::Value(4598459), reader.lifetime_production().await.unwrap());
    assert_eq!(Metric::Value(1162), reader.consumption().await.unwrap());
    assert_eq!(Metric::Value(8911), reader.daily_consumption().await.unwrap());
    assert_eq!(Metric::Value(61832), reader.seven_days_consumption().await.unwrap());
    assert_eq!(Metric::Value(9210448), reader.lifetime_consumption().await.unwrap());
}

#[tokio::test]
async fn model_s_unmetered_reads_single_value_endpoint() {
    let server = MockServer::start().await;
    mount(&server, "/production.json", json_response("production_unmetered.json")).await;
    mount(&server, "/api/v1/production", json_response("api_v1_production.json")).await;

    let reader = reader(&server, false);
    assert_eq!(Metric::Value(141), reader.production().await.unwrap());
    assert_eq!(
        Some(Generation::ModelS { metered: false }),
        reader.profile().await.generation
    );
    assert_eq!(Metric::Value(9803), reader.daily_production().await.unwrap());
    assert_eq!(not_available(), reader.consumption().await.unwrap());
    assert_eq!(not_available(), reader.lifetime_consumption().await.unwrap());
}

#[tokio::test]
async fn model_c() {
    let server = MockServer::start().await;
    mount(&server, "/production.json", ResponseTemplate::new(404)).await;
    mount(&server, "/api/v1/production", json_response("api_v1_production.json")).await;

    let reader = reader(&server, false);
    assert_eq!(Metric::Value(141), reader.production().await.unwrap());
    assert_eq!(Some(Generation::ModelC), reader.profile().await.generation);
    assert_eq!(Metric::Value(9803), reader.daily_production().await.unwrap());
    assert_eq!(Metric::Value(58017), reader.seven_days_production().await.unwrap());
    assert_eq!(Metric::Value(13131422), reader.lifetime_production().await.unwrap());

    assert_eq!(not_available(), reader.consumption().await.unwrap());
    assert_eq!(not_available(), reader.daily_consumption().await.unwrap());
    assert_eq!(not_available(), reader.seven_days_consumption().await.unwrap());
    assert_eq!(not_available(), reader.lifetime_consumption().await.unwrap());
}

#[tokio::test]
async fn legacy_html_watts() {
    let server = MockServer::start().await;
    mount(&server, "/production", html_response("production_W.html")).await;

    let reader = reader(&server, false);
    assert_eq!(Metric::Value(318), reader.production().await.unwrap());
    assert_eq!(Some(Generation::LegacyHtml), reader.profile().await.generation);
    assert_eq!(Metric::Value(6740), reader.daily_production().await.unwrap());
    assert_eq!(Metric::Value(45800), reader.seven_days_production().await.unwrap());
    assert_eq!(Metric::Value(46800000), reader.lifetime_production().await.unwrap());
    assert_eq!(not_available(), reader.consumption().await.unwrap());
}

#[tokio::test]
async fn legacy_html_kilowatts() {
    let server = MockServer::start().await;
    mount(&server, "/production", html_response("production_kW.html")).await;

    let reader = reader(&server, true);
    assert_eq!(Metric::Value(1390), reader.production().await.unwrap());
    assert_eq!(Metric::Value(8790), reader.daily_production().await.unwrap());
    assert_eq!(Metric::Value(87700), reader.seven_days_production().await.unwrap());
    assert_eq!(Metric::Value(23400000), reader.lifetime_production().await.unwrap());
    assert_eq!(
        Metric::NotAvailable(INVERTERS_NOT_AVAILABLE.to_string()),
        reader.inverters_production().await.unwrap()
    );
}

#[tokio::test]
async fn detection_fails_when_nothing_answers() {
    let server = MockServer::start().await;

    let reader = reader(&server, false);
    match reader.production().await {
        Err(Error::Detection { host }) => {
            assert!(server.uri().ends_with(&host));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn detection_fails_when_host_unreachable() {
    let reader = EnvoyReader::new(envoy("127.0.0.1:1".to_string(), None, None, false)).unwrap();
    match reader.detect().await {
        Err(e @ Error::Detection { .. }) => assert!(e.to_string().contains("127.0.0.1:1")),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn unrecognised_page_is_not_legacy() {
    let server = MockServer::start().await;
    mount(
        &server,
        "/production",
        ResponseTemplate::new(200).set_body_string("<html>Hello</html>"),
    )
    .await;

    let reader = reader(&server, false);
    assert!(matches!(reader.detect().await, Err(Error::Detection { .. })));
}

#[tokio::test]
async fn forced_generation_skips_detection() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/production.json"))
        .respond_with(json_response("production.json"))
        .expect(0)
        .mount(&server)
        .await;
    mount(&server, "/production", html_response("production_W.html")).await;

    let reader = reader(&server, false);
    reader.set_generation(Generation::LegacyHtml).await;
    assert_eq!(Metric::Value(318), reader.production().await.unwrap());
}

#[tokio::test]
async fn malformed_html_is_a_parse_error() {
    let server = MockServer::start().await;
    let body = "<html><td>Currently</td> <td>n/a</td></html>";
    mount(
        &server,
        "/production",
        ResponseTemplate::new(200).set_body_string(body),
    )
    .await;

    let reader = reader(&server, false);
    reader.set_generation(Generation::LegacyHtml).await;
    match reader.production().await {
        Err(Error::Parse { text, .. }) => assert_eq!(body, text),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn slow_device_is_retried_then_unreachable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/production"))
        .respond_with(json_response("api_v1_production.json").set_delay(Duration::from_millis(500)))
        .expect(3)
        .mount(&server)
        .await;

    let mut settings = envoy(server.uri(), None, None, false);
    settings.timeout = Duration::from_millis(100);
    let reader = EnvoyReader::new(settings).unwrap();
    reader.set_generation(Generation::ModelC).await;

    match reader.production().await {
        Err(Error::Connectivity { host, message }) => {
            assert_eq!(server.address().to_string(), host);
            assert!(message.ends_with("after 3 attempt(s)"), "{}", message);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn server_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/production"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let reader = reader(&server, false);
    reader.set_generation(Generation::ModelC).await;
    assert!(matches!(
        reader.production().await,
        Err(Error::UnexpectedStatus { status: 500, .. })
    ));
}

#[tokio::test]
async fn reads_within_interval_are_cached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/production"))
        .respond_with(json_response("api_v1_production.json"))
        .expect(1)
        .mount(&server)
        .await;

    let reader = reader(&server, false);
    assert_eq!(Metric::Value(141), reader.production().await.unwrap());
    assert_eq!(Metric::Value(141), reader.production().await.unwrap());
    assert_eq!(Metric::Value(9803), reader.daily_production().await.unwrap());
    reader.update().await.unwrap();
}

#[tokio::test]
async fn cache_expires_after_interval() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/production"))
        .respond_with(json_response("api_v1_production.json"))
        .expect(2)
        .mount(&server)
        .await;

    let reader = reader(&server, false);
    reader.set_update_interval(Duration::from_millis(100)).await;
    assert_eq!(Duration::from_millis(100), reader.update_interval().await);

    assert_eq!(Metric::Value(141), reader.production().await.unwrap());
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(Metric::Value(141), reader.production().await.unwrap());
}

#[tokio::test]
async fn reset_detects_again() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/production"))
        .respond_with(json_response("api_v1_production.json"))
        .expect(2)
        .mount(&server)
        .await;

    let reader = reader(&server, false);
    reader.production().await.unwrap();
    reader.reset().await;
    assert_eq!(None, reader.profile().await.generation);
    reader.production().await.unwrap();
}

#[tokio::test]
async fn update_returns_every_metric() {
    let server = MockServer::start().await;
    mount(&server, "/api/v1/production", json_response("api_v1_production.json")).await;

    let reader = reader(&server, false);
    let update = reader.update().await.unwrap();

    assert_eq!(MetricName::ALL.len(), update.len());
    assert_eq!(&Metric::Value(141), update[&MetricName::Production].as_ref().unwrap());
    assert_eq!(
        &Metric::Value(13131422),
        update[&MetricName::LifetimeProduction].as_ref().unwrap()
    );
    assert_eq!(&not_available(), update[&MetricName::Consumption].as_ref().unwrap());
    assert_eq!(
        &Metric::NotAvailable(INVERTERS_NOT_AVAILABLE.to_string()),
        update[&MetricName::InvertersProduction].as_ref().unwrap()
    );
}

#[tokio::test]
async fn update_isolates_failing_metric() {
    let server = MockServer::start().await;
    mount(&server, "/api/v1/production", json_response("api_v1_production.json")).await;
    mount(
        &server,
        "/info.xml",
        ResponseTemplate::new(200).set_body_string(read_resource("info.xml")),
    )
    .await;
    mount(
        &server,
        "/api/v1/production/inverters",
        ResponseTemplate::new(500),
    )
    .await;

    let reader = reader(&server, true);
    let update = reader.update().await.unwrap();

    assert_eq!(&Metric::Value(141), update[&MetricName::Production].as_ref().unwrap());
    assert!(matches!(
        update[&MetricName::InvertersProduction],
        Err(Error::UnexpectedStatus { status: 500, .. })
    ));
}

#[tokio::test]
async fn inverters_with_digest_authentication() {
    let server = MockServer::start().await;
    mount(&server, "/api/v1/production", json_response("api_v1_production.json")).await;
    mount(
        &server,
        "/info.xml",
        ResponseTemplate::new(200).set_body_string(read_resource("info.xml")),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/production/inverters"))
        .and(header_exists("authorization"))
        .respond_with(json_response("api_v1_production_inverters.json"))
        .expect(1)
        .mount(&server)
        .await;
    mount(
        &server,
        "/api/v1/production/inverters",
        ResponseTemplate::new(401).insert_header("www-authenticate", DIGEST_CHALLENGE),
    )
    .await;

    let reader = reader(&server, true);
    match reader.inverters_production().await.unwrap() {
        Metric::Inverters(inverters) => {
            assert_eq!(3, inverters.len());
            assert_eq!(241, inverters["121547060472"].watts);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(
        Some("043616".to_string()),
        reader.profile().await.serial_suffix
    );
}

#[tokio::test]
async fn serial_is_probed_again_after_failure() {
    let server = MockServer::start().await;
    mount(&server, "/api/v1/production", json_response("api_v1_production.json")).await;
    Mock::given(method("GET"))
        .and(path("/info.xml"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/info.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(read_resource("info.xml")))
        .expect(1)
        .mount(&server)
        .await;
    mount(
        &server,
        "/api/v1/production/inverters",
        json_response("api_v1_production_inverters.json"),
    )
    .await;

    let reader = reader(&server, true);
    reader.inverters_production().await.unwrap();
    assert_eq!(None, reader.profile().await.serial_suffix);

    reader.inverters_production().await.unwrap();
    reader.update().await.unwrap();
    assert_eq!(
        Some("043616".to_string()),
        reader.profile().await.serial_suffix
    );
}

#[tokio::test]
async fn inverters_rejected_credentials() {
    let server = MockServer::start().await;
    mount(&server, "/api/v1/production", json_response("api_v1_production.json")).await;
    mount(
        &server,
        "/api/v1/production/inverters",
        ResponseTemplate::new(401).insert_header("www-authenticate", DIGEST_CHALLENGE),
    )
    .await;

    let reader = EnvoyReader::new(envoy(
        server.uri(),
        None,
        Some("wrong".to_string()),
        true,
    ))
    .unwrap();

    assert!(matches!(
        reader.inverters_production().await,
        Err(Error::Authentication { .. })
    ));
}

#[tokio::test]
async fn inverters_unauthorized_without_challenge() {
    let server = MockServer::start().await;
    mount(&server, "/api/v1/production", json_response("api_v1_production.json")).await;
    mount(
        &server,
        "/api/v1/production/inverters",
        ResponseTemplate::new(401),
    )
    .await;

    let reader = reader(&server, true);
    assert!(matches!(
        reader.inverters_production().await,
        Err(Error::Authentication { .. })
    ));
}

#[tokio::test]
async fn inverters_are_never_cached() {
    let server = MockServer::start().await;
    mount(&server, "/api/v1/production", json_response("api_v1_production.json")).await;
    Mock::given(method("GET"))
        .and(path("/api/v1/production/inverters"))
        .respond_with(json_response("api_v1_production_inverters.json"))
        .expect(2)
        .mount(&server)
        .await;

    let reader = EnvoyReader::new(envoy(
        server.uri(),
        None,
        Some("123456".to_string()),
        true,
    ))
    .unwrap();
    assert!(reader.inverters_production().await.unwrap().is_available());
    assert!(reader.inverters_production().await.unwrap().is_available());
}

#[tokio::test]
async fn malformed_inverters_are_unavailable() {
    let server = MockServer::start().await;
    mount(&server, "/api/v1/production", json_response("api_v1_production.json")).await;
    mount(
        &server,
        "/api/v1/production/inverters",
        ResponseTemplate::new(200).set_body_string(r#"[{"serialNumber": "1"}]"#),
    )
    .await;

    let reader = EnvoyReader::new(envoy(
        server.uri(),
        None,
        Some("123456".to_string()),
        true,
    ))
    .unwrap();
    assert_eq!(
        Metric::NotAvailable(INVERTERS_NOT_AVAILABLE.to_string()),
        reader.inverters_production().await.unwrap()
    );
}
