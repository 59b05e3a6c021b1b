use cinebook::config::{CircuitBreakerConfig, PaymentConfig};
use cinebook::error::ApiError;
use cinebook::services::payment::{CircuitState, PaymentGatewayClient, PaymentMethod};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server_uri: &str, failure_threshold: u32) -> PaymentGatewayClient {
    PaymentGatewayClient::from_config(
        &PaymentConfig {
            merchant_id: "cinebook-test".to_string(),
            merchant_password: "secret".to_string(),
            gateway_url: server_uri.to_string(),
            request_timeout_seconds: 5,
        },
        &CircuitBreakerConfig {
            failure_threshold,
            timeout_seconds: 60,
        },
    )
}

#[tokio::test]
async fn successful_charge_returns_receipt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/charge"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "success": true,
            "receiptId": "rcpt-42"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server.uri(), 5);
    let receipt = client
        .charge(750, "res-1", "Jawan - 2 билет(ов)", None, PaymentMethod::Card)
        .await
        .unwrap();

    assert_eq!(receipt.receipt_id, "rcpt-42");
    assert_eq!(receipt.amount, 750);
    assert_eq!(client.circuit_breaker_status().0, CircuitState::Closed);
}

#[tokio::test]
async fn declined_charge_maps_to_payment_declined() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/charge"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "success": false,
            "message": "Недостаточно средств"
        })))
        .mount(&server)
        .await;

    let client = client_for(&server.uri(), 5);
    let err = client
        .charge(600, "res-2", "RRR - 1 билет(ов)", None, PaymentMethod::Upi)
        .await
        .unwrap_err();

    match err {
        ApiError::PaymentDeclined(message) => assert_eq!(message, "Недостаточно средств"),
        other => panic!("expected PaymentDeclined, got {:?}", other),
    }

    // Отказ шлюза - это ответ, а не сбой: выключатель остаётся замкнутым
    assert_eq!(client.circuit_breaker_status().0, CircuitState::Closed);
}

#[tokio::test]
async fn missing_receipt_id_is_a_gateway_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/charge"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "success": true })),
        )
        .mount(&server)
        .await;

    let client = client_for(&server.uri(), 5);
    let err = client
        .charge(200, "res-3", "3 Idiots - 1 билет(ов)", None, PaymentMethod::Card)
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::PaymentFailed(_)));
}

#[tokio::test]
async fn repeated_gateway_errors_open_the_breaker() {
    let server = MockServer::start().await;
    // После двух сбоев выключатель размыкается: третий вызов до шлюза не доходит
    Mock::given(method("POST"))
        .and(path("/api/v1/charge"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let client = client_for(&server.uri(), 2);

    for _ in 0..2 {
        let err = client
            .charge(350, "res-4", "Pathaan - 1 билет(ов)", None, PaymentMethod::Card)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::PaymentFailed(_)));
    }

    assert_eq!(client.circuit_breaker_status().0, CircuitState::Open);

    let err = client
        .charge(350, "res-4", "Pathaan - 1 билет(ов)", None, PaymentMethod::Card)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::PaymentFailed(_)));
}
