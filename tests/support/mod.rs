//! Shared fixtures: an in-memory HTTP transport scripted per URL.

#![allow(dead_code)]

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use tegpoll_core::{HttpClient, HttpError, HttpRequest, HttpResponse};

type Scripted = Result<HttpResponse, HttpError>;

struct Route {
    fragment: String,
    responses: Vec<Scripted>,
}

/// Answers each request from the first route whose fragment occurs in the
/// URL. Responses are consumed in order; the last one repeats.
#[derive(Default)]
pub struct ScriptedHttpClient {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, fragment: &str, responses: Vec<Scripted>) -> Self {
        self.routes
            .lock()
            .expect("route table should not be poisoned")
            .push(Route {
                fragment: fragment.to_owned(),
                responses,
            });
        self
    }

    pub fn on_json(self, fragment: &str, body: serde_json::Value) -> Self {
        self.on(fragment, vec![Ok(HttpResponse::ok_json(body.to_string()))])
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .expect("request store should not be poisoned")
            .clone()
    }

    pub fn count(&self, fragment: &str) -> usize {
        self.requests()
            .iter()
            .filter(|request| request.url.contains(fragment))
            .count()
    }

    fn answer(&self, url: &str) -> Scripted {
        let mut routes = self.routes.lock().expect("route table should not be poisoned");
        let Some(route) = routes.iter_mut().find(|route| url.contains(&route.fragment)) else {
            return Err(HttpError::connect(format!("no scripted route for {url}")));
        };
        match route.responses.len() {
            0 => Err(HttpError::connect(format!("no scripted response for {url}"))),
            1 => route.responses[0].clone(),
            _ => route.responses.remove(0),
        }
    }
}

impl HttpClient for ScriptedHttpClient {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
        let response = self.answer(&request.url);
        self.requests
            .lock()
            .expect("request store should not be poisoned")
            .push(request);
        Box::pin(async move { response })
    }
}

pub const GATEWAY: &str = "https://gateway.test";
pub const FLEET: &str = "https://fleet.test";

/// Aggregates payload with every device class of a typical install.
pub fn meters_payload() -> serde_json::Value {
    serde_json::json!({
        "site": {
            "last_communication_time": "2021-02-01T14:43:06-08:00",
            "instant_power": "20",
            "frequency": 60.0,
            "energy_exported": 1250.5,
            "num_meters_aggregated": 1
        },
        "battery": {
            "last_communication_time": "2021-02-01T14:43:06-08:00",
            "instant_power": -1500.0,
            "num_meters_aggregated": 2
        },
        "load": {
            "last_communication_time": "2021-02-01T14:43:06-08:00",
            "instant_power": 1234.5
        },
        "solar": {
            "last_communication_time": "2021-02-01T14:43:06-08:00",
            "instant_power": 2714.0
        }
    })
}

pub fn operation_payload() -> serde_json::Value {
    serde_json::json!({"real_mode": "self_consumption", "backup_reserve_percent": 20.0})
}

pub fn soe_payload() -> serde_json::Value {
    serde_json::json!({"percentage": 88.5})
}

/// Gateway with every local endpoint answering.
pub fn healthy_gateway() -> ScriptedHttpClient {
    ScriptedHttpClient::new()
        .on(
            "/api/login/Basic",
            vec![Ok(HttpResponse::ok_json(r#"{"token":"ignored"}"#)
                .with_cookie("AuthCookie=abc")
                .with_cookie("UserRecord=def"))],
        )
        .on_json("/api/meters/aggregates", meters_payload())
        .on_json("/api/operation", operation_payload())
        .on_json("/api/system_status/soe", soe_payload())
        .on_json("/api/system_status/grid_status", serde_json::json!({"grid_status": "SystemGridConnected"}))
}

pub fn fleet_products(resource_type: &str) -> serde_json::Value {
    serde_json::json!({
        "response": [
            {"id": 1, "resource_type": "vehicle"},
            {"energy_site_id": 90210, "resource_type": resource_type}
        ],
        "count": 2
    })
}
