//! REST adapter for the shipping game API.
//!
//! Payloads are read as loose JSON and normalized into domain types, so field
//! aliases and numeric strings from different game versions are accepted.

use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::ApiConfig;
use crate::domain::{
    CommodityClass, DepartureReceipt, Port, Reserve, RouteAssignment, RoutePrices, SubCommodity,
    Vessel, VesselId, VesselStatus,
};
use crate::error::{PilotError, Result};
use crate::gateway::GameApi;

#[derive(Clone)]
pub struct GameRestClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
}

impl GameRestClient {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("portpilot/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| PilotError::Internal(format!("failed to build game HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    async fn request_json(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.http.request(method.clone(), &url);

        if let Some(key) = &self.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|e| PilotError::Auth(format!("invalid API key header: {}", e)))?;
            req = req.header(AUTHORIZATION, value);
        }

        if let Some(body) = body {
            req = req.header(CONTENT_TYPE, "application/json").json(&body);
        }

        debug!("{} {}", method, path);
        let resp = req.send().await?;
        let status = resp.status();
        let text = resp.text().await?;

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(PilotError::RateLimited(format!(
                "game API rate limited for {} {}",
                method, path
            )));
        }

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(PilotError::Auth(format!(
                "game API refused credentials for {} {}",
                method, path
            )));
        }

        if !status.is_success() {
            return Err(PilotError::Api {
                method: method.to_string(),
                path: path.to_string(),
                status: status.as_u16(),
                body: text,
            });
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }

        Ok(serde_json::from_str(&text)?)
    }

    fn pick_obj<'a>(root: &'a Value, keys: &[&str]) -> Option<&'a Value> {
        keys.iter().find_map(|key| root.get(*key)).filter(|v| !v.is_null())
    }

    fn pick_array<'a>(root: &'a Value, keys: &[&str]) -> &'a [Value] {
        if let Some(items) = root.as_array() {
            return items;
        }
        Self::pick_obj(root, keys)
            .and_then(|v| v.as_array())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    fn pick_str<'a>(root: &'a Value, keys: &[&str]) -> Option<&'a str> {
        Self::pick_obj(root, keys).and_then(|v| v.as_str())
    }

    fn pick_f64(root: &Value, keys: &[&str]) -> Option<f64> {
        Self::pick_obj(root, keys).and_then(|v| match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
    }

    fn pick_i64(root: &Value, keys: &[&str]) -> Option<i64> {
        Self::pick_f64(root, keys).map(|v| v.round() as i64)
    }

    fn pick_bool(root: &Value, keys: &[&str]) -> Option<bool> {
        Self::pick_obj(root, keys).and_then(|v| match v {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => n.as_i64().map(|n| n != 0),
            Value::String(s) => Some(matches!(s.as_str(), "true" | "1" | "yes")),
            _ => None,
        })
    }

    fn parse_decimalish(value: &Value) -> Option<Decimal> {
        match value {
            Value::String(s) => Decimal::from_str(s.trim()).ok(),
            Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
            _ => None,
        }
    }

    fn pick_decimal(root: &Value, keys: &[&str]) -> Decimal {
        Self::pick_obj(root, keys)
            .and_then(Self::parse_decimalish)
            .unwrap_or(Decimal::ZERO)
    }

    /// Sub-commodity keyed numbers, e.g. `{"dry": 400, "refrigerated": 100}`
    fn commodity_map<T>(value: Option<&Value>, read: impl Fn(&Value) -> Option<T>) -> BTreeMap<SubCommodity, T> {
        let mut out = BTreeMap::new();
        let Some(Value::Object(entries)) = value else {
            return out;
        };
        for (key, raw) in entries {
            match (SubCommodity::from_str(key), read(raw)) {
                (Ok(commodity), Some(parsed)) => {
                    out.insert(commodity, parsed);
                }
                _ => debug!("Ignoring unknown commodity entry '{}'", key),
            }
        }
        out
    }

    fn map_route(value: &Value) -> Option<RouteAssignment> {
        let route_id = Self::pick_i64(value, &["route_id", "id"])?;
        let destination = Self::pick_str(value, &["destination", "to", "port2"])?;
        Some(RouteAssignment {
            route_id: route_id as u64,
            origin: Self::pick_str(value, &["origin", "from", "port1"])
                .unwrap_or_default()
                .to_string(),
            destination: destination.to_string(),
            distance_nm: Self::pick_f64(value, &["distance_nm", "distance"]).unwrap_or(0.0),
            speed_kn: Self::pick_f64(value, &["speed_kn", "speed"]).unwrap_or(0.0),
            guards: Self::pick_i64(value, &["guards"]).unwrap_or(0).max(0) as u32,
            max_speed_kn: Self::pick_f64(value, &["max_speed_kn", "max_speed"]).unwrap_or(0.0),
            required_fuel_t: Self::pick_f64(value, &["required_fuel_t", "fuel_required"]),
        })
    }

    fn map_vessel(value: &Value) -> Option<Vessel> {
        let id = Self::pick_i64(value, &["id", "vessel_id"])?;
        let class = Self::pick_str(value, &["class", "type"])
            .and_then(|s| CommodityClass::from_str(s).ok())?;
        let status = Self::pick_str(value, &["status"])
            .and_then(|s| VesselStatus::from_str(s).ok())
            .unwrap_or(VesselStatus::Enroute);

        Some(Vessel {
            id: id as VesselId,
            name: Self::pick_str(value, &["name"]).unwrap_or_default().to_string(),
            class,
            capacity: Self::commodity_map(Self::pick_obj(value, &["capacity"]), |v| {
                v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok()))
            }),
            status,
            parked: Self::pick_bool(value, &["parked", "is_parked"]).unwrap_or(false),
            current_port: Self::pick_str(value, &["current_port", "port"])
                .unwrap_or_default()
                .to_string(),
            route: Self::pick_obj(value, &["route", "routes"]).and_then(Self::map_route),
            fuel_factor: Self::pick_f64(value, &["fuel_factor"]).unwrap_or(1.0),
        })
    }

    fn map_port(value: &Value) -> Option<Port> {
        let code = Self::pick_str(value, &["code", "port", "name"])?;
        let to_i64 = |v: &Value| v.as_f64().map(|n| n.round() as i64);
        Some(Port {
            code: code.to_string(),
            demand: Self::commodity_map(Self::pick_obj(value, &["demand"]), to_i64),
            consumed: Self::commodity_map(Self::pick_obj(value, &["consumed"]), to_i64),
        })
    }

    fn map_reserve(value: &Value) -> Reserve {
        Reserve {
            fuel_t: Self::pick_f64(value, &["fuel_t", "fuel"]).unwrap_or(0.0),
            co2_t: Self::pick_f64(value, &["co2_t", "co2"]).unwrap_or(0.0),
            cash: Self::pick_decimal(value, &["cash", "balance"]),
            max_fuel_t: Self::pick_f64(value, &["max_fuel_t", "max_fuel"]).unwrap_or(0.0),
            max_co2_t: Self::pick_f64(value, &["max_co2_t", "max_co2"]).unwrap_or(0.0),
        }
    }

    fn map_receipt(value: &Value) -> Result<DepartureReceipt> {
        // Some versions answer 200 with an error field instead of a status code.
        // A bare `message` is informational unless the body also says success=false.
        if let Some(error) = Self::pick_str(value, &["error"]) {
            return Err(PilotError::Transaction(error.to_string()));
        }
        if Self::pick_bool(value, &["success", "ok"]) == Some(false) {
            let message = Self::pick_str(value, &["message"]).unwrap_or("departure refused");
            return Err(PilotError::Transaction(message.to_string()));
        }

        Ok(DepartureReceipt {
            income: Self::pick_decimal(value, &["income", "depart_income"]),
            fee: Self::pick_decimal(value, &["fee", "harbor_fee"]),
            fuel_used_t: Self::pick_f64(value, &["fuel_used_t", "fuel_used"]).unwrap_or(0.0),
            co2_used_t: Self::pick_f64(value, &["co2_used_t", "co2_used"]).unwrap_or(0.0),
            cargo_loaded: Self::pick_i64(value, &["cargo_loaded", "cargo"])
                .unwrap_or(0)
                .max(0) as u64,
        })
    }
}

#[async_trait]
impl GameApi for GameRestClient {
    async fn fleet(&self, operator_id: &str) -> Result<Vec<Vessel>> {
        let path = format!("/operators/{}/fleet", operator_id);
        let root = self.request_json(Method::GET, &path, None).await?;

        let raw = Self::pick_array(&root, &["vessels", "fleet", "data"]);
        let vessels: Vec<Vessel> = raw.iter().filter_map(Self::map_vessel).collect();
        if vessels.len() < raw.len() {
            warn!(
                "Skipped {} unreadable vessel record(s) for {}",
                raw.len() - vessels.len(),
                operator_id
            );
        }
        Ok(vessels)
    }

    async fn assigned_ports(&self, operator_id: &str) -> Result<Vec<Port>> {
        let path = format!("/operators/{}/ports", operator_id);
        let root = self.request_json(Method::GET, &path, None).await?;
        Ok(Self::pick_array(&root, &["ports", "data"])
            .iter()
            .filter_map(Self::map_port)
            .collect())
    }

    async fn route_price(&self, vessel_id: VesselId, route_id: u64) -> Result<RoutePrices> {
        let path = format!("/vessels/{}/routes/{}/price", vessel_id, route_id);
        let root = self.request_json(Method::GET, &path, None).await?;
        let prices = Self::commodity_map(
            Self::pick_obj(&root, &["prices"]).or(Some(&root)),
            Self::parse_decimalish,
        );
        Ok(RoutePrices { prices })
    }

    async fn reserve(&self, operator_id: &str) -> Result<Reserve> {
        let path = format!("/operators/{}/reserve", operator_id);
        let root = self.request_json(Method::GET, &path, None).await?;
        Ok(Self::map_reserve(&root))
    }

    async fn depart_vessel(
        &self,
        vessel_id: VesselId,
        speed_kn: f64,
        guards: u32,
    ) -> Result<DepartureReceipt> {
        let path = format!("/vessels/{}/depart", vessel_id);
        let body = json!({ "speed": speed_kn, "guards": guards });

        match self.request_json(Method::POST, &path, Some(body)).await {
            Ok(root) => Self::map_receipt(&root),
            // Game-side rejections carry their reason in the body
            Err(PilotError::Api { status, body, .. }) if (400..500).contains(&status) => {
                let message = serde_json::from_str::<Value>(&body)
                    .ok()
                    .and_then(|v| Self::pick_str(&v, &["error", "message"]).map(str::to_string))
                    .unwrap_or(body);
                Err(PilotError::Transaction(message))
            }
            Err(e) => Err(e),
        }
    }

    async fn contribution(&self, operator_id: &str) -> Result<i64> {
        let path = format!("/operators/{}/contribution", operator_id);
        let root = self.request_json(Method::GET, &path, None).await?;
        Self::pick_i64(&root, &["contribution", "value"])
            .or_else(|| root.as_i64())
            .ok_or_else(|| PilotError::Validation("contribution missing from response".to_string()))
    }

    async fn vessel_status(&self, vessel_id: VesselId) -> Result<Option<VesselStatus>> {
        let path = format!("/vessels/{}/status", vessel_id);
        let root = self.request_json(Method::GET, &path, None).await?;
        Ok(Self::pick_str(&root, &["status"]).and_then(|s| VesselStatus::from_str(s).ok()))
    }
}
