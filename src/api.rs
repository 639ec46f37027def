use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use reqwest::header::{ACCEPT, CONTENT_TYPE, USER_AGENT};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::structs::*;

const AGENT: &str = "college-bus-bot/0.1";

/// Source of bus position fixes.
#[async_trait]
pub trait BusLocationProvider: Send + Sync {
    async fn fetch(&self, route_id: &str) -> Result<LocationFix>;
}

//////////////////////////////////////////////////////////
// Simulated provider
//////////////////////////////////////////////////////////
/// Jitters around a per-route centre after a fake network delay.
pub struct SimulatedBusLocations {
    delay: Duration,
}

impl SimulatedBusLocations {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn centre(route_id: &str) -> Position {
        match route_id {
            // Ennore
            "R01" => Position { lat: 13.2176, lon: 80.3061 },
            // Triplicane
            "R02" => Position { lat: 13.0578, lon: 80.2771 },
            // Chennai Central
            _ => Position { lat: 13.0827, lon: 80.2707 },
        }
    }
}

#[async_trait]
impl BusLocationProvider for SimulatedBusLocations {
    async fn fetch(&self, route_id: &str) -> Result<LocationFix> {
        tokio::time::sleep(self.delay).await;

        let centre = Self::centre(route_id);
        let (dlat, dlon) = {
            let mut rng = rand::thread_rng();
            (rng.gen_range(-0.005..0.005), rng.gen_range(-0.005..0.005))
        };

        Ok(LocationFix {
            route_id: route_id.to_string(),
            latitude: centre.lat + dlat,
            longitude: centre.lon + dlon,
            timestamp: Utc::now(),
        })
    }
}

//////////////////////////////////////////////////////////
// HTTP provider
//////////////////////////////////////////////////////////
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FixResponse {
    latitude: f64,
    longitude: f64,
    timestamp: Option<chrono::DateTime<Utc>>,
}

/// `GET {base}/routes/{id}/location` against a tracking backend.
pub struct HttpBusLocations {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBusLocations {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl BusLocationProvider for HttpBusLocations {
    async fn fetch(&self, route_id: &str) -> Result<LocationFix> {
        let url = format!("{}/routes/{}/location", self.base_url, route_id);

        let resp = self
            .client
            .get(url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, AGENT)
            .send()
            .await?
            .error_for_status()?
            .json::<FixResponse>()
            .await?;

        Ok(LocationFix {
            route_id: route_id.to_string(),
            latitude: resp.latitude,
            longitude: resp.longitude,
            timestamp: resp.timestamp.unwrap_or_else(Utc::now),
        })
    }
}

//////////////////////////////////////////////////////////
// Reverse geocoding
//////////////////////////////////////////////////////////
/// Street (and house number when known) nearest to `pos`, via LocationIQ.
pub async fn fetch_address(client: &reqwest::Client, token: &str, pos: Position) -> Result<String> {
    let url = format!(
        "https://eu1.locationiq.com/v1/reverse?key={}&lat={}&lon={}&format=json",
        token, pos.lat, pos.lon
    );

    let json: serde_json::Value = client
        .get(url)
        .header(CONTENT_TYPE, "application/json")
        .header(ACCEPT, "application/json")
        .header(USER_AGENT, AGENT)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    format_address(&json)
}

fn format_address(json: &serde_json::Value) -> Result<String> {
    let address = &json["address"];
    let street = address["road"]
        .as_str()
        .or_else(|| address["suburb"].as_str())
        .ok_or_else(|| Error::Transport("no road in reverse geocode response".to_string()))?;

    let mut res = street.to_string();
    if let Some(house_number) = address["house_number"].as_str() {
        res = format!("{} {}", res, house_number);
    };
    Ok(res)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn simulated_fix_stays_near_centre() {
        let provider = SimulatedBusLocations::new(Duration::from_secs(1));
        let fix = provider.fetch("R02").await.unwrap();

        let centre = SimulatedBusLocations::centre("R02");
        assert_eq!(fix.route_id, "R02");
        assert!((fix.latitude - centre.lat).abs() <= 0.005);
        assert!((fix.longitude - centre.lon).abs() <= 0.005);
    }

    #[test]
    fn unknown_routes_use_city_centre() {
        assert_eq!(SimulatedBusLocations::centre("R06"), SimulatedBusLocations::centre("zzz"));
    }

    #[test]
    fn address_formatting() {
        let full = json!({"address": {"road": "Anna Salai", "house_number": "12"}});
        assert_eq!(format_address(&full).unwrap(), "Anna Salai 12");

        let suburb = json!({"address": {"suburb": "Ennore"}});
        assert_eq!(format_address(&suburb).unwrap(), "Ennore");

        assert!(format_address(&json!({})).is_err());
    }
}
