//! Built-in tools and the shared console state they act on.

use crate::error::ToolError;
use crate::memory::MemoryStore;
use crate::tools::{ToolDefinition, ToolRegistry};
use crate::wallet::{AddressBook, Wallet};
use crate::weather::WeatherApi;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::info;

/// Coordinates pinned by the latest `get_weather` call, for a map/marker
/// display. Set twice per lookup: once with the bare query coordinates
/// (pending state) and once enriched after the fetch resolves.
#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    pub lat: f64,
    pub lng: f64,
    pub location: Option<String>,
    pub temperature: Option<String>,
}

/// Console-scoped state the tools mutate and the view reads. Cleared on
/// disconnect along with the conversation.
#[derive(Default)]
pub struct ConsoleState {
    pub memory: MemoryStore,
    marker: Mutex<Option<Marker>>,
    balance_visible: AtomicBool,
}

impl ConsoleState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn marker(&self) -> Option<Marker> {
        self.marker.lock().expect("marker lock poisoned").clone()
    }

    pub fn set_marker(&self, marker: Marker) {
        *self.marker.lock().expect("marker lock poisoned") = Some(marker);
    }

    pub fn balance_visible(&self) -> bool {
        self.balance_visible.load(Ordering::Relaxed)
    }

    pub fn set_balance_visible(&self, visible: bool) {
        self.balance_visible.store(visible, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.memory.clear();
        *self.marker.lock().expect("marker lock poisoned") = None;
        self.balance_visible.store(false, Ordering::Relaxed);
    }
}

/// Everything the built-in handlers need, shared by `Arc`.
pub struct ToolContext {
    pub state: Arc<ConsoleState>,
    pub weather: Arc<dyn WeatherApi>,
    pub wallet: Arc<dyn Wallet>,
    pub address_book: AddressBook,
}

/// Registers the standard console tools. Callers may re-register any of them
/// later to swap behavior; last registration wins.
pub fn register_builtin_tools(registry: &ToolRegistry, context: Arc<ToolContext>) {
    register_set_memory(registry, context.clone());
    register_get_weather(registry, context.clone());
    register_send_eth(registry, context.clone());
    register_get_account_balance(registry, context.clone());
    register_hide_account_balance(registry, context);
}

fn string_arg(args: &Value, key: &str) -> Result<String, ToolError> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ToolError::InvalidArguments(format!("missing string field '{key}'")))
}

fn number_arg(args: &Value, key: &str) -> Result<f64, ToolError> {
    args.get(key)
        .and_then(Value::as_f64)
        .ok_or_else(|| ToolError::InvalidArguments(format!("missing numeric field '{key}'")))
}

fn register_set_memory(registry: &ToolRegistry, context: Arc<ToolContext>) {
    let definition = ToolDefinition {
        name: "set_memory".to_string(),
        description: "Saves important data about the user into memory.".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "key": {
                    "type": "string",
                    "description": "The key of the memory value. Always use lowercase and underscores."
                },
                "value": { "type": "string", "description": "Value can be anything represented as a string" }
            }
        }),
        required: vec!["key".to_string(), "value".to_string()],
    };
    registry.register(
        definition,
        Arc::new(move |args| {
            let context = context.clone();
            Box::pin(async move {
                let key = string_arg(&args, "key")?;
                let value = string_arg(&args, "value")?;
                context.state.memory.set(key.clone(), value.clone());
                info!(%key, "memory updated");
                Ok(json!({ "ok": true, "key": key, "value": value }))
            })
        }),
    );
}

fn register_get_weather(registry: &ToolRegistry, context: Arc<ToolContext>) {
    let definition = ToolDefinition {
        name: "get_weather".to_string(),
        description: "Retrieves the weather for a given lat, lng coordinate pair. Specify a label for the location.".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "lat": { "type": "number", "description": "Latitude" },
                "lng": { "type": "number", "description": "Longitude" },
                "location": { "type": "string", "description": "Name of the location" }
            }
        }),
        required: vec!["lat".to_string(), "lng".to_string(), "location".to_string()],
    };
    registry.register(
        definition,
        Arc::new(move |args| {
            let context = context.clone();
            Box::pin(async move {
                let lat = number_arg(&args, "lat")?;
                let lng = number_arg(&args, "lng")?;
                let location = string_arg(&args, "location")?;

                // Pin the marker right away so the view shows a pending state
                // while the fetch is in flight.
                context.state.set_marker(Marker {
                    lat,
                    lng,
                    location: Some(location.clone()),
                    temperature: None,
                });

                let report = context
                    .weather
                    .current(lat, lng)
                    .await
                    .map_err(ToolError::handler)?;

                context.state.set_marker(Marker {
                    lat,
                    lng,
                    location: Some(location),
                    temperature: Some(format!("{}{}", report.temperature, report.temperature_units)),
                });

                Ok(json!({
                    "temperature": {
                        "value": report.temperature,
                        "units": report.temperature_units,
                    },
                    "wind_speed": {
                        "value": report.wind_speed,
                        "units": report.wind_speed_units,
                    }
                }))
            })
        }),
    );
}

fn register_send_eth(registry: &ToolRegistry, context: Arc<ToolContext>) {
    let definition = ToolDefinition {
        name: "send_eth".to_string(),
        description: "Sends ETH to a recipient, either a saved contact name or a 0x address."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "recipient": { "type": "string", "description": "Contact name or 0x address" },
                "amount_eth": { "type": "number", "description": "Amount in whole ETH" }
            }
        }),
        required: vec!["recipient".to_string(), "amount_eth".to_string()],
    };
    registry.register(
        definition,
        Arc::new(move |args| {
            let context = context.clone();
            Box::pin(async move {
                let recipient = string_arg(&args, "recipient")?;
                let amount = number_arg(&args, "amount_eth")?;
                if amount <= 0.0 {
                    return Ok(json!({ "error": "amount must be positive" }));
                }

                let (label, address) = if AddressBook::is_address(&recipient) {
                    (recipient.clone(), recipient.clone())
                } else {
                    match context.address_book.resolve(&recipient) {
                        Some((name, address)) => (name.to_string(), address.to_string()),
                        None => {
                            return Ok(json!({
                                "error": format!("no contact matching '{recipient}'")
                            }));
                        }
                    }
                };

                match context.wallet.transfer(&address, amount).await {
                    Ok(tx_hash) => Ok(json!({
                        "message": format!("sent {amount} ETH to {label}"),
                        "tx_hash": tx_hash,
                    })),
                    Err(e) => Ok(json!({ "error": e.to_string() })),
                }
            })
        }),
    );
}

fn register_get_account_balance(registry: &ToolRegistry, context: Arc<ToolContext>) {
    let definition = ToolDefinition {
        name: "get_account_balance".to_string(),
        description: "Shows the connected wallet's balance on screen and returns it.".to_string(),
        parameters: json!({ "type": "object", "properties": {} }),
        required: vec![],
    };
    registry.register(
        definition,
        Arc::new(move |_args| {
            let context = context.clone();
            Box::pin(async move {
                context.state.set_balance_visible(true);
                match context.wallet.balance().await {
                    Ok(balance) => Ok(json!({ "message": format!("balance is {balance}") })),
                    Err(e) => Ok(json!({ "error": e.to_string() })),
                }
            })
        }),
    );
}

fn register_hide_account_balance(registry: &ToolRegistry, context: Arc<ToolContext>) {
    let definition = ToolDefinition {
        name: "hide_account_balance".to_string(),
        description: "Hides the wallet balance from the screen.".to_string(),
        parameters: json!({ "type": "object", "properties": {} }),
        required: vec![],
    };
    registry.register(
        definition,
        Arc::new(move |_args| {
            let context = context.clone();
            Box::pin(async move {
                context.state.set_balance_visible(false);
                Ok(json!({ "message": "balance hidden" }))
            })
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::weather::{MockWeatherApi, WeatherReport};
    use crate::wallet::MockWallet;
    use std::collections::BTreeMap;

    fn context(weather: MockWeatherApi, wallet: MockWallet) -> Arc<ToolContext> {
        Arc::new(ToolContext {
            state: Arc::new(ConsoleState::new()),
            weather: Arc::new(weather),
            wallet: Arc::new(wallet),
            address_book: AddressBook::new(BTreeMap::from([(
                "Colin Smith".to_string(),
                "0x1111111111111111111111111111111111111111".to_string(),
            )])),
        })
    }

    fn registry_with(context: Arc<ToolContext>) -> ToolRegistry {
        let registry = ToolRegistry::new();
        register_builtin_tools(&registry, context);
        registry
    }

    #[tokio::test]
    async fn set_memory_writes_the_store() {
        let context = context(MockWeatherApi::new(), MockWallet::new());
        let registry = registry_with(context.clone());

        let result = registry
            .invoke("set_memory", r#"{"key":"home_city","value":"Lisbon"}"#)
            .await;
        assert_eq!(result["ok"], true);
        assert_eq!(
            context.state.memory.get("home_city").as_deref(),
            Some("Lisbon")
        );
    }

    #[tokio::test]
    async fn get_weather_pins_marker_twice_and_normalizes_units() {
        let mut weather = MockWeatherApi::new();
        weather.expect_current().returning(|_, _| {
            Ok(WeatherReport {
                temperature: 21.5,
                temperature_units: "°C".to_string(),
                wind_speed: 12.0,
                wind_speed_units: "km/h".to_string(),
            })
        });
        let context = context(weather, MockWallet::new());
        let registry = registry_with(context.clone());

        let result = registry
            .invoke(
                "get_weather",
                r#"{"lat":38.72,"lng":-9.14,"location":"Lisbon"}"#,
            )
            .await;
        assert_eq!(result["temperature"]["value"], 21.5);
        assert_eq!(result["wind_speed"]["units"], "km/h");

        let marker = context.state.marker().unwrap();
        assert_eq!(marker.location.as_deref(), Some("Lisbon"));
        assert_eq!(marker.temperature.as_deref(), Some("21.5°C"));
    }

    #[tokio::test]
    async fn get_weather_failure_still_leaves_pending_marker() {
        let mut weather = MockWeatherApi::new();
        weather
            .expect_current()
            .returning(|_, _| Err(anyhow::anyhow!("provider offline")));
        let context = context(weather, MockWallet::new());
        let registry = registry_with(context.clone());

        let result = registry
            .invoke("get_weather", r#"{"lat":1.0,"lng":2.0,"location":"X"}"#)
            .await;
        assert_eq!(result["error"], "provider offline");

        let marker = context.state.marker().unwrap();
        assert_eq!(marker.lat, 1.0);
        assert!(marker.temperature.is_none());
    }

    #[tokio::test]
    async fn send_eth_resolves_contact_names() {
        let mut wallet = MockWallet::new();
        wallet
            .expect_transfer()
            .withf(|to, amount| to.starts_with("0x1111") && *amount == 0.5)
            .returning(|_, _| Ok("0xtxhash".to_string()));
        let context = context(MockWeatherApi::new(), wallet);
        let registry = registry_with(context);

        let result = registry
            .invoke("send_eth", r#"{"recipient":"colin","amount_eth":0.5}"#)
            .await;
        assert_eq!(result["message"], "sent 0.5 ETH to Colin Smith");
        assert_eq!(result["tx_hash"], "0xtxhash");
    }

    #[tokio::test]
    async fn send_eth_normalizes_wallet_failure() {
        let mut wallet = MockWallet::new();
        wallet
            .expect_transfer()
            .returning(|_, _| Err(anyhow::anyhow!("insufficient funds")));
        let context = context(MockWeatherApi::new(), wallet);
        let registry = registry_with(context);

        let result = registry
            .invoke("send_eth", r#"{"recipient":"colin","amount_eth":9000.0}"#)
            .await;
        assert_eq!(result["error"], "insufficient funds");
    }

    #[tokio::test]
    async fn unknown_recipient_is_a_structured_error() {
        let context = context(MockWeatherApi::new(), MockWallet::new());
        let registry = registry_with(context);
        let result = registry
            .invoke("send_eth", r#"{"recipient":"nobody","amount_eth":1.0}"#)
            .await;
        assert_eq!(result["error"], "no contact matching 'nobody'");
    }

    #[tokio::test]
    async fn balance_tools_toggle_visibility_only() {
        let mut wallet = MockWallet::new();
        wallet
            .expect_balance()
            .returning(|| Ok("1.2500 ETH".to_string()));
        let context = context(MockWeatherApi::new(), wallet);
        let registry = registry_with(context.clone());

        assert!(!context.state.balance_visible());
        let result = registry.invoke("get_account_balance", "{}").await;
        assert_eq!(result["message"], "balance is 1.2500 ETH");
        assert!(context.state.balance_visible());

        let result = registry.invoke("hide_account_balance", "{}").await;
        assert_eq!(result["message"], "balance hidden");
        assert!(!context.state.balance_visible());
    }
}
